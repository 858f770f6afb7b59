//! Background task supervision
//!
//! Deferred issuance tasks are keyed by UUID and remove themselves on
//! completion. `stop` cancels everything and awaits the handles with
//! cancellation errors suppressed; tasks must tolerate cancellation at any
//! await point.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use uuid::Uuid;

/// Owner of the in-flight background tasks
#[derive(Default)]
pub struct TaskSupervisor {
    tasks: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
}

impl TaskSupervisor {
    /// Create an empty supervisor
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a supervised task; it deregisters itself when it finishes
    pub fn spawn(&self, future: impl Future<Output = ()> + Send + 'static) -> Uuid {
        let task_id = Uuid::new_v4();
        let registry = Arc::clone(&self.tasks);
        // Holding the lock across the spawn keeps the done-hook from firing
        // before the handle is registered.
        let mut tasks = self.tasks.lock().unwrap();
        let handle = tokio::spawn(async move {
            future.await;
            registry.lock().unwrap().remove(&task_id);
        });
        tasks.insert(task_id, handle);
        task_id
    }

    /// Number of tasks still in flight
    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// True when no task is in flight
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every task and await the handles, suppressing the outcomes
    pub async fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_tasks_remove_themselves_and_stop_cancels() {
        let supervisor = TaskSupervisor::new();
        let acc = Arc::new(AsyncMutex::new(Vec::<&'static str>::new()));

        let acc1 = Arc::clone(&acc);
        supervisor.spawn(async move {
            sleep(Duration::from_millis(20)).await;
            acc1.lock().await.push("SAMPLE1");
            sleep(Duration::from_secs(50)).await;
            acc1.lock().await.push("BAD_END");
        });
        let acc2 = Arc::clone(&acc);
        supervisor.spawn(async move {
            sleep(Duration::from_millis(25)).await;
            acc2.lock().await.push("SAMPLE2");
        });
        assert_eq!(supervisor.len(), 2);

        sleep(Duration::from_millis(60)).await;
        // the short task completed and deregistered; the long one hangs
        assert_eq!(supervisor.len(), 1);

        supervisor.stop().await;
        assert_eq!(supervisor.len(), 0);
        assert_eq!(*acc.lock().await, vec!["SAMPLE1", "SAMPLE2"]);
    }

    #[tokio::test]
    async fn test_stop_on_empty_supervisor_is_noop() {
        let supervisor = TaskSupervisor::new();
        supervisor.stop().await;
        assert!(supervisor.is_empty());
    }
}
