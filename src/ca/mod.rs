//! Certificate authority service
//!
//! Holds the node's CA key (when configured), rebuilds the CA chain from
//! the store, and signs downstream requests after a deference delay that
//! lets a closer CA act first. Signed certificates re-enter the chain as
//! ordinary transactions through the RPC boundary; the service never writes
//! to the store.

use std::path::Path;
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::{CaConfig, NodeConfig};
use crate::csp::Key;
use crate::error::{DpkiError, Result};
use crate::names::{self, DistinguishedName};
use crate::store::{CertEntity, Store};
use crate::x509::{apply_csr, inspect_cert, CertInfo, CsrInfo, IssueParams, IssuerPair};

pub mod client;
pub mod supervisor;

pub use client::RpcClient;
pub use supervisor::TaskSupervisor;

/// One certificate of the CA chain
#[derive(Debug, Clone)]
pub struct ChainLink {
    /// Certificate PEM as stored
    pub pem: String,
    /// Parsed facts
    pub info: CertInfo,
}

/// Certificate authority service
pub struct CaService {
    store: Arc<Store>,
    config: CaConfig,
    client: RpcClient,
    key: Option<Key>,
    chain: Mutex<Vec<ChainLink>>,
    has_own: Mutex<bool>,
    supervisor: TaskSupervisor,
}

impl CaService {
    /// Build the service from the node configuration, loading the CA key
    /// file when one is configured
    pub fn new(store: Arc<Store>, config: &NodeConfig, home: impl AsRef<Path>) -> Result<Self> {
        let key = match &config.ca.ca_key_file {
            Some(key_file) => Some(crate::config::load_key_file(home.as_ref().join(key_file))?),
            None => None,
        };
        Ok(Self::with_parts(
            store,
            config.ca.clone(),
            RpcClient::new(&config.rpc),
            key,
        ))
    }

    /// Assemble the service from already-built parts
    pub fn with_parts(
        store: Arc<Store>,
        config: CaConfig,
        client: RpcClient,
        key: Option<Key>,
    ) -> Self {
        Self {
            store,
            config,
            client,
            key,
            chain: Mutex::new(Vec::new()),
            has_own: Mutex::new(false),
            supervisor: TaskSupervisor::new(),
        }
    }

    /// Rebuild the CA chain from the store
    ///
    /// With a CA key: look up the node's own certificate by public key and
    /// walk issuers up to the self-issued root. Without one: load the
    /// stored self-issued CA record as namespace root. Returns the own
    /// subject when the node became an issuing CA.
    pub fn initialize(&self, conn: &rusqlite::Connection) -> Result<Option<String>> {
        let mut chain = Vec::new();
        let mut result = None;
        let mut has_own = false;

        if let Some(key) = &self.key {
            if let Some(pem) = CertEntity::get_by_public_key(conn, &key.public_bytes())? {
                let mut info = inspect_cert(&pem)?;
                result = Some(info.subject.to_string());
                has_own = true;
                chain.push(ChainLink { pem, info: info.clone() });
                // walk up to the self-issued root
                while !info.self_issued() {
                    match CertEntity::get_by_subject(conn, &info.issuer.to_string())? {
                        Some(pem) => {
                            info = inspect_cert(&pem)?;
                            chain.push(ChainLink { pem, info: info.clone() });
                        }
                        None => break,
                    }
                }
            }
        }

        if chain.is_empty() {
            match Self::find_root(conn)? {
                Some(link) => chain.push(link),
                None => {
                    return Err(DpkiError::IssuerUnknown(
                        "active CA root certificate not found".to_string(),
                    ))
                }
            }
        }

        *self.chain.lock().unwrap() = chain;
        *self.has_own.lock().unwrap() = has_own;
        Ok(result)
    }

    /// First stored valid CA record whose subject equals its issuer
    fn find_root(conn: &rusqlite::Connection) -> Result<Option<ChainLink>> {
        for record in CertEntity::list_by_role(conn, "CA", 500, 0)? {
            let info = inspect_cert(&record.pem)?;
            if info.self_issued() {
                return Ok(Some(ChainLink { pem: record.pem, info }));
            }
        }
        Ok(None)
    }

    /// True once a chain snapshot exists; keyed nodes additionally need
    /// their own certificate on chain
    pub fn is_initialized(&self) -> bool {
        if self.key.is_some() {
            *self.has_own.lock().unwrap()
        } else {
            !self.chain.lock().unwrap().is_empty()
        }
    }

    /// The node's own CA certificate, when it holds the matching key
    pub fn cert(&self) -> Option<ChainLink> {
        if self.key.is_some() && *self.has_own.lock().unwrap() {
            self.chain.lock().unwrap().first().cloned()
        } else {
            None
        }
    }

    /// The namespace root (self-issued) certificate
    pub fn root(&self) -> Option<ChainLink> {
        self.chain.lock().unwrap().last().cloned()
    }

    /// Current chain snapshot, own certificate first
    pub fn chain(&self) -> Vec<ChainLink> {
        self.chain.lock().unwrap().clone()
    }

    /// True when the namespace root could issue for this subject
    pub fn in_namespace(&self, subject: &DistinguishedName) -> bool {
        self.root()
            .map(|root| names::can_issue(&root.info.subject, subject) >= 1)
            .unwrap_or(false)
    }

    /// Hops from the own CA certificate down to `subject`; 0 when the node
    /// is not an issuing CA or the subject is out of reach
    pub fn can_issue(&self, subject: &DistinguishedName) -> usize {
        self.cert()
            .map(|own| names::can_issue(&own.info.subject, subject))
            .unwrap_or(0)
    }

    /// Schedule autonomous issuance for a request (non-blocking)
    ///
    /// The task sleeps `(distance - 1) * waiting_for_downstream` so a closer
    /// CA fires first; on wake it re-checks the store and aborts when the
    /// subject is already served. Task failures are logged and swallowed -
    /// a later block from a closer CA is the natural retry.
    pub fn issue(&self, csr_pem: &str, csr: &CsrInfo) {
        let distance = self.can_issue(&csr.subject);
        if distance < 1 {
            return;
        }
        let Some(template) = csr.template else {
            return;
        };
        if !self.config.allows(template) {
            debug!(template = template.name(), "template not allowed, ignoring request");
            return;
        }
        let Some(own) = self.cert() else {
            return;
        };
        let Some(key) = self.key.clone() else {
            return;
        };
        let (waiting, valid_for) = match (
            self.config.waiting_for_downstream(),
            self.config.valid_for_days(template),
        ) {
            (Ok(waiting), Ok(valid_for)) => (waiting, valid_for),
            _ => {
                warn!("invalid ca durations, ignoring request");
                return;
            }
        };

        let pre_timeout = waiting * (distance as u32 - 1);
        let store = Arc::clone(&self.store);
        let client = self.client.clone();
        let subject = csr.subject.to_string();
        let csr_pem = csr_pem.to_string();
        let next_path_length = self.config.next_path_length;

        self.supervisor.spawn(async move {
            tokio::time::sleep(pre_timeout).await;

            let existing = {
                let conn = store.conn();
                CertEntity::get_by_subject(&conn, &subject)
            };
            match existing {
                Ok(Some(_)) => {
                    debug!(subject = %subject, "already served by a closer authority");
                    return;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(%err, "store lookup failed, dropping issuance");
                    return;
                }
            }

            let not_after = OffsetDateTime::now_utc().date() + time::Duration::days(valid_for);
            let signed = apply_csr(
                &csr_pem,
                IssuerPair::Ca {
                    cert_pem: &own.pem,
                    key: &key,
                },
                &IssueParams {
                    not_after,
                    not_before: None,
                    path_length: Some(next_path_length),
                },
            );
            let cert_pem = match signed {
                Ok(cert_pem) => cert_pem,
                Err(err) => {
                    warn!(%err, subject = %subject, "issuance failed");
                    return;
                }
            };
            match client.send_tx(cert_pem.as_bytes()).await {
                Ok(()) => info!(subject = %subject, "issued downstream certificate"),
                Err(err) => warn!(%err, subject = %subject, "broadcast failed"),
            }
        });
    }

    /// Number of issuance tasks in flight
    pub fn pending_tasks(&self) -> usize {
        self.supervisor.len()
    }

    /// Cancel all scheduled issuance tasks
    pub async fn stop(&self) {
        self.supervisor.stop().await;
    }
}
