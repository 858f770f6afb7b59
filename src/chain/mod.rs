//! The consensus-host application
//!
//! The BFT engine serializes calls into this application: within a block,
//! `begin_block -> deliver_tx* -> end_block -> commit` run strictly in
//! order; `check_tx` may interleave but never mutates committed state. The
//! block transaction opens at `begin_block` and commits with the block.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::ca::CaService;
use crate::config::NodeConfig;
use crate::csp::{CsProvider, HashOpts};
use crate::error::Result;
use crate::store::{AppState, CertEntity, Store};
use crate::x509::inspect_cert;

pub mod checker;
pub mod types;

pub use checker::{validate, TxPayload, Verdict};
pub use types::{
    ChainApp, RequestBeginBlock, RequestCheckTx, RequestCommit, RequestDeliverTx,
    RequestEndBlock, RequestQuery, ResponseCheckTx, ResponseCommit, ResponseDeliverTx,
    ResponseQuery, ResultCode,
};

#[derive(Debug, Deserialize)]
struct GenesisState {
    certificates: Vec<String>,
}

/// The replicated certificate state machine
pub struct Application {
    csp: CsProvider,
    store: Arc<Store>,
    ca: Arc<CaService>,
    state: Mutex<AppState>,
    block_height: AtomicI64,
    in_block: AtomicBool,
}

impl Application {
    /// Build the application for a node home directory
    pub fn new(home: impl AsRef<Path>) -> Result<Self> {
        let config = NodeConfig::load(home.as_ref())?;
        let store = Arc::new(Store::connect()?);
        let ca = Arc::new(CaService::new(Arc::clone(&store), &config, home.as_ref())?);
        Self::with_parts(store, ca)
    }

    /// Assemble the application from already-built parts
    pub fn with_parts(store: Arc<Store>, ca: Arc<CaService>) -> Result<Self> {
        let state = {
            let conn = store.conn();
            AppState::head(&conn)?.unwrap_or_default()
        };
        Ok(Self {
            csp: CsProvider::new(),
            store,
            ca,
            state: Mutex::new(state),
            block_height: AtomicI64::new(0),
            in_block: AtomicBool::new(false),
        })
    }

    /// The CA service driven by this application
    pub fn ca(&self) -> &Arc<CaService> {
        &self.ca
    }

    /// The store backing this application
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn open_block(&self) -> Result<()> {
        if !self.in_block.swap(true, Ordering::SeqCst) {
            self.store.begin()?;
        }
        Ok(())
    }
}

#[async_trait]
impl ChainApp for Application {
    async fn initial_app_state(&self) -> Result<(i64, Vec<u8>)> {
        let head = {
            let conn = self.store.conn();
            AppState::head(&conn)?.unwrap_or_default()
        };
        let result = (head.block_height, head.app_hash.clone());
        *self.state.lock().unwrap() = head;
        Ok(result)
    }

    async fn load_genesis(&self, genesis_data: &[u8]) -> Result<Vec<u8>> {
        info!(size = genesis_data.len(), "received genesis app state");
        let genesis: GenesisState = serde_json::from_slice(genesis_data)?;

        self.open_block()?;
        let mut hasher = self.csp.get_hash(&HashOpts::default())?;
        let mut entities = Vec::with_capacity(genesis.certificates.len());
        for pem in &genesis.certificates {
            entities.push(CertEntity::from_pem(pem)?);
            hasher.write(pem.as_bytes());
        }
        {
            let conn = self.store.conn();
            CertEntity::insert(&conn, &entities)?;
        }
        Ok(hasher.sum(None))
    }

    async fn check_tx(&self, req: RequestCheckTx) -> ResponseCheckTx {
        let verdict = {
            let conn = self.store.conn();
            checker::validate(&conn, &self.ca, &req.tx)
        };
        debug!(code = verdict.code.code(), log = ?verdict.log, "check_tx");
        ResponseCheckTx {
            code: verdict.code.code(),
            log: verdict.log,
        }
    }

    async fn begin_block(&self, req: RequestBeginBlock) -> Result<()> {
        self.block_height.store(req.height, Ordering::SeqCst);
        self.open_block()
    }

    async fn deliver_tx(&self, req: RequestDeliverTx) -> ResponseDeliverTx {
        let verdict = {
            let conn = self.store.conn();
            checker::validate(&conn, &self.ca, &req.tx)
        };
        if !verdict.code.is_ok() {
            return ResponseDeliverTx {
                code: verdict.code.code(),
                log: verdict.log.or_else(|| Some("Unknown TX".to_string())),
            };
        }
        match verdict.payload {
            TxPayload::Cert(_, pem) => {
                let applied = {
                    let conn = self.store.conn();
                    CertEntity::from_pem(&pem)
                        .and_then(|entity| CertEntity::insert(&conn, &[entity]))
                };
                if let Err(err) = applied {
                    return ResponseDeliverTx {
                        code: ResultCode::Error.code(),
                        log: Some(err.to_string()),
                    };
                }
            }
            TxPayload::Csr(csr, pem) => {
                if self.ca.can_issue(&csr.subject) >= 1 {
                    self.ca.issue(&pem, &csr);
                }
            }
            TxPayload::None => {}
        }
        debug!(code = 0u32, "deliver_tx");
        ResponseDeliverTx { code: ResultCode::Ok.code(), log: None }
    }

    async fn end_block(&self, _req: RequestEndBlock) -> Result<()> {
        Ok(())
    }

    async fn commit(&self, req: RequestCommit) -> Result<ResponseCommit> {
        let block_height = self.block_height.load(Ordering::SeqCst);
        {
            let conn = self.store.conn();
            AppState::append(&conn, block_height, &req.data, Utc::now())?;
        }
        self.store.commit()?;
        self.in_block.store(false, Ordering::SeqCst);
        *self.state.lock().unwrap() = AppState {
            block_height,
            app_hash: req.data.clone(),
        };

        if !self.ca.is_initialized() {
            let conn = self.store.conn();
            match self.ca.initialize(&conn) {
                Ok(Some(subject)) => info!(%subject, "CA initialized on this node"),
                Ok(None) => {}
                Err(err) => debug!(%err, "CA not initialized yet"),
            }
        }
        Ok(ResponseCommit { data: req.data })
    }

    async fn query(&self, req: RequestQuery) -> ResponseQuery {
        let height = self.state.lock().unwrap().block_height;
        match req.path.as_str() {
            "ca/list" => {
                let listed = (|| -> Result<Vec<u8>> {
                    let conn = self.store.conn();
                    let mut items = Vec::new();
                    for record in CertEntity::list_by_role(&conn, "CA", 500, 0)? {
                        let info = inspect_cert(&record.pem)?;
                        items.push(serde_json::json!({
                            "subject": info.subject.to_string(),
                            "path_length": info.path_length,
                            "issuer": info.issuer.to_string(),
                        }));
                    }
                    Ok(serde_json::to_vec(&items)?)
                })();
                match listed {
                    Ok(value) => ResponseQuery { code: ResultCode::Ok.code(), height, value },
                    Err(err) => {
                        warn!(%err, "ca/list query failed");
                        ResponseQuery {
                            code: ResultCode::Error.code(),
                            height,
                            value: Vec::new(),
                        }
                    }
                }
            }
            _ => ResponseQuery {
                code: ResultCode::Error.code(),
                height,
                value: Vec::new(),
            },
        }
    }
}
