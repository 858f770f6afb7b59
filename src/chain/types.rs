//! The consensus-host boundary
//!
//! The BFT engine drives the application through these callbacks; the
//! structs mirror the engine's wire messages at the granularity this
//! application consumes.

use async_trait::async_trait;

use crate::error::Result;

/// Result codes returned to the consensus host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// Accepted
    Ok,
    /// Fatal rejection
    Error,
    /// A valid certificate for the subject and key already exists
    /// (non-fatal dedupe advisory)
    AlreadyExists,
}

impl ResultCode {
    /// Numeric code on the wire
    pub fn code(&self) -> u32 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::Error => 1,
            ResultCode::AlreadyExists => 100,
        }
    }

    /// True for `Ok`
    pub fn is_ok(&self) -> bool {
        matches!(self, ResultCode::Ok)
    }
}

/// Transaction check request
#[derive(Debug, Clone)]
pub struct RequestCheckTx {
    /// Raw transaction bytes
    pub tx: Vec<u8>,
}

/// Transaction check response
#[derive(Debug, Clone)]
pub struct ResponseCheckTx {
    /// Result code (`0` accepted)
    pub code: u32,
    /// Human-readable rejection reason
    pub log: Option<String>,
}

/// Block open notification
#[derive(Debug, Clone)]
pub struct RequestBeginBlock {
    /// Height of the block being applied
    pub height: i64,
}

/// In-block transaction delivery
#[derive(Debug, Clone)]
pub struct RequestDeliverTx {
    /// Raw transaction bytes
    pub tx: Vec<u8>,
}

/// In-block transaction response
#[derive(Debug, Clone)]
pub struct ResponseDeliverTx {
    /// Result code (`0` applied)
    pub code: u32,
    /// Human-readable rejection reason
    pub log: Option<String>,
}

/// Block close notification
#[derive(Debug, Clone)]
pub struct RequestEndBlock {
    /// Height of the block being applied
    pub height: i64,
}

/// Commit request; the engine supplies the state digest for the block
#[derive(Debug, Clone)]
pub struct RequestCommit {
    /// Engine-computed `app_hash` of the applied state
    pub data: Vec<u8>,
}

/// Commit response
#[derive(Debug, Clone)]
pub struct ResponseCommit {
    /// `app_hash` persisted at this height
    pub data: Vec<u8>,
}

/// State query
#[derive(Debug, Clone)]
pub struct RequestQuery {
    /// Query path, e.g. `ca/list`
    pub path: String,
    /// Path-specific argument bytes
    pub data: Vec<u8>,
}

/// State query response
#[derive(Debug, Clone)]
pub struct ResponseQuery {
    /// Result code (`0` answered)
    pub code: u32,
    /// Height the answer reflects
    pub height: i64,
    /// Path-specific answer bytes
    pub value: Vec<u8>,
}

/// Callbacks the application implements for the consensus host
#[async_trait]
pub trait ChainApp {
    /// Last committed `(height, app_hash)`, queried once at boot
    async fn initial_app_state(&self) -> Result<(i64, Vec<u8>)>;

    /// Seed the store from genesis state; returns the initial `app_hash`.
    /// Failure is fatal for the node.
    async fn load_genesis(&self, genesis_data: &[u8]) -> Result<Vec<u8>>;

    /// Validate a transaction against committed state
    async fn check_tx(&self, req: RequestCheckTx) -> ResponseCheckTx;

    /// Open the block transaction
    async fn begin_block(&self, req: RequestBeginBlock) -> Result<()>;

    /// Apply a transaction inside the current block
    async fn deliver_tx(&self, req: RequestDeliverTx) -> ResponseDeliverTx;

    /// Close the block
    async fn end_block(&self, req: RequestEndBlock) -> Result<()>;

    /// Persist the block and return its `app_hash`
    async fn commit(&self, req: RequestCommit) -> Result<ResponseCommit>;

    /// Read committed state
    async fn query(&self, req: RequestQuery) -> ResponseQuery;
}
