//! HTTP client calling the chain RPC

use crate::config::RpcConfig;
use crate::error::{DpkiError, Result};

/// Client broadcasting transactions through the consensus engine's RPC
#[derive(Debug, Clone)]
pub struct RpcClient {
    base_url: String,
    client: reqwest::Client,
}

impl RpcClient {
    /// Client for the engine listening at `rpc.laddr`
    pub fn new(rpc: &RpcConfig) -> Self {
        Self {
            base_url: rpc.http_base_url(),
            client: reqwest::Client::new(),
        }
    }

    /// Async-broadcast a transaction; any non-2xx response is a failure
    pub async fn send_tx(&self, tx: &[u8]) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/broadcast_tx_async", self.base_url))
            .form(&[("tx", format!("0x{}", hex::encode(tx)))])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DpkiError::RpcFailure(format!(
                "broadcast_tx_async returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_follows_laddr() {
        let client = RpcClient::new(&RpcConfig {
            laddr: "tcp://10.0.0.7:26657".to_string(),
        });
        assert_eq!(client.base_url, "http://10.0.0.7:26657");
    }
}
