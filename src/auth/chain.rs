//! On-chain reads needed for contract-account signature verification.

use crate::auth::address::Address;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("RPC transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("RPC returned an error: {0}")]
    Rpc(String),

    #[error("Malformed RPC response: {0}")]
    Malformed(String),
}

/// Read-only view of an EVM chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Deployed bytecode at `address` (empty for externally owned accounts).
    async fn get_code(&self, address: &Address) -> Result<Vec<u8>, ChainError>;

    /// `eth_call` against `to` with raw calldata, at the latest block.
    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, ChainError>;
}

/// JSON-RPC client for an Ethereum-compatible node.
#[derive(Clone)]
pub struct JsonRpcChain {
    client: reqwest::Client,
    rpc_url: String,
}

impl JsonRpcChain {
    pub fn new(rpc_url: impl Into<String>) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response: Value = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(ChainError::Rpc(message.to_string()));
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| ChainError::Malformed("missing result".to_string()))
    }
}

/// Decode a `0x`-prefixed hex quantity or data string.
fn decode_hex_result(value: &Value) -> Result<Vec<u8>, ChainError> {
    let s = value
        .as_str()
        .ok_or_else(|| ChainError::Malformed("result is not a string".to_string()))?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| ChainError::Malformed(format!("invalid hex: {}", e)))
}

#[async_trait]
impl ChainReader for JsonRpcChain {
    async fn get_code(&self, address: &Address) -> Result<Vec<u8>, ChainError> {
        let result = self
            .request("eth_getCode", json!([address.normalized(), "latest"]))
            .await?;
        decode_hex_result(&result)
    }

    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, ChainError> {
        let tx = json!({
            "to": to.normalized(),
            "data": format!("0x{}", hex::encode(data)),
        });
        let result = self.request("eth_call", json!([tx, "latest"])).await?;
        decode_hex_result(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hex_result() {
        assert_eq!(
            decode_hex_result(&json!("0x6080")).unwrap(),
            vec![0x60, 0x80]
        );
        assert!(decode_hex_result(&json!("0x")).unwrap().is_empty());
        assert!(matches!(
            decode_hex_result(&json!(12)),
            Err(ChainError::Malformed(_))
        ));
        assert!(matches!(
            decode_hex_result(&json!("0xzz")),
            Err(ChainError::Malformed(_))
        ));
    }

    #[test]
    fn test_client_builds() {
        assert!(JsonRpcChain::new("http://127.0.0.1:8545").is_ok());
    }
}
