//! Minimal JSON-RPC 2.0 client over HTTP

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

/// Error object returned by the node
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// Outcome of a call that reached the node
pub enum RpcReply {
    Result(Value),
    Error(JsonRpcError),
}

#[derive(Clone)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    next_id: Arc<AtomicU64>,
}

impl JsonRpcClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Transport failures are `Err`; node-side errors come back as `RpcReply::Error`
    pub async fn call(&self, method: &str, params: Value) -> Result<RpcReply> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            method,
            params,
        };

        let response = self.http.post(&self.url).json(&request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let parsed: JsonRpcResponse = serde_json::from_str(&body).map_err(|e| {
            Error::Rpc(format!("{} returned {} with unreadable body: {}", method, status, e))
        })?;

        match (parsed.result, parsed.error) {
            (_, Some(error)) => Ok(RpcReply::Error(error)),
            (Some(result), None) => Ok(RpcReply::Result(result)),
            (None, None) => Ok(RpcReply::Result(Value::Null)),
        }
    }

    /// Like `call`, with node errors turned into `Error::Rpc`
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        match self.call(method, params).await? {
            RpcReply::Result(value) => Ok(value),
            RpcReply::Error(e) => Err(Error::Rpc(format!("{} ({}): {}", method, e.code, e.message))),
        }
    }
}

/// Parse a 0x-prefixed hex quantity
pub fn parse_quantity(value: &Value) -> Result<u128> {
    let s = value
        .as_str()
        .ok_or_else(|| Error::Deserialization(format!("expected hex quantity, got {}", value)))?;
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| Error::Deserialization(format!("quantity without 0x: {}", s)))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| Error::Deserialization(format!("bad quantity {}: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&json!("0x5208")).unwrap(), 21_000);
        assert_eq!(parse_quantity(&json!("0x")).unwrap(), 0);
        assert!(parse_quantity(&json!("5208")).is_err());
        assert!(parse_quantity(&json!(12)).is_err());
    }

    #[test]
    fn test_response_shapes() {
        let ok: JsonRpcResponse = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":"0xab"}"#).unwrap();
        assert_eq!(ok.result, Some(json!("0xab")));
        let err: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"nonce too low"}}"#,
        )
        .unwrap();
        assert_eq!(err.error.unwrap().message, "nonce too low");
    }
}
