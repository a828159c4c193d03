//! Jito block engine as a priority relay
//!
//! Single transactions go through `sendTransaction` on the block engine. The
//! relay is submit-only: confirmation is tracked through the RPC endpoints.

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Error, Result};

use super::endpoint::{classify_send_error, EndpointKind, SendErrorClass, SendOutcome, TxEndpoint, TxStatus};
use super::jsonrpc::{JsonRpcClient, RpcReply};

const TRANSACTIONS_PATH: &str = "/api/v1/transactions";

pub struct JitoRelay {
    name: String,
    rpc: JsonRpcClient,
    retry_base_delay: Duration,
}

impl JitoRelay {
    pub fn new(http: reqwest::Client, block_engine_url: &str, retry_base_delay: Duration) -> Self {
        let url = format!("{}{}", block_engine_url.trim_end_matches('/'), TRANSACTIONS_PATH);
        info!("Jito relay initialized for {}", block_engine_url);
        Self {
            name: "jito".to_string(),
            rpc: JsonRpcClient::new(http, url),
            retry_base_delay,
        }
    }

    async fn send_once(&self, encoded: &str, signature: &str) -> Result<SendOutcome> {
        let params = json!([encoded, { "encoding": "base64" }]);
        match self.rpc.call("sendTransaction", params).await? {
            RpcReply::Result(value) => Ok(SendOutcome::Accepted(
                value.as_str().map(str::to_string).unwrap_or_else(|| signature.to_string()),
            )),
            RpcReply::Error(e) => match classify_send_error(&e.message) {
                SendErrorClass::AlreadyProcessed => Ok(SendOutcome::AlreadyProcessed(signature.to_string())),
                SendErrorClass::Expired => Err(Error::ValidityWindowExpired),
                // Rate limits and auction congestion are worth another attempt
                SendErrorClass::Other if e.code == -32097 || e.message.contains("rate") => {
                    Err(Error::SendFailed(e.message))
                }
                SendErrorClass::Other => Err(Error::Rpc(format!("jito ({}): {}", e.code, e.message))),
            },
        }
    }
}

#[async_trait]
impl TxEndpoint for JitoRelay {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EndpointKind {
        EndpointKind::PriorityRelay
    }

    async fn send(&self, raw: &[u8]) -> Result<SendOutcome> {
        let signature = super::rpc::first_signature(raw)?;
        let encoded = BASE64.encode(raw);

        let backoff = ExponentialBackoff {
            initial_interval: self.retry_base_delay,
            max_interval: self.retry_base_delay * 4,
            max_elapsed_time: Some(Duration::from_millis(500)),
            ..Default::default()
        };

        retry(backoff, || async {
            match self.send_once(&encoded, &signature).await {
                Ok(outcome) => Ok(outcome),
                Err(e @ Error::SendFailed(_)) | Err(e @ Error::RpcTimeout(_)) => {
                    warn!("Retryable Jito error: {}", e);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }

    async fn status(&self, _signature: &str) -> Result<TxStatus> {
        Ok(TxStatus::Unknown)
    }
}
