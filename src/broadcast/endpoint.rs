//! Submit/status endpoint abstraction

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::error::{Error, Result};

/// Role an endpoint plays in a fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Low-latency relay, submit only
    PriorityRelay,
    Primary,
    Fallback,
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointKind::PriorityRelay => write!(f, "priority-relay"),
            EndpointKind::Primary => write!(f, "primary"),
            EndpointKind::Fallback => write!(f, "fallback"),
        }
    }
}

/// Successful send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted(String),
    /// The transaction already landed; counts as acceptance
    AlreadyProcessed(String),
}

impl SendOutcome {
    pub fn signature(&self) -> &str {
        match self {
            SendOutcome::Accepted(s) | SendOutcome::AlreadyProcessed(s) => s,
        }
    }
}

/// Chain view of a signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Unknown,
    Processed,
    Confirmed,
    Finalized,
    Failed(String),
}

impl TxStatus {
    fn rank(&self) -> u8 {
        match self {
            TxStatus::Unknown => 0,
            TxStatus::Processed => 1,
            TxStatus::Confirmed => 2,
            TxStatus::Finalized => 3,
            TxStatus::Failed(_) => 4,
        }
    }

    /// Most advanced of two observations; a failure outranks everything
    pub fn merge(self, other: TxStatus) -> TxStatus {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

/// One place a signed transaction can be sent
#[async_trait]
pub trait TxEndpoint: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> EndpointKind;

    /// Whether `status` is meaningful for this endpoint
    fn supports_status(&self) -> bool {
        self.kind() != EndpointKind::PriorityRelay
    }

    /// Submit raw signed bytes; `ValidityWindowExpired` when the chain will never accept them
    async fn send(&self, raw: &[u8]) -> Result<SendOutcome>;

    async fn status(&self, signature: &str) -> Result<TxStatus>;
}

/// How an endpoint error message should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorClass {
    AlreadyProcessed,
    Expired,
    Other,
}

/// Classify endpoint error text from either chain family
pub fn classify_send_error(message: &str) -> SendErrorClass {
    let lower = message.to_ascii_lowercase();
    if lower.contains("alreadyprocessed")
        || lower.contains("already been processed")
        || lower.contains("already known")
    {
        SendErrorClass::AlreadyProcessed
    } else if lower.contains("blockhashnotfound")
        || lower.contains("blockhash not found")
        || lower.contains("block height exceeded")
        || lower.contains("nonce too low")
    {
        SendErrorClass::Expired
    } else {
        SendErrorClass::Other
    }
}

/// `send` bounded by a timeout
pub async fn timed_send(
    endpoint: &dyn TxEndpoint,
    raw: &[u8],
    timeout: Duration,
) -> Result<SendOutcome> {
    match tokio::time::timeout(timeout, endpoint.send(raw)).await {
        Ok(result) => result,
        Err(_) => Err(Error::RpcTimeout(timeout.as_millis() as u64)),
    }
}

/// `status` bounded by a timeout
pub async fn timed_status(
    endpoint: &dyn TxEndpoint,
    signature: &str,
    timeout: Duration,
) -> Result<TxStatus> {
    match tokio::time::timeout(timeout, endpoint.status(signature)).await {
        Ok(result) => result,
        Err(_) => Err(Error::RpcTimeout(timeout.as_millis() as u64)),
    }
}
