//! Outbound side of the pairing relay

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

use crate::error::Result;

use super::types::{Session, WireError};

/// Encrypted relay transport; the wallet only ever sends through this seam
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Publish session settlement; Ok means the peer acknowledged
    async fn settle_session(&self, session: &Session) -> Result<()>;

    async fn reject_proposal(&self, proposal_id: u64, error: &WireError) -> Result<()>;

    async fn respond_result(&self, topic: &str, id: u64, result: &Value) -> Result<()>;

    async fn respond_error(&self, topic: &str, id: u64, error: &WireError) -> Result<()>;

    async fn disconnect(&self, topic: &str, error: &WireError) -> Result<()>;
}

/// Message sent through a [`MemoryRelay`]
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Settle { topic: String },
    RejectProposal { id: u64, error: WireError },
    Result { topic: String, id: u64, result: Value },
    Error { topic: String, id: u64, error: WireError },
    Disconnect { topic: String, error: WireError },
}

/// Relay that records outbound messages in order
#[derive(Debug, Default)]
pub struct MemoryRelay {
    sent: Mutex<Vec<RelayMessage>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<RelayMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn push(&self, message: RelayMessage) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message);
        }
    }
}

#[async_trait]
impl RelayTransport for MemoryRelay {
    async fn settle_session(&self, session: &Session) -> Result<()> {
        self.push(RelayMessage::Settle {
            topic: session.topic.clone(),
        });
        Ok(())
    }

    async fn reject_proposal(&self, proposal_id: u64, error: &WireError) -> Result<()> {
        self.push(RelayMessage::RejectProposal {
            id: proposal_id,
            error: error.clone(),
        });
        Ok(())
    }

    async fn respond_result(&self, topic: &str, id: u64, result: &Value) -> Result<()> {
        self.push(RelayMessage::Result {
            topic: topic.to_string(),
            id,
            result: result.clone(),
        });
        Ok(())
    }

    async fn respond_error(&self, topic: &str, id: u64, error: &WireError) -> Result<()> {
        self.push(RelayMessage::Error {
            topic: topic.to_string(),
            id,
            error: error.clone(),
        });
        Ok(())
    }

    async fn disconnect(&self, topic: &str, error: &WireError) -> Result<()> {
        self.push(RelayMessage::Disconnect {
            topic: topic.to_string(),
            error: error.clone(),
        });
        Ok(())
    }
}
