//! Session, proposal and request records plus wire error codes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::chain::Chain;
use crate::decoder::DecodedTransaction;
use crate::error::Error;
use crate::request::RequestKind;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Proposed,
    /// Approved locally, settlement not yet acknowledged
    Approved,
    Active,
    Disconnected,
}

/// Request lifecycle; every request leaves Pending exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Superseded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

/// Chains, methods and accounts granted for one namespace (`solana`, `eip155`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// CAIP-2 chain ids, e.g. `eip155:1`
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
    /// CAIP-10 account ids, only present once approved
    #[serde(default)]
    pub accounts: Vec<String>,
}

pub type Namespaces = BTreeMap<String, Namespace>;

/// Pairing proposal from a remote application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u64,
    pub pairing_topic: String,
    pub proposer: PeerMetadata,
    pub required_namespaces: Namespaces,
    #[serde(default)]
    pub optional_namespaces: Namespaces,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub topic: String,
    pub pairing_topic: String,
    pub state: SessionState,
    pub namespaces: Namespaces,
    pub peer: PeerMetadata,
    pub expiry: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    /// Whether the negotiated namespace covers this chain and method
    pub fn allows(&self, chain: Chain, chain_id: Option<&str>, method: &str) -> Result<(), WireError> {
        let Some(ns) = self.namespaces.get(chain.namespace()) else {
            return Err(WireError::unsupported_chain(chain.namespace()));
        };
        if let Some(id) = chain_id {
            if !ns.chains.iter().any(|c| c == id) {
                return Err(WireError::unsupported_chain(id));
            }
        }
        if !ns.methods.iter().any(|m| m == method) {
            return Err(WireError::unsupported_method(method));
        }
        Ok(())
    }
}

/// JSON-RPC ids are only unique within one session topic
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    pub topic: String,
    pub id: u64,
}

impl RequestKey {
    pub fn new(topic: impl Into<String>, id: u64) -> Self {
        Self {
            topic: topic.into(),
            id,
        }
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short = self.topic.get(..8).unwrap_or(&self.topic);
        write!(f, "{}#{}", short, self.id)
    }
}

/// Inbound request and its resolution
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub id: u64,
    pub topic: String,
    pub method: String,
    pub params: Value,
    /// CAIP-2 chain the request targets
    pub chain_id: Option<String>,
    pub kind: RequestKind,
    pub analysis: Option<Vec<DecodedTransaction>>,
    pub status: RequestStatus,
    pub received_at: DateTime<Utc>,
}

impl SessionRequest {
    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.topic.clone(), self.id)
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

/// Pairing-protocol error payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: i64,
    pub message: String,
}

impl WireError {
    pub const USER_REJECTED: i64 = 5000;
    pub const UNSUPPORTED_CHAINS: i64 = 5100;
    pub const UNSUPPORTED_METHODS: i64 = 5101;
    pub const USER_DISCONNECTED: i64 = 6000;
    pub const SESSION_EXPIRED: i64 = 7001;
    pub const REQUEST_EXPIRED: i64 = 8000;
    pub const INVALID_PARAMS: i64 = -32602;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(Self::USER_REJECTED, "User rejected")
    }

    pub fn superseded() -> Self {
        Self::new(Self::USER_REJECTED, "superseded")
    }

    pub fn unsupported_chain(chain: &str) -> Self {
        Self::new(Self::UNSUPPORTED_CHAINS, format!("Unsupported chain {}", chain))
    }

    pub fn unsupported_method(method: &str) -> Self {
        Self::new(Self::UNSUPPORTED_METHODS, format!("Unsupported method {}", method))
    }

    pub fn user_disconnected() -> Self {
        Self::new(Self::USER_DISCONNECTED, "User disconnected")
    }

    pub fn session_expired() -> Self {
        Self::new(Self::SESSION_EXPIRED, "Session expired")
    }

    pub fn request_expired() -> Self {
        Self::new(Self::REQUEST_EXPIRED, "Request expired")
    }

    /// Wire form of an internal failure
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::UnsupportedMethod(m) => Self::unsupported_method(m),
            Error::UnsupportedChain(c) => Self::unsupported_chain(c),
            Error::ValidationFailed(msg) => Self::new(Self::INVALID_PARAMS, msg.clone()),
            Error::SessionExpired(_) => Self::session_expired(),
            Error::Superseded(_) => Self::superseded(),
            _ => Self::new(Self::USER_REJECTED, err.to_string()),
        }
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}
