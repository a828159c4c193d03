//! Remote pairing sessions and inbound request serialization

pub mod handler;
pub mod relay;
pub mod store;
pub mod types;

pub use handler::{SessionHandler, SweepReport};
pub use relay::{MemoryRelay, RelayMessage, RelayTransport};
pub use store::{MemorySessionStore, SessionStore};
pub use types::{
    Namespace, Namespaces, PeerMetadata, Proposal, RequestKey, RequestStatus, Session, SessionRequest,
    SessionState, WireError,
};
