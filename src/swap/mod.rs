//! In-app swap source
//!
//! Fetches unsigned swap transactions; the caller feeds them to the signing
//! pipeline as `solana_signAndSendTransaction` requests.

pub mod migration;
pub mod pumpportal;

pub use migration::{MigrationMatcher, MigrationSignal};
pub use pumpportal::{PoolType, PumpPortalSource, SwapOrder, TradeAction};

use crate::request::{RequestKind, SolanaTx};

/// Wrap a fetched swap transaction as a sign-and-send request
pub fn into_request(tx: SolanaTx) -> RequestKind {
    RequestKind::SolanaSignAndSendTransaction(tx)
}
