//! Wallet Guard Library
//!
//! Non-custodial wallet core: encrypted seed vault, remote session handling,
//! transaction decoding with drainer detection, approval policy, signing and
//! multi-endpoint broadcast.

pub mod broadcast;
pub mod chain;
pub mod cli;
pub mod config;
pub mod decoder;
pub mod error;
pub mod evm;
pub mod pipeline;
pub mod policy;
pub mod request;
pub mod session;
pub mod signer;
pub mod swap;
pub mod vault;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{Consent, Review, SigningPipeline};
