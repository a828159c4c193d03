//! Transaction decoding and risk analysis
//!
//! Everything here is pure: the same bytes and wallet context always give
//! the same verdict, and nothing touches the network.

pub mod analyzer;
pub mod evm;
pub mod programs;
pub mod solana;
pub mod types;

pub use analyzer::{RiskAnalyzer, WalletContext};
pub use programs::ProgramRegistry;
pub use types::{
    batch_drainer, batch_risk, ApprovalIntent, ApprovalStandard, DecodedInstruction,
    DecodedTransaction, DrainerType, PayloadKind, RiskLevel, RiskWarning,
};
