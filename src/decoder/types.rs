//! Decoded transaction and risk types

use serde::Serialize;

use crate::chain::Chain;
use crate::error::Error;
use crate::evm::Word;

/// Risk verdict, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Simple transfer of a known shape
    Low,
    /// Unknown program or contract, no ownership change
    Medium,
    /// Unlimited approval or large value
    High,
    /// Ownership or authority hijack
    Blocked,
}

impl RiskLevel {
    /// Max severity over a set; empty sets are Low
    pub fn max_of<I: IntoIterator<Item = RiskLevel>>(levels: I) -> RiskLevel {
        levels.into_iter().max().unwrap_or(RiskLevel::Low)
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Blocked => write!(f, "blocked"),
        }
    }
}

/// Drainer pattern that forces a hard block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainerType {
    SetAuthority,
    Assign,
}

impl std::fmt::Display for DrainerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrainerType::SetAuthority => write!(f, "authority reassignment"),
            DrainerType::Assign => write!(f, "account owner reassignment"),
        }
    }
}

/// Non-blocking findings shown next to the verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskWarning {
    UnknownProgram { program_id: String },
    UnknownContract { address: String },
    UnlimitedApproval { spender: String },
    UnlimitedDelegation { delegate: String },
    LargeValue { amount: String },
    UnresolvedAccounts { count: usize },
    ChainMismatch { expected: u64, found: u64 },
    BlindHashSignature,
    AuthorityChange { description: String },
}

impl RiskWarning {
    /// Caller-facing error for warnings that map onto the taxonomy
    pub fn as_error(&self) -> Option<Error> {
        match self {
            RiskWarning::UnknownProgram { program_id } => {
                Some(Error::UnknownProgramWarning(program_id.clone()))
            }
            RiskWarning::UnknownContract { address } => {
                Some(Error::UnknownProgramWarning(address.clone()))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskWarning::UnknownProgram { program_id } => {
                write!(f, "unknown program {}", program_id)
            }
            RiskWarning::UnknownContract { address } => {
                write!(f, "unverified contract {}", address)
            }
            RiskWarning::UnlimitedApproval { spender } => {
                write!(f, "unlimited approval to {}", spender)
            }
            RiskWarning::UnlimitedDelegation { delegate } => {
                write!(f, "unlimited token delegation to {}", delegate)
            }
            RiskWarning::LargeValue { amount } => write!(f, "large value: {}", amount),
            RiskWarning::UnresolvedAccounts { count } => {
                write!(f, "{} accounts loaded from lookup tables", count)
            }
            RiskWarning::ChainMismatch { expected, found } => {
                write!(f, "signature for chain {} while connected to {}", found, expected)
            }
            RiskWarning::BlindHashSignature => write!(f, "signing an opaque hash"),
            RiskWarning::AuthorityChange { description } => write!(f, "{}", description),
        }
    }
}

/// Where an approval intent came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStandard {
    Erc20Approve,
    Erc20IncreaseAllowance,
    SetApprovalForAll,
    Permit,
    /// DAI-style `allowed` flag; no amount to lower
    DaiPermit,
    Permit2,
}

impl ApprovalStandard {
    /// Whether the approval can be re-encoded with a finite amount
    pub fn supports_cap(&self) -> bool {
        matches!(
            self,
            ApprovalStandard::Erc20Approve
                | ApprovalStandard::Erc20IncreaseAllowance
                | ApprovalStandard::Permit
                | ApprovalStandard::Permit2
        )
    }
}

/// Token allowance grant extracted from a call or signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalIntent {
    /// Token contract, checksummed
    pub token: String,
    /// Grantee, checksummed
    pub spender: String,
    pub amount: Word,
    pub is_unlimited: bool,
    pub standard: ApprovalStandard,
    /// Declared bit width of the amount field
    pub amount_bits: u16,
}

impl ApprovalIntent {
    pub fn new(
        token: String,
        spender: String,
        amount: Word,
        standard: ApprovalStandard,
        amount_bits: u16,
    ) -> Self {
        let is_unlimited = amount >= Word::max_for_bits(amount_bits);
        Self {
            token,
            spender,
            amount,
            is_unlimited,
            standard,
            amount_bits,
        }
    }
}

/// What kind of payload was decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Transaction,
    Message,
    TypedData,
}

/// One normalized instruction or call
#[derive(Debug, Clone, Serialize)]
pub struct DecodedInstruction {
    /// Program id or contract address
    pub program_id: String,
    pub program_label: Option<String>,
    /// Short machine name, e.g. `transfer`, `set_authority`
    pub name: String,
    /// Human readable summary
    pub summary: String,
    pub accounts: Vec<String>,
    pub risk: RiskLevel,
}

/// Analyzer output for one payload; immutable once produced
#[derive(Debug, Clone, Serialize)]
pub struct DecodedTransaction {
    pub chain: Chain,
    pub kind: PayloadKind,
    pub instructions: Vec<DecodedInstruction>,
    /// Distinct program ids or contract addresses touched
    pub program_ids: Vec<String>,
    pub risk: RiskLevel,
    pub drainer: Option<DrainerType>,
    pub warnings: Vec<RiskWarning>,
    pub approvals: Vec<ApprovalIntent>,
    /// Message text for sign-message payloads
    pub display_text: Option<String>,
}

impl DecodedTransaction {
    pub fn new(chain: Chain, kind: PayloadKind) -> Self {
        Self {
            chain,
            kind,
            instructions: Vec::new(),
            program_ids: Vec::new(),
            risk: RiskLevel::Low,
            drainer: None,
            warnings: Vec::new(),
            approvals: Vec::new(),
            display_text: None,
        }
    }

    pub fn push_instruction(&mut self, ix: DecodedInstruction) {
        if !self.program_ids.contains(&ix.program_id) {
            self.program_ids.push(ix.program_id.clone());
        }
        self.raise(ix.risk);
        self.instructions.push(ix);
    }

    pub fn raise(&mut self, level: RiskLevel) {
        self.risk = self.risk.max(level);
    }

    pub fn flag_drainer(&mut self, drainer: DrainerType) {
        if self.drainer.is_none() {
            self.drainer = Some(drainer);
        }
        self.risk = RiskLevel::Blocked;
    }

    pub fn warn(&mut self, warning: RiskWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.drainer.is_some() || self.risk == RiskLevel::Blocked
    }

    /// Terminal error for a blocked payload
    pub fn blocked_error(&self) -> Option<Error> {
        if !self.is_blocked() {
            return None;
        }
        let reason = self
            .drainer
            .map(|d| d.to_string())
            .unwrap_or_else(|| "blocked instruction".to_string());
        Some(Error::Blocked(reason))
    }
}

/// Risk of a batch is the worst element
pub fn batch_risk(items: &[DecodedTransaction]) -> RiskLevel {
    RiskLevel::max_of(items.iter().map(|t| t.risk))
}

/// First drainer flag in a batch, if any
pub fn batch_drainer(items: &[DecodedTransaction]) -> Option<DrainerType> {
    items.iter().find_map(|t| t.drainer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High < RiskLevel::Blocked);
        assert_eq!(
            RiskLevel::max_of([RiskLevel::Medium, RiskLevel::Low, RiskLevel::High]),
            RiskLevel::High
        );
        assert_eq!(RiskLevel::max_of([]), RiskLevel::Low);
    }

    #[test]
    fn test_one_blocked_element_blocks_batch() {
        let low = DecodedTransaction::new(Chain::Solana, PayloadKind::Transaction);
        let mut blocked = DecodedTransaction::new(Chain::Solana, PayloadKind::Transaction);
        blocked.flag_drainer(DrainerType::SetAuthority);

        let batch = vec![low.clone(), blocked, low];
        assert_eq!(batch_risk(&batch), RiskLevel::Blocked);
        assert_eq!(batch_drainer(&batch), Some(DrainerType::SetAuthority));
    }

    #[test]
    fn test_unlimited_follows_bit_width() {
        let max160 = Word::max_for_bits(160);
        let permit2 = ApprovalIntent::new(
            "0x0".to_string(),
            "0x1".to_string(),
            max160,
            ApprovalStandard::Permit2,
            160,
        );
        assert!(permit2.is_unlimited);

        let erc20 = ApprovalIntent::new(
            "0x0".to_string(),
            "0x1".to_string(),
            max160,
            ApprovalStandard::Erc20Approve,
            256,
        );
        assert!(!erc20.is_unlimited);
    }

    #[test]
    fn test_blocked_error() {
        let mut tx = DecodedTransaction::new(Chain::Solana, PayloadKind::Transaction);
        assert!(tx.blocked_error().is_none());
        tx.flag_drainer(DrainerType::Assign);
        assert!(matches!(tx.blocked_error(), Some(Error::Blocked(_))));
    }
}
