//! Known Solana programs and their instruction discriminators
//!
//! Programs listed here are attributable: their instructions get labels and
//! Low or instruction-specific risk. Anything else is Medium.
//!
//! # How Anchor discriminators are calculated
//! Anchor uses the first 8 bytes of SHA-256("global:<instruction_name>")
//! as the instruction discriminator.

use std::collections::HashMap;
use std::str::FromStr;

use solana_sdk::pubkey;
use solana_sdk::pubkey::Pubkey;
use tracing::warn;

use crate::config::KnownProgramEntry;

pub const SYSTEM_PROGRAM_ID: Pubkey = pubkey!("11111111111111111111111111111111");
pub const TOKEN_PROGRAM_ID: Pubkey = spl_token::ID;
pub const TOKEN_2022_PROGRAM_ID: Pubkey = pubkey!("TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb");
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey = spl_associated_token_account::ID;
pub const COMPUTE_BUDGET_PROGRAM_ID: Pubkey =
    pubkey!("ComputeBudget111111111111111111111111111111");
pub const MEMO_PROGRAM_ID: Pubkey = pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");
pub const MEMO_V1_PROGRAM_ID: Pubkey = pubkey!("Memo1UhkJRfHyvLMcVucJwxXeuD728EqVDDwQDxFMNo");
pub const BPF_UPGRADEABLE_LOADER_ID: Pubkey =
    pubkey!("BPFLoaderUpgradeab1e11111111111111111111111");
pub const STAKE_PROGRAM_ID: Pubkey = pubkey!("Stake11111111111111111111111111111111111111");

/// Pump.fun bonding curve program
pub const PUMP_PROGRAM_ID: Pubkey = pubkey!("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P");
/// Pump.fun AMM for migrated tokens
pub const PUMP_AMM_PROGRAM_ID: Pubkey = pubkey!("pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA");

/// Jito tip accounts; transfers to these are bundle tips
pub const JITO_TIP_ACCOUNTS: [&str; 8] = [
    "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
    "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
    "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
    "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
    "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
    "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
    "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
    "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
];

/// Pump.fun instruction discriminators
/// Calculated as: SHA-256("global:<instruction_name>")[0..8]
#[allow(non_snake_case)]
pub mod PUMP_DISCRIMINATORS {
    /// SHA-256("global:create")[0..8]
    pub const CREATE: [u8; 8] = [24, 30, 200, 40, 5, 28, 7, 119];

    /// SHA-256("global:buy")[0..8]
    pub const BUY: [u8; 8] = [102, 6, 61, 18, 1, 218, 235, 234];

    /// SHA-256("global:sell")[0..8]
    pub const SELL: [u8; 8] = [51, 230, 133, 164, 1, 127, 131, 173];

    pub const WITHDRAW: [u8; 8] = [183, 18, 70, 156, 148, 109, 161, 34];
}

/// Decoder used for a known program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    System,
    Token,
    Token2022,
    AssociatedToken,
    ComputeBudget,
    Memo,
    BpfUpgradeableLoader,
    Stake,
    PumpFun,
    PumpAmm,
    /// Attributable but not decoded
    Labelled,
}

impl ProgramKind {
    pub fn is_token_program(&self) -> bool {
        matches!(self, ProgramKind::Token | ProgramKind::Token2022)
    }
}

#[derive(Debug, Clone)]
pub struct ProgramInfo {
    pub kind: ProgramKind,
    pub label: String,
}

lazy_static::lazy_static! {
    static ref BUILTIN_PROGRAMS: Vec<(Pubkey, ProgramKind, &'static str)> = vec![
        (SYSTEM_PROGRAM_ID, ProgramKind::System, "System Program"),
        (TOKEN_PROGRAM_ID, ProgramKind::Token, "Token Program"),
        (TOKEN_2022_PROGRAM_ID, ProgramKind::Token2022, "Token-2022 Program"),
        (ASSOCIATED_TOKEN_PROGRAM_ID, ProgramKind::AssociatedToken, "Associated Token Account"),
        (COMPUTE_BUDGET_PROGRAM_ID, ProgramKind::ComputeBudget, "Compute Budget"),
        (MEMO_PROGRAM_ID, ProgramKind::Memo, "Memo"),
        (MEMO_V1_PROGRAM_ID, ProgramKind::Memo, "Memo (v1)"),
        (BPF_UPGRADEABLE_LOADER_ID, ProgramKind::BpfUpgradeableLoader, "BPF Upgradeable Loader"),
        (STAKE_PROGRAM_ID, ProgramKind::Stake, "Stake Program"),
        (PUMP_PROGRAM_ID, ProgramKind::PumpFun, "pump.fun"),
        (PUMP_AMM_PROGRAM_ID, ProgramKind::PumpAmm, "pump.fun AMM"),
        (pubkey!("JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUJoi5QNyVTaV4"), ProgramKind::Labelled, "Jupiter Aggregator v6"),
        (pubkey!("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8"), ProgramKind::Labelled, "Raydium AMM v4"),
        (pubkey!("CPMMoo8L3F4NbTegBCKVNunggL7H1ZpdTHKxQB5qKP1C"), ProgramKind::Labelled, "Raydium CPMM"),
        (pubkey!("CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK"), ProgramKind::Labelled, "Raydium CLMM"),
        (pubkey!("whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc"), ProgramKind::Labelled, "Orca Whirlpool"),
    ];

    static ref JITO_TIPS: Vec<Pubkey> = JITO_TIP_ACCOUNTS
        .iter()
        .filter_map(|s| Pubkey::from_str(s).ok())
        .collect();
}

/// Known-program allowlist
#[derive(Debug, Clone)]
pub struct ProgramRegistry {
    programs: HashMap<Pubkey, ProgramInfo>,
}

impl Default for ProgramRegistry {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl ProgramRegistry {
    /// Built-in programs plus configured extras
    pub fn new(extra: &[KnownProgramEntry]) -> Self {
        let mut programs: HashMap<Pubkey, ProgramInfo> = BUILTIN_PROGRAMS
            .iter()
            .map(|(id, kind, label)| {
                (
                    *id,
                    ProgramInfo {
                        kind: *kind,
                        label: label.to_string(),
                    },
                )
            })
            .collect();

        for entry in extra {
            match Pubkey::from_str(&entry.id) {
                Ok(id) => {
                    programs.entry(id).or_insert(ProgramInfo {
                        kind: ProgramKind::Labelled,
                        label: entry.label.clone(),
                    });
                }
                Err(e) => warn!("Ignoring known program {}: {}", entry.id, e),
            }
        }

        Self { programs }
    }

    pub fn lookup(&self, program_id: &Pubkey) -> Option<&ProgramInfo> {
        self.programs.get(program_id)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

pub fn is_jito_tip_account(account: &Pubkey) -> bool {
    JITO_TIPS.contains(account)
}

/// Pump.fun instruction types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpInstructionType {
    Create,
    Buy,
    Sell,
    Withdraw,
}

impl std::fmt::Display for PumpInstructionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PumpInstructionType::Create => write!(f, "create"),
            PumpInstructionType::Buy => write!(f, "buy"),
            PumpInstructionType::Sell => write!(f, "sell"),
            PumpInstructionType::Withdraw => write!(f, "withdraw"),
        }
    }
}

/// Match the leading 8 bytes of pump.fun instruction data
pub fn match_pump_discriminator(data: &[u8]) -> Option<PumpInstructionType> {
    if data.len() < 8 {
        return None;
    }

    let discriminator: [u8; 8] = data[..8].try_into().ok()?;

    match discriminator {
        PUMP_DISCRIMINATORS::CREATE => Some(PumpInstructionType::Create),
        PUMP_DISCRIMINATORS::BUY => Some(PumpInstructionType::Buy),
        PUMP_DISCRIMINATORS::SELL => Some(PumpInstructionType::Sell),
        PUMP_DISCRIMINATORS::WITHDRAW => Some(PumpInstructionType::Withdraw),
        _ => None,
    }
}

/// Anchor discriminator: SHA-256("global:<name>")[0..8]
pub fn calculate_discriminator(name: &str) -> [u8; 8] {
    use sha2::{Digest, Sha256};

    let preimage = format!("global:{}", name);
    let hash = Sha256::digest(preimage.as_bytes());

    let mut discriminator = [0u8; 8];
    discriminator.copy_from_slice(&hash[..8]);
    discriminator
}
