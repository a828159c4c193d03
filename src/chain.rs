//! Chain families and unit helpers shared across the pipeline

use serde::{Deserialize, Serialize};

/// Supported chain families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    /// Account/instruction model
    Solana,
    /// Account/contract-call model
    Evm,
}

impl Chain {
    /// Pairing-protocol namespace for this chain family
    pub fn namespace(&self) -> &'static str {
        match self {
            Chain::Solana => "solana",
            Chain::Evm => "eip155",
        }
    }

    pub fn from_namespace(namespace: &str) -> Option<Self> {
        match namespace {
            "solana" => Some(Chain::Solana),
            "eip155" => Some(Chain::Evm),
            _ => None,
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Chain::Solana => write!(f, "solana"),
            Chain::Evm => write!(f, "evm"),
        }
    }
}

/// Account index inside the vault seed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct WalletId(pub u32);

impl std::fmt::Display for WalletId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "account#{}", self.0)
    }
}

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
pub const WEI_PER_ETH: u128 = 1_000_000_000_000_000_000;

/// Convert SOL to lamports
pub fn sol_to_lamports(sol: f64) -> u64 {
    (sol * LAMPORTS_PER_SOL as f64) as u64
}

/// Convert lamports to SOL
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Convert ETH to wei
pub fn eth_to_wei(eth: f64) -> u128 {
    (eth * WEI_PER_ETH as f64) as u128
}

/// Convert wei to ETH (lossy, display only)
pub fn wei_to_eth(wei: u128) -> f64 {
    wei as f64 / WEI_PER_ETH as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sol_lamports_conversion() {
        assert_eq!(sol_to_lamports(1.0), 1_000_000_000);
        assert_eq!(sol_to_lamports(0.5), 500_000_000);
        assert_eq!(lamports_to_sol(1_000_000), 0.001);
    }

    #[test]
    fn test_eth_wei_conversion() {
        assert_eq!(eth_to_wei(1.0), WEI_PER_ETH);
        assert_eq!(eth_to_wei(0.25), WEI_PER_ETH / 4);
        assert_eq!(wei_to_eth(WEI_PER_ETH * 3), 3.0);
    }

    #[test]
    fn test_namespace_roundtrip() {
        assert_eq!(Chain::from_namespace(Chain::Evm.namespace()), Some(Chain::Evm));
        assert_eq!(Chain::from_namespace("cosmos"), None);
    }
}
