//! Request-level analysis over both chain families

use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};

use crate::chain::{eth_to_wei, sol_to_lamports};
use crate::config::{DecoderConfig, EvmConfig};
use crate::error::{Error, Result};
use crate::evm::{checksum_address, Address, EvmTransaction};
use crate::request::RequestKind;

use super::evm::EvmAnalyzer;
use super::programs::ProgramRegistry;
use super::solana::{parse_transaction_text, SolanaAnalyzer};
use super::types::{batch_risk, DecodedTransaction};

/// Wallet addresses the analysis is relative to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletContext {
    pub solana: Pubkey,
    pub evm: Address,
}

/// Decodes a request into one verdict per payload without touching the network
#[derive(Debug, Clone)]
pub struct RiskAnalyzer {
    solana: SolanaAnalyzer,
    evm: EvmAnalyzer,
}

impl RiskAnalyzer {
    pub fn new(decoder: &DecoderConfig, evm: &EvmConfig) -> Self {
        let registry = ProgramRegistry::new(&decoder.extra_known_programs);
        info!(
            "Risk analyzer ready: {} known programs, large value {} SOL / {} ETH",
            registry.len(),
            decoder.large_value_sol,
            decoder.large_value_eth
        );
        Self {
            solana: SolanaAnalyzer::new(registry, sol_to_lamports(decoder.large_value_sol)),
            evm: EvmAnalyzer::new(eth_to_wei(decoder.large_value_eth), evm.chain_id),
        }
    }

    pub fn solana(&self) -> &SolanaAnalyzer {
        &self.solana
    }

    pub fn evm(&self) -> &EvmAnalyzer {
        &self.evm
    }

    /// One entry per payload; batches keep their order
    pub fn analyze(
        &self,
        request: &RequestKind,
        wallet: &WalletContext,
    ) -> Result<Vec<DecodedTransaction>> {
        let decoded = match request {
            RequestKind::SolanaSignMessage { message, .. } => {
                vec![self.solana.analyze_sign_message(message, &wallet.solana)]
            }
            RequestKind::SolanaSignTransaction(tx)
            | RequestKind::SolanaSignAndSendTransaction(tx) => {
                vec![self.solana.analyze_transaction(&tx.tx, &wallet.solana)?]
            }
            RequestKind::SolanaSignAllTransactions(txs) => txs
                .iter()
                .map(|tx| self.solana.analyze_transaction(&tx.tx, &wallet.solana))
                .collect::<Result<Vec<_>>>()?,
            RequestKind::PersonalSign { message, .. } => {
                vec![self.evm.analyze_personal_message(message)]
            }
            RequestKind::EthSign { message, .. } => vec![self.evm.analyze_eth_sign(message)],
            RequestKind::EthSignTypedData { data, .. } => {
                vec![self.evm.analyze_typed_data(data)?]
            }
            RequestKind::EthSignTransaction(tx) | RequestKind::EthSendTransaction(tx) => {
                vec![self.evm.analyze_transaction(tx)?]
            }
            RequestKind::Unsupported(method) => {
                return Err(Error::UnsupportedMethod(method.clone()))
            }
        };

        if let Some(claimed) = request.evm_account() {
            if claimed != wallet.evm {
                return Err(Error::ValidationFailed(format!(
                    "request is for {} but wallet is {}",
                    checksum_address(&claimed),
                    checksum_address(&wallet.evm)
                )));
            }
        }

        let risk = batch_risk(&decoded);
        if decoded.iter().any(|d| d.is_blocked()) {
            warn!(
                "{} blocked: drainer pattern in {} payload(s)",
                request.method(),
                decoded.iter().filter(|d| d.is_blocked()).count()
            );
        } else {
            info!("{} analyzed, risk {}", request.method(), risk);
        }
        Ok(decoded)
    }

    /// Base64 or base58 Solana transaction text
    pub fn analyze_solana_text(&self, text: &str, wallet: &Pubkey) -> Result<DecodedTransaction> {
        let (_, tx) = parse_transaction_text(text)?;
        self.solana.analyze_transaction(&tx, wallet)
    }

    /// EVM JSON transaction object
    pub fn analyze_evm_json(&self, json: &str) -> Result<DecodedTransaction> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        self.evm.analyze_transaction(&EvmTransaction::from_json(&value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::types::RiskLevel;
    use crate::evm::parse_address;
    use serde_json::json;

    const WALLET: &str = "0x9858EfFD232B4033E47d90003D41EC34EcaEda94";

    fn context() -> WalletContext {
        WalletContext {
            solana: Pubkey::new_unique(),
            evm: parse_address(WALLET).unwrap(),
        }
    }

    fn analyzer() -> RiskAnalyzer {
        RiskAnalyzer::new(&DecoderConfig::default(), &EvmConfig::default())
    }

    #[test]
    fn test_unsupported_method() {
        let err = analyzer()
            .analyze(&RequestKind::Unsupported("eth_foo".into()), &context())
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedMethod(_)));
    }

    #[test]
    fn test_personal_sign_for_other_account_rejected() {
        let request = RequestKind::parse(
            "personal_sign",
            &json!(["hello", "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"]),
        )
        .unwrap();
        assert!(matches!(
            analyzer().analyze(&request, &context()),
            Err(Error::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_personal_sign_is_low() {
        let request = RequestKind::parse("personal_sign", &json!(["hello", WALLET])).unwrap();
        let decoded = analyzer().analyze(&request, &context()).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].risk, RiskLevel::Low);
    }

    #[test]
    fn test_evm_json() {
        let decoded = analyzer()
            .analyze_evm_json(r#"{"to": "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed", "value": "0x1"}"#)
            .unwrap();
        assert_eq!(decoded.risk, RiskLevel::Low);
        assert!(analyzer().analyze_evm_json("not json").is_err());
    }
}
