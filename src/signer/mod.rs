//! Signer
//!
//! Turns an approved request into signed artifacts. Right before any key is
//! used the exact payload is decoded again, and a drainer verdict from either
//! the carried analysis or the fresh decode aborts the signature.

pub mod evm;
pub mod solana;

use serde::Serialize;
use solana_sdk::signer::Signer;
use std::sync::Arc;
use tracing::{error, info};

use crate::chain::{Chain, WalletId};
use crate::decoder::{batch_drainer, DecodedTransaction, RiskAnalyzer, WalletContext};
use crate::error::{Error, Result};
use crate::evm::checksum_address;
use crate::request::RequestKind;
use crate::vault::VaultManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Transaction,
    Message,
}

/// Output of one signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedArtifact {
    pub chain: Chain,
    pub kind: ArtifactKind,
    /// Signed wire transaction, or the bare signature for messages
    pub raw: Vec<u8>,
    /// Solana: first signature in base58. EVM: transaction hash or 0x signature
    pub signature: String,
}

pub struct TransactionSigner {
    vault: Arc<VaultManager>,
    analyzer: Arc<RiskAnalyzer>,
    wallet: WalletId,
    context: WalletContext,
    evm_chain_id: u64,
}

impl TransactionSigner {
    pub fn new(
        vault: Arc<VaultManager>,
        analyzer: Arc<RiskAnalyzer>,
        wallet: WalletId,
        context: WalletContext,
        evm_chain_id: u64,
    ) -> Self {
        Self {
            vault,
            analyzer,
            wallet,
            context,
            evm_chain_id,
        }
    }

    /// Sign every payload in the request; fails closed on any drainer verdict
    pub async fn sign(
        &self,
        request: &RequestKind,
        decoded: &[DecodedTransaction],
    ) -> Result<Vec<SignedArtifact>> {
        if let Some(drainer) = batch_drainer(decoded) {
            error!("Refusing to sign {}: {}", request.method(), drainer);
            return Err(Error::Blocked(drainer.to_string()));
        }
        if let Some(err) = decoded.iter().find_map(|d| d.blocked_error()) {
            return Err(err);
        }

        let fresh = self
            .analyzer
            .analyze(request, &self.context)
            .map_err(|e| Error::SignFailed(format!("re-decode failed: {}", e)))?;
        if let Some(err) = fresh.iter().find_map(|d| d.blocked_error()) {
            error!("Re-decode of {} found a drainer; not signing", request.method());
            return Err(err);
        }

        let chain = request
            .chain()
            .ok_or_else(|| Error::UnsupportedMethod(request.method().to_string()))?;

        let artifacts = match chain {
            Chain::Solana => self.sign_solana(request).await?,
            Chain::Evm => self.sign_evm(request).await?,
        };

        info!(
            "Signed {} ({} artifact(s)) for {}",
            request.method(),
            artifacts.len(),
            self.wallet
        );
        Ok(artifacts)
    }

    async fn sign_solana(&self, request: &RequestKind) -> Result<Vec<SignedArtifact>> {
        let keypair = self.vault.solana_keypair(self.wallet).await?;
        if keypair.pubkey() != self.context.solana {
            return Err(Error::SignFailed(format!(
                "vault key {} does not match session account {}",
                keypair.pubkey(),
                self.context.solana
            )));
        }

        match request {
            RequestKind::SolanaSignMessage { message, pubkey } => {
                if let Some(requested) = pubkey {
                    if *requested != keypair.pubkey() {
                        return Err(Error::SignFailed(format!(
                            "message requested for {}",
                            requested
                        )));
                    }
                }
                Ok(vec![solana::sign_message(&keypair, message)])
            }
            RequestKind::SolanaSignTransaction(tx) => {
                Ok(vec![solana::sign_transaction(&keypair, &tx.tx)?])
            }
            RequestKind::SolanaSignAndSendTransaction(tx) => {
                Ok(vec![solana::sign_for_broadcast(&keypair, &tx.tx)?])
            }
            RequestKind::SolanaSignAllTransactions(txs) => txs
                .iter()
                .map(|tx| solana::sign_transaction(&keypair, &tx.tx))
                .collect(),
            other => Err(Error::UnsupportedMethod(other.method().to_string())),
        }
    }

    async fn sign_evm(&self, request: &RequestKind) -> Result<Vec<SignedArtifact>> {
        let key = self.vault.evm_key(self.wallet).await?;
        if key.address != self.context.evm {
            return Err(Error::SignFailed(format!(
                "vault key {} does not match session account {}",
                key.checksum_address(),
                checksum_address(&self.context.evm)
            )));
        }

        let artifact = match request {
            RequestKind::PersonalSign { message, .. } | RequestKind::EthSign { message, .. } => {
                evm::sign_personal_message(&key, message)?
            }
            RequestKind::EthSignTypedData { data, .. } => evm::sign_typed_data(&key, data)?,
            RequestKind::EthSignTransaction(tx) | RequestKind::EthSendTransaction(tx) => {
                evm::sign_transaction(&key, tx, self.evm_chain_id)?
            }
            other => return Err(Error::UnsupportedMethod(other.method().to_string())),
        };
        Ok(vec![artifact])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecoderConfig, EvmConfig, VaultConfig};
    use crate::decoder::{DrainerType, PayloadKind};
    use crate::request::SolanaTx;
    use crate::vault::MemorySecureStore;
    use solana_sdk::message::{Message, VersionedMessage};
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::signature::Signature;
    use solana_sdk::system_instruction;
    use solana_sdk::transaction::VersionedTransaction;
    use spl_token::instruction::AuthorityType;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    async fn setup() -> (Arc<VaultManager>, TransactionSigner, WalletContext) {
        let config = VaultConfig {
            vault_id: "signer".to_string(),
            kdf_iterations: 1_000,
            ..VaultConfig::default()
        };
        let vault = Arc::new(VaultManager::new(&config, Arc::new(MemorySecureStore::new())));
        vault.create("pw", PHRASE).await.unwrap();

        let solana = vault.solana_keypair(WalletId(0)).await.unwrap().pubkey();
        let evm = vault.evm_key(WalletId(0)).await.unwrap().address;
        let context = WalletContext { solana, evm };

        let analyzer = Arc::new(RiskAnalyzer::new(
            &DecoderConfig::default(),
            &EvmConfig::default(),
        ));
        let signer = TransactionSigner::new(vault.clone(), analyzer, WalletId(0), context, 1);
        (vault, signer, context)
    }

    fn solana_request(ixs: &[solana_sdk::instruction::Instruction], payer: &Pubkey) -> RequestKind {
        let message = Message::new(ixs, Some(payer));
        let tx = VersionedTransaction {
            signatures: vec![Signature::default(); message.header.num_required_signatures as usize],
            message: VersionedMessage::Legacy(message),
        };
        RequestKind::SolanaSignTransaction(SolanaTx {
            bytes: bincode::serialize(&tx).unwrap(),
            tx,
        })
    }

    #[tokio::test]
    async fn test_signs_clean_transfer() {
        let (_vault, signer, ctx) = setup().await;
        let request = solana_request(
            &[system_instruction::transfer(&ctx.solana, &Pubkey::new_unique(), 5)],
            &ctx.solana,
        );
        let decoded = vec![DecodedTransaction::new(Chain::Solana, PayloadKind::Transaction)];
        let artifacts = signer.sign(&request, &decoded).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, ArtifactKind::Transaction);
    }

    #[tokio::test]
    async fn test_carried_drainer_flag_fails_closed() {
        let (_vault, signer, ctx) = setup().await;
        let request = solana_request(
            &[system_instruction::transfer(&ctx.solana, &Pubkey::new_unique(), 5)],
            &ctx.solana,
        );
        let mut flagged = DecodedTransaction::new(Chain::Solana, PayloadKind::Transaction);
        flagged.flag_drainer(DrainerType::Assign);

        assert!(matches!(
            signer.sign(&request, &[flagged]).await,
            Err(Error::Blocked(_))
        ));
    }

    #[tokio::test]
    async fn test_redecode_catches_tampered_analysis() {
        let (_vault, signer, ctx) = setup().await;
        let ix = spl_token::instruction::set_authority(
            &spl_token::id(),
            &Pubkey::new_unique(),
            Some(&Pubkey::new_unique()),
            AuthorityType::AccountOwner,
            &ctx.solana,
            &[],
        )
        .unwrap();
        let request = solana_request(&[ix], &ctx.solana);

        // A clean verdict that does not match the bytes
        let forged = vec![DecodedTransaction::new(Chain::Solana, PayloadKind::Transaction)];
        assert!(matches!(
            signer.sign(&request, &forged).await,
            Err(Error::Blocked(_))
        ));
    }

    #[tokio::test]
    async fn test_locked_vault_cannot_sign() {
        let (vault, signer, ctx) = setup().await;
        vault.lock().await;
        let request = RequestKind::SolanaSignMessage {
            message: b"hi".to_vec(),
            pubkey: Some(ctx.solana),
        };
        let decoded = vec![DecodedTransaction::new(Chain::Solana, PayloadKind::Message)];
        assert!(matches!(
            signer.sign(&request, &decoded).await,
            Err(Error::VaultLocked)
        ));
    }

    #[tokio::test]
    async fn test_personal_sign() {
        let (_vault, signer, ctx) = setup().await;
        let request = RequestKind::PersonalSign {
            message: b"hello".to_vec(),
            address: ctx.evm,
        };
        let decoded = vec![DecodedTransaction::new(Chain::Evm, PayloadKind::Message)];
        let artifacts = signer.sign(&request, &decoded).await.unwrap();
        assert!(artifacts[0].signature.starts_with("0x"));
        assert_eq!(artifacts[0].signature.len(), 2 + 130);
    }
}
