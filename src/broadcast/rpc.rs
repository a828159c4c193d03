//! Solana JSON-RPC endpoint

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{TransactionError, VersionedTransaction};
use solana_transaction_status::{TransactionConfirmationStatus, UiTransactionEncoding};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

use super::endpoint::{classify_send_error, EndpointKind, SendErrorClass, SendOutcome, TxEndpoint, TxStatus};

/// First signature of a wire transaction, base58
pub fn first_signature(raw: &[u8]) -> Result<String> {
    let tx: VersionedTransaction = bincode::deserialize(raw)
        .map_err(|e| Error::TransactionDecode(format!("signed transaction: {}", e)))?;
    tx.signatures
        .first()
        .map(|s| s.to_string())
        .ok_or_else(|| Error::TransactionDecode("transaction has no signatures".to_string()))
}

pub struct SolanaRpcEndpoint {
    name: String,
    kind: EndpointKind,
    client: RpcClient,
}

impl SolanaRpcEndpoint {
    pub fn new(name: impl Into<String>, url: &str, kind: EndpointKind, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            kind,
            client: RpcClient::new_with_timeout_and_commitment(
                url.to_string(),
                timeout,
                CommitmentConfig::confirmed(),
            ),
        }
    }
}

#[async_trait]
impl TxEndpoint for SolanaRpcEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EndpointKind {
        self.kind
    }

    async fn send(&self, raw: &[u8]) -> Result<SendOutcome> {
        let tx: VersionedTransaction = bincode::deserialize(raw)
            .map_err(|e| Error::TransactionDecode(format!("signed transaction: {}", e)))?;
        let signature = tx
            .signatures
            .first()
            .copied()
            .ok_or_else(|| Error::TransactionDecode("transaction has no signatures".to_string()))?;

        // The engine does its own rebroadcasting
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            preflight_commitment: Some(CommitmentLevel::Processed),
            encoding: Some(UiTransactionEncoding::Base64),
            max_retries: Some(0),
            min_context_slot: None,
        };

        match self.client.send_transaction_with_config(&tx, config).await {
            Ok(sig) => Ok(SendOutcome::Accepted(sig.to_string())),
            Err(e) => match e.get_transaction_error() {
                Some(TransactionError::AlreadyProcessed) => {
                    Ok(SendOutcome::AlreadyProcessed(signature.to_string()))
                }
                Some(TransactionError::BlockhashNotFound) => Err(Error::ValidityWindowExpired),
                _ => match classify_send_error(&e.to_string()) {
                    SendErrorClass::AlreadyProcessed => {
                        Ok(SendOutcome::AlreadyProcessed(signature.to_string()))
                    }
                    SendErrorClass::Expired => Err(Error::ValidityWindowExpired),
                    SendErrorClass::Other => {
                        debug!("{} send error: {}", self.name, e);
                        Err(Error::SendFailed(e.to_string()))
                    }
                },
            },
        }
    }

    async fn status(&self, signature: &str) -> Result<TxStatus> {
        let sig: Signature = signature
            .parse()
            .map_err(|e| Error::ValidationFailed(format!("bad signature {}: {}", signature, e)))?;

        let response = self.client.get_signature_statuses(&[sig]).await?;
        let status = match response.value.into_iter().next().flatten() {
            None => return Ok(TxStatus::Unknown),
            Some(status) => status,
        };

        if let Some(err) = status.err {
            return Ok(TxStatus::Failed(err.to_string()));
        }

        Ok(match status.confirmation_status {
            Some(TransactionConfirmationStatus::Finalized) => TxStatus::Finalized,
            Some(TransactionConfirmationStatus::Confirmed) => TxStatus::Confirmed,
            Some(TransactionConfirmationStatus::Processed) | None => TxStatus::Processed,
        })
    }
}
