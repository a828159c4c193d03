//! EVM JSON-RPC endpoint and transaction field filling

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::evm::{checksum_address, keccak256, Address, EvmTransaction};

use super::endpoint::{classify_send_error, EndpointKind, SendErrorClass, SendOutcome, TxEndpoint, TxStatus};
use super::jsonrpc::{parse_quantity, JsonRpcClient, RpcReply};

/// Used when the node has no `eth_maxPriorityFeePerGas`
const FALLBACK_PRIORITY_FEE_WEI: u128 = 1_500_000_000;

/// Headroom over the node's gas estimate, in percent
const GAS_ESTIMATE_MARGIN_PCT: u64 = 20;

pub struct EvmRpcEndpoint {
    name: String,
    kind: EndpointKind,
    rpc: JsonRpcClient,
}

impl EvmRpcEndpoint {
    pub fn new(name: impl Into<String>, http: reqwest::Client, url: &str, kind: EndpointKind) -> Self {
        Self {
            name: name.into(),
            kind,
            rpc: JsonRpcClient::new(http, url),
        }
    }

    pub async fn transaction_count(&self, address: &Address) -> Result<u64> {
        let value = self
            .rpc
            .request("eth_getTransactionCount", json!([checksum_address(address), "pending"]))
            .await?;
        Ok(parse_quantity(&value)? as u64)
    }

    pub async fn estimate_gas(&self, tx: &EvmTransaction) -> Result<u64> {
        let value = self.rpc.request("eth_estimateGas", json!([tx.to_json()])).await?;
        Ok(parse_quantity(&value)? as u64)
    }

    pub async fn gas_price(&self) -> Result<u128> {
        let value = self.rpc.request("eth_gasPrice", json!([])).await?;
        parse_quantity(&value)
    }

    pub async fn max_priority_fee(&self) -> Result<u128> {
        let value = self.rpc.request("eth_maxPriorityFeePerGas", json!([])).await?;
        parse_quantity(&value)
    }

    /// Fill nonce, gas and fee fields the dapp left out
    pub async fn fill_transaction(
        &self,
        tx: &EvmTransaction,
        from: Address,
        chain_id: u64,
    ) -> Result<EvmTransaction> {
        let mut filled = tx.clone();
        filled.from = Some(from);
        filled.chain_id.get_or_insert(chain_id);

        if filled.nonce.is_none() {
            filled.nonce = Some(self.transaction_count(&from).await?);
        }

        if filled.gas.is_none() {
            let estimate = self.estimate_gas(&filled).await?;
            filled.gas = Some(with_margin(estimate));
        }

        if filled.is_eip1559() && filled.max_fee_per_gas.is_none() {
            let base = self.gas_price().await?;
            let priority = match filled.max_priority_fee_per_gas {
                Some(p) => p,
                None => self.max_priority_fee().await.unwrap_or_else(|e| {
                    debug!("eth_maxPriorityFeePerGas unavailable: {}", e);
                    FALLBACK_PRIORITY_FEE_WEI
                }),
            };
            let (max_fee, priority) = fee_caps(base, priority);
            filled.max_fee_per_gas = Some(max_fee);
            filled.max_priority_fee_per_gas = Some(priority);
        }

        Ok(filled)
    }
}

fn with_margin(estimate: u64) -> u64 {
    estimate.saturating_add(estimate.saturating_mul(GAS_ESTIMATE_MARGIN_PCT) / 100)
}

/// Max fee covers a doubled base fee plus the tip
fn fee_caps(gas_price: u128, priority: u128) -> (u128, u128) {
    (gas_price.saturating_mul(2).saturating_add(priority), priority)
}

#[async_trait]
impl TxEndpoint for EvmRpcEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EndpointKind {
        self.kind
    }

    async fn send(&self, raw: &[u8]) -> Result<SendOutcome> {
        let hash = format!("0x{}", hex::encode(keccak256(raw)));
        let params = json!([format!("0x{}", hex::encode(raw))]);

        match self.rpc.call("eth_sendRawTransaction", params).await? {
            RpcReply::Result(value) => Ok(SendOutcome::Accepted(
                value.as_str().map(str::to_string).unwrap_or(hash),
            )),
            RpcReply::Error(e) => match classify_send_error(&e.message) {
                SendErrorClass::AlreadyProcessed => Ok(SendOutcome::AlreadyProcessed(hash)),
                SendErrorClass::Expired => Err(Error::ValidityWindowExpired),
                SendErrorClass::Other => Err(Error::SendFailed(format!("{} ({}): {}", self.name, e.code, e.message))),
            },
        }
    }

    async fn status(&self, signature: &str) -> Result<TxStatus> {
        let receipt = self
            .rpc
            .request("eth_getTransactionReceipt", json!([signature]))
            .await?;
        Ok(receipt_status(&receipt))
    }
}

fn receipt_status(receipt: &Value) -> TxStatus {
    if receipt.is_null() {
        return TxStatus::Unknown;
    }
    match receipt.get("status").and_then(Value::as_str) {
        Some("0x1") => TxStatus::Confirmed,
        Some("0x0") => TxStatus::Failed("execution reverted".to_string()),
        // Pre-Byzantium receipts carry no status
        _ => TxStatus::Confirmed,
    }
}
