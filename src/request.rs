//! Inbound signing requests, decoded once into a closed set of variants

use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use std::str::FromStr;

use crate::chain::Chain;
use crate::decoder::solana::parse_transaction_text;
use crate::error::{Error, Result};
use crate::evm::{decode_hex_data, parse_address, Address, EvmTransaction, TypedData};

/// Solana transaction as received: wire bytes plus the parsed form
#[derive(Debug, Clone, PartialEq)]
pub struct SolanaTx {
    pub bytes: Vec<u8>,
    pub tx: VersionedTransaction,
}

impl SolanaTx {
    pub fn parse(text: &str) -> Result<Self> {
        let (bytes, tx) = parse_transaction_text(text)?;
        Ok(Self { bytes, tx })
    }
}

/// Every request shape the wallet understands
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    SolanaSignMessage {
        message: Vec<u8>,
        pubkey: Option<Pubkey>,
    },
    SolanaSignTransaction(SolanaTx),
    SolanaSignAllTransactions(Vec<SolanaTx>),
    SolanaSignAndSendTransaction(SolanaTx),
    PersonalSign {
        message: Vec<u8>,
        address: Address,
    },
    EthSign {
        message: Vec<u8>,
        address: Address,
    },
    EthSignTypedData {
        address: Address,
        data: TypedData,
    },
    EthSignTransaction(EvmTransaction),
    EthSendTransaction(EvmTransaction),
    /// Method name the wallet does not handle
    Unsupported(String),
}

impl RequestKind {
    /// Decode a JSON-RPC method and params; unknown methods are not errors
    pub fn parse(method: &str, params: &Value) -> Result<Self> {
        match method {
            "solana_signMessage" => {
                let message = required_str(params, "message")?;
                let message = bs58::decode(message).into_vec().map_err(|_| {
                    Error::ValidationFailed("message must be base58".to_string())
                })?;
                let pubkey = match params.get("pubkey").and_then(Value::as_str) {
                    Some(p) => Some(Pubkey::from_str(p).map_err(|_| {
                        Error::ValidationFailed(format!("invalid pubkey: {}", p))
                    })?),
                    None => None,
                };
                Ok(RequestKind::SolanaSignMessage { message, pubkey })
            }
            "solana_signTransaction" => Ok(RequestKind::SolanaSignTransaction(solana_tx(
                required_str(params, "transaction")?,
            )?)),
            "solana_signAndSendTransaction" => Ok(RequestKind::SolanaSignAndSendTransaction(
                solana_tx(required_str(params, "transaction")?)?,
            )),
            "solana_signAllTransactions" => {
                let list = params
                    .get("transactions")
                    .and_then(Value::as_array)
                    .ok_or_else(|| {
                        Error::ValidationFailed("transactions must be an array".to_string())
                    })?;
                if list.is_empty() {
                    return Err(Error::ValidationFailed("transactions is empty".to_string()));
                }
                let txs = list
                    .iter()
                    .map(|v| {
                        v.as_str()
                            .ok_or_else(|| {
                                Error::ValidationFailed("transaction must be a string".to_string())
                            })
                            .and_then(solana_tx)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(RequestKind::SolanaSignAllTransactions(txs))
            }
            "personal_sign" => {
                let message = positional_str(params, 0)?;
                let address = parse_address(positional_str(params, 1)?)?;
                Ok(RequestKind::PersonalSign {
                    message: message_bytes(message),
                    address,
                })
            }
            "eth_sign" => {
                let address = parse_address(positional_str(params, 0)?)?;
                let message = positional_str(params, 1)?;
                Ok(RequestKind::EthSign {
                    message: message_bytes(message),
                    address,
                })
            }
            "eth_signTypedData" | "eth_signTypedData_v4" => {
                let address = parse_address(positional_str(params, 0)?)?;
                let data = TypedData::from_value(positional(params, 1)?)?;
                Ok(RequestKind::EthSignTypedData { address, data })
            }
            "eth_signTransaction" => Ok(RequestKind::EthSignTransaction(
                EvmTransaction::from_json(positional(params, 0)?)?,
            )),
            "eth_sendTransaction" => Ok(RequestKind::EthSendTransaction(
                EvmTransaction::from_json(positional(params, 0)?)?,
            )),
            other => Ok(RequestKind::Unsupported(other.to_string())),
        }
    }

    /// Chain family the request targets
    pub fn chain(&self) -> Option<Chain> {
        match self {
            RequestKind::SolanaSignMessage { .. }
            | RequestKind::SolanaSignTransaction(_)
            | RequestKind::SolanaSignAllTransactions(_)
            | RequestKind::SolanaSignAndSendTransaction(_) => Some(Chain::Solana),
            RequestKind::PersonalSign { .. }
            | RequestKind::EthSign { .. }
            | RequestKind::EthSignTypedData { .. }
            | RequestKind::EthSignTransaction(_)
            | RequestKind::EthSendTransaction(_) => Some(Chain::Evm),
            RequestKind::Unsupported(_) => None,
        }
    }

    /// Canonical method name
    pub fn method(&self) -> &str {
        match self {
            RequestKind::SolanaSignMessage { .. } => "solana_signMessage",
            RequestKind::SolanaSignTransaction(_) => "solana_signTransaction",
            RequestKind::SolanaSignAllTransactions(_) => "solana_signAllTransactions",
            RequestKind::SolanaSignAndSendTransaction(_) => "solana_signAndSendTransaction",
            RequestKind::PersonalSign { .. } => "personal_sign",
            RequestKind::EthSign { .. } => "eth_sign",
            RequestKind::EthSignTypedData { .. } => "eth_signTypedData_v4",
            RequestKind::EthSignTransaction(_) => "eth_signTransaction",
            RequestKind::EthSendTransaction(_) => "eth_sendTransaction",
            RequestKind::Unsupported(method) => method,
        }
    }

    /// Whether approval ends in a broadcast
    pub fn is_send(&self) -> bool {
        matches!(
            self,
            RequestKind::SolanaSignAndSendTransaction(_) | RequestKind::EthSendTransaction(_)
        )
    }

    /// EVM address the dapp claims the request is for
    pub fn evm_account(&self) -> Option<Address> {
        match self {
            RequestKind::PersonalSign { address, .. }
            | RequestKind::EthSign { address, .. }
            | RequestKind::EthSignTypedData { address, .. } => Some(*address),
            RequestKind::EthSignTransaction(tx) | RequestKind::EthSendTransaction(tx) => tx.from,
            _ => None,
        }
    }
}

fn solana_tx(text: &str) -> Result<SolanaTx> {
    SolanaTx::parse(text).map_err(|e| Error::ValidationFailed(e.to_string()))
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::ValidationFailed(format!("missing string param {}", key)))
}

fn positional(params: &Value, index: usize) -> Result<&Value> {
    params
        .as_array()
        .and_then(|a| a.get(index))
        .ok_or_else(|| Error::ValidationFailed(format!("missing param at position {}", index)))
}

fn positional_str(params: &Value, index: usize) -> Result<&str> {
    positional(params, index)?
        .as_str()
        .ok_or_else(|| Error::ValidationFailed(format!("param {} must be a string", index)))
}

/// Hex when it decodes as hex, otherwise the literal text
fn message_bytes(text: &str) -> Vec<u8> {
    if text.starts_with("0x") || text.starts_with("0X") {
        if let Ok(bytes) = decode_hex_data(text) {
            return bytes;
        }
    }
    text.as_bytes().to_vec()
}
