//! EVM transaction request and its RLP forms

use serde_json::{json, Map, Value};

use crate::error::{Error, Result};

use super::rlp::{self, Item};
use super::typed_data::parse_integer;
use super::{checksum_address, decode_hex_data, parse_address, Address, Word};

/// EIP-2718 type byte for EIP-1559 transactions
const EIP1559_TX_TYPE: u8 = 0x02;

/// Transaction as requested by a dapp, with optional fee fields
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvmTransaction {
    pub from: Option<Address>,
    /// None for contract creation
    pub to: Option<Address>,
    pub value: Word,
    pub data: Vec<u8>,
    pub gas: Option<u64>,
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub nonce: Option<u64>,
    pub chain_id: Option<u64>,
}

/// Recoverable secp256k1 signature over a transaction hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// Recovery id, 0 or 1
    pub recovery_id: u8,
}

impl EvmTransaction {
    /// Parse the JSON object used by `eth_sendTransaction` / `eth_signTransaction`
    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::ValidationFailed("transaction must be an object".to_string()))?;

        let from = optional_address(obj, "from")?;
        let to = match obj.get("to") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(_) => optional_address(obj, "to")?,
        };

        let data = match obj.get("data").or_else(|| obj.get("input")) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => decode_hex_data(s)?,
            Some(_) => {
                return Err(Error::ValidationFailed(
                    "data must be a hex string".to_string(),
                ))
            }
        };

        let value = match obj.get("value") {
            None | Some(Value::Null) => Word::ZERO,
            Some(v) => parse_integer(v, false)?,
        };

        Ok(Self {
            from,
            to,
            value,
            data,
            gas: optional_u64(obj, "gas")?.or(optional_u64(obj, "gasLimit")?),
            gas_price: optional_u128(obj, "gasPrice")?,
            max_fee_per_gas: optional_u128(obj, "maxFeePerGas")?,
            max_priority_fee_per_gas: optional_u128(obj, "maxPriorityFeePerGas")?,
            nonce: optional_u64(obj, "nonce")?,
            chain_id: optional_u64(obj, "chainId")?,
        })
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        if let Some(from) = &self.from {
            obj.insert("from".into(), json!(checksum_address(from)));
        }
        if let Some(to) = &self.to {
            obj.insert("to".into(), json!(checksum_address(to)));
        }
        obj.insert("value".into(), json!(self.value.to_hex()));
        obj.insert("data".into(), json!(format!("0x{}", hex::encode(&self.data))));
        if let Some(gas) = self.gas {
            obj.insert("gas".into(), json!(format!("0x{:x}", gas)));
        }
        if let Some(p) = self.gas_price {
            obj.insert("gasPrice".into(), json!(format!("0x{:x}", p)));
        }
        if let Some(p) = self.max_fee_per_gas {
            obj.insert("maxFeePerGas".into(), json!(format!("0x{:x}", p)));
        }
        if let Some(p) = self.max_priority_fee_per_gas {
            obj.insert("maxPriorityFeePerGas".into(), json!(format!("0x{:x}", p)));
        }
        if let Some(n) = self.nonce {
            obj.insert("nonce".into(), json!(format!("0x{:x}", n)));
        }
        if let Some(c) = self.chain_id {
            obj.insert("chainId".into(), json!(format!("0x{:x}", c)));
        }
        Value::Object(obj)
    }

    /// Legacy only when a gas price is given without 1559 fee fields
    pub fn is_eip1559(&self) -> bool {
        self.max_fee_per_gas.is_some() || self.gas_price.is_none()
    }

    /// Same transaction with different calldata
    pub fn with_data(&self, data: Vec<u8>) -> Self {
        Self {
            data,
            ..self.clone()
        }
    }

    /// Bytes whose keccak hash gets signed
    pub fn signing_payload(&self, chain_id: u64) -> Result<Vec<u8>> {
        let fields = self.ready()?;
        if self.is_eip1559() {
            let items = self.eip1559_fields(chain_id, &fields)?;
            let mut out = vec![EIP1559_TX_TYPE];
            out.extend(rlp::encode(&Item::List(items)));
            Ok(out)
        } else {
            let mut items = self.legacy_fields(&fields)?;
            items.push(Item::uint(chain_id as u128));
            items.push(Item::uint(0));
            items.push(Item::uint(0));
            Ok(rlp::encode(&Item::List(items)))
        }
    }

    /// Raw signed transaction for `eth_sendRawTransaction`
    pub fn encode_signed(&self, chain_id: u64, sig: &RecoverableSignature) -> Result<Vec<u8>> {
        let fields = self.ready()?;
        let r = Item::word(&Word(sig.r));
        let s = Item::word(&Word(sig.s));

        if self.is_eip1559() {
            let mut items = self.eip1559_fields(chain_id, &fields)?;
            items.push(Item::uint(sig.recovery_id as u128));
            items.push(r);
            items.push(s);
            let mut out = vec![EIP1559_TX_TYPE];
            out.extend(rlp::encode(&Item::List(items)));
            Ok(out)
        } else {
            let v = sig.recovery_id as u128 + chain_id as u128 * 2 + 35;
            let mut items = self.legacy_fields(&fields)?;
            items.push(Item::uint(v));
            items.push(r);
            items.push(s);
            Ok(rlp::encode(&Item::List(items)))
        }
    }

    fn ready(&self) -> Result<(u64, u64)> {
        let nonce = self
            .nonce
            .ok_or_else(|| Error::SignFailed("transaction nonce not set".to_string()))?;
        let gas = self
            .gas
            .ok_or_else(|| Error::SignFailed("transaction gas limit not set".to_string()))?;
        Ok((nonce, gas))
    }

    fn eip1559_fields(&self, chain_id: u64, (nonce, gas): &(u64, u64)) -> Result<Vec<Item>> {
        let max_fee = self
            .max_fee_per_gas
            .ok_or_else(|| Error::SignFailed("maxFeePerGas not set".to_string()))?;
        let priority = self.max_priority_fee_per_gas.unwrap_or(0);

        Ok(vec![
            Item::uint(chain_id as u128),
            Item::uint(*nonce as u128),
            Item::uint(priority),
            Item::uint(max_fee),
            Item::uint(*gas as u128),
            self.to_item(),
            Item::word(&self.value),
            Item::bytes(&self.data),
            Item::List(vec![]),
        ])
    }

    fn legacy_fields(&self, (nonce, gas): &(u64, u64)) -> Result<Vec<Item>> {
        let gas_price = self
            .gas_price
            .ok_or_else(|| Error::SignFailed("gasPrice not set".to_string()))?;

        Ok(vec![
            Item::uint(*nonce as u128),
            Item::uint(gas_price),
            Item::uint(*gas as u128),
            self.to_item(),
            Item::word(&self.value),
            Item::bytes(&self.data),
        ])
    }

    fn to_item(&self) -> Item {
        match &self.to {
            Some(addr) => Item::bytes(addr),
            None => Item::bytes(&[]),
        }
    }
}

fn optional_address(obj: &Map<String, Value>, key: &str) -> Result<Option<Address>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => parse_address(s).map(Some),
        Some(_) => Err(Error::ValidationFailed(format!("{} must be an address", key))),
    }
}

fn optional_u128(obj: &Map<String, Value>, key: &str) -> Result<Option<u128>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => parse_integer(v, false)?
            .as_u128()
            .map(Some)
            .ok_or_else(|| Error::ValidationFailed(format!("{} out of range", key))),
    }
}

fn optional_u64(obj: &Map<String, Value>, key: &str) -> Result<Option<u64>> {
    match optional_u128(obj, key)? {
        None => Ok(None),
        Some(v) => u64::try_from(v)
            .map(Some)
            .map_err(|_| Error::ValidationFailed(format!("{} out of range", key))),
    }
}
