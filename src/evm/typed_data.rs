//! EIP-712 typed structured data hashing

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

use super::{keccak256, parse_address, Address, Word};

const DOMAIN_TYPE: &str = "EIP712Domain";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// `eth_signTypedData_v4` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedData {
    pub types: BTreeMap<String, Vec<TypedField>>,
    pub primary_type: String,
    pub domain: Value,
    pub message: Value,
}

impl TypedData {
    /// Parse from a JSON string or an already decoded value
    pub fn from_value(value: &Value) -> Result<Self> {
        let parsed = match value {
            Value::String(s) => serde_json::from_str(s),
            other => serde_json::from_value(other.clone()),
        };
        let data: TypedData = parsed
            .map_err(|e| Error::ValidationFailed(format!("malformed typed data: {}", e)))?;

        if !data.types.contains_key(&data.primary_type) {
            return Err(Error::ValidationFailed(format!(
                "primary type {} is not declared",
                data.primary_type
            )));
        }
        Ok(data)
    }

    /// Digest that gets signed: keccak(0x1901 || domainSeparator || hashStruct(message))
    pub fn signing_hash(&self) -> Result<[u8; 32]> {
        let domain = self.domain_separator()?;
        let message = self.hash_struct(&self.primary_type, &self.message)?;

        let mut buf = Vec::with_capacity(66);
        buf.extend_from_slice(&[0x19, 0x01]);
        buf.extend_from_slice(&domain);
        buf.extend_from_slice(&message);
        Ok(keccak256(&buf))
    }

    pub fn domain_separator(&self) -> Result<[u8; 32]> {
        if self.types.contains_key(DOMAIN_TYPE) {
            self.hash_struct(DOMAIN_TYPE, &self.domain)
        } else {
            // Infer the domain type from whichever standard fields are present
            let mut types = self.types.clone();
            types.insert(DOMAIN_TYPE.to_string(), inferred_domain_fields(&self.domain));
            let with_domain = TypedData {
                types,
                primary_type: self.primary_type.clone(),
                domain: self.domain.clone(),
                message: Value::Null,
            };
            with_domain.hash_struct(DOMAIN_TYPE, &self.domain)
        }
    }

    pub fn hash_struct(&self, type_name: &str, value: &Value) -> Result<[u8; 32]> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.type_hash(type_name)?);

        let fields = self.fields(type_name)?;
        for field in fields {
            let field_value = value.get(&field.name).ok_or_else(|| {
                Error::ValidationFailed(format!("{}.{} is missing", type_name, field.name))
            })?;
            buf.extend_from_slice(&self.encode_value(&field.kind, field_value)?);
        }

        Ok(keccak256(&buf))
    }

    pub fn type_hash(&self, type_name: &str) -> Result<[u8; 32]> {
        Ok(keccak256(self.encode_type(type_name)?.as_bytes()))
    }

    /// `Primary(fields)Dep1(fields)Dep2(fields)` with deps sorted by name
    pub fn encode_type(&self, type_name: &str) -> Result<String> {
        let mut deps = BTreeSet::new();
        self.collect_dependencies(type_name, &mut deps)?;
        deps.remove(type_name);

        let mut out = self.encode_single(type_name)?;
        for dep in deps {
            out.push_str(&self.encode_single(&dep)?);
        }
        Ok(out)
    }

    /// Field value by name from the message
    pub fn message_field(&self, name: &str) -> Option<&Value> {
        self.message.get(name)
    }

    pub fn verifying_contract(&self) -> Option<Address> {
        self.domain
            .get("verifyingContract")
            .and_then(Value::as_str)
            .and_then(|s| parse_address(s).ok())
    }

    pub fn domain_name(&self) -> Option<&str> {
        self.domain.get("name").and_then(Value::as_str)
    }

    pub fn chain_id(&self) -> Option<u64> {
        match self.domain.get("chainId")? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => Word::parse(s).ok()?.as_u128().map(|v| v as u64),
            _ => None,
        }
    }

    fn fields(&self, type_name: &str) -> Result<&Vec<TypedField>> {
        self.types
            .get(type_name)
            .ok_or_else(|| Error::ValidationFailed(format!("undeclared type {}", type_name)))
    }

    fn encode_single(&self, type_name: &str) -> Result<String> {
        let fields = self.fields(type_name)?;
        let body: Vec<String> = fields
            .iter()
            .map(|f| format!("{} {}", f.kind, f.name))
            .collect();
        Ok(format!("{}({})", type_name, body.join(",")))
    }

    fn collect_dependencies(&self, type_name: &str, found: &mut BTreeSet<String>) -> Result<()> {
        if found.contains(type_name) {
            return Ok(());
        }
        found.insert(type_name.to_string());

        for field in self.fields(type_name)? {
            let base = base_type(&field.kind);
            if self.types.contains_key(base) {
                self.collect_dependencies(base, found)?;
            }
        }
        Ok(())
    }

    fn encode_value(&self, kind: &str, value: &Value) -> Result<[u8; 32]> {
        if let Some(inner) = array_element_type(kind) {
            let items = value.as_array().ok_or_else(|| {
                Error::ValidationFailed(format!("expected array for {}", kind))
            })?;
            let mut buf = Vec::with_capacity(items.len() * 32);
            for item in items {
                buf.extend_from_slice(&self.encode_value(inner, item)?);
            }
            return Ok(keccak256(&buf));
        }

        if self.types.contains_key(kind) {
            return self.hash_struct(kind, value);
        }

        encode_atomic(kind, value)
    }
}

fn encode_atomic(kind: &str, value: &Value) -> Result<[u8; 32]> {
    match kind {
        "address" => {
            let text = value
                .as_str()
                .ok_or_else(|| Error::ValidationFailed("address must be a string".to_string()))?;
            Ok(super::address_to_word(&parse_address(text)?).0)
        }
        "bool" => {
            let flag = match value {
                Value::Bool(b) => *b,
                Value::String(s) => s == "true",
                Value::Number(n) => n.as_u64().unwrap_or(0) != 0,
                _ => return Err(Error::ValidationFailed("invalid bool".to_string())),
            };
            Ok(Word::from_u128(flag as u128).0)
        }
        "string" => {
            let text = value
                .as_str()
                .ok_or_else(|| Error::ValidationFailed("string field must be a string".to_string()))?;
            Ok(keccak256(text.as_bytes()))
        }
        "bytes" => {
            let text = value
                .as_str()
                .ok_or_else(|| Error::ValidationFailed("bytes field must be hex".to_string()))?;
            Ok(keccak256(&super::decode_hex_data(text)?))
        }
        _ if kind.starts_with("bytes") => {
            let text = value
                .as_str()
                .ok_or_else(|| Error::ValidationFailed(format!("{} must be hex", kind)))?;
            let data = super::decode_hex_data(text)?;
            if data.len() > 32 {
                return Err(Error::ValidationFailed(format!("{} value too long", kind)));
            }
            let mut out = [0u8; 32];
            out[..data.len()].copy_from_slice(&data);
            Ok(out)
        }
        _ if kind.starts_with("uint") => Ok(parse_integer(value, false)?.0),
        _ if kind.starts_with("int") => Ok(parse_integer(value, true)?.0),
        other => Err(Error::ValidationFailed(format!("unknown type {}", other))),
    }
}

/// Integer from a JSON number or decimal/hex string
pub fn parse_integer(value: &Value, signed: bool) -> Result<Word> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => return Err(Error::ValidationFailed("expected integer".to_string())),
    };

    if let Some(magnitude) = text.trim().strip_prefix('-') {
        if !signed {
            return Err(Error::ValidationFailed(format!(
                "negative value for unsigned integer: {}",
                text
            )));
        }
        return Ok(negate(&Word::parse(magnitude)?));
    }

    if text.contains('.') || text.contains('e') {
        return Err(Error::ValidationFailed(format!(
            "non-integer numeric value: {}",
            text
        )));
    }

    Word::parse(&text)
}

/// Two's complement
fn negate(word: &Word) -> Word {
    let mut out = word.0;
    for b in out.iter_mut() {
        *b = !*b;
    }
    for b in out.iter_mut().rev() {
        let (v, overflow) = b.overflowing_add(1);
        *b = v;
        if !overflow {
            break;
        }
    }
    Word(out)
}

fn base_type(kind: &str) -> &str {
    kind.split('[').next().unwrap_or(kind)
}

fn array_element_type(kind: &str) -> Option<&str> {
    if kind.ends_with(']') {
        kind.rfind('[').map(|idx| &kind[..idx])
    } else {
        None
    }
}

fn inferred_domain_fields(domain: &Value) -> Vec<TypedField> {
    [
        ("name", "string"),
        ("version", "string"),
        ("chainId", "uint256"),
        ("verifyingContract", "address"),
        ("salt", "bytes32"),
    ]
    .iter()
    .filter(|(name, _)| domain.get(*name).is_some())
    .map(|(name, kind)| TypedField {
        name: name.to_string(),
        kind: kind.to_string(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mail() -> TypedData {
        TypedData::from_value(&json!({
            "types": {
                "EIP712Domain": [
                    {"name": "name", "type": "string"},
                    {"name": "version", "type": "string"},
                    {"name": "chainId", "type": "uint256"},
                    {"name": "verifyingContract", "type": "address"}
                ],
                "Person": [
                    {"name": "name", "type": "string"},
                    {"name": "wallet", "type": "address"}
                ],
                "Mail": [
                    {"name": "from", "type": "Person"},
                    {"name": "to", "type": "Person"},
                    {"name": "contents", "type": "string"}
                ]
            },
            "primaryType": "Mail",
            "domain": {
                "name": "Ether Mail",
                "version": "1",
                "chainId": 1,
                "verifyingContract": "0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC"
            },
            "message": {
                "from": {"name": "Cow", "wallet": "0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826"},
                "to": {"name": "Bob", "wallet": "0xbBbBBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB"},
                "contents": "Hello, Bob!"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_encode_type_orders_dependencies() {
        assert_eq!(
            mail().encode_type("Mail").unwrap(),
            "Mail(Person from,Person to,string contents)Person(string name,address wallet)"
        );
    }

    #[test]
    fn test_mail_reference_hashes() {
        let data = mail();
        assert_eq!(
            hex::encode(data.type_hash("Mail").unwrap()),
            "a0cedeb2dc280ba39b857546d74f5549c3a1d7bdc2dd96bf881f76108e23dac2"
        );
        assert_eq!(
            hex::encode(data.domain_separator().unwrap()),
            "f2cee375fa42b42143804025fc449deafd50cc031ca257e0b194a650a912090f"
        );
        assert_eq!(
            hex::encode(data.hash_struct("Mail", &data.message).unwrap()),
            "c52c0ee5d84264471806290a3f2c4cecfc5490626bf912d01f240d7a274b371e"
        );
        assert_eq!(
            hex::encode(data.signing_hash().unwrap()),
            "be609aee343fb3c4b28e1df9e632fca64fcfaede20f02e86244efddf30957bd2"
        );
    }

    #[test]
    fn test_domain_accessors() {
        let data = mail();
        assert_eq!(data.chain_id(), Some(1));
        assert_eq!(data.domain_name(), Some("Ether Mail"));
        assert!(data.verifying_contract().is_some());
    }

    #[test]
    fn test_missing_field_fails() {
        let mut data = mail();
        data.message = json!({"from": {"name": "Cow"}});
        assert!(data.signing_hash().is_err());
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer(&json!(5), false).unwrap(), Word::from_u128(5));
        assert_eq!(parse_integer(&json!("0x10"), false).unwrap(), Word::from_u128(16));
        assert_eq!(parse_integer(&json!("-1"), true).unwrap(), Word::MAX);
        assert!(parse_integer(&json!("-1"), false).is_err());
    }

    #[test]
    fn test_undeclared_primary_type() {
        let err = TypedData::from_value(&json!({
            "types": {},
            "primaryType": "Permit",
            "domain": {},
            "message": {}
        }));
        assert!(err.is_err());
    }
}
