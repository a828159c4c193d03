//! EVM primitives: hashing, addresses, ABI words, RLP and EIP-712

pub mod rlp;
pub mod transaction;
pub mod typed_data;
pub mod word;

pub use transaction::{EvmTransaction, RecoverableSignature};
pub use typed_data::TypedData;
pub use word::Word;

use sha3::{Digest, Keccak256};

use crate::error::{Error, Result};

/// 20-byte account address
pub type Address = [u8; 20];

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// First four bytes of keccak over a function signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Address from a 65-byte uncompressed SEC1 public key
pub fn address_from_uncompressed(pubkey: &[u8]) -> Result<Address> {
    if pubkey.len() != 65 || pubkey[0] != 0x04 {
        return Err(Error::KeyDerivation(
            "expected 65-byte uncompressed public key".to_string(),
        ));
    }
    let hash = keccak256(&pubkey[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&hash[12..]);
    Ok(addr)
}

/// EIP-55 mixed-case rendering
pub fn checksum_address(addr: &Address) -> String {
    let lower = hex::encode(addr);
    let hash = keccak256(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse a 0x-prefixed hex address; checksum casing is not enforced
pub fn parse_address(text: &str) -> Result<Address> {
    let digits = text
        .trim()
        .strip_prefix("0x")
        .or_else(|| text.trim().strip_prefix("0X"))
        .ok_or_else(|| Error::ValidationFailed(format!("address missing 0x prefix: {}", text)))?;

    if digits.len() != 40 {
        return Err(Error::ValidationFailed(format!(
            "address must be 20 bytes: {}",
            text
        )));
    }

    let bytes = hex::decode(digits)
        .map_err(|_| Error::ValidationFailed(format!("address is not hex: {}", text)))?;
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&bytes);
    Ok(addr)
}

/// Decode 0x-prefixed hex data; an empty string or bare "0x" is empty data
pub fn decode_hex_data(text: &str) -> Result<Vec<u8>> {
    let digits = text
        .trim()
        .strip_prefix("0x")
        .or_else(|| text.trim().strip_prefix("0X"))
        .unwrap_or(text.trim());
    hex::decode(digits).map_err(|e| Error::ValidationFailed(format!("invalid hex data: {}", e)))
}

/// Last 20 bytes of an ABI word as an address
pub fn word_to_address(word: &Word) -> Address {
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&word.0[12..]);
    addr
}

pub fn address_to_word(addr: &Address) -> Word {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(addr);
    Word(out)
}
