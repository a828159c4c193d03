//! 256-bit big-endian word used for ABI values and token amounts

use std::fmt;

use crate::error::{Error, Result};

/// Unsigned 256-bit integer stored as big-endian bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Word(pub [u8; 32]);

impl Word {
    pub const ZERO: Word = Word([0u8; 32]);
    pub const MAX: Word = Word([0xff; 32]);

    pub fn from_u128(value: u128) -> Self {
        let mut out = [0u8; 32];
        out[16..].copy_from_slice(&value.to_be_bytes());
        Word(out)
    }

    pub fn from_u64(value: u64) -> Self {
        Self::from_u128(value as u128)
    }

    /// Right-aligned copy of up to 32 big-endian bytes
    pub fn from_be_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > 32 {
            return Err(Error::Deserialization(format!(
                "word overflow: {} bytes",
                bytes.len()
            )));
        }
        let mut out = [0u8; 32];
        out[32 - bytes.len()..].copy_from_slice(bytes);
        Ok(Word(out))
    }

    /// Largest value representable in `bits` (uint8..uint256)
    pub fn max_for_bits(bits: u16) -> Self {
        let bits = bits.clamp(8, 256) as usize;
        let mut out = [0u8; 32];
        let full_bytes = bits / 8;
        for b in out[32 - full_bytes..].iter_mut() {
            *b = 0xff;
        }
        Word(out)
    }

    /// Accepts decimal or 0x-prefixed hex
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if let Some(hex_digits) = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
        {
            Self::from_hex_str(hex_digits)
        } else {
            Self::from_dec_str(text)
        }
    }

    pub fn from_hex_str(digits: &str) -> Result<Self> {
        if digits.is_empty() {
            return Ok(Word::ZERO);
        }
        if digits.len() > 64 {
            return Err(Error::Deserialization(format!(
                "hex value too wide: {} digits",
                digits.len()
            )));
        }
        let padded = if digits.len() % 2 == 1 {
            format!("0{}", digits)
        } else {
            digits.to_string()
        };
        let bytes = hex::decode(&padded)
            .map_err(|e| Error::Deserialization(format!("invalid hex value: {}", e)))?;
        Self::from_be_slice(&bytes)
    }

    pub fn from_dec_str(digits: &str) -> Result<Self> {
        if digits.is_empty() {
            return Err(Error::Deserialization("empty decimal value".to_string()));
        }

        let mut out = [0u8; 32];
        for c in digits.chars() {
            let digit = c
                .to_digit(10)
                .ok_or_else(|| Error::Deserialization(format!("invalid decimal digit {:?}", c)))?;

            // out = out * 10 + digit
            let mut carry = digit as u32;
            for byte in out.iter_mut().rev() {
                let v = (*byte as u32) * 10 + carry;
                *byte = (v & 0xff) as u8;
                carry = v >> 8;
            }
            if carry != 0 {
                return Err(Error::Deserialization(
                    "decimal value exceeds 256 bits".to_string(),
                ));
            }
        }
        Ok(Word(out))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Value as u128 if it fits
    pub fn as_u128(&self) -> Option<u128> {
        if self.0[..16].iter().any(|b| *b != 0) {
            return None;
        }
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&self.0[16..]);
        Some(u128::from_be_bytes(buf))
    }

    /// Big-endian bytes with leading zeros stripped (RLP integer form)
    pub fn trimmed(&self) -> &[u8] {
        let first = self.0.iter().position(|b| *b != 0).unwrap_or(32);
        &self.0[first..]
    }

    pub fn to_hex(&self) -> String {
        let trimmed = hex::encode(self.trimmed());
        let trimmed = trimmed.trim_start_matches('0');
        if trimmed.is_empty() {
            "0x0".to_string()
        } else {
            format!("0x{}", trimmed)
        }
    }

    /// Decimal rendering
    pub fn to_decimal(&self) -> String {
        if self.is_zero() {
            return "0".to_string();
        }

        let mut value = self.0;
        let mut digits = Vec::new();
        while value.iter().any(|b| *b != 0) {
            // value, remainder = value / 10
            let mut rem = 0u32;
            for byte in value.iter_mut() {
                let cur = (rem << 8) | *byte as u32;
                *byte = (cur / 10) as u8;
                rem = cur % 10;
            }
            digits.push(char::from(b'0' + rem as u8));
        }
        digits.iter().rev().collect()
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl serde::Serialize for Word {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_decimal())
    }
}

impl From<u128> for Word {
    fn from(value: u128) -> Self {
        Word::from_u128(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal_and_hex() {
        assert_eq!(Word::parse("1000").unwrap(), Word::from_u128(1000));
        assert_eq!(Word::parse("0x3e8").unwrap(), Word::from_u128(1000));
        assert_eq!(Word::parse("0x").unwrap(), Word::ZERO);
        assert!(Word::parse("12a").is_err());
    }

    #[test]
    fn test_max_values() {
        let max = Word::parse(
            "115792089237316195423570985008687907853269984665640564039457584007913129639935",
        )
        .unwrap();
        assert_eq!(max, Word::MAX);
        assert_eq!(Word::max_for_bits(256), Word::MAX);
        assert_eq!(Word::max_for_bits(160).to_hex(), format!("0x{}", "f".repeat(40)));
        assert_eq!(Word::max_for_bits(8), Word::from_u128(255));
    }

    #[test]
    fn test_overflow_rejected() {
        let too_big = format!("{}0", "9".repeat(78));
        assert!(Word::from_dec_str(&too_big).is_err());
        assert!(Word::from_hex_str(&"f".repeat(65)).is_err());
    }

    #[test]
    fn test_decimal_rendering() {
        assert_eq!(Word::from_u128(0).to_decimal(), "0");
        assert_eq!(Word::from_u128(1_000_000_007).to_decimal(), "1000000007");
        assert_eq!(Word::MAX.as_u128(), None);
        assert_eq!(Word::from_u128(42).as_u128(), Some(42));
        assert_eq!(Word::from_u128(0x0102).trimmed(), &[0x01, 0x02]);
    }
}
