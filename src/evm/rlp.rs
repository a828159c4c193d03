//! Minimal RLP encoder for transaction serialization

use super::Word;

/// RLP item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Bytes(Vec<u8>),
    List(Vec<Item>),
}

impl Item {
    pub fn bytes(data: &[u8]) -> Self {
        Item::Bytes(data.to_vec())
    }

    /// Integer with leading zeros stripped; zero encodes as the empty string
    pub fn uint(value: u128) -> Self {
        Item::word(&Word::from_u128(value))
    }

    pub fn word(value: &Word) -> Self {
        Item::Bytes(value.trimmed().to_vec())
    }
}

pub fn encode(item: &Item) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(item, &mut out);
    out
}

fn encode_into(item: &Item, out: &mut Vec<u8>) {
    match item {
        Item::Bytes(data) => {
            if data.len() == 1 && data[0] < 0x80 {
                out.push(data[0]);
            } else {
                encode_length(data.len(), 0x80, out);
                out.extend_from_slice(data);
            }
        }
        Item::List(items) => {
            let mut payload = Vec::new();
            for item in items {
                encode_into(item, &mut payload);
            }
            encode_length(payload.len(), 0xc0, out);
            out.extend_from_slice(&payload);
        }
    }
}

fn encode_length(len: usize, offset: u8, out: &mut Vec<u8>) {
    if len < 56 {
        out.push(offset + len as u8);
    } else {
        let len_bytes = (len as u64).to_be_bytes();
        let first = len_bytes.iter().position(|b| *b != 0).unwrap_or(7);
        let trimmed = &len_bytes[first..];
        out.push(offset + 55 + trimmed.len() as u8);
        out.extend_from_slice(trimmed);
    }
}
