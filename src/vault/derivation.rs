//! Per-chain key derivation from the vault mnemonic
//!
//! - Solana: SLIP-0010 ed25519 at m/44'/501'/{account}'/0'
//! - EVM: BIP-32 secp256k1 at m/44'/60'/0'/0/{account}

use bip39::{Language, Mnemonic, MnemonicType, Seed};
use hmac::{Hmac, Mac};
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::{Field, PrimeField};
use k256::{FieldBytes, Scalar};
use sha2::Sha512;
use solana_sdk::derivation_path::DerivationPath;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::keypair::keypair_from_seed_and_derivation_path;
use zeroize::Zeroizing;

use crate::chain::WalletId;
use crate::error::{Error, Result};
use crate::evm::{self, Address};

type HmacSha512 = Hmac<Sha512>;

const HARDENED: u32 = 0x8000_0000;

/// Fresh 24-word English mnemonic
pub fn generate_mnemonic() -> Zeroizing<String> {
    let mnemonic = Mnemonic::new(MnemonicType::Words24, Language::English);
    Zeroizing::new(mnemonic.phrase().to_string())
}

/// Normalize and validate a user supplied phrase
pub fn normalize_mnemonic(phrase: &str) -> Result<Zeroizing<String>> {
    let normalized = Zeroizing::new(
        phrase
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join(" "),
    );
    Mnemonic::from_phrase(&normalized, Language::English)
        .map_err(|e| Error::InvalidMnemonic(e.to_string()))?;
    Ok(normalized)
}

/// BIP-39 seed with an empty passphrase
pub fn seed_from_mnemonic(phrase: &str) -> Result<Zeroizing<Vec<u8>>> {
    let mnemonic = Mnemonic::from_phrase(phrase, Language::English)
        .map_err(|e| Error::InvalidMnemonic(e.to_string()))?;
    let seed = Seed::new(&mnemonic, "");
    Ok(Zeroizing::new(seed.as_bytes().to_vec()))
}

pub fn solana_keypair(seed: &[u8], wallet: WalletId) -> Result<Keypair> {
    let path = DerivationPath::new_bip44(Some(wallet.0), Some(0));
    keypair_from_seed_and_derivation_path(seed, Some(path))
        .map_err(|e| Error::KeyDerivation(format!("solana {}: {}", wallet, e)))
}

/// secp256k1 signing key and its address
pub struct EvmKey {
    pub signing_key: SigningKey,
    pub address: Address,
}

impl EvmKey {
    pub fn from_signing_key(signing_key: SigningKey) -> Result<Self> {
        let point = signing_key.verifying_key().to_encoded_point(false);
        let address = evm::address_from_uncompressed(point.as_bytes())?;
        Ok(Self {
            signing_key,
            address,
        })
    }

    pub fn checksum_address(&self) -> String {
        evm::checksum_address(&self.address)
    }
}

pub fn evm_key(seed: &[u8], wallet: WalletId) -> Result<EvmKey> {
    let path = [
        44 | HARDENED,
        60 | HARDENED,
        HARDENED,
        0,
        wallet.0,
    ];

    let (mut key, mut chain_code) = master_key(seed)?;
    for index in path {
        let (child_key, child_code) = derive_child(&key, &chain_code, index)?;
        key = child_key;
        chain_code = child_code;
    }

    let signing_key = SigningKey::from_slice(&key[..])
        .map_err(|e| Error::KeyDerivation(format!("evm {}: {}", wallet, e)))?;
    EvmKey::from_signing_key(signing_key)
}

fn master_key(seed: &[u8]) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>)> {
    let mut mac = <HmacSha512 as Mac>::new_from_slice(b"Bitcoin seed")
        .map_err(|_| Error::KeyDerivation("hmac init".to_string()))?;
    mac.update(seed);
    split_output(&mac.finalize().into_bytes())
}

fn derive_child(
    key: &[u8; 32],
    chain_code: &[u8; 32],
    index: u32,
) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>)> {
    let mut mac = <HmacSha512 as Mac>::new_from_slice(chain_code)
        .map_err(|_| Error::KeyDerivation("hmac init".to_string()))?;

    if index & HARDENED != 0 {
        mac.update(&[0u8]);
        mac.update(key);
    } else {
        let parent = SigningKey::from_slice(key)
            .map_err(|e| Error::KeyDerivation(format!("invalid parent key: {}", e)))?;
        let compressed = parent.verifying_key().to_encoded_point(true);
        mac.update(compressed.as_bytes());
    }
    mac.update(&index.to_be_bytes());

    let (tweak, child_code) = split_output(&mac.finalize().into_bytes())?;

    let tweak_scalar = scalar_from_bytes(&tweak)
        .ok_or_else(|| Error::KeyDerivation(format!("tweak out of range at index {}", index)))?;
    let parent_scalar = scalar_from_bytes(key)
        .ok_or_else(|| Error::KeyDerivation("parent key out of range".to_string()))?;

    let child = tweak_scalar + parent_scalar;
    if bool::from(child.is_zero()) {
        return Err(Error::KeyDerivation(format!(
            "derived zero key at index {}",
            index
        )));
    }

    let mut child_key = Zeroizing::new([0u8; 32]);
    child_key.copy_from_slice(&child.to_repr());
    Ok((child_key, child_code))
}

fn scalar_from_bytes(bytes: &[u8; 32]) -> Option<Scalar> {
    Option::from(Scalar::from_repr(FieldBytes::clone_from_slice(bytes)))
}

fn split_output(output: &[u8]) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>)> {
    if output.len() != 64 {
        return Err(Error::KeyDerivation("unexpected hmac length".to_string()));
    }
    let mut left = Zeroizing::new([0u8; 32]);
    let mut right = Zeroizing::new([0u8; 32]);
    left.copy_from_slice(&output[..32]);
    right.copy_from_slice(&output[32..]);
    Ok((left, right))
}
