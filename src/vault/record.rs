//! Encrypted vault record
//!
//! The master seed is sealed with:
//! - PBKDF2-HMAC-SHA256 for secret-based key derivation
//! - AES-256-GCM for authenticated encryption
//!
//! A short key-check MAC rejects a wrong secret cheaply. On a mismatch the
//! GCM tag decides whether the key check itself was damaged.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Current vault record format version
pub const VAULT_VERSION: u32 = 1;

/// Only supported KDF
pub const KDF_ALGORITHM: &str = "pbkdf2-hmac-sha256";

/// Upper bound on stored KDF work; a record asking for more is treated as damaged
pub const MAX_KDF_ITERATIONS: u32 = 10_000_000;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_CHECK_LEN: usize = 16;
const KEY_CHECK_LABEL: &[u8] = b"wallet-guard/key-check/v1";

type HmacSha256 = Hmac<Sha256>;

/// Symmetric key derived from the user secret
pub type VaultKey = Zeroizing<[u8; 32]>;

/// KDF parameters stored alongside the ciphertext
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KdfParams {
    pub algorithm: String,
    pub iterations: u32,
    /// Base64 salt
    pub salt: String,
}

/// Persisted vault record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VaultRecord {
    pub version: u32,
    pub vault_id: String,
    pub kdf: KdfParams,
    /// Base64 AES-GCM nonce
    pub nonce: String,
    /// Base64 ciphertext including the GCM tag
    pub ciphertext: String,
    /// Hex key-check MAC
    pub key_check: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VaultRecord {
    /// Seal `plaintext` under a key derived from `secret`
    ///
    /// Returns the record and the derived key so callers can cache it.
    pub fn seal(
        vault_id: &str,
        secret: &str,
        plaintext: &[u8],
        iterations: u32,
    ) -> Result<(Self, VaultKey)> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);

        let key = pbkdf2_key(secret, &salt, iterations);
        let now = Utc::now();

        let mut record = Self {
            version: VAULT_VERSION,
            vault_id: vault_id.to_string(),
            kdf: KdfParams {
                algorithm: KDF_ALGORITHM.to_string(),
                iterations,
                salt: STANDARD.encode(salt),
            },
            nonce: String::new(),
            ciphertext: String::new(),
            key_check: hex::encode(key_check(&key)?),
            created_at: now,
            updated_at: now,
        };
        record.encrypt_with(&key, plaintext)?;

        Ok((record, key))
    }

    /// Run the KDF for `secret` and confirm it matches this record
    ///
    /// This is the expensive step and should run off the async executor.
    pub fn derive_key(&self, secret: &str) -> Result<VaultKey> {
        self.check_structure()?;

        let salt = STANDARD
            .decode(&self.kdf.salt)
            .map_err(|_| Error::VaultCorrupted("salt is not valid base64".to_string()))?;
        let key = pbkdf2_key(secret, &salt, self.kdf.iterations);

        if !self.key_matches(&key)? {
            return Err(self.mismatch_cause(&key));
        }

        Ok(key)
    }

    /// Decrypt the sealed payload with an already derived key
    pub fn open(&self, key: &VaultKey) -> Result<Zeroizing<Vec<u8>>> {
        self.check_structure()?;

        if !self.key_matches(key)? {
            return Err(self.mismatch_cause(key));
        }

        // The key already matched, so an authentication failure here means
        // the stored bytes were altered
        let plaintext = self
            .decrypt(key)?
            .ok_or_else(|| Error::VaultCorrupted("ciphertext failed authentication".to_string()))?;

        Ok(plaintext)
    }

    /// Replace the payload under a new secret, with fresh salt and nonce
    pub fn reseal(&self, new_secret: &str, plaintext: &[u8]) -> Result<(Self, VaultKey)> {
        let (mut record, key) =
            Self::seal(&self.vault_id, new_secret, plaintext, self.kdf.iterations)?;
        record.created_at = self.created_at;
        Ok((record, key))
    }

    /// Structural validation without any key material
    pub fn check_structure(&self) -> Result<()> {
        if self.version != VAULT_VERSION {
            return Err(Error::VaultCorrupted(format!(
                "unsupported record version {} (expected {})",
                self.version, VAULT_VERSION
            )));
        }

        if self.kdf.algorithm != KDF_ALGORITHM {
            return Err(Error::VaultCorrupted(format!(
                "unsupported kdf {}",
                self.kdf.algorithm
            )));
        }

        if self.kdf.iterations == 0 {
            return Err(Error::VaultCorrupted("kdf iterations is zero".to_string()));
        }

        if self.kdf.iterations > MAX_KDF_ITERATIONS {
            return Err(Error::VaultCorrupted(format!(
                "kdf iterations {} exceeds {}",
                self.kdf.iterations, MAX_KDF_ITERATIONS
            )));
        }

        decode_fixed(&self.kdf.salt, SALT_LEN, "salt")?;
        decode_fixed(&self.nonce, NONCE_LEN, "nonce")?;

        let check = hex::decode(&self.key_check)
            .map_err(|_| Error::VaultCorrupted("key check is not valid hex".to_string()))?;
        if check.len() != KEY_CHECK_LEN {
            return Err(Error::VaultCorrupted("key check has wrong length".to_string()));
        }

        if self.ciphertext.is_empty() {
            return Err(Error::VaultCorrupted("ciphertext is empty".to_string()));
        }

        Ok(())
    }

    fn encrypt_with(&mut self, key: &VaultKey, plaintext: &[u8]) -> Result<()> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|_| Error::Internal("failed to create cipher".to_string()))?;
        let aad = self.aad();

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| Error::Internal("encryption failed".to_string()))?;

        self.nonce = STANDARD.encode(nonce);
        self.ciphertext = STANDARD.encode(ciphertext);
        Ok(())
    }

    /// AEAD decrypt; `None` when the tag does not verify under `key`
    fn decrypt(&self, key: &VaultKey) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let nonce = decode_fixed(&self.nonce, NONCE_LEN, "nonce")?;
        let ciphertext = STANDARD
            .decode(&self.ciphertext)
            .map_err(|_| Error::VaultCorrupted("ciphertext is not valid base64".to_string()))?;

        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|_| Error::Internal("failed to create cipher".to_string()))?;
        let aad = self.aad();

        Ok(cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: &aad,
                },
            )
            .ok()
            .map(Zeroizing::new))
    }

    /// Classify a key-check mismatch
    ///
    /// The GCM tag is authoritative: if it still verifies under `key`, the
    /// secret was right and the stored key check was altered.
    fn mismatch_cause(&self, key: &VaultKey) -> Error {
        match self.decrypt(key) {
            Ok(Some(_)) => Error::VaultCorrupted("key check does not match payload".to_string()),
            Ok(None) => Error::WrongSecret,
            Err(e) => e,
        }
    }

    fn key_matches(&self, key: &VaultKey) -> Result<bool> {
        let expected = hex::decode(&self.key_check)
            .map_err(|_| Error::VaultCorrupted("key check is not valid hex".to_string()))?;

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&key[..])
            .map_err(|_| Error::Internal("failed to create mac".to_string()))?;
        mac.update(KEY_CHECK_LABEL);

        Ok(mac.verify_truncated_left(&expected).is_ok())
    }

    /// Header fields bound into the AEAD tag
    fn aad(&self) -> Vec<u8> {
        format!("{}:{}:{}", self.version, self.vault_id, self.kdf.iterations).into_bytes()
    }
}

fn pbkdf2_key(secret: &str, salt: &[u8], iterations: u32) -> VaultKey {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt, iterations, &mut key[..]);
    key
}

fn key_check(key: &VaultKey) -> Result<[u8; KEY_CHECK_LEN]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&key[..])
        .map_err(|_| Error::Internal("failed to create mac".to_string()))?;
    mac.update(KEY_CHECK_LABEL);
    let tag = mac.finalize().into_bytes();

    let mut out = [0u8; KEY_CHECK_LEN];
    out.copy_from_slice(&tag[..KEY_CHECK_LEN]);
    Ok(out)
}

fn decode_fixed(value: &str, len: usize, field: &str) -> Result<Vec<u8>> {
    let bytes = STANDARD
        .decode(value)
        .map_err(|_| Error::VaultCorrupted(format!("{} is not valid base64", field)))?;
    if bytes.len() != len {
        return Err(Error::VaultCorrupted(format!(
            "{} has length {} (expected {})",
            field,
            bytes.len(),
            len
        )));
    }
    Ok(bytes)
}
