//! Vault manager: unlock state, key cache and eviction
//!
//! The derived vault key is the only secret kept between calls. It lives in
//! a TTL-bounded cache and is dropped on lock, backgrounding, memory pressure
//! or expiry. The seed itself is decrypted per use and zeroized on drop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::chain::{Chain, WalletId};
use crate::config::VaultConfig;
use crate::error::{Error, Result};

use super::derivation::{self, EvmKey};
use super::record::{VaultKey, VaultRecord};
use super::store::SecureStore;

/// Unlock state as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Locked,
    Unlocking,
    Unlocked,
}

/// Why the cached key was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Explicit,
    Background,
    MemoryPressure,
    Timeout,
    Removed,
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionReason::Explicit => write!(f, "explicit lock"),
            EvictionReason::Background => write!(f, "app backgrounded"),
            EvictionReason::MemoryPressure => write!(f, "memory pressure"),
            EvictionReason::Timeout => write!(f, "timeout"),
            EvictionReason::Removed => write!(f, "vault removed"),
        }
    }
}

/// Device-bound secret retrieval (Face ID, fingerprint, OS keychain)
#[async_trait]
pub trait BiometricProvider: Send + Sync {
    /// Prompt the user; `Ok(None)` means they cancelled
    async fn retrieve_secret(&self, reason: &str) -> Result<Option<Zeroizing<String>>>;
}

/// Options for [`VaultManager::ensure_unlocked`]
#[derive(Debug, Clone)]
pub struct UnlockOptions {
    pub allow_biometric: bool,
    /// Shown in the biometric prompt
    pub reason: String,
}

impl Default for UnlockOptions {
    fn default() -> Self {
        Self {
            allow_biometric: true,
            reason: "Unlock wallet to sign".to_string(),
        }
    }
}

/// Proof that the user confirmed a destructive restore
///
/// Only constructible through [`RestoreConsent::confirmed_by_user`], which the
/// UI calls after an explicit prompt.
#[derive(Debug)]
pub struct RestoreConsent {
    _private: (),
}

impl RestoreConsent {
    pub fn confirmed_by_user() -> Self {
        Self { _private: () }
    }
}

/// Chain-specific key material, dropped at the end of the caller's scope
pub enum ChainKey {
    Solana(Keypair),
    Evm(EvmKey),
}

impl ChainKey {
    pub fn public_address(&self) -> String {
        match self {
            ChainKey::Solana(kp) => kp.pubkey().to_string(),
            ChainKey::Evm(key) => key.checksum_address(),
        }
    }
}

struct CachedKey {
    key: VaultKey,
    expires_at: Instant,
}

/// Owns the sealed seed and its unlock lifecycle
pub struct VaultManager {
    vault_id: String,
    iterations: u32,
    ttl: Duration,
    store: Arc<dyn SecureStore>,
    biometric: Option<Arc<dyn BiometricProvider>>,
    cached: RwLock<Option<CachedKey>>,
    unlocking: AtomicBool,
    /// Set after a failed or cancelled biometric attempt until the next
    /// explicit unlock or lock
    biometric_declined: AtomicBool,
    unlock_gate: Mutex<()>,
    kdf_runs: AtomicU64,
}

impl VaultManager {
    pub fn new(config: &VaultConfig, store: Arc<dyn SecureStore>) -> Self {
        Self {
            vault_id: config.vault_id.clone(),
            iterations: config.kdf_iterations,
            ttl: Duration::from_secs(config.key_cache_ttl_secs),
            store,
            biometric: None,
            cached: RwLock::new(None),
            unlocking: AtomicBool::new(false),
            biometric_declined: AtomicBool::new(false),
            unlock_gate: Mutex::new(()),
            kdf_runs: AtomicU64::new(0),
        }
    }

    pub fn with_biometric(mut self, provider: Arc<dyn BiometricProvider>) -> Self {
        self.biometric = Some(provider);
        self
    }

    pub fn vault_id(&self) -> &str {
        &self.vault_id
    }

    /// Number of full KDF evaluations performed so far
    pub fn kdf_runs(&self) -> u64 {
        self.kdf_runs.load(Ordering::Relaxed)
    }

    pub fn exists(&self) -> Result<bool> {
        self.store.exists(&self.vault_id)
    }

    pub async fn state(&self) -> VaultState {
        if self.unlocking.load(Ordering::Acquire) {
            return VaultState::Unlocking;
        }
        if self.has_live_key().await {
            VaultState::Unlocked
        } else {
            VaultState::Locked
        }
    }

    /// Seal a freshly generated mnemonic under `secret`
    pub async fn create(&self, secret: &str, mnemonic: &str) -> Result<()> {
        let phrase = derivation::normalize_mnemonic(mnemonic)?;
        self.store_new(secret, phrase).await?;
        info!("Created vault {}", self.vault_id);
        Ok(())
    }

    /// Seal a user supplied recovery phrase under `secret`
    pub async fn import(&self, secret: &str, phrase: &str) -> Result<()> {
        let phrase = derivation::normalize_mnemonic(phrase)?;
        self.store_new(secret, phrase).await?;
        info!("Imported vault {}", self.vault_id);
        Ok(())
    }

    async fn store_new(&self, secret: &str, phrase: Zeroizing<String>) -> Result<()> {
        if self.store.exists(&self.vault_id)? {
            return Err(Error::VaultExists(self.vault_id.clone()));
        }

        let vault_id = self.vault_id.clone();
        let secret = Zeroizing::new(secret.to_string());
        let iterations = self.iterations;

        let (record, key) = tokio::task::spawn_blocking(move || {
            VaultRecord::seal(&vault_id, &secret, phrase.as_bytes(), iterations)
        })
        .await
        .map_err(|e| Error::Internal(format!("kdf task failed: {}", e)))??;
        self.kdf_runs.fetch_add(1, Ordering::Relaxed);

        self.store.save(&record)?;
        self.cache_key(key).await;
        Ok(())
    }

    /// Full KDF unlock
    pub async fn unlock_with_secret(&self, secret: &str) -> Result<()> {
        let record = self.load_record()?;

        self.unlocking.store(true, Ordering::Release);
        let secret = Zeroizing::new(secret.to_string());
        let result = tokio::task::spawn_blocking(move || {
            let key = record.derive_key(&secret)?;
            // Authenticate the ciphertext now so corruption surfaces at unlock
            record.open(&key)?;
            Ok::<_, Error>(key)
        })
        .await;
        self.unlocking.store(false, Ordering::Release);
        self.kdf_runs.fetch_add(1, Ordering::Relaxed);

        let key = result.map_err(|e| Error::Internal(format!("kdf task failed: {}", e)))??;
        self.cache_key(key).await;
        self.biometric_declined.store(false, Ordering::Relaxed);

        info!("Vault {} unlocked", self.vault_id);
        Ok(())
    }

    /// Zero-KDF fast path; true only if a live cached key exists
    pub async fn unlock_with_cached_key(&self) -> bool {
        self.has_live_key().await
    }

    /// Cached key first, then one biometric attempt
    ///
    /// Returns false when the caller must show explicit unlock UI. Concurrent
    /// callers are serialized so at most one biometric prompt is in flight.
    pub async fn ensure_unlocked(&self, opts: &UnlockOptions) -> Result<bool> {
        let _gate = self.unlock_gate.lock().await;

        if self.has_live_key().await {
            debug!("Vault {} already unlocked", self.vault_id);
            return Ok(true);
        }

        let provider = match (&self.biometric, opts.allow_biometric) {
            (Some(provider), true) => provider.clone(),
            _ => return Ok(false),
        };

        if self.biometric_declined.load(Ordering::Relaxed) {
            debug!("Biometric unlock already declined, not prompting again");
            return Ok(false);
        }

        let secret = match provider.retrieve_secret(&opts.reason).await {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                info!("Biometric unlock cancelled");
                self.biometric_declined.store(true, Ordering::Relaxed);
                return Ok(false);
            }
            Err(e) => {
                warn!("Biometric unlock failed: {}", e);
                self.biometric_declined.store(true, Ordering::Relaxed);
                return Ok(false);
            }
        };

        match self.unlock_with_secret(&secret).await {
            Ok(()) => Ok(true),
            Err(Error::WrongSecret) => {
                warn!("Biometric secret did not match vault {}", self.vault_id);
                self.biometric_declined.store(true, Ordering::Relaxed);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Re-encrypt under a new secret after verifying the old one
    pub async fn change_secret(&self, old_secret: &str, new_secret: &str) -> Result<()> {
        let record = self.load_record()?;

        let old_secret = Zeroizing::new(old_secret.to_string());
        let new_secret = Zeroizing::new(new_secret.to_string());

        let (resealed, key) = tokio::task::spawn_blocking(move || {
            let old_key = record.derive_key(&old_secret)?;
            let plaintext = record.open(&old_key)?;
            record.reseal(&new_secret, &plaintext)
        })
        .await
        .map_err(|e| Error::Internal(format!("kdf task failed: {}", e)))??;
        self.kdf_runs.fetch_add(2, Ordering::Relaxed);

        self.store.save(&resealed)?;
        self.cache_key(key).await;

        info!("Vault {} secret changed", self.vault_id);
        Ok(())
    }

    /// Derive key material for one chain account
    pub async fn derive_key(&self, chain: Chain, wallet: WalletId) -> Result<ChainKey> {
        let seed = self.open_seed().await?;
        match chain {
            Chain::Solana => Ok(ChainKey::Solana(derivation::solana_keypair(&seed, wallet)?)),
            Chain::Evm => Ok(ChainKey::Evm(derivation::evm_key(&seed, wallet)?)),
        }
    }

    pub async fn solana_keypair(&self, wallet: WalletId) -> Result<Keypair> {
        let seed = self.open_seed().await?;
        derivation::solana_keypair(&seed, wallet)
    }

    pub async fn evm_key(&self, wallet: WalletId) -> Result<EvmKey> {
        let seed = self.open_seed().await?;
        derivation::evm_key(&seed, wallet)
    }

    /// Public addresses for an account; requires an unlocked vault
    pub async fn public_addresses(&self, wallet: WalletId) -> Result<(Pubkey, String)> {
        let seed = self.open_seed().await?;
        let solana = derivation::solana_keypair(&seed, wallet)?.pubkey();
        let evm = derivation::evm_key(&seed, wallet)?.checksum_address();
        Ok((solana, evm))
    }

    /// Encrypted record for off-device backup
    pub fn export_backup(&self) -> Result<VaultRecord> {
        self.load_record()
    }

    /// Replace the stored record with a backup
    ///
    /// The caller must unlock again afterwards with the backup's secret.
    pub async fn restore_from_backup(
        &self,
        backup: VaultRecord,
        _consent: RestoreConsent,
    ) -> Result<()> {
        backup.check_structure()?;
        if backup.vault_id != self.vault_id {
            return Err(Error::VaultCorrupted(format!(
                "backup belongs to vault {}",
                backup.vault_id
            )));
        }

        self.evict(EvictionReason::Explicit).await;
        self.store.save(&backup)?;

        warn!("Vault {} restored from backup", self.vault_id);
        Ok(())
    }

    /// Destroy the vault record
    pub async fn remove(&self) -> Result<()> {
        self.evict(EvictionReason::Removed).await;
        if !self.store.delete(&self.vault_id)? {
            return Err(Error::VaultNotFound(self.vault_id.clone()));
        }
        warn!("Vault {} removed", self.vault_id);
        Ok(())
    }

    pub async fn lock(&self) {
        self.evict(EvictionReason::Explicit).await;
    }

    pub async fn on_background(&self) {
        self.evict(EvictionReason::Background).await;
    }

    pub async fn on_memory_pressure(&self) {
        self.evict(EvictionReason::MemoryPressure).await;
    }

    /// Drop the cached key if its TTL has passed; returns true if evicted
    pub async fn evict_if_expired(&self) -> bool {
        let expired = {
            let cached = self.cached.read().await;
            matches!(&*cached, Some(c) if Instant::now() >= c.expires_at)
        };
        if expired {
            self.evict(EvictionReason::Timeout).await;
        }
        expired
    }

    async fn evict(&self, reason: EvictionReason) {
        let mut cached = self.cached.write().await;
        if cached.take().is_some() {
            info!("Vault {} locked ({})", self.vault_id, reason);
        }
        if reason != EvictionReason::Timeout {
            self.biometric_declined.store(false, Ordering::Relaxed);
        }
    }

    async fn cache_key(&self, key: VaultKey) {
        let mut cached = self.cached.write().await;
        *cached = Some(CachedKey {
            key,
            expires_at: Instant::now() + self.ttl,
        });
    }

    async fn has_live_key(&self) -> bool {
        !self.evict_if_expired().await && self.cached.read().await.is_some()
    }

    async fn current_key(&self) -> Result<VaultKey> {
        self.evict_if_expired().await;
        let cached = self.cached.read().await;
        cached
            .as_ref()
            .map(|c| c.key.clone())
            .ok_or(Error::VaultLocked)
    }

    async fn open_seed(&self) -> Result<Zeroizing<Vec<u8>>> {
        let key = self.current_key().await?;
        let record = self.load_record()?;
        let plaintext = record.open(&key)?;

        let phrase = std::str::from_utf8(&plaintext)
            .map_err(|_| Error::VaultCorrupted("sealed phrase is not utf-8".to_string()))?;
        derivation::seed_from_mnemonic(phrase)
            .map_err(|e| Error::VaultCorrupted(format!("sealed phrase invalid: {}", e)))
    }

    fn load_record(&self) -> Result<VaultRecord> {
        self.store
            .load(&self.vault_id)?
            .ok_or_else(|| Error::VaultNotFound(self.vault_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::store::MemorySecureStore;
    use std::sync::atomic::AtomicUsize;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn config() -> VaultConfig {
        VaultConfig {
            vault_id: "test".to_string(),
            kdf_iterations: 1_000,
            key_cache_ttl_secs: 60,
            ..VaultConfig::default()
        }
    }

    fn manager() -> VaultManager {
        VaultManager::new(&config(), Arc::new(MemorySecureStore::new()))
    }

    struct CountingBiometric {
        secret: Option<String>,
        prompts: AtomicUsize,
    }

    #[async_trait]
    impl BiometricProvider for CountingBiometric {
        async fn retrieve_secret(&self, _reason: &str) -> Result<Option<Zeroizing<String>>> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(self.secret.clone().map(Zeroizing::new))
        }
    }

    #[tokio::test]
    async fn test_create_unlock_lock() {
        let vault = manager();
        vault.create("hunter2", PHRASE).await.unwrap();
        assert_eq!(vault.state().await, VaultState::Unlocked);

        vault.lock().await;
        assert_eq!(vault.state().await, VaultState::Locked);
        assert!(matches!(
            vault.solana_keypair(WalletId(0)).await,
            Err(Error::VaultLocked)
        ));

        vault.unlock_with_secret("hunter2").await.unwrap();
        assert!(vault.unlock_with_cached_key().await);
    }

    #[tokio::test]
    async fn test_wrong_secret() {
        let vault = manager();
        vault.create("hunter2", PHRASE).await.unwrap();
        vault.lock().await;

        assert!(matches!(
            vault.unlock_with_secret("nope").await,
            Err(Error::WrongSecret)
        ));
        assert_eq!(vault.state().await, VaultState::Locked);
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let vault = manager();
        vault.create("pw", PHRASE).await.unwrap();
        assert!(matches!(
            vault.import("pw", PHRASE).await,
            Err(Error::VaultExists(_))
        ));
    }

    #[tokio::test]
    async fn test_cached_unlock_does_no_kdf_work() {
        let vault = manager();
        vault.create("pw", PHRASE).await.unwrap();
        let runs = vault.kdf_runs();

        for _ in 0..5 {
            assert!(vault.ensure_unlocked(&UnlockOptions::default()).await.unwrap());
        }
        vault.solana_keypair(WalletId(0)).await.unwrap();

        assert_eq!(vault.kdf_runs(), runs);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_key_expires() {
        let vault = manager();
        vault.create("pw", PHRASE).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(vault.unlock_with_cached_key().await);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!vault.unlock_with_cached_key().await);
        assert_eq!(vault.state().await, VaultState::Locked);
    }

    #[tokio::test]
    async fn test_eviction_triggers() {
        let vault = manager();
        vault.create("pw", PHRASE).await.unwrap();

        vault.on_background().await;
        assert_eq!(vault.state().await, VaultState::Locked);

        vault.unlock_with_secret("pw").await.unwrap();
        vault.on_memory_pressure().await;
        assert_eq!(vault.state().await, VaultState::Locked);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_unlocked_prompts_once() {
        let biometric = Arc::new(CountingBiometric {
            secret: Some("pw".to_string()),
            prompts: AtomicUsize::new(0),
        });
        let vault = manager().with_biometric(biometric.clone());
        vault.create("pw", PHRASE).await.unwrap();
        vault.lock().await;
        let runs = vault.kdf_runs();

        let opts = UnlockOptions::default();
        let (a, b) = tokio::join!(vault.ensure_unlocked(&opts), vault.ensure_unlocked(&opts));
        assert!(a.unwrap());
        assert!(b.unwrap());

        assert_eq!(biometric.prompts.load(Ordering::SeqCst), 1);
        assert_eq!(vault.kdf_runs(), runs + 1);
    }

    #[tokio::test]
    async fn test_cancelled_biometric_is_not_retried() {
        let biometric = Arc::new(CountingBiometric {
            secret: None,
            prompts: AtomicUsize::new(0),
        });
        let vault = manager().with_biometric(biometric.clone());
        vault.create("pw", PHRASE).await.unwrap();
        vault.lock().await;

        let opts = UnlockOptions::default();
        assert!(!vault.ensure_unlocked(&opts).await.unwrap());
        assert!(!vault.ensure_unlocked(&opts).await.unwrap());
        assert_eq!(biometric.prompts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_change_secret() {
        let vault = manager();
        vault.create("old", PHRASE).await.unwrap();
        let (before, _) = vault.public_addresses(WalletId(0)).await.unwrap();

        assert!(matches!(
            vault.change_secret("wrong", "new").await,
            Err(Error::WrongSecret)
        ));

        vault.change_secret("old", "new").await.unwrap();
        vault.lock().await;
        assert!(matches!(
            vault.unlock_with_secret("old").await,
            Err(Error::WrongSecret)
        ));
        vault.unlock_with_secret("new").await.unwrap();

        let (after, _) = vault.public_addresses(WalletId(0)).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_corruption_needs_explicit_restore() {
        let store = Arc::new(MemorySecureStore::new());
        let vault = VaultManager::new(&config(), store.clone());
        vault.create("pw", PHRASE).await.unwrap();
        let backup = vault.export_backup().unwrap();

        let mut damaged = backup.clone();
        damaged.ciphertext = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            b"not the real ciphertext at all!!",
        );
        store.save(&damaged).unwrap();
        vault.lock().await;

        assert!(matches!(
            vault.unlock_with_secret("pw").await,
            Err(Error::VaultCorrupted(_))
        ));
        // Still corrupted: nothing repaired it
        assert!(matches!(
            vault.unlock_with_secret("pw").await,
            Err(Error::VaultCorrupted(_))
        ));

        vault
            .restore_from_backup(backup, RestoreConsent::confirmed_by_user())
            .await
            .unwrap();
        vault.unlock_with_secret("pw").await.unwrap();
    }

    #[tokio::test]
    async fn test_derive_key_per_chain() {
        let vault = manager();
        vault.import("pw", PHRASE).await.unwrap();

        let evm = vault.derive_key(Chain::Evm, WalletId(0)).await.unwrap();
        assert_eq!(
            evm.public_address(),
            "0x9858EfFD232B4033E47d90003D41EC34EcaEda94"
        );

        let sol = vault.derive_key(Chain::Solana, WalletId(0)).await.unwrap();
        assert!(matches!(sol, ChainKey::Solana(_)));
    }

    #[tokio::test]
    async fn test_remove() {
        let vault = manager();
        vault.create("pw", PHRASE).await.unwrap();
        vault.remove().await.unwrap();

        assert!(!vault.exists().unwrap());
        assert_eq!(vault.state().await, VaultState::Locked);
        assert!(matches!(vault.remove().await, Err(Error::VaultNotFound(_))));
    }
}
