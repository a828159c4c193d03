//! Encrypted seed vault
//!
//! Holds the master mnemonic sealed at rest and releases chain keys only
//! while an unlock key is cached.

pub mod derivation;
pub mod manager;
pub mod record;
pub mod store;

pub use derivation::{generate_mnemonic, EvmKey};
pub use manager::{
    BiometricProvider, ChainKey, EvictionReason, RestoreConsent, UnlockOptions, VaultManager,
    VaultState,
};
pub use record::{VaultRecord, VAULT_VERSION};
pub use store::{FileSecureStore, MemorySecureStore, SecureStore};
