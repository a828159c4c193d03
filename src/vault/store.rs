//! Platform secure storage for vault records
//!
//! The vault manager only sees the [`SecureStore`] trait. The file store is
//! the desktop backend; a platform keystore slots in behind the same trait.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::record::VaultRecord;

/// Storage backend for sealed vault records
pub trait SecureStore: Send + Sync {
    fn load(&self, vault_id: &str) -> Result<Option<VaultRecord>>;

    /// Atomically replace the record for `record.vault_id`
    fn save(&self, record: &VaultRecord) -> Result<()>;

    /// Remove the record; returns false if none existed
    fn delete(&self, vault_id: &str) -> Result<bool>;

    fn exists(&self, vault_id: &str) -> Result<bool> {
        Ok(self.load(vault_id)?.is_some())
    }
}

/// One JSON file per vault, owner-only permissions
pub struct FileSecureStore {
    dir: PathBuf,
}

impl FileSecureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Io(format!("Failed to create {}: {}", dir.display(), e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            if let Err(e) = std::fs::set_permissions(&dir, perms) {
                warn!("Could not restrict vault directory permissions: {}", e);
            }
        }

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, vault_id: &str) -> Result<PathBuf> {
        if vault_id.is_empty()
            || !vault_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Config(format!("Invalid vault id: {:?}", vault_id)));
        }
        Ok(self.dir.join(format!("{}.vault.json", vault_id)))
    }
}

impl SecureStore for FileSecureStore {
    fn load(&self, vault_id: &str) -> Result<Option<VaultRecord>> {
        let path = self.path_for(vault_id)?;
        if !path.exists() {
            return Ok(None);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    warn!(
                        "Vault file {} has insecure permissions {:o}. Run 'chmod 600 {}'",
                        vault_id,
                        mode & 0o777,
                        path.display()
                    );
                }
            }
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Io(format!("Failed to read vault {}: {}", vault_id, e)))?;

        let record = serde_json::from_str::<VaultRecord>(&content)
            .map_err(|e| Error::VaultCorrupted(format!("unreadable vault file: {}", e)))?;

        debug!("Loaded vault record {}", vault_id);
        Ok(Some(record))
    }

    fn save(&self, record: &VaultRecord) -> Result<()> {
        let path = self.path_for(&record.vault_id)?;
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        #[cfg(not(unix))]
        std::fs::write(&tmp, json.as_bytes())?;

        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::Io(format!("Failed to replace vault file: {}", e)))?;

        debug!("Saved vault record {}", record.vault_id);
        Ok(())
    }

    fn delete(&self, vault_id: &str) -> Result<bool> {
        let path = self.path_for(vault_id)?;
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)?;
        Ok(true)
    }
}

/// In-process store for tests and ephemeral wallets
#[derive(Default)]
pub struct MemorySecureStore {
    records: DashMap<String, VaultRecord>,
}

impl MemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStore for MemorySecureStore {
    fn load(&self, vault_id: &str) -> Result<Option<VaultRecord>> {
        Ok(self.records.get(vault_id).map(|r| r.clone()))
    }

    fn save(&self, record: &VaultRecord) -> Result<()> {
        self.records
            .insert(record.vault_id.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, vault_id: &str) -> Result<bool> {
        Ok(self.records.remove(vault_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(vault_id: &str) -> VaultRecord {
        VaultRecord::seal(vault_id, "pw", b"seed", 1_000).unwrap().0
    }

    #[test]
    fn test_file_store_save_load_delete() {
        let dir = tempdir().unwrap();
        let store = FileSecureStore::new(dir.path()).unwrap();

        assert!(store.load("main").unwrap().is_none());

        let record = sample("main");
        store.save(&record).unwrap();
        assert_eq!(store.load("main").unwrap(), Some(record));
        assert!(store.exists("main").unwrap());

        assert!(store.delete("main").unwrap());
        assert!(!store.delete("main").unwrap());
        assert!(store.load("main").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = FileSecureStore::new(dir.path()).unwrap();
        store.save(&sample("main")).unwrap();

        let mode = std::fs::metadata(dir.path().join("main.vault.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_rejects_path_tricks() {
        let dir = tempdir().unwrap();
        let store = FileSecureStore::new(dir.path()).unwrap();
        assert!(store.load("../etc/passwd").is_err());
        assert!(store.load("").is_err());
    }

    #[test]
    fn test_garbage_file_is_corruption() {
        let dir = tempdir().unwrap();
        let store = FileSecureStore::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("main.vault.json"), "{not json").unwrap();

        assert!(matches!(store.load("main"), Err(Error::VaultCorrupted(_))));
    }

    #[test]
    fn test_memory_store() {
        let store = MemorySecureStore::new();
        store.save(&sample("a")).unwrap();
        assert!(store.exists("a").unwrap());
        assert!(!store.exists("b").unwrap());
        assert!(store.delete("a").unwrap());
    }
}
