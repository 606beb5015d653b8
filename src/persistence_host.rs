//! Credential storage for host (simulator) builds.
//!
//! Keeps the three credential keys in a JSON file, by default
//! `~/.wifi-provisioner/credentials.json`.

use crate::config::{Credentials, StoredCredentials};
use crate::store::{CredentialStore, StoreError};
use log::{debug, info};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use zeroize::Zeroizing;

/// Returns `~/.wifi-provisioner/credentials.json`.
pub fn default_credentials_path() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home)
        .join(".wifi-provisioner")
        .join("credentials.json"))
}

/// [`CredentialStore`] over a JSON file.
pub struct FileCredentialStore {
    path: PathBuf,
    // Serializes write-then-verify sequences.
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at [`default_credentials_path`].
    pub fn open_default() -> Result<Self, StoreError> {
        default_credentials_path()
            .map(Self::new)
            .map_err(|e| StoreError::Open(e.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StoredCredentials, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => Zeroizing::new(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No credentials file at {:?}", self.path);
                return Ok(StoredCredentials::default());
            }
            Err(e) => return Err(StoreError::Read(e.to_string())),
        };
        serde_json::from_str(&text).map_err(|e| StoreError::Read(format!("corrupt file: {}", e)))
    }

    fn write(&self, stored: &StoredCredentials) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Write(e.to_string()))?;
        }
        let text = Zeroizing::new(
            serde_json::to_string_pretty(stored).map_err(|e| StoreError::Write(e.to_string()))?,
        );
        fs::write(&self.path, text.as_bytes()).map_err(|e| StoreError::Write(e.to_string()))
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<StoredCredentials, StoreError> {
        self.read()
    }

    fn save(&self, creds: &Credentials) -> Result<(), StoreError> {
        let _guard = crate::lock(&self.write_lock);
        let stored = StoredCredentials::from(creds);
        self.write(&stored)?;

        let read_back = self.read()?;
        if read_back.ssid != stored.ssid {
            return Err(StoreError::VerifyFailed {
                key: crate::store::KEY_SSID,
            });
        }
        if read_back.password != stored.password {
            return Err(StoreError::VerifyFailed {
                key: crate::store::KEY_PASSWORD,
            });
        }
        if read_back.device_id != stored.device_id {
            return Err(StoreError::VerifyFailed {
                key: crate::store::KEY_DEVICE_ID,
            });
        }

        info!("Credentials saved to {:?}", self.path);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = crate::lock(&self.write_lock);
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Write(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Unique file per test, even when tests run in parallel
    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        env::temp_dir()
            .join(format!("wifi-provisioner-test-{}-{}", pid, id))
            .join("credentials.json")
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let store = FileCredentialStore::new(unique_path());
        let loaded = store.load().unwrap();
        assert!(!loaded.is_configured());
        assert!(loaded.to_credentials().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let path = unique_path();
        let store = FileCredentialStore::new(&path);
        let creds = Credentials::new("HomeNet", "hunter22", Some("AA:BB:CC:DD:EE:FF")).unwrap();
        store.save(&creds).unwrap();

        let loaded = FileCredentialStore::new(&path).load().unwrap();
        assert_eq!(loaded.to_credentials(), Some(creds));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_clear_removes_file() {
        let path = unique_path();
        let store = FileCredentialStore::new(&path);
        store
            .save(&Credentials::new("HomeNet", "hunter22", None).unwrap())
            .unwrap();
        store.clear().unwrap();
        assert!(!path.exists());
        // Clearing twice is fine.
        store.clear().unwrap();

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_corrupt_file_is_read_error() {
        let path = unique_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();

        let result = FileCredentialStore::new(&path).load();
        assert!(matches!(result, Err(StoreError::Read(_))));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
