//! Credential storage in ESP32 Non-Volatile Storage (NVS).
//!
//! Credentials live as three string keys in the `storage` namespace, so
//! `configure-wifi` and the factory tooling can pre-seed them. Every write is
//! read back and compared, which catches flash failures that return success.
//!
//! # Security
//!
//! Development builds do not encrypt NVS. Production images should enable NVS
//! encryption, since the password is stored as plain text.
//!
//! # Usage
//!
//! ```ignore
//! use wifi_provisioner_esp32::persistence::NvsCredentialStore;
//! use wifi_provisioner_esp32::store::CredentialStore;
//!
//! let store = NvsCredentialStore::open()?;
//! if store.load()?.is_configured() {
//!     log::info!("Credentials present");
//! }
//! ```

use crate::config::{Credentials, StoredCredentials, MAX_PASSWORD_LEN, MAX_SSID_LEN};
use crate::store::{CredentialStore, StoreError, KEY_DEVICE_ID, KEY_PASSWORD, KEY_SSID};
use esp_idf_svc::nvs::{EspNvs, NvsDefault};
use log::{debug, info, warn};
use std::sync::Mutex;
use zeroize::Zeroizing;

/// NVS namespace shared with the provisioning tools.
pub const NVS_NAMESPACE: &str = "storage";

/// Largest value stored under any key, plus the terminating NUL.
const VALUE_BUF_LEN: usize = MAX_PASSWORD_LEN + 1;

const _: () = assert!(MAX_SSID_LEN < VALUE_BUF_LEN);

/// [`CredentialStore`] over an NVS namespace.
pub struct NvsCredentialStore {
    nvs: Mutex<EspNvs<NvsDefault>>,
}

impl NvsCredentialStore {
    /// Open the default namespace on the shared default partition.
    pub fn open() -> Result<Self, StoreError> {
        Self::open_namespace(NVS_NAMESPACE)
    }

    pub fn open_namespace(namespace: &str) -> Result<Self, StoreError> {
        let partition =
            crate::get_nvs_default_partition().map_err(|e| StoreError::Open(e.to_string()))?;
        let nvs = EspNvs::new(partition, namespace, true)
            .map_err(|e| StoreError::Open(format!("namespace '{}': {}", namespace, e)))?;
        Ok(Self {
            nvs: Mutex::new(nvs),
        })
    }
}

/// Read one key; a missing key reads as an empty string.
fn read_key(nvs: &EspNvs<NvsDefault>, key: &'static str) -> Result<String, StoreError> {
    let mut buf = Zeroizing::new([0u8; VALUE_BUF_LEN]);
    match nvs.get_str(key, &mut buf[..]) {
        Ok(Some(value)) => Ok(value.to_string()),
        Ok(None) => {
            debug!("NVS key '{}' not set", key);
            Ok(String::new())
        }
        Err(e) => Err(StoreError::Read(format!("{}: {}", key, e))),
    }
}

/// Write one key and read it back.
fn write_key(nvs: &mut EspNvs<NvsDefault>, key: &'static str, value: &str) -> Result<(), StoreError> {
    nvs.set_str(key, value)
        .map_err(|e| StoreError::Write(format!("{}: {}", key, e)))?;

    let read_back = Zeroizing::new(read_key(nvs, key)?);
    if read_back.as_str() != value {
        log::error!("NVS verification failed for key '{}'", key);
        return Err(StoreError::VerifyFailed { key });
    }
    Ok(())
}

impl CredentialStore for NvsCredentialStore {
    fn load(&self) -> Result<StoredCredentials, StoreError> {
        let nvs = crate::lock(&self.nvs);
        Ok(StoredCredentials {
            ssid: read_key(&nvs, KEY_SSID)?,
            password: read_key(&nvs, KEY_PASSWORD)?,
            device_id: read_key(&nvs, KEY_DEVICE_ID)?,
        })
    }

    fn save(&self, creds: &Credentials) -> Result<(), StoreError> {
        let mut nvs = crate::lock(&self.nvs);
        write_key(&mut nvs, KEY_SSID, creds.ssid())?;
        write_key(&mut nvs, KEY_PASSWORD, creds.password())?;
        write_key(&mut nvs, KEY_DEVICE_ID, creds.device_id())?;
        info!("Credentials for SSID {} saved and verified in NVS", creds.ssid());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut nvs = crate::lock(&self.nvs);
        for key in [KEY_SSID, KEY_PASSWORD, KEY_DEVICE_ID] {
            nvs.remove(key)
                .map_err(|e| StoreError::Write(format!("{}: {}", key, e)))?;
        }
        warn!("Stored WiFi credentials cleared");
        Ok(())
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use crate::testing::TestResult;
    use wifi_provisioner_esp32_macros::tap_test;

    const TEST_NAMESPACE: &str = "prov_test";

    fn store() -> Result<NvsCredentialStore, StoreError> {
        crate::ensure_esp_initialized();
        NvsCredentialStore::open_namespace(TEST_NAMESPACE)
    }

    #[tap_test]
    fn nvs_store_opens() -> TestResult {
        store()?;
        Ok(())
    }

    #[tap_test]
    fn nvs_store_round_trips() -> TestResult {
        let store = store()?;
        let creds = Credentials::new("TestNet", "password123", Some("AA:BB:CC:DD:EE:FF"))?;
        store.save(&creds)?;

        let loaded = store.load()?;
        assert_eq!(loaded.ssid, "TestNet");
        assert_eq!(loaded.password, "password123");
        assert_eq!(loaded.device_id, "AA:BB:CC:DD:EE:FF");
        Ok(())
    }

    #[tap_test]
    fn nvs_store_max_length_values() -> TestResult {
        let store = store()?;
        let ssid = "s".repeat(MAX_SSID_LEN);
        let password = "p".repeat(MAX_PASSWORD_LEN);
        store.save(&Credentials::new(ssid.as_str(), password.as_str(), None)?)?;

        let loaded = store.load()?;
        assert_eq!(loaded.ssid, ssid);
        assert_eq!(loaded.password, password);
        Ok(())
    }

    #[tap_test]
    fn nvs_store_clear_reads_empty() -> TestResult {
        let store = store()?;
        store.save(&Credentials::new("TestNet", "password123", None)?)?;
        store.clear()?;

        let loaded = store.load()?;
        assert!(!loaded.is_configured());
        assert!(loaded.password.is_empty());
        Ok(())
    }
}
