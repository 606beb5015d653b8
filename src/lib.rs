//! Wi-Fi provisioning firmware library.
//!
//! A companion app connects over BLE, proves it knows the shared token,
//! and hands over network credentials as JSON. The device joins the network,
//! reports progress back over BLE, and persists the credentials only once the
//! join produced an address.
//!
//! Everything except the radio adapters ([`ble::NimbleLink`],
//! [`wifi::EspStation`], [`persistence`]) is platform-independent and tested
//! on the host.

// Allow the crate to reference itself by name (needed for proc-macro generated code)
extern crate self as wifi_provisioner_esp32;

pub mod ble;
pub mod config;
pub mod identity;
#[cfg(feature = "esp32")]
pub mod persistence;
#[cfg(not(feature = "esp32"))]
pub mod persistence_host;
pub mod provision;
pub mod status;
pub mod store;
#[cfg(test)]
mod test_support;
#[cfg(feature = "tap-tests")]
pub mod testing;
pub mod wifi;

use std::sync::{Mutex, MutexGuard, PoisonError};

// Re-export commonly used items
pub use config::{CredentialError, Credentials, ProvisionerConfig, StoredCredentials};
pub use identity::{DeviceIdentity, MacAddress};
pub use provision::{Collaborators, JoinOutcome, JoinState, NetworkEvent, Provisioner};
pub use status::{DeviceStatus, StatusSink};
pub use store::{CredentialStore, StoreError};

#[cfg(feature = "tap-tests")]
pub use testing::TestRunner;

/// Lock a mutex, taking the data even if a previous holder panicked.
///
/// Every critical section in this crate leaves its data consistent before
/// anything that can panic, so a poisoned lock carries no torn state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub(crate) fn prefix_within(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(feature = "esp32")]
static NVS_PARTITION: Mutex<Option<esp_idf_svc::nvs::EspDefaultNvsPartition>> = Mutex::new(None);

/// The default NVS partition, taken once and shared.
///
/// `EspNvsPartition::take()` fails on a second call, so every user of NVS
/// (Wi-Fi driver, credential store) goes through here.
#[cfg(feature = "esp32")]
pub fn get_nvs_default_partition(
) -> Result<esp_idf_svc::nvs::EspDefaultNvsPartition, esp_idf_sys::EspError> {
    let mut slot = lock(&NVS_PARTITION);
    if let Some(partition) = slot.as_ref() {
        return Ok(partition.clone());
    }
    let partition = esp_idf_svc::nvs::EspDefaultNvsPartition::take()?;
    *slot = Some(partition.clone());
    Ok(partition)
}

/// Link ESP-IDF patches once, for on-device tests that run without `main`'s setup.
#[cfg(all(feature = "esp32", feature = "tap-tests"))]
pub fn ensure_esp_initialized() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(esp_idf_sys::link_patches);
}
