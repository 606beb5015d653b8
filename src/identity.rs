//! Device identity derived from the factory MAC address.
//!
//! The identity is computed once at boot and never changes. The companion
//! app reads it through `get_deviceid` and checks it with `verify_device`.

use crate::config::ProvisionerConfig;
use std::fmt;

/// Maximum length of a BLE device name kept in the GAP name attribute.
const MAX_DEVICE_NAME_LEN: usize = 31;

/// Hardware (MAC) address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Create an address from raw bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of the address.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Read the factory-programmed station MAC from eFuse.
    #[cfg(feature = "esp32")]
    pub fn read_factory() -> Result<Self, esp_idf_sys::EspError> {
        let mut mac = [0u8; 6];
        esp_idf_sys::esp!(unsafe {
            esp_idf_sys::esp_read_mac(mac.as_mut_ptr(), esp_idf_sys::esp_mac_type_t_ESP_MAC_WIFI_STA)
        })?;
        Ok(Self(mac))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Immutable identity of this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    device_id: String,
    ble_name: String,
    device_type: String,
}

impl DeviceIdentity {
    /// Derive the identity from the hardware address.
    pub fn from_mac(mac: MacAddress, config: &ProvisionerConfig) -> Self {
        let device_id = mac.to_string();
        let full_name = format!("{}{}", config.name_prefix, device_id);
        let ble_name = crate::prefix_within(&full_name, MAX_DEVICE_NAME_LEN).to_string();
        Self {
            device_id,
            ble_name,
            device_type: config.device_type.clone(),
        }
    }

    /// Colon-separated upper-case MAC, e.g. `AA:BB:CC:DD:EE:FF`.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Name used in the scan response.
    pub fn ble_name(&self) -> &str {
        &self.ble_name
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// True when `candidate` names this device.
    pub fn matches(&self, candidate: &str) -> bool {
        self.device_id == candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: MacAddress = MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x0F]);

    #[test]
    fn test_mac_display() {
        assert_eq!(MAC.to_string(), "AA:BB:CC:DD:EE:0F");
    }

    #[test]
    fn test_identity_from_mac() {
        let identity = DeviceIdentity::from_mac(MAC, &ProvisionerConfig::default());
        assert_eq!(identity.device_id(), "AA:BB:CC:DD:EE:0F");
        assert_eq!(identity.ble_name(), "SE-16A-SW-AA:BB:CC:DD:EE:0F");
        assert_eq!(identity.device_type(), "AIOS_1");
    }

    #[test]
    fn test_long_prefix_truncates_name() {
        let config = ProvisionerConfig {
            name_prefix: "A-VERY-LONG-PRODUCT-PREFIX-".to_string(),
            ..Default::default()
        };
        let identity = DeviceIdentity::from_mac(MAC, &config);
        assert_eq!(identity.ble_name().len(), MAX_DEVICE_NAME_LEN);
        assert_eq!(identity.device_id(), "AA:BB:CC:DD:EE:0F");
    }

    #[test]
    fn test_multibyte_char_straddling_limit_is_dropped() {
        let config = ProvisionerConfig {
            name_prefix: "x".repeat(30) + "é",
            ..Default::default()
        };
        let identity = DeviceIdentity::from_mac(MAC, &config);
        assert_eq!(identity.ble_name(), "x".repeat(30));
    }

    #[test]
    fn test_matches_only_own_id() {
        let identity = DeviceIdentity::from_mac(MAC, &ProvisionerConfig::default());
        assert!(identity.matches("AA:BB:CC:DD:EE:0F"));
        assert!(!identity.matches("aa:bb:cc:dd:ee:0f"));
        assert!(!identity.matches(identity.ble_name()));
        assert!(!identity.matches(""));
    }
}
