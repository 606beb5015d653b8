//! Network credentials submitted by the companion app.
//!
//! Platform-independent and host-testable.
//!
//! # Example
//!
//! ```
//! use wifi_provisioner_esp32::config::Credentials;
//!
//! let creds = Credentials::new("Home", "secret123", Some("AA:BB:CC:DD:EE:FF")).unwrap();
//! assert_eq!(creds.ssid(), "Home");
//! assert!(!creds.is_open());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum password length for WPA2 (64 hex characters for a raw PSK).
pub const MAX_PASSWORD_LEN: usize = 64;

/// Minimum password length for WPA2.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Credentials for joining an access point.
///
/// The password is zeroed when the value is dropped, so replacing a pending
/// credential never leaves the previous secret in memory.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    ssid: String,
    password: String,
    device_id: String,
}

impl Credentials {
    /// Create validated credentials.
    ///
    /// `device_id` is the identifier the app associated with this device; it
    /// is stored alongside the network credentials (empty when not supplied).
    pub fn new(
        ssid: impl Into<String>,
        password: impl Into<String>,
        device_id: Option<&str>,
    ) -> Result<Self, CredentialError> {
        let creds = Self {
            ssid: ssid.into(),
            password: password.into(),
            device_id: device_id.unwrap_or_default().to_string(),
        };
        creds.validate()?;
        Ok(creds)
    }

    /// Validate SSID and password lengths.
    pub fn validate(&self) -> Result<(), CredentialError> {
        if self.ssid.is_empty() {
            return Err(CredentialError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(CredentialError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }

        // Empty is accepted for open networks
        if !self.password.is_empty() && self.password.len() < MIN_PASSWORD_LEN {
            return Err(CredentialError::PasswordTooShort {
                len: self.password.len(),
                min: MIN_PASSWORD_LEN,
            });
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(CredentialError::PasswordTooLong {
                len: self.password.len(),
                max: MAX_PASSWORD_LEN,
            });
        }

        Ok(())
    }

    /// Network name.
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// Network secret.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Device id supplied with the credentials (empty if none).
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Check if this is an open network (no password).
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

// Never print the secret.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"****")
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Credentials as read back from durable storage.
///
/// Missing keys read as empty strings.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct StoredCredentials {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub device_id: String,
}

impl StoredCredentials {
    /// True when a network name has been stored.
    pub fn is_configured(&self) -> bool {
        !self.ssid.is_empty()
    }

    /// Convert into validated credentials, if a usable network is stored.
    pub fn to_credentials(&self) -> Option<Credentials> {
        if !self.is_configured() {
            return None;
        }
        let device_id = (!self.device_id.is_empty()).then_some(self.device_id.as_str());
        Credentials::new(self.ssid.clone(), self.password.clone(), device_id).ok()
    }
}

impl From<&Credentials> for StoredCredentials {
    fn from(creds: &Credentials) -> Self {
        Self {
            ssid: creds.ssid.clone(),
            password: creds.password.clone(),
            device_id: creds.device_id.clone(),
        }
    }
}

impl fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"****")
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Credential validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Password is too short for WPA2.
    PasswordTooShort { len: usize, min: usize },
    /// Password exceeds maximum length.
    PasswordTooLong { len: usize, max: usize },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PasswordTooShort { len, min } => {
                write!(f, "password too short: {} bytes (min {})", len, min)
            }
            Self::PasswordTooLong { len, max } => {
                write!(f, "password too long: {} bytes (max {})", len, max)
            }
        }
    }
}

impl std::error::Error for CredentialError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_credentials() {
        let creds = Credentials::new("TestNetwork", "password123", Some("dev")).unwrap();
        assert_eq!(creds.ssid(), "TestNetwork");
        assert_eq!(creds.password(), "password123");
        assert_eq!(creds.device_id(), "dev");
    }

    #[test]
    fn test_missing_device_id_is_empty() {
        let creds = Credentials::new("TestNetwork", "password123", None).unwrap();
        assert_eq!(creds.device_id(), "");
    }

    #[test]
    fn test_open_network() {
        let creds = Credentials::new("OpenNetwork", "", None).unwrap();
        assert!(creds.is_open());
    }

    #[test]
    fn test_empty_ssid() {
        let result = Credentials::new("", "password123", None);
        assert_eq!(result, Err(CredentialError::SsidEmpty));
    }

    #[test]
    fn test_ssid_length_bounds() {
        assert!(Credentials::new("a".repeat(32), "password123", None).is_ok());
        assert!(matches!(
            Credentials::new("a".repeat(33), "password123", None),
            Err(CredentialError::SsidTooLong { len: 33, max: 32 })
        ));
    }

    #[test]
    fn test_password_length_bounds() {
        assert!(matches!(
            Credentials::new("Net", "short", None),
            Err(CredentialError::PasswordTooShort { .. })
        ));
        assert!(Credentials::new("Net", "12345678", None).is_ok());
        assert!(Credentials::new("Net", "a".repeat(64), None).is_ok());
        assert!(matches!(
            Credentials::new("Net", "a".repeat(65), None),
            Err(CredentialError::PasswordTooLong { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("Home", "secret123", None).unwrap();
        let debug = format!("{:?}", creds);
        assert!(debug.contains("Home"));
        assert!(!debug.contains("secret123"));
    }

    #[test]
    fn test_stored_credentials_default_unconfigured() {
        let stored = StoredCredentials::default();
        assert!(!stored.is_configured());
        assert!(stored.to_credentials().is_none());
    }

    #[test]
    fn test_stored_credentials_convert() {
        let creds = Credentials::new("Home", "secret123", Some("AA:BB")).unwrap();
        let stored = StoredCredentials::from(&creds);
        assert!(stored.is_configured());
        assert_eq!(stored.to_credentials(), Some(creds));
    }

    #[test]
    fn test_stored_credentials_missing_keys_deserialize_empty() {
        let stored: StoredCredentials = serde_json::from_str(r#"{"ssid":"Home"}"#).unwrap();
        assert_eq!(stored.ssid, "Home");
        assert_eq!(stored.password, "");
        assert_eq!(stored.device_id, "");
    }
}
