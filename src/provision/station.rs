//! Station-mode network driver interface.
//!
//! The network stack is vendor code; the provisioning core drives it through
//! [`StationDriver`] and learns about association and address events through
//! [`NetworkEvent`](super::reconnect::NetworkEvent).

use crate::config::Credentials;
use std::fmt;
use std::net::Ipv4Addr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Weakest authentication mode the station accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthThreshold {
    Open,
    #[default]
    Wpa2Personal,
}

/// Protected management frames setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmfConfig {
    pub capable: bool,
    pub required: bool,
}

/// Configuration applied to the station interface.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct StationConfig {
    pub ssid: String,
    pub password: String,
    #[zeroize(skip)]
    pub auth_threshold: AuthThreshold,
    #[zeroize(skip)]
    pub pmf: PmfConfig,
}

impl StationConfig {
    /// WPA2-personal threshold, or open for an empty password. PMF capable
    /// but not required.
    pub fn from_credentials(creds: &Credentials) -> Self {
        let auth_threshold = if creds.is_open() {
            AuthThreshold::Open
        } else {
            AuthThreshold::Wpa2Personal
        };
        Self {
            ssid: creds.ssid().to_string(),
            password: creds.password().to_string(),
            auth_threshold,
            pmf: PmfConfig {
                capable: true,
                required: false,
            },
        }
    }
}

impl fmt::Debug for StationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationConfig")
            .field("ssid", &self.ssid)
            .field("password", &"****")
            .field("auth_threshold", &self.auth_threshold)
            .field("pmf", &self.pmf)
            .finish()
    }
}

/// One scan result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: String,
    pub rssi: i8,
}

/// Network stack errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationError {
    /// The driver rejected the configuration.
    Config(String),
    /// The driver could not be started or stopped.
    Lifecycle(String),
    /// A connect or disconnect request failed synchronously.
    Connect(String),
    /// Scanning failed.
    Scan(String),
    /// The interface address could not be read.
    Address(String),
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration failed: {}", msg),
            Self::Lifecycle(msg) => write!(f, "start/stop failed: {}", msg),
            Self::Connect(msg) => write!(f, "connect request failed: {}", msg),
            Self::Scan(msg) => write!(f, "{}", msg),
            Self::Address(msg) => write!(f, "address unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StationError {}

/// Station-mode network driver.
///
/// Every method except [`scan`](StationDriver::scan) returns promptly; their
/// outcomes arrive later as network events.
pub trait StationDriver: Send + Sync {
    fn start(&self) -> Result<(), StationError>;

    fn stop(&self) -> Result<(), StationError>;

    fn set_config(&self, config: &StationConfig) -> Result<(), StationError>;

    /// Request association with the configured network.
    fn connect(&self) -> Result<(), StationError>;

    fn disconnect(&self) -> Result<(), StationError>;

    /// Address currently leased to the station, if any.
    fn ip_address(&self) -> Result<Option<Ipv4Addr>, StationError>;

    /// Blocking scan of all channels.
    fn scan(&self) -> Result<Vec<AccessPoint>, StationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_config_from_credentials() {
        let creds = Credentials::new("Home", "secret123", None).unwrap();
        let config = StationConfig::from_credentials(&creds);
        assert_eq!(config.ssid, "Home");
        assert_eq!(config.password, "secret123");
        assert_eq!(config.auth_threshold, AuthThreshold::Wpa2Personal);
        assert!(config.pmf.capable);
        assert!(!config.pmf.required);
    }

    #[test]
    fn test_open_network_uses_open_threshold() {
        let creds = Credentials::new("Cafe", "", None).unwrap();
        let config = StationConfig::from_credentials(&creds);
        assert_eq!(config.auth_threshold, AuthThreshold::Open);
        assert!(config.password.is_empty());
    }

    #[test]
    fn test_station_config_debug_redacts_password() {
        let creds = Credentials::new("Home", "secret123", None).unwrap();
        let debug = format!("{:?}", StationConfig::from_credentials(&creds));
        assert!(!debug.contains("secret123"));
    }
}
