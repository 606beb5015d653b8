//! Provisioning configuration.
//!
//! [`ProvisionerConfig`] collects every tunable of the provisioning core:
//! protocol constants the companion app depends on, timing of the join
//! sequence, and the two policy switches that decide how strictly the
//! provisioning link is guarded.
//!
//! # Components
//!
//! - [`credentials`] - network credentials and their validation (host-testable)

mod credentials;

use std::time::Duration;

pub use credentials::{
    CredentialError, Credentials, StoredCredentials, MAX_PASSWORD_LEN, MAX_SSID_LEN,
    MIN_PASSWORD_LEN,
};

/// Maximum logical length of one attribute write, in bytes.
pub const DEFAULT_WRITE_CAPACITY: usize = 1024;

/// Shared-secret token accepted on the identity channel.
pub const DEFAULT_AUTH_TOKEN: &str = "BLAZE";

/// Device type tag reported by `get_deviceid`.
pub const DEFAULT_DEVICE_TYPE: &str = "AIOS_1";

/// Prefix of the advertised device name; the device id is appended.
pub const DEFAULT_NAME_PREFIX: &str = "SE-16A-SW-";

/// What to do with the link when pairing does not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingFailurePolicy {
    /// Log the failure and keep serving the peer unencrypted.
    #[default]
    KeepLink,
    /// Drop the link.
    Disconnect,
}

/// How the shared-secret token on the identity channel is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenGate {
    /// A token match is logged and has no other effect.
    #[default]
    LogOnly,
    /// Command-channel writes are ignored until the token has been seen on
    /// the current link.
    Enforce,
}

/// Tunables for the provisioning core.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Reassembly buffer capacity and maximum attribute value length.
    pub write_capacity: usize,
    /// Shared-secret token accepted on the identity channel.
    pub auth_token: String,
    /// Device type tag for identity replies.
    pub device_type: String,
    /// Advertised name prefix.
    pub name_prefix: String,
    /// Hard bound on waiting for a join outcome.
    pub join_timeout: Duration,
    /// Pause after stopping the station before reconfiguring it.
    pub stop_settle: Duration,
    /// Pause after starting the station before the first join request.
    pub start_settle: Duration,
    /// Pause between a failed join request and the single retry.
    pub retry_delay: Duration,
    /// How long to wait for an address lease once associated.
    pub ip_grace: Duration,
    /// Maximum networks listed in a scan reply.
    pub scan_max_entries: usize,
    /// Maximum serialized size of a scan reply, in bytes.
    pub scan_max_payload: usize,
    /// Scan attempts before reporting an error.
    pub scan_attempts: u32,
    /// Automatic reconnects before the background handler gives up.
    pub reconnect_budget: u32,
    pub pairing_failure: PairingFailurePolicy,
    pub token_gate: TokenGate,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            write_capacity: DEFAULT_WRITE_CAPACITY,
            auth_token: DEFAULT_AUTH_TOKEN.to_string(),
            device_type: DEFAULT_DEVICE_TYPE.to_string(),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            join_timeout: Duration::from_secs(30),
            stop_settle: Duration::from_secs(1),
            start_settle: Duration::from_secs(2),
            retry_delay: Duration::from_secs(2),
            ip_grace: Duration::from_secs(2),
            scan_max_entries: 15,
            scan_max_payload: 1000,
            scan_attempts: 3,
            reconnect_budget: 5,
            pairing_failure: PairingFailurePolicy::default(),
            token_gate: TokenGate::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_protocol_constants() {
        let config = ProvisionerConfig::default();
        assert_eq!(config.write_capacity, 1024);
        assert_eq!(config.auth_token, "BLAZE");
        assert_eq!(config.device_type, "AIOS_1");
        assert_eq!(config.join_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_default_policies_are_permissive() {
        let config = ProvisionerConfig::default();
        assert_eq!(config.pairing_failure, PairingFailurePolicy::KeepLink);
        assert_eq!(config.token_gate, TokenGate::LogOnly);
    }
}
