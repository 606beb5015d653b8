//! Durable credential storage interface.
//!
//! Implemented over NVS on the device ([`crate::persistence`]) and over a
//! JSON file on the host ([`crate::persistence_host`]).

use crate::config::{Credentials, StoredCredentials};
use std::fmt;

/// Key for the network name.
pub const KEY_SSID: &str = "ssid";
/// Key for the network secret.
pub const KEY_PASSWORD: &str = "password";
/// Key for the device id supplied with the credentials.
pub const KEY_DEVICE_ID: &str = "device_id";

/// Persistent key-value storage for network credentials.
pub trait CredentialStore: Send + Sync {
    /// Read stored credentials; absent keys read as empty strings.
    fn load(&self) -> Result<StoredCredentials, StoreError>;

    /// Write all three keys and verify them.
    fn save(&self, creds: &Credentials) -> Result<(), StoreError>;

    /// Remove all keys.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The storage backend could not be opened.
    Open(String),
    Read(String),
    Write(String),
    /// Data read back after a write differs from what was written.
    VerifyFailed { key: &'static str },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(msg) => write!(f, "failed to open storage: {}", msg),
            Self::Read(msg) => write!(f, "storage read failed: {}", msg),
            Self::Write(msg) => write!(f, "storage write failed: {}", msg),
            Self::VerifyFailed { key } => write!(f, "read-back mismatch for key '{}'", key),
        }
    }
}

impl std::error::Error for StoreError {}
