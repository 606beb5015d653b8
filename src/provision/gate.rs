//! Persistence gate: credentials reach durable storage only once a join has
//! produced a usable address.

use crate::config::Credentials;
use crate::store::{CredentialStore, StoreError};
use log::info;
use std::net::Ipv4Addr;

/// Whether the gate wrote the credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Persisted,
    Skipped,
}

/// Save `creds` if `leased` is a non-zero address.
pub fn commit_if_valid(
    store: &dyn CredentialStore,
    creds: &Credentials,
    leased: Option<Ipv4Addr>,
) -> Result<GateDecision, StoreError> {
    match leased {
        Some(ip) if !ip.is_unspecified() => {
            store.save(creds)?;
            info!("Credentials for SSID {} saved after lease of {}", creds.ssid(), ip);
            Ok(GateDecision::Persisted)
        }
        _ => Ok(GateDecision::Skipped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;

    fn creds() -> Credentials {
        Credentials::new("Home", "secret123", Some("AA:BB:CC:DD:EE:FF")).unwrap()
    }

    #[test]
    fn test_persists_with_address() {
        let store = MemoryStore::new();
        let decision = commit_if_valid(&store, &creds(), Some(Ipv4Addr::new(10, 0, 0, 2))).unwrap();
        assert_eq!(decision, GateDecision::Persisted);
        let stored = store.load().unwrap();
        assert_eq!(stored.ssid, "Home");
        assert_eq!(stored.password, "secret123");
        assert_eq!(stored.device_id, "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_skips_without_address() {
        let store = MemoryStore::new();
        assert_eq!(commit_if_valid(&store, &creds(), None).unwrap(), GateDecision::Skipped);
        assert_eq!(
            commit_if_valid(&store, &creds(), Some(Ipv4Addr::UNSPECIFIED)).unwrap(),
            GateDecision::Skipped
        );
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn test_store_failure_propagates() {
        let store = MemoryStore::failing();
        let result = commit_if_valid(&store, &creds(), Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert!(matches!(result, Err(StoreError::Write(_))));
    }
}
