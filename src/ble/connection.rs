//! Advertising, connection and link-security state.
//!
//! The device serves a single peer at a time. [`Session`] tracks that peer
//! and the per-link flags; the advertising and security parameters are
//! plain data handed to the BLE stack at startup.

use super::registry::Channel;
use crate::identity::MacAddress;

/// Maximum size of an advertising or scan-response payload.
pub const MAX_ADV_LEN: usize = 31;

/// Name for the scan response, cut to what fits beside its AD header.
///
/// The service UUID fills the primary advertisement, so the name travels
/// in the scan response on its own.
pub fn advertised_name(name: &str) -> &str {
    crate::prefix_within(name, MAX_ADV_LEN - 2)
}

/// Advertising interval and mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisingParams {
    /// Minimum interval in 0.625 ms units.
    pub interval_min: u16,
    /// Maximum interval in 0.625 ms units.
    pub interval_max: u16,
    /// Connectable undirected advertising.
    pub connectable: bool,
}

impl Default for AdvertisingParams {
    fn default() -> Self {
        Self {
            interval_min: 0x20,
            interval_max: 0x40,
            connectable: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCapability {
    DisplayOnly,
    DisplayYesNo,
    KeyboardOnly,
    NoInputNoOutput,
    KeyboardDisplay,
}

/// Keys distributed during bonding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDistribution {
    pub encryption: bool,
    pub identity: bool,
}

/// Pairing parameters requested from the security manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityParams {
    pub secure_connections: bool,
    pub mitm: bool,
    pub bonding: bool,
    pub io_capability: IoCapability,
    pub max_key_size: u8,
    pub initiator_keys: KeyDistribution,
    pub responder_keys: KeyDistribution,
}

impl Default for SecurityParams {
    fn default() -> Self {
        let keys = KeyDistribution {
            encryption: true,
            identity: true,
        };
        Self {
            secure_connections: true,
            mitm: true,
            bonding: true,
            io_capability: IoCapability::NoInputNoOutput,
            max_key_size: 16,
            initiator_keys: keys,
            responder_keys: keys,
        }
    }
}

/// The connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub conn_id: u16,
    pub peer: MacAddress,
}

/// Client subscription state for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subscription {
    #[default]
    None,
    Notify,
    Indicate,
}

/// Per-device BLE state.
#[derive(Debug, Default)]
pub struct Session {
    connection: Option<ConnectionHandle>,
    authenticated: bool,
    token_seen: bool,
    network_joined: bool,
    advertising: bool,
    subscriptions: [Subscription; 2],
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new peer. Returns the peer it replaced, if any.
    pub fn connect(&mut self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = self.connection.replace(handle);
        self.authenticated = false;
        self.token_seen = false;
        self.subscriptions = Default::default();
        // The stack stops advertising when a peer connects
        self.advertising = false;
        previous
    }

    /// Clear all per-link state. Returns the peer that left.
    pub fn disconnect(&mut self) -> Option<ConnectionHandle> {
        self.authenticated = false;
        self.token_seen = false;
        self.subscriptions = Default::default();
        self.connection.take()
    }

    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn set_token_seen(&mut self) {
        self.token_seen = true;
    }

    pub fn token_seen(&self) -> bool {
        self.token_seen
    }

    pub fn set_network_joined(&mut self) {
        self.network_joined = true;
    }

    pub fn is_network_joined(&self) -> bool {
        self.network_joined
    }

    pub fn set_advertising(&mut self, advertising: bool) {
        self.advertising = advertising;
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    /// Advertising resumes after a disconnect until the device has joined a network.
    pub fn should_advertise(&self) -> bool {
        !self.network_joined && !self.advertising && self.connection.is_none()
    }

    pub fn subscribe(&mut self, channel: Channel, subscription: Subscription) {
        self.subscriptions[channel.index()] = subscription;
    }

    pub fn subscription(&self, channel: Channel) -> Subscription {
        self.subscriptions[channel.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: ConnectionHandle = ConnectionHandle {
        conn_id: 1,
        peer: MacAddress::new([1, 2, 3, 4, 5, 6]),
    };

    // ==== Advertising Tests ====

    #[test]
    fn test_advertised_name_fits_unchanged() {
        assert_eq!(
            advertised_name("SE-16A-SW-AA:BB:CC:DD:EE:FF"),
            "SE-16A-SW-AA:BB:CC:DD:EE:FF"
        );
    }

    #[test]
    fn test_advertised_name_shortened_on_char_boundary() {
        let name = "N".repeat(40);
        assert_eq!(advertised_name(&name).len(), MAX_ADV_LEN - 2);

        let name = format!("{}é", "N".repeat(28));
        assert_eq!(advertised_name(&name), "N".repeat(28));
    }

    #[test]
    fn test_default_params() {
        let adv = AdvertisingParams::default();
        assert_eq!((adv.interval_min, adv.interval_max), (0x20, 0x40));
        let sec = SecurityParams::default();
        assert!(sec.secure_connections && sec.mitm && sec.bonding);
        assert_eq!(sec.io_capability, IoCapability::NoInputNoOutput);
        assert_eq!(sec.max_key_size, 16);
    }

    // ==== Session Tests ====

    #[test]
    fn test_disconnect_clears_link_state() {
        let mut session = Session::new();
        session.connect(PEER);
        session.set_authenticated(true);
        session.set_token_seen();
        session.subscribe(Channel::Command, Subscription::Notify);

        assert_eq!(session.disconnect(), Some(PEER));
        assert!(!session.is_connected());
        assert!(!session.is_authenticated());
        assert!(!session.token_seen());
        assert_eq!(session.subscription(Channel::Command), Subscription::None);
        assert!(session.should_advertise());
    }

    #[test]
    fn test_no_advertising_after_join() {
        let mut session = Session::new();
        session.connect(PEER);
        session.set_network_joined();
        session.disconnect();
        assert!(!session.should_advertise());
    }

    #[test]
    fn test_second_connect_replaces_peer() {
        let mut session = Session::new();
        session.connect(PEER);
        session.set_authenticated(true);
        let other = ConnectionHandle {
            conn_id: 2,
            ..PEER
        };
        assert_eq!(session.connect(other), Some(PEER));
        assert_eq!(session.connection(), Some(other));
        assert!(!session.is_authenticated());
    }
}
