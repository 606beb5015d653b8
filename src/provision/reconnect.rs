//! Always-on reconnection policy for the station interface.
//!
//! Disconnect reasons split into two classes. Authentication failure, access
//! point not found and beacon timeout cannot be fixed by retrying, so they
//! latch the failed flag and stop automatic retries. Anything else triggers a
//! reconnect until the retry budget runs out, at which point the failed flag
//! is latched too so that waiters resolve.

use super::flags::JoinFlags;
use log::{debug, error, info, warn};
use std::net::Ipv4Addr;

/// Beacon timeout.
pub const REASON_BEACON_TIMEOUT: u16 = 200;
/// No access point with the configured SSID.
pub const REASON_NO_AP_FOUND: u16 = 201;
/// Authentication failed (usually a wrong password).
pub const REASON_AUTH_FAIL: u16 = 202;

/// Events from the network stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    /// The station interface came up.
    StaStarted,
    /// The station lost or failed to establish association.
    Disconnected { reason: u16 },
    /// An address was leased.
    GotIp(Ipv4Addr),
    /// The leased address was withdrawn.
    LostIp,
}

/// True when retrying cannot help.
pub fn is_fast_fail(reason: u16) -> bool {
    matches!(
        reason,
        REASON_AUTH_FAIL | REASON_NO_AP_FOUND | REASON_BEACON_TIMEOUT
    )
}

/// Who issues connect requests after the station starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Connect on start if credentials exist; reconnect on disconnect.
    Background,
    /// A join worker issues the first connect itself; disconnects are still
    /// classified and retried.
    Worker,
    /// Ignore all events (scan or reconfiguration in progress).
    Suspended,
}

/// What the caller must do in response to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    Connect,
    None,
}

/// Reconnection state machine.
#[derive(Debug)]
pub struct Reconnector {
    mode: Mode,
    budget: u32,
    retries: u32,
}

impl Reconnector {
    pub fn new(budget: u32) -> Self {
        Self {
            mode: Mode::Background,
            budget,
            retries: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        debug!("Reconnect mode: {:?}", mode);
        self.mode = mode;
    }

    /// Restore the full retry budget.
    pub fn reset(&mut self) {
        self.retries = 0;
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Apply the policy to one event.
    ///
    /// `has_credentials` is only consulted for [`NetworkEvent::StaStarted`].
    pub fn on_event(
        &mut self,
        event: NetworkEvent,
        has_credentials: impl FnOnce() -> bool,
        flags: &JoinFlags,
    ) -> Reaction {
        if self.mode == Mode::Suspended {
            debug!("Ignoring {:?} while suspended", event);
            return Reaction::None;
        }

        match event {
            NetworkEvent::StaStarted => {
                if self.mode == Mode::Worker {
                    return Reaction::None;
                }
                if has_credentials() {
                    info!("Station started, connecting with known credentials");
                    Reaction::Connect
                } else {
                    info!("Station started, no credentials available");
                    flags.set_failed();
                    Reaction::None
                }
            }
            NetworkEvent::Disconnected { reason } if is_fast_fail(reason) => {
                match reason {
                    REASON_AUTH_FAIL => error!("WiFi authentication failed - check password"),
                    REASON_NO_AP_FOUND => error!("WiFi AP not found - check SSID"),
                    _ => error!("WiFi beacon timeout - AP too far or congested"),
                }
                self.retries = self.budget;
                flags.set_failed();
                Reaction::None
            }
            NetworkEvent::Disconnected { reason } => {
                if self.retries < self.budget {
                    self.retries += 1;
                    warn!(
                        "WiFi disconnected (reason {}), reconnect {}/{}",
                        reason, self.retries, self.budget
                    );
                    Reaction::Connect
                } else {
                    error!("WiFi disconnected (reason {}), retry budget exhausted", reason);
                    flags.set_failed();
                    Reaction::None
                }
            }
            NetworkEvent::GotIp(ip) => {
                info!("Got IP address: {}", ip);
                self.retries = 0;
                flags.set_connected();
                Reaction::None
            }
            NetworkEvent::LostIp => {
                warn!("Lost IP address");
                Reaction::None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disconnected(reason: u16) -> NetworkEvent {
        NetworkEvent::Disconnected { reason }
    }

    #[test]
    fn test_fast_fail_classification() {
        assert!(is_fast_fail(REASON_AUTH_FAIL));
        assert!(is_fast_fail(REASON_NO_AP_FOUND));
        assert!(is_fast_fail(REASON_BEACON_TIMEOUT));
        assert!(!is_fast_fail(8));
        assert!(!is_fast_fail(15));
    }

    #[test]
    fn test_start_connects_only_with_credentials() {
        let flags = JoinFlags::new();
        let mut policy = Reconnector::new(5);
        assert_eq!(policy.on_event(NetworkEvent::StaStarted, || true, &flags), Reaction::Connect);
        assert!(flags.is_mid_join());

        assert_eq!(policy.on_event(NetworkEvent::StaStarted, || false, &flags), Reaction::None);
        assert!(flags.snapshot().failed);
    }

    #[test]
    fn test_worker_mode_leaves_first_connect_to_worker() {
        let flags = JoinFlags::new();
        let mut policy = Reconnector::new(5);
        policy.set_mode(Mode::Worker);
        let reaction = policy.on_event(
            NetworkEvent::StaStarted,
            || panic!("credentials must not be consulted"),
            &flags,
        );
        assert_eq!(reaction, Reaction::None);
        assert!(flags.is_mid_join());
    }

    #[test]
    fn test_fast_fail_sets_failed_and_stops_retrying() {
        let flags = JoinFlags::new();
        let mut policy = Reconnector::new(5);
        assert_eq!(policy.on_event(disconnected(REASON_AUTH_FAIL), || true, &flags), Reaction::None);
        assert!(flags.snapshot().failed);

        flags.clear();
        assert_eq!(policy.on_event(disconnected(8), || true, &flags), Reaction::None);
        assert!(flags.snapshot().failed);
    }

    #[test]
    fn test_other_reasons_retry_until_budget() {
        let flags = JoinFlags::new();
        let mut policy = Reconnector::new(3);
        for _ in 0..3 {
            assert_eq!(policy.on_event(disconnected(8), || true, &flags), Reaction::Connect);
            assert!(flags.is_mid_join());
        }
        assert_eq!(policy.on_event(disconnected(8), || true, &flags), Reaction::None);
        assert!(flags.snapshot().failed);
    }

    #[test]
    fn test_got_ip_resets_budget() {
        let flags = JoinFlags::new();
        let mut policy = Reconnector::new(2);
        policy.on_event(disconnected(8), || true, &flags);
        policy.on_event(disconnected(8), || true, &flags);
        policy.on_event(NetworkEvent::GotIp(Ipv4Addr::new(192, 168, 1, 20)), || true, &flags);
        assert_eq!(policy.retries(), 0);
        assert!(flags.snapshot().connected);
        assert_eq!(policy.on_event(disconnected(8), || true, &flags), Reaction::Connect);
    }

    #[test]
    fn test_suspended_ignores_everything() {
        let flags = JoinFlags::new();
        let mut policy = Reconnector::new(5);
        policy.set_mode(Mode::Suspended);
        assert_eq!(policy.on_event(disconnected(REASON_AUTH_FAIL), || true, &flags), Reaction::None);
        assert_eq!(policy.on_event(NetworkEvent::StaStarted, || false, &flags), Reaction::None);
        assert!(flags.is_mid_join());
    }
}
