//! Credential handoff: from a submitted pair to a joined, persisted network.
//!
//! Submissions land in a single pending slot. One worker at a time drains the
//! slot, so a second submission arriving mid-join replaces the pending pair
//! and is attempted after the current attempt ends. Only the attempt for the
//! most recent submission may persist its credentials.

use super::flags::JoinOutcome;
use super::gate::{self, GateDecision};
use super::reconnect::Mode;
use super::station::StationConfig;
use super::Inner;
use crate::ble::{GattEvent, WifiStatus, WifiStatusReply};
use crate::config::Credentials;
use crate::status::DeviceStatus;
use log::{debug, error, info, warn};
use std::net::Ipv4Addr;
use std::sync::Mutex;
use tokio::time;

/// Progress of the join worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Idle,
    /// Tearing down any current association.
    Stopping,
    Configuring,
    /// Connect request `attempt` (1 or 2) issued.
    Joining { attempt: u8 },
    AwaitingOutcome,
    Persisting,
    /// Join failed; dropping the pending credentials.
    Discarding,
}

/// Result of [`PendingSlot::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Submission {
    /// A join was in flight when the new pair arrived.
    pub replaced: bool,
    /// The caller must start a worker.
    pub start_worker: bool,
}

#[derive(Default)]
struct Pending {
    creds: Option<Credentials>,
    generation: u64,
    attempted: u64,
    worker_active: bool,
}

/// The most recently submitted, not yet discarded credentials.
#[derive(Default)]
pub(crate) struct PendingSlot {
    inner: Mutex<Pending>,
}

impl PendingSlot {
    pub fn submit(&self, creds: Credentials) -> Submission {
        let mut pending = crate::lock(&self.inner);
        let replaced = pending.worker_active;
        pending.creds = Some(creds);
        pending.generation += 1;
        let start_worker = !pending.worker_active;
        pending.worker_active = true;
        Submission {
            replaced,
            start_worker,
        }
    }

    /// Take the next unattempted submission, or retire the worker.
    pub fn next_attempt(&self) -> Option<(u64, Credentials)> {
        let mut pending = crate::lock(&self.inner);
        let next = match &pending.creds {
            Some(creds) if pending.generation != pending.attempted => {
                Some((pending.generation, creds.clone()))
            }
            _ => None,
        };
        match next {
            Some((generation, _)) => pending.attempted = generation,
            None => pending.worker_active = false,
        }
        next
    }

    pub fn is_current(&self, generation: u64) -> bool {
        crate::lock(&self.inner).generation == generation
    }

    /// Drop the credentials of `generation` unless they were superseded.
    pub fn discard(&self, generation: u64) {
        let mut pending = crate::lock(&self.inner);
        if pending.generation == generation {
            pending.creds = None;
        }
    }

    pub fn has_credentials(&self) -> bool {
        crate::lock(&self.inner).creds.is_some()
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Joined(Ipv4Addr),
    NoAddress,
    AddressUnreadable,
    Failed,
    Timeout,
    /// Configuration or start failed and has been reported.
    Aborted,
}

/// Drain the pending slot, one attempt at a time.
pub(crate) async fn join_worker(ctx: std::sync::Arc<Inner>) {
    while let Some((generation, creds)) = ctx.pending.next_attempt() {
        let _radio = ctx.radio.lock().await;
        let result = attempt(&ctx, &creds).await;
        finish(&ctx, generation, &creds, result);
        ctx.set_state(JoinState::Idle);
    }
    debug!("Join worker idle");
}

async fn attempt(ctx: &Inner, creds: &Credentials) -> Attempt {
    let config = &ctx.config;
    info!("Connecting to WiFi SSID: {}", creds.ssid());
    ctx.status.show(DeviceStatus::Joining);

    ctx.set_state(JoinState::Stopping);
    ctx.set_reconnect_mode(Mode::Suspended);
    ctx.flags.clear();
    if let Err(e) = ctx.station.stop() {
        warn!("WiFi stop failed (continuing): {}", e);
    }
    time::sleep(config.stop_settle).await;

    ctx.set_state(JoinState::Configuring);
    if let Err(e) = ctx.station.set_config(&StationConfig::from_credentials(creds)) {
        error!("Failed to set WiFi config: {}", e);
        ctx.reply(&WifiStatusReply::error("Failed to set WiFi config"));
        ctx.set_reconnect_mode(Mode::Background);
        return Attempt::Aborted;
    }
    {
        let mut policy = crate::lock(&ctx.reconnector);
        policy.reset();
        policy.set_mode(Mode::Worker);
    }
    if let Err(e) = ctx.station.start() {
        error!("Failed to start WiFi: {}", e);
        ctx.reply(&WifiStatusReply::error("Failed to start WiFi"));
        ctx.set_reconnect_mode(Mode::Background);
        return Attempt::Aborted;
    }
    time::sleep(config.start_settle).await;
    ctx.reply(&WifiStatusReply::new(WifiStatus::CredentialsReceived));

    ctx.set_state(JoinState::Joining { attempt: 1 });
    if let Err(e) = ctx.station.connect() {
        warn!("WiFi connect request failed: {}; retrying", e);
        time::sleep(config.retry_delay).await;
        ctx.set_state(JoinState::Joining { attempt: 2 });
        if let Err(e) = ctx.station.connect() {
            warn!("WiFi connect retry failed: {}; waiting on reconnection", e);
        }
    }

    ctx.set_state(JoinState::AwaitingOutcome);
    let outcome = ctx.flags.wait(config.join_timeout).await;
    ctx.set_reconnect_mode(Mode::Background);

    match outcome {
        JoinOutcome::Connected => {
            time::sleep(config.ip_grace).await;
            match ctx.station.ip_address() {
                Ok(Some(ip)) if !ip.is_unspecified() => Attempt::Joined(ip),
                Ok(_) => Attempt::NoAddress,
                Err(e) => {
                    error!("Failed to read station address: {}", e);
                    Attempt::AddressUnreadable
                }
            }
        }
        JoinOutcome::Failed => Attempt::Failed,
        JoinOutcome::Timeout => Attempt::Timeout,
    }
}

fn finish(ctx: &std::sync::Arc<Inner>, generation: u64, creds: &Credentials, result: Attempt) {
    let current = ctx.pending.is_current(generation);
    match result {
        Attempt::Joined(ip) => {
            info!("WiFi connected to {} with IP {}", creds.ssid(), ip);
            if !current {
                warn!("Joined with superseded credentials; not persisting");
                ctx.reply(&WifiStatusReply::new(WifiStatus::Connected));
                return;
            }
            ctx.set_state(JoinState::Persisting);
            match gate::commit_if_valid(ctx.store.as_ref(), creds, Some(ip)) {
                Ok(GateDecision::Persisted) => {}
                Ok(GateDecision::Skipped) => warn!("Credentials not persisted"),
                Err(e) => error!("Failed to save credentials: {}", e),
            }
            ctx.reply(&WifiStatusReply::new(WifiStatus::Connected));
            ctx.gatt_event(GattEvent::NetworkJoined);
            ctx.status.show(DeviceStatus::Joined);
        }
        Attempt::NoAddress => {
            error!("Connected but no valid IP received");
            ctx.set_state(JoinState::Discarding);
            ctx.reply(&WifiStatusReply::with_message(
                WifiStatus::Failed,
                "Connected but no IP assigned",
            ));
            if let Err(e) = ctx.station.disconnect() {
                warn!("WiFi disconnect failed: {}", e);
            }
            ctx.pending.discard(generation);
            ctx.status.show(DeviceStatus::JoinFailed);
        }
        Attempt::AddressUnreadable => {
            ctx.set_state(JoinState::Discarding);
            ctx.reply(&WifiStatusReply::error("Failed to get IP"));
            if let Err(e) = ctx.station.disconnect() {
                warn!("WiFi disconnect failed: {}", e);
            }
            ctx.pending.discard(generation);
            ctx.status.show(DeviceStatus::JoinFailed);
        }
        Attempt::Failed => {
            info!("Failed to connect to SSID: {}", creds.ssid());
            ctx.set_state(JoinState::Discarding);
            ctx.reply(&WifiStatusReply::new(WifiStatus::Failed));
            ctx.pending.discard(generation);
            ctx.status.show(DeviceStatus::JoinFailed);
        }
        Attempt::Timeout => {
            warn!("WiFi connection timeout for SSID: {}", creds.ssid());
            ctx.reply(&WifiStatusReply::with_message(
                WifiStatus::Timeout,
                "Connection timeout",
            ));
            ctx.status.show(DeviceStatus::JoinFailed);
        }
        Attempt::Aborted => ctx.status.show(DeviceStatus::JoinFailed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(ssid: &str) -> Credentials {
        Credentials::new(ssid, "secret123", None).unwrap()
    }

    // ==== Pending Slot Tests ====

    #[test]
    fn test_first_submit_starts_worker() {
        let slot = PendingSlot::default();
        let submission = slot.submit(creds("A"));
        assert!(submission.start_worker);
        assert!(!submission.replaced);
        assert!(slot.has_credentials());
    }

    #[test]
    fn test_submit_mid_join_replaces_without_new_worker() {
        let slot = PendingSlot::default();
        slot.submit(creds("A"));
        let (first, _) = slot.next_attempt().unwrap();

        let submission = slot.submit(creds("B"));
        assert!(submission.replaced);
        assert!(!submission.start_worker);
        assert!(!slot.is_current(first));

        let (second, next) = slot.next_attempt().unwrap();
        assert_eq!(next.ssid(), "B");
        assert!(slot.is_current(second));
        assert!(slot.next_attempt().is_none());
    }

    #[test]
    fn test_worker_retires_when_drained() {
        let slot = PendingSlot::default();
        slot.submit(creds("A"));
        slot.next_attempt().unwrap();
        assert!(slot.next_attempt().is_none());

        // Same pair again is a fresh submission.
        assert!(slot.submit(creds("A")).start_worker);
    }

    #[test]
    fn test_discard_ignores_superseded_generation() {
        let slot = PendingSlot::default();
        slot.submit(creds("A"));
        let (first, _) = slot.next_attempt().unwrap();
        slot.submit(creds("B"));

        slot.discard(first);
        assert!(slot.has_credentials());

        let (second, _) = slot.next_attempt().unwrap();
        slot.discard(second);
        assert!(!slot.has_credentials());
    }
}
