//! Network provisioning core.
//!
//! [`Provisioner`] owns the GATT server state machine and carries out its
//! effects against the BLE link and the station driver. It accepts two event
//! streams: BLE stack events via [`Provisioner::on_gatt_event`] and network
//! stack events via [`Provisioner::on_network_event`].
//!
//! Joins and scans run as tasks on the runtime handle given at construction,
//! so both event entry points return without waiting on the radio. The radio
//! itself is shared: a join attempt and a scan never overlap.

mod flags;
mod gate;
mod handoff;
mod reconnect;
mod scan;
mod station;

pub use flags::{FlagState, JoinFlags, JoinOutcome};
pub use gate::{commit_if_valid, GateDecision};
pub use handoff::JoinState;
pub use reconnect::{
    is_fast_fail, Mode, NetworkEvent, Reaction, Reconnector, REASON_AUTH_FAIL,
    REASON_BEACON_TIMEOUT, REASON_NO_AP_FOUND,
};
pub use station::{AccessPoint, AuthThreshold, PmfConfig, StationConfig, StationDriver, StationError};

use crate::ble::{
    BleLink, Channel, Effect, GattEvent, GattServer, GattStatus, LinkError, Outbound,
    WifiStatusReply,
};
use crate::config::{Credentials, ProvisionerConfig};
use crate::identity::DeviceIdentity;
use crate::status::{DeviceStatus, StatusSink};
use crate::store::CredentialStore;
use handoff::PendingSlot;
use log::{debug, info, warn};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

/// Platform services the provisioner drives.
pub struct Collaborators {
    pub link: Arc<dyn BleLink>,
    pub station: Arc<dyn StationDriver>,
    pub store: Arc<dyn CredentialStore>,
    pub status: Arc<dyn StatusSink>,
}

/// Shared provisioning context.
pub(crate) struct Inner {
    config: ProvisionerConfig,
    server: Mutex<GattServer>,
    outbound: Outbound,
    station: Arc<dyn StationDriver>,
    store: Arc<dyn CredentialStore>,
    status: Arc<dyn StatusSink>,
    flags: JoinFlags,
    reconnector: Mutex<Reconnector>,
    pending: PendingSlot,
    /// Held for the duration of a join attempt or a scan.
    radio: tokio::sync::Mutex<()>,
    state: watch::Sender<JoinState>,
    workers: watch::Sender<usize>,
    runtime: Handle,
}

/// Handle to the provisioning core. Cheap to clone.
#[derive(Clone)]
pub struct Provisioner {
    inner: Arc<Inner>,
}

impl Provisioner {
    /// `runtime` runs join and scan tasks; event callbacks may arrive on
    /// threads outside it.
    pub fn new(
        config: ProvisionerConfig,
        identity: DeviceIdentity,
        parts: Collaborators,
        runtime: Handle,
    ) -> Self {
        info!(
            "Provisioner for {} ({}) advertising as {}",
            identity.device_id(),
            identity.device_type(),
            identity.ble_name()
        );
        parts.status.show(DeviceStatus::Booting);

        let server = GattServer::new(&config, identity);
        let reconnector = Reconnector::new(config.reconnect_budget);
        let (state, _) = watch::channel(JoinState::Idle);
        let (workers, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                config,
                server: Mutex::new(server),
                outbound: Outbound::new(parts.link),
                station: parts.station,
                store: parts.store,
                status: parts.status,
                flags: JoinFlags::new(),
                reconnector: Mutex::new(reconnector),
                pending: PendingSlot::default(),
                radio: tokio::sync::Mutex::new(()),
                state,
                workers,
                runtime,
            }),
        }
    }

    /// Feed one BLE stack event; returns the status for its write response.
    pub fn on_gatt_event(&self, event: GattEvent) -> GattStatus {
        self.inner.gatt_event(event)
    }

    /// Feed one network stack event.
    pub fn on_network_event(&self, event: NetworkEvent) {
        self.inner.network_event(event);
    }

    /// Forward network events from `events` until the sender goes away.
    pub async fn pump_network_events(self, mut events: mpsc::UnboundedReceiver<NetworkEvent>) {
        while let Some(event) = events.recv().await {
            self.on_network_event(event);
        }
        debug!("Network event stream closed");
    }

    /// Hand credentials to the join worker.
    pub fn submit(&self, creds: Credentials) {
        self.inner.submit(creds);
    }

    /// Start a scan whose report is pushed on the command channel.
    pub fn spawn_scan(&self) {
        self.inner.spawn_scan();
    }

    /// Boot path: start the station with stored credentials, if any, and wait
    /// for the first join to resolve.
    ///
    /// Advertising is left running whatever the outcome.
    pub async fn resume_stored(&self) -> JoinOutcome {
        let ctx = &self.inner;
        let stored = match ctx.store.load() {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Failed to read stored credentials: {}", e);
                Default::default()
            }
        };
        let creds = stored.to_credentials();

        {
            let _radio = ctx.radio.lock().await;
            match &creds {
                Some(creds) => {
                    info!("Stored credentials found for SSID: {}", creds.ssid());
                    if let Err(e) = ctx.station.set_config(&StationConfig::from_credentials(creds)) {
                        warn!("Failed to apply stored WiFi config: {}", e);
                        ctx.flags.set_failed();
                    }
                }
                None => {
                    info!("No stored WiFi credentials");
                    ctx.flags.set_failed();
                }
            }
            ctx.set_reconnect_mode(Mode::Background);
            if let Err(e) = ctx.station.start() {
                warn!("Failed to start WiFi: {}", e);
                ctx.flags.set_failed();
            }
        }

        if creds.is_none() {
            return JoinOutcome::Failed;
        }
        ctx.status.show(DeviceStatus::Joining);
        let outcome = ctx.flags.wait(ctx.config.join_timeout).await;
        match outcome {
            JoinOutcome::Connected => {
                info!("Joined stored network");
                ctx.status.show(DeviceStatus::Joined);
            }
            _ => {
                warn!("Stored network join ended with {:?}", outcome);
                ctx.status.show(DeviceStatus::JoinFailed);
            }
        }
        outcome
    }

    /// Wait until no join or scan task is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.workers.subscribe();
        let _ = rx.wait_for(|running| *running == 0).await;
    }

    pub fn join_state(&self) -> JoinState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_join_state(&self) -> watch::Receiver<JoinState> {
        self.inner.state.subscribe()
    }

    pub fn flags(&self) -> &JoinFlags {
        &self.inner.flags
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.inner.config
    }

    pub fn identity(&self) -> DeviceIdentity {
        crate::lock(&self.inner.server).identity().clone()
    }

    /// True once provisioned credentials produced an address.
    pub fn is_network_joined(&self) -> bool {
        crate::lock(&self.inner.server).session().is_network_joined()
    }
}

impl Inner {
    fn gatt_event(self: &Arc<Self>, event: GattEvent) -> GattStatus {
        if matches!(event, GattEvent::Connected { .. }) {
            self.status.show(DeviceStatus::PeerConnected);
        }

        let effects = crate::lock(&self.server).handle(event);
        let mut status = GattStatus::Ok;
        for effect in effects {
            if let Effect::Respond { status: s, .. } = &effect {
                status = *s;
            }
            self.apply(effect);
        }
        status
    }

    fn apply(self: &Arc<Self>, effect: Effect) {
        let link = self.outbound.link();
        let result = match effect {
            Effect::StartService => link.start_service(),
            Effect::StartAdvertising => {
                self.status.show(DeviceStatus::Advertising);
                link.start_advertising()
            }
            Effect::StopAdvertising => link.stop_advertising(),
            Effect::RequestEncryption { peer } => link.request_encryption(peer),
            Effect::Disconnect { conn_id } => link.disconnect(conn_id),
            Effect::Respond {
                conn_id,
                trans_id,
                status,
                echo,
            } => link.respond(conn_id, trans_id, status, echo.as_ref()),
            Effect::Notify {
                channel,
                payload,
                confirm,
            } => {
                self.send(channel, &payload, confirm);
                Ok(())
            }
            Effect::Scan => {
                self.spawn_scan();
                Ok(())
            }
            Effect::Submit(creds) => {
                self.submit(creds);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("BLE command failed: {}", e);
        }
    }

    fn network_event(&self, event: NetworkEvent) {
        let reaction = crate::lock(&self.reconnector).on_event(
            event,
            || self.has_credentials(),
            &self.flags,
        );
        if reaction == Reaction::Connect {
            if let Err(e) = self.station.connect() {
                warn!("WiFi connect request failed: {}", e);
            }
        }
    }

    fn has_credentials(&self) -> bool {
        self.pending.has_credentials()
            || self.store.load().map(|s| s.is_configured()).unwrap_or(false)
    }

    fn submit(self: &Arc<Self>, creds: Credentials) {
        info!("Credentials received for SSID: {}", creds.ssid());
        let submission = self.pending.submit(creds);
        if submission.replaced {
            warn!("Join in progress; newer credentials will be tried next");
        }
        if submission.start_worker {
            self.spawn_worker(handoff::join_worker(self.clone()));
        }
    }

    fn spawn_scan(self: &Arc<Self>) {
        self.spawn_worker(scan::scan_worker(self.clone()));
    }

    fn spawn_worker<F>(self: &Arc<Self>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.workers.send_modify(|running| *running += 1);
        let ctx = self.clone();
        self.runtime.spawn(async move {
            task.await;
            ctx.workers.send_modify(|running| *running -= 1);
        });
    }

    /// Push a value on `channel` to the connected client, if any.
    fn send(&self, channel: Channel, payload: &[u8], confirm: bool) {
        let connection = crate::lock(&self.server).session().connection();
        match self.outbound.send(connection, channel, payload, confirm) {
            Ok(()) => {}
            Err(LinkError::NotConnected) => {
                debug!("No client connected; dropping {} byte {} value", payload.len(), channel)
            }
            Err(e) => warn!("Failed to send on {} channel: {}", channel, e),
        }
    }

    fn reply(&self, reply: &WifiStatusReply) {
        self.send(Channel::Command, &crate::ble::messages::to_payload(reply), false);
    }

    fn set_state(&self, state: JoinState) {
        debug!("Join state: {:?}", state);
        self.state.send_replace(state);
    }

    fn set_reconnect_mode(&self, mode: Mode) {
        crate::lock(&self.reconnector).set_mode(mode);
    }
}
