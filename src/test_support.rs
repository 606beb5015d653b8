//! In-memory collaborators for unit tests.

use crate::ble::server::WriteEcho;
use crate::ble::{BleLink, Channel, GattStatus, LinkError};
use crate::config::{Credentials, StoredCredentials};
use crate::identity::MacAddress;
use crate::provision::{AccessPoint, JoinFlags, NetworkEvent, StationConfig, StationDriver, StationError};
use crate::status::{DeviceStatus, StatusSink};
use crate::store::{CredentialStore, StoreError};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use tokio::sync::mpsc;

// ==== Link ====

/// Link calls other than notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    StartService,
    StartAdvertising,
    StopAdvertising,
    RequestEncryption(MacAddress),
    Disconnect(u16),
    Respond { trans_id: u32, status: GattStatus },
}

/// Records every call made through [`BleLink`].
#[derive(Default)]
pub struct RecordingLink {
    sent: Mutex<Vec<(Channel, Vec<u8>)>>,
    calls: Mutex<Vec<LinkCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(Channel, Vec<u8>)> {
        crate::lock(&self.sent).clone()
    }

    /// Parsed JSON bodies pushed on the command channel.
    pub fn replies(&self) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter(|(channel, _)| *channel == Channel::Command)
            .filter_map(|(_, payload)| serde_json::from_slice(&payload).ok())
            .collect()
    }

    /// `wifi_status` fields of the command channel replies, in order.
    pub fn statuses(&self) -> Vec<String> {
        self.replies()
            .iter()
            .filter_map(|reply| reply["wifi_status"].as_str().map(str::to_string))
            .collect()
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        crate::lock(&self.calls).clone()
    }

    pub fn max_concurrent_sends(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: LinkCall) -> Result<(), LinkError> {
        crate::lock(&self.calls).push(call);
        Ok(())
    }
}

impl BleLink for RecordingLink {
    fn start_service(&self) -> Result<(), LinkError> {
        self.record(LinkCall::StartService)
    }

    fn start_advertising(&self) -> Result<(), LinkError> {
        self.record(LinkCall::StartAdvertising)
    }

    fn stop_advertising(&self) -> Result<(), LinkError> {
        self.record(LinkCall::StopAdvertising)
    }

    fn request_encryption(&self, peer: MacAddress) -> Result<(), LinkError> {
        self.record(LinkCall::RequestEncryption(peer))
    }

    fn disconnect(&self, conn_id: u16) -> Result<(), LinkError> {
        self.record(LinkCall::Disconnect(conn_id))
    }

    fn respond(
        &self,
        _conn_id: u16,
        trans_id: u32,
        status: GattStatus,
        _echo: Option<&WriteEcho>,
    ) -> Result<(), LinkError> {
        self.record(LinkCall::Respond { trans_id, status })
    }

    fn notify(
        &self,
        _conn_id: u16,
        channel: Channel,
        payload: &[u8],
        _confirm: bool,
    ) -> Result<(), LinkError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::yield_now();
        crate::lock(&self.sent).push((channel, payload.to_vec()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

// ==== Station ====

/// What the scripted station does on `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectScript {
    /// Associate and lease this address.
    Join(Ipv4Addr),
    /// Report an address, but have none when it is read back.
    JoinWithoutLease,
    /// Report a disconnect with this reason.
    Reject(u16),
    /// Accept the request and never report anything.
    Silent,
    /// Fail the request synchronously.
    Error,
}

/// Station driver that follows a script and emits events on a channel.
pub struct ScriptedStation {
    events: mpsc::UnboundedSender<NetworkEvent>,
    connects: Mutex<VecDeque<ConnectScript>>,
    fallback: Mutex<ConnectScript>,
    scans: Mutex<VecDeque<Result<Vec<AccessPoint>, StationError>>>,
    fail_config: Mutex<bool>,
    fail_start: Mutex<bool>,
    fail_address: Mutex<bool>,
    lease: Mutex<Option<Ipv4Addr>>,
    calls: Mutex<Vec<String>>,
    flags: OnceLock<JoinFlags>,
    flags_at_scan: Mutex<Vec<crate::provision::FlagState>>,
}

impl ScriptedStation {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NetworkEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let station = Self {
            events,
            connects: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(ConnectScript::Silent),
            scans: Mutex::new(VecDeque::new()),
            fail_config: Mutex::new(false),
            fail_start: Mutex::new(false),
            fail_address: Mutex::new(false),
            lease: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            flags: OnceLock::new(),
            flags_at_scan: Mutex::new(Vec::new()),
        };
        (station, rx)
    }

    /// Queue behaviour for the next `connect` calls, in order.
    pub fn on_connect(&self, script: ConnectScript) {
        crate::lock(&self.connects).push_back(script);
    }

    /// Behaviour once the queue is empty.
    pub fn otherwise(&self, script: ConnectScript) {
        *crate::lock(&self.fallback) = script;
    }

    pub fn on_scan(&self, result: Result<Vec<AccessPoint>, StationError>) {
        crate::lock(&self.scans).push_back(result);
    }

    pub fn fail_config(&self) {
        *crate::lock(&self.fail_config) = true;
    }

    pub fn fail_start(&self) {
        *crate::lock(&self.fail_start) = true;
    }

    /// Make reading the interface address fail.
    pub fn fail_address(&self) {
        *crate::lock(&self.fail_address) = true;
    }

    /// Observe these flags while scanning.
    pub fn watch_flags(&self, flags: JoinFlags) {
        let _ = self.flags.set(flags);
    }

    pub fn flags_at_scan(&self) -> Vec<crate::provision::FlagState> {
        crate::lock(&self.flags_at_scan).clone()
    }

    pub fn calls(&self) -> Vec<String> {
        crate::lock(&self.calls).clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn emit(&self, event: NetworkEvent) {
        let _ = self.events.send(event);
    }

    fn record(&self, call: impl Into<String>) {
        crate::lock(&self.calls).push(call.into());
    }
}

impl StationDriver for ScriptedStation {
    fn start(&self) -> Result<(), StationError> {
        self.record("start");
        if *crate::lock(&self.fail_start) {
            return Err(StationError::Lifecycle("ESP_ERR_WIFI_NOT_INIT".into()));
        }
        self.emit(NetworkEvent::StaStarted);
        Ok(())
    }

    fn stop(&self) -> Result<(), StationError> {
        self.record("stop");
        *crate::lock(&self.lease) = None;
        Ok(())
    }

    fn set_config(&self, config: &StationConfig) -> Result<(), StationError> {
        self.record(format!("config:{}", config.ssid));
        if *crate::lock(&self.fail_config) {
            return Err(StationError::Config("rejected".into()));
        }
        Ok(())
    }

    fn connect(&self) -> Result<(), StationError> {
        self.record("connect");
        let script = crate::lock(&self.connects)
            .pop_front()
            .unwrap_or(*crate::lock(&self.fallback));
        match script {
            ConnectScript::Join(ip) => {
                *crate::lock(&self.lease) = Some(ip);
                self.emit(NetworkEvent::GotIp(ip));
            }
            ConnectScript::JoinWithoutLease => {
                *crate::lock(&self.lease) = None;
                self.emit(NetworkEvent::GotIp(Ipv4Addr::new(10, 0, 0, 9)));
            }
            ConnectScript::Reject(reason) => {
                self.emit(NetworkEvent::Disconnected { reason });
            }
            ConnectScript::Silent => {}
            ConnectScript::Error => return Err(StationError::Connect("busy".into())),
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<(), StationError> {
        self.record("disconnect");
        *crate::lock(&self.lease) = None;
        Ok(())
    }

    fn ip_address(&self) -> Result<Option<Ipv4Addr>, StationError> {
        if *crate::lock(&self.fail_address) {
            return Err(StationError::Address("netif gone".into()));
        }
        Ok(*crate::lock(&self.lease))
    }

    fn scan(&self) -> Result<Vec<AccessPoint>, StationError> {
        self.record("scan");
        if let Some(flags) = self.flags.get() {
            crate::lock(&self.flags_at_scan).push(flags.snapshot());
        }
        crate::lock(&self.scans).pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

// ==== Store ====

/// Credential store kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    stored: Mutex<StoredCredentials>,
    saves: AtomicUsize,
    failing: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose writes always fail.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn with(creds: &Credentials) -> Self {
        Self {
            stored: Mutex::new(StoredCredentials::from(creds)),
            ..Self::default()
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Result<StoredCredentials, StoreError> {
        Ok(crate::lock(&self.stored).clone())
    }

    fn save(&self, creds: &Credentials) -> Result<(), StoreError> {
        if self.failing {
            return Err(StoreError::Write("flash full".into()));
        }
        *crate::lock(&self.stored) = StoredCredentials::from(creds);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *crate::lock(&self.stored) = StoredCredentials::default();
        Ok(())
    }
}

// ==== Status ====

/// Records every status shown.
#[derive(Default)]
pub struct RecordingStatus {
    shown: Mutex<Vec<DeviceStatus>>,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<DeviceStatus> {
        crate::lock(&self.shown).clone()
    }

    pub fn last(&self) -> Option<DeviceStatus> {
        self.shown().last().copied()
    }
}

impl StatusSink for RecordingStatus {
    fn show(&self, status: DeviceStatus) {
        crate::lock(&self.shown).push(status);
    }
}
