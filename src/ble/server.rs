//! GATT server state machine.
//!
//! [`GattServer::handle`] consumes one stack event and returns the effects
//! the runtime must carry out. It never blocks and never touches the radio,
//! so every protocol rule is testable on the host.

use super::connection::{ConnectionHandle, Session, Subscription};
use super::dispatch::{Action, Dispatcher};
use super::reassembly::{GattStatus, PrepareWriteBuffer};
use super::registry::{Channel, HandleTable, Target};
use crate::config::{Credentials, PairingFailurePolicy, ProvisionerConfig, TokenGate};
use crate::identity::{DeviceIdentity, MacAddress};
use log::{debug, error, info, warn};

/// Payload pushed when a client enables notifications or indications.
pub const SUBSCRIBE_PAYLOAD: [u8; 15] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14];

const CCCD_DISABLE: u16 = 0x0000;
const CCCD_NOTIFY: u16 = 0x0001;
const CCCD_INDICATE: u16 = 0x0002;

/// Events reported by the BLE stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    /// The attribute table was created with these handles.
    TableCreated { handles: Vec<u16> },
    Connected { conn_id: u16, peer: MacAddress },
    Disconnected { conn_id: u16 },
    PairingComplete { success: bool },
    /// Attribute write. `is_prep` marks a prepare-write fragment.
    Write {
        conn_id: u16,
        trans_id: u32,
        handle: u16,
        offset: u16,
        value: Vec<u8>,
        need_rsp: bool,
        is_prep: bool,
    },
    /// Execute write: commit or cancel all prepared fragments.
    ExecWrite {
        conn_id: u16,
        trans_id: u32,
        commit: bool,
    },
    Mtu { mtu: u16 },
    /// The station obtained an address with provisioned credentials.
    NetworkJoined,
}

/// Echo of a prepare write, returned in its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEcho {
    pub handle: u16,
    pub offset: u16,
    pub value: Vec<u8>,
}

/// Work for the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartService,
    StartAdvertising,
    StopAdvertising,
    RequestEncryption { peer: MacAddress },
    Disconnect { conn_id: u16 },
    Respond {
        conn_id: u16,
        trans_id: u32,
        status: GattStatus,
        echo: Option<WriteEcho>,
    },
    /// Push a value to the client. `confirm` asks for an indication.
    Notify {
        channel: Channel,
        payload: Vec<u8>,
        confirm: bool,
    },
    Scan,
    Submit(Credentials),
}

/// Provisioning GATT server.
#[derive(Debug)]
pub struct GattServer {
    dispatcher: Dispatcher,
    table: Option<HandleTable>,
    session: Session,
    /// Prepared fragments for the command channel. The identity channel
    /// takes direct writes only.
    prepared: PrepareWriteBuffer,
    capacity: usize,
    token_gate: TokenGate,
    pairing_failure: PairingFailurePolicy,
}

impl GattServer {
    pub fn new(config: &ProvisionerConfig, identity: DeviceIdentity) -> Self {
        Self {
            dispatcher: Dispatcher::new(identity, config.auth_token.clone()),
            table: None,
            session: Session::new(),
            prepared: PrepareWriteBuffer::new(config.write_capacity),
            capacity: config.write_capacity,
            token_gate: config.token_gate,
            pairing_failure: config.pairing_failure,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn table(&self) -> Option<&HandleTable> {
        self.table.as_ref()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        self.dispatcher.identity()
    }

    /// Process one event.
    pub fn handle(&mut self, event: GattEvent) -> Vec<Effect> {
        match event {
            GattEvent::TableCreated { handles } => self.on_table_created(&handles),
            GattEvent::Connected { conn_id, peer } => self.on_connect(ConnectionHandle { conn_id, peer }),
            GattEvent::Disconnected { conn_id } => self.on_disconnect(conn_id),
            GattEvent::PairingComplete { success } => self.on_pairing(success),
            GattEvent::Write {
                conn_id,
                trans_id,
                handle,
                offset,
                value,
                need_rsp,
                is_prep,
            } => {
                let mut effects = Vec::new();
                let (status, echo) = if is_prep {
                    let status = self.on_prepare_write(handle, offset, &value);
                    (status, Some(WriteEcho { handle, offset, value }))
                } else {
                    (self.on_write(handle, &value, &mut effects), None)
                };
                if need_rsp {
                    effects.insert(
                        0,
                        Effect::Respond {
                            conn_id,
                            trans_id,
                            status,
                            echo,
                        },
                    );
                }
                effects
            }
            GattEvent::ExecWrite {
                conn_id,
                trans_id,
                commit,
            } => {
                let mut effects = vec![Effect::Respond {
                    conn_id,
                    trans_id,
                    status: GattStatus::Ok,
                    echo: None,
                }];
                self.on_exec_write(commit, &mut effects);
                effects
            }
            GattEvent::Mtu { mtu } => {
                info!("MTU negotiated: {}", mtu);
                Vec::new()
            }
            GattEvent::NetworkJoined => {
                info!("Network joined; advertising stopped for good");
                self.session.set_network_joined();
                self.session.set_advertising(false);
                vec![Effect::StopAdvertising]
            }
        }
    }

    fn on_table_created(&mut self, handles: &[u16]) -> Vec<Effect> {
        match HandleTable::from_created(handles) {
            Ok(table) => {
                info!("Attribute table created: {:?}", handles);
                self.table = Some(table);
                let mut effects = vec![Effect::StartService];
                if self.session.should_advertise() {
                    self.session.set_advertising(true);
                    effects.push(Effect::StartAdvertising);
                }
                effects
            }
            Err(e) => {
                error!("Fatal: {}; provisioning service not started", e);
                Vec::new()
            }
        }
    }

    fn on_connect(&mut self, handle: ConnectionHandle) -> Vec<Effect> {
        info!("Client connected: conn_id={} peer={}", handle.conn_id, handle.peer);
        if let Some(previous) = self.session.connect(handle) {
            warn!("Replacing stale connection conn_id={}", previous.conn_id);
        }
        self.reset_buffers();
        vec![Effect::RequestEncryption { peer: handle.peer }]
    }

    fn on_disconnect(&mut self, conn_id: u16) -> Vec<Effect> {
        info!("Client disconnected: conn_id={}", conn_id);
        self.session.disconnect();
        self.reset_buffers();
        if self.table.is_some() && self.session.should_advertise() {
            self.session.set_advertising(true);
            vec![Effect::StartAdvertising]
        } else {
            Vec::new()
        }
    }

    fn on_pairing(&mut self, success: bool) -> Vec<Effect> {
        if success {
            info!("Pairing complete, link authenticated");
            self.session.set_authenticated(true);
            return Vec::new();
        }

        warn!("Pairing failed");
        match (self.pairing_failure, self.session.connection()) {
            (PairingFailurePolicy::Disconnect, Some(conn)) => {
                vec![Effect::Disconnect {
                    conn_id: conn.conn_id,
                }]
            }
            _ => Vec::new(),
        }
    }

    fn on_write(&mut self, handle: u16, value: &[u8], effects: &mut Vec<Effect>) -> GattStatus {
        let Some(table) = self.table else {
            warn!("Write to handle {} before the attribute table exists", handle);
            return GattStatus::RequestNotSupported;
        };

        match table.classify(handle) {
            Target::Value(channel) => {
                if value.len() > self.capacity {
                    warn!(
                        "Write of {} bytes to {} channel exceeds {} byte limit",
                        value.len(),
                        channel,
                        self.capacity
                    );
                    return GattStatus::InvalidAttrLen;
                }
                self.dispatch(channel, value, effects);
            }
            Target::Config(channel) if value.len() == 2 => {
                self.on_client_config(channel, value, effects);
            }
            _ => {
                error!("Unhandled write to handle {} ({} bytes)", handle, value.len());
            }
        }
        GattStatus::Ok
    }

    fn on_client_config(&mut self, channel: Channel, value: &[u8], effects: &mut Vec<Effect>) {
        let descr = u16::from_le_bytes([value[0], value[1]]);
        match descr {
            CCCD_NOTIFY => {
                debug!("Notify enabled on {} channel", channel);
                self.session.subscribe(channel, Subscription::Notify);
                effects.push(Effect::Notify {
                    channel,
                    payload: SUBSCRIBE_PAYLOAD.to_vec(),
                    confirm: false,
                });
            }
            CCCD_INDICATE => {
                debug!("Indicate enabled on {} channel", channel);
                self.session.subscribe(channel, Subscription::Indicate);
                effects.push(Effect::Notify {
                    channel,
                    payload: SUBSCRIBE_PAYLOAD.to_vec(),
                    confirm: true,
                });
            }
            CCCD_DISABLE => {
                debug!("Notify/indicate disabled on {} channel", channel);
                self.session.subscribe(channel, Subscription::None);
            }
            _ => {
                error!("Unknown client config value on {} channel: {}", channel, hex_dump(value));
            }
        }
    }

    fn on_prepare_write(&mut self, handle: u16, offset: u16, value: &[u8]) -> GattStatus {
        let target = self.table.map(|table| table.classify(handle));
        if target != Some(Target::Value(Channel::Command)) {
            warn!("Prepare write to unsupported handle {}", handle);
            return GattStatus::RequestNotSupported;
        }

        match self.prepared.fragment(offset as usize, value) {
            Ok(()) => {
                debug!("Prepared {} bytes at offset {}", value.len(), offset);
                GattStatus::Ok
            }
            Err(e) => {
                warn!("Rejected fragment: {}", e);
                e.status()
            }
        }
    }

    fn on_exec_write(&mut self, commit: bool, effects: &mut Vec<Effect>) {
        if !commit {
            if self.prepared.is_accumulating() {
                debug!("Prepared write cancelled");
            }
            self.prepared.cancel();
            return;
        }
        if let Some(payload) = self.prepared.commit() {
            info!("Committed {} byte prepared write", payload.len());
            self.dispatch(Channel::Command, &payload, effects);
        }
    }

    fn dispatch(&mut self, channel: Channel, payload: &[u8], effects: &mut Vec<Effect>) {
        if channel == Channel::Command
            && self.token_gate == TokenGate::Enforce
            && !self.session.token_seen()
        {
            warn!("Command ignored: shared-secret token not presented on this link");
            return;
        }

        let action = match channel {
            Channel::Identity => self.dispatcher.identity_write(payload),
            Channel::Command => self.dispatcher.command_write(payload),
        };
        match action {
            Some(Action::TokenAccepted) => self.session.set_token_seen(),
            Some(Action::Reply(payload)) => effects.push(Effect::Notify {
                channel: Channel::Command,
                payload,
                confirm: false,
            }),
            Some(Action::Scan) => effects.push(Effect::Scan),
            Some(Action::Submit(creds)) => effects.push(Effect::Submit(creds)),
            None => {}
        }
    }

    fn reset_buffers(&mut self) {
        self.prepared.cancel();
    }
}

/// Space-separated hex bytes, for logging raw values.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
