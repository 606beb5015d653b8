//! NimBLE adapter.
//!
//! Registers the provisioning service with the NimBLE host, translates its
//! callbacks into [`GattEvent`]s for the [`Provisioner`], and carries out
//! link commands.
//!
//! NimBLE dispatches writes per characteristic and reassembles long writes
//! before `on_write` fires, so the adapter numbers the attribute table itself
//! and always reports complete values. Subscriptions arrive as their own
//! callback and are reported as client-config writes.

use super::connection::{
    advertised_name, AdvertisingParams, IoCapability, KeyDistribution, SecurityParams,
};
use super::link::{BleLink, LinkError};
use super::reassembly::GattStatus;
use super::registry::{
    declare_table, AttrType, Channel, HandleTable, Properties, Uuid128, ADVERTISED_UUID,
    COMMAND_CHAR_UUID, IDENTITY_CHAR_UUID, SERVICE_UUID, SLOT_COUNT,
};
use super::server::{GattEvent, WriteEcho};
use crate::identity::{DeviceIdentity, MacAddress};
use crate::provision::Provisioner;
use esp32_nimble::enums::{AuthReq, PairKeyDist, SecurityIOCap};
use esp32_nimble::utilities::mutex::Mutex as NimbleMutex;
use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{
    uuid128, BLEAdvertisementData, BLECharacteristic, BLEDevice, NimbleProperties, NimbleSub,
};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};

/// First handle of the adapter's table numbering.
const TABLE_BASE: u16 = 0x0028;

const SERVICE: BleUuid = uuid128!("d43e0800-d5a5-d3e5-b13e-3922431410be");
const IDENTITY_CHAR: BleUuid = uuid128!("d43e0811-d5a5-d3e5-b13e-3922431410be");
const COMMAND_CHAR: BleUuid = uuid128!("d43e0822-d5a5-d3e5-b13e-3922431410be");
const ADVERTISED: BleUuid = uuid128!("000000ff-0000-1000-8000-00805f9b34fb");

/// NimBLE form of a UUID from the attribute table.
fn ble_uuid(uuid: Uuid128) -> Result<BleUuid, LinkError> {
    match uuid {
        SERVICE_UUID => Ok(SERVICE),
        IDENTITY_CHAR_UUID => Ok(IDENTITY_CHAR),
        COMMAND_CHAR_UUID => Ok(COMMAND_CHAR),
        ADVERTISED_UUID => Ok(ADVERTISED),
        other => Err(LinkError::Stack(format!("unregistered UUID {}", other))),
    }
}

fn stack_error(what: &str, e: impl std::fmt::Debug) -> LinkError {
    LinkError::Stack(format!("{}: {:?}", what, e))
}

fn io_cap(cap: IoCapability) -> SecurityIOCap {
    match cap {
        IoCapability::DisplayOnly => SecurityIOCap::DisplayOnly,
        IoCapability::DisplayYesNo => SecurityIOCap::DisplayYesNo,
        IoCapability::KeyboardOnly => SecurityIOCap::KeyboardOnly,
        IoCapability::NoInputNoOutput => SecurityIOCap::NoInputNoOutput,
        IoCapability::KeyboardDisplay => SecurityIOCap::KeyboardDisplay,
    }
}

fn nimble_props(props: Properties) -> NimbleProperties {
    let mut out = NimbleProperties::empty();
    if props.contains(Properties::READ) {
        out |= NimbleProperties::READ;
    }
    if props.contains(Properties::WRITE) {
        out |= NimbleProperties::WRITE;
    }
    if props.contains(Properties::NOTIFY) {
        out |= NimbleProperties::NOTIFY;
    }
    if props.contains(Properties::INDICATE) {
        out |= NimbleProperties::INDICATE;
    }
    out
}

fn key_dist(keys: KeyDistribution) -> PairKeyDist {
    let mut dist = PairKeyDist::empty();
    if keys.encryption {
        dist |= PairKeyDist::ENC;
    }
    if keys.identity {
        dist |= PairKeyDist::ID;
    }
    dist
}

/// [`BleLink`] over the NimBLE host.
pub struct NimbleLink {
    characteristics: [Arc<NimbleMutex<BLECharacteristic>>; 2],
    table: HandleTable,
    name: String,
    params: AdvertisingParams,
    /// Connection of the most recent peer, for link-level requests.
    current_conn: Mutex<Option<u16>>,
}

impl NimbleLink {
    /// Configure security and register the service. Callbacks are wired up
    /// by [`attach`](Self::attach).
    pub fn new(identity: &DeviceIdentity, max_value_len: usize) -> Result<Arc<Self>, LinkError> {
        let device = BLEDevice::take();
        BLEDevice::set_device_name(identity.ble_name())
            .map_err(|e| stack_error("set device name", e))?;

        let security = SecurityParams::default();
        let mut auth = AuthReq::empty();
        if security.bonding {
            auth |= AuthReq::Bond;
        }
        if security.mitm {
            auth |= AuthReq::Mitm;
        }
        if security.secure_connections {
            auth |= AuthReq::Sc;
        }
        device
            .security()
            .set_auth(auth)
            .set_io_cap(io_cap(security.io_capability))
            .set_security_init_key(key_dist(security.initiator_keys))
            .set_security_resp_key(key_dist(security.responder_keys));
        debug!("Security requested: {:?}", security);

        let server = device.get_server();
        server.advertise_on_disconnect(false);

        // NimBLE creates declarations and client-config descriptors itself;
        // only the value attributes are registered here, in channel order.
        let layout = declare_table(max_value_len);
        let service = server.create_service(ble_uuid(layout.service)?);
        let mut created = Vec::with_capacity(Channel::ALL.len());
        let mut props = NimbleProperties::empty();
        for attr in &layout.attributes {
            if let Some(declared) = attr.properties {
                props = nimble_props(declared);
            }
            if let AttrType::Uuid128(uuid) = attr.attr_type {
                created.push(service.lock().create_characteristic(ble_uuid(uuid)?, props));
            }
        }
        let characteristics: [Arc<NimbleMutex<BLECharacteristic>>; 2] = created
            .try_into()
            .map_err(|_| LinkError::Stack("unexpected characteristic count".to_string()))?;

        let table = HandleTable::consecutive(TABLE_BASE)
            .map_err(|e| LinkError::Stack(e.to_string()))?;
        info!(
            "Provisioning service {} registered (values up to {} bytes)",
            SERVICE_UUID, max_value_len
        );

        Ok(Arc::new(Self {
            characteristics,
            table,
            name: advertised_name(identity.ble_name()).to_string(),
            params: AdvertisingParams::default(),
            current_conn: Mutex::new(None),
        }))
    }

    /// Route stack callbacks into `provisioner` and report the table.
    pub fn attach(self: &Arc<Self>, provisioner: Provisioner) {
        let server = BLEDevice::take().get_server();

        let on_connect = provisioner.clone();
        let link = self.clone();
        server.on_connect(move |_server, desc| {
            let conn_id = desc.conn_handle();
            *crate::lock(&link.current_conn) = Some(conn_id);
            on_connect.on_gatt_event(GattEvent::Connected {
                conn_id,
                peer: MacAddress::new(desc.address().as_be_bytes()),
            });
        });

        let on_disconnect = provisioner.clone();
        let link = self.clone();
        server.on_disconnect(move |desc, reason| {
            debug!("Disconnect reason: {:?}", reason);
            *crate::lock(&link.current_conn) = None;
            on_disconnect.on_gatt_event(GattEvent::Disconnected {
                conn_id: desc.conn_handle(),
            });
        });

        let on_auth = provisioner.clone();
        server.on_authentication_complete(move |_server, _desc, result| {
            if let Err(e) = &result {
                warn!("Pairing error: {:?}", e);
            }
            on_auth.on_gatt_event(GattEvent::PairingComplete {
                success: result.is_ok(),
            });
        });

        for channel in Channel::ALL {
            let characteristic = &self.characteristics[channel.index()];
            let value_handle = self.table.value_handle(channel);
            let config_handle = self.table.config_handle(channel);

            let on_write = provisioner.clone();
            characteristic.lock().on_write(move |args| {
                let status = on_write.on_gatt_event(GattEvent::Write {
                    conn_id: args.desc().conn_handle(),
                    trans_id: 0,
                    handle: value_handle,
                    offset: 0,
                    value: args.recv_data().to_vec(),
                    need_rsp: true,
                    is_prep: false,
                });
                if status != GattStatus::Ok {
                    args.reject_with_error_code(status.code());
                }
            });

            let on_subscribe = provisioner.clone();
            characteristic.lock().on_subscribe(move |_chr, desc, sub| {
                let descr: u16 = if sub.contains(NimbleSub::INDICATE) {
                    0x0002
                } else if sub.contains(NimbleSub::NOTIFY) {
                    0x0001
                } else {
                    0x0000
                };
                on_subscribe.on_gatt_event(GattEvent::Write {
                    conn_id: desc.conn_handle(),
                    trans_id: 0,
                    handle: config_handle,
                    offset: 0,
                    value: descr.to_le_bytes().to_vec(),
                    need_rsp: false,
                    is_prep: false,
                });
            });
        }

        let handles: Vec<u16> = (0..SLOT_COUNT as u16).map(|i| TABLE_BASE + i).collect();
        provisioner.on_gatt_event(GattEvent::TableCreated { handles });
    }
}

impl BleLink for NimbleLink {
    fn start_service(&self) -> Result<(), LinkError> {
        // NimBLE registers services when advertising first starts.
        debug!("Service start deferred to NimBLE");
        Ok(())
    }

    fn start_advertising(&self) -> Result<(), LinkError> {
        let advertising = BLEDevice::take().get_advertising();
        let mut advertising = advertising.lock();
        advertising
            .set_data(BLEAdvertisementData::new().add_service_uuid(ADVERTISED))
            .map_err(|e| stack_error("advertising data", e))?;
        advertising
            .scan_response_data(BLEAdvertisementData::new().name(&self.name))
            .map_err(|e| stack_error("scan response", e))?;
        advertising
            .min_interval(self.params.interval_min)
            .max_interval(self.params.interval_max);
        advertising
            .start()
            .map_err(|e| stack_error("start advertising", e))?;
        info!("Advertising started");
        Ok(())
    }

    fn stop_advertising(&self) -> Result<(), LinkError> {
        BLEDevice::take()
            .get_advertising()
            .lock()
            .stop()
            .map_err(|e| stack_error("stop advertising", e))?;
        info!("Advertising stopped");
        Ok(())
    }

    fn request_encryption(&self, peer: MacAddress) -> Result<(), LinkError> {
        let conn_id = (*crate::lock(&self.current_conn)).ok_or(LinkError::NotConnected)?;
        debug!("Requesting encryption with {}", peer);
        // SAFETY: plain FFI call on a handle NimBLE reported as connected.
        let rc = unsafe { esp_idf_sys::ble_gap_security_initiate(conn_id) };
        if rc != 0 {
            return Err(LinkError::Stack(format!("security initiate rc={}", rc)));
        }
        Ok(())
    }

    fn disconnect(&self, conn_id: u16) -> Result<(), LinkError> {
        BLEDevice::take()
            .get_server()
            .disconnect(conn_id)
            .map_err(|e| stack_error("disconnect", e))
    }

    fn respond(
        &self,
        _conn_id: u16,
        _trans_id: u32,
        _status: GattStatus,
        _echo: Option<&WriteEcho>,
    ) -> Result<(), LinkError> {
        // NimBLE answers writes itself once on_write returns.
        Ok(())
    }

    fn notify(
        &self,
        _conn_id: u16,
        channel: Channel,
        payload: &[u8],
        confirm: bool,
    ) -> Result<(), LinkError> {
        debug!(
            "{} {} bytes on {} channel",
            if confirm { "Indicating" } else { "Notifying" },
            payload.len(),
            channel
        );
        self.characteristics[channel.index()]
            .lock()
            .set_value(payload)
            .notify();
        Ok(())
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use crate::testing::TestResult;
    use wifi_provisioner_esp32_macros::tap_test;

    #[tap_test]
    fn nimble_uuids_match_attribute_table() -> TestResult {
        for uuid in [SERVICE_UUID, IDENTITY_CHAR_UUID, COMMAND_CHAR_UUID, ADVERTISED_UUID] {
            let parsed = BleUuid::from_uuid128_string(&uuid.to_string())
                .map_err(|e| format!("{:?}", e))?;
            assert_eq!(ble_uuid(uuid)?, parsed, "{}", uuid);
        }
        Ok(())
    }

    #[tap_test]
    fn every_declared_uuid_is_registered() -> TestResult {
        let layout = declare_table(512);
        ble_uuid(layout.service)?;
        for attr in &layout.attributes {
            if let AttrType::Uuid128(uuid) = attr.attr_type {
                ble_uuid(uuid)?;
            }
        }
        Ok(())
    }
}
