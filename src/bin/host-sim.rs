//! Host simulator for the provisioning service.
//!
//! Runs the provisioning core against simulated networks and a console BLE
//! link: each stdin line is written to the command channel as one value, and
//! every value the device pushes is printed.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin host-sim -- HomeNet:hunter22:-45 Cafe::-70
//! ```
//!
//! Then type commands, for example:
//!
//! ```text
//! {"cmd_type":"scan_list"}
//! {"cmd_type":"verify_device","device_id":"24:6F:28:12:34:56"}
//! {"cmd_type":"connect","ssid":"HomeNet","password":"hunter22"}
//! id:BLAZE
//! id:{"cmd":"get_deviceid"}
//! /disconnect
//! /connect
//! ```
//!
//! Lines prefixed `id:` go to the identity channel. Credentials are stored in
//! `~/.wifi-provisioner/credentials.json`; pass `--forget` to clear them.

#[cfg(not(feature = "esp32"))]
mod sim {
    use log::{debug, error, info, warn};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use wifi_provisioner_esp32::ble::registry::SLOT_COUNT;
    use wifi_provisioner_esp32::ble::server::WriteEcho;
    use wifi_provisioner_esp32::ble::{
        BleLink, Channel, GattEvent, GattStatus, HandleTable, LinkError,
    };
    use wifi_provisioner_esp32::persistence_host::FileCredentialStore;
    use wifi_provisioner_esp32::status::LogStatus;
    use wifi_provisioner_esp32::wifi::{SimulatedNetwork, SimulatedStation};
    use wifi_provisioner_esp32::{
        Collaborators, CredentialStore, DeviceIdentity, MacAddress, Provisioner, ProvisionerConfig,
    };

    const DEVICE_MAC: MacAddress = MacAddress::new([0x24, 0x6F, 0x28, 0x12, 0x34, 0x56]);
    const CLIENT_MAC: MacAddress = MacAddress::new([0x5C, 0xF3, 0x70, 0xAA, 0xBB, 0xCC]);
    const CONN_ID: u16 = 1;
    const TABLE_BASE: u16 = 0x0028;

    /// Prints link commands and pushed values to the console.
    struct ConsoleLink;

    impl BleLink for ConsoleLink {
        fn start_service(&self) -> Result<(), LinkError> {
            info!("[ble] service started");
            Ok(())
        }

        fn start_advertising(&self) -> Result<(), LinkError> {
            info!("[ble] advertising");
            Ok(())
        }

        fn stop_advertising(&self) -> Result<(), LinkError> {
            info!("[ble] advertising stopped");
            Ok(())
        }

        fn request_encryption(&self, peer: MacAddress) -> Result<(), LinkError> {
            info!("[ble] encryption requested with {}", peer);
            Ok(())
        }

        fn disconnect(&self, conn_id: u16) -> Result<(), LinkError> {
            info!("[ble] disconnect requested for conn_id={}", conn_id);
            Ok(())
        }

        fn respond(
            &self,
            _conn_id: u16,
            trans_id: u32,
            status: GattStatus,
            _echo: Option<&WriteEcho>,
        ) -> Result<(), LinkError> {
            debug!("[ble] write {} answered {:?}", trans_id, status);
            Ok(())
        }

        fn notify(
            &self,
            _conn_id: u16,
            channel: Channel,
            payload: &[u8],
            confirm: bool,
        ) -> Result<(), LinkError> {
            let kind = if confirm { "indicate" } else { "notify" };
            match std::str::from_utf8(payload) {
                Ok(text) => println!("<- [{} {}] {}", channel, kind, text),
                Err(_) => println!("<- [{} {}] {:02x?}", channel, kind, payload),
            }
            Ok(())
        }
    }

    /// Simulated central: turns console input into GATT events.
    struct Central {
        provisioner: Provisioner,
        table: HandleTable,
        next_trans: AtomicU32,
    }

    impl Central {
        fn connect(&self) {
            self.provisioner.on_gatt_event(GattEvent::Connected {
                conn_id: CONN_ID,
                peer: CLIENT_MAC,
            });
            self.provisioner
                .on_gatt_event(GattEvent::PairingComplete { success: true });
            for channel in Channel::ALL {
                self.write(self.table.config_handle(channel), 0x0001u16.to_le_bytes().to_vec());
            }
        }

        fn disconnect(&self) {
            self.provisioner
                .on_gatt_event(GattEvent::Disconnected { conn_id: CONN_ID });
        }

        fn write(&self, handle: u16, value: Vec<u8>) {
            let trans_id = self.next_trans.fetch_add(1, Ordering::Relaxed);
            let status = self.provisioner.on_gatt_event(GattEvent::Write {
                conn_id: CONN_ID,
                trans_id,
                handle,
                offset: 0,
                value,
                need_rsp: true,
                is_prep: false,
            });
            if status != GattStatus::Ok {
                warn!("Write rejected: {:?}", status);
            }
        }

        fn handle_line(&self, line: &str) -> bool {
            match line {
                "" => {}
                "/quit" => return false,
                "/disconnect" => self.disconnect(),
                "/connect" => self.connect(),
                _ => match line.strip_prefix("id:") {
                    Some(value) => self.write(
                        self.table.value_handle(Channel::Identity),
                        value.as_bytes().to_vec(),
                    ),
                    None => self.write(
                        self.table.value_handle(Channel::Command),
                        line.as_bytes().to_vec(),
                    ),
                },
            }
            true
        }
    }

    pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
        let mut forget = false;
        let mut networks = Vec::new();
        for arg in std::env::args().skip(1) {
            if arg == "--forget" {
                forget = true;
                continue;
            }
            match SimulatedNetwork::parse(&arg) {
                Some(network) => networks.push(network),
                None => return Err(format!("bad network '{}', expected SSID:PASSWORD[:RSSI]", arg).into()),
            }
        }
        if networks.is_empty() {
            networks.push(SimulatedNetwork::new("HomeNet", "hunter22", -45));
        }
        info!(
            "Simulated networks: {:?}",
            networks.iter().map(|n| n.ssid.as_str()).collect::<Vec<_>>()
        );

        let store = Arc::new(FileCredentialStore::open_default()?);
        if forget {
            store.clear()?;
            info!("Cleared {:?}", store.path());
        }

        let config = ProvisionerConfig::default();
        let identity = DeviceIdentity::from_mac(DEVICE_MAC, &config);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let provisioner = Provisioner::new(
            config,
            identity,
            Collaborators {
                link: Arc::new(ConsoleLink),
                station: Arc::new(SimulatedStation::new(networks, events_tx)),
                store,
                status: Arc::new(LogStatus),
            },
            tokio::runtime::Handle::current(),
        );
        tokio::spawn(provisioner.clone().pump_network_events(events_rx));

        let handles: Vec<u16> = (0..SLOT_COUNT as u16).map(|i| TABLE_BASE + i).collect();
        provisioner.on_gatt_event(GattEvent::TableCreated { handles });

        let boot = provisioner.clone();
        tokio::spawn(async move {
            let outcome = boot.resume_stored().await;
            info!("Boot join: {:?}", outcome);
        });

        let central = Central {
            provisioner,
            table: HandleTable::consecutive(TABLE_BASE)?,
            next_trans: AtomicU32::new(1),
        };
        central.connect();

        let cancel = CancellationToken::new();
        let input_cancel = cancel.clone();
        let input = tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    _ = input_cancel.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if !central.handle_line(line.trim()) {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            error!("stdin: {}", e);
                            break;
                        }
                    },
                }
            }
        });

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                cancel.cancel();
            }
            result = input => {
                if let Err(e) = result {
                    error!("Input task error: {}", e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(not(feature = "esp32"))]
#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = sim::run().await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

#[cfg(feature = "esp32")]
fn main() {
    eprintln!("host-sim runs on the host; build it without the 'esp32' feature.");
    std::process::exit(1);
}
