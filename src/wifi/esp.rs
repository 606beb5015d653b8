//! ESP-IDF Wi-Fi station driver.

use crate::config::{MAX_PASSWORD_LEN, MAX_SSID_LEN};
use crate::provision::{
    AccessPoint, AuthThreshold, NetworkEvent, StationConfig, StationDriver, StationError,
};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::netif::IpEvent;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AuthMethod, ClientConfiguration, Configuration, EspWifi, PmfConfiguration, WifiEvent,
};
use log::{debug, info};
use std::net::Ipv4Addr;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// [`StationDriver`] over `EspWifi`.
///
/// Driver calls return as soon as ESP-IDF accepts the request; association and
/// DHCP results arrive through the system event loop.
pub struct EspStation {
    wifi: Mutex<EspWifi<'static>>,
    _wifi_events: EspSubscription<'static, System>,
    _ip_events: EspSubscription<'static, System>,
}

impl EspStation {
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
        events: mpsc::UnboundedSender<NetworkEvent>,
    ) -> Result<Self, StationError> {
        let wifi = EspWifi::new(modem, sysloop.clone(), nvs)
            .map_err(|e| StationError::Lifecycle(e.to_string()))?;

        let tx = events.clone();
        let wifi_events = sysloop
            .subscribe::<WifiEvent, _>(move |event| {
                let translated = match event {
                    WifiEvent::StaStarted => Some(NetworkEvent::StaStarted),
                    WifiEvent::StaDisconnected(info) => Some(NetworkEvent::Disconnected {
                        reason: info.reason(),
                    }),
                    _ => None,
                };
                if let Some(event) = translated {
                    let _ = tx.send(event);
                }
            })
            .map_err(|e| StationError::Lifecycle(e.to_string()))?;

        let ip_events = sysloop
            .subscribe::<IpEvent, _>(move |event| {
                let translated = match event {
                    IpEvent::DhcpIpAssigned(assignment) => {
                        Some(NetworkEvent::GotIp(assignment.ip_settings.ip))
                    }
                    IpEvent::DhcpIpDeassigned(_) => Some(NetworkEvent::LostIp),
                    _ => None,
                };
                if let Some(event) = translated {
                    let _ = events.send(event);
                }
            })
            .map_err(|e| StationError::Lifecycle(e.to_string()))?;

        info!("WiFi driver initialized in station mode");
        Ok(Self {
            wifi: Mutex::new(wifi),
            _wifi_events: wifi_events,
            _ip_events: ip_events,
        })
    }
}

fn client_configuration(config: &StationConfig) -> Result<Configuration, StationError> {
    let auth_method = match config.auth_threshold {
        AuthThreshold::Open => AuthMethod::None,
        AuthThreshold::Wpa2Personal => AuthMethod::WPA2Personal,
    };
    let pmf_cfg = if config.pmf.capable {
        PmfConfiguration::Capable {
            required: config.pmf.required,
        }
    } else {
        PmfConfiguration::NotCapable
    };

    Ok(Configuration::Client(ClientConfiguration {
        ssid: config.ssid.as_str().try_into().map_err(|_| {
            StationError::Config(format!("SSID longer than {} bytes", MAX_SSID_LEN))
        })?,
        password: config.password.as_str().try_into().map_err(|_| {
            StationError::Config(format!("password longer than {} bytes", MAX_PASSWORD_LEN))
        })?,
        auth_method,
        pmf_cfg,
        ..Default::default()
    }))
}

impl StationDriver for EspStation {
    fn start(&self) -> Result<(), StationError> {
        crate::lock(&self.wifi)
            .start()
            .map_err(|e| StationError::Lifecycle(e.to_string()))
    }

    fn stop(&self) -> Result<(), StationError> {
        crate::lock(&self.wifi)
            .stop()
            .map_err(|e| StationError::Lifecycle(e.to_string()))
    }

    fn set_config(&self, config: &StationConfig) -> Result<(), StationError> {
        let configuration = client_configuration(config)?;
        crate::lock(&self.wifi)
            .set_configuration(&configuration)
            .map_err(|e| StationError::Config(e.to_string()))?;
        debug!("Station configured for SSID {}", config.ssid);
        Ok(())
    }

    fn connect(&self) -> Result<(), StationError> {
        crate::lock(&self.wifi)
            .connect()
            .map_err(|e| StationError::Connect(e.to_string()))
    }

    fn disconnect(&self) -> Result<(), StationError> {
        crate::lock(&self.wifi)
            .disconnect()
            .map_err(|e| StationError::Connect(e.to_string()))
    }

    fn ip_address(&self) -> Result<Option<Ipv4Addr>, StationError> {
        let wifi = crate::lock(&self.wifi);
        let info = wifi
            .sta_netif()
            .get_ip_info()
            .map_err(|e| StationError::Address(e.to_string()))?;
        Ok((!info.ip.is_unspecified()).then_some(info.ip))
    }

    fn scan(&self) -> Result<Vec<AccessPoint>, StationError> {
        let access_points = crate::lock(&self.wifi)
            .scan()
            .map_err(|e| StationError::Scan(format!("{:?}", e.code())))?;
        Ok(access_points
            .into_iter()
            .map(|ap| AccessPoint {
                ssid: ap.ssid.to_string(),
                rssi: ap.signal_strength,
            })
            .collect())
    }
}
