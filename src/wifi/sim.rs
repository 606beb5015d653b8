//! Simulated station for host runs.
//!
//! Holds a fixed list of networks. A connect request resolves at once: the
//! right password leases an address, a wrong one is an authentication
//! failure, and an unknown SSID is reported as not found.

use crate::provision::{
    AccessPoint, NetworkEvent, StationConfig, StationDriver, StationError, REASON_AUTH_FAIL,
    REASON_NO_AP_FOUND,
};
use log::info;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use tokio::sync::mpsc;
use zeroize::Zeroizing;

/// One simulated access point.
#[derive(Clone)]
pub struct SimulatedNetwork {
    pub ssid: String,
    pub password: Zeroizing<String>,
    pub rssi: i8,
}

impl SimulatedNetwork {
    pub fn new(ssid: &str, password: &str, rssi: i8) -> Self {
        Self {
            ssid: ssid.to_string(),
            password: Zeroizing::new(password.to_string()),
            rssi,
        }
    }

    /// Parse `SSID:PASSWORD[:RSSI]`.
    pub fn parse(arg: &str) -> Option<Self> {
        let mut parts = arg.splitn(3, ':');
        let ssid = parts.next().filter(|s| !s.is_empty())?;
        let password = parts.next().unwrap_or("");
        let rssi = match parts.next() {
            Some(rssi) => rssi.parse().ok()?,
            None => -50,
        };
        Some(Self::new(ssid, password, rssi))
    }
}

#[derive(Default)]
struct SimState {
    started: bool,
    config: Option<(String, Zeroizing<String>)>,
    lease: Option<Ipv4Addr>,
    next_host: u8,
}

/// [`StationDriver`] over [`SimulatedNetwork`]s.
pub struct SimulatedStation {
    networks: Vec<SimulatedNetwork>,
    state: Mutex<SimState>,
    events: mpsc::UnboundedSender<NetworkEvent>,
}

impl SimulatedStation {
    pub fn new(networks: Vec<SimulatedNetwork>, events: mpsc::UnboundedSender<NetworkEvent>) -> Self {
        Self {
            networks,
            state: Mutex::new(SimState {
                next_host: 10,
                ..SimState::default()
            }),
            events,
        }
    }

    fn emit(&self, event: NetworkEvent) {
        let _ = self.events.send(event);
    }
}

impl StationDriver for SimulatedStation {
    fn start(&self) -> Result<(), StationError> {
        crate::lock(&self.state).started = true;
        self.emit(NetworkEvent::StaStarted);
        Ok(())
    }

    fn stop(&self) -> Result<(), StationError> {
        let mut state = crate::lock(&self.state);
        state.started = false;
        state.lease = None;
        Ok(())
    }

    fn set_config(&self, config: &StationConfig) -> Result<(), StationError> {
        crate::lock(&self.state).config = Some((
            config.ssid.clone(),
            Zeroizing::new(config.password.clone()),
        ));
        Ok(())
    }

    fn connect(&self) -> Result<(), StationError> {
        let mut state = crate::lock(&self.state);
        if !state.started {
            return Err(StationError::Connect("ESP_ERR_WIFI_NOT_STARTED".into()));
        }
        let Some((ssid, password)) = state.config.clone() else {
            return Err(StationError::Connect("ESP_ERR_WIFI_SSID".into()));
        };

        let event = match self.networks.iter().find(|n| n.ssid == ssid) {
            None => NetworkEvent::Disconnected {
                reason: REASON_NO_AP_FOUND,
            },
            Some(network) if *network.password != *password => NetworkEvent::Disconnected {
                reason: REASON_AUTH_FAIL,
            },
            Some(_) => {
                let ip = Ipv4Addr::new(192, 168, 4, state.next_host);
                state.next_host = state.next_host.wrapping_add(1).max(10);
                state.lease = Some(ip);
                info!("[sim] associated with {}", ssid);
                NetworkEvent::GotIp(ip)
            }
        };
        drop(state);
        self.emit(event);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), StationError> {
        crate::lock(&self.state).lease = None;
        Ok(())
    }

    fn ip_address(&self) -> Result<Option<Ipv4Addr>, StationError> {
        Ok(crate::lock(&self.state).lease)
    }

    fn scan(&self) -> Result<Vec<AccessPoint>, StationError> {
        if !crate::lock(&self.state).started {
            return Err(StationError::Scan("ESP_ERR_WIFI_NOT_STARTED".into()));
        }
        Ok(self
            .networks
            .iter()
            .map(|n| AccessPoint {
                ssid: n.ssid.clone(),
                rssi: n.rssi,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;

    fn station() -> (SimulatedStation, mpsc::UnboundedReceiver<NetworkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let networks = vec![
            SimulatedNetwork::new("HomeNet", "hunter22", -45),
            SimulatedNetwork::new("Cafe", "", -70),
        ];
        (SimulatedStation::new(networks, tx), rx)
    }

    fn configure(station: &SimulatedStation, ssid: &str, password: &str) {
        let creds = Credentials::new(ssid, password, None).unwrap();
        station
            .set_config(&StationConfig::from_credentials(&creds))
            .unwrap();
    }

    #[test]
    fn test_parse_network_arg() {
        let network = SimulatedNetwork::parse("Office:secret123:-61").unwrap();
        assert_eq!(network.ssid, "Office");
        assert_eq!(network.password.as_str(), "secret123");
        assert_eq!(network.rssi, -61);

        assert_eq!(SimulatedNetwork::parse("Open").unwrap().rssi, -50);
        assert!(SimulatedNetwork::parse(":pw").is_none());
        assert!(SimulatedNetwork::parse("X:pw:loud").is_none());
    }

    #[test]
    fn test_connect_outcomes() {
        let (station, mut rx) = station();
        station.start().unwrap();
        assert_eq!(rx.try_recv().unwrap(), NetworkEvent::StaStarted);

        configure(&station, "HomeNet", "hunter22");
        station.connect().unwrap();
        assert!(matches!(rx.try_recv().unwrap(), NetworkEvent::GotIp(_)));
        assert!(station.ip_address().unwrap().is_some());

        configure(&station, "HomeNet", "wrongpass");
        station.connect().unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            NetworkEvent::Disconnected {
                reason: REASON_AUTH_FAIL
            }
        );

        configure(&station, "Nowhere", "whatever1");
        station.connect().unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            NetworkEvent::Disconnected {
                reason: REASON_NO_AP_FOUND
            }
        );
    }

    #[test]
    fn test_connect_requires_start() {
        let (station, _rx) = station();
        configure(&station, "HomeNet", "hunter22");
        assert!(station.connect().is_err());
        assert!(station.scan().is_err());
    }

    #[test]
    fn test_scan_lists_networks() {
        let (station, _rx) = station();
        station.start().unwrap();
        let found = station.scan().unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].ssid, "HomeNet");
    }
}
