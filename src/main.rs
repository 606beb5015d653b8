//! Wi-Fi provisioning firmware.
//!
//! Boots the BLE provisioning service and the Wi-Fi station, resumes any
//! stored network, then serves the companion app until power-off.
//!
//! ```bash
//! cargo espflash flash --features esp32 --release --monitor
//! ```
//!
//! On the host, use the `host-sim` binary instead.

#[cfg(feature = "esp32")]
use log::{error, info};

/// GPIO driving the status LED.
#[cfg(feature = "esp32")]
const STATUS_LED_GPIO: i32 = 2;

// ESP32: Initialize ESP-IDF before anything else
#[cfg(feature = "esp32")]
fn platform_init() {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("ESP-IDF initialized");
}

#[cfg(feature = "esp32")]
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    use esp_idf_hal::gpio::AnyOutputPin;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use wifi_provisioner_esp32::ble::NimbleLink;
    use wifi_provisioner_esp32::persistence::NvsCredentialStore;
    use wifi_provisioner_esp32::status::{LedStatus, LogStatus};
    use wifi_provisioner_esp32::wifi::EspStation;
    use wifi_provisioner_esp32::{
        Collaborators, DeviceIdentity, JoinOutcome, MacAddress, Provisioner, ProvisionerConfig,
        StatusSink,
    };

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = wifi_provisioner_esp32::get_nvs_default_partition()?;

    let config = ProvisionerConfig::default();
    let identity = DeviceIdentity::from_mac(MacAddress::read_factory()?, &config);
    info!("Device id: {}", identity.device_id());

    let store = Arc::new(NvsCredentialStore::open()?);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let station = Arc::new(EspStation::new(
        peripherals.modem,
        sysloop,
        Some(nvs),
        events_tx,
    )?);

    // SAFETY: the pin number is a board constant and nothing else drives it.
    let led_pin = unsafe { AnyOutputPin::new(STATUS_LED_GPIO) };
    let status: Arc<dyn StatusSink> = match LedStatus::new(led_pin) {
        Ok(led) => Arc::new(led),
        Err(e) => {
            error!("Status LED unavailable ({}), logging status instead", e);
            Arc::new(LogStatus)
        }
    };

    let link = NimbleLink::new(&identity, config.write_capacity)?;
    let provisioner = Provisioner::new(
        config,
        identity,
        Collaborators {
            link: link.clone(),
            station,
            store,
            status,
        },
        tokio::runtime::Handle::current(),
    );
    link.attach(provisioner.clone());

    tokio::spawn(provisioner.clone().pump_network_events(events_rx));

    match provisioner.resume_stored().await {
        JoinOutcome::Connected => info!("Joined stored network"),
        outcome => info!("No stored network joined ({:?}), waiting for provisioning", outcome),
    }

    std::future::pending::<()>().await;
    Ok(())
}

#[cfg(feature = "esp32")]
#[tokio::main(flavor = "current_thread")]
async fn main() {
    platform_init();

    info!("=== WiFi provisioner starting ===");

    if let Err(e) = run().await {
        error!("Fatal: {}", e);
        // Keep the serial console readable instead of boot-looping
        loop {
            std::thread::sleep(std::time::Duration::from_secs(10));
        }
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo run --bin host-sim' to run the provisioner on the host.");
}
