//! Pre-seed network credentials into NVS.
//!
//! Writes credentials to the same keys the provisioner uses, so a board can
//! be brought up without the companion app.
//!
//! Usage:
//!   WIFI_SSID="MyNetwork" WIFI_PASSWORD="secret123" cargo configure-wifi
//!
//! Optional device id recorded with the credentials:
//!   WIFI_DEVICE_ID="abc123" ...
//!
//! Clear stored credentials:
//!   WIFI_CLEAR=1 cargo configure-wifi

#[cfg(feature = "esp32")]
const WIFI_SSID: Option<&str> = option_env!("WIFI_SSID");

/// Empty string for open networks.
#[cfg(feature = "esp32")]
const WIFI_PASSWORD: Option<&str> = option_env!("WIFI_PASSWORD");

#[cfg(feature = "esp32")]
const WIFI_DEVICE_ID: Option<&str> = option_env!("WIFI_DEVICE_ID");

#[cfg(feature = "esp32")]
const WIFI_CLEAR: Option<&str> = option_env!("WIFI_CLEAR");

/// Print error message and exit after the serial output has drained.
#[cfg(feature = "esp32")]
fn halt_with_error(msg: &str) -> ! {
    eprintln!("\n{}", msg);
    eprintln!("\n=== Configuration failed ===\n");
    std::thread::sleep(std::time::Duration::from_secs(2));
    std::process::exit(1);
}

#[cfg(feature = "esp32")]
fn main() {
    use wifi_provisioner_esp32::persistence::NvsCredentialStore;
    use wifi_provisioner_esp32::{CredentialStore, Credentials};

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    println!("\n=== WiFi Credential Seeder ===\n");

    let store = match NvsCredentialStore::open() {
        Ok(store) => store,
        Err(e) => halt_with_error(&format!("Error opening NVS: {}", e)),
    };

    if WIFI_CLEAR.is_some_and(|v| !v.is_empty() && v != "0") {
        if let Err(e) = store.clear() {
            halt_with_error(&format!("Error clearing credentials: {}", e));
        }
        println!("Stored credentials cleared.");
        println!("\n=== Done - the device will advertise for provisioning ===\n");
        std::thread::sleep(std::time::Duration::from_secs(2));
        return;
    }

    let ssid = match WIFI_SSID {
        Some(s) if !s.is_empty() => s,
        _ => halt_with_error(
            "Error: WIFI_SSID environment variable not set at compile time.\n\n\
             Usage:\n  \
             WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret123\" cargo configure-wifi",
        ),
    };
    let password = WIFI_PASSWORD.unwrap_or("");

    println!("SSID: {}", ssid);
    println!(
        "Password: {} ({} chars)",
        if password.is_empty() { "(none)" } else { "****" },
        password.len()
    );

    let creds = match Credentials::new(ssid, password, WIFI_DEVICE_ID) {
        Ok(creds) => creds,
        Err(e) => halt_with_error(&format!("Error: {}", e)),
    };

    if let Err(e) = store.save(&creds) {
        halt_with_error(&format!("Error saving to NVS: {}", e));
    }

    println!("\n=== Credentials saved to NVS ===");
    println!("The provisioner joins this network on next boot.");
    println!("\n=== Done - you can disconnect the device ===\n");
    std::thread::sleep(std::time::Duration::from_secs(2));
}

#[cfg(not(feature = "esp32"))]
fn main() {
    eprintln!("This binary must be built for ESP32.");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret123\" cargo configure-wifi");
    eprintln!();
    eprintln!("On the host, host-sim keeps credentials in ~/.wifi-provisioner/credentials.json.");
    std::process::exit(1);
}
