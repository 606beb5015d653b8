//! Device status indication.
//!
//! The provisioning core reports coarse progress through [`StatusSink`]. On
//! the device a status LED shows it; on the host it is logged.

use log::info;

/// Externally visible device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Booting,
    /// Waiting for the companion app.
    Advertising,
    PeerConnected,
    Joining,
    Joined,
    JoinFailed,
}

/// Receives status transitions.
pub trait StatusSink: Send + Sync {
    fn show(&self, status: DeviceStatus);
}

/// Logs status transitions.
#[derive(Debug, Default)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn show(&self, status: DeviceStatus) {
        info!("Status: {:?}", status);
    }
}

#[cfg(feature = "esp32")]
pub use led::LedStatus;

#[cfg(feature = "esp32")]
mod led {
    use super::{DeviceStatus, StatusSink};
    use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};
    use esp_idf_sys::EspError;
    use std::sync::Mutex;

    /// Single status LED: lit once the device has joined a network.
    pub struct LedStatus {
        pin: Mutex<PinDriver<'static, AnyOutputPin, Output>>,
    }

    impl LedStatus {
        pub fn new(pin: AnyOutputPin) -> Result<Self, EspError> {
            let mut driver = PinDriver::output(pin)?;
            driver.set_low()?;
            Ok(Self {
                pin: Mutex::new(driver),
            })
        }
    }

    impl StatusSink for LedStatus {
        fn show(&self, status: DeviceStatus) {
            let mut pin = crate::lock(&self.pin);
            let result = match status {
                DeviceStatus::Joined => pin.set_high(),
                _ => pin.set_low(),
            };
            if let Err(e) = result {
                log::warn!("Failed to drive status LED: {:?}", e);
            }
        }
    }
}
