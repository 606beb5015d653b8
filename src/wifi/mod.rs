//! Station drivers.
//!
//! - [`EspStation`] - the ESP-IDF Wi-Fi driver (ESP32 only)
//! - [`SimulatedStation`] - scripted networks for the host simulator
//!
//! Both report driver events as [`NetworkEvent`](crate::provision::NetworkEvent)s
//! on an unbounded channel, which the firmware feeds to
//! [`Provisioner::pump_network_events`](crate::provision::Provisioner::pump_network_events).

#[cfg(feature = "esp32")]
mod esp;
mod sim;

#[cfg(feature = "esp32")]
pub use esp::EspStation;
pub use sim::{SimulatedNetwork, SimulatedStation};
