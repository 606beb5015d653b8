//! BLE provisioning service.
//!
//! Layered from the wire up:
//!
//! - [`registry`] - attribute table layout and handle mapping
//! - [`connection`] - advertising payloads, security parameters, per-link session
//! - [`reassembly`] - prepare/execute write buffers
//! - [`dispatch`] - JSON command routing
//! - [`messages`] - JSON replies
//! - [`server`] - the event-to-effect state machine tying these together
//! - [`link`] - commands the core issues to the BLE stack
//! - `nimble` - the NimBLE adapter (ESP32 only)

pub mod connection;
pub mod dispatch;
pub mod link;
pub mod messages;
pub mod reassembly;
pub mod registry;
pub mod server;

#[cfg(feature = "esp32")]
mod nimble;

pub use connection::{ConnectionHandle, Session, Subscription};
pub use link::{BleLink, LinkError, Outbound};
pub use messages::{ScanReport, WifiStatus, WifiStatusReply};
pub use reassembly::{GattStatus, PrepareWriteBuffer, ReassemblyError};
pub use registry::{Channel, HandleTable, RegistryError};
pub use server::{Effect, GattEvent, GattServer};

#[cfg(feature = "esp32")]
pub use nimble::NimbleLink;
