//! Command surface of the BLE stack.
//!
//! [`BleLink`] is what the provisioning core needs from the radio: it is
//! implemented over NimBLE on the device and by a console link in the host
//! simulator. [`Outbound`] serializes value pushes, since only one
//! notification may be in flight at a time.

use super::connection::ConnectionHandle;
use super::reassembly::GattStatus;
use super::registry::Channel;
use super::server::WriteEcho;
use crate::identity::MacAddress;
use std::fmt;
use std::sync::{Arc, Mutex};

/// BLE stack commands used by the provisioning core.
///
/// Implementations must not block; they are called from event callbacks.
pub trait BleLink: Send + Sync {
    /// Register the attribute table with the stack.
    fn start_service(&self) -> Result<(), LinkError>;

    fn start_advertising(&self) -> Result<(), LinkError>;

    fn stop_advertising(&self) -> Result<(), LinkError>;

    /// Ask for a bonded, MITM-protected encrypted link.
    fn request_encryption(&self, peer: MacAddress) -> Result<(), LinkError>;

    fn disconnect(&self, conn_id: u16) -> Result<(), LinkError>;

    /// Answer a write request.
    fn respond(
        &self,
        conn_id: u16,
        trans_id: u32,
        status: GattStatus,
        echo: Option<&WriteEcho>,
    ) -> Result<(), LinkError>;

    /// Push a value to the client; `confirm` requests an indication.
    fn notify(
        &self,
        conn_id: u16,
        channel: Channel,
        payload: &[u8],
        confirm: bool,
    ) -> Result<(), LinkError>;
}

/// BLE stack command failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// No client is connected.
    NotConnected,
    /// The attribute table has not been created.
    NotReady,
    /// The stack rejected the command.
    Stack(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "no client connected"),
            Self::NotReady => write!(f, "attribute table not created"),
            Self::Stack(msg) => write!(f, "BLE stack error: {}", msg),
        }
    }
}

impl std::error::Error for LinkError {}

/// Serialized sender for notifications and indications.
pub struct Outbound {
    link: Arc<dyn BleLink>,
    send_lock: Mutex<()>,
}

impl Outbound {
    pub fn new(link: Arc<dyn BleLink>) -> Self {
        Self {
            link,
            send_lock: Mutex::new(()),
        }
    }

    pub fn link(&self) -> &dyn BleLink {
        self.link.as_ref()
    }

    /// Push `payload` on `channel` to the connected client.
    pub fn send(
        &self,
        connection: Option<ConnectionHandle>,
        channel: Channel,
        payload: &[u8],
        confirm: bool,
    ) -> Result<(), LinkError> {
        let conn = connection.ok_or(LinkError::NotConnected)?;
        let _guard = crate::lock(&self.send_lock);
        self.link.notify(conn.conn_id, channel, payload, confirm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingLink;

    #[test]
    fn test_send_requires_connection() {
        let link = Arc::new(RecordingLink::new());
        let outbound = Outbound::new(link.clone());
        let result = outbound.send(None, Channel::Command, b"{}", false);
        assert_eq!(result, Err(LinkError::NotConnected));
        assert!(link.sent().is_empty());
    }

    #[test]
    fn test_send_reaches_link() {
        let link = Arc::new(RecordingLink::new());
        let outbound = Outbound::new(link.clone());
        let conn = ConnectionHandle {
            conn_id: 4,
            peer: MacAddress::new([0; 6]),
        };
        outbound.send(Some(conn), Channel::Command, b"{}", false).unwrap();
        assert_eq!(link.sent(), vec![(Channel::Command, b"{}".to_vec())]);
    }

    #[test]
    fn test_concurrent_sends_are_serialized() {
        let link = Arc::new(RecordingLink::new());
        let outbound = Arc::new(Outbound::new(link.clone()));
        let conn = ConnectionHandle {
            conn_id: 4,
            peer: MacAddress::new([0; 6]),
        };

        let workers: Vec<_> = (0..4u8)
            .map(|i| {
                let outbound = outbound.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        outbound.send(Some(conn), Channel::Command, &[i], false).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(link.sent().len(), 100);
        assert_eq!(link.max_concurrent_sends(), 1);
    }
}
