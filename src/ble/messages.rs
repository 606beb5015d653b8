//! JSON replies sent to the companion app.
//!
//! Every reply travels over the command channel as a single notification.

use crate::provision::AccessPoint;
use log::warn;
use serde::Serialize;
use serde_json::{Map, Value};

/// Progress of a credential hand-off, as reported to the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WifiStatus {
    CredentialsReceived,
    Connected,
    Failed,
    Timeout,
    Error,
}

/// `{"wifi_status": ..., "message": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WifiStatusReply {
    pub wifi_status: WifiStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WifiStatusReply {
    pub fn new(wifi_status: WifiStatus) -> Self {
        Self {
            wifi_status,
            message: None,
        }
    }

    pub fn with_message(wifi_status: WifiStatus, message: impl Into<String>) -> Self {
        Self {
            wifi_status,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_message(WifiStatus::Error, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Success,
    Error,
}

/// Reply to `verify_device`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReply {
    pub status: VerifyStatus,
    pub message: &'static str,
}

impl VerifyReply {
    pub fn new(verified: bool) -> Self {
        if verified {
            Self {
                status: VerifyStatus::Success,
                message: "Device verified",
            }
        } else {
            Self {
                status: VerifyStatus::Error,
                message: "Unknown device",
            }
        }
    }
}

/// Reply to `get_deviceid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdReply<'a> {
    pub device_id: &'a str,
    pub device_type: &'a str,
}

/// Serialize a reply.
///
/// Reply types hold only strings and enums, so serialization cannot fail in
/// practice; a failure yields an empty payload that the sender drops.
pub fn to_payload<T: Serialize>(reply: &T) -> Vec<u8> {
    serde_json::to_vec(reply).unwrap_or_else(|e| {
        log::error!("Failed to serialize reply: {}", e);
        Vec::new()
    })
}

/// Ranked scan result: `{"event_type":"scan_list","data":{"<ssid>":"<rssi>",...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    event_type: &'static str,
    data: Map<String, Value>,
}

impl ScanReport {
    const EVENT_TYPE: &'static str = "scan_list";

    /// Build a report from raw scan results.
    ///
    /// Hidden networks are skipped, networks are ranked strongest first, a
    /// repeated SSID keeps its strongest entry, and the list is capped at
    /// `max_entries`. Entries are then dropped from the weak end until the
    /// serialized report fits in `max_payload` bytes.
    ///
    /// A budget too small for even an empty report yields the empty report,
    /// which is the smallest well-formed answer.
    pub fn build(access_points: &[AccessPoint], max_entries: usize, max_payload: usize) -> Self {
        let empty = Self::from_entries(&[]);
        let floor = empty.encoded_len();
        if max_payload < floor {
            warn!(
                "Scan payload budget {} is below the empty report size {}; listing no networks",
                max_payload, floor
            );
            return empty;
        }

        let mut ranked: Vec<&AccessPoint> = access_points
            .iter()
            .filter(|ap| !ap.ssid.is_empty())
            .collect();
        ranked.sort_by(|a, b| b.rssi.cmp(&a.rssi));

        let mut entries: Vec<(&str, i8)> = Vec::new();
        for ap in ranked {
            if entries.len() >= max_entries {
                break;
            }
            if !entries.iter().any(|(ssid, _)| *ssid == ap.ssid) {
                entries.push((&ap.ssid, ap.rssi));
            }
        }

        let mut keep = entries.len();
        let mut report = Self::from_entries(&entries[..keep]);
        while keep > 0 && report.encoded_len() > max_payload {
            keep -= 1;
            report = Self::from_entries(&entries[..keep]);
        }
        report
    }

    fn from_entries(entries: &[(&str, i8)]) -> Self {
        let data = entries
            .iter()
            .map(|(ssid, rssi)| (ssid.to_string(), Value::String(rssi.to_string())))
            .collect();
        Self {
            event_type: Self::EVENT_TYPE,
            data,
        }
    }

    /// Report a scan that could not complete.
    pub fn error(reason: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("error".to_string(), Value::String(reason.into()));
        Self {
            event_type: Self::EVENT_TYPE,
            data,
        }
    }

    /// Number of networks listed.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_payload(&self) -> Vec<u8> {
        to_payload(self)
    }

    fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map_or(usize::MAX, |v| v.len())
    }
}
