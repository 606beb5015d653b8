//! Command dispatcher for completed attribute writes.
//!
//! # Identity channel (A)
//!
//! - the shared-secret token, verbatim: authentication signal
//! - `{"cmd":"get_deviceid"}`: reply with device id and type
//! - anything else: logged as an authentication failure
//!
//! # Command channel (B)
//!
//! ```text
//! {"cmd_type":"scan_list"}
//! {"cmd_type":"verify_device","device_id":"<id>"}
//! {"cmd_type":"connect","ssid":"<s>","password":"<p>","device_id":"<id>"}
//! {"SSID":"<s>","PASSWORD":"<p>","device_id":"<id>"}        (legacy)
//! ```
//!
//! A payload that is not valid JSON is logged and dropped without a reply.

use super::messages::{to_payload, DeviceIdReply, VerifyReply, WifiStatusReply};
use crate::config::Credentials;
use crate::identity::DeviceIdentity;
use log::{debug, info, warn};
use serde_json::Value;

/// Work produced by a dispatched write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// The shared-secret token was presented.
    TokenAccepted,
    /// Send this payload on the command channel.
    Reply(Vec<u8>),
    /// Start a network scan.
    Scan,
    /// Hand these credentials to the join state machine.
    Submit(Credentials),
}

/// Routes payloads to actions.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    identity: DeviceIdentity,
    auth_token: String,
}

impl Dispatcher {
    pub fn new(identity: DeviceIdentity, auth_token: impl Into<String>) -> Self {
        Self {
            identity,
            auth_token: auth_token.into(),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Handle a write to the identity channel.
    pub fn identity_write(&self, payload: &[u8]) -> Option<Action> {
        let payload = until_nul(payload);

        if payload == self.auth_token.as_bytes() {
            info!("Shared-secret token accepted");
            return Some(Action::TokenAccepted);
        }

        if payload.first() == Some(&b'{') {
            let root: Value = match serde_json::from_slice(payload) {
                Ok(root) => root,
                Err(e) => {
                    warn!("Identity channel: JSON parse error: {}", e);
                    return None;
                }
            };
            if root.get("cmd").and_then(Value::as_str) == Some("get_deviceid") {
                info!("Device id requested: {}", self.identity.device_id());
                return Some(Action::Reply(to_payload(&DeviceIdReply {
                    device_id: self.identity.device_id(),
                    device_type: self.identity.device_type(),
                })));
            }
            debug!("Identity channel: ignoring JSON without get_deviceid");
            return None;
        }

        warn!("Authentication failed: unexpected identity payload ({} bytes)", payload.len());
        None
    }

    /// Handle a write to the command channel.
    pub fn command_write(&self, payload: &[u8]) -> Option<Action> {
        let payload = until_nul(payload);
        let root: Value = match serde_json::from_slice(payload) {
            Ok(root) => root,
            Err(e) => {
                warn!("Command channel: JSON parse error: {}", e);
                return None;
            }
        };

        match root.get("cmd_type").and_then(Value::as_str) {
            Some("scan_list") => {
                info!("Scan requested");
                Some(Action::Scan)
            }
            Some("verify_device") => {
                let verified = match root.get("device_id").and_then(Value::as_str) {
                    Some(candidate) => self.identity.matches(candidate),
                    None => {
                        warn!("verify_device without a device_id");
                        false
                    }
                };
                info!("Device verification: {}", if verified { "match" } else { "mismatch" });
                Some(Action::Reply(to_payload(&VerifyReply::new(verified))))
            }
            Some("connect") => Some(credentials_action(&root, "ssid", "password")),
            Some(other) => {
                warn!("Unknown command type: {}", other);
                None
            }
            None => {
                // Legacy app versions send bare credentials
                if root.get("SSID").is_some() && root.get("PASSWORD").is_some() {
                    Some(credentials_action(&root, "SSID", "PASSWORD"))
                } else {
                    debug!("Command channel: no cmd_type and no legacy credentials");
                    None
                }
            }
        }
    }
}

fn credentials_action(root: &Value, ssid_key: &str, password_key: &str) -> Action {
    let ssid = root.get(ssid_key).and_then(Value::as_str);
    let password = root.get(password_key).and_then(Value::as_str);
    let device_id = root.get("device_id").and_then(Value::as_str);

    let (Some(ssid), Some(password)) = (ssid, password) else {
        warn!("Missing or invalid SSID or PASSWORD in JSON");
        return Action::Reply(to_payload(&WifiStatusReply::error(
            "Missing SSID or PASSWORD",
        )));
    };

    match Credentials::new(ssid, password, device_id) {
        Ok(creds) => {
            info!("Received WiFi credentials - SSID: {}", creds.ssid());
            Action::Submit(creds)
        }
        Err(e) => {
            warn!("Rejected WiFi credentials for SSID {:?}: {}", ssid, e);
            Action::Reply(to_payload(&WifiStatusReply::error(e.to_string())))
        }
    }
}

/// The value up to its first NUL byte.
fn until_nul(payload: &[u8]) -> &[u8] {
    match payload.iter().position(|&b| b == 0) {
        Some(end) => &payload[..end],
        None => payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisionerConfig;
    use crate::identity::MacAddress;

    fn dispatcher() -> Dispatcher {
        let config = ProvisionerConfig::default();
        let identity = DeviceIdentity::from_mac(
            MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
            &config,
        );
        Dispatcher::new(identity, config.auth_token)
    }

    fn reply(action: Option<Action>) -> Value {
        match action {
            Some(Action::Reply(payload)) => serde_json::from_slice(&payload).unwrap(),
            other => panic!("expected reply, got {:?}", other),
        }
    }

    // ==== Identity Channel Tests ====

    #[test]
    fn test_token_is_accepted() {
        assert_eq!(dispatcher().identity_write(b"BLAZE"), Some(Action::TokenAccepted));
        assert_eq!(dispatcher().identity_write(b"BLAZE\0junk"), Some(Action::TokenAccepted));
    }

    #[test]
    fn test_wrong_token_is_ignored() {
        assert_eq!(dispatcher().identity_write(b"blaze"), None);
        assert_eq!(dispatcher().identity_write(b"BLAZE "), None);
    }

    #[test]
    fn test_get_device_id() {
        let value = reply(dispatcher().identity_write(br#"{"cmd":"get_deviceid"}"#));
        assert_eq!(
            value,
            serde_json::json!({"device_id": "AA:BB:CC:DD:EE:FF", "device_type": "AIOS_1"})
        );
    }

    #[test]
    fn test_identity_json_without_command() {
        assert_eq!(dispatcher().identity_write(br#"{"cmd":"reboot"}"#), None);
        assert_eq!(dispatcher().identity_write(b"{not json"), None);
    }

    // ==== Command Channel Tests ====

    #[test]
    fn test_scan_list() {
        assert_eq!(
            dispatcher().command_write(br#"{"cmd_type":"scan_list"}"#),
            Some(Action::Scan)
        );
    }

    #[test]
    fn test_verify_device() {
        let ok = reply(dispatcher().command_write(
            br#"{"cmd_type":"verify_device","device_id":"AA:BB:CC:DD:EE:FF"}"#,
        ));
        assert_eq!(ok["status"], "success");
        assert_eq!(ok["message"], "Device verified");

        let bad = reply(dispatcher().command_write(
            br#"{"cmd_type":"verify_device","device_id":"11:22:33:44:55:66"}"#,
        ));
        assert_eq!(bad["status"], "error");
        assert_eq!(bad["message"], "Unknown device");
    }

    #[test]
    fn test_verify_device_without_id_is_error() {
        let value = reply(dispatcher().command_write(br#"{"cmd_type":"verify_device"}"#));
        assert_eq!(value["status"], "error");
        let value = reply(dispatcher().command_write(br#"{"cmd_type":"verify_device","device_id":7}"#));
        assert_eq!(value["status"], "error");
    }

    #[test]
    fn test_connect() {
        let action = dispatcher().command_write(
            br#"{"cmd_type":"connect","ssid":"Home","password":"secret123","device_id":"AA:BB:CC:DD:EE:FF"}"#,
        );
        let expected = Credentials::new("Home", "secret123", Some("AA:BB:CC:DD:EE:FF")).unwrap();
        assert_eq!(action, Some(Action::Submit(expected)));
    }

    #[test]
    fn test_connect_without_device_id() {
        let action =
            dispatcher().command_write(br#"{"cmd_type":"connect","ssid":"Home","password":""}"#);
        let expected = Credentials::new("Home", "", None).unwrap();
        assert_eq!(action, Some(Action::Submit(expected)));
    }

    #[test]
    fn test_connect_missing_fields() {
        let value = reply(dispatcher().command_write(br#"{"cmd_type":"connect","ssid":"Home"}"#));
        assert_eq!(
            value,
            serde_json::json!({"wifi_status": "error", "message": "Missing SSID or PASSWORD"})
        );
        let value = reply(
            dispatcher().command_write(br#"{"cmd_type":"connect","ssid":1,"password":"x"}"#),
        );
        assert_eq!(value["wifi_status"], "error");
    }

    #[test]
    fn test_connect_invalid_credentials() {
        let value = reply(
            dispatcher().command_write(br#"{"cmd_type":"connect","ssid":"Home","password":"short"}"#),
        );
        assert_eq!(value["wifi_status"], "error");
        assert!(value["message"].as_str().unwrap().contains("password too short"));
    }

    #[test]
    fn test_legacy_credentials() {
        let action = dispatcher()
            .command_write(br#"{"SSID":"Home","PASSWORD":"secret123","device_id":"x"}"#);
        let expected = Credentials::new("Home", "secret123", Some("x")).unwrap();
        assert_eq!(action, Some(Action::Submit(expected)));
    }

    #[test]
    fn test_legacy_without_fields_is_ignored() {
        assert_eq!(dispatcher().command_write(br#"{"SSID":"Home"}"#), None);
        assert_eq!(dispatcher().command_write(br#"{}"#), None);
    }

    #[test]
    fn test_unknown_command_and_malformed_json_are_silent() {
        assert_eq!(dispatcher().command_write(br#"{"cmd_type":"reboot"}"#), None);
        assert_eq!(dispatcher().command_write(br#"{"cmd_type":"connect""#), None);
        assert_eq!(dispatcher().command_write(b""), None);
    }

    #[test]
    fn test_payload_ends_at_nul() {
        assert_eq!(
            dispatcher().command_write(b"{\"cmd_type\":\"scan_list\"}\0\xff\xfe"),
            Some(Action::Scan)
        );
    }
}
