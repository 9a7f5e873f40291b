//! Relay wire messages.
//!
//! Clients send [`ClientFrame`]s, each carrying a correlation id and one
//! [`Request`]. The server answers every request with exactly one
//! [`ServerFrame::Reply`] carrying the same id, and pushes unsolicited
//! [`ServerFrame::Event`]s at any time.
//!
//! ```json
//! {"id":3,"request":{"type":"reserve","device_id":"6f1e...","terminal_id":"desk-1"}}
//! {"kind":"reply","id":3,"reply":{"type":"reservation","accepted":true}}
//! {"kind":"event","event":{"type":"reserved","terminal_id":"desk-1"}}
//! ```

use chrono::{DateTime, Utc};
use scanrelay_core::{DeviceId, RelayRecord, TerminalId};
use serde::{Deserialize, Serialize};

/// A request sent by a device agent or terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub id: u64,
    pub request: Request,
}

impl ClientFrame {
    pub fn new(id: u64, request: Request) -> Self {
        Self { id, request }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Announce a reader on this connection.
    RegisterDevice { name: String },
    Reserve {
        device_id: DeviceId,
        terminal_id: TerminalId,
    },
    Release {
        device_id: DeviceId,
        terminal_id: TerminalId,
    },
    /// Submit a parsed record for relay to the reserving terminal.
    SubmitRecord { record: RelayRecord },
    /// Subscribe this connection to a terminal's group.
    JoinTerminal { terminal_id: TerminalId },
    LeaveTerminal { terminal_id: TerminalId },
    /// Ask a held device to start an active scan.
    Wakeup {
        device_id: DeviceId,
        terminal_id: TerminalId,
    },
    ListDevices {
        #[serde(default)]
        available_only: bool,
    },
    GetDevice { device_id: DeviceId },
    Heartbeat,
}

impl Request {
    /// Short name for log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Request::RegisterDevice { .. } => "register_device",
            Request::Reserve { .. } => "reserve",
            Request::Release { .. } => "release",
            Request::SubmitRecord { .. } => "submit_record",
            Request::JoinTerminal { .. } => "join_terminal",
            Request::LeaveTerminal { .. } => "leave_terminal",
            Request::Wakeup { .. } => "wakeup",
            Request::ListDevices { .. } => "list_devices",
            Request::GetDevice { .. } => "get_device",
            Request::Heartbeat => "heartbeat",
        }
    }
}

/// Anything the server writes to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerFrame {
    Reply { id: u64, reply: Reply },
    Event { event: Event },
}

impl ServerFrame {
    pub fn reply(id: u64, reply: Reply) -> Self {
        ServerFrame::Reply { id, reply }
    }

    pub fn event(event: Event) -> Self {
        ServerFrame::Event { event }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    DeviceRegistered { device_id: DeviceId },
    Reservation { accepted: bool },
    Release { accepted: bool },
    Submit {
        outcome: SubmitOutcome,
        recipients: usize,
    },
    Devices { devices: Vec<DeviceInfo> },
    Device { device: Option<DeviceInfo> },
    Ack,
    Error { message: String },
}

impl Reply {
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            message: message.into(),
        }
    }
}

/// Result of a record submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    Delivered,
    Dropped,
}

/// Server push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    DeviceRegistered { device_id: DeviceId },
    Reserved { terminal_id: TerminalId },
    Released,
    RecordReceived { record: RelayRecord },
    /// Begin an active scan.
    Wakeup,
    /// A device held by this terminal lost its connection.
    DeviceDisconnected { device_id: DeviceId },
}

/// Point-in-time view of a registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_by: Option<TerminalId>,
    pub last_seen: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanrelay_core::MrzRecord;
    use serde_json::{Value, json};

    fn terminal(id: &str) -> TerminalId {
        TerminalId::new(id).unwrap()
    }

    #[test]
    fn test_reserve_request_shape() {
        let device_id = DeviceId::generate();
        let frame = ClientFrame::new(
            3,
            Request::Reserve {
                device_id,
                terminal_id: terminal("desk-1"),
            },
        );

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 3,
                "request": {
                    "type": "reserve",
                    "device_id": device_id.to_string(),
                    "terminal_id": "desk-1",
                }
            })
        );
    }

    #[test]
    fn test_heartbeat_is_bare_tag() {
        let value = serde_json::to_value(ClientFrame::new(1, Request::Heartbeat)).unwrap();
        assert_eq!(value["request"], json!({"type": "heartbeat"}));
    }

    #[test]
    fn test_list_devices_defaults_available_only() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"id":9,"request":{"type":"list_devices"}}"#).unwrap();
        assert_eq!(
            frame.request,
            Request::ListDevices {
                available_only: false
            }
        );
    }

    #[test]
    fn test_blank_terminal_rejected_on_decode() {
        let raw = r#"{"id":1,"request":{"type":"join_terminal","terminal_id":" "}}"#;
        assert!(serde_json::from_str::<ClientFrame>(raw).is_err());
    }

    #[test]
    fn test_reply_frame_shape() {
        let frame = ServerFrame::reply(
            7,
            Reply::Submit {
                outcome: SubmitOutcome::Dropped,
                recipients: 0,
            },
        );
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "kind": "reply",
                "id": 7,
                "reply": {"type": "submit", "outcome": "dropped", "recipients": 0}
            })
        );
    }

    #[test]
    fn test_record_event_carries_flat_record() {
        let record = RelayRecord::new(
            DeviceId::generate(),
            terminal("desk-2"),
            MrzRecord {
                last_name: "ERIKSSON".to_string(),
                ..MrzRecord::default()
            },
        );
        let frame = ServerFrame::event(Event::RecordReceived { record });

        let value: Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["kind"], "event");
        assert_eq!(value["event"]["type"], "record_received");
        assert_eq!(value["event"]["record"]["terminalId"], "desk-2");
        assert_eq!(value["event"]["record"]["lastName"], "ERIKSSON");
        assert!(value["event"]["record"].get("birthDate").is_none());
    }

    #[test]
    fn test_device_info_omits_missing_reservation() {
        let info = DeviceInfo {
            id: DeviceId::generate(),
            name: "USB MRZ Reader".to_string(),
            available: true,
            reserved_by: None,
            last_seen: Utc::now(),
        };
        let value = serde_json::to_value(&info).unwrap();
        assert!(value.get("reservedBy").is_none());
        assert_eq!(value["available"], true);
        assert!(value.get("lastSeen").is_some());

        let back: DeviceInfo = serde_json::from_value(value).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn test_request_names() {
        assert_eq!(Request::Heartbeat.name(), "heartbeat");
        assert_eq!(
            Request::GetDevice {
                device_id: DeviceId::generate()
            }
            .name(),
            "get_device"
        );
    }
}
