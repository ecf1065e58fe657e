//! Device message envelope and typed payloads
//!
//! Every queue message carries a common envelope (`device_id`,
//! `message_type`, `timestamp`) plus type-specific fields. The decoder parses
//! the envelope first, then re-parses the raw body into one of the payloads
//! below according to the discriminant.

use crate::domain::entities::DeviceTelemetry;
use crate::domain::types::{BarrierCommand, BarrierState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Common envelope; the raw body is kept for audit and re-parsing
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    pub device_id: String,
    pub message_type: String,
    /// ISO-8601 time reported by the device
    pub timestamp: String,
    /// Added by the ingress bridge
    #[serde(default)]
    pub received_mqtt_topic: Option<String>,
    #[serde(default)]
    pub client_id_iot: Option<String>,
    #[serde(default)]
    pub iot_processing_timestamp: Option<i64>,
    #[serde(skip)]
    pub raw: String,
}

impl Envelope {
    /// Device-reported event time, if it parses as RFC 3339
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.timestamp.trim()).ok().map(|t| t.with_timezone(&Utc))
    }

    pub fn kind(&self) -> MessageType {
        MessageType::parse(&self.message_type)
    }
}

/// Message-type discriminant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Startup,
    BarrierState,
    GateEvent,
    SlotStatus,
    ParkingSummary,
    SystemStatus,
    Error,
    CommandAcknowledgement,
    Unknown(String),
}

impl MessageType {
    pub fn parse(s: &str) -> Self {
        match s {
            "startup" => Self::Startup,
            "barrier_state" => Self::BarrierState,
            "gate_event" => Self::GateEvent,
            "slot_status" => Self::SlotStatus,
            "parking_summary" => Self::ParkingSummary,
            "system_status" => Self::SystemStatus,
            "error" => Self::Error,
            "command_acknowledgement" => Self::CommandAcknowledgement,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Startup => "startup",
            Self::BarrierState => "barrier_state",
            Self::GateEvent => "gate_event",
            Self::SlotStatus => "slot_status",
            Self::ParkingSummary => "parking_summary",
            Self::SystemStatus => "system_status",
            Self::Error => "error",
            Self::CommandAcknowledgement => "command_acknowledgement",
            Self::Unknown(s) => s,
        }
    }
}

/// Typed device event; `Unknown` is accepted and ignored by dispatch
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Startup(StartupReport),
    BarrierState(BarrierStateReport),
    GateSensor(GateSensorReport),
    SlotStatus(SlotStatusReport),
    ParkingSummary(ParkingSummaryReport),
    SystemStatus(SystemStatusReport),
    Error(DeviceErrorReport),
    CommandAck(CommandAckReport),
    Unknown(String),
}

/// Decoded message: envelope plus typed payload
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceMessage {
    pub envelope: Envelope,
    pub event: DeviceEvent,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StartupReport {
    #[serde(rename = "firmware")]
    pub firmware_version: String,
    pub id: String,
    pub mac: String,
    pub ip: String,
    pub rssi: i32,
    pub uptime: i64,
    pub startup_time: String,
}

impl StartupReport {
    pub fn telemetry(&self) -> DeviceTelemetry {
        DeviceTelemetry {
            firmware_version: non_empty(&self.firmware_version),
            ip_address: non_empty(&self.ip),
            mac_address: non_empty(&self.mac),
            rssi: non_zero(self.rssi),
            free_heap: None,
            uptime_seconds: (self.uptime != 0).then_some(self.uptime),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BarrierStateReport {
    #[serde(default)]
    pub barrier_type: String,
    pub barrier_state: BarrierState,
    pub barrier_id: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub device_uptime: i64,
    #[serde(default)]
    pub rssi: i32,
}

impl BarrierStateReport {
    pub fn implied_command(&self) -> Option<BarrierCommand> {
        self.barrier_state.implied_command()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GateSensorReport {
    pub sensor_id: String,
    /// "entry_approach", "entry_passed", "exit_approach", ...
    pub gate_area: String,
    /// "presence_detected", "vehicle_at_gate", "vehicle_passed", ...
    pub event_type: String,
    pub event_id: String,
    pub location: String,
    pub zone: String,
    pub is_entry_area: bool,
    pub requires_action: bool,
    pub related_barrier: String,
    pub related_barrier_state: String,
}

impl GateSensorReport {
    /// Only at-gate, presence and passed-in-entry-area events open a workflow
    pub fn opens_workflow(&self) -> bool {
        match self.event_type.as_str() {
            "vehicle_at_gate" | "presence_detected" => true,
            "vehicle_passed" => self.is_entry_area,
            _ => false,
        }
    }

    /// Entry-area triggers need plate recognition
    pub fn requires_recognition(&self) -> bool {
        self.is_entry_area || self.gate_area == "entry_approach"
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SlotStatusReport {
    pub slot_id: String,
    pub occupied: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ParkingSummaryReport {
    pub total_slots: u32,
    pub occupied_slots: u32,
    pub available_slots: u32,
    pub occupancy_percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SystemStatusReport {
    pub firmware_version: String,
    pub uptime_seconds: i64,
    pub free_heap: u32,
    pub heap_fragmentation: u8,
    pub cpu_freq_mhz: u32,
    pub wifi_ssid: String,
    pub wifi_rssi: i32,
    pub wifi_ip: String,
    pub wifi_mac: String,
    pub mqtt_connected: bool,
    pub mqtt_reconnect_count: u32,
    pub power_mode: String,
    #[serde(rename = "last_activity_seconds_ago")]
    pub last_activity_secs_ago: i64,
    pub total_slots: u32,
    pub occupied_slots: u32,
    pub available_slots: u32,
    pub occupancy_percentage: f64,
    pub entry_barrier_open: bool,
    pub exit_barrier_open: bool,
}

impl SystemStatusReport {
    pub fn telemetry(&self) -> DeviceTelemetry {
        DeviceTelemetry {
            firmware_version: non_empty(&self.firmware_version),
            ip_address: non_empty(&self.wifi_ip),
            mac_address: non_empty(&self.wifi_mac),
            rssi: non_zero(self.wifi_rssi),
            free_heap: (self.free_heap != 0).then_some(self.free_heap),
            uptime_seconds: (self.uptime_seconds != 0).then_some(self.uptime_seconds),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeviceErrorReport {
    pub error_code: i32,
    pub error_message: String,
    pub error_id: String,
    pub uptime_seconds: i64,
    pub free_heap: u32,
    pub wifi_rssi: i32,
    pub mqtt_connected: bool,
    pub power_mode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CommandAckReport {
    pub status: String,
    pub request_id: String,
    pub received_action: String,
}

/// Outbound barrier command published to the controller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarrierCommandPayload {
    pub command: BarrierCommand,
    pub request_id: String,
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn non_zero(v: i32) -> Option<i32> {
    (v != 0).then_some(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor(event_type: &str, gate_area: &str, is_entry_area: bool) -> GateSensorReport {
        GateSensorReport {
            event_type: event_type.to_string(),
            gate_area: gate_area.to_string(),
            is_entry_area,
            ..Default::default()
        }
    }

    #[test]
    fn test_trigger_filter() {
        assert!(sensor("vehicle_at_gate", "exit_approach", false).opens_workflow());
        assert!(sensor("presence_detected", "transit", false).opens_workflow());
        assert!(sensor("vehicle_passed", "entry_passed", true).opens_workflow());
        assert!(!sensor("vehicle_passed", "exit_passed", false).opens_workflow());
        assert!(!sensor("vehicle_left", "entry_approach", true).opens_workflow());
        assert!(!sensor("", "", false).opens_workflow());
    }

    #[test]
    fn test_requires_recognition() {
        assert!(sensor("vehicle_at_gate", "entry_approach", false).requires_recognition());
        assert!(sensor("vehicle_at_gate", "exit_approach", true).requires_recognition());
        assert!(!sensor("vehicle_at_gate", "entry_passed", false).requires_recognition());
        assert!(!sensor("vehicle_at_gate", "exit_approach", false).requires_recognition());
    }

    #[test]
    fn test_message_type_round() {
        assert_eq!(MessageType::parse("slot_status"), MessageType::SlotStatus);
        let unknown = MessageType::parse("firmware_update");
        assert_eq!(unknown, MessageType::Unknown("firmware_update".to_string()));
        assert_eq!(unknown.as_str(), "firmware_update");
    }

    #[test]
    fn test_envelope_event_time() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"device_id":"esp32-01","message_type":"slot_status","timestamp":"2025-06-01T08:30:00.250Z"}"#,
        )
        .unwrap();
        let t = envelope.event_time().unwrap();
        assert_eq!(t.to_rfc3339(), "2025-06-01T08:30:00.250+00:00");

        let bad = Envelope { timestamp: "yesterday".to_string(), ..envelope };
        assert!(bad.event_time().is_none());
    }

    #[test]
    fn test_system_status_telemetry_skips_zero_values() {
        let report = SystemStatusReport {
            firmware_version: "2.1.0".to_string(),
            wifi_rssi: -61,
            ..Default::default()
        };
        let telemetry = report.telemetry();
        assert_eq!(telemetry.firmware_version.as_deref(), Some("2.1.0"));
        assert_eq!(telemetry.rssi, Some(-61));
        assert_eq!(telemetry.free_heap, None);
        assert_eq!(telemetry.ip_address, None);
    }

    #[test]
    fn test_command_payload_json() {
        let payload = BarrierCommandPayload {
            command: BarrierCommand::Open,
            request_id: "req-1".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"command":"open","request_id":"req-1"}"#
        );
    }
}
