//! Referenced persistence entities
//!
//! Lots, slots, barriers, devices and sessions are owned by the relational
//! store; this crate only reads them and applies narrow status updates.

use crate::domain::types::{
    BarrierCommand, BarrierState, BarrierType, DeviceStatus, LotId, ProcessedStatus, SessionId,
    SlotStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Update-source tag for device-driven writes
pub const SOURCE_DEVICE: &str = "device";
/// Update-source tag for slot assignment during check-in
pub const SOURCE_CHECK_IN: &str = "session_check_in";
/// Update-source tag for commands published from this service
pub const SOURCE_COMMAND_SENT: &str = "server_command_sent";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingLot {
    pub id: LotId,
    pub name: String,
    #[serde(default)]
    pub address: String,
    /// Zero when the lot does not manage individual slots
    #[serde(default)]
    pub total_slots: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingSlot {
    pub id: i64,
    pub lot_id: LotId,
    /// Local identifier reported by the device ("S1", "A-03")
    pub slot_identifier: String,
    pub device_id: String,
    pub status: SlotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Barrier {
    pub id: i64,
    pub lot_id: LotId,
    /// Identifier reported by the controller, e.g. "esp32-01_entry"
    pub barrier_identifier: String,
    pub device_id: String,
    pub barrier_type: BarrierType,
    pub current_state: BarrierState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_command: Option<BarrierCommand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_command_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Edge controller registered under its thing name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub thing_name: String,
    #[serde(default)]
    pub lot_id: Option<LotId>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub last_rssi: Option<i32>,
    #[serde(default)]
    pub last_free_heap: Option<u32>,
    #[serde(default)]
    pub last_uptime_seconds: Option<i64>,
    pub status: DeviceStatus,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Device {
    pub fn new(thing_name: impl Into<String>, lot_id: Option<LotId>) -> Self {
        Self {
            thing_name: thing_name.into(),
            lot_id,
            firmware_version: None,
            ip_address: None,
            mac_address: None,
            last_rssi: None,
            last_free_heap: None,
            last_uptime_seconds: None,
            status: DeviceStatus::Unknown,
            last_seen_at: None,
            updated_at: None,
        }
    }
}

/// Device-reported telemetry merged into the device row; `None` keeps the stored value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceTelemetry {
    pub firmware_version: Option<String>,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub rssi: Option<i32>,
    pub free_heap: Option<u32>,
    pub uptime_seconds: Option<i64>,
}

impl DeviceTelemetry {
    pub fn apply_to(&self, device: &mut Device) {
        if let Some(v) = &self.firmware_version {
            device.firmware_version = Some(v.clone());
        }
        if let Some(v) = &self.ip_address {
            device.ip_address = Some(v.clone());
        }
        if let Some(v) = &self.mac_address {
            device.mac_address = Some(v.clone());
        }
        if self.rssi.is_some() {
            device.last_rssi = self.rssi;
        }
        if self.free_heap.is_some() {
            device.last_free_heap = self.free_heap;
        }
        if self.uptime_seconds.is_some() {
            device.last_uptime_seconds = self.uptime_seconds;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingSession {
    pub id: SessionId,
    pub lot_id: LotId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<i64>,
    pub device_id: String,
    pub vehicle_identifier: String,
    pub entry_time: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_gate_event_id: Option<String>,
}

/// Session to be inserted; the repository assigns the id
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub lot_id: LotId,
    pub slot_id: Option<i64>,
    pub device_id: String,
    pub vehicle_identifier: String,
    pub entry_time: DateTime<Utc>,
    pub entry_gate_event_id: Option<String>,
}

/// Audit record of one raw inbound message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceEventLog {
    pub id: i64,
    pub received_at: DateTime<Utc>,
    pub device_id: String,
    pub mqtt_topic: String,
    pub message_type: String,
    pub payload: String,
    pub processed_status: ProcessedStatus,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub processing_notes: String,
}

/// Audit entry to be inserted; the repository assigns the id
#[derive(Debug, Clone, PartialEq)]
pub struct NewDeviceEventLog {
    pub received_at: DateTime<Utc>,
    pub device_id: String,
    pub mqtt_topic: String,
    pub message_type: String,
    pub payload: String,
    pub processed_status: ProcessedStatus,
    pub processing_notes: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_keeps_unreported_fields() {
        let mut device = Device::new("esp32-01", Some(LotId(1)));
        device.firmware_version = Some("1.0.0".to_string());
        device.last_rssi = Some(-70);

        let telemetry = DeviceTelemetry {
            ip_address: Some("10.0.0.5".to_string()),
            rssi: Some(-55),
            ..Default::default()
        };
        telemetry.apply_to(&mut device);

        assert_eq!(device.firmware_version.as_deref(), Some("1.0.0"));
        assert_eq!(device.ip_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(device.last_rssi, Some(-55));
        assert_eq!(device.lot_id, Some(LotId(1)));
    }
}
