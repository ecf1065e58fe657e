//! Event decoder - raw queue body to typed device message
//!
//! Decoding is two-phase: the envelope is parsed first so the audit log can
//! be written even when the type-specific payload turns out to be malformed.

use crate::domain::messages::{DeviceEvent, Envelope, MessageType};
use crate::infra::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;

/// Parse the common envelope, keeping the raw body verbatim
pub fn decode_envelope(raw: &str) -> CoreResult<Envelope> {
    let mut envelope: Envelope = serde_json::from_str(raw)
        .map_err(|e| CoreError::Decode(format!("invalid envelope: {e}")))?;
    envelope.raw = raw.to_string();
    Ok(envelope)
}

/// Re-parse the raw body into the payload named by the discriminant
///
/// Unknown message types decode to `DeviceEvent::Unknown`, never an error.
pub fn decode_event(envelope: &Envelope) -> CoreResult<DeviceEvent> {
    let raw = envelope.raw.as_str();
    let event = match envelope.kind() {
        MessageType::Startup => DeviceEvent::Startup(payload(raw, "startup")?),
        MessageType::BarrierState => DeviceEvent::BarrierState(payload(raw, "barrier_state")?),
        MessageType::GateEvent => DeviceEvent::GateSensor(payload(raw, "gate_event")?),
        MessageType::SlotStatus => DeviceEvent::SlotStatus(payload(raw, "slot_status")?),
        MessageType::ParkingSummary => {
            DeviceEvent::ParkingSummary(payload(raw, "parking_summary")?)
        }
        MessageType::SystemStatus => DeviceEvent::SystemStatus(payload(raw, "system_status")?),
        MessageType::Error => DeviceEvent::Error(payload(raw, "error")?),
        MessageType::CommandAcknowledgement => {
            DeviceEvent::CommandAck(payload(raw, "command_acknowledgement")?)
        }
        MessageType::Unknown(other) => DeviceEvent::Unknown(other),
    };
    Ok(event)
}

fn payload<T: DeserializeOwned>(raw: &str, kind: &str) -> CoreResult<T> {
    serde_json::from_str(raw).map_err(|e| CoreError::Decode(format!("invalid {kind} payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::messages::DeviceMessage;
    use crate::domain::types::BarrierState;

    fn decode(raw: &str) -> CoreResult<DeviceMessage> {
        let envelope = decode_envelope(raw)?;
        let event = decode_event(&envelope)?;
        Ok(DeviceMessage { envelope, event })
    }

    #[test]
    fn test_decode_slot_status() {
        let raw = r#"{"device_id":"esp32-01","message_type":"slot_status","timestamp":"2026-03-01T08:00:00Z","slot_id":"S1","occupied":true}"#;
        let message = decode(raw).unwrap();
        assert_eq!(message.envelope.device_id, "esp32-01");
        assert_eq!(message.envelope.raw, raw);
        match message.event {
            DeviceEvent::SlotStatus(report) => {
                assert_eq!(report.slot_id, "S1");
                assert!(report.occupied);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_barrier_state() {
        let raw = r#"{"device_id":"esp32-01","message_type":"barrier_state","timestamp":"2026-03-01T08:00:00Z","barrier_id":"esp32-01_entry","barrier_type":"entry","barrier_state":"opened_command"}"#;
        match decode(raw).unwrap().event {
            DeviceEvent::BarrierState(report) => {
                assert_eq!(report.barrier_state, BarrierState::OpenedCommand);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let raw = r#"{"device_id":"esp32-01","message_type":"firmware_ota","timestamp":"2026-03-01T08:00:00Z"}"#;
        let message = decode(raw).unwrap();
        assert_eq!(message.event, DeviceEvent::Unknown("firmware_ota".to_string()));
    }

    #[test]
    fn test_malformed_json_is_decode_error() {
        let err = decode("{not json").unwrap_err();
        assert!(matches!(err, CoreError::Decode(_)));
    }

    #[test]
    fn test_missing_envelope_field_is_decode_error() {
        let err = decode_envelope(r#"{"device_id":"esp32-01","timestamp":"x"}"#).unwrap_err();
        assert!(matches!(err, CoreError::Decode(_)));
    }

    #[test]
    fn test_bad_payload_keeps_envelope() {
        let raw = r#"{"device_id":"esp32-01","message_type":"slot_status","timestamp":"2026-03-01T08:00:00Z","occupied":"yes"}"#;
        let envelope = decode_envelope(raw).unwrap();
        assert_eq!(envelope.message_type, "slot_status");
        let err = decode_event(&envelope).unwrap_err();
        assert!(err.to_string().contains("slot_status"));
    }
}
