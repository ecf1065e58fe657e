//! Gate event workflow record and its public projections
//!
//! A `GateEvent` tracks one vehicle's interaction with one gate, from the
//! sensor trigger to session creation, manual resolution or expiry.
//! - `GateEventNotification` - live payload pushed to subscribers
//! - `GateEventStats` - aggregate view over stored records

use crate::domain::types::{GateDirection, GateEventStatus, GateEventType, LotId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEvent {
    /// Identifier assigned by the originating device
    pub event_id: String,
    pub lot_id: LotId,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<String>,
    pub direction: GateDirection,
    pub event_type: GateEventType,
    pub status: GateEventStatus,
    /// Set for entry-area triggers; these are moved to `awaiting_recognition`
    pub requires_recognition: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_plate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub is_manual_entry: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Append-only processing log
    #[serde(skip_serializing_if = "String::is_empty")]
    pub notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_operator: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl GateEvent {
    pub fn append_note(&mut self, note: &str) {
        if note.is_empty() {
            return;
        }
        if !self.notes.is_empty() {
            self.notes.push_str("; ");
        }
        self.notes.push_str(note);
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_expirable() && self.expires_at.is_some_and(|deadline| deadline < now)
    }
}

/// Live notification payload, one JSON object per broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEventNotification {
    pub event_id: String,
    pub lot_id: LotId,
    pub lot_name: String,
    pub device_id: String,
    pub gate_direction: GateDirection,
    pub event_type: GateEventType,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<String>,
    pub requires_lpr: bool,
    pub requires_user_input: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_camera_id: Option<String>,
}

impl GateEventNotification {
    /// Projection announcing a freshly created gate event
    pub fn created(event: &GateEvent, lot_name: &str) -> Self {
        let message = match event.direction {
            GateDirection::Entry => format!(
                "Vehicle approaching entry gate of lot {lot_name}. Please capture plate image."
            ),
            GateDirection::Exit => format!("Vehicle approaching exit gate of lot {lot_name}."),
        };
        let camera = match event.direction {
            GateDirection::Entry => "entry_camera_1",
            GateDirection::Exit => "exit_camera_1",
        };
        Self {
            event_id: event.event_id.clone(),
            lot_id: event.lot_id,
            lot_name: lot_name.to_string(),
            device_id: event.device_id.clone(),
            gate_direction: event.direction,
            event_type: event.event_type,
            timestamp: event.created_at,
            sensor_id: event.sensor_id.clone(),
            requires_lpr: event.requires_recognition,
            requires_user_input: false,
            message,
            suggested_camera_id: Some(camera.to_string()),
        }
    }

    /// Projection telling viewers a prompt expired without a decision
    pub fn timed_out(event: &GateEvent, now: DateTime<Utc>) -> Self {
        Self {
            event_id: event.event_id.clone(),
            lot_id: event.lot_id,
            lot_name: String::new(),
            device_id: event.device_id.clone(),
            gate_direction: event.direction,
            event_type: GateEventType::Timeout,
            timestamp: now,
            sensor_id: event.sensor_id.clone(),
            requires_lpr: false,
            requires_user_input: false,
            message: format!("Gate event {} expired without a decision.", event.event_id),
            suggested_camera_id: None,
        }
    }
}

/// Aggregate statistics; rates are percentages of `total_events`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GateEventStats {
    pub total_events: usize,
    pub completed_events: usize,
    pub timeout_events: usize,
    pub error_events: usize,
    pub avg_processing_time_minutes: f64,
    pub lpr_success_rate: f64,
    pub auto_session_rate: f64,
    pub manual_intervention_rate: f64,
}

impl GateEventStats {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a GateEvent>) -> Self {
        let mut stats = Self::default();
        let mut recognized = 0usize;
        let mut auto_sessions = 0usize;
        let mut manual = 0usize;
        let mut processing_secs = 0i64;
        let mut processed = 0usize;

        for event in events {
            stats.total_events += 1;
            match event.status {
                GateEventStatus::SessionCreated | GateEventStatus::ManualOverride => {
                    stats.completed_events += 1
                }
                GateEventStatus::Timeout => stats.timeout_events += 1,
                GateEventStatus::Error => stats.error_events += 1,
                _ => {}
            }
            if event.detected_plate.as_deref().is_some_and(|p| !p.is_empty()) {
                recognized += 1;
            }
            if event.session_id.is_some() && !event.is_manual_entry {
                auto_sessions += 1;
            }
            if event.is_manual_entry || event.status == GateEventStatus::ManualOverride {
                manual += 1;
            }
            if let Some(done) = event.completed_at {
                processing_secs += (done - event.created_at).num_seconds();
                processed += 1;
            }
        }

        if processed > 0 {
            stats.avg_processing_time_minutes = processing_secs as f64 / processed as f64 / 60.0;
        }
        if stats.total_events > 0 {
            let total = stats.total_events as f64;
            stats.lpr_success_rate = recognized as f64 * 100.0 / total;
            stats.auto_session_rate = auto_sessions as f64 * 100.0 / total;
            stats.manual_intervention_rate = manual as f64 * 100.0 / total;
        }
        stats
    }
}
