//! Recognition results and automatic check-in

use super::{required_plate, transition, GateCorrelator};
use crate::domain::entities::ParkingSession;
use crate::domain::gate_event::GateEvent;
use crate::domain::types::{GateDirection, GateEventStatus, SessionId};
use crate::infra::error::{CoreError, CoreResult};
use crate::services::check_in::CheckInRequest;
use tracing::{error, info, warn};

/// Input to a recognition request
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionInput {
    /// Raw image bytes for the recognizer
    Image(Vec<u8>),
    /// Operator-typed plate; processed with confidence 1.0
    Manual(String),
}

/// Result of `trigger_recognition`, shaped for the API layer
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionOutcome {
    pub event_id: String,
    pub plate: Option<String>,
    pub confidence: f32,
    pub is_manual: bool,
    pub status: GateEventStatus,
    pub session_id: Option<SessionId>,
    /// Plate read below threshold; waiting for `confirm_plate`
    pub requires_confirmation: bool,
    /// Nothing usable was read
    pub requires_manual_input: bool,
}

impl RecognitionOutcome {
    fn from_event(event: &GateEvent, is_manual: bool) -> Self {
        let plate = event.detected_plate.clone();
        let requires_manual_input = plate.is_none();
        let requires_confirmation = !requires_manual_input
            && event.status == GateEventStatus::LprCompleted
            && event.direction == GateDirection::Entry;
        Self {
            event_id: event.event_id.clone(),
            plate,
            confidence: event.confidence.unwrap_or(0.0),
            is_manual,
            status: event.status,
            session_id: event.session_id,
            requires_confirmation,
            requires_manual_input,
        }
    }
}

impl GateCorrelator {
    /// Run recognition for an event from an image or a manual plate
    pub async fn trigger_recognition(
        &self,
        event_id: &str,
        input: RecognitionInput,
    ) -> CoreResult<RecognitionOutcome> {
        let (plate, confidence, is_manual) = match input {
            RecognitionInput::Manual(plate) => (required_plate(&plate)?, 1.0, true),
            RecognitionInput::Image(image) => {
                let recognizer = self.recognizer.as_ref().ok_or_else(|| {
                    CoreError::Recognition("no plate recognizer configured".to_string())
                })?;
                // Fail before calling out if the event cannot take a result anyway
                let event = self.load(event_id).await?;
                if event.status.is_terminal() {
                    return Err(CoreError::InvalidTransition {
                        event_id: event.event_id,
                        from: event.status.as_str(),
                        to: GateEventStatus::LprCompleted.as_str(),
                    });
                }
                let reading = recognizer.recognize(&image).await?;
                (reading.plate, reading.confidence, false)
            }
        };

        let event = self.apply_recognition(event_id, &plate, confidence, is_manual).await?;
        Ok(RecognitionOutcome::from_event(&event, is_manual))
    }

    /// Record a recognition result, then maybe check the vehicle in
    ///
    /// The result is stored regardless of confidence. Check-in is attempted
    /// only at or above the configured threshold.
    pub async fn process_recognition_result(
        &self,
        event_id: &str,
        plate: &str,
        confidence: f32,
    ) -> CoreResult<GateEvent> {
        self.apply_recognition(event_id, plate, confidence, false).await
    }

    /// Operator confirms a low-confidence read; re-runs check-in as manual
    pub async fn confirm_plate(&self, event_id: &str, plate: &str) -> CoreResult<GateEvent> {
        let plate = required_plate(plate)?;
        let mut event = self.load(event_id).await?;
        if event.status != GateEventStatus::LprCompleted {
            return Err(CoreError::InvalidTransition {
                event_id: event.event_id,
                from: event.status.as_str(),
                to: GateEventStatus::SessionCreated.as_str(),
            });
        }
        event.detected_plate = Some(plate);
        event.is_manual_entry = true;
        event.updated_at = self.clock.now();
        self.commit(&event, GateEventStatus::LprCompleted).await?;
        self.auto_create(event, true).await
    }

    async fn apply_recognition(
        &self,
        event_id: &str,
        plate: &str,
        confidence: f32,
        manual_override: bool,
    ) -> CoreResult<GateEvent> {
        let mut event = self.load(event_id).await?;
        let now = self.clock.now();
        let previous = transition(&mut event, GateEventStatus::LprCompleted, now)?;

        let plate = plate.trim();
        event.detected_plate = (!plate.is_empty()).then(|| plate.to_string());
        event.confidence = Some(confidence);
        event.is_manual_entry = manual_override;
        self.commit(&event, previous).await?;
        self.metrics.record_recognition();

        info!(
            event_id = %event.event_id,
            plate = %plate,
            confidence = %confidence,
            manual = %manual_override,
            "recognition_recorded"
        );

        if event.detected_plate.is_none() {
            info!(event_id = %event.event_id, "recognition_no_plate");
            return Ok(event);
        }
        if confidence >= self.settings.confidence_threshold || manual_override {
            return self.auto_create(event, manual_override).await;
        }
        info!(
            event_id = %event.event_id,
            confidence = %confidence,
            threshold = %self.settings.confidence_threshold,
            "recognition_awaiting_confirmation"
        );
        Ok(event)
    }

    /// Create the parking session for an entry event in `lpr_completed`
    ///
    /// Exit events are a no-op. A check-in failure parks the event in
    /// `error` and is returned as `Unrecoverable`. A session whose gate event
    /// moved on before it could be recorded is cancelled again.
    async fn auto_create(&self, mut event: GateEvent, is_manual: bool) -> CoreResult<GateEvent> {
        if event.direction != GateDirection::Entry {
            info!(event_id = %event.event_id, "auto_create_skipped_exit");
            return Ok(event);
        }
        let plate = match event.detected_plate.clone() {
            Some(plate) => plate,
            None => return Ok(event),
        };

        let request = CheckInRequest {
            lot_id: event.lot_id,
            device_id: event.device_id.clone(),
            vehicle_identifier: plate,
            entry_time: None,
            entry_gate_event_id: Some(event.event_id.clone()),
        };

        match self.check_in.check_in(request).await {
            Ok(session) => {
                if let Err(e) = self.record_session(&mut event, &session).await {
                    warn!(
                        event_id = %event.event_id,
                        session_id = %session.id,
                        error = %e,
                        "gate_event_session_not_recorded"
                    );
                    if let Err(cancel_err) = self.check_in.cancel(&session).await {
                        error!(
                            event_id = %event.event_id,
                            session_id = %session.id,
                            error = %cancel_err,
                            "session_rollback_failed"
                        );
                    }
                    return Err(e);
                }
                self.metrics.record_session_created();
                info!(
                    event_id = %event.event_id,
                    session_id = %session.id,
                    manual = %is_manual,
                    "gate_event_session_created"
                );
                Ok(event)
            }
            Err(e) => {
                self.metrics.record_session_failure();
                let reason = e.to_string();
                let now = self.clock.now();
                let previous = transition(&mut event, GateEventStatus::Error, now)?;
                event.append_note(&format!("session creation failed: {reason}"));
                self.commit(&event, previous).await?;
                warn!(event_id = %event.event_id, error = %reason, "gate_event_session_failed");
                Err(CoreError::Unrecoverable { event_id: event.event_id, reason })
            }
        }
    }

    async fn record_session(&self, event: &mut GateEvent, session: &ParkingSession) -> CoreResult<()> {
        let now = self.clock.now();
        let previous = transition(event, GateEventStatus::SessionCreated, now)?;
        event.session_id = Some(session.id);
        event.completed_at = Some(now);
        self.commit(event, previous).await
    }
}
