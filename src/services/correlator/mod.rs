//! Gate correlation engine
//!
//! Owns the gate event lifecycle:
//! - creation from qualifying sensor events, with live notification
//! - recognition results and the confidence-gated auto check-in (`recognition`)
//! - expiry of overdue events for the sweeper
//! - operator actions and read-side queries
//!
//! Every write is a compare-and-swap on the stored status, so two writers
//! racing on one event cannot both win.

mod recognition;

pub use recognition::{RecognitionInput, RecognitionOutcome};

use crate::domain::gate_event::{GateEvent, GateEventNotification, GateEventStats};
use crate::domain::messages::{Envelope, GateSensorReport};
use crate::domain::types::{BarrierType, GateDirection, GateEventStatus, GateEventType, LotId};
use crate::infra::clock::Clock;
use crate::infra::config::Config;
use crate::infra::error::{CoreError, CoreResult};
use crate::infra::metrics::Metrics;
use crate::io::recognizer::PlateRecognizer;
use crate::repository::Store;
use crate::services::broadcaster::LiveBroadcaster;
use crate::services::check_in::CheckInService;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tunables read from `[gate_events]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelatorSettings {
    /// Deadline offset applied once at creation
    pub timeout: Duration,
    /// Minimum confidence for automatic check-in
    pub confidence_threshold: f32,
}

impl CorrelatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.gate_event_timeout(),
            confidence_threshold: config.confidence_threshold(),
        }
    }
}

impl Default for CorrelatorSettings {
    fn default() -> Self {
        Self { timeout: Duration::minutes(5), confidence_threshold: 0.8 }
    }
}

/// What a sensor event produced
#[derive(Debug, Clone, PartialEq)]
pub enum SensorOutcome {
    /// Not a workflow trigger
    Filtered,
    Created(GateEvent),
}

pub struct GateCorrelator {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) check_in: Arc<dyn CheckInService>,
    pub(crate) recognizer: Option<Arc<dyn PlateRecognizer>>,
    pub(crate) live: LiveBroadcaster,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) settings: CorrelatorSettings,
}

impl GateCorrelator {
    pub fn new(
        store: Arc<dyn Store>,
        check_in: Arc<dyn CheckInService>,
        live: LiveBroadcaster,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        settings: CorrelatorSettings,
    ) -> Self {
        Self { store, check_in, recognizer: None, live, clock, metrics, settings }
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn PlateRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn settings(&self) -> CorrelatorSettings {
        self.settings
    }

    /// Open a gate workflow for a qualifying sensor event
    ///
    /// Non-trigger events are filtered. A repeated event id is a `Conflict`.
    pub async fn handle_sensor_event(
        &self,
        envelope: &Envelope,
        report: &GateSensorReport,
    ) -> CoreResult<SensorOutcome> {
        if !report.opens_workflow() {
            self.metrics.record_gate_event_filtered();
            debug!(
                device_id = %envelope.device_id,
                event_type = %report.event_type,
                gate_area = %report.gate_area,
                "gate_event_filtered"
            );
            return Ok(SensorOutcome::Filtered);
        }

        let event_id = report.event_id.trim();
        if event_id.is_empty() {
            return Err(CoreError::Invalid(format!(
                "gate event from {} carries no event_id",
                envelope.device_id
            )));
        }

        let (lot_id, lot_name) = self.resolve_lot(&envelope.device_id).await?;
        let now = self.clock.now();
        let mut event = GateEvent {
            event_id: event_id.to_string(),
            lot_id,
            device_id: envelope.device_id.clone(),
            sensor_id: (!report.sensor_id.is_empty()).then(|| report.sensor_id.clone()),
            direction: GateDirection::classify(report.is_entry_area, &report.gate_area),
            event_type: GateEventType::from_raw(&report.event_type),
            status: GateEventStatus::Pending,
            requires_recognition: report.requires_recognition(),
            detected_plate: None,
            confidence: None,
            is_manual_entry: false,
            session_id: None,
            notes: String::new(),
            assigned_operator: None,
            created_at: now,
            updated_at: now,
            expires_at: Some(now + self.settings.timeout),
            completed_at: None,
        };

        if let Err(e) = self.store.insert_gate_event(event.clone()).await {
            if matches!(e, CoreError::Conflict(_)) {
                self.metrics.record_gate_event_duplicate();
            }
            return Err(e);
        }
        self.metrics.record_gate_event_created();

        self.live.broadcast(&GateEventNotification::created(&event, &lot_name));

        // Exit-side events stay pending; only entry-side ones wait for a plate read
        if event.requires_recognition {
            let previous = transition(&mut event, GateEventStatus::AwaitingRecognition, now)?;
            self.commit(&event, previous).await?;
        }

        info!(
            event_id = %event.event_id,
            lot_id = %event.lot_id,
            device_id = %event.device_id,
            direction = %event.direction,
            event_type = %event.event_type.as_str(),
            status = %event.status,
            "gate_event_created"
        );
        Ok(SensorOutcome::Created(event))
    }

    /// Device's configured lot, else the lot of one of its entry barriers
    async fn resolve_lot(&self, device_id: &str) -> CoreResult<(LotId, String)> {
        let configured = self.store.find_device(device_id).await?.and_then(|d| d.lot_id);
        let lot_id = match configured {
            Some(lot_id) => Some(lot_id),
            None => self
                .store
                .barriers_for_device(device_id)
                .await?
                .into_iter()
                .find(|b| b.barrier_type == BarrierType::Entry)
                .map(|b| b.lot_id),
        };
        let lot_id = lot_id.ok_or_else(|| CoreError::not_registered("lot", device_id))?;

        let lot_name = match self.store.find_lot(lot_id).await? {
            Some(lot) => lot.name,
            None => {
                warn!(lot_id = %lot_id, device_id = %device_id, "gate_event_lot_missing");
                String::new()
            }
        };
        Ok((lot_id, lot_name))
    }

    /// Time out pending/awaiting events past their deadline, soonest first
    ///
    /// Events that change concurrently are left alone.
    pub async fn expire_overdue(&self, limit: usize) -> CoreResult<Vec<GateEvent>> {
        let now = self.clock.now();
        let candidates = self.store.find_expired_gate_events(now, limit).await?;
        let mut expired = Vec::with_capacity(candidates.len());

        for mut event in candidates {
            let previous = match transition(&mut event, GateEventStatus::Timeout, now) {
                Ok(previous) => previous,
                Err(_) => continue,
            };
            event.append_note("expired without decision");
            match self.commit(&event, previous).await {
                Ok(()) => {
                    self.live.broadcast(&GateEventNotification::timed_out(&event, now));
                    expired.push(event);
                }
                Err(CoreError::Conflict(_)) => {
                    debug!(event_id = %event.event_id, "gate_event_expiry_lost_race");
                }
                Err(e) => return Err(e),
            }
        }

        if !expired.is_empty() {
            self.metrics.record_gate_events_expired(expired.len() as u64);
            info!(count = %expired.len(), "gate_events_expired");
        }
        Ok(expired)
    }

    /// Operator enters the plate for a pending event, bypassing recognition
    pub async fn resolve_manually(
        &self,
        event_id: &str,
        plate: &str,
        operator: &str,
    ) -> CoreResult<GateEvent> {
        let plate = required_plate(plate)?;
        let mut event = self.load(event_id).await?;
        let now = self.clock.now();
        let previous = transition(&mut event, GateEventStatus::ManualOverride, now)?;
        event.detected_plate = Some(plate);
        event.confidence = Some(1.0);
        event.is_manual_entry = true;
        event.assigned_operator = (!operator.is_empty()).then(|| operator.to_string());
        event.completed_at = Some(now);
        event.append_note(&format!("resolved manually by {}", display_operator(operator)));
        self.commit(&event, previous).await?;

        info!(event_id = %event.event_id, operator = %display_operator(operator), "gate_event_resolved_manually");
        Ok(event)
    }

    /// Park a non-terminal event in `error` for operator follow-up
    pub async fn mark_error(&self, event_id: &str, reason: &str) -> CoreResult<GateEvent> {
        let mut event = self.load(event_id).await?;
        let now = self.clock.now();
        let previous = transition(&mut event, GateEventStatus::Error, now)?;
        event.append_note(reason);
        self.commit(&event, previous).await?;

        warn!(event_id = %event.event_id, reason = %reason, "gate_event_marked_error");
        Ok(event)
    }

    pub async fn get(&self, event_id: &str) -> CoreResult<GateEvent> {
        self.load(event_id).await
    }

    /// Pending and awaiting events, oldest first
    pub async fn pending_events(&self, limit: usize) -> CoreResult<Vec<GateEvent>> {
        self.store.find_open_gate_events(limit).await
    }

    pub async fn stats(&self, since: DateTime<Utc>) -> CoreResult<GateEventStats> {
        let events = self.store.gate_events_created_since(since).await?;
        Ok(GateEventStats::from_events(&events))
    }

    pub(crate) async fn load(&self, event_id: &str) -> CoreResult<GateEvent> {
        self.store
            .find_gate_event(event_id)
            .await?
            .ok_or_else(|| CoreError::not_found("gate event", event_id))
    }

    /// Persist `event` only if the stored status is still `expected`
    pub(crate) async fn commit(&self, event: &GateEvent, expected: GateEventStatus) -> CoreResult<()> {
        if self.store.replace_gate_event_if_status(event, expected).await? {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "gate event {} is no longer {}",
                event.event_id, expected
            )))
        }
    }
}

/// Apply a state-machine step in memory; returns the previous status
pub(crate) fn transition(
    event: &mut GateEvent,
    next: GateEventStatus,
    now: DateTime<Utc>,
) -> CoreResult<GateEventStatus> {
    let previous = event.status;
    if !previous.can_transition_to(next) {
        return Err(CoreError::InvalidTransition {
            event_id: event.event_id.clone(),
            from: previous.as_str(),
            to: next.as_str(),
        });
    }
    event.status = next;
    event.updated_at = now;
    Ok(previous)
}

pub(crate) fn required_plate(plate: &str) -> CoreResult<String> {
    let plate = plate.trim();
    if plate.is_empty() {
        return Err(CoreError::Invalid("plate is required".to_string()));
    }
    Ok(plate.to_string())
}

fn display_operator(operator: &str) -> &str {
    if operator.is_empty() {
        "unknown operator"
    } else {
        operator
    }
}
