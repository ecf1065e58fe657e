//! Device event dispatcher
//!
//! One queue body in, one audit log entry and one routed handler call out.
//! The return value only decides acknowledgement: `Ok` deletes the message,
//! `Err` leaves it for redelivery. Every failure is recorded on the audit
//! entry and returned. The one exception is a redelivered gate sensor event
//! whose gate event already exists, which is acknowledged as a duplicate.

use crate::domain::entities::NewDeviceEventLog;
use crate::domain::messages::{DeviceEvent, DeviceMessage};
use crate::domain::types::ProcessedStatus;
use crate::infra::clock::Clock;
use crate::infra::error::{CoreError, CoreResult};
use crate::infra::metrics::Metrics;
use crate::io::decoder;
use crate::repository::{ApplyOutcome, Store};
use crate::services::correlator::{GateCorrelator, SensorOutcome};
use crate::services::reconciler::DeviceStateReconciler;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a message was disposed of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handler applied a change
    Processed,
    /// Stale update, filtered sensor event or duplicate gate event
    Skipped,
    /// Empty body or unknown message type
    Ignored,
}

pub struct DeviceEventDispatcher {
    store: Arc<dyn Store>,
    reconciler: DeviceStateReconciler,
    correlator: Arc<GateCorrelator>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl DeviceEventDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        reconciler: DeviceStateReconciler,
        correlator: Arc<GateCorrelator>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { store, reconciler, correlator, clock, metrics }
    }

    pub async fn handle(&self, body: &str) -> CoreResult<Disposition> {
        if body.trim().is_empty() {
            debug!("queue_message_empty");
            return Ok(Disposition::Ignored);
        }

        let envelope = match decoder::decode_envelope(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.metrics.record_decode_error();
                warn!(error = %e, "envelope_decode_failed");
                self.audit_malformed(body, &e).await;
                return Err(e);
            }
        };

        let log_id = self
            .store
            .create_event_log(NewDeviceEventLog {
                received_at: self.clock.now(),
                device_id: envelope.device_id.clone(),
                mqtt_topic: envelope.received_mqtt_topic.clone().unwrap_or_default(),
                message_type: envelope.message_type.clone(),
                payload: body.to_string(),
                processed_status: ProcessedStatus::Pending,
                processing_notes: String::new(),
            })
            .await?;

        let event = match decoder::decode_event(&envelope) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.record_decode_error();
                warn!(
                    device_id = %envelope.device_id,
                    message_type = %envelope.message_type,
                    error = %e,
                    "payload_decode_failed"
                );
                self.finish(log_id, ProcessedStatus::Error, &e.to_string()).await;
                return Err(e);
            }
        };

        let message = DeviceMessage { envelope, event };
        let result = self.route(&message).await;
        self.settle(log_id, &message, result).await
    }

    async fn route(&self, message: &DeviceMessage) -> CoreResult<Disposition> {
        let envelope = &message.envelope;
        match &message.event {
            DeviceEvent::Startup(report) => {
                info!(
                    device_id = %envelope.device_id,
                    firmware = %report.firmware_version,
                    ip = %report.ip,
                    "device_startup"
                );
                applied(self.reconciler.apply_startup(envelope, report).await?)
            }
            DeviceEvent::BarrierState(report) => {
                applied(self.reconciler.apply_barrier_state(envelope, report).await?)
            }
            DeviceEvent::GateSensor(report) => {
                match self.correlator.handle_sensor_event(envelope, report).await? {
                    SensorOutcome::Created(_) => Ok(Disposition::Processed),
                    SensorOutcome::Filtered => Ok(Disposition::Skipped),
                }
            }
            DeviceEvent::SlotStatus(report) => {
                applied(self.reconciler.apply_slot_status(envelope, report).await?)
            }
            DeviceEvent::ParkingSummary(report) => {
                debug!(
                    device_id = %envelope.device_id,
                    occupied = %report.occupied_slots,
                    total = %report.total_slots,
                    "parking_summary"
                );
                applied(self.reconciler.mark_online(envelope).await?)
            }
            DeviceEvent::SystemStatus(report) => {
                applied(self.reconciler.apply_system_status(envelope, report).await?)
            }
            DeviceEvent::Error(report) => {
                applied(self.reconciler.apply_device_error(envelope, report).await?)
            }
            DeviceEvent::CommandAck(report) => {
                info!(
                    device_id = %envelope.device_id,
                    request_id = %report.request_id,
                    action = %report.received_action,
                    status = %report.status,
                    "command_acknowledged"
                );
                applied(self.reconciler.mark_online(envelope).await?)
            }
            DeviceEvent::Unknown(kind) => {
                self.metrics.record_unknown_message();
                info!(device_id = %envelope.device_id, message_type = %kind, "message_type_unknown");
                Ok(Disposition::Ignored)
            }
        }
    }

    /// Record the outcome on the audit entry and decide acknowledgement
    async fn settle(
        &self,
        log_id: i64,
        message: &DeviceMessage,
        result: CoreResult<Disposition>,
    ) -> CoreResult<Disposition> {
        let envelope = &message.envelope;
        match result {
            Ok(disposition) => {
                let notes = match disposition {
                    Disposition::Skipped => "no state change",
                    Disposition::Ignored => "unknown message type",
                    _ => "",
                };
                self.finish(log_id, ProcessedStatus::Processed, notes).await;
                Ok(disposition)
            }
            // Redelivered sensor event whose gate event already exists
            Err(CoreError::Conflict(reason))
                if matches!(message.event, DeviceEvent::GateSensor(_)) =>
            {
                debug!(device_id = %envelope.device_id, reason = %reason, "gate_event_already_processed");
                self.finish(log_id, ProcessedStatus::Processed, "duplicate gate event").await;
                Ok(Disposition::Skipped)
            }
            Err(e) => {
                if matches!(e, CoreError::NotRegistered { .. }) {
                    self.metrics.record_not_registered();
                }
                warn!(
                    device_id = %envelope.device_id,
                    message_type = %envelope.message_type,
                    transient = %e.is_transient(),
                    error = %e,
                    "message_processing_failed"
                );
                self.finish(log_id, ProcessedStatus::Error, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn finish(&self, log_id: i64, status: ProcessedStatus, notes: &str) {
        if let Err(e) = self.store.update_event_log_outcome(log_id, status, notes).await {
            warn!(log_id = %log_id, error = %e, "event_log_update_failed");
        }
    }

    /// Best-effort audit entry for a body whose envelope did not parse
    async fn audit_malformed(&self, body: &str, error: &CoreError) {
        let entry = NewDeviceEventLog {
            received_at: self.clock.now(),
            device_id: String::new(),
            mqtt_topic: String::new(),
            message_type: String::new(),
            payload: body.to_string(),
            processed_status: ProcessedStatus::Error,
            processing_notes: error.to_string(),
        };
        if let Err(e) = self.store.create_event_log(entry).await {
            warn!(error = %e, "event_log_create_failed");
        }
    }
}

fn applied(outcome: ApplyOutcome) -> CoreResult<Disposition> {
    Ok(if outcome.applied() { Disposition::Processed } else { Disposition::Skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Device, ParkingLot, ParkingSlot};
    use crate::domain::types::{LotId, SlotStatus};
    use crate::infra::clock::ManualClock;
    use crate::repository::MemoryStore;
    use crate::services::broadcaster::{create_live_broadcaster, BroadcastHub};
    use crate::services::check_in::RepositoryCheckIn;
    use crate::services::correlator::CorrelatorSettings;
    use chrono::Utc;

    struct Fixture {
        dispatcher: DeviceEventDispatcher,
        store: Arc<MemoryStore>,
        metrics: Arc<Metrics>,
        _hub: BroadcastHub,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.put_lot(ParkingLot {
            id: LotId(1),
            name: "Central".to_string(),
            address: String::new(),
            total_slots: 0,
        });
        store.put_device(Device::new("esp32-01", Some(LotId(1))));
        store.put_slot(ParkingSlot {
            id: 1,
            lot_id: LotId(1),
            slot_identifier: "S1".to_string(),
            device_id: "esp32-01".to_string(),
            status: SlotStatus::Vacant,
            last_update_source: None,
            last_event_at: None,
            updated_at: None,
        });
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let metrics = Arc::new(Metrics::new());
        // Hub is never run; broadcasts just fill the hand-off channel
        let (live, hub) = create_live_broadcaster(16, 16, metrics.clone());
        let check_in = Arc::new(RepositoryCheckIn::new(store.clone(), clock.clone()));
        let correlator = Arc::new(GateCorrelator::new(
            store.clone(),
            check_in,
            live,
            clock.clone(),
            metrics.clone(),
            CorrelatorSettings::default(),
        ));
        let reconciler = DeviceStateReconciler::new(store.clone(), clock.clone(), metrics.clone());
        let dispatcher =
            DeviceEventDispatcher::new(store.clone(), reconciler, correlator, clock, metrics.clone());
        Fixture { dispatcher, store, metrics, _hub: hub }
    }

    const SLOT: &str = r#"{"device_id":"esp32-01","message_type":"slot_status","timestamp":"2026-03-01T08:00:00Z","received_mqtt_topic":"parking/esp32-01/slots","slot_id":"S1","occupied":true}"#;
    const GATE: &str = r#"{"device_id":"esp32-01","message_type":"gate_event","timestamp":"2026-03-01T08:00:00Z","sensor_id":"ir-1","gate_area":"entry_approach","event_type":"vehicle_at_gate","event_id":"gate-1","is_entry_area":true}"#;

    #[tokio::test]
    async fn test_slot_status_is_applied_and_audited() {
        let f = fixture();
        assert_eq!(f.dispatcher.handle(SLOT).await.unwrap(), Disposition::Processed);
        assert_eq!(f.store.slot(1).unwrap().status, SlotStatus::Occupied);

        let logs = f.store.event_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].device_id, "esp32-01");
        assert_eq!(logs[0].mqtt_topic, "parking/esp32-01/slots");
        assert_eq!(logs[0].processed_status, ProcessedStatus::Processed);
        assert_eq!(logs[0].payload, SLOT);
    }

    #[tokio::test]
    async fn test_redelivered_slot_status_is_skipped() {
        let f = fixture();
        f.dispatcher.handle(SLOT).await.unwrap();
        assert_eq!(f.dispatcher.handle(SLOT).await.unwrap(), Disposition::Skipped);
    }

    #[tokio::test]
    async fn test_malformed_body_is_audited_and_returned() {
        let f = fixture();
        let err = f.dispatcher.handle("{not json").await.unwrap_err();
        assert!(matches!(err, CoreError::Decode(_)));

        let logs = f.store.event_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].device_id, "");
        assert_eq!(logs[0].processed_status, ProcessedStatus::Error);
    }

    #[tokio::test]
    async fn test_bad_payload_keeps_device_on_audit() {
        let f = fixture();
        let body = r#"{"device_id":"esp32-01","message_type":"slot_status","timestamp":"2026-03-01T08:00:00Z"}"#;
        assert!(f.dispatcher.handle(body).await.is_err());
        let logs = f.store.event_logs();
        assert_eq!(logs[0].device_id, "esp32-01");
        assert_eq!(logs[0].processed_status, ProcessedStatus::Error);
    }

    #[tokio::test]
    async fn test_unknown_type_is_acknowledged() {
        let f = fixture();
        let body = r#"{"device_id":"esp32-01","message_type":"firmware_update","timestamp":"2026-03-01T08:00:00Z"}"#;
        assert_eq!(f.dispatcher.handle(body).await.unwrap(), Disposition::Ignored);
        assert_eq!(f.store.event_logs()[0].processed_status, ProcessedStatus::Processed);
        assert_eq!(f.metrics.report().unknown_messages, 1);
    }

    #[tokio::test]
    async fn test_unregistered_slot_is_left_for_redelivery() {
        let f = fixture();
        let body = SLOT.replace("\"S1\"", "\"S9\"");
        let err = f.dispatcher.handle(&body).await.unwrap_err();
        assert!(matches!(err, CoreError::NotRegistered { .. }));
        let log = &f.store.event_logs()[0];
        assert_eq!(log.processed_status, ProcessedStatus::Error);
        assert!(log.processing_notes.contains("not registered"));
        assert_eq!(f.metrics.report().not_registered, 1);

        // Registered in the meantime: the redelivered message now applies
        f.store.put_slot(ParkingSlot {
            id: 9,
            lot_id: LotId(1),
            slot_identifier: "S9".to_string(),
            device_id: "esp32-01".to_string(),
            status: SlotStatus::Vacant,
            last_update_source: None,
            last_event_at: None,
            updated_at: None,
        });
        assert_eq!(f.dispatcher.handle(&body).await.unwrap(), Disposition::Processed);
        assert_eq!(f.store.slot(9).unwrap().status, SlotStatus::Occupied);
    }

    #[tokio::test]
    async fn test_gate_event_redelivery_is_acknowledged() {
        let f = fixture();
        assert_eq!(f.dispatcher.handle(GATE).await.unwrap(), Disposition::Processed);
        assert_eq!(f.dispatcher.handle(GATE).await.unwrap(), Disposition::Skipped);
        assert_eq!(f.store.gate_event_count(), 1);
        assert_eq!(f.store.event_logs()[1].processing_notes, "duplicate gate event");
    }

    #[tokio::test]
    async fn test_empty_body_is_ignored() {
        let f = fixture();
        assert_eq!(f.dispatcher.handle("  ").await.unwrap(), Disposition::Ignored);
        assert!(f.store.event_logs().is_empty());
    }
}
