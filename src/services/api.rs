//! Correlation API - the operations the HTTP layer calls into
//!
//! Bundles the correlation engine with barrier control. Barrier commands need
//! the MQTT control plane; without it `send_barrier_command` fails with a
//! transport error instead of silently dropping the command.

use crate::domain::gate_event::{GateEvent, GateEventStats};
use crate::infra::error::{CoreError, CoreResult};
use crate::services::barrier_control::BarrierControl;
use crate::services::correlator::{GateCorrelator, RecognitionInput, RecognitionOutcome};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct CorrelationApi {
    correlator: Arc<GateCorrelator>,
    barriers: Option<BarrierControl>,
}

impl CorrelationApi {
    pub fn new(correlator: Arc<GateCorrelator>) -> Self {
        Self { correlator, barriers: None }
    }

    pub fn with_barrier_control(mut self, barriers: BarrierControl) -> Self {
        self.barriers = Some(barriers);
        self
    }

    pub fn barrier_commands_enabled(&self) -> bool {
        self.barriers.is_some()
    }

    pub async fn trigger_recognition(
        &self,
        event_id: &str,
        input: RecognitionInput,
    ) -> CoreResult<RecognitionOutcome> {
        self.correlator.trigger_recognition(event_id, input).await
    }

    pub async fn process_recognition_result(
        &self,
        event_id: &str,
        plate: &str,
        confidence: f32,
    ) -> CoreResult<GateEvent> {
        self.correlator.process_recognition_result(event_id, plate, confidence).await
    }

    /// Returns the request id the command was published with
    pub async fn send_barrier_command(
        &self,
        device_id: &str,
        barrier_type: &str,
        command: &str,
        request_id: Option<String>,
    ) -> CoreResult<String> {
        let barriers = self.barriers.as_ref().ok_or_else(|| {
            CoreError::Transport("barrier commands unavailable: mqtt is disabled".to_string())
        })?;
        barriers.send_barrier_command(device_id, barrier_type, command, request_id).await
    }

    pub async fn confirm_plate(&self, event_id: &str, plate: &str) -> CoreResult<GateEvent> {
        self.correlator.confirm_plate(event_id, plate).await
    }

    pub async fn resolve_manually(
        &self,
        event_id: &str,
        plate: &str,
        operator: &str,
    ) -> CoreResult<GateEvent> {
        self.correlator.resolve_manually(event_id, plate, operator).await
    }

    pub async fn mark_error(&self, event_id: &str, reason: &str) -> CoreResult<GateEvent> {
        self.correlator.mark_error(event_id, reason).await
    }

    pub async fn gate_event(&self, event_id: &str) -> CoreResult<GateEvent> {
        self.correlator.get(event_id).await
    }

    pub async fn pending_events(&self, limit: usize) -> CoreResult<Vec<GateEvent>> {
        self.correlator.pending_events(limit).await
    }

    pub async fn stats(&self, since: DateTime<Utc>) -> CoreResult<GateEventStats> {
        self.correlator.stats(since).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Barrier, Device, ParkingLot};
    use crate::domain::messages::{Envelope, GateSensorReport};
    use crate::domain::types::{BarrierCommand, BarrierState, BarrierType, GateEventStatus, LotId};
    use crate::infra::clock::ManualClock;
    use crate::infra::error::ErrorKind;
    use crate::infra::metrics::Metrics;
    use crate::repository::MemoryStore;
    use crate::services::barrier_control::CommandPublisher;
    use crate::services::broadcaster::{create_live_broadcaster, BroadcastHub};
    use crate::services::check_in::RepositoryCheckIn;
    use crate::services::correlator::CorrelatorSettings;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        topics: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandPublisher for RecordingPublisher {
        async fn publish(&self, topic: &str, _payload: Vec<u8>) -> CoreResult<()> {
            self.topics.lock().push(topic.to_string());
            Ok(())
        }
    }

    struct Fixture {
        api: CorrelationApi,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
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
        store.put_barrier(Barrier {
            id: 3,
            lot_id: LotId(1),
            barrier_identifier: "esp32-01_entry".to_string(),
            device_id: "esp32-01".to_string(),
            barrier_type: BarrierType::Entry,
            current_state: BarrierState::Closed,
            last_update_source: None,
            last_command: None,
            last_command_at: None,
            last_event_at: None,
            updated_at: None,
        });
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let metrics = Arc::new(Metrics::new());
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
        Fixture { api: CorrelationApi::new(correlator), store, clock, metrics, _hub: hub }
    }

    fn envelope() -> Envelope {
        Envelope {
            device_id: "esp32-01".to_string(),
            message_type: "gate_event".to_string(),
            timestamp: "2026-03-01T08:00:00Z".to_string(),
            received_mqtt_topic: None,
            client_id_iot: None,
            iot_processing_timestamp: None,
            raw: String::new(),
        }
    }

    fn entry_trigger(event_id: &str) -> GateSensorReport {
        GateSensorReport {
            sensor_id: "ir-1".to_string(),
            gate_area: "entry_approach".to_string(),
            event_type: "vehicle_at_gate".to_string(),
            event_id: event_id.to_string(),
            is_entry_area: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_barrier_command_requires_control_plane() {
        let f = fixture();
        assert!(!f.api.barrier_commands_enabled());
        let err = f.api.send_barrier_command("esp32-01", "entry", "open", None).await.unwrap_err();
        assert!(matches!(err, CoreError::Transport(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_barrier_command_goes_through_control_plane() {
        let f = fixture();
        let publisher = Arc::new(RecordingPublisher::default());
        let control = BarrierControl::new(
            f.store.clone(),
            publisher.clone(),
            f.clock.clone(),
            f.metrics.clone(),
            "lot/command/barriers",
        );
        let api = f.api.with_barrier_control(control);

        let request_id = api
            .send_barrier_command("esp32-01", "entry", "open", Some("req-1".to_string()))
            .await
            .unwrap();
        assert_eq!(request_id, "req-1");
        assert_eq!(*publisher.topics.lock(), vec!["lot/command/barriers/entry".to_string()]);
        assert_eq!(f.store.barrier(3).unwrap().last_command, Some(BarrierCommand::Open));
    }

    #[tokio::test]
    async fn test_manual_trigger_checks_in_through_api() {
        let f = fixture();
        f.api.correlator.handle_sensor_event(&envelope(), &entry_trigger("gate-1")).await.unwrap();
        assert_eq!(f.api.pending_events(10).await.unwrap().len(), 1);

        let outcome = f
            .api
            .trigger_recognition("gate-1", RecognitionInput::Manual("51G12345".to_string()))
            .await
            .unwrap();
        assert_eq!(outcome.status, GateEventStatus::SessionCreated);
        assert!(outcome.session_id.is_some());
        assert!(f.api.pending_events(10).await.unwrap().is_empty());
        assert_eq!(f.api.gate_event("gate-1").await.unwrap().status, GateEventStatus::SessionCreated);
    }
}
