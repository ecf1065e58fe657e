//! In-memory store implementing every repository contract
//!
//! Each table sits behind its own `parking_lot::RwLock`; conditional writes
//! compare and update under a single write guard, which is the in-process
//! equivalent of a conditional `UPDATE ... WHERE`.

use super::{
    is_newer_update, ApplyOutcome, BarrierRepository, DeviceRepository, EventLogRepository,
    GateEventRepository, LotRepository, SessionRepository, SlotRepository,
};
use crate::domain::entities::{
    Barrier, Device, DeviceEventLog, DeviceTelemetry, NewDeviceEventLog, NewSession, ParkingLot,
    ParkingSession, ParkingSlot, SessionStatus,
};
use crate::domain::gate_event::GateEvent;
use crate::domain::types::{
    BarrierCommand, BarrierState, DeviceStatus, GateEventStatus, LotId, ProcessedStatus,
    SessionId, SlotStatus,
};
use crate::infra::config::RegistryConfig;
use crate::infra::error::{CoreError, CoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Default)]
pub struct MemoryStore {
    lots: RwLock<FxHashMap<LotId, ParkingLot>>,
    devices: RwLock<FxHashMap<String, Device>>,
    slots: RwLock<FxHashMap<i64, ParkingSlot>>,
    barriers: RwLock<FxHashMap<i64, Barrier>>,
    sessions: RwLock<Vec<ParkingSession>>,
    gate_events: RwLock<FxHashMap<String, GateEvent>>,
    event_logs: RwLock<Vec<DeviceEventLog>>,
    next_session_id: AtomicI64,
    next_log_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with the configured registry rows
    pub fn seeded(registry: &RegistryConfig) -> Self {
        let store = Self::new();
        for lot in registry.lots() {
            store.put_lot(lot);
        }
        for device in registry.devices() {
            store.put_device(device);
        }
        for barrier in registry.barriers() {
            store.put_barrier(barrier);
        }
        for slot in registry.slots() {
            store.put_slot(slot);
        }
        store
    }

    pub fn put_lot(&self, lot: ParkingLot) {
        self.lots.write().insert(lot.id, lot);
    }

    pub fn put_device(&self, device: Device) {
        self.devices.write().insert(device.thing_name.clone(), device);
    }

    pub fn put_slot(&self, slot: ParkingSlot) {
        self.slots.write().insert(slot.id, slot);
    }

    pub fn put_barrier(&self, barrier: Barrier) {
        self.barriers.write().insert(barrier.id, barrier);
    }

    pub fn slot(&self, id: i64) -> Option<ParkingSlot> {
        self.slots.read().get(&id).cloned()
    }

    pub fn barrier(&self, id: i64) -> Option<Barrier> {
        self.barriers.read().get(&id).cloned()
    }

    pub fn device(&self, thing_name: &str) -> Option<Device> {
        self.devices.read().get(thing_name).cloned()
    }

    pub fn gate_event(&self, event_id: &str) -> Option<GateEvent> {
        self.gate_events.read().get(event_id).cloned()
    }

    pub fn gate_event_count(&self) -> usize {
        self.gate_events.read().len()
    }

    pub fn sessions(&self) -> Vec<ParkingSession> {
        self.sessions.read().clone()
    }

    pub fn event_logs(&self) -> Vec<DeviceEventLog> {
        self.event_logs.read().clone()
    }
}

#[async_trait]
impl LotRepository for MemoryStore {
    async fn find_lot(&self, id: LotId) -> CoreResult<Option<ParkingLot>> {
        Ok(self.lots.read().get(&id).cloned())
    }
}

#[async_trait]
impl DeviceRepository for MemoryStore {
    async fn find_device(&self, thing_name: &str) -> CoreResult<Option<Device>> {
        Ok(self.devices.read().get(thing_name).cloned())
    }

    async fn upsert_device_if_newer(
        &self,
        thing_name: &str,
        telemetry: &DeviceTelemetry,
        status: DeviceStatus,
        seen_at: DateTime<Utc>,
    ) -> CoreResult<ApplyOutcome> {
        let mut devices = self.devices.write();
        let device = devices
            .entry(thing_name.to_string())
            .or_insert_with(|| Device::new(thing_name, None));
        if !is_newer_update(&device.status, device.last_seen_at, &status, seen_at) {
            return Ok(ApplyOutcome::Skipped);
        }
        telemetry.apply_to(device);
        device.status = status;
        device.last_seen_at = Some(seen_at);
        device.updated_at = Some(Utc::now());
        Ok(ApplyOutcome::Applied)
    }

    async fn update_device_status_if_newer(
        &self,
        thing_name: &str,
        status: DeviceStatus,
        seen_at: DateTime<Utc>,
    ) -> CoreResult<ApplyOutcome> {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(thing_name)
            .ok_or_else(|| CoreError::not_registered("device", thing_name))?;
        if !is_newer_update(&device.status, device.last_seen_at, &status, seen_at) {
            return Ok(ApplyOutcome::Skipped);
        }
        device.status = status;
        device.last_seen_at = Some(seen_at);
        device.updated_at = Some(Utc::now());
        Ok(ApplyOutcome::Applied)
    }
}

#[async_trait]
impl SlotRepository for MemoryStore {
    async fn find_slot(
        &self,
        device_id: &str,
        slot_identifier: &str,
    ) -> CoreResult<Option<ParkingSlot>> {
        Ok(self
            .slots
            .read()
            .values()
            .find(|s| s.device_id == device_id && s.slot_identifier == slot_identifier)
            .cloned())
    }

    async fn occupy_first_vacant_slot(
        &self,
        lot_id: LotId,
        source: &str,
    ) -> CoreResult<Option<ParkingSlot>> {
        let mut slots = self.slots.write();
        let Some(slot) = slots
            .values_mut()
            .filter(|s| s.lot_id == lot_id && s.status == SlotStatus::Vacant)
            .min_by_key(|s| s.id)
        else {
            return Ok(None);
        };
        slot.status = SlotStatus::Occupied;
        slot.last_update_source = Some(source.to_string());
        slot.updated_at = Some(Utc::now());
        Ok(Some(slot.clone()))
    }

    async fn release_slot(&self, slot_id: i64, source: &str) -> CoreResult<ApplyOutcome> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(&slot_id)
            .ok_or_else(|| CoreError::not_registered("slot", slot_id.to_string()))?;
        if slot.status != SlotStatus::Occupied {
            return Ok(ApplyOutcome::Skipped);
        }
        slot.status = SlotStatus::Vacant;
        slot.last_update_source = Some(source.to_string());
        slot.updated_at = Some(Utc::now());
        Ok(ApplyOutcome::Applied)
    }

    async fn update_slot_status_if_newer(
        &self,
        slot_id: i64,
        status: SlotStatus,
        event_at: DateTime<Utc>,
        source: &str,
    ) -> CoreResult<ApplyOutcome> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(&slot_id)
            .ok_or_else(|| CoreError::not_registered("slot", slot_id.to_string()))?;
        if !is_newer_update(&slot.status, slot.last_event_at, &status, event_at) {
            return Ok(ApplyOutcome::Skipped);
        }
        slot.status = status;
        slot.last_event_at = Some(event_at);
        slot.last_update_source = Some(source.to_string());
        slot.updated_at = Some(Utc::now());
        Ok(ApplyOutcome::Applied)
    }
}

#[async_trait]
impl BarrierRepository for MemoryStore {
    async fn find_barrier(
        &self,
        device_id: &str,
        barrier_identifier: &str,
    ) -> CoreResult<Option<Barrier>> {
        Ok(self
            .barriers
            .read()
            .values()
            .find(|b| b.device_id == device_id && b.barrier_identifier == barrier_identifier)
            .cloned())
    }

    async fn barriers_for_device(&self, device_id: &str) -> CoreResult<Vec<Barrier>> {
        let mut barriers: Vec<Barrier> =
            self.barriers.read().values().filter(|b| b.device_id == device_id).cloned().collect();
        barriers.sort_by_key(|b| b.id);
        Ok(barriers)
    }

    async fn update_barrier_state_if_newer(
        &self,
        barrier_id: i64,
        state: BarrierState,
        implied_command: Option<BarrierCommand>,
        event_at: DateTime<Utc>,
        source: &str,
    ) -> CoreResult<ApplyOutcome> {
        let mut barriers = self.barriers.write();
        let barrier = barriers
            .get_mut(&barrier_id)
            .ok_or_else(|| CoreError::not_registered("barrier", barrier_id.to_string()))?;
        if !is_newer_update(&barrier.current_state, barrier.last_event_at, &state, event_at) {
            return Ok(ApplyOutcome::Skipped);
        }
        barrier.current_state = state;
        barrier.last_event_at = Some(event_at);
        barrier.last_update_source = Some(source.to_string());
        if let Some(command) = implied_command {
            barrier.last_command = Some(command);
            barrier.last_command_at = Some(event_at);
        }
        barrier.updated_at = Some(Utc::now());
        Ok(ApplyOutcome::Applied)
    }

    async fn record_barrier_command(
        &self,
        barrier_id: i64,
        command: BarrierCommand,
        sent_at: DateTime<Utc>,
        source: &str,
    ) -> CoreResult<()> {
        let mut barriers = self.barriers.write();
        let barrier = barriers
            .get_mut(&barrier_id)
            .ok_or_else(|| CoreError::not_registered("barrier", barrier_id.to_string()))?;
        barrier.last_command = Some(command);
        barrier.last_command_at = Some(sent_at);
        barrier.last_update_source = Some(source.to_string());
        barrier.updated_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn find_active_session(
        &self,
        lot_id: LotId,
        vehicle_identifier: &str,
    ) -> CoreResult<Option<ParkingSession>> {
        Ok(self
            .sessions
            .read()
            .iter()
            .find(|s| {
                s.lot_id == lot_id
                    && s.status == SessionStatus::Active
                    && s.vehicle_identifier == vehicle_identifier
            })
            .cloned())
    }

    async fn create_session(&self, session: NewSession) -> CoreResult<ParkingSession> {
        let mut sessions = self.sessions.write();
        // Uniqueness of the active session is enforced here as a store constraint would
        if sessions.iter().any(|s| {
            s.lot_id == session.lot_id
                && s.status == SessionStatus::Active
                && s.vehicle_identifier == session.vehicle_identifier
        }) {
            return Err(CoreError::Conflict(format!(
                "vehicle {} already has an active session in lot {}",
                session.vehicle_identifier, session.lot_id
            )));
        }
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1;
        let created = ParkingSession {
            id: SessionId(id),
            lot_id: session.lot_id,
            slot_id: session.slot_id,
            device_id: session.device_id,
            vehicle_identifier: session.vehicle_identifier,
            entry_time: session.entry_time,
            status: SessionStatus::Active,
            entry_gate_event_id: session.entry_gate_event_id,
        };
        sessions.push(created.clone());
        Ok(created)
    }

    async fn cancel_session(&self, id: SessionId) -> CoreResult<ParkingSession> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| CoreError::not_found("session", id.to_string()))?;
        if session.status != SessionStatus::Active {
            return Err(CoreError::Conflict(format!("session {id} is not active")));
        }
        session.status = SessionStatus::Cancelled;
        Ok(session.clone())
    }
}

#[async_trait]
impl GateEventRepository for MemoryStore {
    async fn insert_gate_event(&self, event: GateEvent) -> CoreResult<()> {
        let mut events = self.gate_events.write();
        if events.contains_key(&event.event_id) {
            return Err(CoreError::Conflict(format!("gate event {} already exists", event.event_id)));
        }
        events.insert(event.event_id.clone(), event);
        Ok(())
    }

    async fn find_gate_event(&self, event_id: &str) -> CoreResult<Option<GateEvent>> {
        Ok(self.gate_events.read().get(event_id).cloned())
    }

    async fn replace_gate_event_if_status(
        &self,
        event: &GateEvent,
        expected: GateEventStatus,
    ) -> CoreResult<bool> {
        let mut events = self.gate_events.write();
        match events.get_mut(&event.event_id) {
            Some(stored) if stored.status == expected => {
                *stored = event.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(CoreError::not_found("gate event", event.event_id.clone())),
        }
    }

    async fn find_expired_gate_events(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> CoreResult<Vec<GateEvent>> {
        let mut expired: Vec<GateEvent> =
            self.gate_events.read().values().filter(|e| e.is_expired_at(now)).cloned().collect();
        expired.sort_by_key(|e| e.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }

    async fn find_open_gate_events(&self, limit: usize) -> CoreResult<Vec<GateEvent>> {
        let mut open: Vec<GateEvent> = self
            .gate_events
            .read()
            .values()
            .filter(|e| e.status.is_expirable())
            .cloned()
            .collect();
        open.sort_by_key(|e| e.created_at);
        open.truncate(limit);
        Ok(open)
    }

    async fn gate_events_created_since(&self, since: DateTime<Utc>) -> CoreResult<Vec<GateEvent>> {
        Ok(self.gate_events.read().values().filter(|e| e.created_at >= since).cloned().collect())
    }
}

#[async_trait]
impl EventLogRepository for MemoryStore {
    async fn create_event_log(&self, entry: NewDeviceEventLog) -> CoreResult<i64> {
        let id = self.next_log_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.event_logs.write().push(DeviceEventLog {
            id,
            received_at: entry.received_at,
            device_id: entry.device_id,
            mqtt_topic: entry.mqtt_topic,
            message_type: entry.message_type,
            payload: entry.payload,
            processed_status: entry.processed_status,
            processing_notes: entry.processing_notes,
        });
        Ok(id)
    }

    async fn update_event_log_outcome(
        &self,
        id: i64,
        status: ProcessedStatus,
        notes: &str,
    ) -> CoreResult<()> {
        let mut logs = self.event_logs.write();
        let entry = logs
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| CoreError::not_found("device event log", id.to_string()))?;
        entry.processed_status = status;
        entry.processing_notes = notes.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::SOURCE_DEVICE;
    use crate::domain::types::{GateDirection, GateEventType};
    use chrono::Duration;

    fn slot(id: i64) -> ParkingSlot {
        ParkingSlot {
            id,
            lot_id: LotId(1),
            slot_identifier: format!("S{id}"),
            device_id: "esp32-01".to_string(),
            status: SlotStatus::Vacant,
            last_update_source: None,
            last_event_at: None,
            updated_at: None,
        }
    }

    fn gate_event(id: &str, created_at: DateTime<Utc>, status: GateEventStatus) -> GateEvent {
        GateEvent {
            event_id: id.to_string(),
            lot_id: LotId(1),
            device_id: "esp32-01".to_string(),
            sensor_id: None,
            direction: GateDirection::Entry,
            event_type: GateEventType::AtGate,
            status,
            requires_recognition: true,
            detected_plate: None,
            confidence: None,
            is_manual_entry: false,
            session_id: None,
            notes: String::new(),
            assigned_operator: None,
            created_at,
            updated_at: created_at,
            expires_at: Some(created_at + Duration::minutes(5)),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_slot_update_stamps_source() {
        let store = MemoryStore::new();
        store.put_slot(slot(1));
        let t = Utc::now();

        let outcome = store
            .update_slot_status_if_newer(1, SlotStatus::Occupied, t, SOURCE_DEVICE)
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);

        let stored = store.slot(1).unwrap();
        assert_eq!(stored.status, SlotStatus::Occupied);
        assert_eq!(stored.last_event_at, Some(t));
        assert_eq!(stored.last_update_source.as_deref(), Some("device"));
        assert!(stored.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_occupy_claims_lowest_vacant_id_once() {
        let store = MemoryStore::new();
        store.put_slot(slot(3));
        store.put_slot(slot(2));
        let mut taken = slot(1);
        taken.status = SlotStatus::Occupied;
        store.put_slot(taken);

        let first = store.occupy_first_vacant_slot(LotId(1), "check_in").await.unwrap().unwrap();
        assert_eq!(first.id, 2);
        assert_eq!(first.status, SlotStatus::Occupied);
        let second = store.occupy_first_vacant_slot(LotId(1), "check_in").await.unwrap().unwrap();
        assert_eq!(second.id, 3);
        assert!(store.occupy_first_vacant_slot(LotId(1), "check_in").await.unwrap().is_none());
        assert!(store.occupy_first_vacant_slot(LotId(9), "check_in").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_occupy_ignores_device_recency() {
        let store = MemoryStore::new();
        store.put_slot(slot(1));
        let ahead = Utc::now() + Duration::seconds(30);
        store.update_slot_status_if_newer(1, SlotStatus::Vacant, ahead, SOURCE_DEVICE).await.unwrap();

        let claimed = store.occupy_first_vacant_slot(LotId(1), "check_in").await.unwrap().unwrap();
        assert_eq!(claimed.id, 1);
        let stored = store.slot(1).unwrap();
        assert_eq!(stored.status, SlotStatus::Occupied);
        assert_eq!(stored.last_event_at, Some(ahead));

        assert_eq!(store.release_slot(1, "check_in").await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(store.release_slot(1, "check_in").await.unwrap(), ApplyOutcome::Skipped);
        assert_eq!(store.slot(1).unwrap().status, SlotStatus::Vacant);
    }

    #[tokio::test]
    async fn test_insert_duplicate_gate_event_conflicts() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_gate_event(gate_event("e1", now, GateEventStatus::Pending)).await.unwrap();
        let err = store
            .insert_gate_event(gate_event("e1", now, GateEventStatus::Pending))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_replace_if_status_is_compare_and_swap() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_gate_event(gate_event("e1", now, GateEventStatus::Pending)).await.unwrap();

        let mut next = gate_event("e1", now, GateEventStatus::AwaitingRecognition);
        assert!(store.replace_gate_event_if_status(&next, GateEventStatus::Pending).await.unwrap());

        next.status = GateEventStatus::Timeout;
        assert!(!store.replace_gate_event_if_status(&next, GateEventStatus::Pending).await.unwrap());
        assert_eq!(store.gate_event("e1").unwrap().status, GateEventStatus::AwaitingRecognition);
    }

    #[tokio::test]
    async fn test_expired_ordering_and_limit() {
        let store = MemoryStore::new();
        let base = Utc::now();
        store
            .insert_gate_event(gate_event("late", base, GateEventStatus::Pending))
            .await
            .unwrap();
        store
            .insert_gate_event(gate_event(
                "early",
                base - Duration::minutes(3),
                GateEventStatus::AwaitingRecognition,
            ))
            .await
            .unwrap();
        store
            .insert_gate_event(gate_event(
                "done",
                base - Duration::minutes(10),
                GateEventStatus::LprCompleted,
            ))
            .await
            .unwrap();

        let now = base + Duration::minutes(6);
        let expired = store.find_expired_gate_events(now, 10).await.unwrap();
        let ids: Vec<&str> = expired.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);

        let limited = store.find_expired_gate_events(now, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].event_id, "early");
    }

    #[tokio::test]
    async fn test_device_status_requires_registration() {
        let store = MemoryStore::new();
        let err = store
            .update_device_status_if_newer("ghost", DeviceStatus::Online, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotRegistered { entity: "device", .. }));
    }

    #[tokio::test]
    async fn test_upsert_creates_device() {
        let store = MemoryStore::new();
        let telemetry =
            DeviceTelemetry { firmware_version: Some("1.2.0".to_string()), ..Default::default() };
        let outcome = store
            .upsert_device_if_newer("esp32-09", &telemetry, DeviceStatus::Online, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        let device = store.device("esp32-09").unwrap();
        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.firmware_version.as_deref(), Some("1.2.0"));
    }

    #[tokio::test]
    async fn test_event_log_outcome_update() {
        let store = MemoryStore::new();
        let id = store
            .create_event_log(NewDeviceEventLog {
                received_at: Utc::now(),
                device_id: "esp32-01".to_string(),
                mqtt_topic: String::new(),
                message_type: "slot_status".to_string(),
                payload: "{}".to_string(),
                processed_status: ProcessedStatus::Pending,
                processing_notes: String::new(),
            })
            .await
            .unwrap();
        store.update_event_log_outcome(id, ProcessedStatus::Processed, "ok").await.unwrap();
        let logs = store.event_logs();
        assert_eq!(logs[0].processed_status, ProcessedStatus::Processed);
        assert_eq!(logs[0].processing_notes, "ok");
    }
}
