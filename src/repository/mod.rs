//! Repository contracts for the external persistence layer
//!
//! The relational store owns lots, slots, barriers, devices, sessions, gate
//! events and the device event log. Every write the core performs goes
//! through one narrow call here; conditional writes (`*_if_newer`,
//! `replace_if_status`) must be atomic in the implementation so concurrent
//! consumers cannot interleave a read-then-write.
//!
//! - `memory` - in-process implementation used by the daemon and tests

pub mod memory;

use crate::domain::entities::{
    Barrier, Device, DeviceTelemetry, NewDeviceEventLog, NewSession, ParkingLot, ParkingSession,
    ParkingSlot,
};
use crate::domain::gate_event::GateEvent;
use crate::domain::types::{
    BarrierCommand, BarrierState, DeviceStatus, GateEventStatus, LotId, ProcessedStatus,
    SessionId, SlotStatus,
};
use crate::infra::error::CoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;

/// Result of a conditional device-driven write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Stale or duplicate event; stored state left untouched
    Skipped,
}

impl ApplyOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Last-writer-wins by event timestamp.
///
/// Applies when nothing was recorded yet, when the event is strictly newer,
/// or when it carries the same timestamp but a different state. An older
/// event never applies, whatever its state.
pub fn is_newer_update<S: PartialEq>(
    stored_state: &S,
    stored_at: Option<DateTime<Utc>>,
    new_state: &S,
    event_at: DateTime<Utc>,
) -> bool {
    match stored_at {
        None => true,
        Some(stored) if event_at > stored => true,
        Some(stored) if event_at == stored => stored_state != new_state,
        Some(_) => false,
    }
}

#[async_trait]
pub trait LotRepository: Send + Sync {
    async fn find_lot(&self, id: LotId) -> CoreResult<Option<ParkingLot>>;
}

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn find_device(&self, thing_name: &str) -> CoreResult<Option<Device>>;

    /// Merge telemetry and set status, creating the device row when absent
    async fn upsert_device_if_newer(
        &self,
        thing_name: &str,
        telemetry: &DeviceTelemetry,
        status: DeviceStatus,
        seen_at: DateTime<Utc>,
    ) -> CoreResult<ApplyOutcome>;

    /// Conditional status write; `NotRegistered` when the device is unknown
    async fn update_device_status_if_newer(
        &self,
        thing_name: &str,
        status: DeviceStatus,
        seen_at: DateTime<Utc>,
    ) -> CoreResult<ApplyOutcome>;
}

#[async_trait]
pub trait SlotRepository: Send + Sync {
    async fn find_slot(&self, device_id: &str, slot_identifier: &str)
        -> CoreResult<Option<ParkingSlot>>;

    /// Claim the lowest-id vacant slot of a lot in a single write.
    ///
    /// Server-side claim: the device recency marker `last_event_at` is left
    /// alone so later device reports still order against each other.
    async fn occupy_first_vacant_slot(
        &self,
        lot_id: LotId,
        source: &str,
    ) -> CoreResult<Option<ParkingSlot>>;

    /// Undo a claim; `Skipped` when the slot is no longer occupied
    async fn release_slot(&self, slot_id: i64, source: &str) -> CoreResult<ApplyOutcome>;

    async fn update_slot_status_if_newer(
        &self,
        slot_id: i64,
        status: SlotStatus,
        event_at: DateTime<Utc>,
        source: &str,
    ) -> CoreResult<ApplyOutcome>;
}

#[async_trait]
pub trait BarrierRepository: Send + Sync {
    async fn find_barrier(&self, device_id: &str, barrier_identifier: &str)
        -> CoreResult<Option<Barrier>>;

    async fn barriers_for_device(&self, device_id: &str) -> CoreResult<Vec<Barrier>>;

    async fn update_barrier_state_if_newer(
        &self,
        barrier_id: i64,
        state: BarrierState,
        implied_command: Option<BarrierCommand>,
        event_at: DateTime<Utc>,
        source: &str,
    ) -> CoreResult<ApplyOutcome>;

    async fn record_barrier_command(
        &self,
        barrier_id: i64,
        command: BarrierCommand,
        sent_at: DateTime<Utc>,
        source: &str,
    ) -> CoreResult<()>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_active_session(
        &self,
        lot_id: LotId,
        vehicle_identifier: &str,
    ) -> CoreResult<Option<ParkingSession>>;

    async fn create_session(&self, session: NewSession) -> CoreResult<ParkingSession>;

    /// Move an active session to cancelled; `Conflict` when it is no longer active
    async fn cancel_session(&self, id: SessionId) -> CoreResult<ParkingSession>;
}

#[async_trait]
pub trait GateEventRepository: Send + Sync {
    /// Insert a new record; `Conflict` if the event id already exists
    async fn insert_gate_event(&self, event: GateEvent) -> CoreResult<()>;

    async fn find_gate_event(&self, event_id: &str) -> CoreResult<Option<GateEvent>>;

    /// Replace the stored record only while its status still equals `expected`
    async fn replace_gate_event_if_status(
        &self,
        event: &GateEvent,
        expected: GateEventStatus,
    ) -> CoreResult<bool>;

    /// Pending or awaiting events past their deadline, soonest-expired first
    async fn find_expired_gate_events(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> CoreResult<Vec<GateEvent>>;

    /// Pending or awaiting events, oldest first
    async fn find_open_gate_events(&self, limit: usize) -> CoreResult<Vec<GateEvent>>;

    async fn gate_events_created_since(&self, since: DateTime<Utc>) -> CoreResult<Vec<GateEvent>>;
}

#[async_trait]
pub trait EventLogRepository: Send + Sync {
    async fn create_event_log(&self, entry: NewDeviceEventLog) -> CoreResult<i64>;

    async fn update_event_log_outcome(
        &self,
        id: i64,
        status: ProcessedStatus,
        notes: &str,
    ) -> CoreResult<()>;
}

/// Every repository contract behind one trait object
pub trait Store:
    LotRepository
    + DeviceRepository
    + SlotRepository
    + BarrierRepository
    + SessionRepository
    + GateEventRepository
    + EventLogRepository
{
}

impl<T> Store for T where
    T: LotRepository
        + DeviceRepository
        + SlotRepository
        + BarrierRepository
        + SessionRepository
        + GateEventRepository
        + EventLogRepository
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_first_update_always_applies() {
        let t = Utc::now();
        assert!(is_newer_update(&SlotStatus::Vacant, None, &SlotStatus::Vacant, t));
    }

    #[test]
    fn test_newer_event_applies_even_with_same_state() {
        let t = Utc::now();
        let later = t + Duration::seconds(1);
        assert!(is_newer_update(&SlotStatus::Occupied, Some(t), &SlotStatus::Occupied, later));
    }

    #[test]
    fn test_same_timestamp_only_applies_on_change() {
        let t = Utc::now();
        assert!(!is_newer_update(&SlotStatus::Occupied, Some(t), &SlotStatus::Occupied, t));
        assert!(is_newer_update(&SlotStatus::Occupied, Some(t), &SlotStatus::Vacant, t));
    }

    #[test]
    fn test_older_event_never_applies() {
        let t = Utc::now();
        let earlier = t - Duration::seconds(30);
        assert!(!is_newer_update(&SlotStatus::Occupied, Some(t), &SlotStatus::Vacant, earlier));
        assert!(!is_newer_update(&SlotStatus::Occupied, Some(t), &SlotStatus::Occupied, earlier));
    }
}
