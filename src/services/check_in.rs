//! Vehicle check-in - the session-creation collaborator behind auto-create

use crate::domain::entities::{NewSession, ParkingSession, SOURCE_CHECK_IN};
use crate::domain::types::LotId;
use crate::infra::clock::Clock;
use crate::infra::error::{CoreError, CoreResult};
use crate::repository::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct CheckInRequest {
    pub lot_id: LotId,
    pub device_id: String,
    pub vehicle_identifier: String,
    /// Defaults to the clock's now
    pub entry_time: Option<DateTime<Utc>>,
    pub entry_gate_event_id: Option<String>,
}

#[async_trait]
pub trait CheckInService: Send + Sync {
    async fn check_in(&self, request: CheckInRequest) -> CoreResult<ParkingSession>;

    /// Compensate a check-in whose gate event could not record it
    async fn cancel(&self, session: &ParkingSession) -> CoreResult<()>;
}

/// Check-in backed by the repository contracts
pub struct RepositoryCheckIn {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl RepositoryCheckIn {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn release(&self, slot_id: i64) {
        match self.store.release_slot(slot_id, SOURCE_CHECK_IN).await {
            Ok(outcome) => info!(slot_id = %slot_id, released = %outcome.applied(), "check_in_slot_released"),
            Err(e) => warn!(slot_id = %slot_id, error = %e, "check_in_slot_release_failed"),
        }
    }
}

#[async_trait]
impl CheckInService for RepositoryCheckIn {
    async fn check_in(&self, request: CheckInRequest) -> CoreResult<ParkingSession> {
        let vehicle = request.vehicle_identifier.trim();
        if vehicle.is_empty() {
            return Err(CoreError::Invalid("vehicle identifier is required".to_string()));
        }

        let lot = self
            .store
            .find_lot(request.lot_id)
            .await?
            .ok_or_else(|| CoreError::not_found("parking lot", request.lot_id.to_string()))?;

        if let Some(existing) = self.store.find_active_session(lot.id, vehicle).await? {
            return Err(CoreError::Conflict(format!(
                "vehicle {vehicle} already has active session {} in lot {}",
                existing.id, lot.id
            )));
        }

        let entry_time = request.entry_time.unwrap_or_else(|| self.clock.now());

        // Lots without managed slots get sessions without a slot
        let slot = if lot.total_slots > 0 {
            let claimed = self.store.occupy_first_vacant_slot(lot.id, SOURCE_CHECK_IN).await?;
            match &claimed {
                Some(slot) => {
                    info!(slot = %slot.slot_identifier, slot_id = %slot.id, "check_in_slot_assigned")
                }
                None => info!(lot_id = %lot.id, "check_in_no_vacant_slot"),
            }
            claimed
        } else {
            None
        };

        let created = self
            .store
            .create_session(NewSession {
                lot_id: lot.id,
                slot_id: slot.as_ref().map(|s| s.id),
                device_id: request.device_id,
                vehicle_identifier: vehicle.to_string(),
                entry_time,
                entry_gate_event_id: request.entry_gate_event_id,
            })
            .await;
        let session = match created {
            Ok(session) => session,
            Err(e) => {
                if let Some(slot) = &slot {
                    self.release(slot.id).await;
                }
                return Err(e);
            }
        };

        info!(
            session_id = %session.id,
            lot_id = %session.lot_id,
            vehicle = %session.vehicle_identifier,
            "session_checked_in"
        );
        Ok(session)
    }

    async fn cancel(&self, session: &ParkingSession) -> CoreResult<()> {
        self.store.cancel_session(session.id).await?;
        if let Some(slot_id) = session.slot_id {
            self.release(slot_id).await;
        }
        info!(session_id = %session.id, vehicle = %session.vehicle_identifier, "session_cancelled");
        Ok(())
    }
}
