//! Device state reconciler
//!
//! Applies slot, barrier and device status reports to the store. Each write
//! is one conditional repository call, so redelivered and out-of-order
//! reports resolve to the newest event by device timestamp. Stale reports
//! come back as `ApplyOutcome::Skipped`.

use crate::domain::entities::{DeviceTelemetry, SOURCE_DEVICE};
use crate::domain::messages::{
    BarrierStateReport, DeviceErrorReport, Envelope, SlotStatusReport, StartupReport,
    SystemStatusReport,
};
use crate::domain::types::{DeviceStatus, SlotStatus};
use crate::infra::clock::Clock;
use crate::infra::error::{CoreError, CoreResult};
use crate::infra::metrics::Metrics;
use crate::repository::{ApplyOutcome, Store};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct DeviceStateReconciler {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl DeviceStateReconciler {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, metrics: Arc<Metrics>) -> Self {
        Self { store, clock, metrics }
    }

    pub async fn apply_slot_status(
        &self,
        envelope: &Envelope,
        report: &SlotStatusReport,
    ) -> CoreResult<ApplyOutcome> {
        let device_id = envelope.device_id.as_str();
        let slot = self
            .store
            .find_slot(device_id, &report.slot_id)
            .await?
            .ok_or_else(|| CoreError::not_registered("slot", format!("{device_id}/{}", report.slot_id)))?;

        let status = SlotStatus::from_occupied(report.occupied);
        let outcome = self
            .store
            .update_slot_status_if_newer(slot.id, status, self.event_time(envelope), SOURCE_DEVICE)
            .await?;
        self.metrics.record_update(outcome.applied());

        if outcome.applied() {
            info!(
                device_id = %device_id,
                slot = %report.slot_id,
                status = %status.as_str(),
                "slot_status_updated"
            );
        } else {
            debug!(device_id = %device_id, slot = %report.slot_id, "slot_status_stale");
        }
        Ok(outcome)
    }

    pub async fn apply_barrier_state(
        &self,
        envelope: &Envelope,
        report: &BarrierStateReport,
    ) -> CoreResult<ApplyOutcome> {
        let device_id = envelope.device_id.as_str();
        // Older firmware omits barrier_id; the controller names barriers <device>_<type>
        let identifier = if report.barrier_id.is_empty() {
            format!("{device_id}_{}", report.barrier_type)
        } else {
            report.barrier_id.clone()
        };
        let barrier = self
            .store
            .find_barrier(device_id, &identifier)
            .await?
            .ok_or_else(|| CoreError::not_registered("barrier", format!("{device_id}/{identifier}")))?;

        let outcome = self
            .store
            .update_barrier_state_if_newer(
                barrier.id,
                report.barrier_state,
                report.implied_command(),
                self.event_time(envelope),
                SOURCE_DEVICE,
            )
            .await?;
        self.metrics.record_update(outcome.applied());

        if outcome.applied() {
            info!(
                device_id = %device_id,
                barrier = %identifier,
                state = %report.barrier_state.as_str(),
                "barrier_state_updated"
            );
        } else {
            debug!(device_id = %device_id, barrier = %identifier, "barrier_state_stale");
        }
        Ok(outcome)
    }

    /// Register or refresh the device from its boot announcement
    pub async fn apply_startup(
        &self,
        envelope: &Envelope,
        report: &StartupReport,
    ) -> CoreResult<ApplyOutcome> {
        self.upsert(envelope, &report.telemetry(), "startup").await
    }

    pub async fn apply_system_status(
        &self,
        envelope: &Envelope,
        report: &SystemStatusReport,
    ) -> CoreResult<ApplyOutcome> {
        self.upsert(envelope, &report.telemetry(), "system_status").await
    }

    pub async fn apply_device_error(
        &self,
        envelope: &Envelope,
        report: &DeviceErrorReport,
    ) -> CoreResult<ApplyOutcome> {
        warn!(
            device_id = %envelope.device_id,
            error_code = %report.error_code,
            error = %report.error_message,
            "device_reported_error"
        );
        self.set_status(envelope, DeviceStatus::Error).await
    }

    /// Acknowledgements and summaries only prove the device is alive
    pub async fn mark_online(&self, envelope: &Envelope) -> CoreResult<ApplyOutcome> {
        self.set_status(envelope, DeviceStatus::Online).await
    }

    async fn upsert(
        &self,
        envelope: &Envelope,
        telemetry: &DeviceTelemetry,
        kind: &'static str,
    ) -> CoreResult<ApplyOutcome> {
        let outcome = self
            .store
            .upsert_device_if_newer(
                &envelope.device_id,
                telemetry,
                DeviceStatus::Online,
                self.event_time(envelope),
            )
            .await?;
        self.metrics.record_update(outcome.applied());
        debug!(
            device_id = %envelope.device_id,
            kind = %kind,
            applied = %outcome.applied(),
            "device_telemetry_reconciled"
        );
        Ok(outcome)
    }

    async fn set_status(&self, envelope: &Envelope, status: DeviceStatus) -> CoreResult<ApplyOutcome> {
        let outcome = self
            .store
            .update_device_status_if_newer(&envelope.device_id, status, self.event_time(envelope))
            .await?;
        self.metrics.record_update(outcome.applied());
        if outcome.applied() {
            debug!(device_id = %envelope.device_id, status = %status.as_str(), "device_status_updated");
        }
        Ok(outcome)
    }

    /// Device timestamp, or receive time when the device clock sent garbage
    fn event_time(&self, envelope: &Envelope) -> DateTime<Utc> {
        match envelope.event_time() {
            Some(t) => t,
            None => {
                warn!(
                    device_id = %envelope.device_id,
                    timestamp = %envelope.timestamp,
                    "event_timestamp_invalid"
                );
                self.clock.now()
            }
        }
    }
}
