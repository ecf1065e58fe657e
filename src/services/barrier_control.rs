//! Barrier control - outbound open/close commands to gate controllers

use crate::domain::entities::SOURCE_COMMAND_SENT;
use crate::domain::messages::BarrierCommandPayload;
use crate::domain::types::{BarrierCommand, BarrierType};
use crate::infra::clock::Clock;
use crate::infra::error::{CoreError, CoreResult};
use crate::infra::metrics::Metrics;
use crate::repository::Store;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Control-plane transport; implementations publish with at-least-once delivery
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> CoreResult<()>;
}

pub struct BarrierControl {
    store: Arc<dyn Store>,
    publisher: Arc<dyn CommandPublisher>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    topic_prefix: String,
}

impl BarrierControl {
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<dyn CommandPublisher>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        topic_prefix: impl Into<String>,
    ) -> Self {
        let topic_prefix = topic_prefix.into().trim_end_matches('/').to_string();
        Self { store, publisher, clock, metrics, topic_prefix }
    }

    /// Publish `{"command","request_id"}` for one barrier; returns the request id
    ///
    /// The barrier row is stamped with the command when the device has a
    /// registered barrier of that type.
    pub async fn send_barrier_command(
        &self,
        device_id: &str,
        barrier_type: &str,
        command: &str,
        request_id: Option<String>,
    ) -> CoreResult<String> {
        let barrier_type: BarrierType = barrier_type.parse().map_err(CoreError::Invalid)?;
        let command: BarrierCommand = command.parse().map_err(CoreError::Invalid)?;
        let request_id = request_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        let payload = serde_json::to_vec(&BarrierCommandPayload {
            command,
            request_id: request_id.clone(),
        })
        .map_err(|e| CoreError::Invalid(format!("failed to encode command: {e}")))?;
        let topic = format!("{}/{}", self.topic_prefix, barrier_type.as_str());

        if let Err(e) = self.publisher.publish(&topic, payload).await {
            self.metrics.record_command(false);
            warn!(
                device_id = %device_id,
                topic = %topic,
                request_id = %request_id,
                error = %e,
                "barrier_command_failed"
            );
            return Err(e);
        }
        self.metrics.record_command(true);
        info!(
            device_id = %device_id,
            topic = %topic,
            command = %command.as_str(),
            request_id = %request_id,
            "barrier_command_sent"
        );

        let barrier = self
            .store
            .barriers_for_device(device_id)
            .await?
            .into_iter()
            .find(|b| b.barrier_type == barrier_type);
        match barrier {
            Some(barrier) => {
                self.store
                    .record_barrier_command(barrier.id, command, self.clock.now(), SOURCE_COMMAND_SENT)
                    .await?;
            }
            None => warn!(
                device_id = %device_id,
                barrier_type = %barrier_type.as_str(),
                "barrier_command_unrecorded"
            ),
        }
        Ok(request_id)
    }
}
