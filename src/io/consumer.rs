//! Queue consumer loop
//!
//! Long-polls the event queue, hands each body to the dispatcher and deletes
//! it only when the dispatcher returns `Ok`. Anything else stays on the queue
//! and comes back after the visibility timeout.

use crate::infra::config::Config;
use crate::infra::error::CoreResult;
use crate::infra::metrics::Metrics;
use crate::io::queue::{EventQueue, QueueMessage};
use crate::services::dispatcher::DeviceEventDispatcher;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    pub batch_size: usize,
    pub wait: Duration,
    /// Pause after a failed receive
    pub receive_backoff: Duration,
}

impl ConsumerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.queue_batch_size(),
            wait: config.queue_wait(),
            receive_backoff: config.queue_receive_backoff(),
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            wait: Duration::from_secs(20),
            receive_backoff: Duration::from_secs(5),
        }
    }
}

/// What one poll did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub received: usize,
    pub deleted: usize,
    pub failed: usize,
}

pub struct QueueConsumer {
    queue: Arc<dyn EventQueue>,
    dispatcher: Arc<DeviceEventDispatcher>,
    metrics: Arc<Metrics>,
    settings: ConsumerSettings,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn EventQueue>,
        dispatcher: Arc<DeviceEventDispatcher>,
        metrics: Arc<Metrics>,
        settings: ConsumerSettings,
    ) -> Self {
        Self { queue, dispatcher, metrics, settings }
    }

    /// Receive one batch and process it; a receive failure is returned as `Err`
    pub async fn poll_once(&self) -> CoreResult<PollStats> {
        let messages = self.queue.receive(self.settings.batch_size, self.settings.wait).await?;
        Ok(self.process_batch(messages).await)
    }

    async fn process_batch(&self, messages: Vec<QueueMessage>) -> PollStats {
        let mut stats = PollStats { received: messages.len(), ..Default::default() };
        if messages.is_empty() {
            return stats;
        }
        self.metrics.record_messages_received(messages.len() as u64);

        for message in messages {
            if self.process(message).await {
                stats.deleted += 1;
            } else {
                stats.failed += 1;
            }
        }
        stats
    }

    /// Returns true when the message was acknowledged
    async fn process(&self, message: QueueMessage) -> bool {
        let started = Instant::now();
        match self.dispatcher.handle(&message.body).await {
            Ok(disposition) => {
                self.metrics.record_message_processed(started.elapsed().as_micros() as u64);
                debug!(
                    message_id = %message.message_id,
                    disposition = ?disposition,
                    "queue_message_processed"
                );
                match self.queue.delete(&message.receipt).await {
                    Ok(()) => {
                        self.metrics.record_message_deleted();
                        true
                    }
                    Err(e) => {
                        warn!(message_id = %message.message_id, error = %e, "queue_delete_failed");
                        false
                    }
                }
            }
            Err(e) => {
                self.metrics.record_message_failed();
                warn!(
                    message_id = %message.message_id,
                    receive_count = %message.receive_count,
                    error = %e,
                    "queue_message_failed"
                );
                false
            }
        }
    }

    /// Run until shutdown
    ///
    /// Shutdown interrupts the long-poll and the backoff sleep, never a batch
    /// already being processed.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = %self.settings.batch_size,
            wait_secs = %self.settings.wait.as_secs(),
            "consumer_started"
        );
        loop {
            if *shutdown.borrow() {
                info!("consumer_shutdown");
                return;
            }
            let received = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue;
                }
                result = self.queue.receive(self.settings.batch_size, self.settings.wait) => result,
            };
            match received {
                Ok(messages) => {
                    self.process_batch(messages).await;
                }
                Err(e) => {
                    self.metrics.record_receive_error();
                    warn!(
                        error = %e,
                        backoff_secs = %self.settings.receive_backoff.as_secs(),
                        "queue_receive_failed"
                    );
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(self.settings.receive_backoff) => {}
                    }
                }
            }
        }
    }
}
