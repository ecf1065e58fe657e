//! Durable queue abstraction with at-least-once delivery
//!
//! `EventQueue` is the seam to the external queue service. `MemoryQueue` is
//! the in-process implementation: received messages become invisible for the
//! visibility timeout and reappear unless deleted with their receipt.

use crate::infra::error::{CoreError, CoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

/// One delivery of a queued message
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub message_id: String,
    /// Handle valid for this delivery only
    pub receipt: String,
    pub body: String,
    /// 1 on first delivery
    pub receive_count: u32,
}

#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Long-poll for up to `max` messages, waiting at most `wait`
    async fn receive(&self, max: usize, wait: Duration) -> CoreResult<Vec<QueueMessage>>;

    /// Acknowledge a delivery; fails if the receipt is no longer current
    async fn delete(&self, receipt: &str) -> CoreResult<()>;
}

#[derive(Debug)]
struct Entry {
    message_id: String,
    body: String,
    visible_at: Instant,
    receipt: Option<String>,
    receive_count: u32,
}

/// In-process queue with visibility timeout
pub struct MemoryQueue {
    entries: Mutex<Vec<Entry>>,
    visibility_timeout: Duration,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self { entries: Mutex::new(Vec::new()), visibility_timeout, notify: Notify::new() }
    }

    /// Enqueue a body; returns the assigned message id
    pub fn send(&self, body: impl Into<String>) -> String {
        let message_id = Uuid::now_v7().to_string();
        self.entries.lock().push(Entry {
            message_id: message_id.clone(),
            body: body.into(),
            visible_at: Instant::now(),
            receipt: None,
            receive_count: 0,
        });
        self.notify.notify_waiters();
        message_id
    }

    /// Messages not yet deleted, visible or in flight
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().iter().filter(|e| e.visible_at > now).count()
    }

    /// Take visible messages, or report when the next one becomes visible
    fn take_visible(&self, max: usize) -> (Vec<QueueMessage>, Option<Instant>) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let mut batch = Vec::new();
        let mut next_visible: Option<Instant> = None;

        for entry in entries.iter_mut() {
            if entry.visible_at <= now {
                if batch.len() >= max {
                    break;
                }
                let receipt = Uuid::now_v7().to_string();
                entry.receipt = Some(receipt.clone());
                entry.receive_count += 1;
                entry.visible_at = now + self.visibility_timeout;
                batch.push(QueueMessage {
                    message_id: entry.message_id.clone(),
                    receipt,
                    body: entry.body.clone(),
                    receive_count: entry.receive_count,
                });
            } else {
                next_visible =
                    Some(next_visible.map_or(entry.visible_at, |n| n.min(entry.visible_at)));
            }
        }
        (batch, next_visible)
    }
}

#[async_trait]
impl EventQueue for MemoryQueue {
    async fn receive(&self, max: usize, wait: Duration) -> CoreResult<Vec<QueueMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            // Register interest before checking so a concurrent send is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (batch, next_visible) = self.take_visible(max.max(1));
            if !batch.is_empty() {
                return Ok(batch);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let wake_at = next_visible.map_or(deadline, |n| n.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, receipt: &str) -> CoreResult<()> {
        let mut entries = self.entries.lock();
        let position = entries.iter().position(|e| e.receipt.as_deref() == Some(receipt));
        match position {
            Some(index) => {
                entries.remove(index);
                Ok(())
            }
            None => Err(CoreError::Transport(format!("receipt {receipt} is no longer valid"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_and_delete() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        queue.send("a");
        queue.send("b");
        queue.send("c");

        let batch = queue.receive(2, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].body, "a");
        assert_eq!(batch[0].receive_count, 1);
        assert_eq!(queue.in_flight(), 2);

        queue.delete(&batch[0].receipt).await.unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_undeleted_message_is_redelivered_after_visibility_timeout() {
        let queue = MemoryQueue::new(Duration::from_millis(50));
        queue.send("a");

        let first = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(queue.receive(10, Duration::ZERO).await.unwrap().is_empty());

        // Long poll wakes when the message becomes visible again
        let second = queue.receive(10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_eq!(second[0].receive_count, 2);

        // The stale receipt from the first delivery no longer deletes
        assert!(queue.delete(&first[0].receipt).await.is_err());
        queue.delete(&second[0].receipt).await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_long_poll_wakes_on_send() {
        let queue = std::sync::Arc::new(MemoryQueue::new(Duration::from_secs(60)));
        let sender = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sender.send("late");
        });

        let started = Instant::now();
        let batch = queue.receive(10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_long_poll_times_out_empty() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        let started = Instant::now();
        let batch = queue.receive(10, Duration::from_millis(30)).await.unwrap();
        assert!(batch.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
