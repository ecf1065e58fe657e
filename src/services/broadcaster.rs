//! Live notification broadcaster - best-effort fan-out to subscribers
//!
//! Producers hand serialized notifications to the hub over a bounded channel
//! with `try_send`, so the correlation path never waits on viewers. The hub
//! task fans each payload out to every registered subscriber under a shared
//! lock; register/unregister take the exclusive lock.

use crate::domain::gate_event::GateEventNotification;
use crate::infra::metrics::Metrics;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Connected subscribers keyed by connection handle
pub struct SubscriberRegistry {
    subscribers: RwLock<FxHashMap<u64, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    capacity: usize,
    metrics: Arc<Metrics>,
}

/// Receiving side handed to one viewer
pub struct Subscription {
    pub id: u64,
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

impl SubscriberRegistry {
    fn new(capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            subscribers: RwLock::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
            capacity,
            metrics,
        }
    }

    pub fn register(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        let count = {
            let mut subscribers = self.subscribers.write();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        self.metrics.set_live_subscribers(count as u64);
        info!(subscriber_id = %id, subscribers = %count, "live_subscriber_registered");
        Subscription { id, rx }
    }

    pub fn unregister(&self, id: u64) {
        let (removed, count) = {
            let mut subscribers = self.subscribers.write();
            let removed = subscribers.remove(&id).is_some();
            (removed, subscribers.len())
        };
        if removed {
            self.metrics.set_live_subscribers(count as u64);
            info!(subscriber_id = %id, subscribers = %count, "live_subscriber_unregistered");
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver one payload to every subscriber; returns how many accepted it
    ///
    /// A full subscriber misses this payload but stays registered; a closed
    /// one is removed.
    fn fan_out(&self, payload: &str) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, tx) in subscribers.iter() {
                match tx.try_send(payload.to_string()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        self.metrics.record_live_subscriber_dropped();
                        debug!(subscriber_id = %id, "live_subscriber_full");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }
        for id in closed {
            self.unregister(id);
        }
        delivered
    }
}

/// Producer handle; cheap to clone
#[derive(Clone)]
pub struct LiveBroadcaster {
    tx: mpsc::Sender<String>,
    registry: Arc<SubscriberRegistry>,
    metrics: Arc<Metrics>,
}

impl LiveBroadcaster {
    /// Queue a notification for fan-out; never waits
    ///
    /// Returns false if the payload was dropped.
    pub fn broadcast(&self, notification: &GateEventNotification) -> bool {
        let payload = match serde_json::to_string(notification) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, event_id = %notification.event_id, "live_serialize_failed");
                return false;
            }
        };
        match self.tx.try_send(payload) {
            Ok(()) => {
                self.metrics.record_live_broadcast();
                true
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.record_live_dropped();
                debug!(event_id = %notification.event_id, "live_broadcast_dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.record_live_dropped();
                warn!(event_id = %notification.event_id, "live_hub_closed");
                false
            }
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.registry.register()
    }

    pub fn unsubscribe(&self, id: u64) {
        self.registry.unregister(id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }
}

/// Fan-out task draining the hand-off channel
pub struct BroadcastHub {
    rx: mpsc::Receiver<String>,
    registry: Arc<SubscriberRegistry>,
}

impl BroadcastHub {
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("live_hub_started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("live_hub_shutdown");
                        return;
                    }
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(payload) => {
                            self.registry.fan_out(&payload);
                        }
                        None => {
                            info!("live_hub_stopped");
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Create the producer handle and the hub task
///
/// Returns the broadcaster (for producers and subscribers) and the hub (to be spawned)
pub fn create_live_broadcaster(
    channel_capacity: usize,
    subscriber_capacity: usize,
    metrics: Arc<Metrics>,
) -> (LiveBroadcaster, BroadcastHub) {
    let (tx, rx) = mpsc::channel(channel_capacity.max(1));
    let registry = Arc::new(SubscriberRegistry::new(subscriber_capacity.max(1), metrics.clone()));
    let broadcaster = LiveBroadcaster { tx, registry: registry.clone(), metrics };
    let hub = BroadcastHub { rx, registry };
    (broadcaster, hub)
}
