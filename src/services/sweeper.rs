//! Periodic expiry of overdue gate events

use crate::services::correlator::GateCorrelator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub struct ExpirySweeper {
    correlator: Arc<GateCorrelator>,
    interval: Duration,
    batch_limit: usize,
}

impl ExpirySweeper {
    pub fn new(correlator: Arc<GateCorrelator>, interval: Duration, batch_limit: usize) -> Self {
        Self { correlator, interval, batch_limit: batch_limit.max(1) }
    }

    /// One bounded pass; returns the number of events timed out
    pub async fn sweep_once(&self) -> usize {
        match self.correlator.expire_overdue(self.batch_limit).await {
            Ok(expired) => {
                if expired.len() == self.batch_limit {
                    debug!(limit = %self.batch_limit, "sweep_batch_full");
                }
                expired.len()
            }
            Err(e) => {
                warn!(error = %e, "sweep_failed");
                0
            }
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = %self.interval.as_secs(), limit = %self.batch_limit, "sweeper_started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("sweeper_shutdown");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Device, ParkingLot};
    use crate::domain::messages::{Envelope, GateSensorReport};
    use crate::domain::types::{GateEventStatus, LotId};
    use crate::infra::clock::ManualClock;
    use crate::infra::metrics::Metrics;
    use crate::repository::MemoryStore;
    use crate::services::broadcaster::create_live_broadcaster;
    use crate::services::check_in::RepositoryCheckIn;
    use crate::services::correlator::CorrelatorSettings;
    use chrono::Utc;

    async fn setup(events: usize) -> (Arc<GateCorrelator>, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        store.put_lot(ParkingLot {
            id: LotId(1),
            name: "Central".to_string(),
            address: String::new(),
            total_slots: 0,
        });
        store.put_device(Device::new("esp32-01", Some(LotId(1))));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let metrics = Arc::new(Metrics::new());
        let (live, _hub) = create_live_broadcaster(64, 16, metrics.clone());
        let correlator = Arc::new(GateCorrelator::new(
            store.clone(),
            Arc::new(RepositoryCheckIn::new(store.clone(), clock.clone())),
            live,
            clock.clone(),
            metrics,
            CorrelatorSettings::default(),
        ));

        let envelope = Envelope {
            device_id: "esp32-01".to_string(),
            message_type: "gate_event".to_string(),
            timestamp: String::new(),
            received_mqtt_topic: None,
            client_id_iot: None,
            iot_processing_timestamp: None,
            raw: String::new(),
        };
        for i in 0..events {
            let report = GateSensorReport {
                event_id: format!("gate-{i}"),
                event_type: "vehicle_at_gate".to_string(),
                gate_area: "entry_approach".to_string(),
                is_entry_area: true,
                ..Default::default()
            };
            correlator.handle_sensor_event(&envelope, &report).await.unwrap();
        }
        (correlator, store, clock)
    }

    #[tokio::test]
    async fn test_sweep_respects_batch_limit() {
        let (correlator, store, clock) = setup(3).await;
        clock.advance(chrono::Duration::minutes(6));

        let sweeper = ExpirySweeper::new(correlator, Duration::from_secs(60), 2);
        assert_eq!(sweeper.sweep_once().await, 2);
        assert_eq!(sweeper.sweep_once().await, 1);
        assert_eq!(sweeper.sweep_once().await, 0);
        for i in 0..3 {
            assert_eq!(
                store.gate_event(&format!("gate-{i}")).unwrap().status,
                GateEventStatus::Timeout
            );
        }
    }

    #[tokio::test]
    async fn test_run_sweeps_and_stops_on_shutdown() {
        let (correlator, store, clock) = setup(1).await;
        clock.advance(chrono::Duration::minutes(6));

        let (tx, rx) = watch::channel(false);
        let sweeper = ExpirySweeper::new(correlator, Duration::from_millis(20), 100);
        let handle = tokio::spawn(sweeper.run(rx));

        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.gate_event("gate-0").unwrap().status, GateEventStatus::Timeout);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_when_shutdown_sender_is_dropped() {
        let (correlator, _store, _clock) = setup(0).await;
        let (tx, rx) = watch::channel(false);
        let sweeper = ExpirySweeper::new(correlator, Duration::from_secs(60), 100);
        let handle = tokio::spawn(sweeper.run(rx));

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
