//! MQTT live forwarder
//!
//! Registers as a broadcaster subscriber and republishes every live
//! notification to the live topic at QoS 0. Publishing is fire-and-forget;
//! a slow broker only costs this subscriber its own backlog.

use crate::infra::config::Config;
use crate::services::broadcaster::{LiveBroadcaster, Subscription};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct MqttLiveForwarder {
    client: AsyncClient,
    subscription: Subscription,
    live: LiveBroadcaster,
    topic: String,
}

impl MqttLiveForwarder {
    pub fn new(config: &Config, live: LiveBroadcaster) -> Self {
        let client_id = format!("{}-live-{}", config.site_id(), std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_live_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_live_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        let subscription = live.subscribe();
        Self { client, subscription, live, topic: config.mqtt_live_topic().to_string() }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(topic = %self.topic, subscriber = %self.subscription.id, "mqtt_live_started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("mqtt_live_shutdown");
                        break;
                    }
                }
                payload = self.subscription.recv() => {
                    let Some(payload) = payload else {
                        info!("mqtt_live_unsubscribed");
                        return;
                    };
                    if let Err(e) = self
                        .client
                        .publish(&self.topic, QoS::AtMostOnce, false, payload.into_bytes())
                        .await
                    {
                        debug!(error = %e, "mqtt_live_publish_failed");
                    }
                }
            }
        }
        self.live.unsubscribe(self.subscription.id);
    }
}
