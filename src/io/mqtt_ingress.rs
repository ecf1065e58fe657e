//! MQTT ingress - device topics onto the event queue
//!
//! Every publish on the device topic filter is enqueued as-is, with the
//! source topic injected as `received_mqtt_topic` when the payload is a JSON
//! object. Decoding happens later in the consumer so malformed payloads still
//! reach the audit log.

use crate::infra::config::Config;
use crate::io::queue::MemoryQueue;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Add the source topic to a JSON object payload; other payloads pass through
pub fn inject_topic(payload: &str, topic: &str) -> String {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(mut map)) => {
            map.entry("received_mqtt_topic").or_insert_with(|| Value::String(topic.to_string()));
            Value::Object(map).to_string()
        }
        _ => payload.to_string(),
    }
}

/// Subscribe to the device topic filter and feed the queue until shutdown
pub async fn start_mqtt_ingress(
    config: &Config,
    queue: Arc<MemoryQueue>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("{}-ingress-{}", config.site_id(), std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_device_topic(), QoS::AtLeastOnce).await?;

    info!(
        topic = %config.mqtt_device_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "mqtt_ingress_subscribed"
    );

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("mqtt_ingress_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match std::str::from_utf8(&publish.payload) {
                            Ok(body) => {
                                let message_id = queue.send(inject_topic(body, &publish.topic));
                                debug!(topic = %publish.topic, message_id = %message_id, "mqtt_ingress_enqueued");
                            }
                            Err(e) => {
                                warn!(topic = %publish.topic, error = %e, "mqtt_ingress_invalid_utf8");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_ingress_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_ingress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
