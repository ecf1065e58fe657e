//! MQTT barrier command publisher

use crate::infra::config::Config;
use crate::infra::error::{CoreError, CoreResult};
use crate::services::barrier_control::CommandPublisher;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Publishes barrier commands at QoS 1
pub struct MqttCommandPublisher {
    client: AsyncClient,
}

impl MqttCommandPublisher {
    /// Connect to the configured broker; the event loop runs on its own task
    pub fn new(config: &Config) -> Self {
        let client_id = format!("{}-commands-{}", config.site_id(), std::process::id());
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
                        info!("mqtt_command_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_command_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_command_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client }
    }
}

#[async_trait]
impl CommandPublisher for MqttCommandPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> CoreResult<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| CoreError::Transport(format!("mqtt publish to {topic} failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_publish_queues_while_broker_unreachable() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[mqtt]\nenabled = true\nhost = \"127.0.0.1\"\nport = 1\n").unwrap();
        file.flush().unwrap();
        let config = Config::from_file(file.path()).unwrap();

        let publisher = MqttCommandPublisher::new(&config);
        let payload = br#"{"command":"open","request_id":"req-1"}"#.to_vec();
        let sent = tokio::time::timeout(
            Duration::from_secs(1),
            publisher.publish("smart_parking/command/barriers/entry", payload),
        )
        .await
        .unwrap();
        assert!(sent.is_ok());
    }
}
