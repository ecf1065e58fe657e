//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::entities::{Barrier, Device, ParkingLot, ParkingSlot};
use crate::domain::types::{BarrierState, BarrierType, DeviceStatus, LotId, SlotStatus};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    /// Site identifier used as a metrics label
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "parkgate".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Messages per long-poll receive
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Long-poll wait (seconds)
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
    /// Visibility timeout for received messages (seconds)
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    /// Fixed backoff after a receive error (seconds)
    #[serde(default = "default_receive_backoff_secs")]
    pub receive_backoff_secs: u64,
}

fn default_batch_size() -> usize {
    10
}

fn default_wait_secs() -> u64 {
    20
}

fn default_visibility_timeout_secs() -> u64 {
    60
}

fn default_receive_backoff_secs() -> u64 {
    5
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            wait_secs: default_wait_secs(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            receive_backoff_secs: default_receive_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateEventsConfig {
    /// Deadline for a gate event to reach a decision (minutes)
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
    /// Expiry sweep period (seconds)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Max events expired per sweep tick
    #[serde(default = "default_sweep_batch_limit")]
    pub sweep_batch_limit: usize,
    /// Minimum recognition confidence for automatic check-in
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
}

fn default_timeout_minutes() -> u64 {
    5
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_sweep_batch_limit() -> usize {
    100
}

fn default_confidence_threshold() -> f32 {
    0.8
}

impl Default for GateEventsConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: default_timeout_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_batch_limit: default_sweep_batch_limit(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_enabled")]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Topic filter for inbound device messages
    #[serde(default = "default_device_topic")]
    pub device_topic: String,
    /// Barrier commands go to `<prefix>/<barrier_type>`
    #[serde(default = "default_command_topic_prefix")]
    pub command_topic_prefix: String,
    /// Topic for live gate event notifications (QoS 0, empty to disable)
    #[serde(default = "default_live_topic")]
    pub live_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_mqtt_enabled() -> bool {
    true
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_device_topic() -> String {
    "smart_parking/devices/#".to_string()
}

fn default_command_topic_prefix() -> String {
    "smart_parking/command/barriers".to_string()
}

fn default_live_topic() -> String {
    "smart_parking/gate_events/live".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_enabled(),
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            device_topic: default_device_topic(),
            command_topic_prefix: default_command_topic_prefix(),
            live_topic: default_live_topic(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    /// Producer-to-hub hand-off capacity; full means drop
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Per-subscriber buffer
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
}

fn default_channel_capacity() -> usize {
    256
}

fn default_subscriber_capacity() -> usize {
    64
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            subscriber_capacity: default_subscriber_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RecognitionConfig {
    /// Plate recognition endpoint; empty disables image recognition
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_recognition_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_recognition_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

fn default_metrics_interval_secs() -> u64 {
    30
}

fn default_prometheus_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval_secs(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LotSeed {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub total_slots: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSeed {
    pub thing_name: String,
    #[serde(default)]
    pub lot_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BarrierSeed {
    pub id: i64,
    pub lot_id: i64,
    pub barrier_identifier: String,
    pub device_id: String,
    pub barrier_type: BarrierType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotSeed {
    pub id: i64,
    pub lot_id: i64,
    pub slot_identifier: String,
    pub device_id: String,
}

/// Registry rows loaded into the in-memory store at startup
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RegistryConfig {
    #[serde(default)]
    pub lots: Vec<LotSeed>,
    #[serde(default)]
    pub devices: Vec<DeviceSeed>,
    #[serde(default)]
    pub barriers: Vec<BarrierSeed>,
    #[serde(default)]
    pub slots: Vec<SlotSeed>,
}

impl RegistryConfig {
    pub fn lots(&self) -> Vec<ParkingLot> {
        self.lots
            .iter()
            .map(|l| ParkingLot {
                id: LotId(l.id),
                name: l.name.clone(),
                address: l.address.clone(),
                total_slots: l.total_slots,
            })
            .collect()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.devices
            .iter()
            .map(|d| {
                let mut device = Device::new(d.thing_name.clone(), d.lot_id.map(LotId));
                device.status = DeviceStatus::Offline;
                device
            })
            .collect()
    }

    pub fn barriers(&self) -> Vec<Barrier> {
        self.barriers
            .iter()
            .map(|b| Barrier {
                id: b.id,
                lot_id: LotId(b.lot_id),
                barrier_identifier: b.barrier_identifier.clone(),
                device_id: b.device_id.clone(),
                barrier_type: b.barrier_type,
                current_state: BarrierState::Unknown,
                last_update_source: None,
                last_command: None,
                last_command_at: None,
                last_event_at: None,
                updated_at: None,
            })
            .collect()
    }

    pub fn slots(&self) -> Vec<ParkingSlot> {
        self.slots
            .iter()
            .map(|s| ParkingSlot {
                id: s.id,
                lot_id: LotId(s.lot_id),
                slot_identifier: s.slot_identifier.clone(),
                device_id: s.device_id.clone(),
                status: SlotStatus::Vacant,
                last_update_source: None,
                last_event_at: None,
                updated_at: None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub gate_events: GateEventsConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    queue_batch_size: usize,
    queue_wait_secs: u64,
    queue_visibility_timeout_secs: u64,
    queue_receive_backoff_secs: u64,
    gate_event_timeout_minutes: u64,
    sweep_interval_secs: u64,
    sweep_batch_limit: usize,
    confidence_threshold: f32,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_device_topic: String,
    mqtt_command_topic_prefix: String,
    mqtt_live_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    live_channel_capacity: usize,
    live_subscriber_capacity: usize,
    recognition_url: String,
    recognition_timeout_ms: u64,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    log_json: bool,
    registry: RegistryConfig,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            queue_batch_size: toml_config.queue.batch_size,
            queue_wait_secs: toml_config.queue.wait_secs,
            queue_visibility_timeout_secs: toml_config.queue.visibility_timeout_secs,
            queue_receive_backoff_secs: toml_config.queue.receive_backoff_secs,
            gate_event_timeout_minutes: toml_config.gate_events.timeout_minutes,
            sweep_interval_secs: toml_config.gate_events.sweep_interval_secs,
            sweep_batch_limit: toml_config.gate_events.sweep_batch_limit,
            confidence_threshold: toml_config.gate_events.confidence_threshold,
            mqtt_enabled: toml_config.mqtt.enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_device_topic: toml_config.mqtt.device_topic,
            mqtt_command_topic_prefix: toml_config.mqtt.command_topic_prefix,
            mqtt_live_topic: toml_config.mqtt.live_topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            live_channel_capacity: toml_config.live.channel_capacity,
            live_subscriber_capacity: toml_config.live.subscriber_capacity,
            recognition_url: toml_config.recognition.url,
            recognition_timeout_ms: toml_config.recognition.timeout_ms,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            log_json: toml_config.logging.json,
            registry: toml_config.registry,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, path.display().to_string());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            anyhow::bail!(
                "gate_events.confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            );
        }
        if self.queue_batch_size == 0 {
            anyhow::bail!("queue.batch_size must be at least 1");
        }
        if self.live_channel_capacity == 0 || self.live_subscriber_capacity == 0 {
            anyhow::bail!("live channel capacities must be at least 1");
        }
        Ok(())
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn queue_batch_size(&self) -> usize {
        self.queue_batch_size
    }

    pub fn queue_wait(&self) -> Duration {
        Duration::from_secs(self.queue_wait_secs)
    }

    pub fn queue_visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_visibility_timeout_secs)
    }

    pub fn queue_receive_backoff(&self) -> Duration {
        Duration::from_secs(self.queue_receive_backoff_secs)
    }

    pub fn gate_event_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.gate_event_timeout_minutes as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn sweep_batch_limit(&self) -> usize {
        self.sweep_batch_limit
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_device_topic(&self) -> &str {
        &self.mqtt_device_topic
    }

    pub fn mqtt_command_topic_prefix(&self) -> &str {
        &self.mqtt_command_topic_prefix
    }

    pub fn mqtt_live_topic(&self) -> &str {
        &self.mqtt_live_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn live_channel_capacity(&self) -> usize {
        self.live_channel_capacity
    }

    pub fn live_subscriber_capacity(&self) -> usize {
        self.live_subscriber_capacity
    }

    pub fn recognition_url(&self) -> &str {
        &self.recognition_url
    }

    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_millis(self.recognition_timeout_ms)
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn log_json(&self) -> bool {
        self.log_json
    }

    pub fn registry(&self) -> &RegistryConfig {
        &self.registry
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the confidence threshold
    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Builder method for tests to shorten queue timings
    pub fn with_queue_timings(mut self, wait_secs: u64, visibility_secs: u64) -> Self {
        self.queue_wait_secs = wait_secs;
        self.queue_visibility_timeout_secs = visibility_secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "parkgate");
        assert_eq!(config.queue_batch_size(), 10);
        assert_eq!(config.queue_wait(), Duration::from_secs(20));
        assert_eq!(config.queue_visibility_timeout(), Duration::from_secs(60));
        assert_eq!(config.queue_receive_backoff(), Duration::from_secs(5));
        assert_eq!(config.gate_event_timeout(), chrono::Duration::minutes(5));
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.sweep_batch_limit(), 100);
        assert!((config.confidence_threshold() - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.mqtt_command_topic_prefix(), "smart_parking/command/barriers");
        assert!(config.registry().lots.is_empty());
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["parkgate".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> =
            vec!["parkgate".to_string(), "--config".to_string(), "config/lot-a.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/lot-a.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["parkgate".to_string(), "--config=config/lot-b.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/lot-b.toml");
    }

    #[test]
    fn test_partial_toml_uses_section_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[gate_events]
timeout_minutes = 2
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.gate_event_timeout(), chrono::Duration::minutes(2));
        assert_eq!(config.sweep_batch_limit(), 100);
        assert_eq!(config.queue_batch_size(), 10);
    }

    #[test]
    fn test_validate_rejects_threshold_out_of_range() {
        let config = Config::default().with_confidence_threshold(1.5);
        assert!(config.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_registry_seeds() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[[registry.lots]]
id = 1
name = "Central"
total_slots = 4

[[registry.devices]]
thing_name = "esp32-01"
lot_id = 1

[[registry.barriers]]
id = 10
lot_id = 1
barrier_identifier = "entry_barrier_1"
device_id = "esp32-01"
barrier_type = "entry"

[[registry.slots]]
id = 100
lot_id = 1
slot_identifier = "S1"
device_id = "esp32-01"
"#,
        )
        .unwrap();
        let registry = toml_config.registry;
        assert_eq!(registry.lots()[0].total_slots, 4);
        assert_eq!(registry.devices()[0].lot_id, Some(LotId(1)));
        assert_eq!(registry.barriers()[0].barrier_type, BarrierType::Entry);
        assert_eq!(registry.slots()[0].status, SlotStatus::Vacant);
    }
}
