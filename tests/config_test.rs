//! Integration tests for configuration loading

use parkgate::domain::types::{BarrierType, LotId};
use parkgate::infra::Config;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let temp_file = write_config(
        r#"
[site]
id = "lot-a"

[queue]
batch_size = 5
wait_secs = 2
visibility_timeout_secs = 30

[gate_events]
timeout_minutes = 3
sweep_interval_secs = 15
confidence_threshold = 0.65

[mqtt]
enabled = false
host = "broker.local"
port = 1884
device_topic = "lot-a/devices/#"
command_topic_prefix = "lot-a/command/barriers/"

[recognition]
url = "http://lpr.local/recognize"
timeout_ms = 1500

[metrics]
interval_secs = 15
prometheus_port = 9191

[logging]
json = true

[[registry.lots]]
id = 7
name = "Riverside"
total_slots = 12

[[registry.devices]]
thing_name = "esp32-gate"
lot_id = 7

[[registry.barriers]]
id = 70
lot_id = 7
barrier_identifier = "exit_barrier_1"
device_id = "esp32-gate"
barrier_type = "exit"
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "lot-a");
    assert_eq!(config.queue_batch_size(), 5);
    assert_eq!(config.queue_wait(), Duration::from_secs(2));
    assert_eq!(config.queue_visibility_timeout(), Duration::from_secs(30));
    assert_eq!(config.queue_receive_backoff(), Duration::from_secs(5));
    assert_eq!(config.gate_event_timeout(), chrono::Duration::minutes(3));
    assert_eq!(config.sweep_interval(), Duration::from_secs(15));
    assert!((config.confidence_threshold() - 0.65).abs() < f32::EPSILON);
    assert!(!config.mqtt_enabled());
    assert_eq!(config.mqtt_host(), "broker.local");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_device_topic(), "lot-a/devices/#");
    assert_eq!(config.mqtt_live_topic(), "smart_parking/gate_events/live");
    assert_eq!(config.recognition_url(), "http://lpr.local/recognize");
    assert_eq!(config.recognition_timeout(), Duration::from_millis(1500));
    assert_eq!(config.prometheus_port(), 9191);
    assert!(config.log_json());
    assert_eq!(config.config_file(), temp_file.path().display().to_string());

    let registry = config.registry();
    assert_eq!(registry.lots()[0].id, LotId(7));
    assert_eq!(registry.devices()[0].lot_id, Some(LotId(7)));
    assert_eq!(registry.barriers()[0].barrier_type, BarrierType::Exit);
    assert!(registry.slots().is_empty());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.gate_event_timeout(), chrono::Duration::minutes(5));
    assert!(config.recognition_url().is_empty());
}

#[test]
fn test_out_of_range_threshold_is_rejected() {
    let temp_file = write_config(
        r#"
[gate_events]
confidence_threshold = 80.0
"#,
    );

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("confidence_threshold"));

    let config = Config::load_from_path(temp_file.path().to_str().unwrap());
    assert!((config.confidence_threshold() - 0.8).abs() < f32::EPSILON);
}

#[test]
fn test_unparseable_file_reports_path() {
    let temp_file = write_config("[queue\nbatch_size = ");
    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse config file"));
}

#[test]
fn test_bundled_dev_config_loads() {
    let config = Config::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml")).unwrap();
    assert_eq!(config.site_id(), "dev");
    assert_eq!(config.registry().lots().len(), 1);
    assert_eq!(config.registry().barriers().len(), 2);
    assert_eq!(config.registry().slots().len(), 2);
}
