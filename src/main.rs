//! parkgate daemon
//!
//! Drains device events from the queue, reconciles device state, runs the
//! gate correlation engine and pushes live notifications to subscribers.
//!
//! Module structure:
//! - `domain/` - Gate events, device messages and referenced entities
//! - `infra/` - Configuration, errors, clock and metrics
//! - `io/` - Queue, MQTT, recognizer and metrics endpoint
//! - `repository/` - Persistence contracts and the in-memory store
//! - `services/` - Dispatcher, reconciler, correlator, broadcaster, sweeper

use clap::Parser;
use parkgate::infra::{Clock, Config, Metrics, SystemClock};
use parkgate::io::mqtt_ingress::start_mqtt_ingress;
use parkgate::io::prometheus::start_metrics_server;
use parkgate::io::{
    ConsumerSettings, HttpPlateRecognizer, MemoryQueue, MqttCommandPublisher, MqttLiveForwarder,
    QueueConsumer,
};
use parkgate::repository::{MemoryStore, Store};
use parkgate::services::{
    create_live_broadcaster, BarrierControl, CorrelationApi, CorrelatorSettings,
    DeviceEventDispatcher, DeviceStateReconciler, ExpirySweeper, GateCorrelator,
    RepositoryCheckIn,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Gate event correlation daemon
#[derive(Parser, Debug)]
#[command(name = "parkgate", version, about)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, default_value = "config/dev.toml", env = "CONFIG_FILE")]
    config: String,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = Config::load_from_path(&args.config);
    init_logging(config.log_json());

    info!(
        version = %env!("CARGO_PKG_VERSION"),
        site = %config.site_id(),
        config_file = %config.config_file(),
        "parkgate_starting"
    );
    info!(
        timeout_minutes = %config.gate_event_timeout().num_minutes(),
        confidence_threshold = %config.confidence_threshold(),
        lots = %config.registry().lots.len(),
        devices = %config.registry().devices.len(),
        mqtt = %config.mqtt_enabled(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn Store> = Arc::new(MemoryStore::seeded(config.registry()));

    let (live, hub) = create_live_broadcaster(
        config.live_channel_capacity(),
        config.live_subscriber_capacity(),
        metrics.clone(),
    );
    let hub_handle = tokio::spawn(hub.run(shutdown_rx.clone()));

    let check_in = Arc::new(RepositoryCheckIn::new(store.clone(), clock.clone()));
    let mut correlator = GateCorrelator::new(
        store.clone(),
        check_in,
        live.clone(),
        clock.clone(),
        metrics.clone(),
        CorrelatorSettings::from_config(&config),
    );
    if !config.recognition_url().is_empty() {
        let recognizer =
            HttpPlateRecognizer::new(config.recognition_url(), config.recognition_timeout())?;
        info!(url = %config.recognition_url(), "plate_recognizer_configured");
        correlator = correlator.with_recognizer(Arc::new(recognizer));
    }
    let correlator = Arc::new(correlator);

    let reconciler = DeviceStateReconciler::new(store.clone(), clock.clone(), metrics.clone());
    let dispatcher = Arc::new(DeviceEventDispatcher::new(
        store.clone(),
        reconciler,
        correlator.clone(),
        clock.clone(),
        metrics.clone(),
    ));

    let queue = Arc::new(MemoryQueue::new(config.queue_visibility_timeout()));
    let consumer = QueueConsumer::new(
        queue.clone(),
        dispatcher,
        metrics.clone(),
        ConsumerSettings::from_config(&config),
    );

    let sweeper =
        ExpirySweeper::new(correlator.clone(), config.sweep_interval(), config.sweep_batch_limit());
    tokio::spawn(sweeper.run(shutdown_rx.clone()));

    let mut api = CorrelationApi::new(correlator.clone());

    if config.mqtt_enabled() {
        let publisher = MqttCommandPublisher::new(&config);
        api = api.with_barrier_control(BarrierControl::new(
            store.clone(),
            Arc::new(publisher),
            clock.clone(),
            metrics.clone(),
            config.mqtt_command_topic_prefix(),
        ));
        info!(prefix = %config.mqtt_command_topic_prefix(), "barrier_control_configured");

        let ingress_config = config.clone();
        let ingress_queue = queue.clone();
        let ingress_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_mqtt_ingress(&ingress_config, ingress_queue, ingress_shutdown).await
            {
                error!(error = %e, "mqtt_ingress_failed");
            }
        });

        if !config.mqtt_live_topic().is_empty() {
            let forwarder = MqttLiveForwarder::new(&config, live.clone());
            tokio::spawn(forwarder.run(shutdown_rx.clone()));
        }
    } else {
        warn!("mqtt_disabled_no_ingress");
    }

    if config.prometheus_port() > 0 {
        let metrics_clone = metrics.clone();
        let site_id = config.site_id().to_string();
        let port = config.prometheus_port();
        let metrics_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(port, metrics_clone, site_id, metrics_shutdown).await
            {
                error!(error = %e, "prometheus_server_failed");
            }
        });
    }

    let metrics_interval = config.metrics_interval_secs();
    if metrics_interval > 0 {
        let metrics_clone = metrics.clone();
        let mut reporter_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        metrics_clone.report().log();
                    }
                    changed = reporter_shutdown.changed() => {
                        if changed.is_err() || *reporter_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown_signal_received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Hold the sender; dropping it stops every task
                error!(error = %e, "shutdown_signal_error");
                std::future::pending::<()>().await;
            }
        }
    });

    info!(
        queue_batch_size = %config.queue_batch_size(),
        queue_wait_secs = %config.queue_wait().as_secs(),
        barrier_commands = %api.barrier_commands_enabled(),
        "parkgate_running"
    );

    consumer.run(shutdown_rx).await;
    let _ = hub_handle.await;

    let remaining = queue.len();
    if remaining > 0 {
        warn!(remaining = %remaining, "queue_not_drained_at_shutdown");
    }
    info!("parkgate_stopped");
    Ok(())
}
