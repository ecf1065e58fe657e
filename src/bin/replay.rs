//! parkgate-replay - run recorded device messages through the engine offline
//!
//! Reads one queue body per line from a JSONL capture, drains it through the
//! same dispatcher the daemon uses against an in-memory store seeded from the
//! config registry, then prints the live notifications and final gate events.
//!
//! Usage:
//!   parkgate-replay --config config/dev.toml --input capture.jsonl
//!   parkgate-replay -i capture.jsonl --advance-minutes 10

use anyhow::Context;
use clap::Parser;
use parkgate::infra::{Clock, Config, ManualClock, Metrics};
use parkgate::io::{ConsumerSettings, MemoryQueue, QueueConsumer};
use parkgate::repository::{MemoryStore, Store};
use parkgate::services::{
    create_live_broadcaster, CorrelatorSettings, DeviceEventDispatcher, DeviceStateReconciler,
    ExpirySweeper, GateCorrelator, RepositoryCheckIn,
};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Offline replay of captured device messages
#[derive(Parser, Debug)]
#[command(name = "parkgate-replay", version, about, long_about = None)]
struct Args {
    /// Path to TOML configuration file (registry and gate event settings)
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// JSONL file, one queue message body per line
    #[arg(short, long)]
    input: String,

    /// Advance the clock by this many minutes after the replay and run one expiry sweep
    #[arg(long)]
    advance_minutes: Option<i64>,

    /// Print gate events as JSON lines instead of a table
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);
    let content = fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read replay input {}", args.input))?;

    let metrics = Arc::new(Metrics::new());
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let started_at = clock.now();
    let memory = Arc::new(MemoryStore::seeded(config.registry()));
    let store: Arc<dyn Store> = memory.clone();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (live, hub) = create_live_broadcaster(
        config.live_channel_capacity(),
        config.live_subscriber_capacity().max(content.lines().count() * 2),
        metrics.clone(),
    );
    let mut subscription = live.subscribe();
    let hub_handle = tokio::spawn(hub.run(shutdown_rx));

    let check_in = Arc::new(RepositoryCheckIn::new(store.clone(), clock.clone()));
    let correlator = Arc::new(GateCorrelator::new(
        store.clone(),
        check_in,
        live.clone(),
        clock.clone(),
        metrics.clone(),
        CorrelatorSettings::from_config(&config),
    ));
    let reconciler = DeviceStateReconciler::new(store.clone(), clock.clone(), metrics.clone());
    let dispatcher = Arc::new(DeviceEventDispatcher::new(
        store.clone(),
        reconciler,
        correlator.clone(),
        clock.clone(),
        metrics.clone(),
    ));

    // Failed deliveries stay invisible for the rest of the run
    let queue = Arc::new(MemoryQueue::new(Duration::from_secs(3600)));
    let mut enqueued = 0usize;
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        queue.send(line);
        enqueued += 1;
    }

    let consumer = QueueConsumer::new(
        queue.clone(),
        dispatcher,
        metrics.clone(),
        ConsumerSettings {
            batch_size: config.queue_batch_size(),
            wait: Duration::ZERO,
            receive_backoff: Duration::ZERO,
        },
    );

    let mut failed = 0usize;
    loop {
        let stats = consumer.poll_once().await?;
        if stats.received == 0 {
            break;
        }
        failed += stats.failed;
    }
    info!(enqueued = %enqueued, failed = %failed, "replay_drained");

    if let Some(minutes) = args.advance_minutes {
        clock.advance(chrono::Duration::minutes(minutes));
        let sweeper = ExpirySweeper::new(
            correlator.clone(),
            config.sweep_interval(),
            config.sweep_batch_limit(),
        );
        let expired = sweeper.sweep_once().await;
        info!(minutes = %minutes, expired = %expired, "replay_sweep_done");
    }

    // Let the hub fan out whatever is still in the hand-off channel
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = shutdown_tx.send(true);
    let _ = hub_handle.await;

    println!("# live notifications");
    while let Some(payload) = subscription.try_recv() {
        println!("{payload}");
    }

    let mut events =
        store.gate_events_created_since(started_at - chrono::Duration::days(1)).await?;
    events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.event_id.cmp(&b.event_id)));
    println!("# gate events ({})", events.len());
    for event in &events {
        if args.json {
            println!("{}", serde_json::to_string(event)?);
        } else {
            println!(
                "{:<24} {:<6} {:<22} {:<10} {}",
                event.event_id,
                event.direction.as_str(),
                event.status.as_str(),
                event.detected_plate.as_deref().unwrap_or("-"),
                event.notes
            );
        }
    }

    let sessions = memory.sessions();
    println!("# sessions ({})", sessions.len());
    for session in &sessions {
        println!("{}", serde_json::to_string(session)?);
    }

    let summary = metrics.report();
    if failed > 0 {
        warn!(failed = %failed, decode_errors = %summary.decode_errors, "replay_messages_left_on_queue");
    }
    println!(
        "# processed={} failed={} created={} sessions={} expired={}",
        summary.messages_processed,
        failed,
        summary.gate_events_created,
        summary.sessions_created,
        summary.gate_events_expired
    );
    Ok(())
}
