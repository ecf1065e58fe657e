//! Prometheus metrics HTTP endpoint
//!
//! Exposes service metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn write_counter(output: &mut String, name: &str, help: &str, site: &str, val: u64) {
    write_metric(output, name, help, MetricType::Counter, site, val);
}

/// Write a gauge metric with f64 value
fn write_gauge_f64(output: &mut String, name: &str, help: &str, site: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val:.6}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_queue_metrics(&mut output, site_id, &summary);
    write_latency_metrics(&mut output, site_id, &summary);
    write_reconcile_metrics(&mut output, site_id, &summary);
    write_gate_event_metrics(&mut output, site_id, &summary);
    write_live_metrics(&mut output, site_id, &summary);

    output
}

fn write_queue_metrics(output: &mut String, site: &str, s: &MetricsSummary) {
    write_counter(output, "parkgate_messages_received_total", "Queue messages received", site, s.messages_received);
    write_counter(output, "parkgate_messages_processed_total", "Queue messages handled without error", site, s.messages_processed);
    write_counter(output, "parkgate_messages_failed_total", "Queue messages left for redelivery", site, s.messages_failed);
    write_counter(output, "parkgate_messages_deleted_total", "Queue messages acknowledged", site, s.messages_deleted);
    write_counter(output, "parkgate_receive_errors_total", "Failed queue receives", site, s.receive_errors);
    write_counter(output, "parkgate_decode_errors_total", "Malformed message bodies", site, s.decode_errors);
    write_counter(output, "parkgate_unknown_messages_total", "Messages with an unknown type", site, s.unknown_messages);
    write_gauge_f64(output, "parkgate_messages_per_sec", "Messages processed per second", site, s.messages_per_sec);
}

fn write_latency_metrics(output: &mut String, site: &str, s: &MetricsSummary) {
    write_histogram(
        output,
        "parkgate_message_latency_us",
        "Message processing latency in microseconds",
        site,
        &s.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        s.avg_latency_us,
    );
    write_metric(
        output,
        "parkgate_message_latency_p50_us",
        "50th percentile message latency",
        MetricType::Gauge,
        site,
        s.lat_p50_us,
    );
    write_metric(
        output,
        "parkgate_message_latency_p99_us",
        "99th percentile message latency",
        MetricType::Gauge,
        site,
        s.lat_p99_us,
    );
    write_metric(
        output,
        "parkgate_message_latency_max_us",
        "Maximum message latency",
        MetricType::Gauge,
        site,
        s.max_latency_us,
    );
}

fn write_reconcile_metrics(output: &mut String, site: &str, s: &MetricsSummary) {
    write_counter(output, "parkgate_updates_applied_total", "Status updates applied", site, s.updates_applied);
    write_counter(output, "parkgate_updates_skipped_total", "Stale status updates skipped", site, s.updates_skipped);
    write_counter(output, "parkgate_not_registered_total", "Updates for unregistered entities", site, s.not_registered);
}

fn write_gate_event_metrics(output: &mut String, site: &str, s: &MetricsSummary) {
    write_counter(output, "parkgate_gate_events_created_total", "Gate events created", site, s.gate_events_created);
    write_counter(output, "parkgate_gate_events_filtered_total", "Sensor events that opened no workflow", site, s.gate_events_filtered);
    write_counter(output, "parkgate_gate_events_duplicate_total", "Repeated gate event identifiers", site, s.gate_events_duplicate);
    write_counter(output, "parkgate_gate_events_expired_total", "Gate events timed out by the sweeper", site, s.gate_events_expired);
    write_counter(output, "parkgate_recognitions_total", "Recognition results recorded", site, s.recognitions);
    write_counter(output, "parkgate_sessions_created_total", "Sessions created from gate events", site, s.sessions_created);
    write_counter(output, "parkgate_session_failures_total", "Failed automatic check-ins", site, s.session_failures);
    write_counter(output, "parkgate_commands_published_total", "Barrier commands published", site, s.commands_published);
    write_counter(output, "parkgate_command_failures_total", "Barrier commands that failed to publish", site, s.command_failures);
}

fn write_live_metrics(output: &mut String, site: &str, s: &MetricsSummary) {
    write_counter(output, "parkgate_live_broadcasts_total", "Live notifications queued", site, s.live_broadcasts);
    write_counter(output, "parkgate_live_dropped_total", "Live notifications dropped at hand-off", site, s.live_dropped);
    write_counter(
        output,
        "parkgate_live_subscriber_dropped_total",
        "Live notifications missed by a full subscriber",
        site,
        s.live_subscriber_dropped,
    );
    write_metric(
        output,
        "parkgate_live_subscribers",
        "Connected live subscribers",
        MetricType::Gauge,
        site,
        s.live_subscribers,
    );
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();

        metrics.record_messages_received(2);
        metrics.record_message_processed(150);
        metrics.record_message_processed(250);
        metrics.record_gate_event_created();
        metrics.set_live_subscribers(3);

        let output = format_prometheus_metrics(&metrics, "central");

        assert!(output.contains("parkgate_messages_received_total{site=\"central\"} 2"));
        assert!(output.contains("parkgate_message_latency_us_bucket{site=\"central\""));
        assert!(output.contains("parkgate_message_latency_us_count{site=\"central\"} 2"));
        assert!(output.contains("parkgate_gate_events_created_total{site=\"central\"} 1"));
        assert!(output.contains("parkgate_live_subscribers{site=\"central\"} 3"));
        assert!(output.contains("# TYPE parkgate_live_subscribers gauge"));
    }
}
