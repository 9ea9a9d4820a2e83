//! Prometheus metrics HTTP endpoint
//!
//! Exposes engine metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{
    Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_FETCH_BUCKET_BOUNDS,
    METRICS_NUM_BUCKETS,
};
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

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum {}", avg * count);
    let _ = writeln!(output, "{name}_count {count}");
}

fn format_prometheus_metrics(metrics: &Metrics) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_engine_metrics(&mut output, &summary);
    write_alert_metrics(&mut output, &summary);
    write_fetch_metrics(&mut output, &summary);
    write_stream_metrics(&mut output, &summary);

    output
}

fn write_engine_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "fleet_events_total",
        "Engine events processed",
        MetricType::Counter,
        summary.events_total,
    );
    let _ = writeln!(output, "# HELP fleet_events_per_sec Engine events processed per second");
    let _ = writeln!(output, "# TYPE fleet_events_per_sec gauge");
    let _ = writeln!(output, "fleet_events_per_sec {:.2}", summary.events_per_sec);

    write_histogram(
        output,
        "fleet_event_latency_us",
        "Engine event processing latency in microseconds",
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_process_latency_us,
    );
    write_metric(
        output,
        "fleet_event_latency_p99_us",
        "99th percentile engine event latency",
        MetricType::Gauge,
        summary.lat_p99_us,
    );
    write_metric(
        output,
        "fleet_phase",
        "Engine phase (0=unfocused, 1=focused_no_data, 2=focused)",
        MetricType::Gauge,
        summary.phase,
    );
    write_metric(
        output,
        "fleet_history_points",
        "Points in the fuel trend buffer",
        MetricType::Gauge,
        summary.history_len,
    );
}

fn write_alert_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "fleet_alerts_received_total",
        "Alerts decoded from the stream",
        MetricType::Counter,
        summary.alerts_received,
    );
    write_metric(
        output,
        "fleet_alerts_accepted_total",
        "Alerts that passed the focus filter",
        MetricType::Counter,
        summary.alerts_accepted,
    );
    write_metric(
        output,
        "fleet_alerts_malformed_total",
        "Stream payloads that could not be decoded",
        MetricType::Counter,
        summary.alerts_malformed,
    );
    write_metric(
        output,
        "fleet_alerts_dropped_total",
        "Alerts dropped due to engine queue full",
        MetricType::Counter,
        summary.alerts_dropped,
    );
}

fn write_fetch_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "fleet_resolutions_total",
        "Entity resolutions issued",
        MetricType::Counter,
        summary.resolutions_total,
    );
    write_metric(
        output,
        "fleet_resolutions_failed_total",
        "Entity resolutions with no match",
        MetricType::Counter,
        summary.resolutions_failed,
    );
    write_metric(
        output,
        "fleet_snapshots_applied_total",
        "Snapshots applied to the view",
        MetricType::Counter,
        summary.snapshots_applied,
    );
    write_metric(
        output,
        "fleet_snapshots_stale_total",
        "Snapshots discarded because focus moved on",
        MetricType::Counter,
        summary.snapshots_stale,
    );
    write_metric(
        output,
        "fleet_snapshots_empty_total",
        "Snapshot fetches with no reading",
        MetricType::Counter,
        summary.snapshots_empty,
    );
    write_metric(
        output,
        "fleet_fetch_errors_total",
        "Directory fetches that failed or timed out",
        MetricType::Counter,
        summary.fetch_errors,
    );
    write_histogram(
        output,
        "fleet_fetch_latency_ms",
        "Directory round trip in milliseconds",
        &summary.fetch_lat_buckets,
        &METRICS_FETCH_BUCKET_BOUNDS,
        summary.fetch_avg_ms,
    );
}

fn write_stream_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "fleet_stream_connects_total",
        "Alert stream connections established",
        MetricType::Counter,
        summary.stream_connects,
    );
    write_metric(
        output,
        "fleet_stream_terminations_total",
        "Alert stream connections dropped by the peer",
        MetricType::Counter,
        summary.stream_terminations,
    );
    write_metric(
        output,
        "fleet_stream_up",
        "Alert stream state (0=down, 1=up)",
        MetricType::Gauge,
        summary.stream_state,
    );
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
            .body(Full::new(Bytes::from(format_prometheus_metrics(&metrics)))),
        (&Method::GET, "/health") => {
            Response::builder().status(StatusCode::OK).body(Full::new(Bytes::from("ok")))
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found"))),
    };
    // Builder only fails on invalid header values, none of which are dynamic here
    Ok(response.unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))))
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
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
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
