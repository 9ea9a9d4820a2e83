//! Fleet monitor - headless live telemetry for fuel-sensor equipped vehicles
//!
//! Follows one vehicle (or every vehicle, in broadcast mode) by combining
//! pushed alerts with on-demand snapshot fetches, and logs the resulting
//! dashboard view. Also carries the account and vehicle management commands
//! of the directory service.
//!
//! Module structure:
//! - `domain/` - Core types (readings, alerts, geofence, account payloads)
//! - `io/` - External interfaces (directory HTTP, alert websocket, Prometheus)
//! - `services/` - Aggregation core, fetch worker, registration
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fleet_telemetry::domain::account::{SignupRequest, VehicleForm};
use fleet_telemetry::domain::geofence::{GeofenceCapture, RawPolygon};
use fleet_telemetry::domain::types::SensorId;
use fleet_telemetry::infra::{Config, Metrics};
use fleet_telemetry::io::{Directory, DirectoryClient};
use fleet_telemetry::services::{DashboardView, MonitorSession, VehicleRegistrar};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Fleet monitor - live fuel, alert and position telemetry
#[derive(Parser, Debug)]
#[command(name = "fleet-monitor", version, about)]
struct Args {
    /// Path to TOML configuration file [default: $CONFIG_FILE, then config/dev.toml]
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Bearer token from `login`
    #[arg(long, env = "FLEET_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Follow a sensor (or all sensors) and log the live view
    Monitor {
        /// Sensor to focus; omit for broadcast mode
        #[arg(long, env = "FLEET_SENSOR")]
        sensor: Option<String>,
    },
    /// Exchange credentials for a bearer token
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "FLEET_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create a company account
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long, env = "FLEET_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        company_name: String,
        #[arg(long)]
        contact_number: String,
        #[arg(long)]
        location: String,
    },
    /// List the vehicles owned by the caller
    Vehicles,
    /// Register a vehicle with a geofence polygon
    Register {
        #[arg(long)]
        vehicle_number: String,
        #[arg(long)]
        sensor_id: String,
        #[arg(long)]
        fuel_tank_capacity: String,
        #[arg(long)]
        assigned_driver: String,
        /// GeoJSON polygon or `{lat, lng}` rings as drawn
        #[arg(long)]
        geofence: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), git = env!("GIT_HASH"), "fleet-monitor starting");

    let sensor = match args.command {
        Some(Cmd::Monitor { ref sensor }) => sensor.clone(),
        _ => None,
    };
    let config = Config::load(args.config.as_deref()).with_overrides(args.token.clone(), sensor);

    info!(
        config_file = %config.config_file(),
        directory_url = %config.directory_url(),
        stream_url = %config.stream_url(),
        reconnect = %config.stream_reconnect(),
        target_sensor = ?config.target_sensor(),
        authenticated = %config.token().is_some(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let directory = DirectoryClient::new(
        config.directory_url(),
        config.token().map(str::to_string),
        Duration::from_millis(config.directory_timeout_ms()),
    )
    .context("Failed to build directory client")?;

    match args.command.unwrap_or(Cmd::Monitor { sensor: None }) {
        Cmd::Monitor { .. } => run_monitor(config, Arc::new(directory)).await,
        Cmd::Login { email, password } => {
            let token = directory.login(&email, &password).await.context("Login failed")?;
            println!("{}", token);
            Ok(())
        }
        Cmd::Signup { email, password, company_name, contact_number, location } => {
            let request = SignupRequest { email, password, company_name, contact_number, location };
            request.validate()?;
            directory.signup(&request).await.context("Signup failed")?;
            println!("Account created for {}", request.email);
            Ok(())
        }
        Cmd::Vehicles => {
            let vehicles = directory.list_vehicles().await.context("Failed to list vehicles")?;
            for v in &vehicles {
                let capacity =
                    v.fuel_tank_capacity.map(|c| format!("{:.0} L", c)).unwrap_or_else(|| "-".into());
                println!(
                    "{:<14} {:<20} {:<12} {}",
                    v.vehicle_number, v.assigned_driver, v.sensor_id, capacity
                );
            }
            info!(count = vehicles.len(), "vehicles_listed");
            Ok(())
        }
        Cmd::Register { vehicle_number, sensor_id, fuel_tank_capacity, assigned_driver, geofence } => {
            let raw = std::fs::read_to_string(&geofence)
                .with_context(|| format!("Failed to read geofence {}", geofence.display()))?;
            let raw = RawPolygon::from_json(&raw)
                .with_context(|| format!("Failed to parse geofence {}", geofence.display()))?;

            let mut capture = GeofenceCapture::new();
            capture.begin_draw();
            capture.on_draw_complete(&raw);

            let form = VehicleForm { vehicle_number, sensor_id, fuel_tank_capacity, assigned_driver };
            let registrar = VehicleRegistrar::new(Arc::new(directory));
            match registrar.submit(&form, &capture).await {
                Ok(registration) => {
                    println!("Registered {}", registration.vehicle_number);
                    Ok(())
                }
                Err(e) if e.is_user_facing() => bail!("{}", e),
                Err(e) => Err(e).context("Registration failed"),
            }
        }
    }
}

async fn run_monitor(config: Config, directory: Arc<dyn Directory>) -> anyhow::Result<()> {
    if config.token().is_none() {
        warn!("no_token: directory calls will be rejected, run `login` first");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = fleet_telemetry::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Periodic metrics summary
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    let session = MonitorSession::start(&config, directory, metrics)?;
    let mut view_rx = session.subscribe();
    session.focus(config.target_sensor().map(SensorId::from)).await;

    let mut last = ViewDigest::default();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown_signal_received");
                break;
            }
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view_rx.borrow_and_update().clone();
                last = log_view_change(&last, &view);
            }
        }
    }

    let _ = shutdown_tx.send(true);
    session.shutdown().await;
    info!("fleet-monitor shutdown complete");
    Ok(())
}

/// What the headless monitor compares to decide whether to log
#[derive(Default, PartialEq)]
struct ViewDigest {
    phase: &'static str,
    vehicle: Option<String>,
    reading_at: Option<String>,
    feed_len: usize,
    stream: String,
}

fn log_view_change(last: &ViewDigest, view: &DashboardView) -> ViewDigest {
    let digest = ViewDigest {
        phase: view.phase.as_str(),
        vehicle: view.entity.as_ref().map(|e| e.vehicle_number.clone()),
        reading_at: view.current.as_ref().map(|r| r.timestamp.to_rfc3339()),
        feed_len: view.feed.len(),
        stream: format!("{:?}", view.stream),
    };
    if digest == *last {
        return digest;
    }

    if digest.feed_len > last.feed_len {
        if let Some(alert) = view.feed.first() {
            info!(
                sensor_id = %alert.sensor_id,
                alert = %alert.category,
                category = alert.classify().as_str(),
                timestamp = %alert.timestamp,
                "alert"
            );
        }
    }

    info!(
        phase = digest.phase,
        target = ?view.target.as_ref().map(|s| s.as_str()),
        vehicle = ?digest.vehicle,
        driver = ?view.entity.as_ref().map(|e| e.assigned_driver.as_str()),
        fuel_level = ?view.current.as_ref().map(|r| r.fuel_level),
        tilt = ?view.current.as_ref().map(|r| r.tilt_detected),
        valve_open = ?view.current.as_ref().map(|r| r.valve_open),
        lat = view.center.lat,
        lng = view.center.lng,
        history_len = view.history.len(),
        feed_len = digest.feed_len,
        stream = %digest.stream,
        "view_updated"
    );
    digest
}
