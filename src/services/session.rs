//! Monitoring session wiring
//!
//! Owns the alert stream, the fetch worker and the aggregation loop for the
//! lifetime of one monitoring session. Renderers subscribe to the view and
//! push commands; the stream is torn down once, on `shutdown`.

use crate::domain::types::SensorId;
use crate::error::TelemetryError;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::alert_stream::{AlertStream, StreamHandle, StreamOptions};
use crate::io::directory::Directory;
use crate::services::aggregator::{Aggregator, Command, DashboardView};
use crate::services::fetch_worker::create_fetch_worker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const FETCH_QUEUE: usize = 64;
const STREAM_QUEUE: usize = 1000;
const COMMAND_QUEUE: usize = 16;

pub struct MonitorSession {
    commands: mpsc::Sender<Command>,
    view_rx: watch::Receiver<DashboardView>,
    stream: StreamHandle,
    engine: JoinHandle<()>,
}

impl MonitorSession {
    pub fn start(
        config: &Config,
        directory: Arc<dyn Directory>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, TelemetryError> {
        let timeout = Duration::from_millis(config.directory_timeout_ms());
        let (fetch, outcomes, worker) =
            create_fetch_worker(directory, timeout, metrics.clone(), FETCH_QUEUE);

        let (stream_tx, stream_rx) = mpsc::channel(STREAM_QUEUE);
        let options = StreamOptions {
            reconnect: config.stream_reconnect(),
            initial_backoff: Duration::from_millis(config.stream_initial_backoff_ms()),
            max_backoff: Duration::from_millis(config.stream_max_backoff_ms()),
        };
        let stream =
            AlertStream::open(config.stream_url(), config.token(), stream_tx, options, metrics.clone())?;

        tokio::spawn(worker.run());

        let (mut aggregator, view_rx) = Aggregator::new(fetch, metrics);
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let engine = tokio::spawn(async move {
            aggregator.run(stream_rx, command_rx, outcomes).await;
        });

        info!(stream_url = %config.stream_url(), "monitor_session_started");
        Ok(Self { commands, view_rx, stream, engine })
    }

    pub async fn focus(&self, target: Option<SensorId>) {
        self.send(Command::Focus(target)).await;
    }

    pub async fn refresh(&self) {
        self.send(Command::Refresh).await;
    }

    async fn send(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            debug!("command_discarded: engine stopped");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardView> {
        self.view_rx.clone()
    }

    /// Close the stream, then let the engine drain and stop
    pub async fn shutdown(self) {
        let Self { commands, view_rx: _, stream, engine } = self;
        stream.close().await;
        drop(commands);
        let _ = engine.await;
        info!("monitor_session_stopped");
    }
}
