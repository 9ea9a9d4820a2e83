//! Alert stream connection over a websocket
//!
//! One connection per session. Every text frame is expected to carry a
//! single JSON alert; anything else is logged, counted and dropped without
//! tearing the connection down. The stream is not tied to focus, so a focus
//! change never reopens it.

use crate::domain::types::AlertEvent;
use crate::error::StreamError;
use crate::infra::metrics::Metrics;
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Connecting,
    Connected,
    /// Peer dropped the connection; a reconnect may follow
    Disconnected { reason: String },
    /// Waiting out the backoff before the next attempt
    Reconnecting { backoff_ms: u64 },
    /// No further alerts will arrive
    Closed,
}

/// What the stream hands to the engine
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Alert(AlertEvent),
    Status(StreamStatus),
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub reconnect: bool,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            reconnect: true,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Decode one stream payload into an alert
pub fn decode_alert(payload: &str) -> Result<AlertEvent, StreamError> {
    serde_json::from_str(payload).map_err(|e| StreamError::Delivery(e.to_string()))
}

/// Append the session token as the `token` query parameter
pub fn build_stream_url(url: &str, token: Option<&str>) -> Result<String, StreamError> {
    let invalid = |reason: String| StreamError::InvalidUrl { url: url.to_string(), reason };
    let mut parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(invalid("scheme must be ws or wss".to_string()));
    }
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        parsed.query_pairs_mut().append_pair("token", token);
    }
    Ok(parsed.into())
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// Owner of the running stream task
///
/// The connection is released exactly once: by `close`, or on drop.
pub struct StreamHandle {
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Close the connection and wait for the stream task to finish
    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
    }
}

pub struct AlertStream;

impl AlertStream {
    /// Spawn the stream task; alerts and status changes go to `sink`
    pub fn open(
        url: &str,
        token: Option<&str>,
        sink: mpsc::Sender<StreamEvent>,
        options: StreamOptions,
        metrics: Arc<Metrics>,
    ) -> Result<StreamHandle, StreamError> {
        let request_url = build_stream_url(url, token)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(url = %url, reconnect = options.reconnect, "alert_stream_opening");
        let task = tokio::spawn(run_stream(request_url, sink, options, metrics, shutdown_rx));

        Ok(StreamHandle { shutdown: Some(shutdown_tx), task: Some(task) })
    }
}

enum PumpExit {
    Shutdown,
    SinkClosed,
    Dropped(String),
}

async fn run_stream(
    request_url: String,
    sink: mpsc::Sender<StreamEvent>,
    options: StreamOptions,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = options.initial_backoff;

    loop {
        if sink.send(StreamEvent::Status(StreamStatus::Connecting)).await.is_err() {
            return;
        }

        let connected = tokio::select! {
            _ = shutdown.changed() => {
                info!("alert_stream_shutdown");
                return;
            }
            result = tokio_tungstenite::connect_async(request_url.as_str()) => result,
        };

        let reason = match connected {
            Ok((socket, _)) => {
                backoff = options.initial_backoff;
                metrics.record_stream_connected();
                info!("alert_stream_connected");
                if sink.send(StreamEvent::Status(StreamStatus::Connected)).await.is_err() {
                    return;
                }

                match pump(socket, &sink, &metrics, &mut shutdown).await {
                    PumpExit::Shutdown => {
                        info!("alert_stream_closed");
                        return;
                    }
                    PumpExit::SinkClosed => {
                        debug!("alert_stream_sink_closed");
                        return;
                    }
                    PumpExit::Dropped(reason) => {
                        metrics.record_stream_terminated();
                        reason
                    }
                }
            }
            Err(e) => StreamError::Connect(e.to_string()).to_string(),
        };

        warn!(reason = %reason, reconnect = options.reconnect, "alert_stream_terminated");
        if sink
            .send(StreamEvent::Status(StreamStatus::Disconnected { reason }))
            .await
            .is_err()
        {
            return;
        }

        if !options.reconnect {
            let _ = sink.send(StreamEvent::Status(StreamStatus::Closed)).await;
            return;
        }

        let backoff_ms = backoff.as_millis() as u64;
        debug!(backoff_ms, "alert_stream_backoff");
        if sink.send(StreamEvent::Status(StreamStatus::Reconnecting { backoff_ms })).await.is_err() {
            return;
        }
        tokio::select! {
            _ = shutdown.changed() => {
                info!("alert_stream_shutdown");
                return;
            }
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = next_backoff(backoff, options.max_backoff);
    }
}

async fn pump(
    mut socket: Socket,
    sink: &mpsc::Sender<StreamEvent>,
    metrics: &Metrics,
    shutdown: &mut watch::Receiver<bool>,
) -> PumpExit {
    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => {
                let _ = socket.close(None).await;
                return PumpExit::Shutdown;
            }
            message = socket.next() => message,
        };

        let payload = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    metrics.record_alert_malformed();
                    warn!(len = bytes.len(), "alert_payload_not_utf8");
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| format!("closed by peer: {} {}", f.code, f.reason))
                    .unwrap_or_else(|| "closed by peer".to_string());
                return PumpExit::Dropped(reason);
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return PumpExit::Dropped(e.to_string()),
            None => return PumpExit::Dropped("connection ended".to_string()),
        };

        let alert = match decode_alert(&payload) {
            Ok(alert) => alert,
            Err(e) => {
                metrics.record_alert_malformed();
                warn!(error = %e, "alert_payload_dropped");
                continue;
            }
        };

        metrics.record_alert_received();
        debug!(sensor_id = %alert.sensor_id, alert = %alert.category, "alert_received");
        match sink.try_send(StreamEvent::Alert(alert)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics.record_alert_dropped();
                if last_drop_warn.elapsed() > Duration::from_secs(1) {
                    warn!("alert_dropped: engine queue full");
                    last_drop_warn = Instant::now();
                }
            }
            Err(TrySendError::Closed(_)) => {
                let _ = socket.close(None).await;
                return PumpExit::SinkClosed;
            }
        }
    }
}
