//! Telemetry aggregation and focus state
//!
//! The Aggregator is the single owner of everything that depends on which
//! sensor is tracked:
//! - the focus phase (unfocused, focused without data, focused)
//! - the resolved vehicle and its current reading
//! - the fuel trend buffer
//! - the global alert log the feed is derived from
//!
//! Stream events, operator commands and fetch outcomes are serialized through
//! one loop. Fetches are handed to the fetch worker and never awaited here.

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::geofence::LatLng;
use crate::domain::types::{AlertEvent, HistoryPoint, SensorId, SensorReading, TrackedEntity};
use crate::infra::metrics::{Metrics, PHASE_FOCUSED, PHASE_FOCUSED_NO_DATA, PHASE_UNFOCUSED};
use crate::io::alert_stream::{StreamEvent, StreamStatus};
use crate::services::fetch_worker::{FetchOutcome, FetchSender};
use crate::services::history::HistoryBuffer;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Map center used until a reading with a position is known
pub const DEFAULT_CENTER: LatLng = LatLng { lat: 23.6913, lng: 85.2722 };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Broadcast mode: every alert is shown
    Unfocused,
    /// Tracking a sensor that has produced no reading yet
    FocusedNoData,
    Focused,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Unfocused => "unfocused",
            Phase::FocusedNoData => "focused_no_data",
            Phase::Focused => "focused",
        }
    }

    fn gauge(&self) -> u64 {
        match self {
            Phase::Unfocused => PHASE_UNFOCUSED,
            Phase::FocusedNoData => PHASE_FOCUSED_NO_DATA,
            Phase::Focused => PHASE_FOCUSED,
        }
    }
}

/// Operator gestures that re-enter the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Track a sensor, or `None` for broadcast mode
    Focus(Option<SensorId>),
    /// Re-resolve the requested sensor
    Refresh,
}

/// Anything the loop consumes
#[derive(Debug, Clone, PartialEq)]
pub enum EngineInput {
    Stream(StreamEvent),
    Command(Command),
    Fetch(FetchOutcome),
}

/// Consolidated view handed to renderers
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub phase: Phase,
    pub target: Option<SensorId>,
    pub entity: Option<TrackedEntity>,
    pub current: Option<SensorReading>,
    /// Most recent first
    pub feed: Vec<AlertEvent>,
    /// Oldest first
    pub history: Vec<HistoryPoint>,
    pub stream: StreamStatus,
    pub center: LatLng,
}

impl Default for DashboardView {
    fn default() -> Self {
        Self {
            phase: Phase::Unfocused,
            target: None,
            entity: None,
            current: None,
            feed: Vec::new(),
            history: Vec::new(),
            stream: StreamStatus::Connecting,
            center: DEFAULT_CENTER,
        }
    }
}

/// The one owned aggregate of per-session state
#[derive(Debug)]
pub(crate) struct SessionState {
    /// Sensor the operator asked for; survives a failed resolution
    pub(crate) requested: Option<SensorId>,
    /// Sensor currently tracked; `None` is broadcast mode
    pub(crate) target: Option<SensorId>,
    pub(crate) entity: Option<TrackedEntity>,
    pub(crate) current: Option<SensorReading>,
    pub(crate) history: HistoryBuffer,
    pub(crate) alert_log: Vec<AlertEvent>,
    pub(crate) stream: StreamStatus,
    pub(crate) phase: Phase,
}

impl SessionState {
    fn new() -> Self {
        Self {
            requested: None,
            target: None,
            entity: None,
            current: None,
            history: HistoryBuffer::new(),
            alert_log: Vec::new(),
            stream: StreamStatus::Connecting,
            phase: Phase::Unfocused,
        }
    }

    /// Feed visibility and buffer eligibility share this predicate
    pub(crate) fn accepts(&self, sensor_id: &SensorId) -> bool {
        match self.target {
            Some(ref target) => target == sensor_id,
            None => true,
        }
    }

    fn feed(&self) -> Vec<AlertEvent> {
        self.alert_log.iter().rev().filter(|a| self.accepts(&a.sensor_id)).cloned().collect()
    }

    fn view(&self) -> DashboardView {
        let center = self
            .current
            .as_ref()
            .map(|r| LatLng::new(r.latitude, r.longitude))
            .unwrap_or(DEFAULT_CENTER);
        DashboardView {
            phase: self.phase,
            target: self.target.clone(),
            entity: self.entity.clone(),
            current: self.current.clone(),
            feed: self.feed(),
            history: self.history.points(),
            stream: self.stream.clone(),
            center,
        }
    }
}

pub struct Aggregator {
    pub(crate) state: SessionState,
    pub(crate) fetch: FetchSender,
    pub(crate) view_tx: watch::Sender<DashboardView>,
    pub(crate) metrics: Arc<Metrics>,
}

impl Aggregator {
    /// Create the core and the view receiver renderers subscribe to
    pub fn new(fetch: FetchSender, metrics: Arc<Metrics>) -> (Self, watch::Receiver<DashboardView>) {
        let (view_tx, view_rx) = watch::channel(DashboardView::default());
        (Self { state: SessionState::new(), fetch, view_tx, metrics }, view_rx)
    }

    /// Run until the command channel closes
    pub async fn run(
        &mut self,
        mut stream_rx: mpsc::Receiver<StreamEvent>,
        mut command_rx: mpsc::Receiver<Command>,
        mut outcome_rx: mpsc::Receiver<FetchOutcome>,
    ) {
        let mut stream_open = true;

        loop {
            tokio::select! {
                event = stream_rx.recv(), if stream_open => {
                    match event {
                        Some(e) => self.process(EngineInput::Stream(e)),
                        None => {
                            stream_open = false;
                            self.process(EngineInput::Stream(StreamEvent::Status(StreamStatus::Closed)));
                        }
                    }
                }
                command = command_rx.recv() => {
                    match command {
                        Some(c) => self.process(EngineInput::Command(c)),
                        None => break,
                    }
                }
                outcome = outcome_rx.recv() => {
                    match outcome {
                        Some(o) => self.process(EngineInput::Fetch(o)),
                        None => break,
                    }
                }
            }
        }

        info!(alerts_logged = self.state.alert_log.len(), "aggregator_stopped");
    }

    /// Apply one input and publish the resulting view
    pub fn process(&mut self, input: EngineInput) {
        let process_start = Instant::now();

        match input {
            EngineInput::Stream(StreamEvent::Alert(alert)) => self.handle_alert(alert),
            EngineInput::Stream(StreamEvent::Status(status)) => self.handle_stream_status(status),
            EngineInput::Command(Command::Focus(target)) => self.handle_focus(target),
            EngineInput::Command(Command::Refresh) => self.handle_refresh(),
            EngineInput::Fetch(FetchOutcome::Resolved { target, entity }) => {
                self.apply_resolved(target, entity)
            }
            EngineInput::Fetch(FetchOutcome::Snapshot { sensor_id, reading }) => {
                self.apply_snapshot(sensor_id, reading)
            }
        }

        self.publish();

        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_event_processed(latency_us);
    }

    fn publish(&self) {
        self.metrics.set_phase(self.state.phase.gauge());
        self.metrics.set_history_len(self.state.history.len());
        self.view_tx.send_replace(self.state.view());
    }

    pub fn view(&self) -> DashboardView {
        self.state.view()
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }
}
