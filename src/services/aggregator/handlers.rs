//! Input handlers for the Aggregator
//!
//! Fetch outcomes are checked against the tracked sensor at the moment they
//! arrive, not when they were requested. A result for a sensor that is no
//! longer tracked is discarded; in broadcast mode any snapshot may update the
//! transient current reading but never the trend buffer. The trend buffer
//! takes readings in arrival order, while the current reading only moves
//! forward in time.

use super::{Aggregator, Phase};
use crate::domain::types::{AlertEvent, HistoryPoint, SensorId, SensorReading, TrackedEntity};
use crate::error::TelemetryError;
use crate::io::alert_stream::StreamStatus;
use crate::services::fetch_worker::FetchRequest;
use tracing::{debug, info, warn};

#[cold]
fn log_stream_terminated(e: &TelemetryError) {
    warn!(error = %e, "alert_stream_down");
}

#[cold]
fn log_fetch_request_dropped(request: &FetchRequest) {
    warn!(request = ?request, "fetch_request_dropped: queue full");
}

impl Aggregator {
    /// Switch the tracked sensor
    ///
    /// Everything tied to the previous sensor is cleared before any result
    /// for the new one can land.
    pub(crate) fn handle_focus(&mut self, target: Option<SensorId>) {
        self.state.requested = target.clone();
        match target {
            Some(sensor_id) => self.begin_tracking(sensor_id),
            None => {
                info!("focus_cleared");
                self.enter_broadcast();
                self.state.current = None;
            }
        }
    }

    pub(crate) fn handle_refresh(&mut self) {
        let Some(requested) = self.state.requested.clone() else {
            debug!("refresh_ignored: nothing requested");
            return;
        };
        if self.state.target.as_ref() == Some(&requested) {
            // Same sensor: re-resolve without dropping the trend
            info!(sensor_id = %requested, "focus_refresh");
            self.request(FetchRequest::Resolve { target: requested });
        } else {
            self.begin_tracking(requested);
        }
    }

    fn begin_tracking(&mut self, sensor_id: SensorId) {
        info!(sensor_id = %sensor_id, "focus_requested");
        self.state.history.reset();
        self.state.current = None;
        self.state.entity = None;
        self.state.target = Some(sensor_id.clone());
        self.state.phase = Phase::FocusedNoData;
        self.request(FetchRequest::Resolve { target: sensor_id });
    }

    fn enter_broadcast(&mut self) {
        self.state.target = None;
        self.state.entity = None;
        self.state.history.reset();
        self.state.phase = Phase::Unfocused;
    }

    pub(crate) fn apply_resolved(&mut self, target: SensorId, entity: Option<TrackedEntity>) {
        if self.state.target.as_ref() != Some(&target) {
            debug!(sensor_id = %target, "resolution_discarded: focus moved on");
            return;
        }

        match entity {
            Some(entity) => {
                info!(
                    sensor_id = %target,
                    vehicle_number = %entity.vehicle_number,
                    driver = %entity.assigned_driver,
                    "focus_resolved"
                );
                self.state.entity = Some(entity);
                self.request(FetchRequest::Snapshot { sensor_id: target });
            }
            None => {
                info!(sensor_id = %target, "focus_unresolved: broadcast mode");
                self.enter_broadcast();
                self.state.current = None;
            }
        }
    }

    pub(crate) fn apply_snapshot(&mut self, sensor_id: SensorId, reading: Option<SensorReading>) {
        if !self.state.accepts(&sensor_id) {
            self.metrics.record_snapshot_stale();
            debug!(sensor_id = %sensor_id, "snapshot_discarded: stale");
            return;
        }

        let Some(reading) = reading else {
            // Keep whatever was last known
            self.metrics.record_snapshot_empty();
            return;
        };

        // A reading must describe the sensor it was fetched for
        if reading.sensor_id != sensor_id {
            self.metrics.record_snapshot_stale();
            warn!(
                requested = %sensor_id,
                got = %reading.sensor_id,
                "snapshot_discarded: sensor mismatch"
            );
            return;
        }

        if self.state.target.is_some() && self.state.entity.is_none() {
            // Resolution issues its own snapshot once the vehicle is known
            self.metrics.record_snapshot_stale();
            debug!(sensor_id = %sensor_id, "snapshot_discarded: unresolved");
            return;
        }

        self.metrics.record_snapshot_applied();
        if self.state.target.is_some() {
            self.state.history.append(HistoryPoint::from_reading(&reading));
            self.state.phase = Phase::Focused;
            debug!(
                sensor_id = %sensor_id,
                fuel_level = reading.fuel_level,
                history_len = self.state.history.len(),
                "snapshot_applied"
            );
        } else {
            debug!(sensor_id = %sensor_id, fuel_level = reading.fuel_level, "broadcast_reading_updated");
        }

        // Fetches complete out of order; never step the current reading back
        let older = self.state.current.as_ref().is_some_and(|current| {
            current.sensor_id == reading.sensor_id && reading.timestamp < current.timestamp
        });
        if older {
            debug!(sensor_id = %sensor_id, timestamp = %reading.timestamp, "current_kept: newer reading shown");
        } else {
            self.state.current = Some(reading);
        }
    }

    pub(crate) fn handle_alert(&mut self, alert: AlertEvent) {
        let accepted = self.state.accepts(&alert.sensor_id);
        let sensor_id = alert.sensor_id.clone();
        self.state.alert_log.push(alert);

        if !accepted {
            debug!(sensor_id = %sensor_id, "alert_filtered");
            return;
        }

        self.metrics.record_alert_accepted();
        self.request(FetchRequest::Snapshot { sensor_id });
    }

    pub(crate) fn handle_stream_status(&mut self, status: StreamStatus) {
        match status {
            StreamStatus::Disconnected { ref reason } => {
                log_stream_terminated(&TelemetryError::StreamTerminated(reason.clone()));
            }
            StreamStatus::Closed => {
                log_stream_terminated(&TelemetryError::StreamTerminated("closed".to_string()));
            }
            StreamStatus::Connected => info!("alert_stream_live"),
            StreamStatus::Connecting | StreamStatus::Reconnecting { .. } => {}
        }
        self.state.stream = status;
    }

    fn request(&self, request: FetchRequest) {
        if !self.fetch.try_send(request.clone()) {
            self.metrics.record_fetch_error();
            log_fetch_request_dropped(&request);
        }
    }
}
