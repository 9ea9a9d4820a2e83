//! Single-shot latest reading fetch

use crate::domain::types::{SensorId, SensorReading};
use crate::error::{DirectoryError, TelemetryError};
use crate::infra::metrics::Metrics;
use crate::io::directory::Directory;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct SnapshotFetcher {
    directory: Arc<dyn Directory>,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl SnapshotFetcher {
    pub fn new(directory: Arc<dyn Directory>, timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self { directory, timeout, metrics }
    }

    pub async fn try_fetch_latest(
        &self,
        sensor_id: &SensorId,
    ) -> Result<SensorReading, TelemetryError> {
        let start = Instant::now();
        let fetched =
            tokio::time::timeout(self.timeout, self.directory.latest_reading(sensor_id)).await;
        self.metrics.record_fetch_latency(start.elapsed().as_millis() as u64);

        match fetched {
            Ok(Ok(Some(reading))) => Ok(reading),
            Ok(Ok(None)) => Err(TelemetryError::SnapshotUnavailable { sensor_id: sensor_id.to_string() }),
            Ok(Err(e)) => {
                self.metrics.record_fetch_error();
                Err(TelemetryError::Directory(e))
            }
            Err(_) => {
                self.metrics.record_fetch_error();
                Err(TelemetryError::Directory(DirectoryError::Timeout(self.timeout.as_millis() as u64)))
            }
        }
    }

    /// Absent data, failures and timeouts all come back as `None`
    pub async fn fetch_latest(&self, sensor_id: &SensorId) -> Option<SensorReading> {
        match self.try_fetch_latest(sensor_id).await {
            Ok(reading) => Some(reading),
            Err(TelemetryError::SnapshotUnavailable { .. }) => {
                debug!(sensor_id = %sensor_id, "snapshot_empty");
                None
            }
            Err(e) => {
                warn!(sensor_id = %sensor_id, error = %e, "snapshot_fetch_failed");
                None
            }
        }
    }
}
