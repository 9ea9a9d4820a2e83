//! Entity resolution: which vehicle carries the target sensor

use crate::domain::types::{SensorId, TrackedEntity};
use crate::error::TelemetryError;
use crate::infra::metrics::Metrics;
use crate::io::directory::Directory;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[cold]
fn log_resolution_failed(e: &TelemetryError) {
    warn!(error = %e, "entity_resolution_failed");
}

pub struct EntityResolver {
    directory: Arc<dyn Directory>,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl EntityResolver {
    pub fn new(directory: Arc<dyn Directory>, timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self { directory, timeout, metrics }
    }

    /// Exact match of `target` against the caller's vehicles
    pub async fn try_resolve(&self, target: &SensorId) -> Result<TrackedEntity, TelemetryError> {
        let failure = |reason: String| TelemetryError::ResolutionFailure {
            sensor_id: target.to_string(),
            reason,
        };

        let start = Instant::now();
        let listed = tokio::time::timeout(self.timeout, self.directory.list_vehicles()).await;
        self.metrics.record_fetch_latency(start.elapsed().as_millis() as u64);

        let vehicles = match listed {
            Ok(Ok(vehicles)) => vehicles,
            Ok(Err(e)) => {
                self.metrics.record_fetch_error();
                return Err(TelemetryError::Directory(e));
            }
            Err(_) => {
                self.metrics.record_fetch_error();
                return Err(failure(format!("timed out after {} ms", self.timeout.as_millis())));
            }
        };

        vehicles
            .into_iter()
            .find(|v| &v.sensor_id == target)
            .ok_or_else(|| failure("no vehicle carries this sensor".to_string()))
    }

    /// `None` target, no match and fetch failure all resolve to `None`
    pub async fn resolve(&self, target: Option<&SensorId>) -> Option<TrackedEntity> {
        let target = target?;
        match self.try_resolve(target).await {
            Ok(entity) => {
                self.metrics.record_resolution(true);
                debug!(sensor_id = %target, vehicle = %entity.vehicle_number, "entity_resolved");
                Some(entity)
            }
            Err(e) => {
                self.metrics.record_resolution(false);
                log_resolution_failed(&e);
                None
            }
        }
    }
}
