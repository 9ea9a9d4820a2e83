//! Vehicle registration with a drawn geofence

use crate::domain::account::{VehicleForm, VehicleRegistration};
use crate::domain::geofence::GeofenceCapture;
use crate::error::TelemetryError;
use crate::io::directory::Directory;
use std::sync::Arc;
use tracing::{info, warn};

pub struct VehicleRegistrar {
    directory: Arc<dyn Directory>,
}

impl VehicleRegistrar {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Submit the form together with the captured polygon
    ///
    /// Nothing is sent unless the form and the polygon both validate.
    pub async fn submit(
        &self,
        form: &VehicleForm,
        capture: &GeofenceCapture,
    ) -> Result<VehicleRegistration, TelemetryError> {
        let polygon = capture.for_submission()?;
        let registration = VehicleRegistration::build(form, polygon)?;

        if let Err(e) = self.directory.register_vehicle(&registration).await {
            warn!(sensor_id = %registration.sensor_id, error = %e, "vehicle_registration_failed");
            return Err(e.into());
        }

        info!(
            vehicle_number = %registration.vehicle_number,
            geofence_points = registration.geofence.len(),
            "vehicle_registered"
        );
        Ok(registration)
    }
}
