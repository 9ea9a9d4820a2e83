//! In-memory directory and fixtures shared by service tests

use crate::domain::account::VehicleRegistration;
use crate::domain::types::{AlertEvent, SensorId, SensorReading, TrackedEntity};
use crate::error::DirectoryError;
use crate::io::directory::Directory;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

pub(crate) fn reading(sensor: &str, fuel_level: f64, ts_ms: i64) -> SensorReading {
    SensorReading {
        sensor_id: SensorId::from(sensor),
        latitude: 23.6913,
        longitude: 85.2722,
        fuel_level,
        tilt_detected: false,
        valve_open: false,
        timestamp: Utc.timestamp_millis_opt(ts_ms).unwrap(),
    }
}

pub(crate) fn alert(sensor: &str, label: &str, ts_ms: i64) -> AlertEvent {
    AlertEvent {
        sensor_id: SensorId::from(sensor),
        category: label.to_string(),
        timestamp: Utc.timestamp_millis_opt(ts_ms).unwrap(),
    }
}

pub(crate) fn vehicle(number: &str, sensor: &str) -> TrackedEntity {
    TrackedEntity {
        id: None,
        vehicle_number: number.to_string(),
        assigned_driver: "Ravi".to_string(),
        sensor_id: SensorId::from(sensor),
        fuel_tank_capacity: Some(120.0),
    }
}

#[derive(Default)]
pub(crate) struct FakeDirectory {
    vehicles: Vec<TrackedEntity>,
    readings: Mutex<HashMap<SensorId, SensorReading>>,
    registered: Mutex<Vec<VehicleRegistration>>,
    unauthenticated: bool,
    delay: Option<Duration>,
}

impl FakeDirectory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_vehicle(mut self, number: &str, sensor: &str) -> Self {
        self.vehicles.push(vehicle(number, sensor));
        self
    }

    pub(crate) fn with_reading(self, reading: SensorReading) -> Self {
        self.set_reading(reading);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn unauthenticated(mut self) -> Self {
        self.unauthenticated = true;
        self
    }

    pub(crate) fn set_reading(&self, reading: SensorReading) {
        self.readings.lock().insert(reading.sensor_id.clone(), reading);
    }

    pub(crate) fn registered(&self) -> Vec<VehicleRegistration> {
        self.registered.lock().clone()
    }

    async fn gate(&self) -> Result<(), DirectoryError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unauthenticated {
            return Err(DirectoryError::Unauthenticated);
        }
        Ok(())
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn list_vehicles(&self) -> Result<Vec<TrackedEntity>, DirectoryError> {
        self.gate().await?;
        Ok(self.vehicles.clone())
    }

    async fn latest_reading(
        &self,
        sensor_id: &SensorId,
    ) -> Result<Option<SensorReading>, DirectoryError> {
        self.gate().await?;
        Ok(self.readings.lock().get(sensor_id).cloned())
    }

    async fn register_vehicle(
        &self,
        registration: &VehicleRegistration,
    ) -> Result<(), DirectoryError> {
        self.gate().await?;
        self.registered.lock().push(registration.clone());
        Ok(())
    }
}
