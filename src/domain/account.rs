//! Account and vehicle registration payloads for the directory service

use crate::domain::geofence::{GeofencePolygon, LatLng};
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub company_name: String,
    pub contact_number: String,
    pub location: String,
}

impl SignupRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("email", &self.email)?;
        require("password", &self.password)?;
        require("company_name", &self.company_name)?;
        require("contact_number", &self.contact_number)?;
        require("location", &self.location)
    }
}

/// Vehicle form as entered by the operator
#[derive(Debug, Clone, Default)]
pub struct VehicleForm {
    pub vehicle_number: String,
    pub sensor_id: String,
    pub fuel_tank_capacity: String,
    pub assigned_driver: String,
}

impl VehicleForm {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("vehicle_number", &self.vehicle_number)?;
        require("sensor_id", &self.sensor_id)?;
        require("fuel_tank_capacity", &self.fuel_tank_capacity)?;
        require("assigned_driver", &self.assigned_driver)?;
        if self.fuel_tank_capacity.trim().parse::<f64>().is_err() {
            return Err(ValidationError::NotANumber {
                field: "fuel_tank_capacity",
                value: self.fuel_tank_capacity.clone(),
            });
        }
        Ok(())
    }
}

/// Body of `POST /vehicles/register`
#[derive(Debug, Clone, Serialize)]
pub struct VehicleRegistration {
    pub vehicle_number: String,
    pub sensor_id: String,
    pub fuel_tank_capacity: String,
    pub assigned_driver: String,
    pub geofence: Vec<LatLng>,
}

impl VehicleRegistration {
    /// Validates the form and polygon together; both must pass to submit
    pub fn build(form: &VehicleForm, geofence: &GeofencePolygon) -> Result<Self, ValidationError> {
        form.validate()?;
        geofence.validate()?;
        Ok(Self {
            vehicle_number: form.vehicle_number.trim().to_string(),
            sensor_id: form.sensor_id.trim().to_string(),
            fuel_tank_capacity: form.fuel_tank_capacity.trim().to_string(),
            assigned_driver: form.assigned_driver.trim().to_string(),
            geofence: geofence.points().to_vec(),
        })
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    Ok(())
}
