//! Directory/Auth service client
//!
//! HTTP+JSON over reqwest. Every call carries the bearer token; a 401/403
//! comes back as `DirectoryError::Unauthenticated` and is never retried.

use crate::domain::account::{LoginRequest, LoginResponse, SignupRequest, VehicleRegistration};
use crate::domain::types::{SensorId, SensorReading, TrackedEntity};
use crate::error::DirectoryError;
use async_trait::async_trait;
use reqwest::{Response, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, info};

/// Directory operations the engine depends on
#[async_trait]
pub trait Directory: Send + Sync {
    /// Vehicles owned by the caller
    async fn list_vehicles(&self) -> Result<Vec<TrackedEntity>, DirectoryError>;

    /// Latest reading for a sensor; `None` when the sensor never reported
    async fn latest_reading(
        &self,
        sensor_id: &SensorId,
    ) -> Result<Option<SensorReading>, DirectoryError>;

    async fn register_vehicle(
        &self,
        registration: &VehicleRegistration,
    ) -> Result<(), DirectoryError>;
}

pub struct DirectoryClient {
    base_url: Url,
    token: Option<String>,
    timeout: Duration,
    http: reqwest::Client,
}

impl DirectoryClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, DirectoryError> {
        // Connection pooling across the whole session
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| DirectoryError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(DirectoryError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self { base_url, token, timeout, http })
    }

    /// Append percent-encoded path segments to the base URL
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn map_transport(&self, e: reqwest::Error) -> DirectoryError {
        if e.is_timeout() {
            DirectoryError::Timeout(self.timeout.as_millis() as u64)
        } else if e.is_decode() {
            DirectoryError::Decode(e.to_string())
        } else {
            DirectoryError::Transport(e)
        }
    }

    /// `POST /auth/login`, returns the opaque bearer token
    pub async fn login(&self, email: &str, password: &str) -> Result<String, DirectoryError> {
        let body = LoginRequest { email: email.to_string(), password: password.to_string() };
        let response = self
            .http
            .post(self.url(&["auth", "login"]))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        let response = check_status(response, "/auth/login").await?;
        let login: LoginResponse = response.json().await.map_err(|e| self.map_transport(e))?;
        info!(email = %email, "directory_login_ok");
        Ok(login.token)
    }

    /// `POST /auth/register`
    pub async fn signup(&self, request: &SignupRequest) -> Result<(), DirectoryError> {
        let response = self
            .http
            .post(self.url(&["auth", "register"]))
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        check_status(response, "/auth/register").await?;
        info!(email = %request.email, "directory_signup_ok");
        Ok(())
    }
}

#[async_trait]
impl Directory for DirectoryClient {
    async fn list_vehicles(&self) -> Result<Vec<TrackedEntity>, DirectoryError> {
        let response = self
            .authorized(self.http.get(self.url(&["vehicles", "my"])))
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        let response = check_status(response, "/vehicles/my").await?;
        let vehicles: Vec<TrackedEntity> =
            response.json().await.map_err(|e| self.map_transport(e))?;
        debug!(count = vehicles.len(), "directory_vehicles_listed");
        Ok(vehicles)
    }

    async fn latest_reading(
        &self,
        sensor_id: &SensorId,
    ) -> Result<Option<SensorReading>, DirectoryError> {
        let url = self.url(&["sensor", "latest", sensor_id.as_str()]);
        let path = url.path().to_string();
        let response = self
            .authorized(self.http.get(url))
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, &path).await?;
        // Some deployments answer 200 with a null body for silent sensors
        let reading: Option<SensorReading> =
            response.json().await.map_err(|e| self.map_transport(e))?;
        Ok(reading)
    }

    async fn register_vehicle(
        &self,
        registration: &VehicleRegistration,
    ) -> Result<(), DirectoryError> {
        let response = self
            .authorized(self.http.post(self.url(&["vehicles", "register"])))
            .json(registration)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        check_status(response, "/vehicles/register").await?;
        info!(
            vehicle_number = %registration.vehicle_number,
            sensor_id = %registration.sensor_id,
            geofence_points = registration.geofence.len(),
            "directory_vehicle_registered"
        );
        Ok(())
    }
}

async fn check_status(response: Response, path: &str) -> Result<Response, DirectoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(DirectoryError::Unauthenticated);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(DirectoryError::NotFound(path.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(DirectoryError::Http { status: status.as_u16(), detail: error_detail(&body) })
}

/// Pull `detail` out of a JSON error body, else the raw text
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").map(|d| d.as_str().map(str::to_string).unwrap_or_else(|| d.to_string())))
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_detail() {
        assert_eq!(error_detail(r#"{"detail": "Sensor already registered"}"#), "Sensor already registered");
        assert_eq!(error_detail(r#"{"detail": ["bad field"]}"#), r#"["bad field"]"#);
        assert_eq!(error_detail("  Internal Server Error \n"), "Internal Server Error");
    }

    #[test]
    fn test_client_url_join() {
        let client =
            DirectoryClient::new("http://localhost:8000/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(client.url(&["vehicles", "my"]).as_str(), "http://localhost:8000/vehicles/my");

        let client =
            DirectoryClient::new("https://fleet.example.com/api/", None, Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            client.url(&["auth", "login"]).as_str(),
            "https://fleet.example.com/api/auth/login"
        );
    }

    #[test]
    fn test_sensor_id_is_one_path_segment() {
        let client =
            DirectoryClient::new("http://localhost:8000", None, Duration::from_secs(1)).unwrap();
        let url = client.url(&["sensor", "latest", "FS/01 A"]);
        assert_eq!(url.as_str(), "http://localhost:8000/sensor/latest/FS%2F01%20A");
    }

    #[test]
    fn test_rejects_unusable_base_url() {
        assert!(matches!(
            DirectoryClient::new("not a url", None, Duration::from_secs(1)),
            Err(DirectoryError::InvalidUrl(_))
        ));
        assert!(matches!(
            DirectoryClient::new("mailto:ops@example.com", None, Duration::from_secs(1)),
            Err(DirectoryError::InvalidUrl(_))
        ));
    }
}
