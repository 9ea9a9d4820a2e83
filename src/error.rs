//! Error types
//!
//! Nothing in the telemetry engine is fatal to the process. Directory and
//! stream errors are absorbed into a steady state by the services that see
//! them; validation errors are surfaced to the operator and block a submission.

use thiserror::Error;

/// Failures talking to the Directory/Auth service
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// 401/403 from the directory; never retried
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("directory returned HTTP {status}: {detail}")]
    Http { status: u16, detail: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("invalid directory url {0}")]
    InvalidUrl(String),
}

/// Failures on the alert stream
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid stream url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("connect failed: {0}")]
    Connect(String),
    /// Payload could not be decoded into an alert; the stream stays open
    #[error("undecodable alert payload: {0}")]
    Delivery(String),
}

/// Operator-facing validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("draw a geofence polygon first")]
    MissingGeofence,
    #[error("geofence needs at least {min} points, got {got}")]
    TooFewPoints { min: usize, got: usize },
    #[error("{0} is required")]
    EmptyField(&'static str),
    #[error("{field} must be a number, got {value:?}")]
    NotANumber { field: &'static str, value: String },
}

/// Error taxonomy of the aggregation engine
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("entity resolution failed for {sensor_id}: {reason}")]
    ResolutionFailure { sensor_id: String, reason: String },
    #[error("no reading available for {sensor_id}")]
    SnapshotUnavailable { sensor_id: String },
    #[error(transparent)]
    StreamDelivery(#[from] StreamError),
    #[error("alert stream terminated: {0}")]
    StreamTerminated(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl TelemetryError {
    /// Whether the error must be shown to the operator rather than absorbed
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            TelemetryError::Validation(_) | TelemetryError::Directory(DirectoryError::Unauthenticated)
        )
    }
}
