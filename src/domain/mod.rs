//! Domain models - core telemetry types
//!
//! This module contains the canonical data types used throughout the system:
//! - `TrackedEntity` - vehicle/sensor pairing resolved from the directory
//! - `SensorReading` - point-in-time fuel, tilt, valve and position sample
//! - `AlertEvent` - alert pushed by the stream
//! - `HistoryPoint` - trend chart sample
//! - `GeofencePolygon` - operator-drawn boundary
//! - account and vehicle registration payloads

pub mod account;
pub mod geofence;
pub mod types;

// Re-export commonly used types at module level
pub use geofence::{GeofenceCapture, GeofencePolygon, LatLng, RawPolygon};
pub use types::{AlertCategory, AlertEvent, HistoryPoint, SensorId, SensorReading, TrackedEntity};
