//! Fleet telemetry library
//!
//! Live fuel and alert monitoring for a fleet of sensor-equipped vehicles.
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod error;
pub mod infra;
pub mod io;
pub mod services;
