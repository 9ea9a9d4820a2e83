//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `directory` - HTTP client for the Directory/Auth service
//! - `alert_stream` - websocket client for pushed alerts
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod alert_stream;
pub mod directory;
pub mod prometheus;

// Re-export commonly used types
pub use alert_stream::{AlertStream, StreamEvent, StreamHandle, StreamOptions, StreamStatus};
pub use directory::{Directory, DirectoryClient};
