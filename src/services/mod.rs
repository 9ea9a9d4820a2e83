//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `aggregator` - Focus state machine and consolidated dashboard view
//! - `resolver` - Maps a sensor id to the vehicle carrying it
//! - `snapshot` - Latest reading fetch with timeout
//! - `history` - Bounded fuel trend buffer
//! - `fetch_worker` - Async directory fetch worker
//! - `registrar` - Vehicle registration with geofence
//! - `session` - Wiring of stream, worker and aggregator for one session

pub mod aggregator;
pub mod fetch_worker;
pub mod history;
pub mod registrar;
pub mod resolver;
pub mod session;
pub mod snapshot;
#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use aggregator::{Aggregator, Command, DashboardView, EngineInput, Phase};
pub use fetch_worker::{create_fetch_worker, FetchOutcome, FetchRequest, FetchSender, FetchWorker};
pub use history::{HistoryBuffer, HISTORY_CAPACITY};
pub use registrar::VehicleRegistrar;
pub use session::MonitorSession;
