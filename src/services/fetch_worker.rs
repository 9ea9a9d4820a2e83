//! Fetch worker - runs directory fetches off the aggregation loop
//!
//! The aggregation core enqueues requests via an mpsc channel and never
//! awaits network I/O itself. Each request is spawned as its own task, so
//! results can come back out of order; every outcome carries the sensor id
//! or resolve target it was issued for and the core decides relevance on
//! arrival.

use crate::domain::types::{SensorId, SensorReading, TrackedEntity};
use crate::infra::metrics::Metrics;
use crate::io::directory::Directory;
use crate::services::resolver::EntityResolver;
use crate::services::snapshot::SnapshotFetcher;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRequest {
    Resolve { target: SensorId },
    Snapshot { sensor_id: SensorId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Resolved { target: SensorId, entity: Option<TrackedEntity> },
    Snapshot { sensor_id: SensorId, reading: Option<SensorReading> },
}

pub struct FetchWorker {
    resolver: Arc<EntityResolver>,
    fetcher: Arc<SnapshotFetcher>,
    request_rx: mpsc::Receiver<(FetchRequest, Instant)>,
    outcome_tx: mpsc::Sender<FetchOutcome>,
}

impl FetchWorker {
    /// Run the worker until the request channel closes
    pub async fn run(mut self) {
        info!("fetch_worker_started");

        while let Some((request, enqueued_at)) = self.request_rx.recv().await {
            let queue_delay_us = enqueued_at.elapsed().as_micros() as u64;
            if queue_delay_us > 10_000 {
                warn!(request = ?request, queue_delay_us = %queue_delay_us, "fetch_queue_delay_high");
            }

            let resolver = self.resolver.clone();
            let fetcher = self.fetcher.clone();
            let outcome_tx = self.outcome_tx.clone();
            tokio::spawn(async move {
                let outcome = match request {
                    FetchRequest::Resolve { target } => {
                        let entity = resolver.resolve(Some(&target)).await;
                        FetchOutcome::Resolved { target, entity }
                    }
                    FetchRequest::Snapshot { sensor_id } => {
                        let reading = fetcher.fetch_latest(&sensor_id).await;
                        FetchOutcome::Snapshot { sensor_id, reading }
                    }
                };
                if outcome_tx.send(outcome).await.is_err() {
                    debug!("fetch_outcome_discarded: engine gone");
                }
            });
        }

        info!("fetch_worker_stopped");
    }
}

/// Sending half used by the core; stamps each request with its enqueue time
#[derive(Clone)]
pub struct FetchSender {
    tx: mpsc::Sender<(FetchRequest, Instant)>,
}

impl FetchSender {
    /// Enqueue without blocking; false if the queue is full or closed
    pub fn try_send(&self, request: FetchRequest) -> bool {
        self.tx.try_send((request, Instant::now())).is_ok()
    }
}

/// Create the fetch channels and worker
///
/// Returns the request sender (for the core), the outcome receiver (for the
/// core's loop) and the worker (to be spawned).
pub fn create_fetch_worker(
    directory: Arc<dyn Directory>,
    timeout: Duration,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (FetchSender, mpsc::Receiver<FetchOutcome>, FetchWorker) {
    let (request_tx, request_rx) = mpsc::channel(buffer_size);
    let (outcome_tx, outcome_rx) = mpsc::channel(buffer_size);
    let worker = FetchWorker {
        resolver: Arc::new(EntityResolver::new(directory.clone(), timeout, metrics.clone())),
        fetcher: Arc::new(SnapshotFetcher::new(directory, timeout, metrics)),
        request_rx,
        outcome_tx,
    };
    (FetchSender { tx: request_tx }, outcome_rx, worker)
}

/// Request channel without a worker, for driving the core by hand
#[cfg(test)]
pub(crate) fn fetch_channel(
    buffer_size: usize,
) -> (FetchSender, mpsc::Receiver<(FetchRequest, Instant)>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (FetchSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{reading, FakeDirectory};

    #[tokio::test]
    async fn test_worker_answers_each_request() {
        let directory = FakeDirectory::new()
            .with_vehicle("JH01AB1234", "S1")
            .with_reading(reading("S1", 42.0, 1_767_631_290_048));
        let (sender, mut outcomes, worker) = create_fetch_worker(
            Arc::new(directory),
            Duration::from_secs(1),
            Arc::new(Metrics::new()),
            8,
        );
        tokio::spawn(worker.run());

        assert!(sender.try_send(FetchRequest::Resolve { target: SensorId::from("S1") }));
        match outcomes.recv().await.unwrap() {
            FetchOutcome::Resolved { target, entity } => {
                assert_eq!(target, SensorId::from("S1"));
                assert_eq!(entity.unwrap().vehicle_number, "JH01AB1234");
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        assert!(sender.try_send(FetchRequest::Snapshot { sensor_id: SensorId::from("S2") }));
        assert_eq!(
            outcomes.recv().await.unwrap(),
            FetchOutcome::Snapshot { sensor_id: SensorId::from("S2"), reading: None }
        );
    }
}
