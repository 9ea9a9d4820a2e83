//! Tests for the Aggregator module

use super::*;
use crate::domain::types::format_time;
use crate::services::fetch_worker::{create_fetch_worker, fetch_channel, FetchRequest};
use crate::services::history::HISTORY_CAPACITY;
use crate::services::testing::{alert, reading, vehicle, FakeDirectory};
use std::time::Duration;

const T1: i64 = 1_767_631_290_048;

/// Test harness that holds the fetch request receiver so requests can be
/// inspected and answered in any order
struct TestAggregator {
    aggregator: Aggregator,
    requests: mpsc::Receiver<(FetchRequest, Instant)>,
}

impl std::ops::Deref for TestAggregator {
    type Target = Aggregator;
    fn deref(&self) -> &Self::Target {
        &self.aggregator
    }
}

impl std::ops::DerefMut for TestAggregator {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.aggregator
    }
}

impl TestAggregator {
    fn drain(&mut self) -> Vec<FetchRequest> {
        let mut out = Vec::new();
        while let Ok((request, _)) = self.requests.try_recv() {
            out.push(request);
        }
        out
    }

    fn focus(&mut self, sensor: Option<&str>) {
        self.process(EngineInput::Command(Command::Focus(sensor.map(SensorId::from))));
    }

    fn resolved(&mut self, sensor: &str, entity: Option<TrackedEntity>) {
        self.process(EngineInput::Fetch(FetchOutcome::Resolved {
            target: SensorId::from(sensor),
            entity,
        }));
    }

    fn snapshot(&mut self, sensor: &str, reading: Option<SensorReading>) {
        self.process(EngineInput::Fetch(FetchOutcome::Snapshot {
            sensor_id: SensorId::from(sensor),
            reading,
        }));
    }

    fn alert(&mut self, event: AlertEvent) {
        self.process(EngineInput::Stream(StreamEvent::Alert(event)));
    }

    /// Focus and resolve `sensor` to a vehicle, leaving the snapshot pending
    fn track(&mut self, sensor: &str) {
        self.focus(Some(sensor));
        self.resolved(sensor, Some(vehicle("JH01AB1234", sensor)));
        self.drain();
    }
}

fn create_test_aggregator() -> TestAggregator {
    let (fetch, requests) = fetch_channel(64);
    let (aggregator, _view_rx) = Aggregator::new(fetch, Arc::new(Metrics::new()));
    TestAggregator { aggregator, requests }
}

fn snapshot_req(sensor: &str) -> FetchRequest {
    FetchRequest::Snapshot { sensor_id: SensorId::from(sensor) }
}

#[test]
fn test_starts_unfocused() {
    let agg = create_test_aggregator();
    let view = agg.view();
    assert_eq!(view.phase, Phase::Unfocused);
    assert_eq!(view.center, DEFAULT_CENTER);
    assert!(view.feed.is_empty());
}

#[test]
fn test_end_to_end_scenario() {
    let mut agg = create_test_aggregator();

    agg.focus(Some("S1"));
    assert_eq!(agg.drain(), vec![FetchRequest::Resolve { target: SensorId::from("S1") }]);

    agg.resolved("S1", Some(vehicle("JH01AB1234", "S1")));
    assert_eq!(agg.drain(), vec![snapshot_req("S1")]);

    agg.snapshot("S1", None);
    let view = agg.view();
    assert_eq!(view.phase, Phase::FocusedNoData);
    assert!(view.history.is_empty());
    assert_eq!(view.entity.unwrap().vehicle_number, "JH01AB1234");

    let low_fuel = alert("S1", "Low Fuel", T1);
    agg.alert(low_fuel.clone());
    assert_eq!(agg.drain(), vec![snapshot_req("S1")]);

    agg.snapshot("S1", Some(reading("S1", 42.0, T1)));
    let view = agg.view();
    assert_eq!(view.phase, Phase::Focused);
    assert_eq!(
        view.history,
        vec![HistoryPoint { fuel_level: 42.0, time: format_time(low_fuel.timestamp) }]
    );
    assert_eq!(view.feed, vec![low_fuel]);
    assert_eq!(view.current.unwrap().fuel_level, 42.0);
}

#[test]
fn test_resolve_snapshot_lands_in_fresh_buffer() {
    let mut agg = create_test_aggregator();
    agg.track("S1");
    agg.snapshot("S1", Some(reading("S1", 80.0, T1)));
    assert_eq!(agg.phase(), Phase::Focused);
    assert_eq!(agg.view().history.len(), 1);
}

#[test]
fn test_stale_snapshot_discarded() {
    let mut agg = create_test_aggregator();
    agg.track("S1");

    // Focus moves to S2 while the S1 fetch is in flight
    agg.focus(Some("S2"));
    agg.snapshot("S1", Some(reading("S1", 55.0, T1)));

    let view = agg.view();
    assert!(view.current.is_none());
    assert!(view.history.is_empty());
    assert_eq!(view.phase, Phase::FocusedNoData);
    assert_eq!(agg.metrics.snapshots_stale(), 1);
}

#[test]
fn test_stale_resolution_discarded() {
    let mut agg = create_test_aggregator();
    agg.focus(Some("S1"));
    agg.focus(Some("S2"));
    agg.drain();

    agg.resolved("S1", Some(vehicle("JH01AB1234", "S1")));
    assert!(agg.drain().is_empty());
    let view = agg.view();
    assert!(view.entity.is_none());
    assert_eq!(view.target, Some(SensorId::from("S2")));
}

#[test]
fn test_sensor_isolation() {
    let mut agg = create_test_aggregator();
    agg.track("S1");
    agg.snapshot("S1", Some(reading("S1", 60.0, T1)));
    let before = agg.view();

    agg.snapshot("S2", Some(reading("S2", 5.0, T1 + 1000)));
    agg.alert(alert("S2", "Low Fuel", T1 + 2000));

    assert!(agg.drain().is_empty());
    let after = agg.view();
    assert_eq!(after.current, before.current);
    assert_eq!(after.history, before.history);
    assert!(after.feed.is_empty());
}

#[test]
fn test_target_switch_resets_buffer() {
    let mut agg = create_test_aggregator();
    agg.track("S1");
    for i in 0..3 {
        agg.snapshot("S1", Some(reading("S1", 70.0 - i as f64, T1 + i * 1000)));
    }
    assert_eq!(agg.view().history.len(), 3);

    agg.focus(Some("S2"));
    let view = agg.view();
    assert!(view.history.is_empty());
    assert!(view.current.is_none());

    agg.resolved("S2", Some(vehicle("JH01AB9999", "S2")));
    agg.snapshot("S2", Some(reading("S2", 12.0, T1 + 9000)));
    let levels: Vec<f64> = agg.view().history.iter().map(|p| p.fuel_level).collect();
    assert_eq!(levels, vec![12.0]);
}

#[test]
fn test_focused_feed_hides_other_sensors() {
    let mut agg = create_test_aggregator();
    agg.track("S1");
    agg.alert(alert("S1", "Low Fuel", T1));
    agg.alert(alert("S2", "Geofence Deviation", T1 + 1000));

    let feed = agg.view().feed;
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].sensor_id.as_str(), "S1");
}

#[test]
fn test_unfocused_feed_shows_everything_most_recent_first() {
    let mut agg = create_test_aggregator();
    agg.focus(None);
    agg.alert(alert("S1", "Low Fuel", T1));
    agg.alert(alert("S2", "Geofence Deviation", T1 + 1000));
    assert_eq!(agg.drain(), vec![snapshot_req("S1"), snapshot_req("S2")]);

    let feed = agg.view().feed;
    let sensors: Vec<&str> = feed.iter().map(|a| a.sensor_id.as_str()).collect();
    assert_eq!(sensors, vec!["S2", "S1"]);
}

#[test]
fn test_broadcast_snapshot_updates_current_only() {
    let mut agg = create_test_aggregator();
    agg.alert(alert("S2", "Tilt", T1));
    agg.snapshot("S2", Some(reading("S2", 33.0, T1)));

    let view = agg.view();
    assert_eq!(view.phase, Phase::Unfocused);
    assert_eq!(view.current.unwrap().fuel_level, 33.0);
    assert!(view.history.is_empty());
}

#[test]
fn test_resolution_failure_falls_back_to_broadcast() {
    let mut agg = create_test_aggregator();
    agg.focus(Some("S1"));
    agg.alert(alert("S2", "Low Fuel", T1));
    assert!(agg.view().feed.is_empty());

    agg.resolved("S1", None);
    let view = agg.view();
    assert_eq!(view.phase, Phase::Unfocused);
    assert!(view.target.is_none());
    // The global log was kept, so broadcast shows the earlier alert
    assert_eq!(view.feed.len(), 1);
}

#[test]
fn test_refresh_retries_requested_sensor() {
    let mut agg = create_test_aggregator();
    agg.focus(Some("S1"));
    agg.resolved("S1", None);
    agg.drain();

    agg.process(EngineInput::Command(Command::Refresh));
    assert_eq!(agg.drain(), vec![FetchRequest::Resolve { target: SensorId::from("S1") }]);
    assert_eq!(agg.phase(), Phase::FocusedNoData);
}

#[test]
fn test_refresh_same_target_keeps_trend() {
    let mut agg = create_test_aggregator();
    agg.track("S1");
    agg.snapshot("S1", Some(reading("S1", 50.0, T1)));

    agg.process(EngineInput::Command(Command::Refresh));
    assert_eq!(agg.drain(), vec![FetchRequest::Resolve { target: SensorId::from("S1") }]);
    assert_eq!(agg.view().history.len(), 1);
}

#[test]
fn test_empty_snapshot_keeps_last_reading() {
    let mut agg = create_test_aggregator();
    agg.track("S1");
    agg.snapshot("S1", Some(reading("S1", 50.0, T1)));
    agg.snapshot("S1", None);

    let view = agg.view();
    assert_eq!(view.phase, Phase::Focused);
    assert_eq!(view.current.unwrap().fuel_level, 50.0);
    assert_eq!(view.history.len(), 1);
}

#[test]
fn test_history_capped_through_core() {
    let mut agg = create_test_aggregator();
    agg.track("S1");
    for i in 0..(HISTORY_CAPACITY as i64 + 5) {
        agg.snapshot("S1", Some(reading("S1", i as f64, T1 + i * 1000)));
    }
    let history = agg.view().history;
    assert_eq!(history.len(), HISTORY_CAPACITY);
    assert_eq!(history[0].fuel_level, 5.0);
    assert_eq!(history[HISTORY_CAPACITY - 1].fuel_level, (HISTORY_CAPACITY + 4) as f64);
}

#[test]
fn test_center_follows_current_reading() {
    let mut agg = create_test_aggregator();
    agg.track("S1");
    let mut r = reading("S1", 50.0, T1);
    r.latitude = 23.35;
    r.longitude = 85.33;
    agg.snapshot("S1", Some(r));
    assert_eq!(agg.view().center, LatLng::new(23.35, 85.33));
}

#[test]
fn test_out_of_order_snapshots_keep_newest_current() {
    let mut agg = create_test_aggregator();
    agg.track("S1");
    agg.alert(alert("S1", "Low Fuel", T1));
    agg.alert(alert("S1", "Low Fuel", T1 + 60_000));
    assert_eq!(agg.drain(), vec![snapshot_req("S1"), snapshot_req("S1")]);

    // The later fetch completes first
    agg.snapshot("S1", Some(reading("S1", 30.0, T1 + 60_000)));
    agg.snapshot("S1", Some(reading("S1", 42.0, T1)));

    let view = agg.view();
    let current = view.current.unwrap();
    assert_eq!(current.fuel_level, 30.0);
    assert_eq!(current.timestamp.timestamp_millis(), T1 + 60_000);
    // Trend keeps arrival order
    let levels: Vec<f64> = view.history.iter().map(|p| p.fuel_level).collect();
    assert_eq!(levels, vec![30.0, 42.0]);
}

#[test]
fn test_broadcast_out_of_order_snapshot_ignored_for_same_sensor() {
    let mut agg = create_test_aggregator();
    agg.snapshot("S2", Some(reading("S2", 20.0, T1 + 5000)));
    agg.snapshot("S2", Some(reading("S2", 25.0, T1)));
    assert_eq!(agg.view().current.unwrap().fuel_level, 20.0);

    // A different sensor always replaces the transient reading
    agg.snapshot("S3", Some(reading("S3", 70.0, T1)));
    assert_eq!(agg.view().current.unwrap().sensor_id.as_str(), "S3");
}

#[test]
fn test_snapshot_before_resolution_not_applied() {
    let mut agg = create_test_aggregator();
    agg.focus(Some("S1"));
    agg.alert(alert("S1", "Low Fuel", T1));
    agg.snapshot("S1", Some(reading("S1", 42.0, T1)));

    let view = agg.view();
    assert_eq!(view.phase, Phase::FocusedNoData);
    assert!(view.entity.is_none());
    assert!(view.history.is_empty());
    assert!(view.current.is_none());

    agg.resolved("S1", Some(vehicle("JH01AB1234", "S1")));
    agg.snapshot("S1", Some(reading("S1", 42.0, T1)));
    let view = agg.view();
    assert_eq!(view.phase, Phase::Focused);
    assert!(view.entity.is_some());
    assert_eq!(view.history.len(), 1);
}

#[test]
fn test_stream_status_exposed() {
    let mut agg = create_test_aggregator();
    agg.process(EngineInput::Stream(StreamEvent::Status(StreamStatus::Disconnected {
        reason: "connection reset".to_string(),
    })));
    assert!(matches!(agg.view().stream, StreamStatus::Disconnected { .. }));
}

#[tokio::test]
async fn test_run_loop_against_directory() {
    let directory = Arc::new(FakeDirectory::new().with_vehicle("JH01AB1234", "S1"));
    let metrics = Arc::new(Metrics::new());
    let (fetch, outcomes, worker) =
        create_fetch_worker(directory.clone(), Duration::from_secs(1), metrics.clone(), 16);
    tokio::spawn(worker.run());

    let probe = metrics.clone();
    let (mut aggregator, mut view_rx) = Aggregator::new(fetch, metrics);
    let (stream_tx, stream_rx) = mpsc::channel(16);
    let (command_tx, command_rx) = mpsc::channel(16);
    let engine = tokio::spawn(async move {
        aggregator.run(stream_rx, command_rx, outcomes).await;
    });

    command_tx.send(Command::Focus(Some(SensorId::from("S1")))).await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        view_rx.wait_for(|v| v.entity.is_some() && v.phase == Phase::FocusedNoData),
    )
    .await
    .expect("resolution timed out")
    .unwrap();

    // The snapshot issued on resolution comes back empty before data exists
    tokio::time::timeout(Duration::from_secs(5), async {
        while probe.report().snapshots_empty == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("initial snapshot timed out");

    directory.set_reading(reading("S1", 42.0, T1));
    stream_tx.send(StreamEvent::Alert(alert("S1", "Low Fuel", T1))).await.unwrap();
    let view = tokio::time::timeout(
        Duration::from_secs(5),
        view_rx.wait_for(|v| v.phase == Phase::Focused),
    )
    .await
    .expect("snapshot timed out")
    .unwrap()
    .clone();

    assert_eq!(view.history.len(), 1);
    assert_eq!(view.feed.len(), 1);

    drop(command_tx);
    engine.await.unwrap();
}
