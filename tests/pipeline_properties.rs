//! Aggregation Pipeline Properties
//!
//! Drives the aggregation engine with a manual clock, the in-memory store and
//! a recording notifier, and checks the cascade, destructive minute reads,
//! notification cooldown, replay buffers and connection lifecycle.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::sync::{Arc, Mutex};

use condition_monitor::config::{FanoutConfig, NotifyConfig};
use condition_monitor::fanout::{FanoutEvent, HubHandle, Subscription};
use condition_monitor::ingest::{bridge, BridgeEvent};
use condition_monitor::notify::{Notification, Notifier, NotifyError};
use condition_monitor::pipeline::{
    AggregationEngine, AggregationLoop, EngineConfig, Granularity, ManualClock,
};
use condition_monitor::storage::{MemoryStore, RollupStore, StoreOp};
use condition_monitor::types::{
    ConnectionId, DataUpdate, FaultReport, MachineEvent, MinuteUpdate, SensorSamples,
};

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

struct Harness {
    engine: AggregationEngine,
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
}

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d).unwrap().and_hms_opt(h, mi, s).unwrap()
}

fn harness_with(start: NaiveDateTime, config: EngineConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(start));
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = AggregationEngine::new(config, clock.clone(), store.clone(), notifier.clone());
    Harness {
        engine,
        clock,
        store,
        notifier,
    }
}

fn harness(start: NaiveDateTime) -> Harness {
    harness_with(start, EngineConfig::default())
}

fn connect(machine: &str, conn: u64) -> BridgeEvent {
    BridgeEvent::Connect {
        conn: ConnectionId(conn),
        machine: Some(machine.to_string()),
    }
}

fn disconnect(machine: &str, conn: u64) -> BridgeEvent {
    BridgeEvent::Disconnect {
        conn: ConnectionId(conn),
        machine: Some(machine.to_string()),
    }
}

fn vib(data: &[f64], typed: bool) -> DataUpdate {
    DataUpdate::from([(
        "vib1".to_string(),
        SensorSamples {
            sensor_type: typed.then(|| "VIB".to_string()),
            data: data.to_vec(),
        },
    )])
}

fn drain(sub: &mut Subscription) -> Vec<FanoutEvent> {
    let mut events = Vec::new();
    while let Ok(event) = sub.events.try_recv() {
        events.push(event);
    }
    events
}

fn saved_tables(store: &MemoryStore) -> Vec<String> {
    store
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            StoreOp::SaveStat { table, .. } => Some(table),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Cascade
// ============================================================================

#[tokio::test]
async fn test_cascade_flushes_every_level_in_order() {
    let mut h = harness(at(2023, 12, 31, 23, 59, 30));
    h.engine.handle(connect("M1", 1));
    let mut sub = h.engine.hub().subscribe("M1").unwrap();

    assert!(h.engine.on_data_update("M1", &vib(&[2.0, 4.0], true)).is_empty());

    h.clock.set(at(2024, 1, 1, 0, 0, 5));
    let levels = h.engine.on_data_update("M1", &vib(&[10.0], true));
    assert_eq!(levels.to_vec(), Granularity::ALL.to_vec());
    h.engine.settle().await;

    // one minute update, stamped at the flush
    let events = drain(&mut sub);
    assert_eq!(
        events,
        vec![FanoutEvent::Update(MinuteUpdate {
            sensor_name: "vib1".to_string(),
            data: 3.0,
            time: at(2024, 1, 1, 0, 0, 5),
        })]
    );

    // each persisted level exactly once, lowest first
    assert_eq!(
        saved_tables(&h.store),
        vec!["vib1_hour", "vib1_day", "vib1_month", "vib1_year"]
    );
    let hour = h.store.rows("M1", "vib1_hour");
    assert_eq!(hour[0].time, at(2023, 12, 31, 23, 0, 0));
    assert!((hour[0].value - 3.0).abs() < 1e-12);
    assert_eq!(h.store.rows("M1", "vib1_day")[0].time, at(2023, 12, 31, 0, 0, 0));
    assert_eq!(h.store.rows("M1", "vib1_month")[0].time, at(2023, 12, 1, 0, 0, 0));
    assert_eq!(h.store.rows("M1", "vib1_year")[0].time, at(2023, 1, 1, 0, 0, 0));
}

#[tokio::test]
async fn test_minute_only_crossing_persists_nothing() {
    let mut h = harness(at(2024, 5, 1, 10, 0, 0));
    h.engine.handle(connect("M1", 1));
    h.engine.on_data_update("M1", &vib(&[1.0], true));

    h.clock.advance(Duration::seconds(70));
    let levels = h.engine.on_data_update("M1", &vib(&[1.0], true));
    assert_eq!(levels, vec![Granularity::Minute]);
    h.engine.settle().await;

    assert!(saved_tables(&h.store).is_empty());
    // first sighting still initialized the four rollup tables
    for table in ["vib1_hour", "vib1_day", "vib1_month", "vib1_year"] {
        assert!(h.store.has_table("M1", table), "{table} missing");
    }
}

#[tokio::test]
async fn test_day_rollup_averages_stored_hours() {
    let mut h = harness(at(2024, 5, 1, 22, 30, 0));
    h.engine.handle(connect("M1", 1));

    h.engine.on_data_update("M1", &vib(&[2.0], true));
    h.clock.set(at(2024, 5, 1, 23, 10, 0));
    h.engine.on_data_update("M1", &vib(&[6.0], true));
    h.engine.settle().await;
    h.clock.set(at(2024, 5, 2, 0, 0, 1));
    h.engine.on_data_update("M1", &vib(&[0.0], true));
    h.engine.settle().await;

    let hours: Vec<f64> = h.store.rows("M1", "vib1_hour").iter().map(|r| r.value).collect();
    assert_eq!(hours, vec![2.0, 6.0]);
    let day = h.store.rows("M1", "vib1_day");
    assert_eq!(day.len(), 1);
    assert!((day[0].value - 4.0).abs() < 1e-12);
    assert_eq!(day[0].time, at(2024, 5, 1, 0, 0, 0));
}

#[tokio::test]
async fn test_failed_level_does_not_stop_the_cascade() {
    let mut h = harness(at(2024, 5, 31, 23, 59, 0));
    h.store.fail_writes_to("vib1_hour");
    h.engine.handle(connect("M1", 1));

    h.engine.on_data_update("M1", &vib(&[1.0], true));
    h.clock.set(at(2024, 6, 1, 0, 0, 0));
    let levels = h.engine.on_data_update("M1", &vib(&[1.0], true));
    h.engine.settle().await;

    assert_eq!(levels.len(), 4);
    assert!(h.store.rows("M1", "vib1_hour").is_empty());
    assert_eq!(h.engine.stats().failed_tasks, 0);
    // later updates keep flowing
    h.clock.advance(Duration::minutes(1));
    assert_eq!(h.engine.on_data_update("M1", &vib(&[1.0], true)), vec![Granularity::Minute]);
}

// ============================================================================
// Destructive minute read
// ============================================================================

#[tokio::test]
async fn test_minute_average_then_reset() {
    let mut h = harness(at(2024, 5, 1, 10, 0, 0));
    h.engine.handle(connect("M1", 1));
    let mut sub = h.engine.hub().subscribe("M1").unwrap();

    h.clock.set(at(2024, 5, 1, 10, 0, 10));
    h.engine.on_data_update("M1", &vib(&[1.0, 2.0, 3.0], true));
    h.clock.set(at(2024, 5, 1, 10, 0, 40));
    h.engine.on_data_update("M1", &vib(&[4.0, 5.0], false));

    h.clock.set(at(2024, 5, 1, 10, 1, 0));
    h.engine.on_data_update("M1", &DataUpdate::new());

    let events = drain(&mut sub);
    assert_eq!(events.len(), 1);
    let FanoutEvent::Update(update) = &events[0] else {
        panic!("expected an update, got {events:?}");
    };
    assert!((update.data - 3.0).abs() < 1e-12);
    assert_eq!(h.engine.machine("M1").unwrap().minute_count("vib1"), Some(0));

    // nothing new arrived: the next rollover publishes nothing
    h.clock.set(at(2024, 5, 1, 10, 2, 0));
    h.engine.on_data_update("M1", &DataUpdate::new());
    assert!(drain(&mut sub).is_empty());
}

// ============================================================================
// Anomalies and notifications
// ============================================================================

#[tokio::test]
async fn test_anomaly_persisted_and_notified_below_threshold_only_broadcast() {
    let mut h = harness(at(2024, 5, 1, 10, 0, 0));
    h.engine.handle(connect("M1", 1));
    let mut sub = h.engine.hub().subscribe("M1").unwrap();

    h.engine.on_fault_detect("M1", FaultReport { score: 12.0, threshold: 10.0 });
    h.engine.on_fault_detect("M1", FaultReport { score: 8.0, threshold: 10.0 });
    h.engine.settle().await;

    assert_eq!(h.store.anomaly_count("M1"), 1);
    assert_eq!(h.notifier.count(), 1);
    let sent = h.notifier.sent.lock().unwrap()[0].clone();
    assert_eq!(sent.title, "M1 anomaly detected");
    assert_eq!(sent.body, "score/threshold: 12/10");

    let events = drain(&mut sub);
    assert_eq!(
        events,
        vec![
            FanoutEvent::Anomaly(FaultReport { score: 12.0, threshold: 10.0 }),
            FanoutEvent::Anomaly(FaultReport { score: 8.0, threshold: 10.0 }),
        ]
    );

    let recent = h.store.recent_anomalies("M1", 10).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].time, at(2024, 5, 1, 10, 0, 0));
}

#[tokio::test]
async fn test_notifications_respect_cooldown() {
    let mut h = harness(at(2024, 5, 1, 10, 0, 0));
    h.engine.handle(connect("M1", 1));
    let anomaly = FaultReport { score: 12.0, threshold: 10.0 };

    h.engine.on_fault_detect("M1", anomaly);
    h.clock.advance(Duration::seconds(30));
    h.engine.on_fault_detect("M1", anomaly);
    h.engine.settle().await;
    assert_eq!(h.notifier.count(), 1);

    h.clock.advance(Duration::seconds(31));
    h.engine.on_fault_detect("M1", anomaly);
    h.engine.settle().await;
    assert_eq!(h.notifier.count(), 2);

    // every anomaly is still persisted
    assert_eq!(h.store.anomaly_count("M1"), 3);
}

#[tokio::test]
async fn test_cooldown_is_shared_across_machines() {
    let mut h = harness(at(2024, 5, 1, 10, 0, 0));
    h.engine.handle(connect("M1", 1));
    h.engine.handle(connect("M2", 2));
    let anomaly = FaultReport { score: 5.0, threshold: 1.0 };

    h.engine.on_fault_detect("M1", anomaly);
    h.engine.on_fault_detect("M2", anomaly);
    h.engine.settle().await;
    assert_eq!(h.notifier.count(), 1);
}

#[tokio::test]
async fn test_failed_anomaly_write_still_notifies() {
    let mut h = harness(at(2024, 5, 1, 10, 0, 0));
    h.store.fail_writes_to("anomaly");
    h.engine.handle(connect("M1", 1));

    h.engine.on_fault_detect("M1", FaultReport { score: 12.0, threshold: 10.0 });
    h.engine.settle().await;

    assert_eq!(h.store.anomaly_count("M1"), 0);
    assert_eq!(h.notifier.count(), 1);
}

// ============================================================================
// Replay buffers
// ============================================================================

#[tokio::test]
async fn test_late_subscriber_gets_most_recent_minutes() {
    let config = EngineConfig {
        fanout: FanoutConfig {
            replay_capacity: 3,
            ..FanoutConfig::default()
        },
        ..EngineConfig::default()
    };
    let mut h = harness_with(at(2024, 5, 1, 10, 0, 0), config);
    h.engine.handle(connect("M1", 1));

    for i in 0..6 {
        h.engine.on_data_update("M1", &vib(&[f64::from(i)], true));
        h.clock.advance(Duration::minutes(1));
    }
    h.engine.on_data_update("M1", &DataUpdate::new());

    let sub = h.engine.hub().subscribe("M1").unwrap();
    let FanoutEvent::Initialize(per_sensor) = sub.initialize else {
        panic!("expected initialize");
    };
    let values: Vec<f64> = per_sensor[0].iter().map(|u| u.data).collect();
    assert_eq!(values, vec![3.0, 4.0, 5.0]);
}

#[tokio::test]
async fn test_initialize_is_empty_before_first_minute() {
    let mut h = harness(at(2024, 5, 1, 10, 0, 0));
    h.engine.handle(connect("M1", 1));
    h.engine.on_data_update("M1", &vib(&[1.0], true));

    let sub = h.engine.hub().subscribe("M1").unwrap();
    assert_eq!(sub.initialize, FanoutEvent::Initialize(Vec::new()));
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[tokio::test]
async fn test_connect_then_disconnect_leaves_nothing() {
    let mut h = harness(at(2024, 5, 1, 10, 0, 0));
    h.engine.handle(connect("M2", 7));
    assert!(h.engine.hub().contains("M2"));

    h.engine.handle(disconnect("M2", 7));
    assert!(!h.engine.hub().contains("M2"));
    assert!(h.engine.hub().subscribe("M2").is_none());
    assert_eq!(h.engine.machine_count(), 0);
}

#[tokio::test]
async fn test_stale_disconnect_keeps_reconnected_machine() {
    let mut h = harness(at(2024, 5, 1, 10, 0, 0));
    h.engine.handle(connect("M1", 1));
    h.engine.on_data_update("M1", &vib(&[1.0], true));

    // reconnect on a new socket before the old one is reaped
    h.engine.handle(connect("M1", 2));
    h.engine.handle(disconnect("M1", 1));

    assert_eq!(h.engine.hub().owner("M1"), Some(ConnectionId(2)));
    assert_eq!(h.engine.machine("M1").unwrap().minute_count("vib1"), Some(1));

    h.engine.handle(disconnect("M1", 2));
    assert!(!h.engine.hub().contains("M1"));
}

#[tokio::test]
async fn test_data_after_takeover_and_close_is_dropped() {
    let logs = tempfile::TempDir::new().unwrap();
    let config = EngineConfig {
        raw_log_dir: Some(logs.path().to_path_buf()),
        ..EngineConfig::default()
    };
    let mut h = harness_with(at(2024, 5, 1, 10, 0, 0), config);

    // connection 2 takes the name over from 1, then leaves
    h.engine.handle(connect("M1", 1));
    h.engine.handle(connect("M1", 2));
    h.engine.handle(disconnect("M1", 2));
    assert_eq!(h.engine.machine_count(), 0);

    // the old connection keeps sending
    assert!(h.engine.on_data_update("M1", &vib(&[1.0], true)).is_empty());
    h.clock.advance(Duration::minutes(2));
    assert!(h.engine.on_data_update("M1", &vib(&[1.0], true)).is_empty());
    h.engine.settle().await;

    assert_eq!(h.engine.machine_count(), 0);
    assert_eq!(h.engine.stats().dropped_updates, 2);
    assert!(!h.store.has_table("M1", "vib1_hour"));
    assert!(!logs.path().join("M1").exists());

    // its late close is stale and changes nothing
    h.engine.handle(disconnect("M1", 1));
    assert!(!h.engine.hub().contains("M1"));
    assert_eq!(h.engine.machine_count(), 0);
}

#[tokio::test]
async fn test_subscriber_stream_ends_on_disconnect() {
    let mut h = harness(at(2024, 5, 1, 10, 0, 0));
    h.engine.handle(connect("M1", 1));
    let mut sub = h.engine.hub().subscribe("M1").unwrap();

    h.engine.handle(disconnect("M1", 1));
    assert!(matches!(
        sub.events.recv().await,
        Err(tokio::sync::broadcast::error::RecvError::Closed)
    ));
}

// ============================================================================
// Aggregation loop
// ============================================================================

#[tokio::test]
async fn test_loop_processes_in_order_and_stops_on_close() {
    let clock = Arc::new(ManualClock::new(at(2024, 5, 1, 10, 0, 0)));
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let config = EngineConfig {
        notify: NotifyConfig::default(),
        ..EngineConfig::default()
    };
    let engine = AggregationEngine::new(config, clock, store.clone(), notifier.clone());

    let (tx, rx) = bridge();
    let (hub, commands) = HubHandle::channel();
    let task = tokio::spawn(AggregationLoop::new(engine, rx, commands).run());

    tx.send(connect("M1", 1)).unwrap();
    tx.send(BridgeEvent::Data {
        conn: ConnectionId(1),
        machine: "M1".to_string(),
        event: MachineEvent::FaultDetect(FaultReport { score: 3.0, threshold: 1.0 }),
    })
    .unwrap();

    assert_eq!(hub.list_machines().await.unwrap(), vec!["M1".to_string()]);

    tx.close().unwrap();
    let stats = task.await.unwrap();
    assert_eq!(stats.events, 2);
    assert_eq!(stats.fault_detects, 1);
    assert_eq!(notifier.count(), 1);
    assert_eq!(store.anomaly_count("M1"), 1);
}
