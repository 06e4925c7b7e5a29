//! Aggregation engine: applies bridge events to per-machine state, the
//! fan-out hub, the rollup store and the notifier.
//!
//! The engine is owned by one task. Stats, batches, replay buffers and the
//! namespace registry are plain fields with no locks. Work that can block or
//! fail (store writes, notification delivery) runs as independent tasks in a
//! `JoinSet`; a failing task is logged and never reaches the engine.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::aggregator::{CascadeFlush, MachineAggregator};
use super::clock::{completed_window, Clock, Granularity};
use crate::config::{defaults, FanoutConfig, MonitorConfig, NotifyConfig, StatsConfig};
use crate::fanout::FanoutHub;
use crate::ingest::BridgeEvent;
use crate::notify::{Notification, Notifier, RateLimiter};
use crate::storage::{rollup_tables, AnomalyRecord, RollupStore};
use crate::types::{ConnectionId, DataUpdate, FaultReport, MachineEvent};

/// Settings the engine needs from [`MonitorConfig`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub fanout: FanoutConfig,
    pub notify: NotifyConfig,
    pub stats: StatsConfig,
    /// Root of the raw sample logs. `None` disables raw logging.
    pub raw_log_dir: Option<PathBuf>,
}

impl From<&MonitorConfig> for EngineConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            fanout: config.fanout.clone(),
            notify: config.notify.clone(),
            stats: config.stats.clone(),
            raw_log_dir: Some(config.storage.raw_log_dir.clone()),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fanout: FanoutConfig::default(),
            notify: NotifyConfig::default(),
            stats: StatsConfig::default(),
            raw_log_dir: None,
        }
    }
}

/// Counters for the aggregation task.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub events: u64,
    pub data_updates: u64,
    pub dropped_updates: u64,
    pub fault_detects: u64,
    pub minute_flushes: u64,
    pub anomalies: u64,
    pub notifications: u64,
    pub failed_tasks: u64,
}

pub struct AggregationEngine {
    clock: Arc<dyn Clock>,
    store: Arc<dyn RollupStore>,
    notifier: Arc<dyn Notifier>,
    limiter: RateLimiter,
    hub: FanoutHub,
    machines: HashMap<String, MachineAggregator>,
    stats_config: StatsConfig,
    topic: String,
    raw_log_dir: Option<PathBuf>,
    tasks: JoinSet<()>,
    stats: EngineStats,
}

impl AggregationEngine {
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn RollupStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        info!(
            store = store.backend_name(),
            notifier = notifier.name(),
            cooldown_secs = config.notify.cooldown_secs,
            "Aggregation engine ready"
        );
        Self {
            clock,
            store,
            notifier,
            limiter: RateLimiter::new(config.notify.cooldown()),
            hub: FanoutHub::new(config.fanout),
            machines: HashMap::new(),
            stats_config: config.stats,
            topic: config.notify.topic,
            raw_log_dir: config.raw_log_dir,
            tasks: JoinSet::new(),
            stats: EngineStats::default(),
        }
    }

    pub fn hub(&self) -> &FanoutHub {
        &self.hub
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn machine(&self, name: &str) -> Option<&MachineAggregator> {
        self.machines.get(name)
    }

    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    /// Number of spawned store/notification tasks not yet reaped.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    // ========================================================================
    // Event Dispatch
    // ========================================================================

    pub fn handle(&mut self, event: BridgeEvent) {
        self.stats.events += 1;
        match event {
            BridgeEvent::Connect { conn, machine: Some(machine) } => self.on_connect(&machine, conn),
            BridgeEvent::Disconnect { conn, machine: Some(machine) } => self.on_disconnect(&machine, conn),
            BridgeEvent::Connect { conn, machine: None } => {
                debug!(%conn, "[Aggregation] unregistered connection opened");
            }
            BridgeEvent::Disconnect { conn, machine: None } => {
                debug!(%conn, "[Aggregation] unregistered connection closed");
            }
            BridgeEvent::Data { machine, event, .. } => match event {
                MachineEvent::DataUpdate(update) => {
                    self.on_data_update(&machine, &update);
                }
                MachineEvent::FaultDetect(report) => self.on_fault_detect(&machine, report),
            },
        }
    }

    fn on_connect(&mut self, machine: &str, conn: ConnectionId) {
        self.hub.open(machine, conn);
        if !self.machines.contains_key(machine) {
            let now = self.clock.now();
            self.machines.insert(
                machine.to_string(),
                MachineAggregator::new(machine, now, self.raw_log_dir.as_deref()),
            );
        }
        info!(machine, %conn, "[Aggregation] machine connected");
    }

    fn on_disconnect(&mut self, machine: &str, conn: ConnectionId) {
        if self.hub.close(machine, conn) {
            self.machines.remove(machine);
            info!(machine, %conn, "[Aggregation] machine disconnected");
        }
    }

    /// Run the cascade check, then fold the update. Returns the levels flushed.
    ///
    /// Updates for a machine with no open namespace are dropped.
    pub fn on_data_update(&mut self, machine: &str, update: &DataUpdate) -> Vec<Granularity> {
        self.stats.data_updates += 1;
        let now = self.clock.now();
        let Some(aggregator) = self.machines.get_mut(machine) else {
            self.stats.dropped_updates += 1;
            warn!(machine, "[Aggregation] data for unconnected machine dropped");
            return Vec::new();
        };

        let flush = aggregator.advance(now);
        let new_sensors = aggregator.fold(update, &self.stats_config, now);

        let levels = match flush {
            Some(flush) => {
                let levels = flush.levels.clone();
                self.dispatch_flush(machine, flush);
                levels
            }
            None => Vec::new(),
        };

        for sensor in new_sensors {
            self.spawn_table_init(machine, &sensor);
        }

        levels
    }

    fn dispatch_flush(&mut self, machine: &str, flush: CascadeFlush) {
        self.stats.minute_flushes += 1;
        for update in &flush.minute {
            self.hub.publish_update(machine, update.clone());
        }
        if flush.crossed(Granularity::Hour) {
            let store = Arc::clone(&self.store);
            let machine = machine.to_string();
            self.tasks
                .spawn_blocking(move || persist_cascade(store.as_ref(), &machine, &flush));
        }
    }

    fn spawn_table_init(&mut self, machine: &str, sensor: &str) {
        let store = Arc::clone(&self.store);
        let machine = machine.to_string();
        let tables = rollup_tables(sensor);
        self.tasks.spawn_blocking(move || {
            for table in &tables {
                if let Err(e) = store.init_table(&machine, table) {
                    warn!(machine = %machine, table = %table, error = %e, "Failed to init rollup table");
                }
            }
        });
    }

    /// Forward to subscribers; persist and notify only above threshold.
    pub fn on_fault_detect(&mut self, machine: &str, report: FaultReport) {
        self.stats.fault_detects += 1;
        self.hub.publish_anomaly(machine, report);

        if !report.is_anomalous() {
            return;
        }
        self.stats.anomalies += 1;
        let now = self.clock.now();

        let store = Arc::clone(&self.store);
        let record = AnomalyRecord::new(report, now);
        let owner = machine.to_string();
        self.tasks.spawn_blocking(move || {
            if let Err(e) = store.save_anomaly(&owner, &record) {
                warn!(machine = %owner, error = %e, "Failed to persist anomaly");
            }
        });

        if !self.limiter.try_acquire(now) {
            debug!(machine, "[Aggregation] notification suppressed by cooldown");
            return;
        }
        self.stats.notifications += 1;
        let notifier = Arc::clone(&self.notifier);
        let notification = Notification::anomaly(&self.topic, machine, &report);
        self.tasks.spawn(async move {
            if let Err(e) = notifier.send(&notification).await {
                warn!(machine = %notification.machine, provider = notifier.name(), error = %e, "Notification delivery failed");
            }
        });
    }

    // ========================================================================
    // Task Supervision
    // ========================================================================

    /// Collect finished tasks without waiting.
    pub fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            self.record_task(result);
        }
    }

    /// Wait for every in-flight task.
    pub async fn settle(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            self.record_task(result);
        }
    }

    /// Wait for in-flight tasks up to the shutdown grace period, then abort
    /// the rest.
    pub async fn shutdown(&mut self) {
        let grace = std::time::Duration::from_secs(defaults::SHUTDOWN_GRACE_SECS);
        if tokio::time::timeout(grace, self.settle()).await.is_err() {
            warn!(remaining = self.tasks.len(), "[Aggregation] aborting tasks after grace period");
            self.tasks.abort_all();
            self.settle().await;
        }
    }

    fn record_task(&mut self, result: Result<(), tokio::task::JoinError>) {
        if let Err(e) = result {
            if e.is_panic() {
                self.stats.failed_tasks += 1;
                error!("[Aggregation] handler task panicked: {}", e);
            }
        }
    }
}

/// Write the hour rollups, then derive day, month and year from the stored
/// rows of the level below. A failed level is logged and the next level
/// still runs.
fn persist_cascade(store: &dyn RollupStore, machine: &str, flush: &CascadeFlush) {
    let (hour_start, _) = completed_window(Granularity::Hour, &flush.now);
    for (sensor, average) in &flush.hour {
        let [hour_table, ..] = rollup_tables(sensor);
        if let Err(e) = store.save_stat(machine, &hour_table, *average, hour_start) {
            warn!(machine, table = %hour_table, error = %e, "Failed to save hour rollup");
        }
    }

    for (level, source_idx) in [
        (Granularity::Day, 0),
        (Granularity::Month, 1),
        (Granularity::Year, 2),
    ] {
        if !flush.crossed(level) {
            break;
        }
        let (start, end) = completed_window(level, &flush.now);
        for sensor in &flush.sensors {
            let tables = rollup_tables(sensor);
            derive_rollup(store, machine, &tables[source_idx], &tables[source_idx + 1], start, end);
        }
    }
}

fn derive_rollup(
    store: &dyn RollupStore,
    machine: &str,
    source: &str,
    target: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) {
    match store.stat_average(machine, source, start, end) {
        Ok(Some(average)) => {
            if let Err(e) = store.save_stat(machine, target, average, start) {
                warn!(machine, table = %target, error = %e, "Failed to save rollup");
            }
        }
        Ok(None) => {
            debug!(machine, table = %source, %start, %end, "No rows to roll up");
        }
        Err(e) => {
            warn!(machine, table = %source, error = %e, "Failed to read rollup source");
        }
    }
}
