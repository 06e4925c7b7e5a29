//! In-memory rollup store for testing and minimal deployments.
//!
//! Thread-safe via `RwLock`. Not durable. Every write is also appended to an
//! operation log so tests can assert on write order.

use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use super::{AnomalyRecord, RollupRecord, RollupStore, StoreError};

/// A write observed by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    InitTable { machine: String, table: String },
    SaveStat { machine: String, table: String, value: f64, time: NaiveDateTime },
    SaveAnomaly { machine: String, record: AnomalyRecord },
}

#[derive(Default)]
struct Inner {
    tables: BTreeMap<(String, String), Vec<RollupRecord>>,
    anomalies: BTreeMap<String, Vec<AnomalyRecord>>,
    ops: Vec<StoreOp>,
    failing: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every write to `table` fail with [`StoreError::Unavailable`].
    pub fn fail_writes_to(&self, table: impl Into<String>) {
        self.write().failing.insert(table.into());
    }

    /// Every successful write so far, in order.
    pub fn ops(&self) -> Vec<StoreOp> {
        self.read().ops.clone()
    }

    /// Rows of one table in insertion order.
    pub fn rows(&self, machine: &str, table: &str) -> Vec<RollupRecord> {
        self.read()
            .tables
            .get(&(machine.to_string(), table.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_table(&self, machine: &str, table: &str) -> bool {
        self.read()
            .tables
            .contains_key(&(machine.to_string(), table.to_string()))
    }

    pub fn anomaly_count(&self, machine: &str) -> usize {
        self.read().anomalies.get(machine).map_or(0, Vec::len)
    }

    fn check(inner: &Inner, machine: &str, table: &str) -> Result<(), StoreError> {
        if inner.failing.contains(table) {
            return Err(StoreError::Unavailable {
                machine: machine.to_string(),
                table: table.to_string(),
            });
        }
        Ok(())
    }
}

impl RollupStore for MemoryStore {
    fn init_table(&self, machine: &str, table: &str) -> Result<(), StoreError> {
        let mut inner = self.write();
        inner
            .tables
            .entry((machine.to_string(), table.to_string()))
            .or_default();
        inner.ops.push(StoreOp::InitTable {
            machine: machine.to_string(),
            table: table.to_string(),
        });
        Ok(())
    }

    fn save_stat(
        &self,
        machine: &str,
        table: &str,
        value: f64,
        time: NaiveDateTime,
    ) -> Result<(), StoreError> {
        let mut inner = self.write();
        Self::check(&inner, machine, table)?;
        inner
            .tables
            .entry((machine.to_string(), table.to_string()))
            .or_default()
            .push(RollupRecord { time, value });
        inner.ops.push(StoreOp::SaveStat {
            machine: machine.to_string(),
            table: table.to_string(),
            value,
            time,
        });
        Ok(())
    }

    fn stat_range(
        &self,
        machine: &str,
        table: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<RollupRecord>, StoreError> {
        let inner = self.read();
        let mut rows: Vec<RollupRecord> = inner
            .tables
            .get(&(machine.to_string(), table.to_string()))
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.time >= start && r.time < end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|r| r.time);
        Ok(rows)
    }

    fn save_anomaly(&self, machine: &str, record: &AnomalyRecord) -> Result<(), StoreError> {
        let mut inner = self.write();
        Self::check(&inner, machine, "anomaly")?;
        inner
            .anomalies
            .entry(machine.to_string())
            .or_default()
            .push(*record);
        inner.ops.push(StoreOp::SaveAnomaly {
            machine: machine.to_string(),
            record: *record,
        });
        Ok(())
    }

    fn recent_anomalies(&self, machine: &str, limit: usize) -> Result<Vec<AnomalyRecord>, StoreError> {
        Ok(self
            .read()
            .anomalies
            .get(machine)
            .map(|records| records.iter().rev().take(limit).copied().collect())
            .unwrap_or_default())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}
