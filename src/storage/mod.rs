//! Rollup Storage
//!
//! Read/write contract for the persisted side of the cascade: four rollup
//! tables per sensor (`<sensor>_hour`, `_day`, `_month`, `_year`) holding
//! `(timestamp, value)` rows, plus one append-only anomaly log per machine.
//!
//! - [`SledStore`]: durable backend, one sled tree per table
//! - [`MemoryStore`]: in-memory backend for tests and throwaway deployments

pub mod memory;
pub mod sled_store;

pub use memory::{MemoryStore, StoreOp};
pub use sled_store::SledStore;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::defaults;
use crate::types::FaultReport;

/// One persisted rollup row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollupRecord {
    pub time: NaiveDateTime,
    pub value: f64,
}

/// One row of the anomaly log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub score: f64,
    pub threshold: f64,
    pub time: NaiveDateTime,
}

impl AnomalyRecord {
    pub fn new(report: FaultReport, time: NaiveDateTime) -> Self {
        Self {
            score: report.score,
            threshold: report.threshold,
            time,
        }
    }
}

/// Names of the four rollup tables of a sensor, in cascade order.
pub fn rollup_tables(sensor: &str) -> [String; 4] {
    [
        format!("{sensor}{}", defaults::HOUR_SUFFIX),
        format!("{sensor}{}", defaults::DAY_SUFFIX),
        format!("{sensor}{}", defaults::MONTH_SUFFIX),
        format!("{sensor}{}", defaults::YEAR_SUFFIX),
    ]
}

/// Storage contract used by the aggregation engine.
///
/// Implementations must be thread-safe (Send + Sync); writes are issued from
/// blocking worker tasks spawned by the aggregation loop.
pub trait RollupStore: Send + Sync {
    /// Make sure a rollup table exists. Idempotent.
    fn init_table(&self, machine: &str, table: &str) -> Result<(), StoreError>;

    /// Append a rollup row.
    fn save_stat(
        &self,
        machine: &str,
        table: &str,
        value: f64,
        time: NaiveDateTime,
    ) -> Result<(), StoreError>;

    /// Rows with `start <= time < end`, oldest first.
    fn stat_range(
        &self,
        machine: &str,
        table: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<RollupRecord>, StoreError>;

    /// Mean of the rows in `[start, end)`, or `None` when the span is empty.
    fn stat_average(
        &self,
        machine: &str,
        table: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<f64>, StoreError> {
        let rows = self.stat_range(machine, table, start, end)?;
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(rows.iter().map(|r| r.value).sum::<f64>() / rows.len() as f64))
    }

    /// Append to the machine's anomaly log.
    fn save_anomaly(&self, machine: &str, record: &AnomalyRecord) -> Result<(), StoreError>;

    /// Most recent anomaly rows, newest first.
    fn recent_anomalies(&self, machine: &str, limit: usize) -> Result<Vec<AnomalyRecord>, StoreError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("table {machine}/{table} unavailable")]
    Unavailable { machine: String, table: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollup_table_names() {
        assert_eq!(
            rollup_tables("vib1"),
            ["vib1_hour", "vib1_day", "vib1_month", "vib1_year"].map(String::from)
        );
    }
}
