//! sled-backed rollup store.
//!
//! Layout: one tree per `(machine, table)` named `<machine>/<table>`, and one
//! `<machine>/anomaly` tree for the anomaly log.
//!
//! Keys are order-preserving big-endian millisecond timestamps so range scans
//! walk rows chronologically. Values are JSON.

use chrono::NaiveDateTime;
use std::path::Path;
use std::sync::Arc;

use super::{AnomalyRecord, RollupRecord, RollupStore, StoreError};

const ANOMALY_TABLE: &str = "anomaly";

/// Durable store for rollup tables and anomaly logs.
#[derive(Clone)]
pub struct SledStore {
    db: Arc<sled::Db>,
}

impl SledStore {
    /// Open or create the store at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;
        tracing::info!("Rollup store opened at {:?}", path_ref);
        Ok(Self { db: Arc::new(db) })
    }

    fn tree(&self, machine: &str, table: &str) -> Result<sled::Tree, StoreError> {
        Ok(self.db.open_tree(format!("{machine}/{table}"))?)
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Names of all tables created so far, as `<machine>/<table>`.
    pub fn table_names(&self) -> Vec<String> {
        self.db
            .tree_names()
            .into_iter()
            .filter_map(|name| String::from_utf8(name.to_vec()).ok())
            .filter(|name| name.contains('/'))
            .collect()
    }
}

/// Millisecond timestamp with the sign bit flipped so big-endian bytes sort
/// in time order across the epoch.
fn time_key(time: &NaiveDateTime) -> [u8; 8] {
    let millis = time.and_utc().timestamp_millis();
    ((millis as u64) ^ (1 << 63)).to_be_bytes()
}

impl RollupStore for SledStore {
    fn init_table(&self, machine: &str, table: &str) -> Result<(), StoreError> {
        self.tree(machine, table)?;
        Ok(())
    }

    fn save_stat(
        &self,
        machine: &str,
        table: &str,
        value: f64,
        time: NaiveDateTime,
    ) -> Result<(), StoreError> {
        let tree = self.tree(machine, table)?;
        let record = RollupRecord { time, value };
        tree.insert(time_key(&time), serde_json::to_vec(&record)?)?;
        Ok(())
    }

    fn stat_range(
        &self,
        machine: &str,
        table: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<RollupRecord>, StoreError> {
        let tree = self.tree(machine, table)?;
        let mut rows = Vec::new();
        for item in tree.range(time_key(&start)..time_key(&end)) {
            let (_key, value) = item?;
            rows.push(serde_json::from_slice::<RollupRecord>(&value)?);
        }
        Ok(rows)
    }

    fn save_anomaly(&self, machine: &str, record: &AnomalyRecord) -> Result<(), StoreError> {
        let tree = self.tree(machine, ANOMALY_TABLE)?;

        // time key + monotonic id keeps same-millisecond anomalies distinct
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&time_key(&record.time));
        key[8..].copy_from_slice(&self.db.generate_id()?.to_be_bytes());

        tree.insert(key, serde_json::to_vec(record)?)?;
        Ok(())
    }

    fn recent_anomalies(&self, machine: &str, limit: usize) -> Result<Vec<AnomalyRecord>, StoreError> {
        let tree = self.tree(machine, ANOMALY_TABLE)?;
        let mut records = Vec::with_capacity(limit.min(tree.len()));
        for item in tree.iter().rev().take(limit) {
            let (_key, value) = item?;
            records.push(serde_json::from_slice::<AnomalyRecord>(&value)?);
        }
        Ok(records)
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}
