//! Aggregation Pipeline
//!
//! ```text
//! BridgeReceiver --> AggregationLoop --> AggregationEngine
//!                                          |- MachineAggregator (per machine)
//!                                          |    minute/hour Stat per sensor, raw CSV log
//!                                          |- FanoutHub          live updates, anomalies
//!                                          |- RollupStore        hour/day/month/year rows, anomaly log
//!                                          '- Notifier           rate-limited anomaly alerts
//! ```
//!
//! ## Cascade
//!
//! On every `DataUpdate` the engine compares the current time with the
//! machine's last observed time. A new minute flushes minute averages to
//! subscribers. A new hour also persists hour averages. A new day derives the
//! day rollup from stored hour rows and rotates the raw log, a new month
//! derives from day rows, a new year from month rows. Higher levels only run
//! when every lower level crossed too.

pub mod aggregator;
pub mod clock;
pub mod engine;
pub mod processing_loop;
pub mod raw_log;
pub mod stat;

pub use aggregator::{CascadeFlush, MachineAggregator};
pub use clock::{Clock, Granularity, ManualClock, SystemClock};
pub use engine::{AggregationEngine, EngineConfig, EngineStats};
pub use processing_loop::AggregationLoop;
pub use raw_log::RawLog;
pub use stat::{ReductionMode, Stat};
