//! Condition Monitor: industrial condition-monitoring pipeline
//!
//! Remote acquisition machines stream sensor waveforms to a central server,
//! which rolls them up into time-windowed statistics, persists the rollups,
//! raises rate-limited anomaly alerts and fans live updates out to dashboard
//! subscribers.
//!
//! ## Architecture
//!
//! - **Producer side**: [`producer::Machine`] batches samples and scores
//!   fault windows; [`link`] keeps a permanent registered connection to the
//!   server and downsamples waveforms.
//! - **Ingest**: [`ingest`] runs the TCP listener on its own thread and hands
//!   decoded events to the aggregation task over the bridge channel.
//! - **Aggregation**: [`pipeline`] folds samples into minute and hour stats and
//!   cascades hour/day/month/year rollups into the [`storage`] layer.
//! - **Fan-out**: [`fanout`] keeps one namespace per connected machine with
//!   replay buffers for late subscribers; [`api`] serves it over WebSocket.

pub mod api;
pub mod config;
pub mod fanout;
pub mod ingest;
pub mod link;
pub mod notify;
pub mod pipeline;
pub mod producer;
pub mod protocol;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::{MonitorConfig, ProducerConfig};

// Re-export commonly used types
pub use types::{
    ConnectionId, DataUpdate, FaultReport, MachineEvent, MachineEventKind, MinuteUpdate,
    ProducerEvent, SensorSamples,
};

// Re-export pipeline entry points
pub use pipeline::{AggregationEngine, AggregationLoop, Clock, ManualClock, SystemClock};

// Re-export storage
pub use storage::{MemoryStore, RollupStore, SledStore, StoreError};
