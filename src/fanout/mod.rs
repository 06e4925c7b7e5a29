//! Live Fan-out
//!
//! One namespace per connected machine. Dashboard subscribers join a namespace,
//! receive an `initialize` snapshot of the replay buffers, then a stream of
//! `update` and `anomaly` events.
//!
//! ## Wire shape
//!
//! ```json
//! {"event": "initialize", "data": [[{"sensor_name": "vib1", "data": 3.0, "time": "..."}]]}
//! {"event": "update", "data": {"sensor_name": "vib1", "data": 3.0, "time": "..."}}
//! {"event": "anomaly", "data": {"score": 12.0, "threshold": 10.0}}
//! ```

pub mod hub;
pub mod namespace;
pub mod replay;

pub use hub::{FanoutHub, HubCommand, HubHandle};
pub use namespace::Namespace;
pub use replay::ReplayBuffer;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{FaultReport, MinuteUpdate};

/// Event delivered to dashboard subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum FanoutEvent {
    /// Replay buffers, one array per sensor
    Initialize(Vec<Vec<MinuteUpdate>>),
    /// Per-minute average of one sensor
    Update(MinuteUpdate),
    /// Fault detection result
    Anomaly(FaultReport),
}

/// A joined namespace: the snapshot to send first, then live events.
#[derive(Debug)]
pub struct Subscription {
    pub initialize: FanoutEvent,
    pub events: broadcast::Receiver<FanoutEvent>,
}
