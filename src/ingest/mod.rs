//! Machine Ingest
//!
//! The isolated TCP listener and the bridge channel that carries its decoded
//! events to the aggregation task.

pub mod bridge;
pub mod listener;

pub use bridge::{bridge, BridgeClosed, BridgeEvent, BridgeReceiver, BridgeSender, ChannelEvent};
pub use listener::{spawn_listener, ListenerError, ListenerHandle};
