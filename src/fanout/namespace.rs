//! One machine's publish/subscribe channel.

use std::collections::BTreeMap;
use tokio::sync::broadcast;

use super::replay::ReplayBuffer;
use super::{FanoutEvent, Subscription};
use crate::types::{ConnectionId, FaultReport, MinuteUpdate};

/// Live channel for one connected machine.
///
/// Holds one replay buffer per sensor and a broadcast sender. Each subscriber
/// owns its own receiver, so a slow or failed subscriber never blocks the
/// others.
pub struct Namespace {
    machine: String,
    owner: ConnectionId,
    replay: BTreeMap<String, ReplayBuffer<MinuteUpdate>>,
    replay_capacity: usize,
    tx: broadcast::Sender<FanoutEvent>,
}

impl Namespace {
    pub fn new(
        machine: impl Into<String>,
        owner: ConnectionId,
        replay_capacity: usize,
        channel_capacity: usize,
    ) -> Self {
        let (tx, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            machine: machine.into(),
            owner,
            replay: BTreeMap::new(),
            replay_capacity,
            tx,
        }
    }

    pub fn machine(&self) -> &str {
        &self.machine
    }

    pub fn owner(&self) -> ConnectionId {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: ConnectionId) {
        self.owner = owner;
    }

    /// Buffer the update for replay, then broadcast it.
    pub fn publish_update(&mut self, update: MinuteUpdate) {
        let capacity = self.replay_capacity;
        self.replay
            .entry(update.sensor_name.clone())
            .or_insert_with(|| ReplayBuffer::new(capacity))
            .push(update.clone());
        self.broadcast(FanoutEvent::Update(update));
    }

    /// Broadcast an anomaly. Anomalies are not replayed.
    pub fn publish_anomaly(&self, report: FaultReport) {
        self.broadcast(FanoutEvent::Anomaly(report));
    }

    fn broadcast(&self, event: FanoutEvent) {
        // no receivers is not an error: nobody is watching this machine yet
        if let Ok(receivers) = self.tx.send(event) {
            tracing::trace!(machine = %self.machine, receivers, "broadcast");
        }
    }

    /// Current replay contents, one array per sensor ordered by sensor name.
    pub fn initialize(&self) -> FanoutEvent {
        FanoutEvent::Initialize(self.replay.values().map(ReplayBuffer::snapshot).collect())
    }

    /// Join the namespace: the replay snapshot plus a live receiver.
    ///
    /// Both are taken together on the owning task so no update falls between
    /// the snapshot and the first received event.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            initialize: self.initialize(),
            events: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn replay_len(&self, sensor: &str) -> usize {
        self.replay.get(sensor).map_or(0, ReplayBuffer::len)
    }
}
