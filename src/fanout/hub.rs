//! Namespace registry owned by the aggregation task, plus the command handle
//! HTTP handlers use to reach it.

use anyhow::{Context, Result};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::namespace::Namespace;
use super::{FanoutEvent, Subscription};
use crate::config::{defaults, FanoutConfig};
use crate::types::{ConnectionId, FaultReport, MinuteUpdate};

// ============================================================================
// Commands
// ============================================================================

/// Requests from outside the aggregation task.
#[derive(Debug)]
pub enum HubCommand {
    /// Join a machine namespace. `None` if the machine is not connected.
    Subscribe {
        machine: String,
        response_tx: oneshot::Sender<Option<Subscription>>,
    },
    /// Current `initialize` payload of a namespace
    Snapshot {
        machine: String,
        response_tx: oneshot::Sender<Option<FanoutEvent>>,
    },
    /// Names of currently connected machines
    ListMachines {
        response_tx: oneshot::Sender<Vec<String>>,
    },
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to interact with the fan-out hub
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Create a handle and the receiver the aggregation loop drains.
    pub fn channel() -> (Self, mpsc::Receiver<HubCommand>) {
        let (tx, rx) = mpsc::channel(defaults::HUB_COMMAND_CAPACITY);
        (Self { tx }, rx)
    }

    pub async fn subscribe(&self, machine: &str) -> Result<Option<Subscription>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Subscribe {
                machine: machine.to_string(),
                response_tx,
            })
            .await
            .context("Fan-out hub channel closed")?;
        response_rx.await.context("Response channel closed")
    }

    pub async fn snapshot(&self, machine: &str) -> Result<Option<FanoutEvent>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Snapshot {
                machine: machine.to_string(),
                response_tx,
            })
            .await
            .context("Fan-out hub channel closed")?;
        response_rx.await.context("Response channel closed")
    }

    pub async fn list_machines(&self) -> Result<Vec<String>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(HubCommand::ListMachines { response_tx })
            .await
            .context("Fan-out hub channel closed")?;
        response_rx.await.context("Response channel closed")
    }
}

// ============================================================================
// Hub
// ============================================================================

/// Registry of open namespaces, one per connected machine.
///
/// Not shared: it lives inside the aggregation engine and is only mutated from
/// the aggregation task.
pub struct FanoutHub {
    namespaces: HashMap<String, Namespace>,
    config: FanoutConfig,
}

impl FanoutHub {
    pub fn new(config: FanoutConfig) -> Self {
        Self {
            namespaces: HashMap::new(),
            config,
        }
    }

    /// Open the namespace for `machine`, owned by `conn`.
    ///
    /// A machine that reconnects before its old connection is reaped keeps its
    /// namespace, replay buffers and subscribers; ownership moves to `conn`.
    pub fn open(&mut self, machine: &str, conn: ConnectionId) {
        if let Some(ns) = self.namespaces.get_mut(machine) {
            debug!(machine, previous = %ns.owner(), owner = %conn, "Namespace taken over");
            ns.set_owner(conn);
            return;
        }
        info!(machine, owner = %conn, "Namespace opened");
        self.namespaces.insert(
            machine.to_string(),
            Namespace::new(
                machine,
                conn,
                self.config.replay_capacity,
                self.config.channel_capacity,
            ),
        );
    }

    /// Close the namespace if `conn` still owns it. Returns whether it closed.
    ///
    /// Dropping the namespace drops its broadcast sender, which ends every
    /// subscriber stream.
    pub fn close(&mut self, machine: &str, conn: ConnectionId) -> bool {
        match self.namespaces.get(machine) {
            Some(ns) if ns.owner() == conn => {
                self.namespaces.remove(machine);
                info!(machine, owner = %conn, "Namespace closed");
                true
            }
            Some(ns) => {
                debug!(machine, owner = %ns.owner(), stale = %conn, "Ignoring disconnect from stale connection");
                false
            }
            None => false,
        }
    }

    pub fn owner(&self, machine: &str) -> Option<ConnectionId> {
        self.namespaces.get(machine).map(Namespace::owner)
    }

    pub fn contains(&self, machine: &str) -> bool {
        self.namespaces.contains_key(machine)
    }

    pub fn publish_update(&mut self, machine: &str, update: MinuteUpdate) {
        if let Some(ns) = self.namespaces.get_mut(machine) {
            ns.publish_update(update);
        }
    }

    pub fn publish_anomaly(&self, machine: &str, report: FaultReport) {
        if let Some(ns) = self.namespaces.get(machine) {
            ns.publish_anomaly(report);
        }
    }

    pub fn subscribe(&self, machine: &str) -> Option<Subscription> {
        self.namespaces.get(machine).map(Namespace::subscribe)
    }

    pub fn snapshot(&self, machine: &str) -> Option<FanoutEvent> {
        self.namespaces.get(machine).map(Namespace::initialize)
    }

    pub fn namespace(&self, machine: &str) -> Option<&Namespace> {
        self.namespaces.get(machine)
    }

    /// Connected machine names, sorted.
    pub fn machines(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    /// Answer one command. Dropped reply channels are ignored.
    pub fn handle_command(&self, cmd: HubCommand) {
        match cmd {
            HubCommand::Subscribe { machine, response_tx } => {
                let _ = response_tx.send(self.subscribe(&machine));
            }
            HubCommand::Snapshot { machine, response_tx } => {
                let _ = response_tx.send(self.snapshot(&machine));
            }
            HubCommand::ListMachines { response_tx } => {
                let _ = response_tx.send(self.machines());
            }
        }
    }
}
