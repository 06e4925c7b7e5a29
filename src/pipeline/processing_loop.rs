//! The single aggregation task: drains the bridge and answers hub commands.

use tokio::sync::mpsc;
use tracing::info;

use super::engine::{AggregationEngine, EngineStats};
use crate::fanout::HubCommand;
use crate::ingest::BridgeReceiver;

/// Owns the engine and its two inputs.
///
/// Built with [`new()`](AggregationLoop::new) and consumed by
/// [`run()`](AggregationLoop::run), which returns when the bridge delivers
/// its shutdown sentinel.
pub struct AggregationLoop {
    engine: AggregationEngine,
    bridge: BridgeReceiver,
    commands: mpsc::Receiver<HubCommand>,
}

impl AggregationLoop {
    pub fn new(
        engine: AggregationEngine,
        bridge: BridgeReceiver,
        commands: mpsc::Receiver<HubCommand>,
    ) -> Self {
        Self {
            engine,
            bridge,
            commands,
        }
    }

    /// Process events in arrival order until the bridge closes, then wait
    /// for in-flight store and notification tasks.
    pub async fn run(mut self) -> EngineStats {
        info!("[Aggregation] loop started");

        loop {
            tokio::select! {
                // drain bridge events before hub commands
                biased;
                event = self.bridge.recv() => match event {
                    Some(event) => self.engine.handle(event),
                    None => break,
                },
                Some(cmd) = self.commands.recv() => self.engine.hub().handle_command(cmd),
            }
            self.engine.reap();
        }

        info!(
            pending = self.engine.pending_tasks(),
            "[Aggregation] bridge closed, settling tasks"
        );
        self.engine.shutdown().await;

        let stats = self.engine.stats().clone();
        info!(
            events = stats.events,
            data_updates = stats.data_updates,
            dropped_updates = stats.dropped_updates,
            fault_detects = stats.fault_detects,
            notifications = stats.notifications,
            "[Aggregation] loop stopped"
        );
        stats
    }
}
