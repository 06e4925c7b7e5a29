//! Producer-side machine aggregator.
//!
//! A [`Machine`] receives raw per-sensor batches from an acquisition source,
//! forwards them as `DataUpdate` events, accumulates per-sensor scoring
//! batches and emits one `FaultDetect` event per completed scoring round.
//! Event consumers register as [`EventHandler`]s; every handler call runs as
//! its own task and a failing handler never blocks the others.

pub mod scoring;
pub mod sender;

pub use scoring::{AnomalyScorer, MetadataModelLoader, ModelError, ModelLoader, ZScoreModel};
pub use sender::DataSender;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::MachineConfig;
use crate::types::{FaultReport, ProducerEvent};

/// Consumer of producer events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &ProducerEvent) -> anyhow::Result<()>;

    fn name(&self) -> &str;
}

struct FaultDetector {
    scorers: BTreeMap<String, Box<dyn AnomalyScorer>>,
    batches: BTreeMap<String, Vec<f64>>,
    threshold: f64,
}

impl FaultDetector {
    /// Feed one update. Returns a report once every sensor present in the
    /// update has at least a full window buffered. An empty update never
    /// completes a round.
    ///
    /// Sensors absent from the update do not hold the round back; at scoring
    /// time every configured sensor is scored over whatever it has buffered.
    fn observe(&mut self, present: &BTreeMap<String, Vec<f64>>) -> Option<FaultReport> {
        let mut complete = !present.is_empty();
        for (sensor, data) in present {
            let Some(scorer) = self.scorers.get(sensor) else {
                continue;
            };
            let batch = self.batches.entry(sensor.clone()).or_default();
            if batch.len() < scorer.window_len() {
                batch.extend_from_slice(data);
                complete = false;
            }
        }
        if !complete {
            return None;
        }

        let mut score = 0.0;
        for (sensor, scorer) in &self.scorers {
            let batch = self.batches.get(sensor).map_or(&[][..], Vec::as_slice);
            let end = batch.len().min(scorer.window_len());
            score += scorer.score(&batch[..end]);
        }
        for batch in self.batches.values_mut() {
            batch.clear();
        }

        Some(FaultReport {
            score,
            threshold: self.threshold,
        })
    }
}

/// One monitored machine on the producer side.
pub struct Machine {
    name: String,
    sensors: Vec<String>,
    detector: Option<FaultDetector>,
    handlers: Vec<Arc<dyn EventHandler>>,
    tasks: JoinSet<()>,
}

impl Machine {
    /// Build a machine from its configuration.
    ///
    /// Machines configured as fault-detectable load one scorer per sensor.
    /// A model load failure degrades the machine to data-only with a warning.
    pub fn new(config: &MachineConfig, loader: &dyn ModelLoader) -> Self {
        let sensors = config.sensor_names();

        let detector = if config.fault_detectable {
            match loader.load_models(&config.name, &sensors) {
                Ok(scorers) => Some(FaultDetector {
                    scorers,
                    batches: BTreeMap::new(),
                    threshold: config.fault_threshold,
                }),
                Err(e) => {
                    warn!(machine = %config.name, error = %e, "models unavailable, fault detection disabled");
                    None
                }
            }
        } else {
            None
        };

        info!(
            machine = %config.name,
            sensors = sensors.len(),
            fault_detectable = detector.is_some(),
            "machine ready"
        );

        Self {
            name: config.name.clone(),
            sensors,
            detector,
            handlers: Vec::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sensors(&self) -> &[String] {
        &self.sensors
    }

    pub fn is_fault_detectable(&self) -> bool {
        self.detector.is_some()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        debug!(machine = %self.name, handler = handler.name(), "handler registered");
        self.handlers.push(handler);
    }

    /// Remove a previously registered handler. Returns false if absent.
    pub fn remove_handler(&mut self, handler: &Arc<dyn EventHandler>) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| !Arc::ptr_eq(h, handler));
        before != self.handlers.len()
    }

    /// Process one acquisition batch.
    ///
    /// Sensors outside the configured set are ignored, and a batch with no
    /// configured sensor left emits nothing. Otherwise returns the events
    /// emitted, in order: a `DataUpdate`, then a `FaultDetect` when a
    /// scoring round completed. Must run inside a tokio runtime.
    pub fn data_update(&mut self, mut samples: BTreeMap<String, Vec<f64>>) -> Vec<ProducerEvent> {
        self.reap();
        samples.retain(|sensor, _| self.sensors.contains(sensor));
        if samples.is_empty() {
            debug!(machine = %self.name, "update carried no configured sensors");
            return Vec::new();
        }

        let report = self.detector.as_mut().and_then(|d| d.observe(&samples));

        let mut events = vec![ProducerEvent::DataUpdate(samples)];
        if let Some(report) = report {
            debug!(machine = %self.name, score = report.score, threshold = report.threshold, "scoring round complete");
            events.push(ProducerEvent::FaultDetect(report));
        }
        for event in &events {
            self.notify(event);
        }
        events
    }

    fn notify(&mut self, event: &ProducerEvent) {
        for handler in &self.handlers {
            let handler = Arc::clone(handler);
            let event = event.clone();
            let machine = self.name.clone();
            self.tasks.spawn(async move {
                if let Err(e) = handler.handle_event(&event).await {
                    warn!(
                        machine = %machine,
                        handler = handler.name(),
                        event = %event.kind(),
                        error = %e,
                        "event handler failed"
                    );
                }
            });
        }
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                error!(machine = %self.name, error = %e, "event handler task panicked");
            }
        }
    }

    /// Wait for every in-flight handler call.
    pub async fn settle(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(machine = %self.name, error = %e, "event handler task panicked");
            }
        }
    }
}
