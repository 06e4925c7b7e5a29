//! Core domain types shared across the ingest, aggregation and fan-out stages.
//!
//! ## Event flow
//!
//! ```text
//! Machine (producer) --ProducerEvent--> DataSender --Envelope--> Ingest Listener
//!     --BridgeEvent--> Aggregation Engine --FanoutEvent--> dashboard subscribers
//! ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Sensor Samples
// ============================================================================

/// One sensor's contribution to a `DataUpdate`: its declared type and an
/// ordered batch of sample values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSamples {
    /// Declared sensor type (`VIB`, `TEMP`, ...). Selects the reduction mode
    /// on the server. Optional on decode; only the first sighting matters.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub sensor_type: Option<String>,

    /// Sample values in acquisition order
    pub data: Vec<f64>,
}

impl SensorSamples {
    pub fn new(sensor_type: impl Into<String>, data: Vec<f64>) -> Self {
        Self {
            sensor_type: Some(sensor_type.into()),
            data,
        }
    }
}

/// Wire payload of a `DataUpdate`: sensor name -> samples.
pub type DataUpdate = BTreeMap<String, SensorSamples>;

/// Payload of a `FaultDetect` event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaultReport {
    /// Summed anomaly score across all configured sensors
    pub score: f64,
    /// Machine alert threshold
    pub threshold: f64,
}

impl FaultReport {
    /// True when the score strictly exceeds the threshold.
    pub fn is_anomalous(&self) -> bool {
        self.score > self.threshold
    }
}

// ============================================================================
// Machine Events
// ============================================================================

/// The two data event kinds a machine emits over the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineEvent {
    DataUpdate(DataUpdate),
    FaultDetect(FaultReport),
}

impl MachineEvent {
    pub fn kind(&self) -> MachineEventKind {
        match self {
            MachineEvent::DataUpdate(_) => MachineEventKind::DataUpdate,
            MachineEvent::FaultDetect(_) => MachineEventKind::FaultDetect,
        }
    }
}

/// Discriminant of [`MachineEvent`], also used as the wire event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineEventKind {
    DataUpdate,
    FaultDetect,
}

impl MachineEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineEventKind::DataUpdate => "DataUpdate",
            MachineEventKind::FaultDetect => "FaultDetect",
        }
    }
}

impl fmt::Display for MachineEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events raised by the producer-side aggregator before wire conversion.
///
/// `DataUpdate` carries raw per-sensor samples; the sensor type and
/// downsampling are applied by the sending handler.
#[derive(Debug, Clone, PartialEq)]
pub enum ProducerEvent {
    DataUpdate(BTreeMap<String, Vec<f64>>),
    FaultDetect(FaultReport),
}

impl ProducerEvent {
    pub fn kind(&self) -> MachineEventKind {
        match self {
            ProducerEvent::DataUpdate(_) => MachineEventKind::DataUpdate,
            ProducerEvent::FaultDetect(_) => MachineEventKind::FaultDetect,
        }
    }
}

// ============================================================================
// Live Updates
// ============================================================================

/// Per-minute average for one sensor, as broadcast to dashboard subscribers
/// and retained in replay buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinuteUpdate {
    pub sensor_name: String,
    pub data: f64,
    pub time: NaiveDateTime,
}

// ============================================================================
// Connections
// ============================================================================

/// Identifier assigned by the ingest listener to each accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
