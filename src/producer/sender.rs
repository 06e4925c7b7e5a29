//! Event handler that ships producer events over a link client.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::EventHandler;
use crate::link::{downsample, LinkError, LinkHandle};
use crate::protocol::Envelope;
use crate::types::{DataUpdate, MachineEvent, ProducerEvent, SensorSamples};

/// Converts producer events to wire envelopes and queues them on a link.
///
/// Data updates gain each sensor's declared type and are downsampled to at
/// most `max_rate` samples per sensor. JSON has no NaN or infinity, so
/// non-finite samples are dropped before resampling and a non-finite fault
/// score is not sent at all.
pub struct DataSender {
    link: LinkHandle,
    sensor_types: BTreeMap<String, String>,
    max_rate: usize,
}

impl DataSender {
    pub fn new(link: LinkHandle, sensor_types: BTreeMap<String, String>, max_rate: usize) -> Self {
        Self {
            link,
            sensor_types,
            max_rate,
        }
    }

    pub fn to_envelope(&self, event: &ProducerEvent) -> Option<Envelope> {
        match event {
            ProducerEvent::DataUpdate(samples) => {
                let update: DataUpdate = samples
                    .iter()
                    .map(|(sensor, data)| {
                        let finite: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
                        if finite.len() != data.len() {
                            warn!(
                                sensor = %sensor,
                                dropped = data.len() - finite.len(),
                                "non-finite samples dropped"
                            );
                        }
                        (
                            sensor.clone(),
                            SensorSamples {
                                sensor_type: self.sensor_types.get(sensor).cloned(),
                                data: downsample(&finite, self.max_rate),
                            },
                        )
                    })
                    .collect();
                Some(Envelope::Event(MachineEvent::DataUpdate(update)))
            }
            ProducerEvent::FaultDetect(report) if !report.score.is_finite() => {
                warn!(score = report.score, "non-finite fault score not sent");
                None
            }
            ProducerEvent::FaultDetect(report) => Some(Envelope::Event(MachineEvent::FaultDetect(*report))),
        }
    }
}

#[async_trait]
impl EventHandler for DataSender {
    async fn handle_event(&self, event: &ProducerEvent) -> anyhow::Result<()> {
        let Some(envelope) = self.to_envelope(event) else {
            return Ok(());
        };
        match self.link.send(envelope).await {
            Ok(()) => Ok(()),
            Err(LinkError::NotConnected) => {
                debug!(event = %event.kind(), "link down, event dropped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        "data_sender"
    }
}
