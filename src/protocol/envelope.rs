//! Envelope: the `(event_name, payload)` pair exchanged on the wire.
//!
//! Encoded as a compact JSON two-element array:
//!
//! ```text
//! ["name", "press-01"]
//! ["DataUpdate", {"vib1": {"type": "VIB", "data": [0.1, 0.2]}}]
//! ["FaultDetect", {"score": 12.0, "threshold": 10.0}]
//! ```

use serde_json::Value;
use thiserror::Error;

use crate::types::{DataUpdate, FaultReport, MachineEvent, MachineEventKind};

/// Wire event name of the registration envelope.
pub const REGISTER_EVENT: &str = "name";

/// Decode failures. Each is scoped to one frame; the connection survives.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("frame is not an [event_name, payload] pair: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("invalid {event} payload: {source}")]
    InvalidPayload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("undefined event: {0}")]
    UndefinedEvent(String),

    #[error("frame exceeds {max} bytes")]
    FrameTooLong { max: usize },

    #[error("stream ended inside a {0}-byte frame")]
    TruncatedFrame(usize),
}

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Binds the connection to a machine name
    Register(String),
    /// A data event from the registered machine
    Event(MachineEvent),
}

impl Envelope {
    pub fn register(name: impl Into<String>) -> Self {
        Envelope::Register(name.into())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Envelope::Register(_) => REGISTER_EVENT,
            Envelope::Event(event) => event.kind().as_str(),
        }
    }

    /// Serialize to the JSON array form, without separator.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let name = self.event_name();
        match self {
            Envelope::Register(machine) => serde_json::to_vec(&(name, machine)),
            Envelope::Event(MachineEvent::DataUpdate(update)) => serde_json::to_vec(&(name, update)),
            Envelope::Event(MachineEvent::FaultDetect(report)) => serde_json::to_vec(&(name, report)),
        }
    }

    /// Parse one frame (separator already stripped).
    pub fn from_json(frame: &[u8]) -> Result<Self, EnvelopeError> {
        let (name, payload): (String, Value) =
            serde_json::from_slice(frame).map_err(EnvelopeError::Malformed)?;

        match name.as_str() {
            REGISTER_EVENT => serde_json::from_value::<String>(payload)
                .map(Envelope::Register)
                .map_err(|source| EnvelopeError::InvalidPayload {
                    event: REGISTER_EVENT,
                    source,
                }),
            "DataUpdate" => serde_json::from_value::<DataUpdate>(payload)
                .map(|u| Envelope::Event(MachineEvent::DataUpdate(u)))
                .map_err(|source| EnvelopeError::InvalidPayload {
                    event: MachineEventKind::DataUpdate.as_str(),
                    source,
                }),
            "FaultDetect" => serde_json::from_value::<FaultReport>(payload)
                .map(|r| Envelope::Event(MachineEvent::FaultDetect(r)))
                .map_err(|source| EnvelopeError::InvalidPayload {
                    event: MachineEventKind::FaultDetect.as_str(),
                    source,
                }),
            _ => Err(EnvelopeError::UndefinedEvent(name)),
        }
    }
}

impl From<MachineEvent> for Envelope {
    fn from(event: MachineEvent) -> Self {
        Envelope::Event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorSamples;

    #[test]
    fn test_register_wire_form() {
        let bytes = Envelope::register("M1").to_json().unwrap();
        assert_eq!(bytes, br#"["name","M1"]"#);
        assert_eq!(Envelope::from_json(&bytes).unwrap(), Envelope::register("M1"));
    }

    #[test]
    fn test_data_update_without_type() {
        let env = Envelope::from_json(br#"["DataUpdate",{"vib1":{"data":[4,5]}}]"#).unwrap();
        let Envelope::Event(MachineEvent::DataUpdate(update)) = env else {
            panic!("expected DataUpdate, got {env:?}");
        };
        assert_eq!(update["vib1"].sensor_type, None);
        assert_eq!(update["vib1"].data, vec![4.0, 5.0]);
    }

    #[test]
    fn test_data_update_encodes_type() {
        let mut update = DataUpdate::new();
        update.insert("vib1".into(), SensorSamples::new("VIB", vec![1.0, 2.0]));
        let env = Envelope::from(MachineEvent::DataUpdate(update));
        assert_eq!(
            String::from_utf8(env.to_json().unwrap()).unwrap(),
            r#"["DataUpdate",{"vib1":{"type":"VIB","data":[1.0,2.0]}}]"#
        );
    }

    #[test]
    fn test_unknown_event_name() {
        let err = Envelope::from_json(br#"["Reboot",{}]"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::UndefinedEvent(ref n) if n == "Reboot"));
    }

    #[test]
    fn test_bad_payload_and_bad_shape() {
        assert!(matches!(
            Envelope::from_json(br#"["FaultDetect",{"score":"high"}]"#),
            Err(EnvelopeError::InvalidPayload { event: "FaultDetect", .. })
        ));
        assert!(matches!(
            Envelope::from_json(br#"{"event":"name"}"#),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::from_json(b"not json"),
            Err(EnvelopeError::Malformed(_))
        ));
    }
}
