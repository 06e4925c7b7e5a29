//! Separator-delimited envelope framing for `tokio_util::codec`.
//!
//! A decode failure is returned as an item (`Ok(Some(Err(..)))`), never as a
//! stream error, so `FramedRead` keeps reading after a bad frame. Only I/O
//! errors end the stream.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::envelope::{Envelope, EnvelopeError};
use crate::config::defaults::{FRAME_SEPARATOR, MAX_FRAME_BYTES};

/// Transport-level codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_frame_bytes: usize,
    /// Where to resume the separator scan in the buffer
    next_index: usize,
    /// Dropping the rest of an oversized frame
    discarding: bool,
}

impl EnvelopeCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            next_index: 0,
            discarding: false,
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_BYTES)
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Result<Envelope, EnvelopeError>;
    type Error = CodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let read_to = buf.len().min(self.max_frame_bytes.saturating_add(1));
            let found = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == FRAME_SEPARATOR)
                .map(|offset| self.next_index + offset);

            match (self.discarding, found) {
                (true, Some(idx)) => {
                    buf.advance(idx + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(idx)) => {
                    let frame = buf.split_to(idx + 1);
                    self.next_index = 0;
                    let frame = &frame[..idx];
                    if frame.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Ok(Some(Envelope::from_json(frame)));
                }
                (false, None) if buf.len() > self.max_frame_bytes => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    self.discarding = true;
                    return Ok(Some(Err(EnvelopeError::FrameTooLong {
                        max: self.max_frame_bytes,
                    })));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(buf)? {
            return Ok(Some(item));
        }
        let leftover = buf.len();
        let blank = buf.iter().all(u8::is_ascii_whitespace);
        buf.clear();
        self.next_index = 0;
        if std::mem::take(&mut self.discarding) || blank {
            return Ok(None);
        }
        Ok(Some(Err(EnvelopeError::TruncatedFrame(leftover))))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = CodecError;

    fn encode(&mut self, envelope: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = envelope.to_json()?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(FRAME_SEPARATOR);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FaultReport, MachineEvent};

    fn decode_all(codec: &mut EnvelopeCodec, buf: &mut BytesMut) -> Vec<Result<Envelope, EnvelopeError>> {
        let mut out = Vec::new();
        while let Some(item) = codec.decode(buf).unwrap() {
            out.push(item);
        }
        out
    }

    #[test]
    fn test_encode_appends_separator() {
        let mut codec = EnvelopeCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Envelope::register("M1"), &mut buf).unwrap();
        assert_eq!(&buf[..], b"[\"name\",\"M1\"]\n");
    }

    #[test]
    fn test_split_reads_reassemble() {
        let mut codec = EnvelopeCodec::default();
        let mut buf = BytesMut::from(&b"[\"FaultDetect\",{\"score\":12"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b",\"threshold\":10}]\n[\"name\",\"M");
        let env = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(
            env,
            Envelope::Event(MachineEvent::FaultDetect(FaultReport { score: 12.0, threshold: 10.0 }))
        );
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"2\"]\n");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap(), Envelope::register("M2"));
    }

    #[test]
    fn test_bad_frame_does_not_poison_stream() {
        let mut codec = EnvelopeCodec::default();
        let mut buf = BytesMut::from(&b"garbage\n[\"Nope\",1]\n\n[\"name\",\"M1\"]\n"[..]);
        let items = decode_all(&mut codec, &mut buf);
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], Err(EnvelopeError::Malformed(_))));
        assert!(matches!(items[1], Err(EnvelopeError::UndefinedEvent(_))));
        assert_eq!(items[2].as_ref().unwrap(), &Envelope::register("M1"));
    }

    #[test]
    fn test_oversized_frame_is_discarded() {
        let mut codec = EnvelopeCodec::new(16);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[b'x'; 40]);
        let items = decode_all(&mut codec, &mut buf);
        assert!(matches!(items[..], [Err(EnvelopeError::FrameTooLong { max: 16 })]));

        // tail of the oversized frame, then a good one
        buf.extend_from_slice(b"yyyy\n[\"name\",\"M1\"]\n");
        let items = decode_all(&mut codec, &mut buf);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), &Envelope::register("M1"));
    }

    #[test]
    fn test_eof_inside_frame() {
        let mut codec = EnvelopeCodec::default();
        let mut buf = BytesMut::from(&b"[\"name\",\"M1\"]\n[\"name\""[..]);
        assert!(codec.decode_eof(&mut buf).unwrap().unwrap().is_ok());
        assert!(matches!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Err(EnvelopeError::TruncatedFrame(7)))
        ));
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }
}
