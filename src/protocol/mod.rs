//! Wire Protocol
//!
//! Envelopes are JSON `[event_name, payload]` arrays terminated by
//! [`FRAME_SEPARATOR`](crate::config::defaults::FRAME_SEPARATOR). Compact JSON
//! never contains a raw newline, so the separator cannot occur inside a frame.

pub mod codec;
pub mod envelope;

pub use codec::{CodecError, EnvelopeCodec};
pub use envelope::{Envelope, EnvelopeError, REGISTER_EVENT};

use std::time::Duration;
use tokio::net::TcpStream;

/// Enable TCP keepalive (30 s idle, 10 s interval) and disable Nagle on a
/// protocol socket so dead peers are noticed.
pub fn tune_socket(stream: &TcpStream) -> std::io::Result<()> {
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));
    socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    stream.set_nodelay(true)
}
