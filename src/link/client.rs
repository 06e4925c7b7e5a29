//! Link client: one permanent outbound connection per machine.
//!
//! `connect()` opens the socket and immediately sends the registration
//! envelope. On any transport failure the client closes the socket, waits the
//! fixed retry timeout and reconnects, forever. Every reconnect registers
//! again so the server can re-associate the stream.
//!
//! The reconnect loop takes no cancellation token. It ends when every
//! [`LinkHandle`] is dropped or the runtime shuts down.

use futures::SinkExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, warn};

use crate::config::{defaults, LinkConfig};
use crate::protocol::{tune_socket, CodecError, Envelope, EnvelopeCodec};

const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {0} timed out")]
    Timeout(String),

    #[error("send failed: {0}")]
    Send(#[from] CodecError),

    #[error("link is not connected")]
    NotConnected,

    #[error("link queue is full")]
    QueueFull,
}

/// One established, registered connection.
pub struct LinkConnection {
    framed: FramedWrite<TcpStream, EnvelopeCodec>,
}

impl LinkConnection {
    /// Connect to `addr` and register as `machine`.
    pub async fn connect(addr: &str, machine: &str) -> Result<Self, LinkError> {
        let stream = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            TcpStream::connect(addr),
        )
        .await
        .map_err(|_| LinkError::Timeout(addr.to_string()))?
        .map_err(|source| LinkError::Connect {
            addr: addr.to_string(),
            source,
        })?;

        if let Err(e) = tune_socket(&stream) {
            debug!(addr, error = %e, "failed to set socket options");
        }

        let mut conn = Self {
            framed: FramedWrite::new(stream, EnvelopeCodec::default()),
        };
        conn.send(Envelope::register(machine)).await?;
        Ok(conn)
    }

    /// Frame and write one envelope.
    pub async fn send(&mut self, envelope: Envelope) -> Result<(), LinkError> {
        self.framed.send(envelope).await?;
        Ok(())
    }
}

/// Sending side of a running link client.
#[derive(Clone)]
pub struct LinkHandle {
    tx: mpsc::Sender<Envelope>,
    connected: Arc<AtomicBool>,
}

impl LinkHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queue an envelope, waiting while the queue is full. Envelopes offered
    /// while disconnected are dropped.
    pub async fn send(&self, envelope: Envelope) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        self.tx.send(envelope).await.map_err(|_| LinkError::NotConnected)
    }

    /// Queue an envelope without waiting.
    pub fn try_send(&self, envelope: Envelope) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        self.tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => LinkError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => LinkError::NotConnected,
        })
    }
}

/// Spawn the permanent connection loop for `machine`.
pub fn spawn_link(machine: &str, config: &LinkConfig) -> LinkHandle {
    let (tx, rx) = mpsc::channel(defaults::LINK_QUEUE_CAPACITY);
    let connected = Arc::new(AtomicBool::new(false));
    tokio::spawn(permanent_connection(
        machine.to_string(),
        config.address(),
        Duration::from_secs(config.retry_timeout_secs),
        rx,
        Arc::clone(&connected),
    ));
    LinkHandle { tx, connected }
}

async fn permanent_connection(
    machine: String,
    addr: String,
    retry_timeout: Duration,
    mut rx: mpsc::Receiver<Envelope>,
    connected: Arc<AtomicBool>,
) {
    loop {
        match LinkConnection::connect(&addr, &machine).await {
            Ok(mut conn) => {
                info!(machine = %machine, addr = %addr, "[Link] connected");
                connected.store(true, Ordering::Release);

                loop {
                    let Some(envelope) = rx.recv().await else {
                        debug!(machine = %machine, "[Link] all handles dropped, stopping");
                        connected.store(false, Ordering::Release);
                        return;
                    };
                    if let Err(e) = conn.send(envelope).await {
                        warn!(machine = %machine, error = %e, "[Link] connection lost");
                        break;
                    }
                }

                connected.store(false, Ordering::Release);
                // drop anything queued for the dead socket
                while rx.try_recv().is_ok() {}
            }
            Err(e) => {
                warn!(machine = %machine, error = %e, "[Link] connect failed");
            }
        }

        if rx.is_closed() && rx.is_empty() {
            return;
        }
        tokio::time::sleep(retry_timeout).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FaultReport, MachineEvent};
    use futures::StreamExt;
    use tokio::net::TcpListener;
    use tokio_util::codec::FramedRead;

    #[tokio::test]
    async fn test_connect_sends_registration_first() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let client = tokio::spawn(async move {
            let mut conn = LinkConnection::connect(&addr, "press-01").await.unwrap();
            conn.send(Envelope::Event(MachineEvent::FaultDetect(FaultReport {
                score: 1.0,
                threshold: 2.0,
            })))
            .await
            .unwrap();
        });

        let (stream, _) = listener.accept().await.unwrap();
        let mut frames = FramedRead::new(stream, EnvelopeCodec::default());
        assert_eq!(
            frames.next().await.unwrap().unwrap().unwrap(),
            Envelope::register("press-01")
        );
        assert!(matches!(
            frames.next().await.unwrap().unwrap().unwrap(),
            Envelope::Event(MachineEvent::FaultDetect(_))
        ));
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_registers_again() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut config = LinkConfig::new("127.0.0.1", port);
        config.retry_timeout_secs = 0;
        let handle = spawn_link("M1", &config);

        // first connection: read registration then drop the socket
        let (stream, _) = listener.accept().await.unwrap();
        let mut frames = FramedRead::new(stream, EnvelopeCodec::default());
        assert_eq!(frames.next().await.unwrap().unwrap().unwrap(), Envelope::register("M1"));
        drop(frames);

        // sends fail on the dead socket until the client notices and reconnects
        let second = tokio::spawn(async move { listener.accept().await.unwrap() });
        let report = Envelope::Event(MachineEvent::FaultDetect(FaultReport { score: 0.0, threshold: 1.0 }));
        while !second.is_finished() {
            let _ = handle.send(report.clone()).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let (stream, _) = second.await.unwrap();
        let mut frames = FramedRead::new(stream, EnvelopeCodec::default());
        assert_eq!(frames.next().await.unwrap().unwrap().unwrap(), Envelope::register("M1"));
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_dropped() {
        // nothing listens on this port
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let handle = spawn_link("M1", &LinkConfig::new("127.0.0.1", port));
        let report = Envelope::Event(MachineEvent::FaultDetect(FaultReport { score: 0.0, threshold: 1.0 }));
        assert!(matches!(handle.send(report.clone()).await, Err(LinkError::NotConnected)));
        assert!(matches!(handle.try_send(report), Err(LinkError::NotConnected)));
    }
}
