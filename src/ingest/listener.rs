//! Ingest listener: accepts machine connections on its own OS thread.
//!
//! The listener runs a current-thread tokio runtime on a dedicated thread so
//! socket I/O never competes with the aggregation task. Each connection is
//! decoded with [`EnvelopeCodec`] and forwarded to the bridge as
//! [`BridgeEvent`]s:
//!
//! ```text
//! accept        -> CONNECT(conn, None)
//! ["name", M]   -> CONNECT(conn, M)
//! data envelope -> DATA_UPDATE(conn, M, event)
//! EOF / error   -> DISCONNECT(conn, M)
//! ```
//!
//! On cancellation the listener stops accepting, closes every connection,
//! then pushes the bridge sentinel.

use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bridge::{BridgeEvent, BridgeSender};
use crate::protocol::{tune_socket, Envelope, EnvelopeCodec};
use crate::types::ConnectionId;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start listener thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Running listener thread.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    thread: std::thread::JoinHandle<()>,
}

impl ListenerHandle {
    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block until the listener thread exits.
    pub fn join(self) {
        if self.thread.join().is_err() {
            error!("[Listener] thread panicked");
        }
    }
}

/// Bind `addr` and start the listener thread.
///
/// Binding happens on the caller's thread so configuration errors surface
/// immediately.
pub fn spawn_listener(
    addr: &str,
    max_frame_bytes: usize,
    bridge: BridgeSender,
    cancel: CancellationToken,
) -> Result<ListenerHandle, ListenerError> {
    let bind_err = |source| ListenerError::Bind {
        addr: addr.to_string(),
        source,
    };
    let std_listener = std::net::TcpListener::bind(addr).map_err(bind_err)?;
    std_listener.set_nonblocking(true).map_err(bind_err)?;
    let local_addr = std_listener.local_addr().map_err(bind_err)?;

    let thread = std::thread::Builder::new()
        .name("ingest-listener".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("[Listener] failed to build runtime: {}", e);
                    let _ = bridge.close();
                    return;
                }
            };
            runtime.block_on(async move {
                match TcpListener::from_std(std_listener) {
                    Ok(listener) => accept_loop(listener, max_frame_bytes, &bridge, cancel).await,
                    Err(e) => error!("[Listener] failed to register socket: {}", e),
                }
                if bridge.close().is_err() {
                    debug!("[Listener] bridge reader already gone");
                }
            });
        })
        .map_err(ListenerError::Spawn)?;

    info!("[Listener] accepting machine connections on {}", local_addr);
    Ok(ListenerHandle { local_addr, thread })
}

async fn accept_loop(
    listener: TcpListener,
    max_frame_bytes: usize,
    bridge: &BridgeSender,
    cancel: CancellationToken,
) {
    let next_id = Arc::new(AtomicU64::new(1));
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let conn = ConnectionId(next_id.fetch_add(1, Ordering::Relaxed));
                    let bridge = bridge.clone();
                    let cancel = cancel.clone();
                    connections.spawn(async move {
                        handle_connection(stream, peer, conn, max_frame_bytes, bridge, cancel).await;
                    });
                }
                Err(e) => {
                    warn!("[Listener] accept failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            },
            Some(done) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = done {
                    error!("[Listener] connection task failed: {}", e);
                }
            }
        }
    }

    info!("[Listener] shutting down, closing {} connection(s)", connections.len());
    while let Some(done) = connections.join_next().await {
        if let Err(e) = done {
            error!("[Listener] connection task failed: {}", e);
        }
    }
}

/// Read one connection to completion.
///
/// Decode failures are logged and skipped; only transport failure, EOF or
/// cancellation end the connection.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    conn: ConnectionId,
    max_frame_bytes: usize,
    bridge: BridgeSender,
    cancel: CancellationToken,
) {
    if let Err(e) = tune_socket(&stream) {
        debug!(%conn, error = %e, "[Listener] failed to set socket options");
    }
    info!(%conn, %peer, "[Listener] connection accepted");
    if bridge.send(BridgeEvent::Connect { conn, machine: None }).is_err() {
        return;
    }

    let mut frames = FramedRead::new(stream, EnvelopeCodec::new(max_frame_bytes));
    let mut machine: Option<String> = None;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.next() => frame,
        };

        let envelope = match frame {
            None => break,
            Some(Err(e)) => {
                info!(%conn, machine = ?machine, error = %e, "[Listener] transport failure");
                break;
            }
            Some(Ok(Err(e))) => {
                warn!(%conn, machine = ?machine, error = %e, "[Listener] dropping undecodable envelope");
                continue;
            }
            Some(Ok(Ok(envelope))) => envelope,
        };

        let sent = match envelope {
            Envelope::Register(name) if machine.as_deref() == Some(name.as_str()) => Ok(()),
            Envelope::Register(name) => {
                if let Some(previous) = machine.take() {
                    warn!(%conn, from = %previous, to = %name, "[Listener] connection re-registered under a new name");
                    let _ = bridge.send(BridgeEvent::Disconnect {
                        conn,
                        machine: Some(previous),
                    });
                }
                info!(%conn, machine = %name, "[Listener] machine registered");
                machine = Some(name.clone());
                bridge.send(BridgeEvent::Connect {
                    conn,
                    machine: Some(name),
                })
            }
            Envelope::Event(event) => match &machine {
                Some(name) => bridge.send(BridgeEvent::Data {
                    conn,
                    machine: name.clone(),
                    event,
                }),
                None => {
                    warn!(%conn, event = %event.kind(), "[Listener] data before registration, dropping");
                    Ok(())
                }
            },
        };

        if sent.is_err() {
            debug!(%conn, "[Listener] bridge closed, dropping connection");
            return;
        }
    }

    info!(%conn, machine = ?machine, "[Listener] connection closed");
    let _ = bridge.send(BridgeEvent::Disconnect { conn, machine });
}
