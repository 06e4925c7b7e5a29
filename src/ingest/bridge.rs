//! Bridge channel between the isolated listener and the aggregation task.
//!
//! An unbounded, ordered mpsc queue. `None` on the queue is the shutdown
//! sentinel: the reader returns `None` from [`BridgeReceiver::recv`] from then
//! on. Messages from one connection keep their order; messages from different
//! connections interleave in arrival order.

use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{ConnectionId, MachineEvent, MachineEventKind};

/// Channel-level event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    Connect,
    Disconnect,
    DataUpdate,
}

impl ChannelEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelEvent::Connect => "CONNECT",
            ChannelEvent::Disconnect => "DISCONNECT",
            ChannelEvent::DataUpdate => "DATA_UPDATE",
        }
    }
}

impl fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message crossing the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// A connection was accepted (`machine: None`) or bound to a machine name
    Connect {
        conn: ConnectionId,
        machine: Option<String>,
    },
    /// A connection ended. `machine` is the name it was bound to, if any.
    Disconnect {
        conn: ConnectionId,
        machine: Option<String>,
    },
    /// A decoded data event from a registered connection
    Data {
        conn: ConnectionId,
        machine: String,
        event: MachineEvent,
    },
}

impl BridgeEvent {
    pub fn channel_event(&self) -> ChannelEvent {
        match self {
            BridgeEvent::Connect { .. } => ChannelEvent::Connect,
            BridgeEvent::Disconnect { .. } => ChannelEvent::Disconnect,
            BridgeEvent::Data { .. } => ChannelEvent::DataUpdate,
        }
    }

    pub fn machine(&self) -> Option<&str> {
        match self {
            BridgeEvent::Connect { machine, .. } | BridgeEvent::Disconnect { machine, .. } => {
                machine.as_deref()
            }
            BridgeEvent::Data { machine, .. } => Some(machine),
        }
    }

    pub fn data_event(&self) -> Option<MachineEventKind> {
        match self {
            BridgeEvent::Data { event, .. } => Some(event.kind()),
            _ => None,
        }
    }

    pub fn conn(&self) -> ConnectionId {
        match self {
            BridgeEvent::Connect { conn, .. }
            | BridgeEvent::Disconnect { conn, .. }
            | BridgeEvent::Data { conn, .. } => *conn,
        }
    }
}

/// The reader is gone or the bridge was already closed.
#[derive(Debug, Error)]
#[error("bridge channel closed")]
pub struct BridgeClosed;

/// Write end, held by the listener.
#[derive(Clone)]
pub struct BridgeSender {
    tx: mpsc::UnboundedSender<Option<BridgeEvent>>,
}

impl BridgeSender {
    pub fn send(&self, event: BridgeEvent) -> Result<(), BridgeClosed> {
        self.tx.send(Some(event)).map_err(|_| BridgeClosed)
    }

    /// Push the shutdown sentinel.
    pub fn close(&self) -> Result<(), BridgeClosed> {
        self.tx.send(None).map_err(|_| BridgeClosed)
    }
}

/// Read end, held by the aggregation loop.
pub struct BridgeReceiver {
    rx: mpsc::UnboundedReceiver<Option<BridgeEvent>>,
    closed: bool,
}

impl BridgeReceiver {
    /// Next event, or `None` once the sentinel arrived or every writer is gone.
    pub async fn recv(&mut self) -> Option<BridgeEvent> {
        if self.closed {
            return None;
        }
        match self.rx.recv().await {
            Some(Some(event)) => Some(event),
            Some(None) | None => {
                self.closed = true;
                self.rx.close();
                None
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

pub fn bridge() -> (BridgeSender, BridgeReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BridgeSender { tx }, BridgeReceiver { rx, closed: false })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FaultReport;

    #[tokio::test]
    async fn test_fifo_then_sentinel() {
        let (tx, mut rx) = bridge();
        for i in 0..3 {
            tx.send(BridgeEvent::Connect { conn: ConnectionId(i), machine: None }).unwrap();
        }
        tx.close().unwrap();
        tx.send(BridgeEvent::Connect { conn: ConnectionId(9), machine: None }).unwrap();

        for i in 0..3 {
            assert_eq!(rx.recv().await.unwrap().conn(), ConnectionId(i));
        }
        assert!(rx.recv().await.is_none());
        assert!(rx.is_closed());
        // events after the sentinel are never delivered
        assert!(rx.recv().await.is_none());
        assert!(tx.send(BridgeEvent::Connect { conn: ConnectionId(10), machine: None }).is_err());
    }

    #[tokio::test]
    async fn test_dropped_writers_end_stream() {
        let (tx, mut rx) = bridge();
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_tuple_view() {
        let event = BridgeEvent::Data {
            conn: ConnectionId(1),
            machine: "M1".into(),
            event: MachineEvent::FaultDetect(FaultReport { score: 1.0, threshold: 2.0 }),
        };
        assert_eq!(event.channel_event().as_str(), "DATA_UPDATE");
        assert_eq!(event.machine(), Some("M1"));
        assert_eq!(event.data_event(), Some(MachineEventKind::FaultDetect));

        let event = BridgeEvent::Disconnect { conn: ConnectionId(1), machine: None };
        assert_eq!(event.channel_event(), ChannelEvent::Disconnect);
        assert_eq!(event.machine(), None);
        assert_eq!(event.data_event(), None);
    }
}
