use std::net::SocketAddr;

use tokio::sync::broadcast;

use crate::swarm::Lifecycle;

/// A tagged notification record pushed to swarm subscribers.
///
/// Events are delivered through a broadcast channel after the swarm lock
/// has been released; subscriber code never runs inside the coordinator's
/// critical sections. A lagging subscriber loses old events, never
/// correctness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmEvent {
    /// The coordinator moved through its lifecycle state machine.
    StateChanged(Lifecycle),
    /// A remote completed its handshake and is now exchanging data.
    PeerConnected { addr: SocketAddr },
    /// A remote went away; its pieces no longer count toward availability.
    PeerDisconnected { addr: SocketAddr },
    /// A piece arrived and validated.
    PieceCompleted { index: u32 },
    /// A piece arrived but failed validation and was released for retry.
    PieceRejected { index: u32 },
    /// Every piece is downloaded and validated; the torrent is seeding.
    Finished,
}

/// Fan-out point for [`SwarmEvent`]s.
pub(crate) struct EventBus {
    tx: broadcast::Sender<SwarmEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.tx.subscribe()
    }

    // A send with no live subscribers is not an error.
    pub(crate) fn emit(&self, event: SwarmEvent) {
        let _ = self.tx.send(event);
    }
}
