//! The seam between the swarm core and the wire.
//!
//! The coordinator never performs I/O. Sends are fire-and-forget: a failed
//! write surfaces later as an `on_io_error` callback, never as a return
//! value. Handshaking, framing and the codec live entirely on the
//! implementor's side of these traits.

use std::net::SocketAddr;

use crate::peer::Message;

/// An established, handshake-complete connection to one remote peer.
///
/// Implementations must preserve submission order: messages handed to
/// [`PeerLink::send`] are delivered to the remote in the order they were
/// submitted.
pub trait PeerLink: Send + Sync {
    /// Queues a message for delivery. Failures surface asynchronously via
    /// the transport's `on_io_error` callback.
    fn send(&self, message: Message);

    /// Tears the connection down. The transport reports the resulting
    /// disconnect through its usual callback path.
    fn close(&self);
}

/// Outbound connection service.
///
/// [`Transport::connect`] only kicks off a dial; the outcome arrives later
/// as either `on_handshake_complete` (with the new [`PeerLink`]) or
/// `on_connection_failed`.
pub trait Transport: Send + Sync {
    fn connect(&self, addr: SocketAddr);
}
