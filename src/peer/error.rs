use thiserror::Error;

/// Errors scoped to a single remote peer.
///
/// These are never surfaced out of the swarm coordinator; every one of them
/// collapses into "drop that peer, keep the swarm going". The transport
/// layer reports them through `on_connection_failed` / `on_io_error`.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O failure on the peer's connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer's handshake was rejected (bad info hash, malformed greeting).
    #[error("handshake rejected")]
    HandshakeRejected,

    /// The peer sent a malformed message or one that is impossible in the
    /// current exchange state.
    #[error("protocol violation: {0}")]
    Protocol(String),
}
