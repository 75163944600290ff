//! The tracker seam.
//!
//! Trackers hand the swarm its candidate peers. The engine only depends on
//! the [`TrackerClient`] trait; HTTP and UDP announce transports are both
//! implementable behind it by the embedder, and swapping one for the other
//! never touches the swarm core.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::layout::InfoHash;
use crate::peer::PeerId;

/// Errors from a tracker exchange.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The tracker rejected the announce (failure reason in the response).
    #[error("announce rejected: {0}")]
    Rejected(String),

    /// The response could not be understood.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Transport-level failure reaching the tracker.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why an announce is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    /// First announce for this torrent.
    Started,
    /// Torrent is going away.
    Stopped,
    /// Download just finished.
    Completed,
    /// Regular keep-alive announce.
    Periodic,
}

/// One announce's worth of swarm statistics.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    /// Port we accept peer connections on.
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    /// Bytes still missing; zero once seeding.
    pub left: u64,
    pub event: AnnounceEvent,
}

/// What the tracker told us.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// How long to wait before the next periodic announce.
    pub interval: Duration,
    /// Candidate remote endpoints.
    pub peers: Vec<SocketAddr>,
    /// Seeder count, when the tracker reports one.
    pub complete: Option<u32>,
    /// Leecher count, when the tracker reports one.
    pub incomplete: Option<u32>,
}

/// A pluggable announce transport.
pub trait TrackerClient: Send + Sync {
    fn announce(
        &self,
        request: &AnnounceRequest,
    ) -> impl std::future::Future<Output = Result<AnnounceResponse, TrackerError>> + Send;
}
