//! swarmbit - a BitTorrent leech-and-seed swarm engine
//!
//! This library implements the decision-making core of a BitTorrent
//! client: which pieces to fetch from which remote peers (rarest-first
//! with partial-piece reuse and end-game mode), which peers are allowed to
//! download from us (tit-for-tat choking with periodic optimistic
//! unchokes), and how partial progress is tracked and finalized.
//!
//! The wire itself is not here. Sockets, handshakes and message framing
//! live behind the [`transport`] traits, piece bytes and hashing behind
//! the [`store`] trait, and announces behind the [`tracker`] trait; the
//! embedder plugs in implementations and forwards their callbacks into
//! each torrent's [`swarm::SwarmCoordinator`].
//!
//! # Modules
//!
//! - [`engine`] - Client shell: multi-torrent registry, scheduler driver, announce loops
//! - [`swarm`] - Per-torrent coordinator: piece selection, choking, event dispatch
//! - [`peer`] - Per-peer state, bitfields, the dual-key peer registry
//! - [`layout`] - Torrent geometry (piece and block arithmetic)
//! - [`store`] - Piece storage seam and the in-memory reference store
//! - [`tracker`] - Pluggable announce interface
//! - [`transport`] - Connection and messaging seam
//! - [`config`] - Tunable parameters

pub mod config;
pub mod engine;
pub mod layout;
pub mod peer;
pub mod store;
pub mod swarm;
pub mod tracker;
pub mod transport;

mod constants;

pub use config::Tunables;
pub use engine::{Engine, EngineEvent};
pub use layout::{InfoHash, PieceHash, TorrentLayout};
pub use peer::{
    Bitfield, Block, BlockRequest, ChokeFlags, Message, PeerError, PeerId, PeerRegistry,
    SharingPeer,
};
pub use store::{MemoryStore, PieceStore, StoreError};
pub use swarm::{
    Lifecycle, PartialPiece, Phase, PieceState, SwarmCoordinator, SwarmError, SwarmEvent,
};
pub use tracker::{
    AnnounceEvent, AnnounceRequest, AnnounceResponse, TrackerClient, TrackerError,
};
pub use transport::{PeerLink, Transport};
