//! The per-torrent swarm coordinator and its parts.
//!
//! One [`SwarmCoordinator`] runs each active torrent: it reacts to peer
//! events from the transport layer, picks pieces rarest-first (with
//! partial-piece reuse and an end-game fallback), runs the tit-for-tat
//! choke scheduler, and finalizes the torrent through the piece store when
//! the last piece validates.

mod choking;
mod coordinator;
mod error;
mod events;
mod partial;
mod piece;

pub use choking::{ChokeCandidate, ChokeScheduler, ChokeSlate};
pub use coordinator::{Lifecycle, Phase, SwarmCoordinator};
pub use error::SwarmError;
pub use events::SwarmEvent;
pub use partial::PartialPiece;
pub use piece::{Piece, PieceState, PieceTable};

#[cfg(test)]
mod tests;
