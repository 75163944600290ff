use std::collections::HashSet;
use std::net::SocketAddr;

use crate::layout::{PieceHash, TorrentLayout};
use crate::peer::Bitfield;

/// Download state of one piece.
///
/// `Completed` is terminal; a piece that fails validation passes through
/// `ValidatedBad` and is released back to `Missing` so another peer can
/// redeliver it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceState {
    Missing,
    Requested,
    Downloading,
    Completed,
    ValidatedBad,
}

/// One piece of the torrent: geometry, expected digest, and which connected
/// remotes advertise it.
///
/// Holders are canonical peer endpoints, not references into the registry;
/// the registry owns peer records and pieces only point at them (removal
/// walks the departing peer's bitfield to clean these up).
#[derive(Debug)]
pub struct Piece {
    index: u32,
    length: u32,
    expected_hash: PieceHash,
    state: PieceState,
    holders: HashSet<SocketAddr>,
}

impl Piece {
    fn new(index: u32, length: u32, expected_hash: PieceHash) -> Self {
        Self {
            index,
            length,
            expected_hash,
            state: PieceState::Missing,
            holders: HashSet::new(),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn expected_hash(&self) -> &PieceHash {
        &self.expected_hash
    }

    pub fn state(&self) -> PieceState {
        self.state
    }

    /// Count of connected remotes advertising this piece. Always equals
    /// the holder-set size.
    pub fn availability(&self) -> u32 {
        self.holders.len() as u32
    }

    pub fn is_held_by(&self, peer: SocketAddr) -> bool {
        self.holders.contains(&peer)
    }

    /// Records that `peer` advertises this piece. Idempotent.
    pub fn seen_at(&mut self, peer: SocketAddr) -> u32 {
        self.holders.insert(peer);
        self.availability()
    }

    /// Records that `peer` no longer serves this piece. Idempotent.
    pub fn no_longer_at(&mut self, peer: SocketAddr) -> u32 {
        self.holders.remove(&peer);
        self.availability()
    }

    /// Missing → Requested. A no-op for pieces already in flight (end-game
    /// re-requests); completed pieces are never re-requested, which the
    /// selector guarantees by construction.
    pub fn mark_requested(&mut self) {
        if self.state == PieceState::Missing {
            self.state = PieceState::Requested;
        }
    }

    /// Requested → Downloading, on first block arrival.
    pub fn mark_downloading(&mut self) {
        if self.state == PieceState::Requested {
            self.state = PieceState::Downloading;
        }
    }

    /// Terminal transition on successful validation.
    pub fn mark_completed(&mut self) {
        self.state = PieceState::Completed;
    }

    /// Validation failure: observe `ValidatedBad`, then release.
    pub fn mark_bad(&mut self) {
        if self.state != PieceState::Completed {
            self.state = PieceState::ValidatedBad;
        }
    }

    /// Returns an in-flight or failed piece to `Missing` so selection can
    /// try it again. Completed pieces never come back.
    pub fn release(&mut self) {
        if self.state != PieceState::Completed {
            self.state = PieceState::Missing;
        }
    }
}

/// The per-torrent piece table, indexed by piece number.
///
/// Lives under the swarm lock together with the requested set and the
/// partial-piece pool.
#[derive(Debug)]
pub struct PieceTable {
    pieces: Vec<Piece>,
    completed: usize,
}

impl PieceTable {
    pub fn new(layout: &TorrentLayout) -> Self {
        let pieces = layout
            .piece_hashes()
            .iter()
            .enumerate()
            .map(|(i, hash)| Piece::new(i as u32, layout.piece_size(i as u32), *hash))
            .collect();
        Self {
            pieces,
            completed: 0,
        }
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    pub fn get(&self, index: u32) -> Option<&Piece> {
        self.pieces.get(index as usize)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut Piece> {
        self.pieces.get_mut(index as usize)
    }

    pub fn completed_count(&self) -> usize {
        self.completed
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.pieces.len()
    }

    /// Marks a piece completed, keeping the cached count in step. Returns
    /// `false` when it was already completed.
    pub fn complete(&mut self, index: u32) -> bool {
        let Some(piece) = self.pieces.get_mut(index as usize) else {
            return false;
        };
        if piece.state() == PieceState::Completed {
            return false;
        }
        piece.mark_completed();
        self.completed += 1;
        true
    }

    /// Bitfield of completed pieces, e.g. for the post-handshake BITFIELD.
    pub fn completed_bitfield(&self) -> Bitfield {
        let mut bf = Bitfield::new(self.pieces.len());
        for piece in &self.pieces {
            if piece.state() == PieceState::Completed {
                bf.set(piece.index() as usize);
            }
        }
        bf
    }

    /// Number of distinct pieces at least one connected remote advertises.
    pub fn available_count(&self) -> usize {
        self.pieces.iter().filter(|p| p.availability() > 0).count()
    }
}
