use std::collections::HashSet;

use crate::constants::BLOCK_SIZE;
use crate::peer::BlockRequest;

/// A piece whose transfer has begun but not finished.
///
/// Tracks which block offsets have arrived; the block bytes themselves go
/// straight to the piece store. When the first peer chokes before the piece
/// completes, the record is parked in the swarm's partial set and any peer
/// advertising the piece can adopt it and finish the remaining blocks.
#[derive(Debug, Clone)]
pub struct PartialPiece {
    index: u32,
    length: u32,
    received: HashSet<u32>,
}

impl PartialPiece {
    pub fn new(index: u32, length: u32) -> Self {
        Self {
            index,
            length,
            received: HashSet::new(),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn block_count(&self) -> u32 {
        self.length.div_ceil(BLOCK_SIZE)
    }

    pub fn received_count(&self) -> u32 {
        self.received.len() as u32
    }

    /// Marks the block at `offset` received. Redundant arrivals (end-game
    /// duplicates) are absorbed.
    pub fn mark_received(&mut self, offset: u32) {
        if offset < self.length {
            self.received.insert(offset);
        }
    }

    pub fn is_received(&self, offset: u32) -> bool {
        self.received.contains(&offset)
    }

    /// Unions another record's progress into this one. Used when two
    /// end-game downloads of the same piece both get orphaned.
    pub fn merge(&mut self, other: &PartialPiece) {
        debug_assert_eq!(self.index, other.index);
        self.received.extend(other.received.iter().copied());
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() as u32 == self.block_count()
    }

    /// Whether any block has arrived; partials without progress are not
    /// worth parking for another peer.
    pub fn has_progress(&self) -> bool {
        !self.received.is_empty()
    }

    /// Requests for the blocks still missing, in offset order.
    pub fn missing_blocks(&self) -> impl Iterator<Item = BlockRequest> + '_ {
        let index = self.index;
        let length = self.length;
        (0..self.block_count())
            .map(move |i| i * BLOCK_SIZE)
            .filter(move |offset| !self.received.contains(offset))
            .map(move |offset| BlockRequest::new(index, offset, (length - offset).min(BLOCK_SIZE)))
    }
}
