//! The piece-store seam.
//!
//! The coordinator tracks which pieces exist and who serves them; the store
//! owns the bytes. Where those bytes live (disk layout, preallocation,
//! caching) is the embedder's concern, behind the [`PieceStore`] trait.
//! [`MemoryStore`] is the reference implementation used by the test suite
//! and by embedders that keep torrents in RAM.

use bytes::Bytes;
use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::layout::TorrentLayout;

/// Errors produced by a piece store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A piece index outside the torrent's layout.
    #[error("unknown piece {0}")]
    UnknownPiece(u32),

    /// A block that does not fit inside its piece.
    #[error("block {offset}+{length} out of bounds for piece {piece}")]
    InvalidBlock { piece: u32, offset: u32, length: u32 },

    /// Reading a block that was never written.
    #[error("piece {piece} has no data at offset {offset}")]
    MissingData { piece: u32, offset: u32 },

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Content-addressed block storage for one torrent.
///
/// Implementations must tolerate `write_block` being called again for an
/// already-written block (end-game duplicates land here) and must make
/// `verify_piece` safe to call from the coordinator's completion path —
/// hashing happens outside the swarm lock, but a slow store should still
/// do its heavy lifting elsewhere.
pub trait PieceStore: Send + Sync {
    /// Stores one received block.
    fn write_block(&self, piece: u32, offset: u32, data: &[u8]) -> Result<(), StoreError>;

    /// Reads one block of a completed piece, for serving uploads.
    fn read_block(&self, piece: u32, offset: u32, length: u32) -> Result<Bytes, StoreError>;

    /// Hashes the assembled piece against its expected digest.
    fn verify_piece(&self, piece: u32) -> Result<bool, StoreError>;

    /// Commits the finished torrent (rename, fsync, release temp state).
    /// Called exactly once, when the last piece validates.
    fn finish(&self) -> Result<(), StoreError>;
}

/// An in-memory [`PieceStore`] backed by one buffer per piece.
pub struct MemoryStore {
    layout: TorrentLayout,
    pieces: RwLock<Vec<Vec<u8>>>,
}

impl MemoryStore {
    pub fn new(layout: TorrentLayout) -> Self {
        let pieces = (0..layout.piece_count() as u32)
            .map(|i| vec![0u8; layout.piece_size(i) as usize])
            .collect();
        Self {
            layout,
            pieces: RwLock::new(pieces),
        }
    }

    fn check_block(&self, piece: u32, offset: u32, length: u32) -> Result<(), StoreError> {
        if piece as usize >= self.layout.piece_count() {
            return Err(StoreError::UnknownPiece(piece));
        }
        let size = self.layout.piece_size(piece);
        if offset >= size || length > size - offset {
            return Err(StoreError::InvalidBlock {
                piece,
                offset,
                length,
            });
        }
        Ok(())
    }
}

impl PieceStore for MemoryStore {
    fn write_block(&self, piece: u32, offset: u32, data: &[u8]) -> Result<(), StoreError> {
        self.check_block(piece, offset, data.len() as u32)?;
        let mut pieces = self.pieces.write();
        let start = offset as usize;
        pieces[piece as usize][start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_block(&self, piece: u32, offset: u32, length: u32) -> Result<Bytes, StoreError> {
        self.check_block(piece, offset, length)?;
        let pieces = self.pieces.read();
        let start = offset as usize;
        Ok(Bytes::copy_from_slice(
            &pieces[piece as usize][start..start + length as usize],
        ))
    }

    fn verify_piece(&self, piece: u32) -> Result<bool, StoreError> {
        let expected = self
            .layout
            .piece_hash(piece)
            .ok_or(StoreError::UnknownPiece(piece))?;
        let pieces = self.pieces.read();
        let digest = Sha1::digest(&pieces[piece as usize]);
        Ok(digest.as_slice() == expected.0)
    }

    fn finish(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PieceHash;

    fn layout_for(data: &[u8], piece_length: u32) -> TorrentLayout {
        let hashes = data
            .chunks(piece_length as usize)
            .map(|chunk| PieceHash(Sha1::digest(chunk).into()))
            .collect();
        TorrentLayout::new(hashes, piece_length, data.len() as u64)
    }

    #[test]
    fn write_read_verify() {
        let data = vec![7u8; 40000];
        let layout = layout_for(&data, 32768);
        let store = MemoryStore::new(layout);

        store.write_block(0, 0, &data[..16384]).unwrap();
        store.write_block(0, 16384, &data[16384..32768]).unwrap();
        store.write_block(1, 0, &data[32768..]).unwrap();

        assert!(store.verify_piece(0).unwrap());
        assert!(store.verify_piece(1).unwrap());
        assert_eq!(store.read_block(1, 0, 100).unwrap(), &data[32768..32868]);
    }

    #[test]
    fn corrupt_piece_fails_verification() {
        let data = vec![1u8; 1000];
        let store = MemoryStore::new(layout_for(&data, 1000));
        store.write_block(0, 0, &vec![2u8; 1000]).unwrap();
        assert!(!store.verify_piece(0).unwrap());
    }

    #[test]
    fn out_of_bounds_block_rejected() {
        let data = vec![0u8; 100];
        let store = MemoryStore::new(layout_for(&data, 100));
        assert!(matches!(
            store.write_block(0, 90, &[0u8; 20]),
            Err(StoreError::InvalidBlock { .. })
        ));
        assert!(matches!(
            store.read_block(1, 0, 10),
            Err(StoreError::UnknownPiece(1))
        ));
    }
}
