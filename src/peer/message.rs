use bytes::Bytes;

/// A peer-protocol message, as seen by the swarm coordinator.
///
/// These are the decoded values crossing the transport boundary in both
/// directions. Length-prefix framing and the byte-level codec live in the
/// transport layer; the coordinator never sees raw frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have {
        piece: u32,
    },
    Bitfield(Bytes),
    Request {
        index: u32,
        begin: u32,
        length: u32,
    },
    Piece {
        index: u32,
        begin: u32,
        data: Bytes,
    },
    Cancel {
        index: u32,
        begin: u32,
        length: u32,
    },
}

/// A request for one block of a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    /// The piece index.
    pub piece: u32,
    /// Byte offset within the piece.
    pub offset: u32,
    /// Length of the block in bytes.
    pub length: u32,
}

impl BlockRequest {
    pub fn new(piece: u32, offset: u32, length: u32) -> Self {
        Self {
            piece,
            offset,
            length,
        }
    }

    /// The outbound REQUEST message for this block.
    pub fn to_message(self) -> Message {
        Message::Request {
            index: self.piece,
            begin: self.offset,
            length: self.length,
        }
    }

    /// The outbound CANCEL message for this block.
    pub fn to_cancel(self) -> Message {
        Message::Cancel {
            index: self.piece,
            begin: self.offset,
            length: self.length,
        }
    }
}

/// One received block of piece data.
#[derive(Debug, Clone)]
pub struct Block {
    pub piece: u32,
    pub offset: u32,
    pub data: Bytes,
}

impl Block {
    pub fn new(piece: u32, offset: u32, data: Bytes) -> Self {
        Self {
            piece,
            offset,
            data,
        }
    }
}
