use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::peer::bitfield::Bitfield;
use crate::peer::message::{BlockRequest, Message};
use crate::peer::peer_id::PeerId;
use crate::peer::rate::RateMeter;
use crate::swarm::PartialPiece;
use crate::transport::PeerLink;

/// Our four-way choke/interest view of one remote peer.
///
/// Both sides start choked and uninterested, per the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChokeFlags {
    /// We are choking the remote.
    pub am_choking: bool,
    /// We are interested in the remote's pieces.
    pub am_interested: bool,
    /// The remote is choking us.
    pub peer_choking: bool,
    /// The remote is interested in our pieces.
    pub peer_interested: bool,
}

impl Default for ChokeFlags {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

// Everything the per-peer lock guards: connection handle, pipeline, flags.
struct PeerInner {
    peer_id: Option<PeerId>,
    link: Option<Arc<dyn PeerLink>>,
    pieces: Bitfield,
    flags: ChokeFlags,
    outstanding: VecDeque<BlockRequest>,
    requested: Option<PartialPiece>,
    dl: RateMeter,
    ul: RateMeter,
}

/// Per-remote sharing state: one record per peer we are exchanging with.
///
/// The record outlives any single connection; it is created on first
/// contact and removed from the registry only on failed connections. All
/// mutable state sits behind one `parking_lot::Mutex` (the per-peer lock in
/// the crate's peer → swarm → registry lock order), so none of these
/// methods may be called while the swarm lock is held.
pub struct SharingPeer {
    addr: SocketAddr,
    inner: Mutex<PeerInner>,
}

impl SharingPeer {
    pub(crate) fn new(addr: SocketAddr, peer_id: Option<PeerId>, piece_count: usize, rate_window: u32) -> Self {
        Self {
            addr,
            inner: Mutex::new(PeerInner {
                peer_id,
                link: None,
                pieces: Bitfield::new(piece_count),
                flags: ChokeFlags::default(),
                outstanding: VecDeque::new(),
                requested: None,
                dl: RateMeter::new(rate_window),
                ul: RateMeter::new(rate_window),
            }),
        }
    }

    /// The canonical endpoint this record was created under. The registry
    /// may know the same record under alias endpoints as well.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.inner.lock().peer_id
    }

    pub(crate) fn set_peer_id(&self, id: PeerId) {
        self.inner.lock().peer_id = Some(id);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().link.is_some()
    }

    /// Installs a fresh transport handle.
    ///
    /// Returns `false` without touching existing state when the peer is
    /// already connected; the duplicate link is closed, matching the
    /// "first connection wins" rule for simultaneous dials.
    pub fn bind_link(&self, link: Arc<dyn PeerLink>) -> bool {
        let mut inner = self.inner.lock();
        if inner.link.is_some() {
            drop(inner);
            trace!(peer = %self.addr, "already connected, closing duplicate link");
            link.close();
            return false;
        }
        inner.link = Some(link);
        true
    }

    /// Forgets the transport handle without protocol cleanup. Used on I/O
    /// errors, where the wire is already dead.
    pub fn drop_link(&self) {
        self.inner.lock().link = None;
    }

    /// Closes and forgets the transport handle.
    pub fn close_link(&self) {
        let link = self.inner.lock().link.take();
        if let Some(link) = link {
            link.close();
        }
    }

    /// Snapshot of the remote's advertised pieces.
    pub fn pieces(&self) -> Bitfield {
        self.inner.lock().pieces.clone()
    }

    /// Replaces the advertised bitfield, returning the previous one for
    /// availability diffing.
    pub(crate) fn replace_pieces(&self, pieces: Bitfield) -> Bitfield {
        std::mem::replace(&mut self.inner.lock().pieces, pieces)
    }

    /// Records a HAVE. Returns `false` when the piece was already marked,
    /// so availability is not double-counted.
    pub(crate) fn record_have(&self, index: u32) -> bool {
        let mut inner = self.inner.lock();
        if inner.pieces.has(index as usize) {
            return false;
        }
        inner.pieces.set(index as usize);
        true
    }

    pub fn flags(&self) -> ChokeFlags {
        self.inner.lock().flags
    }

    pub(crate) fn set_peer_choking(&self, choking: bool) {
        self.inner.lock().flags.peer_choking = choking;
    }

    pub(crate) fn set_peer_interested(&self, interested: bool) {
        self.inner.lock().flags.peer_interested = interested;
    }

    /// Chokes the remote, notifying it when this is a state change.
    pub fn choke(&self) {
        let mut inner = self.inner.lock();
        if inner.flags.am_choking {
            return;
        }
        inner.flags.am_choking = true;
        let link = inner.link.clone();
        drop(inner);
        trace!(peer = %self.addr, "choking");
        if let Some(link) = link {
            link.send(Message::Choke);
        }
    }

    /// Unchokes the remote, notifying it when this is a state change.
    pub fn unchoke(&self) {
        let mut inner = self.inner.lock();
        if !inner.flags.am_choking {
            return;
        }
        inner.flags.am_choking = false;
        let link = inner.link.clone();
        drop(inner);
        trace!(peer = %self.addr, "unchoking");
        if let Some(link) = link {
            link.send(Message::Unchoke);
        }
    }

    /// Declares or retracts our interest, notifying the remote on change.
    pub(crate) fn set_am_interested(&self, interested: bool) {
        let mut inner = self.inner.lock();
        if inner.flags.am_interested == interested {
            return;
        }
        inner.flags.am_interested = interested;
        let link = inner.link.clone();
        drop(inner);
        if let Some(link) = link {
            link.send(if interested {
                Message::Interested
            } else {
                Message::NotInterested
            });
        }
    }

    /// Whether we may issue block requests right now: connected, unchoked
    /// by the remote, and interested.
    pub fn can_request(&self) -> bool {
        let inner = self.inner.lock();
        inner.link.is_some() && !inner.flags.peer_choking && inner.flags.am_interested
    }

    /// The piece currently being downloaded through this peer, if any.
    pub fn requested_piece(&self) -> Option<u32> {
        self.inner.lock().requested.as_ref().map(|p| p.index())
    }

    pub fn outstanding_count(&self) -> usize {
        self.inner.lock().outstanding.len()
    }

    /// Assigns a partial piece and fills the request pipeline from it.
    ///
    /// Returns the partial back untouched when the peer can no longer take
    /// requests (choked or disconnected between selection and assignment).
    pub(crate) fn assign_piece(&self, partial: PartialPiece, depth: usize) -> Option<PartialPiece> {
        let mut inner = self.inner.lock();
        if inner.link.is_none()
            || inner.flags.peer_choking
            || !inner.flags.am_interested
            || inner.requested.is_some()
        {
            return Some(partial);
        }
        inner.requested = Some(partial);
        Self::fill_pipeline_locked(&mut inner, depth);
        None
    }

    /// Tops the request pipeline back up to `depth` from the assigned piece.
    pub(crate) fn fill_pipeline(&self, depth: usize) {
        let mut inner = self.inner.lock();
        if inner.link.is_none() || inner.flags.peer_choking {
            return;
        }
        Self::fill_pipeline_locked(&mut inner, depth);
    }

    fn fill_pipeline_locked(inner: &mut PeerInner, depth: usize) {
        let Some(link) = inner.link.clone() else {
            return;
        };
        let Some(requested) = &inner.requested else {
            return;
        };
        let mut queued: Vec<BlockRequest> = Vec::new();
        for req in requested.missing_blocks() {
            if inner.outstanding.len() + queued.len() >= depth {
                break;
            }
            if inner.outstanding.iter().any(|r| r.offset == req.offset) {
                continue;
            }
            queued.push(req);
        }
        for req in queued {
            inner.outstanding.push_back(req);
            link.send(req.to_message());
        }
    }

    /// Acknowledges an arrived block against the pipeline and the assigned
    /// piece. Returns `None` when nothing matched (block we never asked
    /// for), `Some(complete)` otherwise, with `complete` set once every
    /// block of the piece has been received.
    pub(crate) fn ack_block(&self, piece: u32, offset: u32) -> Option<bool> {
        let mut inner = self.inner.lock();
        let matched = inner
            .outstanding
            .iter()
            .position(|r| r.piece == piece && r.offset == offset)?;
        inner.outstanding.remove(matched);
        let requested = inner.requested.as_mut()?;
        if requested.index() != piece {
            return None;
        }
        requested.mark_received(offset);
        Some(requested.is_complete())
    }

    /// Removes the assigned piece once it has been fully received, for
    /// validation and completion handling.
    pub(crate) fn take_completed_piece(&self) -> Option<PartialPiece> {
        let mut inner = self.inner.lock();
        if inner.requested.as_ref().is_some_and(|p| p.is_complete()) {
            inner.requested.take()
        } else {
            None
        }
    }

    /// Drops the whole pipeline without notifying the remote: the in-flight
    /// requests died with the choke or disconnect that triggered this.
    /// Returns the orphaned partial piece, if one was assigned.
    pub(crate) fn take_pipeline(&self) -> Option<PartialPiece> {
        let mut inner = self.inner.lock();
        inner.outstanding.clear();
        inner.requested.take()
    }

    /// Sends a best-effort CANCEL for every outstanding request and clears
    /// the pipeline. Returns how many were cancelled.
    pub(crate) fn cancel_outstanding(&self) -> usize {
        let mut inner = self.inner.lock();
        let link = inner.link.clone();
        let cancelled = inner.outstanding.len();
        if let Some(link) = link {
            for req in inner.outstanding.drain(..) {
                link.send(req.to_cancel());
            }
        } else {
            inner.outstanding.clear();
        }
        inner.requested = None;
        cancelled
    }

    /// Sends a message through the current link, if any.
    pub(crate) fn send(&self, message: Message) {
        let link = self.inner.lock().link.clone();
        if let Some(link) = link {
            link.send(message);
        }
    }

    pub(crate) fn record_downloaded(&self, bytes: u64) {
        self.inner.lock().dl.record(bytes);
    }

    pub(crate) fn record_uploaded(&self, bytes: u64) {
        self.inner.lock().ul.record(bytes);
    }

    /// Folds accumulated transfer counts into the smoothed rates; called by
    /// the choke scheduler once per tick.
    pub(crate) fn sample_rates(&self, elapsed: Duration) {
        let mut inner = self.inner.lock();
        inner.dl.sample(elapsed);
        inner.ul.sample(elapsed);
    }

    /// Smoothed download rate from this peer, bytes/sec.
    pub fn dl_rate(&self) -> f64 {
        self.inner.lock().dl.rate()
    }

    /// Smoothed upload rate to this peer, bytes/sec.
    pub fn ul_rate(&self) -> f64 {
        self.inner.lock().ul.rate()
    }

    /// Post-disconnect cleanup: forget the link, the advertised pieces and
    /// all transfer history, and return the flags to their defaults. The
    /// caller is responsible for having subtracted this peer from piece
    /// availability first, and for orphaning the pipeline via
    /// [`SharingPeer::take_pipeline`].
    pub(crate) fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.link = None;
        let count = inner.pieces.piece_count();
        inner.pieces = Bitfield::new(count);
        inner.flags = ChokeFlags::default();
        inner.outstanding.clear();
        inner.requested = None;
        inner.dl.reset();
        inner.ul.reset();
    }
}

impl std::fmt::Debug for SharingPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SharingPeer")
            .field("addr", &self.addr)
            .field("peer_id", &inner.peer_id)
            .field("connected", &inner.link.is_some())
            .field("pieces", &inner.pieces)
            .field("flags", &inner.flags)
            .finish()
    }
}
