use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng as _;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::config::Tunables;
use crate::constants::{EVENT_CHANNEL_CAPACITY, MAX_REQUEST_LENGTH};
use crate::layout::{InfoHash, TorrentLayout};
use crate::peer::{Bitfield, Message, PeerError, PeerId, PeerRegistry, SharingPeer};
use crate::store::PieceStore;
use crate::swarm::choking::{ChokeCandidate, ChokeScheduler};
use crate::swarm::error::SwarmError;
use crate::swarm::events::{EventBus, SwarmEvent};
use crate::swarm::partial::PartialPiece;
use crate::swarm::piece::{PieceState, PieceTable};
use crate::transport::{PeerLink, Transport};

/// Coordinator lifecycle states.
///
/// Operations other than `start`/`stop` are only legal while `Started`;
/// anything else surfaces [`SwarmError::BadState`] to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Stopped,
    Starting,
    Started,
    Stopping,
}

/// What the torrent is doing: still fetching pieces, or serving only.
///
/// The choke scheduler ranks peers by the download rate they give us while
/// `Sharing` and by the upload rate we achieve to them once `Seeding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Sharing,
    Seeding,
}

// Everything the swarm lock guards: the piece table, the requested set,
// the parked partials and the choke scheduler's countdown.
struct SwarmShared {
    pieces: PieceTable,
    requested: Bitfield,
    partials: Vec<PartialPiece>,
    scheduler: ChokeScheduler,
}

/// The per-torrent swarm coordinator.
///
/// Decides which pieces to fetch from which remotes (rarest-first with
/// partial-piece reuse and end-game fallback), which remotes may download
/// from us (tit-for-tat plus optimistic unchoke), and tracks partial
/// progress until the piece store confirms each piece.
///
/// All I/O lives behind the [`Transport`]/[`PeerLink`] and [`PieceStore`]
/// seams; every method here runs to completion without blocking. Lock
/// order throughout is peer → swarm → registry: peer state is always read
/// or snapshotted before the swarm lock is taken, never after.
pub struct SwarmCoordinator {
    info_hash: InfoHash,
    layout: TorrentLayout,
    tunables: Tunables,
    store: Arc<dyn PieceStore>,
    transport: Arc<dyn Transport>,
    registry: PeerRegistry,
    shared: Mutex<SwarmShared>,
    lifecycle: Mutex<Lifecycle>,
    uploaded: AtomicU64,
    downloaded: AtomicU64,
    events: EventBus,
}

impl SwarmCoordinator {
    pub fn new(
        info_hash: InfoHash,
        layout: TorrentLayout,
        tunables: Tunables,
        store: Arc<dyn PieceStore>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let piece_count = layout.piece_count();
        let registry = PeerRegistry::new(piece_count, tunables.rate_computation_iterations);
        let scheduler = ChokeScheduler::new(
            tunables.max_downloaders_unchoke,
            tunables.optimistic_iterations,
        );
        Arc::new(Self {
            info_hash,
            shared: Mutex::new(SwarmShared {
                pieces: PieceTable::new(&layout),
                requested: Bitfield::new(piece_count),
                partials: Vec::new(),
                scheduler,
            }),
            layout,
            tunables,
            store,
            transport,
            registry,
            lifecycle: Mutex::new(Lifecycle::Stopped),
            uploaded: AtomicU64::new(0),
            downloaded: AtomicU64::new(0),
            events: EventBus::new(EVENT_CHANNEL_CAPACITY),
        })
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    pub fn layout(&self) -> &TorrentLayout {
        &self.layout
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Total bytes sent to remotes. Monotone.
    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    /// Total bytes received from remotes. Monotone, and possibly more than
    /// the torrent's length (end-game duplicates, failed pieces).
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn piece_count(&self) -> usize {
        self.layout.piece_count()
    }

    pub fn completed_count(&self) -> usize {
        self.shared.lock().pieces.completed_count()
    }

    pub fn is_complete(&self) -> bool {
        self.shared.lock().pieces.is_complete()
    }

    pub fn phase(&self) -> Phase {
        if self.is_complete() {
            Phase::Seeding
        } else {
            Phase::Sharing
        }
    }

    /// Bytes still to download, for tracker announces. Zero once seeding.
    pub fn bytes_left(&self) -> u64 {
        let shared = self.shared.lock();
        (0..self.layout.piece_count() as u32)
            .filter(|&i| {
                shared
                    .pieces
                    .get(i)
                    .is_some_and(|p| p.state() != PieceState::Completed)
            })
            .map(|i| self.layout.piece_size(i) as u64)
            .sum()
    }

    /// How many connected remotes advertise a piece.
    pub fn piece_availability(&self, index: u32) -> Option<u32> {
        self.shared.lock().pieces.get(index).map(|p| p.availability())
    }

    /// Snapshot of the requested-piece bitset.
    pub fn requested_pieces(&self) -> Bitfield {
        self.shared.lock().requested.clone()
    }

    pub fn is_requested(&self, index: u32) -> bool {
        self.shared.lock().requested.has(index as usize)
    }

    /// Number of parked partial pieces awaiting adoption.
    pub fn partial_count(&self) -> usize {
        self.shared.lock().partials.len()
    }

    /// Subscribes to swarm notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock()
    }

    fn transition(&self, from: Lifecycle, to: Lifecycle) -> Result<(), SwarmError> {
        let mut state = self.lifecycle.lock();
        if *state != from {
            return Err(SwarmError::BadTransition { from: *state, to });
        }
        *state = to;
        drop(state);
        self.events.emit(SwarmEvent::StateChanged(to));
        Ok(())
    }

    pub fn start(&self) -> Result<(), SwarmError> {
        self.transition(Lifecycle::Stopped, Lifecycle::Starting)?;
        info!(torrent = %self.info_hash, pieces = self.layout.piece_count(), "swarm starting");
        self.transition(Lifecycle::Starting, Lifecycle::Started)
    }

    pub fn stop(&self) -> Result<(), SwarmError> {
        self.transition(Lifecycle::Started, Lifecycle::Stopping)?;
        info!(torrent = %self.info_hash, "swarm stopping");
        for peer in self.registry.snapshot() {
            peer.cancel_outstanding();
            peer.close_link();
        }
        // Nothing is in flight anymore; a later restart selects from a
        // clean slate (completed pieces are kept).
        {
            let mut shared = self.shared.lock();
            shared.partials.clear();
            shared.requested = Bitfield::new(self.layout.piece_count());
        }
        self.transition(Lifecycle::Stopping, Lifecycle::Stopped)
    }

    fn ensure_started(&self) -> Result<(), SwarmError> {
        let state = *self.lifecycle.lock();
        if state == Lifecycle::Started {
            Ok(())
        } else {
            Err(SwarmError::BadState(state))
        }
    }

    // ------------------------------------------------------------------
    // Consumer interface: tracker and transport callbacks
    // ------------------------------------------------------------------

    /// Feeds a candidate endpoint from the tracker. Requests an outbound
    /// dial unless we already have a connection to that remote.
    pub fn add_peer_candidate(&self, addr: SocketAddr) -> Result<(), SwarmError> {
        self.ensure_started()?;
        let peer = self.registry.get_or_create(addr, None);
        if !peer.is_connected() {
            trace!(peer = %addr, "dialing candidate");
            self.transport.connect(addr);
        }
        Ok(())
    }

    /// Delivers a handshake-complete connection, inbound or outbound.
    ///
    /// The registry resolves the `(endpoint, identity)` pair to a single
    /// record; a duplicate connection to an already-connected peer is
    /// closed and the existing link kept.
    pub fn on_handshake_complete(
        &self,
        addr: SocketAddr,
        peer_id: PeerId,
        link: Arc<dyn PeerLink>,
    ) -> Result<Arc<SharingPeer>, SwarmError> {
        self.ensure_started()?;
        let peer = self.registry.get_or_create(addr, Some(peer_id));
        if peer.bind_link(link) {
            debug!(
                peer = %peer.addr(),
                connected = self.registry.connected_count(),
                known = self.registry.len(),
                "new peer connection"
            );
            let completed = self.shared.lock().pieces.completed_bitfield();
            if !completed.is_empty() {
                peer.send(Message::Bitfield(completed.to_bytes()));
            }
            self.events.emit(SwarmEvent::PeerConnected { addr: peer.addr() });
        }
        Ok(peer)
    }

    /// An outbound dial or handshake failed; the candidate is dropped from
    /// the registry. Piece availability is untouched — a peer that never
    /// connected never advertised anything.
    pub fn on_connection_failed(&self, addr: SocketAddr, err: &PeerError) -> Result<(), SwarmError> {
        self.ensure_started()?;
        warn!(peer = %addr, %err, "could not connect");
        if let Some(peer) = self.registry.get(addr) {
            self.registry.remove(&peer);
        }
        Ok(())
    }

    /// The wire died under a peer. The handle is dropped so scheduler
    /// ticks ignore the peer; the transport's disconnect notification
    /// completes the cleanup.
    pub fn on_io_error(&self, peer: &Arc<SharingPeer>, err: &PeerError) -> Result<(), SwarmError> {
        self.ensure_started()?;
        warn!(peer = %peer.addr(), %err, "i/o error, dropping connection");
        peer.drop_link();
        // A connectionless peer holds no outstanding requests.
        if let Some(partial) = peer.take_pipeline() {
            let mut shared = self.shared.lock();
            Self::park_orphan(&mut shared, partial);
        }
        Ok(())
    }

    /// A peer went away: its advertised pieces stop counting toward
    /// availability before any selector call can observe it gone, its
    /// pipeline is orphaned, and its meters reset.
    pub fn on_disconnect(&self, peer: &Arc<SharingPeer>) -> Result<(), SwarmError> {
        self.ensure_started()?;
        self.teardown(peer);
        Ok(())
    }

    /// Dispatches one decoded message from a peer.
    pub fn on_message(&self, peer: &Arc<SharingPeer>, message: Message) -> Result<(), SwarmError> {
        self.ensure_started()?;
        match message {
            Message::KeepAlive => Ok(()),
            Message::Choke => self.handle_choke(peer),
            Message::Unchoke => self.handle_unchoke(peer),
            Message::Interested => {
                peer.set_peer_interested(true);
                Ok(())
            }
            Message::NotInterested => {
                peer.set_peer_interested(false);
                Ok(())
            }
            Message::Have { piece } => self.handle_have(peer, piece),
            Message::Bitfield(bytes) => self.handle_bitfield(peer, &bytes),
            Message::Request {
                index,
                begin,
                length,
            } => self.handle_request(peer, index, begin, length),
            Message::Piece { index, begin, data } => self.handle_piece(peer, index, begin, data),
            Message::Cancel { index, begin, .. } => {
                // Uploads are served synchronously, so there is no queued
                // block to withdraw by the time a CANCEL arrives.
                trace!(peer = %peer.addr(), piece = index, offset = begin, "cancel for unqueued block");
                Ok(())
            }
        }
    }

    /// One choke-scheduler tick; the embedder drives this every
    /// `unchoke_period`.
    pub fn tick(&self) -> Result<(), SwarmError> {
        self.ensure_started()?;
        let peers = self.registry.snapshot();
        for peer in &peers {
            peer.sample_rates(self.tunables.unchoke_period);
        }

        let seeding = self.is_complete();
        let mut by_addr: HashMap<SocketAddr, Arc<SharingPeer>> = HashMap::new();
        let mut candidates = Vec::new();
        for peer in &peers {
            by_addr.insert(peer.addr(), peer.clone());
            if !peer.is_connected() || !peer.flags().peer_interested {
                continue;
            }
            let rate = if seeding {
                peer.ul_rate()
            } else {
                peer.dl_rate()
            };
            candidates.push(ChokeCandidate {
                addr: peer.addr(),
                rate,
            });
        }

        if candidates.is_empty() {
            trace!("no interested peers, skipping unchoke pass");
            // Still advance the optimistic countdown so the cadence holds.
            self.shared.lock().scheduler.tick(Vec::new());
            return Ok(());
        }

        trace!(candidates = candidates.len(), seeding, "running unchoke pass");
        let slate = self.shared.lock().scheduler.tick(candidates);

        for addr in &slate.unchoke {
            by_addr[addr].unchoke();
        }
        if let Some(addr) = slate.optimistic {
            debug!(peer = %addr, "optimistic unchoke");
            by_addr[&addr].unchoke();
        }
        for addr in &slate.choke {
            by_addr[addr].choke();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Piece selection
    // ------------------------------------------------------------------

    /// Picks the next piece to download through `peer`.
    ///
    /// Order of preference: a parked partial the peer can finish, then the
    /// rarest of the peer's pieces we neither completed nor requested
    /// (uniform tie-break), then — once `end_game_completion_ratio` of the
    /// torrent is done — the rarest piece already requested elsewhere.
    /// Returns `None` when the peer has nothing servable.
    pub fn next_piece_for(&self, peer: &SharingPeer) -> Option<PartialPiece> {
        // Bitfield snapshot happens before the swarm lock; lock order is
        // peer → swarm.
        let held = peer.pieces();
        let mut shared = self.shared.lock();
        let shared = &mut *shared;

        // Partial reuse first: finishing someone else's orphan beats
        // starting fresh.
        if let Some(pos) = shared
            .partials
            .iter()
            .position(|p| held.has(p.index() as usize))
        {
            let partial = shared.partials.swap_remove(pos);
            shared.requested.set(partial.index() as usize);
            trace!(peer = %peer.addr(), piece = partial.index(), "adopting partial piece");
            return Some(partial);
        }

        let completed = shared.pieces.completed_bitfield();
        let mut interesting = held.clone();
        interesting.and_not(&completed);
        interesting.and_not(&shared.requested);
        trace!(
            peer = %peer.addr(),
            interesting = interesting.count(),
            "computed interesting set"
        );

        if interesting.is_empty() {
            let total = shared.pieces.piece_count();
            let done = shared.pieces.completed_count();
            if total == 0
                || (done as f64) < self.tunables.end_game_completion_ratio * total as f64
            {
                return None;
            }
            // End-game: allow doubling up on pieces already requested from
            // other peers to beat stragglers.
            interesting = held.clone();
            interesting.and_not(&completed);
            if interesting.is_empty() {
                return None;
            }
            trace!(peer = %peer.addr(), "end-game, re-requesting an in-flight piece");
        }

        let mut rarest: Vec<u32> = Vec::new();
        let mut best = u32::MAX;
        for index in interesting.iter_set() {
            let availability = shared
                .pieces
                .get(index as u32)
                .map_or(0, |p| p.availability());
            if availability == 0 || availability > best {
                continue;
            }
            if availability < best {
                best = availability;
                rarest.clear();
            }
            rarest.push(index as u32);
        }
        if rarest.is_empty() {
            // Every interesting piece has zero availability; nobody can
            // actually serve them.
            return None;
        }

        let index = rarest[rand::rng().random_range(0..rarest.len())];
        shared.requested.set(index as usize);
        if let Some(piece) = shared.pieces.get_mut(index) {
            piece.mark_requested();
        }
        trace!(
            peer = %peer.addr(),
            piece = index,
            availability = best,
            outstanding = shared.requested.count(),
            "selected piece"
        );
        Some(PartialPiece::new(index, self.layout.piece_size(index)))
    }

    // ------------------------------------------------------------------
    // Event handlers
    // ------------------------------------------------------------------

    fn handle_choke(&self, peer: &Arc<SharingPeer>) -> Result<(), SwarmError> {
        peer.set_peer_choking(true);
        // Whatever was in flight died with the choke; park the progress
        // for another peer and release the requested bit.
        if let Some(partial) = peer.take_pipeline() {
            let mut shared = self.shared.lock();
            Self::park_orphan(&mut shared, partial);
            trace!(
                peer = %peer.addr(),
                outstanding = shared.requested.count(),
                parked = shared.partials.len(),
                "peer choked us mid-transfer"
            );
        } else {
            trace!(peer = %peer.addr(), "peer choked us");
        }
        Ok(())
    }

    fn handle_unchoke(&self, peer: &Arc<SharingPeer>) -> Result<(), SwarmError> {
        peer.set_peer_choking(false);
        trace!(peer = %peer.addr(), "peer unchoked us");
        self.begin_requests(peer);
        Ok(())
    }

    fn handle_have(&self, peer: &Arc<SharingPeer>, index: u32) -> Result<(), SwarmError> {
        if index as usize >= self.layout.piece_count() {
            self.close_peer(peer, "HAVE for piece outside the torrent");
            return Ok(());
        }
        if peer.record_have(index) {
            let mut shared = self.shared.lock();
            let mut want = false;
            if let Some(piece) = shared.pieces.get_mut(index) {
                piece.seen_at(peer.addr());
                want = piece.state() != PieceState::Completed;
            }
            trace!(
                peer = %peer.addr(),
                piece = index,
                completed = shared.pieces.completed_count(),
                available = shared.pieces.available_count(),
                total = shared.pieces.piece_count(),
                "piece availability updated"
            );
            drop(shared);
            if want {
                peer.set_am_interested(true);
            }
        }
        // An idle, already-unchoked peer may have just become useful.
        self.begin_requests(peer);
        Ok(())
    }

    fn handle_bitfield(&self, peer: &Arc<SharingPeer>, bytes: &Bytes) -> Result<(), SwarmError> {
        let next = Bitfield::from_bytes(bytes, self.layout.piece_count());
        let prev = peer.replace_pieces(next.clone());

        let completed = {
            let mut shared = self.shared.lock();
            // Pieces the peer silently lost...
            for index in prev.iter_set() {
                if !next.has(index) {
                    if let Some(piece) = shared.pieces.get_mut(index as u32) {
                        piece.no_longer_at(peer.addr());
                    }
                }
            }
            // ...and the ones it gained.
            for index in next.iter_set() {
                if !prev.has(index) {
                    if let Some(piece) = shared.pieces.get_mut(index as u32) {
                        piece.seen_at(peer.addr());
                    }
                }
            }
            shared.pieces.completed_bitfield()
        };

        let mut wanted = next.clone();
        wanted.and_not(&completed);
        trace!(
            peer = %peer.addr(),
            advertised = next.count(),
            wanted = wanted.count(),
            "peer bitfield"
        );
        peer.set_am_interested(!wanted.is_empty());
        self.begin_requests(peer);
        Ok(())
    }

    fn handle_request(
        &self,
        peer: &Arc<SharingPeer>,
        index: u32,
        begin: u32,
        length: u32,
    ) -> Result<(), SwarmError> {
        if peer.flags().am_choking {
            trace!(peer = %peer.addr(), piece = index, "request while choked, dropping");
            return Ok(());
        }
        let in_bounds = (index as usize) < self.layout.piece_count()
            && length > 0
            && length <= MAX_REQUEST_LENGTH
            && begin.checked_add(length).is_some_and(|end| end <= self.layout.piece_size(index));
        if !in_bounds {
            self.close_peer(peer, "request outside piece bounds");
            return Ok(());
        }
        let have = self
            .shared
            .lock()
            .pieces
            .get(index)
            .is_some_and(|p| p.state() == PieceState::Completed);
        if !have {
            self.close_peer(peer, "request for a piece we do not have");
            return Ok(());
        }

        let data = self.store.read_block(index, begin, length)?;
        peer.send(Message::Piece { index, begin, data });
        self.uploaded.fetch_add(length as u64, Ordering::Relaxed);
        peer.record_uploaded(length as u64);
        trace!(peer = %peer.addr(), piece = index, offset = begin, length, "served block");
        Ok(())
    }

    fn handle_piece(
        &self,
        peer: &Arc<SharingPeer>,
        index: u32,
        begin: u32,
        data: Bytes,
    ) -> Result<(), SwarmError> {
        let state = self.shared.lock().pieces.get(index).map(|p| p.state());
        let Some(state) = state else {
            self.close_peer(peer, "block for a piece outside the torrent");
            return Ok(());
        };
        if state == PieceState::Completed {
            // End-game leftovers: another peer won the race.
            trace!(peer = %peer.addr(), piece = index, "redundant block for completed piece");
            return Ok(());
        }
        if data.is_empty() || data.len() as u32 != self.layout.block_size(index, begin) {
            self.close_peer(peer, "block with a bogus offset or length");
            return Ok(());
        }

        let Some(piece_done) = peer.ack_block(index, begin) else {
            self.close_peer(peer, "block we never requested");
            return Ok(());
        };

        let length = data.len() as u64;
        self.downloaded.fetch_add(length, Ordering::Relaxed);
        peer.record_downloaded(length);
        self.store.write_block(index, begin, &data)?;
        if let Some(piece) = self.shared.lock().pieces.get_mut(index) {
            piece.mark_downloading();
        }

        if piece_done {
            let _ = peer.take_completed_piece();
            // Hashing runs outside the swarm lock.
            let valid = self.store.verify_piece(index)?;
            self.finish_piece(peer, index, valid)?;
            self.begin_requests(peer);
        } else {
            peer.fill_pipeline(self.tunables.request_pipeline_depth);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Keeps `peer` busy: assigns a piece if it has none and tops up its
    /// request pipeline.
    fn begin_requests(&self, peer: &Arc<SharingPeer>) {
        if !peer.can_request() {
            return;
        }
        if peer.requested_piece().is_some() {
            peer.fill_pipeline(self.tunables.request_pipeline_depth);
            return;
        }
        let Some(partial) = self.next_piece_for(peer) else {
            return;
        };
        if let Some(returned) = peer.assign_piece(partial, self.tunables.request_pipeline_depth) {
            // The peer choked or vanished between selection and
            // assignment; hand the piece back to the pool.
            let mut shared = self.shared.lock();
            Self::park_orphan(&mut shared, returned);
        }
    }

    /// Releases an orphaned in-flight piece back to the swarm: the
    /// requested bit clears, progress is parked for adoption, and an
    /// untouched piece returns to the selectable pool.
    fn park_orphan(shared: &mut SwarmShared, partial: PartialPiece) {
        shared.requested.clear(partial.index() as usize);
        if partial.has_progress() {
            if let Some(existing) = shared
                .partials
                .iter_mut()
                .find(|p| p.index() == partial.index())
            {
                // Two end-game downloads of the same piece both orphaned;
                // keep the union of their progress.
                existing.merge(&partial);
            } else {
                shared.partials.push(partial);
            }
        } else if let Some(piece) = shared.pieces.get_mut(partial.index()) {
            piece.release();
        }
    }

    /// Completion handling for one fully received piece, valid or not.
    fn finish_piece(
        &self,
        from: &Arc<SharingPeer>,
        index: u32,
        valid: bool,
    ) -> Result<(), SwarmError> {
        let torrent_complete = {
            let mut shared = self.shared.lock();
            // The bit clears regardless of validity.
            shared.requested.clear(index as usize);
            if valid {
                shared.pieces.complete(index);
                // Any parked duplicate of this piece is now worthless.
                shared.partials.retain(|p| p.index() != index);
            } else if let Some(piece) = shared.pieces.get_mut(index) {
                piece.mark_bad();
                piece.release();
            }
            valid && shared.pieces.is_complete()
        };

        if !valid {
            warn!(peer = %from.addr(), piece = index, "piece failed validation, will retry");
            self.events.emit(SwarmEvent::PieceRejected { index });
            return Ok(());
        }

        debug!(
            peer = %from.addr(),
            piece = index,
            completed = self.completed_count(),
            total = self.layout.piece_count(),
            "piece completed"
        );
        self.events.emit(SwarmEvent::PieceCompleted { index });

        let peers = self.registry.snapshot();
        for remote in &peers {
            if remote.is_connected() {
                remote.send(Message::Have { piece: index });
            }
        }

        // End-game: whoever else was fetching this piece stops and moves on.
        for remote in &peers {
            if remote.addr() != from.addr() && remote.requested_piece() == Some(index) {
                trace!(peer = %remote.addr(), piece = index, "cancelling duplicate end-game download");
                remote.cancel_outstanding();
                self.begin_requests(remote);
            }
        }

        if torrent_complete {
            info!(torrent = %self.info_hash, "last piece validated, finishing download");
            for remote in &peers {
                let cancelled = remote.cancel_outstanding();
                if cancelled > 0 {
                    debug!(peer = %remote.addr(), cancelled, "cancelled remaining requests");
                }
                remote.set_am_interested(false);
            }
            self.store.finish()?;
            self.events.emit(SwarmEvent::Finished);
        }
        Ok(())
    }

    /// Protocol violations collapse into "drop that peer, keep the swarm".
    fn close_peer(&self, peer: &Arc<SharingPeer>, reason: &str) {
        warn!(peer = %peer.addr(), reason, "closing misbehaving peer");
        self.teardown(peer);
    }

    fn teardown(&self, peer: &Arc<SharingPeer>) {
        let was_connected = peer.is_connected();
        let held = peer.pieces();
        peer.close_link();
        let orphan = peer.take_pipeline();
        {
            let mut shared = self.shared.lock();
            for index in held.iter_set() {
                if let Some(piece) = shared.pieces.get_mut(index as u32) {
                    piece.no_longer_at(peer.addr());
                }
            }
            if let Some(partial) = orphan {
                Self::park_orphan(&mut shared, partial);
            }
        }
        peer.reset();
        if was_connected || !held.is_empty() {
            debug!(
                peer = %peer.addr(),
                connected = self.registry.connected_count(),
                known = self.registry.len(),
                "peer went away"
            );
            self.events.emit(SwarmEvent::PeerDisconnected { addr: peer.addr() });
        }
    }
}
