use super::*;
use crate::config::Tunables;
use crate::layout::{InfoHash, PieceHash, TorrentLayout};
use crate::peer::{Bitfield, Message, PeerError, PeerId, SharingPeer};
use crate::store::MemoryStore;
use crate::transport::{PeerLink, Transport};
use bytes::Bytes;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::net::SocketAddr;
use std::sync::Arc;

struct FakeLink {
    sent: Mutex<Vec<Message>>,
    closed: Mutex<bool>,
}

impl FakeLink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
        })
    }

    fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

impl PeerLink for FakeLink {
    fn send(&self, message: Message) {
        self.sent.lock().push(message);
    }

    fn close(&self) {
        *self.closed.lock() = true;
    }
}

struct NullTransport {
    dialed: Mutex<Vec<SocketAddr>>,
}

impl Transport for NullTransport {
    fn connect(&self, addr: SocketAddr) {
        self.dialed.lock().push(addr);
    }
}

// Deterministic piece payloads so store verification really runs.
fn piece_content(index: u32, length: u32) -> Vec<u8> {
    vec![(index % 251) as u8 + 1; length as usize]
}

fn make_layout(piece_count: u32, piece_length: u32) -> TorrentLayout {
    let hashes = (0..piece_count)
        .map(|i| PieceHash(Sha1::digest(piece_content(i, piece_length)).into()))
        .collect();
    TorrentLayout::new(
        hashes,
        piece_length,
        piece_count as u64 * piece_length as u64,
    )
}

struct Harness {
    swarm: Arc<SwarmCoordinator>,
    transport: Arc<NullTransport>,
}

fn harness(piece_count: u32, piece_length: u32, tunables: Tunables) -> Harness {
    let layout = make_layout(piece_count, piece_length);
    let store = Arc::new(MemoryStore::new(layout.clone()));
    let transport = Arc::new(NullTransport {
        dialed: Mutex::new(Vec::new()),
    });
    let swarm = SwarmCoordinator::new(
        InfoHash([7u8; 20]),
        layout,
        tunables,
        store,
        transport.clone(),
    );
    swarm.start().unwrap();
    Harness { swarm, transport }
}

impl Harness {
    fn connect(&self, addr: &str, seed: u8) -> (Arc<SharingPeer>, Arc<FakeLink>) {
        let link = FakeLink::new();
        let peer = self
            .swarm
            .on_handshake_complete(addr.parse().unwrap(), PeerId([seed; 20]), link.clone())
            .unwrap();
        (peer, link)
    }

    fn advertise(&self, peer: &Arc<SharingPeer>, indices: &[u32]) {
        let mut bf = Bitfield::new(self.swarm.piece_count());
        for &i in indices {
            bf.set(i as usize);
        }
        self.swarm
            .on_message(peer, Message::Bitfield(bf.to_bytes()))
            .unwrap();
    }

    fn advertise_all(&self, peer: &Arc<SharingPeer>) {
        let bf = Bitfield::full(self.swarm.piece_count());
        self.swarm
            .on_message(peer, Message::Bitfield(bf.to_bytes()))
            .unwrap();
    }

    fn deliver_block(&self, peer: &Arc<SharingPeer>, index: u32, offset: u32) {
        let length = self.swarm.layout().block_size(index, offset);
        let bytes = piece_content(index, self.swarm.layout().piece_size(index));
        let data = Bytes::copy_from_slice(&bytes[offset as usize..(offset + length) as usize]);
        self.swarm
            .on_message(
                peer,
                Message::Piece {
                    index,
                    begin: offset,
                    data,
                },
            )
            .unwrap();
    }

    /// Delivers every block of the piece currently assigned to `peer`.
    fn deliver_assigned(&self, peer: &Arc<SharingPeer>) -> u32 {
        let index = peer.requested_piece().expect("peer has a piece assigned");
        for block in 0..self.swarm.layout().block_count(index) {
            self.deliver_block(peer, index, block * crate::constants::BLOCK_SIZE);
        }
        index
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<SwarmEvent>) -> Vec<SwarmEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// =========================================================================
// Lifecycle
// =========================================================================

#[test]
fn operations_require_started() {
    let layout = make_layout(4, 16384);
    let store = Arc::new(MemoryStore::new(layout.clone()));
    let transport = Arc::new(NullTransport {
        dialed: Mutex::new(Vec::new()),
    });
    let swarm = SwarmCoordinator::new(
        InfoHash([1u8; 20]),
        layout,
        Tunables::default(),
        store,
        transport,
    );

    assert!(matches!(
        swarm.add_peer_candidate("1.2.3.4:6881".parse().unwrap()),
        Err(SwarmError::BadState(Lifecycle::Stopped))
    ));
    assert!(matches!(swarm.tick(), Err(SwarmError::BadState(_))));

    swarm.start().unwrap();
    assert_eq!(swarm.lifecycle(), Lifecycle::Started);
    // Double start is a contract violation.
    assert!(matches!(
        swarm.start(),
        Err(SwarmError::BadTransition { .. })
    ));

    swarm.stop().unwrap();
    assert_eq!(swarm.lifecycle(), Lifecycle::Stopped);
    assert!(matches!(swarm.stop(), Err(SwarmError::BadTransition { .. })));
}

#[test]
fn stop_cancels_outstanding_and_closes_links() {
    let h = harness(4, 65536, Tunables::default());
    let (peer, link) = h.connect("1.1.1.1:6881", 1);
    h.advertise_all(&peer);
    h.swarm.on_message(&peer, Message::Unchoke).unwrap();
    assert!(peer.outstanding_count() > 0);

    h.swarm.stop().unwrap();
    assert_eq!(peer.outstanding_count(), 0);
    assert!(link.is_closed());
    assert!(matches!(h.swarm.tick(), Err(SwarmError::BadState(_))));
}

// =========================================================================
// Availability bookkeeping
// =========================================================================

#[test]
fn bitfield_round_trip_restores_availability() {
    let h = harness(4, 16384, Tunables::default());
    let (peer, _link) = h.connect("1.1.1.1:6881", 1);

    h.advertise(&peer, &[0, 2]);
    assert_eq!(h.swarm.piece_availability(0), Some(1));
    assert_eq!(h.swarm.piece_availability(1), Some(0));
    assert_eq!(h.swarm.piece_availability(2), Some(1));

    h.advertise(&peer, &[]);
    for index in 0..4 {
        assert_eq!(h.swarm.piece_availability(index), Some(0));
    }
}

#[test]
fn have_is_idempotent() {
    let h = harness(4, 16384, Tunables::default());
    let (peer, _link) = h.connect("1.1.1.1:6881", 1);

    h.swarm.on_message(&peer, Message::Have { piece: 1 }).unwrap();
    h.swarm.on_message(&peer, Message::Have { piece: 1 }).unwrap();
    assert_eq!(h.swarm.piece_availability(1), Some(1));
}

#[test]
fn disconnect_subtracts_availability() {
    let h = harness(4, 16384, Tunables::default());
    let (a, _la) = h.connect("1.1.1.1:6881", 1);
    let (b, _lb) = h.connect("2.2.2.2:6881", 2);
    h.advertise(&a, &[3]);
    h.advertise(&b, &[3]);
    assert_eq!(h.swarm.piece_availability(3), Some(2));

    h.swarm.on_disconnect(&b).unwrap();
    assert_eq!(h.swarm.piece_availability(3), Some(1));
    assert!(b.pieces().is_empty());

    // The selector now sees the piece as unique to the remaining peer.
    let partial = h.swarm.next_piece_for(&a).unwrap();
    assert_eq!(partial.index(), 3);
}

// =========================================================================
// Piece selection
// =========================================================================

#[test]
fn two_peer_rarest_first() {
    let h = harness(4, 16384, Tunables::default());
    let (a, _la) = h.connect("1.1.1.1:6881", 1);
    let (b, _lb) = h.connect("2.2.2.2:6881", 2);
    h.advertise(&a, &[0, 1, 2]);
    h.advertise(&b, &[0]);

    // Pieces 1 and 2 are rarer (availability 1) than piece 0 (availability
    // 2); the first two picks must cover exactly {1, 2}.
    let first = h.swarm.next_piece_for(&a).unwrap().index();
    assert!(first == 1 || first == 2);
    let second = h.swarm.next_piece_for(&a).unwrap().index();
    assert!(second == 1 || second == 2);
    assert_ne!(first, second);

    let third = h.swarm.next_piece_for(&a).unwrap().index();
    assert_eq!(third, 0);

    // Everything interesting is requested and we are far from end-game.
    assert!(h.swarm.next_piece_for(&a).is_none());
}

#[test]
fn selector_prefers_strictly_rarest() {
    let h = harness(4, 16384, Tunables::default());
    let (a, _la) = h.connect("1.1.1.1:6881", 1);
    let (b, _lb) = h.connect("2.2.2.2:6881", 2);
    h.advertise(&a, &[0, 1, 2]);
    h.advertise(&b, &[1, 2]);

    // Piece 0 is the unique rarest piece in a's interesting set.
    assert_eq!(h.swarm.next_piece_for(&a).unwrap().index(), 0);
}

#[test]
fn selector_has_nothing_for_empty_bitfield() {
    let h = harness(4, 16384, Tunables::default());
    let (a, _la) = h.connect("1.1.1.1:6881", 1);
    assert!(h.swarm.next_piece_for(&a).is_none());
}

#[test]
fn completed_piece_is_never_reselected() {
    let h = harness(2, 16384, Tunables::default());
    let (a, _la) = h.connect("1.1.1.1:6881", 1);
    h.advertise(&a, &[0]);
    h.swarm.on_message(&a, Message::Unchoke).unwrap();
    h.deliver_assigned(&a);
    assert_eq!(h.swarm.completed_count(), 1);
    assert!(!h.swarm.is_requested(0));

    // Peer a only has the completed piece; nothing left to pick.
    assert!(h.swarm.next_piece_for(&a).is_none());
}

#[test]
fn end_game_only_past_completion_ratio() {
    let h = harness(20, 16384, Tunables::default());
    let (a, _la) = h.connect("1.1.1.1:6881", 1);
    h.advertise_all(&a);
    h.swarm.on_message(&a, Message::Unchoke).unwrap();

    // 18/20 = 0.90, below the 0.95 default.
    while h.swarm.completed_count() < 18 {
        h.deliver_assigned(&a);
    }
    let in_flight = a.requested_piece().unwrap();

    let (b, _lb) = h.connect("2.2.2.2:6881", 2);
    h.advertise(&b, &[in_flight]);
    assert!(h.swarm.next_piece_for(&b).is_none());

    // 19/20 = 0.95 turns end-game on.
    h.deliver_assigned(&a);
    let last = a.requested_piece().unwrap();
    h.swarm.on_message(&b, Message::Have { piece: last }).unwrap();
    let dup = h.swarm.next_piece_for(&b).unwrap();
    assert_eq!(dup.index(), last);
    assert!(h.swarm.is_requested(last));
}

// =========================================================================
// Partial pieces
// =========================================================================

#[test]
fn choke_mid_transfer_parks_partial_for_adoption() {
    let h = harness(8, 65536, Tunables::default());
    let (a, la) = h.connect("1.1.1.1:6881", 1);
    h.advertise(&a, &[7]);
    assert!(la.sent().contains(&Message::Interested));

    h.swarm.on_message(&a, Message::Unchoke).unwrap();
    assert_eq!(a.requested_piece(), Some(7));
    assert_eq!(a.outstanding_count(), 4);

    // Two of four blocks arrive, then the choke.
    h.deliver_block(&a, 7, 0);
    h.deliver_block(&a, 7, 16384);
    h.swarm.on_message(&a, Message::Choke).unwrap();

    assert!(!h.swarm.is_requested(7));
    assert_eq!(h.swarm.partial_count(), 1);
    assert_eq!(a.requested_piece(), None);
    assert_eq!(a.outstanding_count(), 0);

    // Another peer advertising the piece adopts the orphan.
    let (b, _lb) = h.connect("2.2.2.2:6881", 2);
    h.advertise(&b, &[7]);
    h.swarm.on_message(&b, Message::Unchoke).unwrap();

    assert_eq!(h.swarm.partial_count(), 0);
    assert!(h.swarm.is_requested(7));
    assert_eq!(b.requested_piece(), Some(7));
    // Only the two missing blocks go out.
    assert_eq!(b.outstanding_count(), 2);

    // Finishing through b validates against the store.
    h.deliver_block(&b, 7, 32768);
    h.deliver_block(&b, 7, 49152);
    assert_eq!(h.swarm.completed_count(), 1);
    assert!(!h.swarm.is_requested(7));
}

#[test]
fn choke_without_progress_releases_the_piece() {
    let h = harness(4, 65536, Tunables::default());
    let (a, _la) = h.connect("1.1.1.1:6881", 1);
    h.advertise(&a, &[2]);
    h.swarm.on_message(&a, Message::Unchoke).unwrap();
    assert!(h.swarm.is_requested(2));

    h.swarm.on_message(&a, Message::Choke).unwrap();
    assert!(!h.swarm.is_requested(2));
    // No blocks arrived, so nothing is parked.
    assert_eq!(h.swarm.partial_count(), 0);

    // The piece is selectable again.
    assert_eq!(h.swarm.next_piece_for(&a).unwrap().index(), 2);
}

// =========================================================================
// Registry identity
// =========================================================================

#[test]
fn duplicate_identity_resolves_to_one_peer() {
    let h = harness(4, 16384, Tunables::default());
    let id = PeerId([9u8; 20]);

    let first_link = FakeLink::new();
    let first = h
        .swarm
        .on_handshake_complete("1.2.3.4:6881".parse().unwrap(), id, first_link.clone())
        .unwrap();

    // Same identity shows up again from a different port.
    let second_link = FakeLink::new();
    let second = h
        .swarm
        .on_handshake_complete("1.2.3.4:7000".parse().unwrap(), id, second_link.clone())
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.swarm.peers().len(), 1);
    // The duplicate connection lost the race and was closed.
    assert!(second_link.is_closed());
    assert!(!first_link.is_closed());
    // Reachable under all three keys.
    assert!(h.swarm.peers().get("1.2.3.4:6881".parse().unwrap()).is_some());
    assert!(h.swarm.peers().get("1.2.3.4:7000".parse().unwrap()).is_some());
    assert!(h.swarm.peers().get_by_id(&id).is_some());
}

#[test]
fn failed_connection_removes_candidate() {
    let h = harness(4, 16384, Tunables::default());
    let addr: SocketAddr = "9.9.9.9:6881".parse().unwrap();

    h.swarm.add_peer_candidate(addr).unwrap();
    assert_eq!(h.transport.dialed.lock().as_slice(), &[addr]);
    assert_eq!(h.swarm.peers().len(), 1);

    h.swarm
        .on_connection_failed(addr, &PeerError::HandshakeRejected)
        .unwrap();
    assert!(h.swarm.peers().is_empty());
}

// =========================================================================
// End-game completion
// =========================================================================

#[test]
fn end_game_duplicate_is_cancelled_and_late_block_discarded() {
    let tunables = Tunables {
        end_game_completion_ratio: 0.7,
        ..Tunables::default()
    };
    let h = harness(4, 16384, tunables);
    let mut events = h.swarm.subscribe();

    let (a, _la) = h.connect("1.1.1.1:6881", 1);
    h.advertise_all(&a);
    h.swarm.on_message(&a, Message::Unchoke).unwrap();

    while h.swarm.completed_count() < 3 {
        h.deliver_assigned(&a);
    }
    let last = a.requested_piece().unwrap();

    // b joins late and doubles up on the final piece via end-game.
    let (b, lb) = h.connect("2.2.2.2:6881", 2);
    h.advertise_all(&b);
    h.swarm.on_message(&b, Message::Unchoke).unwrap();
    assert_eq!(b.requested_piece(), Some(last));

    // a wins the race.
    h.deliver_block(&a, last, 0);
    assert!(h.swarm.is_complete());
    assert_eq!(h.swarm.phase(), Phase::Seeding);
    assert!(h.swarm.requested_pieces().is_empty());

    // b was told to stop fetching the piece...
    assert!(lb
        .sent()
        .iter()
        .any(|m| matches!(m, Message::Cancel { index, .. } if *index == last)));
    assert_eq!(b.requested_piece(), None);

    // ...but its in-flight block still lands, and is absorbed quietly.
    let data = Bytes::from(piece_content(last, 16384));
    h.swarm
        .on_message(
            &b,
            Message::Piece {
                index: last,
                begin: 0,
                data,
            },
        )
        .unwrap();
    assert!(!lb.is_closed());

    let seen = drain(&mut events);
    assert!(seen.contains(&SwarmEvent::Finished));
    assert_eq!(
        seen.iter()
            .filter(|e| matches!(e, SwarmEvent::PieceCompleted { .. }))
            .count(),
        4
    );
}

#[test]
fn completion_broadcasts_have_and_retracts_interest() {
    let h = harness(1, 32768, Tunables::default());
    let (a, la) = h.connect("1.1.1.1:6881", 1);
    let (b, lb) = h.connect("2.2.2.2:6881", 2);
    h.advertise_all(&a);
    h.advertise(&b, &[]);

    h.swarm.on_message(&a, Message::Unchoke).unwrap();
    h.deliver_assigned(&a);

    for link in [&la, &lb] {
        assert!(link.sent().contains(&Message::Have { piece: 0 }));
    }
    // Nothing left to want from anyone.
    assert!(la.sent().contains(&Message::NotInterested));
}

// =========================================================================
// Choke scheduling
// =========================================================================

#[test]
fn slate_caps_unchokes_and_rotates_optimistic() {
    let mut scheduler = ChokeScheduler::new(4, 3);
    let candidates: Vec<ChokeCandidate> = (0..6)
        .map(|i| ChokeCandidate {
            addr: format!("10.0.0.{}:6881", i + 1).parse().unwrap(),
            rate: 1000.0 * (6 - i) as f64,
        })
        .collect();

    // Ticks 1-3 are regular: four slots, two choked, no optimistic.
    for _ in 0..3 {
        let slate = scheduler.tick(candidates.clone());
        assert_eq!(slate.unchoke.len(), 4);
        assert_eq!(slate.choke.len(), 2);
        assert!(slate.optimistic.is_none());
    }

    // Tick 4 grants the optimistic slot to one of the choked pair.
    assert!(scheduler.next_tick_is_optimistic());
    let slate = scheduler.tick(candidates.clone());
    assert_eq!(slate.unchoke.len(), 4);
    let lucky = slate.optimistic.unwrap();
    assert!(!slate.choke.contains(&lucky));
    assert!(!slate.unchoke.contains(&lucky));
    assert_eq!(slate.choke.len(), 1);

    // Best rates keep their slots.
    let fastest: SocketAddr = "10.0.0.1:6881".parse().unwrap();
    assert_eq!(slate.unchoke[0], fastest);
}

#[test]
fn slate_is_empty_without_candidates() {
    let mut scheduler = ChokeScheduler::new(4, 3);
    let slate = scheduler.tick(Vec::new());
    assert!(slate.unchoke.is_empty());
    assert!(slate.choke.is_empty());
    assert!(slate.optimistic.is_none());
}

#[test]
fn optimistic_unchoke_survives_one_tick_only() {
    let h = harness(4, 16384, Tunables::default());

    // Five interested peers with distinct download rates.
    let peers: Vec<Arc<SharingPeer>> = (0..5)
        .map(|i| {
            let (peer, _link) = h.connect(&format!("10.0.0.{}:6881", i + 1), i as u8 + 1);
            h.swarm.on_message(&peer, Message::Interested).unwrap();
            peer.record_downloaded((100_000 - 20_000 * i) as u64);
            peer
        })
        .collect();
    let slowest = peers[4].clone();

    // Ticks 1-3: top four unchoked, the slowest stays choked.
    for _ in 0..3 {
        h.swarm.tick().unwrap();
    }
    for peer in &peers[..4] {
        assert!(!peer.flags().am_choking);
    }
    assert!(slowest.flags().am_choking);

    // Tick 4 is optimistic: the choke list is just the slowest peer, so it
    // gets the slot.
    h.swarm.tick().unwrap();
    assert!(!slowest.flags().am_choking);

    // Unchoked interested peers never exceed the cap plus the holdover.
    let unchoked = peers.iter().filter(|p| !p.flags().am_choking).count();
    assert!(unchoked <= 4 + 1);

    // Tick 5 is regular again and the slot is withdrawn.
    h.swarm.tick().unwrap();
    assert!(slowest.flags().am_choking);
}

// =========================================================================
// Upload path
// =========================================================================

#[test]
fn serves_blocks_to_unchoked_interested_peers() {
    let h = harness(1, 32768, Tunables::default());
    let (a, _la) = h.connect("1.1.1.1:6881", 1);
    h.advertise_all(&a);
    h.swarm.on_message(&a, Message::Unchoke).unwrap();
    h.deliver_assigned(&a);
    assert!(h.swarm.is_complete());

    // A fresh peer is greeted with our bitfield.
    let (b, lb) = h.connect("2.2.2.2:6881", 2);
    assert!(matches!(lb.sent().first(), Some(Message::Bitfield(_))));

    // Requests while choked are dropped on the floor.
    h.swarm.on_message(&b, Message::Interested).unwrap();
    h.swarm
        .on_message(
            &b,
            Message::Request {
                index: 0,
                begin: 0,
                length: 16384,
            },
        )
        .unwrap();
    assert!(!lb.sent().iter().any(|m| matches!(m, Message::Piece { .. })));

    // The scheduler unchokes the only interested peer.
    h.swarm.tick().unwrap();
    assert!(lb.sent().contains(&Message::Unchoke));

    h.swarm
        .on_message(
            &b,
            Message::Request {
                index: 0,
                begin: 16384,
                length: 16384,
            },
        )
        .unwrap();
    let expected = piece_content(0, 32768)[16384..].to_vec();
    assert!(lb.sent().iter().any(|m| matches!(
        m,
        Message::Piece { index: 0, begin: 16384, data } if data[..] == expected[..]
    )));
    assert_eq!(h.swarm.uploaded(), 16384);
}

#[test]
fn request_for_missing_piece_closes_peer() {
    let h = harness(2, 16384, Tunables::default());
    let (a, la) = h.connect("1.1.1.1:6881", 1);
    a.unchoke();

    h.swarm
        .on_message(
            &a,
            Message::Request {
                index: 1,
                begin: 0,
                length: 16384,
            },
        )
        .unwrap();
    assert!(la.is_closed());
    assert!(!a.is_connected());
}

#[test]
fn request_outside_piece_bounds_closes_peer() {
    let h = harness(1, 32768, Tunables::default());
    let (a, la) = h.connect("1.1.1.1:6881", 1);
    h.advertise_all(&a);
    h.swarm.on_message(&a, Message::Unchoke).unwrap();
    h.deliver_assigned(&a);

    let (b, lb) = h.connect("2.2.2.2:6881", 2);
    b.unchoke();
    h.swarm
        .on_message(
            &b,
            Message::Request {
                index: 0,
                begin: 30000,
                length: 16384,
            },
        )
        .unwrap();
    assert!(lb.is_closed());
    let _ = la;
}

// =========================================================================
// Error handling
// =========================================================================

#[test]
fn unsolicited_block_is_a_protocol_violation() {
    let h = harness(4, 16384, Tunables::default());
    let mut events = h.swarm.subscribe();
    let (a, la) = h.connect("1.1.1.1:6881", 1);
    h.advertise(&a, &[0]);
    drain(&mut events);

    // A block for a piece we never requested from anyone.
    h.swarm
        .on_message(
            &a,
            Message::Piece {
                index: 1,
                begin: 0,
                data: Bytes::from_static(&[0u8; 16384]),
            },
        )
        .unwrap();

    assert!(la.is_closed());
    assert!(!a.is_connected());
    // Its availability contribution is gone with it.
    assert_eq!(h.swarm.piece_availability(0), Some(0));
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SwarmEvent::PeerDisconnected { .. })));
}

#[test]
fn invalid_piece_is_released_for_retry() {
    let h = harness(2, 16384, Tunables::default());
    let mut events = h.swarm.subscribe();
    let (a, _la) = h.connect("1.1.1.1:6881", 1);
    h.advertise(&a, &[0]);
    h.swarm.on_message(&a, Message::Unchoke).unwrap();
    assert_eq!(a.requested_piece(), Some(0));

    // Deliver garbage for the whole piece.
    h.swarm
        .on_message(
            &a,
            Message::Piece {
                index: 0,
                begin: 0,
                data: Bytes::from(vec![0xEEu8; 16384]),
            },
        )
        .unwrap();

    assert_eq!(h.swarm.completed_count(), 0);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SwarmEvent::PieceRejected { index: 0 })));
    // The peer is re-assigned the released piece and redelivers, this time
    // with valid data.
    assert_eq!(a.requested_piece(), Some(0));
    h.deliver_assigned(&a);
    assert_eq!(h.swarm.completed_count(), 1);
    // Redundant bytes were still counted.
    assert_eq!(h.swarm.downloaded(), 2 * 16384);
}

#[test]
fn io_error_drops_link_and_pipeline() {
    let h = harness(4, 65536, Tunables::default());
    let (a, _la) = h.connect("1.1.1.1:6881", 1);
    h.advertise(&a, &[1]);
    h.swarm.on_message(&a, Message::Unchoke).unwrap();
    assert!(a.outstanding_count() > 0);

    h.swarm
        .on_io_error(&a, &PeerError::Io(std::io::Error::other("broken pipe")))
        .unwrap();

    assert!(!a.is_connected());
    // No connection, no outstanding requests.
    assert_eq!(a.outstanding_count(), 0);
    assert!(!h.swarm.is_requested(1));

    // The transport's disconnect completes the cleanup.
    h.swarm.on_disconnect(&a).unwrap();
    assert_eq!(h.swarm.piece_availability(1), Some(0));
}

#[test]
fn counters_are_monotone() {
    let h = harness(2, 32768, Tunables::default());
    let (a, _la) = h.connect("1.1.1.1:6881", 1);
    h.advertise_all(&a);
    h.swarm.on_message(&a, Message::Unchoke).unwrap();

    let mut last = 0;
    for _ in 0..2 {
        h.deliver_assigned(&a);
        let now = h.swarm.downloaded();
        assert!(now > last);
        last = now;
    }
    assert_eq!(h.swarm.downloaded(), 2 * 32768);
    assert_eq!(h.swarm.bytes_left(), 0);
}
