use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::peer::peer_id::PeerId;
use crate::peer::sharing::SharingPeer;

// Record store plus two indexes, all guarded by the one registry lock.
// Records are keyed by their canonical endpoint (the one they were created
// under); both indexes resolve to that key.
struct RegistryInner {
    records: HashMap<SocketAddr, Arc<SharingPeer>>,
    by_addr: HashMap<SocketAddr, SocketAddr>,
    by_id: HashMap<PeerId, SocketAddr>,
}

/// The per-torrent peer registry.
///
/// Every peer is reachable both by its network endpoint and, once known, by
/// its self-declared peer ID, and both keys resolve to the same record. A
/// peer whose port we learn late (or that reconnects from a different
/// port) accumulates endpoint aliases; removal unbinds the ID and every
/// alias in one critical section.
pub struct PeerRegistry {
    piece_count: usize,
    rate_window: u32,
    inner: Mutex<RegistryInner>,
}

impl PeerRegistry {
    pub fn new(piece_count: usize, rate_window: u32) -> Self {
        Self {
            piece_count,
            rate_window,
            inner: Mutex::new(RegistryInner {
                records: HashMap::new(),
                by_addr: HashMap::new(),
                by_id: HashMap::new(),
            }),
        }
    }

    /// Looks a peer up by ID first, then by endpoint, creating a fresh
    /// record when neither key is known. Never fails; missing index entries
    /// are installed on the way out, so later lookups under either key hit
    /// the same record.
    pub fn get_or_create(&self, addr: SocketAddr, peer_id: Option<PeerId>) -> Arc<SharingPeer> {
        let mut inner = self.inner.lock();

        if let Some(id) = peer_id {
            if let Some(&canonical) = inner.by_id.get(&id) {
                let peer = inner.records[&canonical].clone();
                trace!(peer = %addr, %id, "found peer by id");
                inner.by_addr.insert(addr, canonical);
                return peer;
            }
        }

        if let Some(&canonical) = inner.by_addr.get(&addr) {
            let peer = inner.records[&canonical].clone();
            if let Some(id) = peer_id {
                trace!(peer = %addr, %id, "recording peer id for known endpoint");
                inner.by_id.insert(id, canonical);
                peer.set_peer_id(id);
            }
            return peer;
        }

        let peer = Arc::new(SharingPeer::new(
            addr,
            peer_id,
            self.piece_count,
            self.rate_window,
        ));
        trace!(peer = %addr, "created new peer");
        inner.records.insert(addr, peer.clone());
        inner.by_addr.insert(addr, addr);
        if let Some(id) = peer_id {
            inner.by_id.insert(id, addr);
        }
        peer
    }

    /// Looks a peer up by endpoint (canonical or alias).
    pub fn get(&self, addr: SocketAddr) -> Option<Arc<SharingPeer>> {
        let inner = self.inner.lock();
        let canonical = *inner.by_addr.get(&addr)?;
        inner.records.get(&canonical).cloned()
    }

    /// Looks a peer up by its declared identity.
    pub fn get_by_id(&self, id: &PeerId) -> Option<Arc<SharingPeer>> {
        let inner = self.inner.lock();
        let canonical = *inner.by_id.get(id)?;
        inner.records.get(&canonical).cloned()
    }

    /// Unbinds a record from the registry: the canonical key, the ID key
    /// and every endpoint alias go in one atomic sweep.
    pub fn remove(&self, peer: &Arc<SharingPeer>) {
        let canonical = peer.addr();
        let mut inner = self.inner.lock();
        inner.records.remove(&canonical);
        inner.by_addr.retain(|_, c| *c != canonical);
        inner.by_id.retain(|_, c| *c != canonical);
    }

    /// Number of distinct peer records.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    /// Number of records with a live connection.
    pub fn connected_count(&self) -> usize {
        self.snapshot().iter().filter(|p| p.is_connected()).count()
    }

    /// Clones out the current records so callers can iterate without
    /// holding the registry lock.
    pub fn snapshot(&self) -> Vec<Arc<SharingPeer>> {
        self.inner.lock().records.values().cloned().collect()
    }
}
