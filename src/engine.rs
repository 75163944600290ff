//! The client shell around per-torrent swarms.
//!
//! An [`Engine`] owns every active [`SwarmCoordinator`], drives their choke
//! schedulers from one timer task, and runs announce loops against
//! whatever [`TrackerClient`] the embedder plugs in. It is deliberately
//! mechanical; all the interesting decisions live in the swarm module.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Tunables;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::layout::InfoHash;
use crate::peer::PeerId;
use crate::swarm::{Lifecycle, SwarmCoordinator, SwarmError};
use crate::tracker::{AnnounceEvent, AnnounceRequest, TrackerClient};

/// Client-level notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StateChanged(Lifecycle),
    TorrentAdded { info_hash: InfoHash },
    TorrentRemoved { info_hash: InfoHash },
}

/// A BitTorrent client: a set of swarms behind one identity and one timer.
pub struct Engine {
    peer_id: PeerId,
    port: u16,
    tunables: Tunables,
    torrents: DashMap<InfoHash, Arc<SwarmCoordinator>>,
    lifecycle: Mutex<Lifecycle>,
    events: broadcast::Sender<EngineEvent>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Creates an engine with a freshly generated peer ID. `port` is what
    /// we advertise to trackers as our listening port.
    pub fn new(port: u16, tunables: Tunables) -> Arc<Self> {
        Self::with_peer_id(PeerId::generate(), port, tunables)
    }

    pub fn with_peer_id(peer_id: PeerId, port: u16, tunables: Tunables) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            peer_id,
            port,
            tunables,
            torrents: DashMap::new(),
            lifecycle: Mutex::new(Lifecycle::Stopped),
            events,
            driver: Mutex::new(None),
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn transition(&self, from: Lifecycle, to: Lifecycle) -> Result<(), SwarmError> {
        let mut state = self.lifecycle.lock();
        if *state != from {
            return Err(SwarmError::BadTransition { from: *state, to });
        }
        *state = to;
        drop(state);
        let _ = self.events.send(EngineEvent::StateChanged(to));
        Ok(())
    }

    /// Starts the client and every registered torrent, then spawns the
    /// scheduler driver. Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<(), SwarmError> {
        self.transition(Lifecycle::Stopped, Lifecycle::Starting)?;
        info!(peer_id = %self.peer_id, "client starting");

        for entry in self.torrents.iter() {
            entry.value().start()?;
        }

        let engine = self.clone();
        let period = self.tunables.unchoke_period;
        *self.driver.lock() = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for entry in engine.torrents.iter() {
                    // A torrent stopped out from under the driver is fine.
                    let _ = entry.value().tick();
                }
            }
        }));

        self.transition(Lifecycle::Starting, Lifecycle::Started)?;
        info!(peer_id = %self.peer_id, torrents = self.torrents.len(), "client started");
        Ok(())
    }

    /// Stops the driver and every torrent, in the reverse of start order.
    pub fn stop(&self) -> Result<(), SwarmError> {
        self.transition(Lifecycle::Started, Lifecycle::Stopping)?;
        info!(peer_id = %self.peer_id, "client stopping");

        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        for entry in self.torrents.iter() {
            if let Err(err) = entry.value().stop() {
                warn!(torrent = %entry.key(), %err, "torrent did not stop cleanly");
            }
        }

        self.transition(Lifecycle::Stopping, Lifecycle::Stopped)?;
        info!(peer_id = %self.peer_id, "client stopped");
        Ok(())
    }

    /// Registers a torrent; it starts immediately when the client is
    /// already running.
    pub fn add_torrent(&self, torrent: Arc<SwarmCoordinator>) -> Result<(), SwarmError> {
        let info_hash = torrent.info_hash();
        // Holding the lifecycle lock pins the started/stopped decision.
        let state = self.lifecycle.lock();
        self.torrents.insert(info_hash, torrent.clone());
        if *state == Lifecycle::Started {
            torrent.start()?;
        }
        drop(state);
        debug!(torrent = %info_hash, "torrent added");
        let _ = self.events.send(EngineEvent::TorrentAdded { info_hash });
        Ok(())
    }

    /// Deregisters a torrent, stopping it if the client is running.
    pub fn remove_torrent(&self, info_hash: &InfoHash) -> Option<Arc<SwarmCoordinator>> {
        let state = self.lifecycle.lock();
        let (_, torrent) = self.torrents.remove(info_hash)?;
        if *state == Lifecycle::Started {
            if let Err(err) = torrent.stop() {
                warn!(torrent = %info_hash, %err, "torrent did not stop cleanly");
            }
        }
        drop(state);
        debug!(torrent = %info_hash, "torrent removed");
        let _ = self.events.send(EngineEvent::TorrentRemoved {
            info_hash: *info_hash,
        });
        Some(torrent)
    }

    pub fn torrent(&self, info_hash: &InfoHash) -> Option<Arc<SwarmCoordinator>> {
        self.torrents.get(info_hash).map(|t| t.value().clone())
    }

    pub fn torrent_count(&self) -> usize {
        self.torrents.len()
    }

    /// Announce loop for one torrent. Runs until the torrent stops or is
    /// removed, feeding every returned candidate into the swarm. Announce
    /// failures are retried after a backoff rather than surfaced.
    pub async fn run_announcer<T: TrackerClient>(&self, info_hash: InfoHash, tracker: &T) {
        const ANNOUNCE_RETRY: Duration = Duration::from_secs(30);

        let mut event = AnnounceEvent::Started;
        let mut was_complete = false;

        loop {
            let Some(torrent) = self.torrent(&info_hash) else {
                break;
            };
            if torrent.lifecycle() != Lifecycle::Started {
                break;
            }

            let complete = torrent.is_complete();
            if complete && !was_complete && event == AnnounceEvent::Periodic {
                event = AnnounceEvent::Completed;
            }
            was_complete = complete;

            let request = AnnounceRequest {
                info_hash,
                peer_id: self.peer_id,
                port: self.port,
                uploaded: torrent.uploaded(),
                downloaded: torrent.downloaded(),
                left: torrent.bytes_left(),
                event,
            };

            match tracker.announce(&request).await {
                Ok(response) => {
                    debug!(
                        torrent = %info_hash,
                        peers = response.peers.len(),
                        seeders = ?response.complete,
                        leechers = ?response.incomplete,
                        "announce ok"
                    );
                    for addr in response.peers {
                        let _ = torrent.add_peer_candidate(addr);
                    }
                    event = AnnounceEvent::Periodic;
                    tokio::time::sleep(response.interval).await;
                }
                Err(err) => {
                    warn!(torrent = %info_hash, %err, "announce failed");
                    tokio::time::sleep(ANNOUNCE_RETRY).await;
                }
            }
        }

        // Best-effort goodbye so the tracker can drop us promptly.
        let request = AnnounceRequest {
            info_hash,
            peer_id: self.peer_id,
            port: self.port,
            uploaded: 0,
            downloaded: 0,
            left: 0,
            event: AnnounceEvent::Stopped,
        };
        let _ = tracker.announce(&request).await;
    }
}
