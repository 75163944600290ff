use std::net::SocketAddr;

use rand::Rng as _;

/// A connected, interested peer up for an unchoke slot, with the transfer
/// rate it is ranked by.
#[derive(Debug, Clone, Copy)]
pub struct ChokeCandidate {
    pub addr: SocketAddr,
    pub rate: f64,
}

/// The choke scheduler's decision for one tick.
#[derive(Debug, Default)]
pub struct ChokeSlate {
    /// Peers granted a regular unchoke slot, best rate first.
    pub unchoke: Vec<SocketAddr>,
    /// Peers to choke this tick.
    pub choke: Vec<SocketAddr>,
    /// The optimistic unchoke, when this tick granted one.
    pub optimistic: Option<SocketAddr>,
}

/// Tit-for-tat unchoke slate computation.
///
/// Pure bookkeeping over candidate snapshots: the caller gathers connected
/// interested peers with their rates (download rate while leeching, upload
/// rate once seeding), and applies the returned slate to the actual peer
/// records. Holds only the optimistic countdown, which the swarm lock
/// guards along with the rest of the scheduler state.
#[derive(Debug)]
pub struct ChokeScheduler {
    max_unchoked: usize,
    optimistic_iterations: u32,
    optimistic_countdown: u32,
}

impl ChokeScheduler {
    pub fn new(max_unchoked: usize, optimistic_iterations: u32) -> Self {
        Self {
            max_unchoked,
            optimistic_iterations,
            optimistic_countdown: 0,
        }
    }

    /// Runs one scheduler tick over the candidate set.
    ///
    /// The best-rated `max_unchoked` candidates get regular slots; the rest
    /// are choked, except that every `optimistic_iterations`-th tick one of
    /// them, picked uniformly at random, is kept unchoked so new peers can
    /// bootstrap a reciprocity relationship.
    pub fn tick(&mut self, mut candidates: Vec<ChokeCandidate>) -> ChokeSlate {
        self.optimistic_countdown = if self.optimistic_countdown == 0 {
            self.optimistic_iterations
        } else {
            self.optimistic_countdown - 1
        };
        let optimistic_tick = self.optimistic_countdown == 0;

        let mut slate = ChokeSlate::default();
        if candidates.is_empty() {
            return slate;
        }

        candidates.sort_by(|a, b| b.rate.partial_cmp(&a.rate).unwrap_or(std::cmp::Ordering::Equal));

        let downloaders = candidates.len().min(self.max_unchoked);
        slate.unchoke = candidates[..downloaders].iter().map(|c| c.addr).collect();
        slate.choke = candidates[downloaders..].iter().map(|c| c.addr).collect();

        if optimistic_tick && !slate.choke.is_empty() {
            let lucky = rand::rng().random_range(0..slate.choke.len());
            slate.optimistic = Some(slate.choke.swap_remove(lucky));
        }

        slate
    }

    /// Whether the next call to [`ChokeScheduler::tick`] will be an
    /// optimistic one.
    pub fn next_tick_is_optimistic(&self) -> bool {
        self.optimistic_countdown == 1 || (self.optimistic_countdown == 0 && self.optimistic_iterations == 0)
    }
}
