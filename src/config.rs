//! Runtime-tunable swarm parameters.

use std::time::Duration;

use crate::constants::{
    DEFAULT_END_GAME_COMPLETION_RATIO, DEFAULT_MAX_DOWNLOADERS_UNCHOKE,
    DEFAULT_OPTIMISTIC_ITERATIONS, DEFAULT_PIPELINE_DEPTH, DEFAULT_RATE_COMPUTATION_ITERATIONS,
    DEFAULT_UNCHOKE_PERIOD_SECS,
};

/// Tunable parameters of the swarm coordinator.
///
/// The defaults are the classic BitTorrent client values; most embedders
/// should leave them alone. A copy is taken per torrent when the coordinator
/// is built, so changing a `Tunables` value after that has no effect.
#[derive(Debug, Clone)]
pub struct Tunables {
    /// Choke-scheduler tick interval.
    pub unchoke_period: Duration,
    /// One optimistic unchoke every N scheduler ticks.
    pub optimistic_iterations: u32,
    /// Concurrent unchoke slots for interested peers.
    pub max_downloaders_unchoke: usize,
    /// Fraction of completed pieces before end-game mode engages.
    pub end_game_completion_ratio: f64,
    /// Smoothing window for rate estimation, in scheduler ticks.
    pub rate_computation_iterations: u32,
    /// Outstanding block requests kept in flight per peer.
    pub request_pipeline_depth: usize,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            unchoke_period: Duration::from_secs(DEFAULT_UNCHOKE_PERIOD_SECS),
            optimistic_iterations: DEFAULT_OPTIMISTIC_ITERATIONS,
            max_downloaders_unchoke: DEFAULT_MAX_DOWNLOADERS_UNCHOKE,
            end_game_completion_ratio: DEFAULT_END_GAME_COMPLETION_RATIO,
            rate_computation_iterations: DEFAULT_RATE_COMPUTATION_ITERATIONS,
            request_pipeline_depth: DEFAULT_PIPELINE_DEPTH,
        }
    }
}
