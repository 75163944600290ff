//! Protocol constants and fixed tuning parameters.
//!
//! Values that embedders may want to change live in [`crate::config::Tunables`];
//! what remains here is either fixed by the wire protocol or has no sane
//! reason to vary per deployment.

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style).
pub const CLIENT_PREFIX: &[u8] = b"-SB0001-";

// ============================================================================
// Blocks and requests
// ============================================================================

/// Standard transfer block size (16KB).
pub const BLOCK_SIZE: u32 = 16384;

/// Maximum request length per BEP-3 (128KB). Larger requests are a protocol
/// violation.
pub const MAX_REQUEST_LENGTH: u32 = 131072;

/// Default number of outstanding block requests kept in flight per peer.
pub const DEFAULT_PIPELINE_DEPTH: usize = 5;

// ============================================================================
// Choking
// ============================================================================

/// Default choke-scheduler tick interval, in seconds.
pub const DEFAULT_UNCHOKE_PERIOD_SECS: u64 = 3;

/// One optimistic unchoke every N scheduler ticks.
pub const DEFAULT_OPTIMISTIC_ITERATIONS: u32 = 3;

/// Concurrent unchoke slots for interested peers.
pub const DEFAULT_MAX_DOWNLOADERS_UNCHOKE: usize = 4;

// ============================================================================
// Download strategy
// ============================================================================

/// Fraction of completed pieces before end-game mode engages.
pub const DEFAULT_END_GAME_COMPLETION_RATIO: f64 = 0.95;

/// Smoothing window for transfer-rate estimation, in scheduler ticks.
pub const DEFAULT_RATE_COMPUTATION_ITERATIONS: u32 = 2;

// ============================================================================
// Events
// ============================================================================

/// Buffered events per subscriber before a lagging receiver starts losing
/// notifications.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
