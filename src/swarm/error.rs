use thiserror::Error;

use crate::store::StoreError;
use crate::swarm::Lifecycle;

/// Errors the swarm coordinator surfaces to its caller.
///
/// Peer-scoped failures never appear here; they are absorbed internally
/// and converted to disconnects. What remains is caller contract
/// violations and piece-store trouble.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// A coordinator operation was invoked outside the STARTED state.
    #[error("operation invalid while {0:?}")]
    BadState(Lifecycle),

    /// An illegal lifecycle transition was requested, e.g. `start` on a
    /// coordinator that is already running.
    #[error("cannot transition from {from:?} to {to:?}")]
    BadTransition { from: Lifecycle, to: Lifecycle },

    /// The piece store failed underneath us.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
