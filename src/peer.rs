//! Per-peer state and the peer registry.
//!
//! This module owns everything the coordinator knows about a single remote:
//! its advertised pieces, the four-way choke/interest flags, the request
//! pipeline, and the smoothed transfer rates that feed the choke scheduler.
//! The [`PeerRegistry`] maps both a remote's endpoint and its declared
//! identity onto one [`SharingPeer`] record.

mod bitfield;
mod error;
mod message;
mod peer_id;
mod rate;
mod registry;
mod sharing;

pub use bitfield::Bitfield;
pub use error::PeerError;
pub use message::{Block, BlockRequest, Message};
pub use peer_id::PeerId;
pub use rate::RateMeter;
pub use registry::PeerRegistry;
pub use sharing::{ChokeFlags, SharingPeer};
