//! Peer records and the per-peer state machine
//!
//! disconnected -> handshaking -> synced -> (repeated failure) ->
//! disconnected. A peer's controller identity becomes authoritative at its
//! first successful handshake.

use std::fmt;

use chrono::{DateTime, Utc};
use nexus_types::ControllerId;
use serde::{Deserialize, Serialize};

/// Connectivity state of one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    /// Not currently reachable; next round starts with a handshake.
    Disconnected,

    /// Handshake in flight.
    Handshaking,

    /// Exchanging deltas.
    Synced,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerStatus::Disconnected => write!(f, "disconnected"),
            PeerStatus::Handshaking => write!(f, "handshaking"),
            PeerStatus::Synced => write!(f, "synced"),
        }
    }
}

/// A known sibling controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationPeer {
    /// Identity learned at the first successful handshake.
    pub controller_id: Option<ControllerId>,

    /// Where to reach the peer.
    pub address: String,

    /// Connectivity state.
    pub status: PeerStatus,

    /// Highest local store sequence successfully shipped to this peer.
    pub last_sync_seq: u64,

    /// Consecutive failed handshakes or pushes.
    pub consecutive_failures: u32,

    /// Last successful exchange.
    pub last_seen: Option<DateTime<Utc>>,
}

impl FederationPeer {
    /// A freshly configured peer, not yet handshaken.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            controller_id: None,
            address: address.into(),
            status: PeerStatus::Disconnected,
            last_sync_seq: 0,
            consecutive_failures: 0,
            last_seen: None,
        }
    }
}
