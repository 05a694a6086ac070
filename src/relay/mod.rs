//! Transparent relay between peer connections.
//!
//! The relay reads frames from every connection it serves, routes each call
//! request to a peer picked by a [`PeerSelector`], and forwards the rest of
//! the call's frames between the two legs without decoding their bodies.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use muxwire::relay::{PeerSelector, RelayBuilder, StaticPeerSelector};
//!
//! let selector = Arc::new(StaticPeerSelector::new());
//! selector.register("search", "10.0.0.2:200");
//!
//! let relay = RelayBuilder::new(selector).max_pending_frames(256).build();
//! assert_eq!(relay.active_calls(), 0);
//! ```

use std::fmt;

mod calls;
mod connection;
mod peer_selector;
mod router;

pub use calls::{CallKey, CallTable, Leg, RelayCall, REQUEST_OPEN, RESPONSE_OPEN};
pub use connection::Connection;
pub use peer_selector::{PeerSelector, RoundRobinPeerSelector, StaticPeerSelector, DEFAULT_SEED};
pub use router::{Relay, RelayBuilder, RelayConfig, Route, DEFAULT_READ_BUFFER_SIZE};

/// Identifier the relay assigns to each connection it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
