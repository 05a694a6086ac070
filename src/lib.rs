//! # muxwire
//!
//! Wire-protocol core of a multiplexed RPC transport, and a transparent
//! relay built on it.
//!
//! Many concurrent calls share one persistent connection. Every call is a
//! sequence of frames tagged with the same message id: a call request,
//! optional continuations, and a final response or error.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): 16-byte frame header, frame buffering,
//!   a lazy call-request reader, and call completion detection
//! - **Relay** ([`relay`]): routes each call request to a peer chosen by a
//!   [`PeerSelector`](relay::PeerSelector) and forwards the rest of the
//!   call's frames unmodified
//! - **Writer** ([`writer`]): one batching writer task per connection
//! - **Trace** ([`trace`]): reporting of completed calls
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use muxwire::relay::{PeerSelector, RelayBuilder, StaticPeerSelector};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let selector = Arc::new(StaticPeerSelector::new());
//!     selector.register("search", "10.0.0.2:200");
//!     let relay = RelayBuilder::new(selector).build();
//!
//!     let listener = TcpListener::bind("127.0.0.1:0").await?;
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         let (reader, writer) = stream.into_split();
//!         relay.serve(Some(addr.to_string()), reader, writer);
//!     }
//! }
//! ```

pub mod atomic;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod trace;
pub mod writer;

pub use error::{FramingError, MuxwireError, Result};
pub use protocol::{Frame, LazyCallReq, MessageType};
pub use relay::{PeerSelector, Relay, RelayBuilder};
