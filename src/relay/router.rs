//! Per-frame routing decisions.
//!
//! A call request is routed once: the lazy reader pulls out the service
//! name, the [`PeerSelector`] picks an address, and the call is registered
//! under both legs. Every later frame of the call is forwarded to the other
//! leg by table lookup alone.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::calls::{CallKey, CallTable, Leg, RelayCall, REQUEST_OPEN, RESPONSE_OPEN};
use super::{ConnectionId, PeerSelector};
use crate::atomic::Uint64;
use crate::error::{MuxwireError, Result};
use crate::protocol::{
    finishes_call, finishes_request, ping_res, ErrorCode, ErrorFrame, Frame, LazyCallReq,
    MessageType, DEFAULT_BUFFER_CAPACITY,
};
use crate::trace::{CallOutcome, CompletedCall, NullReporter, TraceReporter};
use crate::writer::{WriterConfig, WriterHandle};

/// Default size of each connection's read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = DEFAULT_BUFFER_CAPACITY;

/// Where a frame goes after routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Forward the frame, unmodified, to this connection.
    Forward(ConnectionId),
    /// Connection-level frame for the receiving connection to handle.
    Local,
    /// Discard the frame.
    Drop,
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Writer task settings applied to every connection.
    pub writer: WriterConfig,
    /// Bytes read from a connection per syscall.
    pub read_buffer_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// Builder for configuring and creating a [`Relay`].
pub struct RelayBuilder {
    selector: Arc<dyn PeerSelector>,
    reporter: Arc<dyn TraceReporter>,
    config: RelayConfig,
}

impl RelayBuilder {
    /// Start a builder that routes with `selector`.
    pub fn new(selector: Arc<dyn PeerSelector>) -> Self {
        Self {
            selector,
            reporter: Arc::new(NullReporter),
            config: RelayConfig::default(),
        }
    }

    /// Set the reporter for completed calls.
    ///
    /// Default: [`NullReporter`]
    pub fn reporter(mut self, reporter: Arc<dyn TraceReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Set the maximum pending frames per connection writer.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.writer.max_pending_frames = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.writer.backpressure_timeout = timeout;
        self
    }

    /// Set the per-connection read buffer size.
    ///
    /// Default: 64 KiB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size.max(1);
        self
    }

    /// Build the relay.
    pub fn build(self) -> Arc<Relay> {
        Arc::new(Relay {
            config: self.config,
            selector: self.selector,
            reporter: self.reporter,
            calls: CallTable::new(),
            connections: RwLock::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
            rejected: Mutex::new(HashSet::new()),
            next_connection: Uint64::new(0),
        })
    }
}

/// Routes calls between the connections it serves.
pub struct Relay {
    pub(super) config: RelayConfig,
    selector: Arc<dyn PeerSelector>,
    reporter: Arc<dyn TraceReporter>,
    calls: CallTable,
    connections: RwLock<HashMap<ConnectionId, WriterHandle>>,
    peers: RwLock<HashMap<String, ConnectionId>>,
    /// Fragmented call requests that were rejected before their last
    /// fragment arrived.
    rejected: Mutex<HashSet<CallKey>>,
    next_connection: Uint64,
}

impl Relay {
    /// Create a relay builder.
    pub fn builder(selector: Arc<dyn PeerSelector>) -> RelayBuilder {
        RelayBuilder::new(selector)
    }

    /// The relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// The peer selector used for routing.
    pub fn selector(&self) -> &Arc<dyn PeerSelector> {
        &self.selector
    }

    /// Register a connection's writer.
    ///
    /// `peer` is the `host:port` the selector uses for this connection; a
    /// connection registered without one can originate calls but is never
    /// chosen as a destination.
    pub fn register_connection(&self, peer: Option<String>, writer: WriterHandle) -> ConnectionId {
        let id = ConnectionId::new(self.next_connection.inc());
        self.connections.write().insert(id, writer);
        if let Some(peer) = peer {
            tracing::debug!(connection = %id, %peer, "Registered peer connection");
            self.peers.write().insert(peer, id);
        }
        id
    }

    /// Connection currently registered for `host_port`.
    pub fn connection_for_peer(&self, host_port: &str) -> Option<ConnectionId> {
        self.peers.read().get(host_port).copied()
    }

    /// Writer of a registered connection.
    pub fn writer(&self, id: ConnectionId) -> Option<WriterHandle> {
        self.connections.read().get(&id).cloned()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Number of calls in flight.
    pub fn active_calls(&self) -> usize {
        self.calls.len()
    }

    /// Find the call a frame on `connection` with `message_id` belongs to.
    pub fn call(&self, connection: ConnectionId, message_id: u32) -> Option<(Arc<RelayCall>, Leg)> {
        self.calls.lookup(&CallKey::new(connection, message_id))
    }

    /// Decide where `frame`, read from `inbound`, goes.
    ///
    /// Updates the call table as a side effect: call requests open a call,
    /// final fragments and error frames close it.
    pub fn route(&self, inbound: ConnectionId, frame: &Frame) -> Result<Route> {
        match frame.message_type() {
            MessageType::CallReq => self.open_call(inbound, frame).map_err(|err| {
                self.remember_rejected(inbound, frame, &err);
                err
            }),
            MessageType::CallReqContinue
            | MessageType::CallRes
            | MessageType::CallResContinue
            | MessageType::Error => self.continue_call(inbound, frame),
            MessageType::Cancel => {
                match self.call(inbound, frame.message_id()) {
                    Some((call, leg)) => Ok(Route::Forward(call.key(leg.other()).connection)),
                    None => {
                        tracing::debug!(
                            connection = %inbound,
                            message_id = frame.message_id(),
                            "Dropping cancel for unknown call"
                        );
                        Ok(Route::Drop)
                    }
                }
            }
            MessageType::InitReq
            | MessageType::InitRes
            | MessageType::PingReq
            | MessageType::PingRes
            | MessageType::Claim => Ok(Route::Local),
        }
    }

    fn open_call(&self, inbound: ConnectionId, frame: &Frame) -> Result<Route> {
        let message_id = frame.message_id();
        let caller = CallKey::new(inbound, message_id);
        self.rejected.lock().remove(&caller);
        match self.calls.lookup(&caller) {
            Some((_, Leg::Caller)) => {
                return Err(MuxwireError::DuplicateCall {
                    connection: inbound,
                    message_id,
                })
            }
            // The id is in use by a call relayed to this peer.
            Some((_, Leg::Callee)) => {
                return Err(MuxwireError::MessageIdCollision {
                    connection: inbound,
                    message_id,
                })
            }
            None => {}
        }

        let request = LazyCallReq::new(frame);
        let service = request.service_str()?;
        let host_port = self
            .selector
            .select(service)
            .ok_or_else(|| MuxwireError::NoPeer {
                service: service.to_owned(),
                message_id,
            })?;
        let destination =
            self.connection_for_peer(&host_port)
                .ok_or_else(|| MuxwireError::PeerUnavailable {
                    service: service.to_owned(),
                    host_port: host_port.clone(),
                })?;

        let mut state = RESPONSE_OPEN;
        if request.flags()?.has_more_fragments() {
            state |= REQUEST_OPEN;
        }
        let metadata = request.metadata()?;
        tracing::debug!(
            connection = %inbound,
            message_id,
            service = %metadata.service,
            method = %metadata.method,
            destination = %host_port,
            "Routing call"
        );

        let call = RelayCall::new(
            caller,
            CallKey::new(destination, message_id),
            metadata,
            host_port,
            state,
        );
        let call = self.calls.open(call)?;

        // The destination may have closed after it was selected, with its
        // cleanup running before the call was in the table.
        if self.writer(destination).is_none() {
            if !call.close_all() {
                // Connection cleanup got there first and failed the call.
                return Ok(Route::Drop);
            }
            self.calls.remove(&call);
            return Err(MuxwireError::PeerUnavailable {
                service: call.metadata().service.clone(),
                host_port: call.destination().to_owned(),
            });
        }
        Ok(Route::Forward(destination))
    }

    /// Remember a rejected call request whose continuations are still to
    /// come, so they can be dropped instead of failing the connection.
    fn remember_rejected(&self, inbound: ConnectionId, frame: &Frame, err: &MuxwireError) {
        if !err.is_routing_failure() {
            return;
        }
        let fragmented = LazyCallReq::new(frame)
            .flags()
            .is_ok_and(|flags| flags.has_more_fragments());
        if fragmented {
            self.rejected
                .lock()
                .insert(CallKey::new(inbound, frame.message_id()));
        }
    }

    fn continue_call(&self, inbound: ConnectionId, frame: &Frame) -> Result<Route> {
        let key = CallKey::new(inbound, frame.message_id());
        let found = self
            .calls
            .lookup(&key)
            .filter(|(_, leg)| sent_by(frame.message_type(), *leg));
        let Some((call, leg)) = found else {
            return self.drop_rejected(key, frame);
        };

        let (closing, outcome) = match frame.message_type() {
            MessageType::Error => {
                let code = ErrorFrame::peek_code(frame).unwrap_or(ErrorCode::Invalid);
                (REQUEST_OPEN | RESPONSE_OPEN, CallOutcome::failed(code))
            }
            MessageType::CallRes => {
                if let Some(&code) = frame.payload().get(1) {
                    call.record_response_code(code);
                }
                (response_bits(finishes_call(frame)?), response_outcome(&call))
            }
            MessageType::CallResContinue => {
                (response_bits(finishes_call(frame)?), response_outcome(&call))
            }
            _ => {
                let bits = if finishes_request(frame)? { REQUEST_OPEN } else { 0 };
                (bits, response_outcome(&call))
            }
        };

        let destination = call.key(leg.other()).connection;
        if closing != 0 && call.close(closing) {
            self.finish(&call, outcome);
        }
        Ok(Route::Forward(destination))
    }

    /// Drop a later frame of a rejected call request.
    ///
    /// Fails with `UnknownCall` if `key` names no rejected call.
    fn drop_rejected(&self, key: CallKey, frame: &Frame) -> Result<Route> {
        let ty = frame.message_type();
        if matches!(ty, MessageType::CallReqContinue | MessageType::Error) {
            let mut rejected = self.rejected.lock();
            if rejected.contains(&key) {
                if ty == MessageType::Error || finishes_request(frame)? {
                    rejected.remove(&key);
                }
                tracing::debug!(
                    connection = %key.connection,
                    message_id = key.message_id,
                    "Dropping {} frame of rejected call",
                    ty
                );
                return Ok(Route::Drop);
            }
        }
        Err(MuxwireError::UnknownCall {
            connection: key.connection,
            message_id: key.message_id,
        })
    }

    /// Number of rejected call requests still expecting continuations.
    pub fn rejected_calls(&self) -> usize {
        self.rejected.lock().len()
    }

    /// Remove a closed call and report it.
    fn finish(&self, call: &Arc<RelayCall>, outcome: CallOutcome) {
        self.calls.remove(call);
        let caller = call.key(Leg::Caller);
        tracing::debug!(
            connection = %caller.connection,
            message_id = caller.message_id,
            ?outcome,
            "Call completed"
        );
        self.reporter.report(&CompletedCall {
            metadata: call.metadata().clone(),
            message_id: caller.message_id,
            destination: call.destination().to_owned(),
            outcome,
            elapsed_us: u64::try_from(call.elapsed().as_micros()).unwrap_or(u64::MAX),
        });
    }

    /// Route `frame` from `inbound` and deliver it.
    ///
    /// Routing failures are answered with an error frame to `inbound` and
    /// then returned; the connection stays usable. Other errors are
    /// returned as they are, see [`MuxwireError::is_connection_fatal`].
    pub async fn handle_frame(&self, inbound: ConnectionId, frame: Frame) -> Result<()> {
        match self.route(inbound, &frame) {
            Ok(Route::Forward(destination)) => {
                self.forward(destination, frame).await;
                Ok(())
            }
            Ok(Route::Local) => self.handle_local(inbound, &frame).await,
            Ok(Route::Drop) => Ok(()),
            Err(err) if err.is_routing_failure() => {
                self.reject_call(inbound, frame.message_id(), &err).await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn forward(&self, destination: ConnectionId, frame: Frame) {
        let Some(writer) = self.writer(destination) else {
            tracing::debug!(
                connection = %destination,
                message_id = frame.message_id(),
                "Destination closed, dropping frame"
            );
            return;
        };

        let message_id = frame.message_id();
        if let Err(e) = writer.send(frame).await {
            // The destination's own reader cleans up its calls when it closes.
            tracing::warn!(
                connection = %destination,
                message_id,
                "Failed to forward frame: {}",
                e
            );
        }
    }

    async fn handle_local(&self, inbound: ConnectionId, frame: &Frame) -> Result<()> {
        match frame.message_type() {
            MessageType::PingReq => {
                let writer = self
                    .writer(inbound)
                    .ok_or(MuxwireError::UnknownConnection(inbound))?;
                writer.send(ping_res(frame.message_id())).await
            }
            other => {
                tracing::debug!(
                    connection = %inbound,
                    message_id = frame.message_id(),
                    "Ignoring {} frame",
                    other
                );
                Ok(())
            }
        }
    }

    /// Answer a call that could not be routed with an error frame.
    async fn reject_call(&self, inbound: ConnectionId, message_id: u32, err: &MuxwireError) {
        let code = match err {
            MuxwireError::MessageIdCollision { .. } => ErrorCode::Busy,
            _ => ErrorCode::Declined,
        };
        tracing::warn!(connection = %inbound, message_id, "Rejecting call: {}", err);
        self.send_error(inbound, message_id, code, &err.to_string())
            .await;
    }

    async fn send_error(&self, to: ConnectionId, message_id: u32, code: ErrorCode, message: &str) {
        let Some(writer) = self.writer(to) else {
            return;
        };
        let result = match ErrorFrame::new(code, message).encode(message_id) {
            Ok(frame) => writer.send(frame).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(connection = %to, message_id, "Failed to send error frame: {}", e);
        }
    }

    /// Forget a connection and abort every call with a leg on it.
    ///
    /// The other leg of each aborted call receives a `network` error frame.
    /// Returns the number of aborted calls.
    pub async fn close_connection(&self, id: ConnectionId) -> usize {
        self.connections.write().remove(&id);
        self.peers.write().retain(|_, conn| *conn != id);
        self.rejected.lock().retain(|key| key.connection != id);

        let drained = self.calls.drain_connection(id);
        for (call, leg) in &drained {
            let other = call.key(leg.other());
            self.send_error(
                other.connection,
                other.message_id,
                ErrorCode::Network,
                "relayed connection closed",
            )
            .await;
            self.finish(call, CallOutcome::ConnectionLost);
        }

        tracing::debug!(connection = %id, aborted = drained.len(), "Connection closed");
        drained.len()
    }
}

/// Whether a frame of type `ty` may arrive on `leg` of a call.
fn sent_by(ty: MessageType, leg: Leg) -> bool {
    match ty {
        MessageType::CallReqContinue => leg == Leg::Caller,
        MessageType::CallRes | MessageType::CallResContinue => leg == Leg::Callee,
        _ => true,
    }
}

fn response_bits(finished: bool) -> u32 {
    if finished {
        RESPONSE_OPEN
    } else {
        0
    }
}

fn response_outcome(call: &RelayCall) -> CallOutcome {
    match call.response_code() {
        Some(0) | None => CallOutcome::Success,
        Some(_) => CallOutcome::ApplicationError,
    }
}
