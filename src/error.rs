//! Error types for muxwire.

use thiserror::Error;

use crate::relay::ConnectionId;

/// A frame whose bytes cannot be trusted.
///
/// Framing errors come from length fields or header values that disagree
/// with the bytes actually present. The connection that produced such a
/// frame should be terminated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// A length-prefixed field runs past the end of the payload.
    #[error("truncated {field}: need {needed} bytes at offset {offset}, payload has {available}")]
    Truncated {
        /// Name of the field being read.
        field: &'static str,
        /// Offset of the field within the payload.
        offset: usize,
        /// Bytes required from `offset`.
        needed: usize,
        /// Total payload length.
        available: usize,
    },

    /// Declared frame size disagrees with the bytes carried.
    #[error("declared frame size {declared} does not match actual size {actual}")]
    SizeMismatch {
        /// Size field from the header.
        declared: u16,
        /// Header length plus payload length.
        actual: usize,
    },

    /// Declared frame size is smaller than the fixed header.
    #[error("declared frame size {0} is smaller than the header")]
    FrameTooSmall(u16),

    /// Payload does not fit in a single frame.
    #[error("payload of {0} bytes exceeds frame capacity")]
    PayloadTooLarge(usize),

    /// Message type byte is not part of the protocol.
    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),

    /// Checksum type byte is not part of the protocol.
    #[error("unknown checksum type 0x{0:02x}")]
    UnknownChecksumType(u8),

    /// A field is longer than its length prefix can describe.
    #[error("{field} of {len} bytes exceeds its length prefix")]
    FieldTooLong {
        /// Name of the field being written.
        field: &'static str,
        /// Actual field length.
        len: usize,
    },

    /// A string field is not valid UTF-8.
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),
}

/// Main error type for all muxwire operations.
#[derive(Debug, Error)]
pub enum MuxwireError {
    /// I/O error on a connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (trace reporting).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed frame.
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// The peer selector knows no host for the service.
    #[error("No peer available for service {service:?} (message {message_id})")]
    NoPeer {
        /// Requested service.
        service: String,
        /// Message id of the rejected call.
        message_id: u32,
    },

    /// The selected host has no live relay connection.
    #[error("Peer {host_port} selected for service {service:?} is not connected")]
    PeerUnavailable {
        /// Requested service.
        service: String,
        /// Address chosen by the selector.
        host_port: String,
    },

    /// The destination connection already carries a call with this id.
    #[error("Message id {message_id} already in flight on connection {connection}")]
    MessageIdCollision {
        /// Destination connection.
        connection: ConnectionId,
        /// Colliding message id.
        message_id: u32,
    },

    /// A frame arrived for a call the relay is not tracking.
    #[error("Unknown call: message {message_id} on connection {connection}")]
    UnknownCall {
        /// Connection the frame arrived on.
        connection: ConnectionId,
        /// Message id of the frame.
        message_id: u32,
    },

    /// A call request reused a message id that is still in flight.
    #[error("Duplicate call: message {message_id} already open on connection {connection}")]
    DuplicateCall {
        /// Connection the frame arrived on.
        connection: ConnectionId,
        /// Reused message id.
        message_id: u32,
    },

    /// Connection id is not registered with the relay.
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl MuxwireError {
    /// Whether the connection that produced this error must be closed.
    ///
    /// Routing failures only affect the call that triggered them.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            MuxwireError::Io(_)
                | MuxwireError::Framing(_)
                | MuxwireError::UnknownCall { .. }
                | MuxwireError::DuplicateCall { .. }
                | MuxwireError::ConnectionClosed
        )
    }

    /// Whether this error is a routing failure for a single call.
    pub fn is_routing_failure(&self) -> bool {
        matches!(
            self,
            MuxwireError::NoPeer { .. }
                | MuxwireError::PeerUnavailable { .. }
                | MuxwireError::MessageIdCollision { .. }
        )
    }
}

/// Result type alias using MuxwireError.
pub type Result<T> = std::result::Result<T, MuxwireError>;

/// Result type alias for frame parsing.
pub type FramingResult<T> = std::result::Result<T, FramingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_errors_are_fatal() {
        let err: MuxwireError = FramingError::UnknownMessageType(0x42).into();
        assert!(err.is_connection_fatal());
        assert!(!err.is_routing_failure());
        assert!(err.to_string().contains("0x42"));
    }

    #[test]
    fn test_routing_failures_are_not_fatal() {
        let err = MuxwireError::NoPeer {
            service: "unknown".to_string(),
            message_id: 7,
        };
        assert!(err.is_routing_failure());
        assert!(!err.is_connection_fatal());
    }

    #[test]
    fn test_unknown_call_is_fatal() {
        let err = MuxwireError::UnknownCall {
            connection: ConnectionId::new(3),
            message_id: 9,
        };
        assert!(err.is_connection_fatal());
        assert!(err.to_string().contains("message 9"));
    }
}
