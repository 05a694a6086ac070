//! Protocol module - wire format, framing, and call payloads.
//!
//! This module implements the binary protocol spoken on every connection:
//! - 16-byte frame header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Lazy call-request reader for routing
//! - Call completion detection
//! - Payload encoders for frames the relay originates

mod call_req;
mod checksum;
mod completion;
mod cursor;
mod frame;
mod frame_buffer;
mod payload;
mod wire_format;

pub use call_req::{CallMetadata, LazyCallReq};
pub use checksum::ChecksumType;
pub use completion::{finishes_call, finishes_request, CallFlags, Fragmentation};
pub use frame::{build_frame, Frame};
pub use frame_buffer::{FrameBuffer, DEFAULT_BUFFER_CAPACITY};
pub use payload::{
    continuation, ping_req, ping_res, CallReqBuilder, CallResBuilder, ErrorCode, ErrorFrame,
    ResponseCode, Tracing,
};
pub use wire_format::{
    flags, FrameHeader, MessageType, FLAGS_INDEX, HEADER_SIZE, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE,
    SERVICE_LEN_INDEX, SERVICE_NAME_INDEX, TRACING_LEN, TTL_INDEX, TTL_LEN,
};
