//! Reporting of completed relayed calls.
//!
//! The relay hands every call it finishes to a [`TraceReporter`]. Reporters
//! run on the reader task that observed the final frame, so they should be
//! quick; anything slow belongs behind a channel.

mod json;

use std::time::Duration;

use serde::Serialize;

use crate::protocol::{CallMetadata, ErrorCode};

pub use json::JsonLinesReporter;

/// How a relayed call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "code")]
pub enum CallOutcome {
    /// Final response fragment forwarded with an ok code.
    Success,
    /// Final response fragment forwarded with an application error code.
    ApplicationError,
    /// An error frame ended the call; carries the wire error code.
    Failed(u8),
    /// One of the two connections closed mid-call.
    ConnectionLost,
}

impl CallOutcome {
    /// Outcome for a call ended by an error frame.
    pub fn failed(code: ErrorCode) -> Self {
        CallOutcome::Failed(code.as_u8())
    }

    /// Whether the call finished normally.
    pub fn is_success(self) -> bool {
        self == CallOutcome::Success
    }
}

/// Summary of a call that has left the relay's call table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedCall {
    /// Service, method, and TTL from the call request.
    #[serde(flatten)]
    pub metadata: CallMetadata,
    /// Message id on the caller's connection.
    pub message_id: u32,
    /// Address the call was routed to.
    pub destination: String,
    /// How the call ended.
    pub outcome: CallOutcome,
    /// Time from routing the request to completion, in microseconds.
    pub elapsed_us: u64,
}

impl CompletedCall {
    /// Time from routing the request to completion.
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.elapsed_us)
    }
}

/// Receives every call the relay completes.
///
/// `report` runs inline on the reader task of the connection whose frame
/// finished the call, so it must return quickly and must not wait on I/O
/// that can stall. Frames from that connection are not routed until it
/// returns.
pub trait TraceReporter: Send + Sync {
    /// Record a completed call.
    fn report(&self, call: &CompletedCall);
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl TraceReporter for NullReporter {
    fn report(&self, _call: &CompletedCall) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(outcome: CallOutcome) -> CompletedCall {
        CompletedCall {
            metadata: CallMetadata {
                service: "search".to_string(),
                method: "Query".to_string(),
                ttl_ms: 5000,
            },
            message_id: 7,
            destination: "10.0.0.2:200".to_string(),
            outcome,
            elapsed_us: 1500,
        }
    }

    #[test]
    fn test_completed_call_json_shape() {
        let value = serde_json::to_value(completed(CallOutcome::Success)).unwrap();

        assert_eq!(value["service"], "search");
        assert_eq!(value["method"], "Query");
        assert_eq!(value["ttl_ms"], 5000);
        assert_eq!(value["destination"], "10.0.0.2:200");
        assert_eq!(value["outcome"]["kind"], "success");
        assert_eq!(value["elapsed_us"], 1500);
    }

    #[test]
    fn test_failed_outcome_carries_code() {
        let value =
            serde_json::to_value(completed(CallOutcome::failed(ErrorCode::Busy))).unwrap();
        assert_eq!(value["outcome"]["kind"], "failed");
        assert_eq!(value["outcome"]["code"], 3);
        assert!(!CallOutcome::failed(ErrorCode::Busy).is_success());
    }

    #[test]
    fn test_elapsed() {
        assert_eq!(
            completed(CallOutcome::Success).elapsed(),
            Duration::from_micros(1500)
        );
    }

    #[test]
    fn test_null_reporter() {
        NullReporter.report(&completed(CallOutcome::ConnectionLost));
    }
}
