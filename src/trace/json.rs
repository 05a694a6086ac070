//! JSON-lines trace output.
//!
//! Each completed call becomes one JSON object followed by a single `\n`,
//! flushed immediately so a consumer tailing the stream sees whole lines.

use std::io::{Stderr, Write};

use parking_lot::Mutex;
use serde::Serialize;

use super::{CompletedCall, TraceReporter};
use crate::error::Result;

/// Writes completed calls as JSON lines.
///
/// Writes and flushes synchronously under a lock. Give it an in-memory
/// buffer, or a stream that is known to be fast like a local file or
/// stderr; a slow sink holds up the connection that finished the call.
#[derive(Debug)]
pub struct JsonLinesReporter<W> {
    out: Mutex<W>,
}

impl<W: Write> JsonLinesReporter<W> {
    /// Report into `out`.
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Write one value as a JSON line and flush.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails.
    pub fn write_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let line = serde_json::to_vec(value)?;
        let mut out = self.out.lock();
        out.write_all(&line)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }

    /// Run `f` with the underlying writer.
    pub fn with_writer<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        f(&mut self.out.lock())
    }

    /// Consume the reporter and return the writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl JsonLinesReporter<Stderr> {
    /// Report to stderr.
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> TraceReporter for JsonLinesReporter<W> {
    fn report(&self, call: &CompletedCall) {
        if let Err(e) = self.write_json(call) {
            tracing::warn!(
                message_id = call.message_id,
                "Failed to write trace record: {}",
                e
            );
        }
    }
}
