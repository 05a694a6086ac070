//! Serving a connection through the relay.
//!
//! Each served connection gets a reader task, which splits the byte stream
//! into frames and routes them one at a time, and a writer task from
//! [`spawn_writer_task`]. Frames from one connection are therefore handled
//! in the order they were read.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::JoinHandle;

use super::{ConnectionId, Relay};
use crate::error::{MuxwireError, Result};
use crate::protocol::FrameBuffer;
use crate::writer::spawn_writer_task;

/// A connection being served by the relay.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    reader_task: JoinHandle<Result<()>>,
    writer_task: JoinHandle<Result<()>>,
}

impl Connection {
    /// Id the relay assigned to this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Wait until the peer closes the connection or it fails.
    ///
    /// Returns the error that ended the read loop, if any. By the time this
    /// returns the relay has already released the connection's calls.
    pub async fn closed(self) -> Result<()> {
        let result = self
            .reader_task
            .await
            .map_err(|_| MuxwireError::ConnectionClosed)?;
        // The writer exits once the relay dropped its handle.
        match self.writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(connection = %self.id, "Writer stopped: {}", e),
            Err(e) => tracing::warn!(connection = %self.id, "Writer task failed: {}", e),
        }
        result
    }

    /// Stop reading from the connection.
    ///
    /// The relay does not clean up after an aborted reader; prefer closing
    /// the peer's end.
    pub fn abort(&self) {
        self.reader_task.abort();
    }
}

impl Relay {
    /// Serve a connection until its peer closes it.
    ///
    /// `peer` is the address the peer selector hands out for this
    /// connection, if it accepts calls. Connection setup and the init
    /// handshake are the caller's concern.
    pub fn serve<R, W>(self: &Arc<Self>, peer: Option<String>, reader: R, writer: W) -> Connection
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer, writer_task) = spawn_writer_task(writer, self.config.writer.clone());
        let id = self.register_connection(peer, writer);

        let relay = self.clone();
        let reader_task = tokio::spawn(async move {
            let result = relay.read_loop(id, reader).await;
            if let Err(e) = &result {
                tracing::error!(connection = %id, "Read loop error: {}", e);
            }
            relay.close_connection(id).await;
            result
        });

        Connection {
            id,
            reader_task,
            writer_task,
        }
    }

    /// Read frames from a connection and route each one.
    async fn read_loop<R: AsyncRead + Unpin>(&self, id: ConnectionId, mut reader: R) -> Result<()> {
        let mut frame_buffer = FrameBuffer::with_capacity(self.config.read_buffer_size);
        let mut buf = vec![0u8; self.config.read_buffer_size];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) => return Err(MuxwireError::Io(e)),
            };

            for frame in frame_buffer.push(&buf[..n])? {
                match self.handle_frame(id, frame).await {
                    Ok(()) => {}
                    Err(e) if e.is_connection_fatal() => return Err(e),
                    // Routing failures were already answered and logged.
                    Err(e) if e.is_routing_failure() => {}
                    Err(e) => {
                        tracing::warn!(connection = %id, "Dropping frame: {}", e);
                    }
                }
            }
        }
    }
}
