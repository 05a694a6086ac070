//! Per-connection writer task.
//!
//! Every relay connection owns exactly one writer task. Reader tasks of any
//! connection forward frames into it through a cloneable [`WriterHandle`],
//! so a frame is never interleaved with another on the wire.
//!
//! ```text
//! Reader A ─┐
//! Reader B ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Connection
//! Reader N ─┘
//! ```
//!
//! Frames queued together are flushed with a single vectored write. The
//! number of queued-but-unwritten frames is tracked so senders can back off
//! when the peer stops reading.

use std::io::IoSlice;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::atomic::Int64;
use crate::error::{MuxwireError, Result};
use crate::protocol::{Frame, FrameHeader, HEADER_SIZE};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to a connection.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Pre-encoded 16-byte header.
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes, shared with the frame that was read.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create an outbound frame from a header and payload.
    #[inline]
    pub fn new(header: &FrameHeader, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

impl From<Frame> for OutboundFrame {
    fn from(frame: Frame) -> Self {
        Self::new(&frame.header, frame.payload)
    }
}

impl From<&Frame> for OutboundFrame {
    fn from(frame: &Frame) -> Self {
        Self::new(&frame.header, frame.payload.clone())
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending frames to a connection's writer task.
///
/// Cheaply cloneable; the relay hands one to every reader that forwards
/// into this connection. The writer task exits once all handles are gone.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    pending: Arc<Int64>,
    max_pending: i64,
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<OutboundFrame>,
        pending: Arc<Int64>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending: i64::try_from(max_pending).unwrap_or(i64::MAX),
            timeout,
        }
    }

    /// Send a frame to the writer task.
    ///
    /// Waits while backpressure is active, timing out after the configured
    /// duration.
    pub async fn send(&self, frame: impl Into<OutboundFrame>) -> Result<()> {
        if self.pending.load() >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        // Count before sending so the writer never decrements below zero.
        self.pending.inc();

        self.tx.send(frame.into()).await.map_err(|_| {
            self.pending.dec();
            MuxwireError::ConnectionClosed
        })
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load() < self.max_pending {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                return Err(MuxwireError::BackpressureTimeout);
            }

            tokio::time::sleep(check_interval).await;
        }
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load() >= self.max_pending
    }

    /// Current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        usize::try_from(self.pending.load()).unwrap_or(0)
    }

    /// Whether the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Try to send a frame without waiting for backpressure.
    ///
    /// Returns `Err(BackpressureTimeout)` immediately if at capacity.
    pub fn try_send(&self, frame: impl Into<OutboundFrame>) -> Result<()> {
        if self.pending.load() >= self.max_pending {
            return Err(MuxwireError::BackpressureTimeout);
        }

        self.pending.inc();

        self.tx.try_send(frame.into()).map_err(|e| {
            self.pending.dec();
            match e {
                mpsc::error::TrySendError::Full(_) => MuxwireError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => MuxwireError::ConnectionClosed,
            }
        })
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The returned `JoinHandle` resolves when every [`WriterHandle`] has been
/// dropped and the queue is drained, or on the first write error.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(Int64::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending_frames,
        config.backpressure_timeout,
    );

    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<Int64>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            None => {
                let _ = writer.shutdown().await;
                return Ok(());
            }
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len() as i64;
        let result = write_batch(&mut writer, &batch).await;
        pending.add(-batch_size);

        if let Err(err) = result {
            tracing::warn!(error = %err, frames = batch_size, "connection write failed");
            return Err(err);
        }
    }
}

/// Write a batch of frames with vectored I/O, then flush.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(MuxwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlices for the part of `batch` after the first `skip_bytes` bytes.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let header_end = offset + HEADER_SIZE;
        if skip_bytes < header_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.header[start..]));
        }
        offset = header_end;

        if !frame.payload.is_empty() {
            let payload_end = offset + frame.payload.len();
            if skip_bytes < payload_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&frame.payload[start..]));
            }
            offset = payload_end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ping_req, FrameBuffer, MessageType};
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    fn call_res(id: u32, payload: &'static [u8]) -> Frame {
        Frame::new(MessageType::CallRes, id, Bytes::from_static(payload)).unwrap()
    }

    #[test]
    fn test_outbound_frame_from_frame() {
        let frame = call_res(42, b"hello");
        let outbound = OutboundFrame::from(&frame);

        assert_eq!(outbound.header, frame.header.encode());
        assert_eq!(outbound.size(), HEADER_SIZE + 5);
        assert_eq!(outbound.payload.as_ptr(), frame.payload.as_ptr());
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.max_pending_frames, DEFAULT_MAX_PENDING_FRAMES);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.backpressure_timeout, DEFAULT_BACKPRESSURE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        handle.send(call_res(42, b"hello")).await.unwrap();

        let mut buf = vec![0u8; HEADER_SIZE + 5];
        server.read_exact(&mut buf).await.unwrap();

        let mut frames = FrameBuffer::new();
        let decoded = frames.push(&buf).unwrap();
        assert_eq!(decoded, vec![call_res(42, b"hello")]);
    }

    #[tokio::test]
    async fn test_writer_preserves_order() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        for id in 0..10u32 {
            handle.send(ping_req(id)).await.unwrap();
        }

        let mut buf = vec![0u8; 10 * HEADER_SIZE];
        server.read_exact(&mut buf).await.unwrap();

        let frames = FrameBuffer::new().push(&buf).unwrap();
        let ids: Vec<u32> = frames.iter().map(Frame::message_id).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_writer_handle_pending_count() {
        let (client, _server) = duplex(4096);
        let config = WriterConfig {
            max_pending_frames: 1000,
            channel_capacity: 100,
            backpressure_timeout: Duration::from_secs(1),
        };
        let (handle, _task) = spawn_writer_task(client, config);

        assert_eq!(handle.pending_count(), 0);
        assert!(!handle.is_backpressure_active());
    }

    #[tokio::test]
    async fn test_try_send_at_capacity() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(10);
        let pending = Arc::new(Int64::new(100));
        let handle = WriterHandle::new(tx, pending, 100, Duration::from_secs(1));

        let result = handle.try_send(ping_req(1));
        assert!(matches!(result, Err(MuxwireError::BackpressureTimeout)));
    }

    #[tokio::test]
    async fn test_send_times_out_under_backpressure() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(10);
        let pending = Arc::new(Int64::new(5));
        let handle = WriterHandle::new(tx, pending, 5, Duration::from_millis(5));

        let result = handle.send(ping_req(1)).await;
        assert!(matches!(result, Err(MuxwireError::BackpressureTimeout)));
        assert_eq!(handle.pending_count(), 5);
    }

    #[tokio::test]
    async fn test_send_after_writer_stopped() {
        let (tx, rx) = mpsc::channel::<OutboundFrame>(1);
        drop(rx);
        let handle = WriterHandle::new(tx, Arc::new(Int64::new(0)), 10, Duration::from_secs(1));

        assert!(handle.is_closed());
        let result = handle.send(ping_req(1)).await;
        assert!(matches!(result, Err(MuxwireError::ConnectionClosed)));
        assert_eq!(handle.pending_count(), 0);
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![OutboundFrame::from(call_res(42, b"hello"))];

        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_build_remaining_slices_partial_header() {
        let batch = vec![OutboundFrame::from(call_res(42, b"hello"))];

        let slices = build_remaining_slices(&batch, 5);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 5);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_build_remaining_slices_across_frames() {
        let batch = vec![
            OutboundFrame::from(call_res(1, b"hello")),
            OutboundFrame::from(ping_req(2)),
        ];

        let slices = build_remaining_slices(&batch, HEADER_SIZE + 5 + 4);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), HEADER_SIZE - 4);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());

        let batch: Vec<_> = (0..5)
            .map(|i| OutboundFrame::from(call_res(i, b"abc")))
            .collect();

        write_batch(&mut buf, &batch).await.unwrap();

        let written = buf.into_inner();
        assert_eq!(written.len(), 5 * (HEADER_SIZE + 3));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }
}
