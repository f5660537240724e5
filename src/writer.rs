//! Dedicated writer task.
//!
//! All outbound frames from one connection funnel through an mpsc channel into
//! a single task that owns the write half. Callers (many concurrent tasks
//! issuing calls, or many server handlers responding) never contend on a lock,
//! and the task batches ready frames into vectored writes.
//!
//! ```text
//! call 1 ─┐
//! call 2 ─┼─► mpsc::Sender<EncodedFrame> ─► writer task ─► transport
//! call N ─┘
//! ```
//!
//! A pending-frame gauge gives callers a backpressure signal: `send` waits (up
//! to a timeout) when the queue is full, `try_send` fails immediately.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};
use crate::protocol::EncodedFrame;

/// Default maximum queued frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames coalesced into one vectored write.
const MAX_BATCH_SIZE: usize = 64;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Queued frames tolerated before `send` starts waiting.
    pub max_pending_frames: usize,
    /// How long `send` waits for the queue to drain.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Cheaply cloneable handle for queueing frames to the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<EncodedFrame>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    /// Queue a frame, waiting out backpressure up to the configured timeout.
    pub async fn send(&self, frame: EncodedFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_capacity().await?;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        // The gauge check is not atomic with the enqueue: concurrent senders
        // can all pass it and land on a full channel. The same deadline bounds
        // the channel send itself.
        match tokio::time::timeout(self.timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                self.pending.fetch_sub(1, Ordering::Release);
                Err(RpcError::ConnectionClosed)
            }
            Err(_) => {
                self.pending.fetch_sub(1, Ordering::Release);
                Err(RpcError::BackpressureTimeout)
            }
        }
    }

    /// Queue a frame without waiting; fails immediately at capacity.
    pub fn try_send(&self, frame: EncodedFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            return Err(RpcError::BackpressureTimeout);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.try_send(frame).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => RpcError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => RpcError::ConnectionClosed,
            }
        })
    }

    async fn wait_for_capacity(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RpcError::BackpressureTimeout);
            }
            tokio::time::sleep(Duration::from_micros(100)).await;
        }
    }

    /// Frames queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the queue is at capacity.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending_count() >= self.max_pending
    }
}

/// Spawn the writer task over the transport's write half.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.max_pending_frames.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
        max_pending: config.max_pending_frames,
        timeout: config.backpressure_timeout,
    };

    let task = tokio::spawn(writer_loop(rx, writer, pending));
    (handle, task)
}

/// Receive frames and write them out, batching whatever is already queued.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<EncodedFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(frame) => frame,
            // All handles dropped: clean shutdown.
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_len = batch.len();
        write_batch(&mut writer, &batch).await?;
        pending.fetch_sub(batch_len, Ordering::Release);
    }
}

/// Write a batch of frames with one vectored write where possible.
async fn write_batch<W>(writer: &mut W, batch: &[EncodedFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(batch.len() * 2);
    for frame in batch {
        slices.push(IoSlice::new(&frame.header));
        if !frame.body.is_empty() {
            slices.push(IoSlice::new(&frame.body));
        }
    }
    let total: usize = batch.iter().map(|f| f.size()).sum();

    let written = writer.write_vectored(&slices).await?;
    if written < total {
        // Partial write: flatten the remainder and push it through write_all.
        let mut rest = Vec::with_capacity(total - written);
        let mut skip = written;
        for slice in &slices {
            if skip >= slice.len() {
                skip -= slice.len();
            } else {
                rest.extend_from_slice(&slice[skip..]);
                skip = 0;
            }
        }
        writer.write_all(&rest).await?;
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Compression;
    use crate::protocol::{encode_frame, HEADER_SIZE};
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    fn frame(session: u16, body: &[u8]) -> EncodedFrame {
        encode_frame(session, 1, Compression::None, 0, body).unwrap()
    }

    #[tokio::test]
    async fn test_send_writes_header_and_body() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        handle.send(frame(1, b"hello")).await.unwrap();

        let mut buf = vec![0u8; HEADER_SIZE + 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[HEADER_SIZE..], b"hello");
    }

    #[tokio::test]
    async fn test_batching_preserves_frame_order() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        for session in 0..10u16 {
            handle.send(frame(session, b"data")).await.unwrap();
        }

        let mut buf = vec![0u8; 10 * (HEADER_SIZE + 4)];
        server.read_exact(&mut buf).await.unwrap();
        for session in 0..10u16 {
            let offset = session as usize * (HEADER_SIZE + 4);
            // Session field is at byte 2, little-endian.
            let got = u16::from_le_bytes([buf[offset + 2], buf[offset + 3]]);
            assert_eq!(got, session);
        }
    }

    #[tokio::test]
    async fn test_try_send_at_capacity_fails_fast() {
        let (tx, _rx) = mpsc::channel(8);
        let handle = WriterHandle {
            tx,
            pending: Arc::new(AtomicUsize::new(8)),
            max_pending: 8,
            timeout: Duration::from_secs(1),
        };

        assert!(matches!(
            handle.try_send(frame(1, b"")),
            Err(RpcError::BackpressureTimeout)
        ));
    }

    #[tokio::test]
    async fn test_send_on_stalled_channel_times_out() {
        // Gauge says there is room, but the channel itself is full and nothing
        // drains it: the send must hit the deadline, not wait forever.
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(frame(0, b"")).unwrap();
        let handle = WriterHandle {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending: 8,
            timeout: Duration::from_millis(50),
        };

        assert!(matches!(
            handle.send(frame(1, b"x")).await,
            Err(RpcError::BackpressureTimeout)
        ));
        // The frame never entered the queue; the gauge must not drift.
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_write_batch_lengths() {
        let mut sink = Cursor::new(Vec::new());
        let batch = vec![frame(1, b"abc"), frame(2, b""), frame(3, b"defgh")];

        write_batch(&mut sink, &batch).await.unwrap();

        let expected: usize = batch.iter().map(|f| f.size()).sum();
        assert_eq!(sink.into_inner().len(), expected);
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_handle_drop() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        drop(handle);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_pending_count_drains() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        handle.send(frame(1, b"x")).await.unwrap();

        let mut buf = vec![0u8; HEADER_SIZE + 1];
        server.read_exact(&mut buf).await.unwrap();
        // The gauge is decremented after the batch hits the transport.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.pending_count(), 0);
        assert!(!handle.is_backpressure_active());
    }
}
