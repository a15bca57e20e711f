//! Dedicated writer task serializing all frame sends on one connection.
//!
//! Notify processing runs in independent tasks, so acks for different
//! streams race to write to the same connection. A single writer task fed
//! by an mpsc channel keeps the byte stream intact without a lock on the
//! hot path, and batches ready frames into one vectored write.
//!
//! ```text
//! notify task 1 ─┐
//! notify task 2 ─┼─► mpsc::Sender<OutboundFrame> ─► writer task ─► conn
//! worker loop  ──┘
//! ```
//!
//! Frames carry an optional completion channel: the worker awaits it for
//! handshake and disconnect frames (any failure there is fatal to the
//! connection), while ack frames are fire-and-forget and a failed write
//! is logged with its stream context and elapsed time.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, SpopError};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single vectored write.
const MAX_BATCH_SIZE: usize = 64;

/// A fully encoded frame queued for the writer task.
pub struct OutboundFrame {
    /// Encoded wire bytes, length prefix included.
    pub bytes: Bytes,
    /// Stream id, for logging context.
    pub stream_id: u64,
    /// Frame id, for logging context.
    pub frame_id: u64,
    /// When the owning operation started, for timing context.
    pub started: Instant,
    /// Present on tracked sends; receives the write outcome.
    pub completion: Option<oneshot::Sender<Result<()>>>,
}

impl OutboundFrame {
    /// Create an untracked (fire-and-forget) outbound frame.
    pub fn new(bytes: Bytes, stream_id: u64, frame_id: u64) -> Self {
        Self {
            bytes,
            stream_id,
            frame_id,
            started: Instant::now(),
            completion: None,
        }
    }

    /// Attach a completion channel, making this a tracked send.
    pub fn tracked(mut self) -> (Self, oneshot::Receiver<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        self.completion = Some(tx);
        (self, rx)
    }

    fn report(self, outcome: Result<()>) {
        match self.completion {
            Some(tx) => {
                // Receiver dropped means the worker already gave up.
                let _ = tx.send(outcome);
            }
            None => {
                if let Err(err) = outcome {
                    tracing::error!(
                        stream_id = self.stream_id,
                        frame_id = self.frame_id,
                        elapsed_ms = self.started.elapsed().as_millis() as u64,
                        error = %err,
                        "frame write failed"
                    );
                }
            }
        }
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for the frame queue.
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

/// Handle for queueing frames on the writer task.
///
/// Cheaply cloneable; every notify task holds one.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    /// Queue a frame, waiting out backpressure up to the configured
    /// timeout.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            SpopError::ConnectionClosed
        })
    }

    /// Queue a frame and wait until the writer task has written it.
    ///
    /// Used for handshake and disconnect frames, where a failed write is
    /// fatal to the connection.
    pub async fn send_and_wait(&self, frame: OutboundFrame) -> Result<()> {
        let (frame, done) = frame.tracked();
        self.send(frame).await?;
        done.await.map_err(|_| SpopError::ConnectionClosed)?
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }
            if start.elapsed() > self.timeout {
                return Err(SpopError::BackpressureTimeout);
            }
            tokio::time::sleep(check_interval).await;
        }
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task for one connection's write half.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
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

/// Main writer loop - drains the queue, batching where possible.
///
/// Exits cleanly when every sender is gone (connection teardown), or
/// with the error after reporting a failed batch. Once this loop is
/// gone, queued senders observe `ConnectionClosed`.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(f) => f,
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

        let outcome = write_batch(&mut writer, &batch).await;
        pending.fetch_sub(batch.len(), Ordering::Release);

        match outcome {
            Ok(()) => {
                for frame in batch {
                    frame.report(Ok(()));
                }
            }
            Err(err) => {
                let reason = err.to_string();
                for frame in batch {
                    frame.report(Err(write_failed(&reason)));
                }
                // Frames still queued will never be written: fail each
                // one the same way and release its pending slot, so no
                // ack vanishes unreported and the counter drains to
                // zero for senders racing at the backpressure boundary.
                rx.close();
                let mut drained = 0;
                while let Ok(frame) = rx.try_recv() {
                    frame.report(Err(write_failed(&reason)));
                    drained += 1;
                }
                pending.fetch_sub(drained, Ordering::Release);
                return Err(err);
            }
        }
    }
}

fn write_failed(reason: &str) -> SpopError {
    SpopError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        reason.to_string(),
    ))
}

/// Write a batch of frames with one vectored write where possible.
///
/// A partial write is continued inside this function - the remaining
/// bytes of the batch are known, so frame boundaries stay intact. A
/// write of zero bytes is a short-write error: the transport accepted
/// part of a frame it can never complete.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.bytes.len()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(SpopError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build the IoSlice array for the unwritten tail of the batch.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for frame in batch {
        let end = offset + frame.bytes.len();
        if skip_bytes < end {
            let start_in_frame = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.bytes[start_in_frame..]));
        }
        offset = end;
    }

    slices
}
