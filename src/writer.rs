//! Per-connection writer task for control frames.
//!
//! Each control link owns one writer task fed through a bounded mpsc
//! channel. Frames queued from any number of call sites are written in
//! enqueue order, and whatever is ready at once is coalesced into a single
//! vectored write.
//!
//! # Architecture
//!
//! ```text
//! Registry / policy ─┐
//! Room relays       ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► TCP write half
//! Session loop      ─┘
//! ```
//!
//! When every [`WriterHandle`] is dropped the task drains the queue, shuts
//! down the write half and exits.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::control::{encode_length_prefix, LENGTH_PREFIX_SIZE};
use crate::error::{RelayError, Result};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A control frame ready to be written.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Big-endian payload length.
    pub prefix: [u8; LENGTH_PREFIX_SIZE],
    /// Frame payload.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Wrap a payload with its length prefix.
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` if the payload does not fit a 4-byte prefix.
    #[inline]
    pub fn new(payload: Bytes) -> Result<Self> {
        if u32::try_from(payload.len()).is_err() {
            return Err(RelayError::FrameTooLarge {
                length: payload.len(),
                max: u32::MAX as usize,
            });
        }
        Ok(Self {
            prefix: encode_length_prefix(payload.len()),
            payload,
        })
    }

    /// Total size of this frame (prefix + payload).
    #[inline]
    pub fn size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.payload.len()
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

/// Handle for queueing frames on a connection's writer task.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<OutboundFrame>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Queue a frame, waiting for backpressure to clear.
    ///
    /// # Errors
    ///
    /// `Backpressure` if the queue stays full past the configured timeout,
    /// `ConnectionClosed` if the writer task is gone.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            RelayError::ConnectionClosed
        })
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                return Err(RelayError::Backpressure);
            }

            tokio::time::sleep(check_interval).await;
        }
    }

    /// Wait until the queue has room for another frame.
    ///
    /// Unlike [`send`](Self::send) this never times out.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` if the writer task exits first.
    pub async fn wait_writable(&self) -> Result<()> {
        let check_interval = Duration::from_millis(1);

        loop {
            if self.tx.is_closed() {
                return Err(RelayError::ConnectionClosed);
            }

            if self.pending.load(Ordering::Acquire) < self.max_pending && self.tx.capacity() > 0 {
                return Ok(());
            }

            tokio::time::sleep(check_interval).await;
        }
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Queue a frame without waiting.
    ///
    /// Returns `Err(Backpressure)` immediately if at capacity.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            return Err(RelayError::Backpressure);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.try_send(frame).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => RelayError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => RelayError::ConnectionClosed,
            }
        })
    }

    /// Whether the writer task has exited.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for queueing frames.
///
/// The `JoinHandle` resolves when every handle is dropped (after the write
/// half is shut down) or on the first write error.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

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
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            None => {
                // All handles dropped
                if let Err(e) = writer.shutdown().await {
                    tracing::debug!(error = %e, "write half shutdown failed");
                }
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

        let batch_size = batch.len();
        write_batch(&mut writer, &batch).await?;

        pending.fetch_sub(batch_size, Ordering::Release);
    }
}

/// Write a batch of frames with `write_vectored`, continuing after partial
/// writes.
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
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(RelayError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after partial write.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut skipped = 0;

    for frame in batch {
        let prefix_start = skipped;
        let prefix_end = skipped + LENGTH_PREFIX_SIZE;

        if skip_bytes < prefix_end {
            let start_in_prefix = skip_bytes.saturating_sub(prefix_start);
            slices.push(IoSlice::new(&frame.prefix[start_in_prefix..]));
        }
        skipped = prefix_end;

        if !frame.payload.is_empty() {
            let payload_start = skipped;
            let payload_end = skipped + frame.payload.len();

            if skip_bytes < payload_end {
                let start_in_payload = skip_bytes.saturating_sub(payload_start);
                slices.push(IoSlice::new(&frame.payload[start_in_payload..]));
            }
            skipped = payload_end;
        }
    }

    slices
}
