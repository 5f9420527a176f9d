//! Dedicated writer task for the outbound frame path.
//!
//! All writes funnel through one task fed by an mpsc channel, so callers on
//! any task can send without sharing a locked writer. Ready frames are
//! batched into a single `write_vectored` call when the channel has more
//! queued.
//!
//! ```text
//! send()    ─┐
//! handlers  ─┼─► mpsc::Sender<WriterCommand> ─► writer task ─► socket
//! close()   ─┘
//! ```
//!
//! A pending-frame count provides backpressure: once `max_pending_frames`
//! frames are queued, `send` waits (up to `backpressure_timeout`) for the
//! writer to drain before accepting more.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ErrorCode, ErrorInfo, Result};
use crate::protocol::{frame_prefix, LEN_PREFIX_SIZE};
use crate::transport::map_io_error;

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames folded into a single vectored write.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to go on the wire: pre-encoded length prefix plus payload.
#[derive(Debug)]
pub(crate) struct OutboundFrame {
    prefix: [u8; LEN_PREFIX_SIZE],
    payload: Bytes,
}

impl OutboundFrame {
    /// Build a frame for `payload`.
    pub(crate) fn new(payload: Bytes) -> Result<Self> {
        Ok(Self {
            prefix: frame_prefix(payload.len())?,
            payload,
        })
    }

    /// Total wire size of this frame.
    fn size(&self) -> usize {
        LEN_PREFIX_SIZE + self.payload.len()
    }
}

enum WriterCommand {
    Frame(OutboundFrame),
    Shutdown,
}

/// Writer task configuration.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// How long `send` waits for backpressure to clear.
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

/// Cheaply-cloneable handle for feeding the writer task.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<WriterCommand>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    /// Queue a frame, waiting out backpressure if necessary.
    pub(crate) async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(WriterCommand::Frame(frame)).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            ErrorInfo::new(ErrorCode::ConnectionClosed).with_message("writer task gone")
        })
    }

    /// Ask the writer task to shut the write side down (sends FIN) and exit.
    ///
    /// Returns `Ok` if the task is already gone.
    pub(crate) async fn close(&self) -> Result<()> {
        let _ = self.tx.send(WriterCommand::Shutdown).await;
        Ok(())
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }
            if start.elapsed() > self.timeout {
                return Err(ErrorInfo::new(ErrorCode::Internal)
                    .with_message("write queue full past backpressure timeout")
                    .add_pair("max_pending_frames", self.max_pending));
            }
            tokio::time::sleep(check_interval).await;
        }
    }

    /// Current queued-frame count.
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task over `writer`.
pub(crate) fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
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

/// Writer task body: drain commands, batch frames, write, repeat.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<WriterCommand>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(WriterCommand::Frame(frame)) => frame,
            Some(WriterCommand::Shutdown) | None => {
                // Channel drained or explicit close: send FIN and stop.
                writer.shutdown().await.map_err(map_io_error)?;
                return Ok(());
            }
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        let mut shutdown_after = false;

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(WriterCommand::Frame(frame)) => batch.push(frame),
                Ok(WriterCommand::Shutdown) => {
                    shutdown_after = true;
                    break;
                }
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        write_batch(&mut writer, &batch).await?;
        pending.fetch_sub(batch_size, Ordering::Release);

        if shutdown_after {
            writer.shutdown().await.map_err(map_io_error)?;
            return Ok(());
        }
    }
}

/// Write a batch of frames with scatter/gather I/O.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(batch.len() * 2);
    for frame in batch {
        slices.push(IoSlice::new(&frame.prefix));
        if !frame.payload.is_empty() {
            slices.push(IoSlice::new(&frame.payload));
        }
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();

    let written = writer.write_vectored(&slices).await.map_err(map_io_error)?;
    if written == total_size {
        writer.flush().await.map_err(map_io_error)?;
        return Ok(());
    }
    if written == 0 {
        return Err(ErrorInfo::new(ErrorCode::ConnectionClosed)
            .with_message("vectored write made no progress"));
    }

    // Partial write: continue from where the kernel stopped.
    let mut total_written = written;
    while total_written < total_size {
        let remaining = build_remaining_slices(batch, total_written);
        if remaining.is_empty() {
            break;
        }

        let written = writer
            .write_vectored(&remaining)
            .await
            .map_err(map_io_error)?;
        if written == 0 {
            return Err(ErrorInfo::new(ErrorCode::ConnectionClosed)
                .with_message("vectored write made no progress"));
        }
        total_written += written;
    }

    writer.flush().await.map_err(map_io_error)?;
    Ok(())
}

/// Rebuild the slice list with the first `skip_bytes` bytes omitted.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut skipped = 0;

    for frame in batch {
        let prefix_end = skipped + LEN_PREFIX_SIZE;
        if skip_bytes < prefix_end {
            let start = skip_bytes.saturating_sub(skipped);
            slices.push(IoSlice::new(&frame.prefix[start..]));
        }
        skipped = prefix_end;

        if !frame.payload.is_empty() {
            let payload_end = skipped + frame.payload.len();
            if skip_bytes < payload_end {
                let start = skip_bytes.saturating_sub(skipped);
                slices.push(IoSlice::new(&frame.payload[start..]));
            }
            skipped = payload_end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn test_outbound_frame_prefix() {
        let frame = OutboundFrame::new(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(frame.prefix, [0, 0, 0, 5]);
        assert_eq!(frame.size(), LEN_PREFIX_SIZE + 5);
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.max_pending_frames, DEFAULT_MAX_PENDING_FRAMES);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.backpressure_timeout, DEFAULT_BACKPRESSURE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_send_writes_prefixed_frame() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        handle
            .send(OutboundFrame::new(Bytes::from_static(b"hello")).unwrap())
            .await
            .unwrap();

        let mut buf = [0u8; 9];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, &[0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o']);
    }

    #[tokio::test]
    async fn test_batched_frames_arrive_in_order() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        for i in 0..10u32 {
            let payload = Bytes::copy_from_slice(&i.to_be_bytes());
            handle.send(OutboundFrame::new(payload).unwrap()).await.unwrap();
        }

        for i in 0..10u32 {
            let mut prefix = [0u8; 4];
            server.read_exact(&mut prefix).await.unwrap();
            assert_eq!(i32::from_be_bytes(prefix), 4);
            let mut body = [0u8; 4];
            server.read_exact(&mut body).await.unwrap();
            assert_eq!(u32::from_be_bytes(body), i);
        }
    }

    #[tokio::test]
    async fn test_close_shuts_down_and_task_exits() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        handle
            .send(OutboundFrame::new(Bytes::from_static(b"bye")).unwrap())
            .await
            .unwrap();
        handle.close().await.unwrap();

        assert!(task.await.unwrap().is_ok());

        // Everything queued before the close still arrives, then EOF.
        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, vec![0, 0, 0, 3, b'b', b'y', b'e']);
    }

    #[tokio::test]
    async fn test_send_after_task_gone_is_connection_closed() {
        let (client, _server) = duplex(64);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        handle.close().await.unwrap();
        task.await.unwrap().unwrap();

        let err = handle
            .send(OutboundFrame::new(Bytes::from_static(b"x")).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_backpressure_timeout() {
        let (tx, _rx) = mpsc::channel(10);
        let handle = WriterHandle {
            tx,
            pending: Arc::new(AtomicUsize::new(100)),
            max_pending: 100,
            timeout: Duration::from_millis(20),
        };

        let err = handle
            .send(OutboundFrame::new(Bytes::new()).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(handle.pending_count(), 100);
    }

    #[test]
    fn test_build_remaining_slices() {
        let batch = vec![OutboundFrame::new(Bytes::from_static(b"hello")).unwrap()];

        let all = build_remaining_slices(&batch, 0);
        assert_eq!(all.len(), 2);

        let partial_prefix = build_remaining_slices(&batch, 2);
        assert_eq!(partial_prefix.len(), 2);
        assert_eq!(partial_prefix[0].len(), LEN_PREFIX_SIZE - 2);

        let payload_only = build_remaining_slices(&batch, LEN_PREFIX_SIZE);
        assert_eq!(payload_only.len(), 1);
        assert_eq!(payload_only[0].len(), 5);

        let nothing = build_remaining_slices(&batch, LEN_PREFIX_SIZE + 5);
        assert!(nothing.is_empty());
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5)
            .map(|_| OutboundFrame::new(Bytes::from_static(b"abc")).unwrap())
            .collect();

        write_batch(&mut buf, &batch).await.unwrap();
        assert_eq!(buf.into_inner().len(), 5 * (LEN_PREFIX_SIZE + 3));
    }
}
