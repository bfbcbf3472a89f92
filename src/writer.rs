//! Dedicated writer task for sending frames.
//!
//! Every socket gets exactly one writer task fed by an mpsc channel, so
//! frames from the broker, the read loop and request handlers never
//! interleave on the wire. Enqueueing is synchronous and never blocks.
//!
//! # Architecture
//!
//! ```text
//! Broker::publish ─┐
//! Responder       ─┼─► mpsc::UnboundedSender<Bytes> ─► Writer Task ─► Pipe
//! Read loop       ─┘
//! ```
//!
//! When the token is cancelled or every handle is dropped, the task writes
//! what is already queued and then shuts the write side down (half-close).
//! After cancellation that drain gets [`DRAIN_TIMEOUT`]; a peer that stops
//! reading cannot keep the task alive past it.

use std::io::IoSlice;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{IpcError, Result};
use crate::protocol::Message;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// How long a cancelled writer may keep flushing before the socket is dropped.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable and can be shared across handlers.
#[derive(Clone)]
pub struct WriterHandle {
    /// Channel sender for frames.
    tx: mpsc::UnboundedSender<Bytes>,
}

impl WriterHandle {
    /// Queue an already framed buffer.
    ///
    /// Fails only when the writer task has exited.
    pub fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.tx.send(frame).map_err(|_| IpcError::ConnectionClosed)
    }

    /// Encode and queue a message.
    pub fn send(&self, message: &Message) -> Result<()> {
        self.send_frame(message.to_frame()?)
    }

    /// Whether the writer task has exited.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// # Arguments
///
/// * `writer` - The async writer (pipe write half)
/// * `cancel` - Token that ends the task after draining queued frames
///
/// # Returns
///
/// A tuple of `(WriterHandle, JoinHandle)` where the JoinHandle can be used
/// to wait for the writer task to complete.
pub fn spawn_writer_task<W>(
    writer: W,
    cancel: CancellationToken,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(writer_loop(rx, writer, cancel));

    (WriterHandle { tx }, task)
}

/// Run [`pump`] and bound whatever it still does after cancellation.
async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    mut writer: W,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let work = pump(&mut rx, &mut writer, &cancel);
    tokio::pin!(work);

    tokio::select! {
        result = &mut work => return result,
        () = cancel.cancelled() => {}
    }

    match tokio::time::timeout(DRAIN_TIMEOUT, work).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!("Writer drain timed out, dropping the socket");
            Err(IpcError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "peer did not accept queued frames",
            )))
        }
    }
}

/// Receive frames and write them to the pipe, then drain and half-close.
async fn pump<W>(
    rx: &mut mpsc::UnboundedReceiver<Bytes>,
    writer: &mut W,
    cancel: &CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = tokio::select! {
            frame = rx.recv() => frame,
            () = cancel.cancelled() => None,
        };

        let Some(first) = first else {
            break;
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        write_batch(writer, &batch).await?;
    }

    // Flush whatever was queued before shutdown was requested.
    rx.close();
    let mut rest = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        rest.push(frame);
    }
    write_batch(writer, &rest).await?;

    writer.shutdown().await?;
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(Bytes::len).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(IpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data left after `skip_bytes` were written.
fn build_remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for frame in batch {
        let end = offset + frame.len();
        if skip_bytes < end && !frame.is_empty() {
            let start_in_frame = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame[start_in_frame..]));
        }
        offset = end;
    }

    slices
}
