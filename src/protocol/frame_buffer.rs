//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management. Incoming chunks are appended
//! and every complete `[GLS]...[GLE]` frame is cut out and decoded:
//! - leading garbage without a start marker is dropped
//! - an end marker seen before any start marker is discarded
//! - a trailing partial frame is kept for the next push
//! - bodies that fail to decode are skipped, they are not framing errors
//!
//! The buffer is capped. When it grows past the cap the oldest bytes are
//! dropped, which may corrupt a frame straddling the cut.
//!
//! # Example
//!
//! ```
//! use ipcbus::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//! assert!(buffer.push(b"[GLS]").is_empty());
//! assert!(buffer.push(br#"{"name":"x","type":"publish"}"#).is_empty());
//! assert_eq!(buffer.push(b"[GLE]").len(), 1);
//! ```

use bytes::BytesMut;

use super::wire_format::{find, DEFAULT_MAX_BUFFER_SIZE, END_MARKER, START_MARKER};
use super::Message;

/// Buffer for accumulating incoming bytes and extracting complete messages.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Maximum number of bytes retained between pushes.
    max_size: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default 1 MB cap.
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Create a new frame buffer with a custom cap.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            max_size,
        }
    }

    /// Push data into the buffer and extract all complete messages.
    ///
    /// Messages are returned in the order their end markers appear.
    pub fn push(&mut self, data: &[u8]) -> Vec<Message> {
        self.buffer.extend_from_slice(data);

        let start = START_MARKER.as_bytes();
        let end = END_MARKER.as_bytes();

        if find(&self.buffer, start, 0).is_none() {
            // Keep a tail that could still be the beginning of a start marker.
            let keep = self.buffer.len().min(start.len() - 1);
            let _ = self.buffer.split_to(self.buffer.len() - keep);
            return Vec::new();
        }

        let mut messages = Vec::new();
        let mut consumed = None;
        let mut pos = 0;

        while let Some(s) = find(&self.buffer, start, pos) {
            let body_start = s + start.len();
            let Some(e) = find(&self.buffer, end, body_start) else {
                break;
            };

            match std::str::from_utf8(&self.buffer[body_start..e]) {
                Ok(body) => match Message::decode(body) {
                    Ok(message) => messages.push(message),
                    Err(err) => tracing::trace!("Dropping invalid message body: {}", err),
                },
                Err(_) => tracing::trace!("Dropping non UTF-8 message body"),
            }

            pos = e + end.len();
            consumed = Some(pos);
        }

        if let Some(consumed) = consumed {
            let _ = self.buffer.split_to(consumed);
        }

        if self.buffer.len() > self.max_size {
            let excess = self.buffer.len() - self.max_size;
            tracing::debug!("Frame buffer over capacity, dropping {} oldest bytes", excess);
            let _ = self.buffer.split_to(excess);
        }

        messages
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get the configured cap.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    #[cfg(test)]
    fn contents(&self) -> &[u8] {
        &self.buffer
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
