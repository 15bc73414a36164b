//! Frame reader that cuts an async byte source into frames.
//!
//! Bytes are accumulated in a buffer bounded to `2 * frame_size`. After
//! every read:
//! - end of source: the accumulated bytes (possibly none) become the
//!   terminal frame
//! - accumulated length reached `frame_size`: the accumulated bytes become a
//!   non-terminal frame and accumulation restarts
//!
//! A single read is never split, so a frame can hold up to
//! `2 * frame_size` bytes. The buffer grows with the data read rather than
//! being allocated at its bound up front.
//!
//! # Example
//!
//! ```ignore
//! use streamsend::protocol::{DeliveryMode, FrameReader};
//!
//! let mut reader = FrameReader::new(&b"some bytes"[..], "stream-1", 4, DeliveryMode::Persistent);
//!
//! while let Some(frame) = reader.next_frame().await? {
//!     println!("frame {} ({} bytes)", frame.index(), frame.payload_len());
//! }
//! ```

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::properties::DeliveryMode;
use super::Frame;
use crate::error::{Result, SenderError};

/// Upper bound on the capacity reserved ahead of a single read.
const MAX_READ_RESERVE: usize = 1 << 20;

/// Lazy, finite, non-restartable frame source over an [`AsyncRead`].
pub struct FrameReader<R> {
    /// Source of stream bytes.
    reader: R,
    /// Stream id stamped on every frame.
    stream_id: Arc<str>,
    /// Cut threshold.
    frame_size: usize,
    /// Largest payload, `2 * frame_size` saturated.
    max_frame_size: usize,
    /// Delivery mode stamped on every frame.
    delivery_mode: DeliveryMode,
    /// Accumulated bytes of the frame being built.
    buffer: BytesMut,
    /// Index of the next frame to emit.
    next_index: u64,
    /// Set once the terminal frame has been emitted.
    finished: bool,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a frame reader.
    ///
    /// A `frame_size` of 0 is treated as 1.
    pub fn new(
        reader: R,
        stream_id: impl Into<Arc<str>>,
        frame_size: usize,
        delivery_mode: DeliveryMode,
    ) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            reader,
            stream_id: stream_id.into(),
            frame_size,
            max_frame_size: frame_size.saturating_mul(2),
            delivery_mode,
            buffer: BytesMut::new(),
            next_index: 0,
            finished: false,
        }
    }

    /// Largest payload this reader can emit.
    #[inline]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Stream id stamped on the frames.
    #[inline]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Check whether the terminal frame has already been emitted.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read until the next frame is complete.
    ///
    /// Returns `Ok(None)` once the terminal frame has been emitted, and
    /// [`SenderError::TooManyFrames`] if the stream needs more frames than a
    /// `u32` index can number.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            // buffer.len() < frame_size here, so the limit is never zero and
            // a zero-length read always means end of source.
            let limit = self.max_frame_size - self.buffer.len();
            self.buffer.reserve(limit.min(MAX_READ_RESERVE));
            let n = (&mut self.reader)
                .take(limit as u64)
                .read_buf(&mut self.buffer)
                .await?;

            if n == 0 {
                let frame = self.emit(true)?;
                self.finished = true;
                return Ok(Some(frame));
            }

            if self.buffer.len() >= self.frame_size {
                return self.emit(false).map(Some);
            }
        }
    }

    /// Turn the accumulated bytes into a frame and restart accumulation.
    fn emit(&mut self, is_terminal: bool) -> Result<Frame> {
        let index = u32::try_from(self.next_index)
            .map_err(|_| SenderError::TooManyFrames(self.next_index))?;
        let frame = Frame::new(
            self.stream_id.clone(),
            index,
            is_terminal,
            self.delivery_mode,
            self.buffer.split().freeze(),
        );
        self.next_index += 1;
        Ok(frame)
    }
}
