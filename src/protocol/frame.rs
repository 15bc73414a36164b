//! Frame struct with typed accessors.
//!
//! A frame is one bounded piece of a larger byte stream, tagged with the
//! stream id, its position in the stream and whether it is the last one.
//! Uses `bytes::Bytes` so frames can be buffered for resend without copying.
//!
//! # Example
//!
//! ```
//! use streamsend::protocol::{DeliveryMode, Frame};
//! use bytes::Bytes;
//!
//! let frame = Frame::new("stream-1", 0, true, DeliveryMode::Persistent, Bytes::from_static(b"hello"));
//!
//! assert_eq!(frame.index(), 0);
//! assert!(frame.properties().is_end_of_stream());
//! ```

use std::sync::Arc;

use bytes::Bytes;

use super::properties::{DeliveryMode, MessageProperties, END_OF_STREAM_MESSAGE_TYPE};

/// A single frame of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Stream id, shared by all frames of one stream.
    pub stream_id: Arc<str>,
    /// Position within the stream, starting at 0.
    pub index: u32,
    /// True only for the last frame of the stream.
    pub is_terminal: bool,
    /// Delivery mode copied from the sender configuration.
    pub delivery_mode: DeliveryMode,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(
        stream_id: impl Into<Arc<str>>,
        index: u32,
        is_terminal: bool,
        delivery_mode: DeliveryMode,
        payload: Bytes,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            index,
            is_terminal,
            delivery_mode,
            payload,
        }
    }

    /// Get the stream id.
    #[inline]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Get the frame index.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Check if this is the last frame of its stream.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.is_terminal
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Build the broker message properties for this frame.
    pub fn properties(&self) -> MessageProperties {
        MessageProperties {
            correlation_id: self.stream_id.to_string(),
            message_id: self.index.to_string(),
            message_type: self
                .is_terminal
                .then(|| END_OF_STREAM_MESSAGE_TYPE.to_string()),
            delivery_mode: self.delivery_mode,
        }
    }
}
