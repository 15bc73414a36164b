//! Per-message wire metadata.
//!
//! Every frame is published with a small set of broker message properties:
//!
//! | Property | Value |
//! |---|---|
//! | correlation id | stream id |
//! | message id | frame index as decimal text |
//! | message type | `END_OF_STREAM` on the terminal frame only |
//! | delivery mode | transient (1) or persistent (2) |

use serde::{Deserialize, Serialize};

/// Message type carried by the last frame of a stream.
pub const END_OF_STREAM_MESSAGE_TYPE: &str = "END_OF_STREAM";

/// Broker delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Messages may be lost on broker restart.
    Transient,
    /// Messages are written to disk by the broker.
    #[default]
    Persistent,
}

impl DeliveryMode {
    /// Numeric value used on the wire.
    ///
    /// For [`DeliveryChannel`](crate::channel::DeliveryChannel)
    /// implementations that map properties onto a broker client.
    #[inline]
    pub fn as_u8(self) -> u8 {
        match self {
            DeliveryMode::Transient => 1,
            DeliveryMode::Persistent => 2,
        }
    }

    /// Parse the numeric wire value, as read back by a consumer.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(DeliveryMode::Transient),
            2 => Some(DeliveryMode::Persistent),
            _ => None,
        }
    }
}

/// Properties attached to a single published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    /// Stream id shared by all frames of a stream.
    pub correlation_id: String,
    /// Frame index as text.
    pub message_id: String,
    /// Set to [`END_OF_STREAM_MESSAGE_TYPE`] on the terminal frame.
    pub message_type: Option<String>,
    /// Delivery mode copied from the sender configuration.
    pub delivery_mode: DeliveryMode,
}

impl MessageProperties {
    /// Check whether these properties mark the end of a stream.
    #[inline]
    pub fn is_end_of_stream(&self) -> bool {
        self.message_type.as_deref() == Some(END_OF_STREAM_MESSAGE_TYPE)
    }

    /// Parse the frame index back out of the message id.
    ///
    /// Used on the receiving side to reorder frames.
    pub fn frame_index(&self) -> Option<u32> {
        self.message_id.parse().ok()
    }
}
