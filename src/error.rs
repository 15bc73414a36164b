//! Error types for streamsend.

use thiserror::Error;

/// Main error type for all sender operations.
#[derive(Debug, Error)]
pub enum SenderError {
    /// Invalid or incomplete sender configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The delivery channel refused a frame or a queue operation.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// I/O error while reading the source stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sender has been finished or closed.
    #[error("Sender closed")]
    Closed,

    /// A stream produced more frames than a frame index can number.
    #[error("Stream exceeds {0} frames")]
    TooManyFrames(u64),

    /// A blocking wait was cut short by shutdown.
    #[error("Interrupted while waiting for delivery capacity")]
    Interrupted,
}

/// Errors reported by a [`DeliveryChannel`](crate::channel::DeliveryChannel).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The channel or queue has already been closed.
    #[error("Channel already closed")]
    AlreadyClosed,

    /// The message could not be handed to the broker.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The broker refused to switch the channel into confirm mode.
    #[error("Publisher confirms unavailable: {0}")]
    ConfirmationsUnsupported(String),
}

/// Result type alias using SenderError.
pub type Result<T> = std::result::Result<T, SenderError>;
