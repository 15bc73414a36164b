//! Broker channel abstraction.
//!
//! The sender never talks to a broker client directly. It needs a channel
//! that can:
//! - publish a message with [`MessageProperties`] to a named queue
//! - optionally switch into publisher-confirm mode and report acks/nacks
//!   keyed by a per-channel sequence number
//! - report the depth of a queue and release its resources
//!
//! [`MemoryChannel`] is an in-process implementation used for tests and
//! local wiring.

mod memory;
mod queue;

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{ChannelError, Result};
use crate::protocol::MessageProperties;

pub use memory::{MemoryChannel, MemoryQueueFactory, PublishedMessage};
pub use queue::{Queue, QueueFactory};

/// Receiver of publisher confirms.
///
/// Both methods may be called from any thread, concurrently with publishes
/// and with each other.
pub trait ConfirmListener: Send + Sync {
    /// The broker accepted the message with sequence number `seq`, or every
    /// message up to and including `seq` if `multiple` is set.
    fn handle_ack(&self, seq: u64, multiple: bool);

    /// The broker lost the message with sequence number `seq`, or every
    /// message up to and including `seq` if `multiple` is set.
    fn handle_nack(&self, seq: u64, multiple: bool) -> Result<()>;
}

/// A broker channel capable of publishing messages.
///
/// Implementations must not invoke a registered [`ConfirmListener`] from
/// inside [`publish`](DeliveryChannel::publish) on the publishing thread.
pub trait DeliveryChannel: Send + Sync + 'static {
    /// Publish one message. Fire-and-forget unless confirms are enabled.
    fn publish(
        &self,
        destination: &str,
        properties: &MessageProperties,
        payload: &Bytes,
    ) -> std::result::Result<(), ChannelError>;

    /// Switch the channel into publisher-confirm mode.
    fn enable_confirmations(&self) -> std::result::Result<(), ChannelError>;

    /// Sequence number the next publish will be confirmed under.
    ///
    /// Only meaningful while the caller has exclusive use of the channel.
    fn next_sequence_number(&self) -> u64;

    /// Register the receiver of acks and nacks.
    fn register_confirmation_listener(&self, listener: Arc<dyn ConfirmListener>);

    /// Number of messages waiting in `queue`.
    fn message_count(&self, queue: &str) -> std::result::Result<u32, ChannelError>;

    /// Release the channel. Safe to call more than once.
    fn close(&self);
}
