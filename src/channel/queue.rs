//! Destination queue handle and provisioning.

use std::fmt;
use std::sync::Arc;

use super::DeliveryChannel;
use crate::error::ChannelError;

/// A named queue reachable through a channel.
///
/// A sender built from a queue adopts it: closing the sender closes the
/// queue's channel.
pub struct Queue<C> {
    name: String,
    channel: Arc<C>,
}

impl<C: DeliveryChannel> Queue<C> {
    /// Wrap a channel and the name of the queue it publishes to.
    pub fn new(name: impl Into<String>, channel: Arc<C>) -> Self {
        Self {
            name: name.into(),
            channel,
        }
    }

    /// Queue name, used as the publish destination.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying channel.
    #[inline]
    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }

    /// Number of messages currently waiting in the queue.
    pub fn message_count(&self) -> Result<u32, ChannelError> {
        self.channel.message_count(&self.name)
    }

    /// Close the queue's channel.
    pub fn close(&self) {
        self.channel.close();
    }
}

impl<C> fmt::Debug for Queue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").field("name", &self.name).finish()
    }
}

/// Creates queues by name.
pub trait QueueFactory: Send + Sync {
    /// Channel type backing the created queues.
    type Channel: DeliveryChannel;

    /// Declare a queue with default settings and return a handle to it.
    fn create_default_queue(&self, name: &str) -> Result<Queue<Self::Channel>, ChannelError>;
}

impl<F: QueueFactory + ?Sized> QueueFactory for Arc<F> {
    type Channel = F::Channel;

    fn create_default_queue(&self, name: &str) -> Result<Queue<Self::Channel>, ChannelError> {
        (**self).create_default_queue(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;

    #[test]
    fn test_queue_delegates_to_channel() {
        let channel = MemoryChannel::shared();
        let queue = Queue::new("data", channel.clone());
        channel.set_message_count(3);

        assert_eq!(queue.name(), "data");
        assert_eq!(queue.message_count(), Ok(3));

        queue.close();
        assert!(channel.is_closed());
        assert_eq!(queue.message_count(), Err(ChannelError::AlreadyClosed));
    }

    #[test]
    fn test_queue_debug_shows_name() {
        let queue = Queue::new("data", MemoryChannel::shared());
        assert_eq!(format!("{queue:?}"), "Queue { name: \"data\" }");
    }
}
