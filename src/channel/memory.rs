//! In-process delivery channel.
//!
//! [`MemoryChannel`] records every published message instead of sending it
//! anywhere. Confirms are driven by hand through [`MemoryChannel::ack`] and
//! [`MemoryChannel::nack`], which makes the confirm path fully
//! deterministic. Failures can be injected for publish, confirm activation
//! and queue depth polling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use super::{ConfirmListener, DeliveryChannel, Queue, QueueFactory};
use crate::error::{ChannelError, Result};
use crate::protocol::MessageProperties;

/// A message recorded by [`MemoryChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Confirm sequence number, if confirms were enabled.
    pub seq: Option<u64>,
    /// Destination queue.
    pub destination: String,
    /// Message properties.
    pub properties: MessageProperties,
    /// Message body.
    pub payload: Bytes,
}

#[derive(Debug)]
struct ChannelState {
    next_seq: u64,
    confirms: bool,
    closed: bool,
    published: Vec<PublishedMessage>,
    failing_publishes: usize,
    refuse_confirms: bool,
    depth: u32,
    scripted_depths: VecDeque<std::result::Result<u32, ChannelError>>,
}

/// Channel that keeps published messages in memory.
pub struct MemoryChannel {
    state: Mutex<ChannelState>,
    listener: Mutex<Option<Arc<dyn ConfirmListener>>>,
    close_calls: AtomicUsize,
    depth_polls: AtomicUsize,
}

impl MemoryChannel {
    /// Create an open channel with confirms disabled.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState {
                next_seq: 1,
                confirms: false,
                closed: false,
                published: Vec::new(),
                failing_publishes: 0,
                refuse_confirms: false,
                depth: 0,
                scripted_depths: VecDeque::new(),
            }),
            listener: Mutex::new(None),
            close_calls: AtomicUsize::new(0),
            depth_polls: AtomicUsize::new(0),
        }
    }

    /// Create a channel wrapped in an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make the next `count` publishes fail with a transport error.
    pub fn fail_next_publishes(&self, count: usize) {
        self.state.lock().failing_publishes = count;
    }

    /// Make [`enable_confirmations`](DeliveryChannel::enable_confirmations) fail.
    pub fn refuse_confirmations(&self) {
        self.state.lock().refuse_confirms = true;
    }

    /// Set the queue depth reported once scripted depths run out.
    pub fn set_message_count(&self, depth: u32) {
        self.state.lock().depth = depth;
    }

    /// Queue results returned by the next depth polls, in order.
    pub fn script_message_counts<I>(&self, results: I)
    where
        I: IntoIterator<Item = std::result::Result<u32, ChannelError>>,
    {
        self.state.lock().scripted_depths.extend(results);
    }

    /// Check whether confirm mode has been enabled.
    pub fn confirms_enabled(&self) -> bool {
        self.state.lock().confirms
    }

    /// Check whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of times [`close`](DeliveryChannel::close) was called.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::Acquire)
    }

    /// Number of queue depth polls served.
    pub fn depth_polls(&self) -> usize {
        self.depth_polls.load(Ordering::Acquire)
    }

    /// Snapshot of all published messages, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }

    /// Number of published messages.
    pub fn published_count(&self) -> usize {
        self.state.lock().published.len()
    }

    /// Sequence number of the most recent confirmed-mode publish.
    pub fn last_sequence_number(&self) -> Option<u64> {
        self.state
            .lock()
            .published
            .iter()
            .rev()
            .find_map(|m| m.seq)
    }

    /// Deliver an ack to the registered listener.
    pub fn ack(&self, seq: u64, multiple: bool) {
        if let Some(listener) = self.current_listener() {
            listener.handle_ack(seq, multiple);
        }
    }

    /// Deliver a nack to the registered listener.
    pub fn nack(&self, seq: u64, multiple: bool) -> Result<()> {
        match self.current_listener() {
            Some(listener) => listener.handle_nack(seq, multiple),
            None => Ok(()),
        }
    }

    /// Ack every message published so far.
    pub fn ack_all(&self) {
        if let Some(seq) = self.last_sequence_number() {
            self.ack(seq, true);
        }
    }

    fn current_listener(&self) -> Option<Arc<dyn ConfirmListener>> {
        self.listener.lock().clone()
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryChannel for MemoryChannel {
    fn publish(
        &self,
        destination: &str,
        properties: &MessageProperties,
        payload: &Bytes,
    ) -> std::result::Result<(), ChannelError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ChannelError::AlreadyClosed);
        }
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(ChannelError::Transport("injected publish failure".into()));
        }

        let seq = if state.confirms {
            let seq = state.next_seq;
            state.next_seq += 1;
            Some(seq)
        } else {
            None
        };

        state.published.push(PublishedMessage {
            seq,
            destination: destination.to_string(),
            properties: properties.clone(),
            payload: payload.clone(),
        });
        Ok(())
    }

    fn enable_confirmations(&self) -> std::result::Result<(), ChannelError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ChannelError::AlreadyClosed);
        }
        if state.refuse_confirms {
            return Err(ChannelError::ConfirmationsUnsupported(
                "confirm.select refused".into(),
            ));
        }
        state.confirms = true;
        Ok(())
    }

    fn next_sequence_number(&self) -> u64 {
        let state = self.state.lock();
        if state.confirms {
            state.next_seq
        } else {
            0
        }
    }

    fn register_confirmation_listener(&self, listener: Arc<dyn ConfirmListener>) {
        *self.listener.lock() = Some(listener);
    }

    fn message_count(&self, _queue: &str) -> std::result::Result<u32, ChannelError> {
        self.depth_polls.fetch_add(1, Ordering::AcqRel);
        let mut state = self.state.lock();
        if let Some(result) = state.scripted_depths.pop_front() {
            return result;
        }
        if state.closed {
            return Err(ChannelError::AlreadyClosed);
        }
        Ok(state.depth)
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::AcqRel);
        self.state.lock().closed = true;
        self.listener.lock().take();
    }
}

/// Factory handing out queues backed by fresh [`MemoryChannel`]s.
#[derive(Default)]
pub struct MemoryQueueFactory {
    created: Mutex<Vec<(String, Arc<MemoryChannel>)>>,
    fail: bool,
}

impl MemoryQueueFactory {
    /// Create a factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory whose every call fails.
    pub fn failing() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Channels created so far, by queue name.
    pub fn created(&self) -> Vec<(String, Arc<MemoryChannel>)> {
        self.created.lock().clone()
    }
}

impl QueueFactory for MemoryQueueFactory {
    type Channel = MemoryChannel;

    fn create_default_queue(
        &self,
        name: &str,
    ) -> std::result::Result<Queue<MemoryChannel>, ChannelError> {
        if self.fail {
            return Err(ChannelError::Transport(format!(
                "cannot declare queue {name}"
            )));
        }
        let channel = MemoryChannel::shared();
        self.created
            .lock()
            .push((name.to_string(), channel.clone()));
        Ok(Queue::new(name, channel))
    }
}
