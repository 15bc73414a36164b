//! Sender builder and facade.
//!
//! The [`SenderBuilder`] validates the configuration and provides the
//! destination queue. The [`DataSender`] manages the lifecycle:
//! 1. Cut each submitted stream into frames
//! 2. Publish every frame, through the confirm tracker when confirms are on
//! 3. On `finish`, wait until the frames are confirmed (or consumed)
//! 4. Close the adopted queue
//!
//! # Example
//!
//! ```ignore
//! use streamsend::channel::{MemoryChannel, Queue};
//! use streamsend::DataSender;
//!
//! let queue = Queue::new("data", MemoryChannel::shared());
//! let sender = DataSender::builder()
//!     .queue(queue)
//!     .message_size(4096)
//!     .message_buffer(32)
//!     .build()?;
//!
//! let stream_id = sender.send_bytes(b"hello world").await?;
//! sender.finish().await;
//! ```
//!
//! # Delivery guarantees
//!
//! With confirms enabled every frame is delivered at least once, unless a
//! resend after a nack fails (the error is reported to the channel and the
//! frame is dropped) or `finish` is interrupted by a concurrent `close`.
//! Without confirms a frame is handed to the channel exactly once and
//! nothing more is promised.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::sync::Notify;

use crate::channel::{DeliveryChannel, Queue, QueueFactory};
use crate::config::{SenderConfig, DRAIN_CONFIRMATIONS};
use crate::confirm::ConfirmTracker;
use crate::error::{ChannelError, Result, SenderError};
use crate::id::{IdGenerator, RandomIdGenerator};
use crate::protocol::{DeliveryMode, Frame, FrameReader};

/// Error reported when no destination queue can be determined.
pub const QUEUE_INFO_MISSING: &str = "neither a queue nor a queue name and a queue factory \
    were provided; either a queue or a name and a factory to create one are mandatory";

const STATE_OPEN: u8 = 0;
const STATE_DRAINING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Lifecycle state of a [`DataSender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Accepting streams.
    Open,
    /// `finish` is waiting for outstanding frames.
    Draining,
    /// Queue released; every send fails.
    Closed,
}

/// How frames reach the channel, decided once at construction.
enum Delivery<C> {
    /// Through the confirm tracker, at least once.
    Confirmed(ConfirmTracker<C>),
    /// Straight to the channel, at most once.
    BestEffort,
}

/// Builder for configuring and creating a [`DataSender`].
pub struct SenderBuilder<C: DeliveryChannel> {
    queue: Option<Queue<C>>,
    factory: Option<(Box<dyn QueueFactory<Channel = C>>, String)>,
    ids: Arc<dyn IdGenerator>,
    config: SenderConfig,
}

impl<C: DeliveryChannel> SenderBuilder<C> {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            queue: None,
            factory: None,
            ids: Arc::new(RandomIdGenerator::new()),
            config: SenderConfig::default(),
        }
    }

    /// Use an existing queue. The sender takes ownership of it.
    ///
    /// Takes precedence over [`queue_factory`](Self::queue_factory).
    pub fn queue(mut self, queue: Queue<C>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Create the queue with `factory` if no queue was given.
    pub fn queue_factory<F>(mut self, factory: F, name: impl Into<String>) -> Self
    where
        F: QueueFactory<Channel = C> + 'static,
    {
        self.factory = Some((Box::new(factory), name.into()));
        self
    }

    /// Set the generator for stream ids.
    ///
    /// Default: random UUIDs
    pub fn id_generator<G>(mut self, ids: G) -> Self
    where
        G: IdGenerator + 'static,
    {
        self.ids = Arc::new(ids);
        self
    }

    /// Set the nominal frame size. Frames may grow up to twice this value.
    ///
    /// Default: 65536
    pub fn message_size(mut self, size: usize) -> Self {
        self.config.message_size = size;
        self
    }

    /// Set the number of frames that may await a confirm.
    ///
    /// When the limit is reached, sends wait for acks. 0 turns publisher
    /// confirms off.
    /// Default: 100
    pub fn message_buffer(mut self, frames: usize) -> Self {
        self.config.message_buffer = frames;
        self
    }

    /// Set the delivery mode of published frames.
    ///
    /// Default: persistent
    pub fn delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.config.delivery_mode = mode;
        self
    }

    /// Set the delay between drain checks in `finish`.
    ///
    /// Default: 200ms
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Replace all tunables at once.
    pub fn config(mut self, config: SenderConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the settings and build the sender.
    ///
    /// Fails with [`SenderError::Config`] if no queue can be determined or
    /// the configuration is invalid, and with [`SenderError::Channel`] if
    /// the factory cannot create the queue.
    pub fn build(self) -> Result<DataSender<C>> {
        self.config.validate()?;

        let queue = match (self.queue, self.factory) {
            (Some(queue), _) => queue,
            (None, Some((factory, name))) => factory.create_default_queue(&name)?,
            (None, None) => return Err(SenderError::Config(QUEUE_INFO_MISSING.into())),
        };

        Ok(DataSender::new(queue, self.ids, self.config))
    }
}

impl<C: DeliveryChannel> Default for SenderBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends byte streams as sequences of frames over a broker queue.
///
/// Once [`finish`](Self::finish) or [`close`](Self::close) has been called
/// every send fails with [`SenderError::Closed`]. Dropping the sender closes
/// it.
pub struct DataSender<C: DeliveryChannel> {
    /// Destination, owned by the sender.
    queue: Queue<C>,
    /// Stream id source.
    ids: Arc<dyn IdGenerator>,
    /// Tunables.
    config: SenderConfig,
    /// Confirmed or best-effort path.
    delivery: Delivery<C>,
    /// One of the `STATE_*` values.
    state: AtomicU8,
    /// Woken when the sender reaches `STATE_CLOSED`.
    closed: Notify,
}

impl<C: DeliveryChannel> DataSender<C> {
    /// Create a new sender builder.
    pub fn builder() -> SenderBuilder<C> {
        SenderBuilder::new()
    }

    fn new(queue: Queue<C>, ids: Arc<dyn IdGenerator>, config: SenderConfig) -> Self {
        let delivery = if config.confirmations_enabled() {
            match ConfirmTracker::attach(&queue, config.message_buffer, config.poll_interval) {
                Ok(tracker) => Delivery::Confirmed(tracker),
                Err(e) => {
                    tracing::warn!(
                        queue = queue.name(),
                        error = %e,
                        "could not enable publisher confirms, sending without delivery guarantee"
                    );
                    Delivery::BestEffort
                }
            }
        } else {
            Delivery::BestEffort
        };

        Self {
            queue,
            ids,
            config,
            delivery,
            state: AtomicU8::new(STATE_OPEN),
            closed: Notify::new(),
        }
    }

    /// Send a byte slice as a new stream. Returns the generated stream id.
    pub async fn send_bytes(&self, data: &[u8]) -> Result<String> {
        let stream_id = self.ids.next_id();
        self.send_stream_with_id(data, &stream_id).await?;
        Ok(stream_id)
    }

    /// Send a byte slice as the stream `stream_id`.
    pub async fn send_bytes_with_id(&self, data: &[u8], stream_id: &str) -> Result<()> {
        self.send_stream_with_id(data, stream_id).await
    }

    /// Send everything `reader` yields as a new stream. Returns the
    /// generated stream id.
    pub async fn send_stream<R>(&self, reader: R) -> Result<String>
    where
        R: AsyncRead + Unpin,
    {
        let stream_id = self.ids.next_id();
        self.send_stream_with_id(reader, &stream_id).await?;
        Ok(stream_id)
    }

    /// Send everything `reader` yields as the stream `stream_id`.
    ///
    /// On error the stream has only been partially sent; the frames already
    /// published are not withdrawn.
    pub async fn send_stream_with_id<R>(&self, reader: R, stream_id: &str) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        self.ensure_open()?;

        let mut frames = FrameReader::new(
            reader,
            stream_id,
            self.config.message_size,
            self.config.delivery_mode,
        );

        while let Some(frame) = frames.next_frame().await? {
            self.ensure_open()?;
            self.deliver(frame).await?;
        }

        tracing::debug!(stream_id, "stream sent");
        Ok(())
    }

    async fn deliver(&self, frame: Frame) -> Result<()> {
        match &self.delivery {
            Delivery::Confirmed(tracker) => tracker.admit_and_send(frame).await.map(|_| ()),
            Delivery::BestEffort => {
                tracing::trace!(
                    stream_id = %frame.stream_id,
                    index = frame.index,
                    "publishing frame"
                );
                self.queue
                    .channel()
                    .publish(self.queue.name(), &frame.properties(), &frame.payload)?;
                Ok(())
            }
        }
    }

    /// Wait until all sent frames are delivered, then close the sender.
    ///
    /// With confirms this waits for every frame to be acked. Without
    /// confirms it waits until the queue has been seen empty
    /// [`DRAIN_CONFIRMATIONS`] times in a row. Polling errors are logged and
    /// treated as drained.
    ///
    /// Concurrent callers all return once the first one has closed the
    /// sender. If [`close`](Self::close) is called while this waits, the
    /// wait ends early and delivery of every frame is not guaranteed.
    pub async fn finish(&self) {
        if self
            .state
            .compare_exchange(STATE_OPEN, STATE_DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.wait_closed().await;
            return;
        }

        match &self.delivery {
            Delivery::Confirmed(tracker) => {
                if let Err(e) = tracker.drain().await {
                    tracing::warn!(
                        error = %e,
                        "interrupted while waiting for confirms, not all frames are guaranteed to be delivered"
                    );
                }
            }
            Delivery::BestEffort => self.wait_for_empty_queue().await,
        }

        self.close();
    }

    async fn wait_closed(&self) {
        let notified = self.closed.notified();
        tokio::pin!(notified);
        // Register before checking so a close in between is not missed.
        notified.as_mut().enable();
        if self.state() == SenderState::Closed {
            return;
        }
        notified.await;
    }

    async fn wait_for_empty_queue(&self) {
        let mut empty_checks = 0;

        while empty_checks < DRAIN_CONFIRMATIONS {
            if self.state() == SenderState::Closed {
                tracing::warn!(
                    "interrupted while waiting for the queue to drain, not all frames are guaranteed to be consumed"
                );
                return;
            }

            match self.queue.message_count() {
                Ok(0) => empty_checks += 1,
                Ok(_) => empty_checks = 0,
                Err(ChannelError::AlreadyClosed) => {
                    tracing::info!(
                        queue = self.queue.name(),
                        "queue already closed, assuming all frames have been consumed"
                    );
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        queue = self.queue.name(),
                        error = %e,
                        "could not check whether all frames have been consumed, ignoring"
                    );
                    return;
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Close the sender and its queue without waiting.
    ///
    /// Idempotent; the queue is closed exactly once.
    pub fn close(&self) {
        if self.state.swap(STATE_CLOSED, Ordering::AcqRel) == STATE_CLOSED {
            return;
        }
        if let Delivery::Confirmed(tracker) = &self.delivery {
            tracker.shutdown();
        }
        self.queue.close();
        self.closed.notify_waiters();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SenderState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => SenderState::Open,
            STATE_DRAINING => SenderState::Draining,
            _ => SenderState::Closed,
        }
    }

    /// Whether frames go through publisher confirms.
    pub fn is_confirmed(&self) -> bool {
        matches!(self.delivery, Delivery::Confirmed(_))
    }

    /// The confirm tracker, if confirms are enabled.
    pub fn tracker(&self) -> Option<&ConfirmTracker<C>> {
        match &self.delivery {
            Delivery::Confirmed(tracker) => Some(tracker),
            Delivery::BestEffort => None,
        }
    }

    /// The destination queue.
    pub fn queue(&self) -> &Queue<C> {
        &self.queue
    }

    /// Sender configuration.
    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.load(Ordering::Acquire) == STATE_OPEN {
            Ok(())
        } else {
            Err(SenderError::Closed)
        }
    }
}

impl<C: DeliveryChannel> Drop for DataSender<C> {
    fn drop(&mut self) {
        self.close();
    }
}
