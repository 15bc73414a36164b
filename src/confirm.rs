//! Publisher-confirm tracking.
//!
//! The [`ConfirmTracker`] keeps every frame published in confirm mode until
//! the broker acknowledges it, and republishes frames the broker reports as
//! lost.
//!
//! # Architecture
//!
//! ```text
//! producer ── admit_and_send ──► AdmissionGate ──► [pending lock] ──► channel.publish
//!                                     ▲                  ▲
//! broker ── ack ──────────────────────┘                  │
//! broker ── nack ── resend (same unit) ──────────────────┘
//! ```
//!
//! Sequence number allocation, record insertion and the publish happen as
//! one unit under the pending lock, so a confirm for a sequence number can
//! never be processed before its record exists.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::backpressure::AdmissionGate;
use crate::channel::{ConfirmListener, DeliveryChannel, Queue};
use crate::error::{Result, SenderError};
use crate::protocol::Frame;

/// Frames published but not yet acknowledged, keyed by sequence number.
type PendingRecords = BTreeMap<u64, Frame>;

struct TrackerShared<C> {
    channel: Arc<C>,
    destination: String,
    pending: Mutex<PendingRecords>,
    gate: AdmissionGate,
    poll_interval: Duration,
}

/// At-least-once delivery of frames under a bounded in-flight budget.
///
/// Cloning yields another handle to the same tracker.
pub struct ConfirmTracker<C> {
    shared: Arc<TrackerShared<C>>,
}

impl<C> Clone for ConfirmTracker<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<C: DeliveryChannel> ConfirmTracker<C> {
    /// Create a tracker publishing to `queue` with `budget` frames in flight.
    ///
    /// The tracker does not receive confirms until [`listen`](Self::listen)
    /// is called.
    pub fn new(queue: &Queue<C>, budget: usize, poll_interval: Duration) -> Self {
        Self {
            shared: Arc::new(TrackerShared {
                channel: queue.channel().clone(),
                destination: queue.name().to_string(),
                pending: Mutex::new(BTreeMap::new()),
                gate: AdmissionGate::new(budget),
                poll_interval,
            }),
        }
    }

    /// Switch the queue's channel into confirm mode and start tracking.
    ///
    /// Fails if the channel refuses confirm mode; the caller decides whether
    /// to continue without confirms.
    pub fn attach(
        queue: &Queue<C>,
        budget: usize,
        poll_interval: Duration,
    ) -> std::result::Result<Self, crate::error::ChannelError> {
        queue.channel().enable_confirmations()?;
        let tracker = Self::new(queue, budget, poll_interval);
        tracker.listen();
        Ok(tracker)
    }

    /// Register this tracker as the channel's confirm listener.
    ///
    /// The channel only holds a weak reference.
    pub fn listen(&self) {
        let listener = TrackerListener {
            shared: Arc::downgrade(&self.shared),
        };
        self.shared
            .channel
            .register_confirmation_listener(Arc::new(listener));
    }

    /// Publish a frame once a unit of the in-flight budget is free.
    ///
    /// Waits while the budget is exhausted. Returns the sequence number the
    /// frame was published under. On publish failure the frame is forgotten
    /// and its unit returned.
    pub async fn admit_and_send(&self, frame: Frame) -> Result<u64> {
        if self.shared.gate.is_saturated() {
            tracing::debug!(
                budget = self.shared.gate.budget(),
                "in-flight budget exhausted, waiting for confirms"
            );
        }
        self.shared.gate.reserve().await?;
        let mut pending = self.shared.pending.lock();
        self.shared.publish_locked(&mut pending, frame)
    }

    /// Handle a broker ack.
    pub fn on_ack(&self, seq: u64, multiple: bool) {
        self.shared.on_ack(seq, multiple);
    }

    /// Handle a broker nack by republishing the affected frames.
    pub fn on_nack(&self, seq: u64, multiple: bool) -> Result<()> {
        self.shared.on_nack(seq, multiple)
    }

    /// Wait until every tracked frame has been acknowledged.
    ///
    /// Returns [`SenderError::Interrupted`] if the tracker is shut down
    /// while waiting; frames may still be unacknowledged in that case.
    pub async fn drain(&self) -> Result<()> {
        loop {
            let empty = self.shared.pending.lock().is_empty();
            if empty {
                return Ok(());
            }
            if self.shared.gate.is_closed() {
                return Err(SenderError::Interrupted);
            }
            tokio::time::sleep(self.shared.poll_interval).await;
        }
    }

    /// Stop admitting frames and interrupt pending waits.
    pub fn shutdown(&self) {
        self.shared.gate.close();
    }

    /// Number of frames awaiting a confirm.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Sequence numbers awaiting a confirm, ascending.
    pub fn pending_sequences(&self) -> Vec<u64> {
        self.shared.pending.lock().keys().copied().collect()
    }

    /// Free units of the in-flight budget.
    pub fn available_permits(&self) -> usize {
        self.shared.gate.available()
    }

    /// Configured in-flight budget.
    pub fn budget(&self) -> usize {
        self.shared.gate.budget()
    }
}

impl<C: DeliveryChannel> TrackerShared<C> {
    /// Allocate a sequence number, record the frame and publish it.
    ///
    /// Must be called with the pending lock held. The caller must already
    /// hold a unit of the gate for this frame.
    fn publish_locked(&self, pending: &mut PendingRecords, frame: Frame) -> Result<u64> {
        let seq = self.channel.next_sequence_number();
        let properties = frame.properties();
        let payload = frame.payload.clone();

        tracing::trace!(
            seq,
            stream_id = %frame.stream_id,
            index = frame.index,
            "publishing frame"
        );
        pending.insert(seq, frame);

        match self.channel.publish(&self.destination, &properties, &payload) {
            Ok(()) => Ok(seq),
            Err(e) => {
                pending.remove(&seq);
                self.gate.release();
                Err(e.into())
            }
        }
    }

    fn on_ack(&self, seq: u64, multiple: bool) {
        let mut pending = self.pending.lock();
        if multiple {
            let acked = split_through(&mut pending, seq);
            self.gate.release_many(acked.len());
            tracing::trace!(seq, count = acked.len(), "cumulative ack");
        } else if pending.remove(&seq).is_some() {
            self.gate.release();
            tracing::trace!(seq, "ack");
        }
    }

    fn on_nack(&self, seq: u64, multiple: bool) -> Result<()> {
        let mut pending = self.pending.lock();

        if multiple {
            let lost = split_through(&mut pending, seq);
            tracing::debug!(seq, count = lost.len(), "cumulative nack, resending");

            let mut first_error = None;
            for (old_seq, frame) in lost {
                if let Err(e) = self.publish_locked(&mut pending, frame) {
                    tracing::error!(seq = old_seq, error = %e, "resend after nack failed, frame dropped");
                    first_error.get_or_insert(e);
                }
            }
            return first_error.map_or(Ok(()), Err);
        }

        match pending.remove(&seq) {
            Some(frame) => {
                tracing::debug!(seq, "nack, resending");
                self.publish_locked(&mut pending, frame).map(|_| ()).map_err(|e| {
                    tracing::error!(seq, error = %e, "resend after nack failed, frame dropped");
                    e
                })
            }
            None => {
                tracing::warn!(seq, "nack for unknown message ignored");
                Ok(())
            }
        }
    }
}

/// Remove and return every record with a sequence number `<= seq`.
fn split_through(pending: &mut PendingRecords, seq: u64) -> PendingRecords {
    match seq.checked_add(1) {
        Some(bound) => {
            let rest = pending.split_off(&bound);
            std::mem::replace(pending, rest)
        }
        None => std::mem::take(pending),
    }
}

/// Listener handed to the channel.
struct TrackerListener<C> {
    shared: Weak<TrackerShared<C>>,
}

impl<C: DeliveryChannel> ConfirmListener for TrackerListener<C> {
    fn handle_ack(&self, seq: u64, multiple: bool) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_ack(seq, multiple);
        }
    }

    fn handle_nack(&self, seq: u64, multiple: bool) -> Result<()> {
        match self.shared.upgrade() {
            Some(shared) => shared.on_nack(seq, multiple),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::error::ChannelError;
    use crate::protocol::DeliveryMode;
    use bytes::Bytes;

    const POLL: Duration = Duration::from_millis(1);

    fn setup(budget: usize) -> (Arc<MemoryChannel>, ConfirmTracker<MemoryChannel>) {
        let channel = MemoryChannel::shared();
        let queue = Queue::new("data", channel.clone());
        let tracker = ConfirmTracker::attach(&queue, budget, POLL).unwrap();
        (channel, tracker)
    }

    fn frame(index: u32, payload: &'static [u8]) -> Frame {
        Frame::new(
            "stream",
            index,
            false,
            DeliveryMode::Persistent,
            Bytes::from_static(payload),
        )
    }

    #[tokio::test]
    async fn test_admit_publishes_and_tracks() {
        let (channel, tracker) = setup(4);

        let seq = tracker.admit_and_send(frame(0, b"abc")).await.unwrap();

        assert_eq!(seq, 1);
        assert_eq!(tracker.pending_sequences(), vec![1]);
        assert_eq!(tracker.available_permits(), 3);

        let published = channel.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].destination, "data");
        assert_eq!(published[0].seq, Some(1));
        assert_eq!(published[0].payload, Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn test_single_ack_retires_record() {
        let (channel, tracker) = setup(4);
        tracker.admit_and_send(frame(0, b"a")).await.unwrap();
        tracker.admit_and_send(frame(1, b"b")).await.unwrap();

        channel.ack(1, false);

        assert_eq!(tracker.pending_sequences(), vec![2]);
        assert_eq!(tracker.available_permits(), 3);
    }

    #[tokio::test]
    async fn test_unknown_ack_releases_nothing() {
        let (channel, tracker) = setup(4);
        tracker.admit_and_send(frame(0, b"a")).await.unwrap();

        channel.ack(1, false);
        channel.ack(1, false);
        channel.ack(99, false);

        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(tracker.available_permits(), 4);
    }

    #[tokio::test]
    async fn test_cumulative_ack_retires_prefix() {
        let (channel, tracker) = setup(8);
        for i in 0..5 {
            tracker.admit_and_send(frame(i, b"x")).await.unwrap();
        }
        assert_eq!(tracker.available_permits(), 3);

        channel.ack(3, true);

        assert_eq!(tracker.pending_sequences(), vec![4, 5]);
        assert_eq!(tracker.available_permits(), 6);
    }

    #[tokio::test]
    async fn test_nack_resends_without_new_unit() {
        let (channel, tracker) = setup(2);
        let original = frame(7, b"payload");
        tracker.admit_and_send(original.clone()).await.unwrap();
        let before = tracker.available_permits();

        channel.nack(1, false).unwrap();

        let published = channel.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].seq, Some(2));
        assert_eq!(published[1].payload, original.payload);
        assert_eq!(published[1].properties, original.properties());
        assert_eq!(tracker.pending_sequences(), vec![2]);
        assert_eq!(tracker.available_permits(), before);

        channel.ack(2, false);
        assert_eq!(tracker.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_unknown_nack_is_ignored() {
        let (channel, tracker) = setup(2);
        tracker.admit_and_send(frame(0, b"a")).await.unwrap();

        channel.nack(42, false).unwrap();

        assert_eq!(channel.published_count(), 1);
        assert_eq!(tracker.pending_sequences(), vec![1]);
    }

    #[tokio::test]
    async fn test_cumulative_nack_resends_prefix() {
        let (channel, tracker) = setup(8);
        for i in 0..4 {
            tracker.admit_and_send(frame(i, b"x")).await.unwrap();
        }

        channel.nack(2, true).unwrap();

        assert_eq!(channel.published_count(), 6);
        assert_eq!(tracker.pending_sequences(), vec![3, 4, 5, 6]);
        assert_eq!(tracker.available_permits(), 4);

        let resent: Vec<_> = channel.published()[4..]
            .iter()
            .map(|m| m.properties.message_id.clone())
            .collect();
        assert_eq!(resent, vec!["0", "1"]);
    }

    #[tokio::test]
    async fn test_publish_failure_returns_unit() {
        let (channel, tracker) = setup(2);
        channel.fail_next_publishes(1);

        let result = tracker.admit_and_send(frame(0, b"a")).await;

        assert!(matches!(
            result,
            Err(SenderError::Channel(ChannelError::Transport(_)))
        ));
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(tracker.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_failed_resend_drops_frame() {
        let (channel, tracker) = setup(2);
        tracker.admit_and_send(frame(0, b"a")).await.unwrap();
        channel.fail_next_publishes(1);

        let result = channel.nack(1, false);

        assert!(result.is_err());
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(tracker.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_cumulative_nack_continues_after_failed_resend() {
        let (channel, tracker) = setup(4);
        for i in 0..3 {
            tracker.admit_and_send(frame(i, b"x")).await.unwrap();
        }
        channel.fail_next_publishes(1);

        let result = channel.nack(3, true);

        assert!(result.is_err());
        // Frame with seq 1 was dropped, the other two were resent.
        assert_eq!(tracker.pending_count(), 2);
        assert_eq!(tracker.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_admit_waits_for_ack() {
        let (channel, tracker) = setup(1);
        tracker.admit_and_send(frame(0, b"a")).await.unwrap();

        let producer = tracker.clone();
        let task = tokio::spawn(async move { producer.admit_and_send(frame(1, b"b")).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        assert_eq!(channel.published_count(), 1);

        channel.ack(1, false);
        let seq = task.await.unwrap().unwrap();
        assert_eq!(seq, 2);
        assert_eq!(tracker.pending_sequences(), vec![2]);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_blocked_producer() {
        let (_channel, tracker) = setup(1);
        tracker.admit_and_send(frame(0, b"a")).await.unwrap();

        let producer = tracker.clone();
        let task = tokio::spawn(async move { producer.admit_and_send(frame(1, b"b")).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        tracker.shutdown();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(SenderError::Interrupted)));
    }

    #[tokio::test]
    async fn test_drain_waits_for_confirms() {
        let (channel, tracker) = setup(4);
        tracker.admit_and_send(frame(0, b"a")).await.unwrap();

        let drainer = tracker.clone();
        let task = tokio::spawn(async move { drainer.drain().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        channel.ack(1, false);
        task.await.unwrap().unwrap();
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_interrupted_by_shutdown() {
        let (_channel, tracker) = setup(4);
        tracker.admit_and_send(frame(0, b"a")).await.unwrap();
        tracker.shutdown();

        let result = tracker.drain().await;
        assert!(matches!(result, Err(SenderError::Interrupted)));
    }

    #[tokio::test]
    async fn test_attach_fails_when_confirms_refused() {
        let channel = MemoryChannel::shared();
        channel.refuse_confirmations();
        let queue = Queue::new("data", channel);

        assert!(ConfirmTracker::attach(&queue, 4, POLL).is_err());
    }

    #[test]
    fn test_dropped_tracker_ignores_confirms() {
        let channel = MemoryChannel::shared();
        let queue = Queue::new("data", channel.clone());
        let tracker = ConfirmTracker::attach(&queue, 4, POLL).unwrap();
        drop(tracker);

        channel.ack(1, true);
        assert!(channel.nack(1, false).is_ok());
    }

    #[test]
    fn test_split_through_bounds() {
        let mut pending: PendingRecords = (1..=5).map(|i| (i, frame(i as u32, b""))).collect();

        let head = split_through(&mut pending, 2);
        assert_eq!(head.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(pending.keys().copied().collect::<Vec<_>>(), vec![3, 4, 5]);

        let rest = split_through(&mut pending, u64::MAX);
        assert_eq!(rest.len(), 3);
        assert!(pending.is_empty());
    }
}
