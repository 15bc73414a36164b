//! Stream id generation.
//!
//! A stream id is used as the correlation id of every frame of a stream, so
//! it must be unique per sender. Two strategies are provided:
//! - [`RandomIdGenerator`]: random UUIDs, the builder default
//! - [`SteppingIdGenerator`]: a counter advancing by a fixed step

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Source of unique stream ids.
pub trait IdGenerator: Send + Sync {
    /// Return the next unused id.
    fn next_id(&self) -> String;
}

/// Generates random UUID v4 ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl RandomIdGenerator {
    /// Create a new random id generator.
    pub fn new() -> Self {
        Self
    }
}

impl IdGenerator for RandomIdGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Generates decimal ids from a counter.
///
/// Several senders sharing one queue can use the same step with different
/// start values to keep their ids disjoint.
#[derive(Debug)]
pub struct SteppingIdGenerator {
    next: AtomicU64,
    step: u64,
}

impl SteppingIdGenerator {
    /// Create a generator starting at 0 with step 1.
    pub fn new() -> Self {
        Self::with_step(0, 1)
    }

    /// Create a generator with a custom start value and step.
    pub fn with_step(start: u64, step: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
            step,
        }
    }
}

impl Default for SteppingIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SteppingIdGenerator {
    fn next_id(&self) -> String {
        self.next.fetch_add(self.step, Ordering::Relaxed).to_string()
    }
}

impl<T: IdGenerator + ?Sized> IdGenerator for std::sync::Arc<T> {
    fn next_id(&self) -> String {
        (**self).next_id()
    }
}
