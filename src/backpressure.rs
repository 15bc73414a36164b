//! Admission gate bounding the number of frames in flight.
//!
//! Every frame published in confirm mode holds one unit of the gate from
//! the moment it is admitted until the broker acks it (or its publish
//! fails). Resends after a nack reuse the original unit, so the gate
//! counts outstanding frames rather than wire transmissions.
//!
//! # Usage
//!
//! The producer calls [`AdmissionGate::reserve`], which suspends while the
//! budget is exhausted. Broker callbacks call [`AdmissionGate::release`] or
//! [`AdmissionGate::release_many`] from any thread. Closing the gate wakes
//! every waiting producer with [`SenderError::Interrupted`].

use tokio::sync::Semaphore;

use crate::error::{Result, SenderError};

/// Default number of frames allowed in flight.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 100;

/// Counting gate shared between the producer and confirm callbacks.
#[derive(Debug)]
pub struct AdmissionGate {
    /// Free units.
    permits: Semaphore,
    /// Total units.
    budget: usize,
}

impl AdmissionGate {
    /// Create a gate with `budget` free units.
    ///
    /// Budgets above [`Semaphore::MAX_PERMITS`] are clamped.
    pub fn new(budget: usize) -> Self {
        let budget = budget.min(Semaphore::MAX_PERMITS);
        Self {
            permits: Semaphore::new(budget),
            budget,
        }
    }

    /// Total number of units.
    #[inline]
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Number of free units.
    #[inline]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Number of units currently held.
    #[inline]
    pub fn in_use(&self) -> usize {
        self.budget.saturating_sub(self.available())
    }

    /// Check if a reservation would have to wait.
    #[inline]
    pub fn is_saturated(&self) -> bool {
        self.available() == 0
    }

    /// Take one unit without waiting.
    ///
    /// Returns `false` if the gate is saturated or closed.
    pub fn try_reserve(&self) -> bool {
        match self.permits.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Take one unit, waiting while the gate is saturated.
    ///
    /// The unit stays taken until [`release`](Self::release) is called.
    pub async fn reserve(&self) -> Result<()> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SenderError::Interrupted)?;
        permit.forget();
        Ok(())
    }

    /// Return one unit.
    #[inline]
    pub fn release(&self) {
        self.permits.add_permits(1);
    }

    /// Return several units at once (for cumulative acks).
    #[inline]
    pub fn release_many(&self, count: usize) {
        if count > 0 {
            self.permits.add_permits(count);
        }
    }

    /// Close the gate, failing current and future reservations.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Check if the gate has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}
