//! Concurrency gate for in-flight requests.
//!
//! [`ConcurrencyGate`] caps the number of requests in flight using a tokio semaphore. Each
//! acquired [`GatePermit`] notifies waiters on drop, allowing [`ConcurrencyGate::wait_idle`] to
//! resolve once all permits have been returned.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// Limits concurrent requests and tracks the in-flight count.
///
/// Permits are acquired with [`acquire`](Self::acquire) and automatically returned when the
/// [`GatePermit`] is dropped, which makes it impossible to leak a slot on an early return.
#[derive(Clone, Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    max: usize,
    released: Arc<Notify>,
}

impl ConcurrencyGate {
    /// Creates a new gate with the given number of slots.
    pub fn new(max: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
            released: Arc::new(Notify::new()),
        }
    }

    /// Waits for a free slot.
    ///
    /// Only the calling task is suspended; other holders are unaffected.
    pub async fn acquire(&self) -> GatePermit {
        // The semaphore is private and never closed, so acquiring cannot fail.
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("gate semaphore is never closed");

        GatePermit {
            permit: Some(permit),
            released: Arc::clone(&self.released),
        }
    }

    /// Returns the number of permits currently held.
    pub fn in_use(&self) -> usize {
        self.max - self.semaphore.available_permits()
    }

    /// Waits until all permits have been returned.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.released.notified();
            if self.in_use() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// RAII guard for a gate slot.
///
/// Dropping this permit releases it back to the [`ConcurrencyGate`] and notifies any task
/// waiting in [`ConcurrencyGate::wait_idle`].
pub struct GatePermit {
    permit: Option<OwnedSemaphorePermit>,
    released: Arc<Notify>,
}

impl fmt::Debug for GatePermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatePermit").finish_non_exhaustive()
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.released.notify_waiters();
    }
}
