//! Bounded admission control shared by every lifecycle operation.
//!
//! One gate per provider session caps how many operations may touch the
//! backend at once. Tickets are idempotent on purpose: call sites release
//! early to overlap slow post-processing (connection discovery) with other
//! operations, while a drop-based release still runs at scope exit — both
//! must not double-count.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Admission gate with a fixed ceiling.
///
/// `max_parallel` must be validated at configuration time
/// ([`crate::settings::Settings::validate`] rejects 0); a zero ceiling
/// would block every caller forever.
#[derive(Debug)]
pub struct Gate {
    max_parallel: usize,
    permits: Arc<Semaphore>,
}

impl Gate {
    pub fn new(max_parallel: usize) -> Self {
        debug_assert!(max_parallel >= 1, "ceiling is validated at config time");
        Self {
            max_parallel,
            permits: Arc::new(Semaphore::new(max_parallel)),
        }
    }

    /// Block until a slot is free, then return a held ticket.
    ///
    /// There is deliberately no admission timeout: the source behavior is
    /// to wait indefinitely, and poll loops further down all carry their
    /// own deadlines. Wake order among waiters is unspecified.
    pub async fn admit(&self) -> Ticket {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .expect("gate semaphore is never closed");
        Ticket {
            permits: Arc::clone(&self.permits),
            permit: Some(permit),
        }
    }

    /// Operations currently admitted. Only consistent when observed
    /// outside anyone's acquire/release critical section, which is all the
    /// invariant promises.
    pub fn current(&self) -> usize {
        self.max_parallel - self.permits.available_permits()
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }
}

/// Per-call guard for one admitted slot.
///
/// Acquire and release are idempotent per ticket; the held flag lives in
/// the `Option` around the permit, not in the semaphore. Dropping a held
/// ticket releases its slot.
#[derive(Debug)]
pub struct Ticket {
    permits: Arc<Semaphore>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Ticket {
    /// Re-acquire after an early release. No-op while held.
    pub async fn acquire(&mut self) {
        if self.permit.is_none() {
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .expect("gate semaphore is never closed");
            self.permit = Some(permit);
        }
    }

    /// Release the held slot and wake a waiter. No-op when not held.
    pub fn release(&mut self) {
        self.permit.take();
    }

    pub fn is_held(&self) -> bool {
        self.permit.is_some()
    }
}
