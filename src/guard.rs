//! Single-flight flag for the code exchange.
//!
//! Acquisition is a synchronous compare-and-swap so it can run inside a
//! navigation callback before any task is spawned. Each acquisition gets its
//! own ticket; [`ExchangePermit`] releases the guard on drop only if its
//! ticket is still the current holder, so a permit outliving a
//! [`ExchangeGuard::reset`] cannot free a newer exchange.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const IDLE: u64 = 0;

#[derive(Debug, Default)]
struct GuardState {
    holder: AtomicU64,
    next_ticket: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct ExchangeGuard {
    state: Arc<GuardState>,
}

impl ExchangeGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` while another exchange holds the guard.
    pub fn try_acquire(&self) -> Option<ExchangePermit> {
        let ticket = self.state.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
        self.state
            .holder
            .compare_exchange(IDLE, ticket, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ExchangePermit {
                state: self.state.clone(),
                ticket,
            })
    }

    pub fn is_busy(&self) -> bool {
        self.state.holder.load(Ordering::Acquire) != IDLE
    }

    /// Forces the guard back to idle regardless of who holds it.
    pub fn reset(&self) {
        self.state.holder.store(IDLE, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct ExchangePermit {
    state: Arc<GuardState>,
    ticket: u64,
}

impl ExchangePermit {
    /// False once the guard was reset (logout or expiry) after this permit was issued.
    pub fn is_current(&self) -> bool {
        self.state.holder.load(Ordering::Acquire) == self.ticket
    }
}

impl Drop for ExchangePermit {
    fn drop(&mut self) {
        let _ = self.state.holder.compare_exchange(
            self.ticket,
            IDLE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::ExchangeGuard;

    #[test]
    fn second_acquire_is_refused_until_release() {
        let guard = ExchangeGuard::new();
        let permit = guard.try_acquire().unwrap();
        assert!(guard.is_busy());
        assert!(guard.try_acquire().is_none());

        drop(permit);
        assert!(!guard.is_busy());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn stale_permit_does_not_release_newer_holder() {
        let guard = ExchangeGuard::new();
        let stale = guard.try_acquire().unwrap();
        guard.reset();
        assert!(!stale.is_current());

        let fresh = guard.try_acquire().unwrap();
        drop(stale);
        assert!(guard.is_busy());
        assert!(fresh.is_current());
    }

    #[test]
    fn permit_released_when_holder_panics() {
        let guard = ExchangeGuard::new();
        let cloned = guard.clone();
        let result = std::panic::catch_unwind(move || {
            let _permit = cloned.try_acquire().unwrap();
            panic!("exchange blew up");
        });
        assert!(result.is_err());
        assert!(!guard.is_busy());
    }
}
