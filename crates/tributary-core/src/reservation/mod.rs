//! # Resource Reservations
//!
//! Arbitrates a fixed capacity budget (bytes of memory, typically) among
//! concurrent requesters.
//!
//! - [`ReservationManager`]: owns the budget and hands out reservations
//! - [`Reservation`]: an owned token for a granted share of the budget,
//!   returned to the manager exactly once
//! - [`ReservationObserver`]: lifecycle hook for granted, blocked, and
//!   released reservations
//!
//! ## Waiting Discipline
//!
//! Reservation attempts are serialized: only one attempt runs its
//! wait-and-check loop at a time, and it keeps that position while blocked.
//! Releases are not serialized. Each release wakes at most one waiter, which
//! is sufficient because at most one attempt is ever waiting.
//!
//! A large blocked request therefore holds up smaller requests queued behind
//! it, even when those would fit.
//!
//! ```rust,ignore
//! let manager = Arc::new(ReservationManager::new(100));
//! let a = manager.reserve_for(60, "A")?;
//! // Another thread calling reserve_for(60, "B") blocks here...
//! a.release();
//! // ...and is granted once A's 60 bytes are returned.
//! ```

mod manager;
mod reserved;

pub use manager::ReservationManager;
pub use reserved::Reservation;

use thiserror::Error;

/// Errors returned by [`ReservationManager`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReservationError {
    /// The request can never be satisfied because it exceeds the total
    /// capacity. Not retryable.
    #[error("requested {requested} exceeds total capacity {capacity}")]
    ExceedsCapacity {
        /// The requested amount.
        requested: u64,
        /// The manager's total capacity.
        capacity: u64,
    },

    /// The ratio passed to `reserve_ratio` is negative or not finite.
    #[error("invalid reservation ratio: {0}")]
    InvalidRatio(f64),

    /// The task performing the blocking wait was cancelled or panicked.
    #[error("reservation interrupted: {0}")]
    Interrupted(String),
}

impl ReservationError {
    /// Returns `true` if waiting and retrying can never succeed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ExceedsCapacity { .. } | Self::InvalidRatio(_))
    }
}

/// Hook invoked by the [`ReservationManager`] at reservation lifecycle points.
///
/// Callbacks run while the manager holds its internal lock, so they must be
/// cheap and must not call back into the manager.
pub trait ReservationObserver: Send + Sync {
    /// A reservation was granted. `reserved` is the total after the grant.
    fn reservation_granted(&self, _amount: u64, _reserved: u64) {}

    /// A reservation attempt found insufficient capacity and is about to wait.
    fn reservation_blocked(&self, _amount: u64, _reserved: u64) {}

    /// Capacity was returned. `reserved` is the total after the release.
    fn reservation_released(&self, _amount: u64, _reserved: u64) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ReservationObserver for NoopObserver {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[derive(Default)]
    struct InvariantObserver {
        capacity: u64,
        max_seen: AtomicU64,
        violations: AtomicU64,
    }

    impl ReservationObserver for InvariantObserver {
        fn reservation_granted(&self, _amount: u64, reserved: u64) {
            self.max_seen.fetch_max(reserved, Ordering::Relaxed);
            if reserved > self.capacity {
                self.violations.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[test]
    fn test_error_fatality() {
        assert!(ReservationError::ExceedsCapacity {
            requested: 2,
            capacity: 1
        }
        .is_fatal());
        assert!(ReservationError::InvalidRatio(-1.0).is_fatal());
        assert!(!ReservationError::Interrupted("cancelled".into()).is_fatal());
    }

    #[test]
    fn test_reserved_never_exceeds_capacity_under_contention() {
        let observer = Arc::new(InvariantObserver {
            capacity: 100,
            ..Default::default()
        });
        let manager = Arc::new(ReservationManager::with_observer(100, observer.clone()));

        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    for round in 0..50u64 {
                        let amount = 10 + (i * 7 + round * 13) % 60;
                        let reservation = manager.reserve_for(amount, (i, round)).unwrap();
                        assert!(manager.reserved() <= manager.total_capacity());
                        reservation.release();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(observer.violations.load(Ordering::Relaxed), 0);
        assert!(observer.max_seen.load(Ordering::Relaxed) <= 100);
        assert_eq!(manager.reserved(), 0);
    }
}
