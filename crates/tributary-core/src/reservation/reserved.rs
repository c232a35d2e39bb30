//! The reservation token.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::ReservationManager;

/// A granted share of a [`ReservationManager`]'s capacity.
///
/// The token owns its capacity until [`release`](Self::release) is called
/// or the token is dropped, whichever comes first. Releasing is idempotent,
/// so a reservation can be released explicitly and still be dropped safely
/// on every exit path (success, error, or task cancellation).
///
/// The payload records what the capacity is reserved for. Use
/// [`replace`](Self::replace) to hand the same capacity to a new payload.
pub struct Reservation<T> {
    manager: Arc<ReservationManager>,
    amount: u64,
    payload: T,
    released: AtomicBool,
}

impl<T> Reservation<T> {
    pub(super) fn new(manager: Arc<ReservationManager>, amount: u64, payload: T) -> Self {
        Self {
            manager,
            amount,
            payload,
            released: AtomicBool::new(false),
        }
    }

    /// Returns the reserved amount.
    #[must_use]
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Returns the payload mutably.
    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    /// Returns the manager this reservation was granted by.
    #[must_use]
    pub fn manager(&self) -> &Arc<ReservationManager> {
        &self.manager
    }

    /// Returns `true` once the capacity has been returned.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Returns the reserved capacity to the manager.
    ///
    /// Only the first call has an effect.
    pub fn release(&self) {
        if self
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.manager.release(self.amount);
        }
    }

    /// Moves this reservation's capacity to a new payload.
    ///
    /// Consumes `self`; the old payload is dropped and the returned token
    /// becomes the sole owner of the capacity. A token that was already
    /// released yields a token that is also released.
    #[must_use]
    pub fn replace<U>(self, payload: U) -> Reservation<U> {
        let was_released = self.released.swap(true, Ordering::AcqRel);
        Reservation {
            manager: Arc::clone(&self.manager),
            amount: self.amount,
            payload,
            released: AtomicBool::new(was_released),
        }
    }
}

impl<T> Drop for Reservation<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: fmt::Debug> fmt::Debug for Reservation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("amount", &self.amount)
            .field("payload", &self.payload)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservation::ReservationObserver;
    use std::sync::atomic::AtomicU64;

    #[derive(Default)]
    struct ReleaseCounter(AtomicU64);

    impl ReservationObserver for ReleaseCounter {
        fn reservation_released(&self, amount: u64, _reserved: u64) {
            self.0.fetch_add(amount, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_release_is_idempotent() {
        let counter = Arc::new(ReleaseCounter::default());
        let manager = Arc::new(ReservationManager::with_observer(100, counter.clone()));
        let _other = manager.reserve_for(20, ()).unwrap();
        let reservation = manager.reserve_for(50, ()).unwrap();

        reservation.release();
        reservation.release();
        assert!(reservation.is_released());
        assert_eq!(manager.reserved(), 20);

        drop(reservation);
        assert_eq!(manager.reserved(), 20);
        assert_eq!(counter.0.load(Ordering::Relaxed), 50);
    }

    #[test]
    fn test_drop_releases() {
        let manager = Arc::new(ReservationManager::new(100));
        {
            let _reservation = manager.reserve_for(70, ()).unwrap();
            assert_eq!(manager.reserved(), 70);
        }
        assert_eq!(manager.reserved(), 0);
    }

    #[test]
    fn test_replace_transfers_capacity() {
        let manager = Arc::new(ReservationManager::new(100));
        let original = manager.reserve_for(40, "partition-0").unwrap();

        let mut buffer = original.replace(Vec::<u32>::new());
        assert_eq!(buffer.amount(), 40);
        assert_eq!(manager.reserved(), 40);

        buffer.payload_mut().extend([1, 2, 3]);
        assert_eq!(buffer.payload(), &vec![1, 2, 3]);

        drop(buffer);
        assert_eq!(manager.reserved(), 0);
    }

    #[test]
    fn test_replace_of_released_token_stays_released() {
        let manager = Arc::new(ReservationManager::new(100));
        let original = manager.reserve_for(40, ()).unwrap();
        original.release();

        let replaced = original.replace("late");
        assert!(replaced.is_released());
        replaced.release();
        assert_eq!(manager.reserved(), 0);
    }

    #[test]
    fn test_release_from_another_thread() {
        let manager = Arc::new(ReservationManager::new(100));
        let reservation = manager.reserve_for(25, 7u8).unwrap();

        std::thread::spawn(move || drop(reservation)).join().unwrap();
        assert_eq!(manager.reserved(), 0);
    }

    #[test]
    fn test_debug_shows_payload() {
        let manager = Arc::new(ReservationManager::new(10));
        let reservation = manager.reserve_for(5, "p1").unwrap();
        let debug = format!("{reservation:?}");
        assert!(debug.contains("\"p1\""));
        assert!(debug.contains("released: false"));
    }
}
