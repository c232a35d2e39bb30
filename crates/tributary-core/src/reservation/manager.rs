//! The reservation manager.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::{NoopObserver, Reservation, ReservationError, ReservationObserver};

/// Manages reservations of a fixed capacity (memory, disk, ...).
///
/// Must be shared through an `Arc`: every [`Reservation`] keeps a handle to
/// its manager so it can return its capacity on release.
///
/// # Invariant
///
/// `0 <= reserved() <= total_capacity()` holds between operations.
pub struct ReservationManager {
    total_capacity: u64,
    /// Held for the whole of a reservation attempt, including its wait.
    attempt: Mutex<()>,
    /// Reserved amount. The condvar is tied to this lock.
    reserved: Mutex<u64>,
    freed: Condvar,
    observer: Arc<dyn ReservationObserver>,
}

impl ReservationManager {
    /// Creates a manager with the given total capacity.
    #[must_use]
    pub fn new(total_capacity: u64) -> Self {
        Self::with_observer(total_capacity, Arc::new(NoopObserver))
    }

    /// Creates a manager that reports lifecycle events to `observer`.
    #[must_use]
    pub fn with_observer(total_capacity: u64, observer: Arc<dyn ReservationObserver>) -> Self {
        Self {
            total_capacity,
            attempt: Mutex::new(()),
            reserved: Mutex::new(0),
            freed: Condvar::new(),
            observer,
        }
    }

    /// Returns the total capacity fixed at construction.
    #[must_use]
    pub fn total_capacity(&self) -> u64 {
        self.total_capacity
    }

    /// Returns the currently reserved amount.
    #[must_use]
    pub fn reserved(&self) -> u64 {
        *self.reserved.lock()
    }

    /// Returns the capacity not currently reserved.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.total_capacity - self.reserved()
    }

    /// Reserves `amount`, blocking the calling thread until it fits.
    ///
    /// Attempts are serialized against each other, including attempts that
    /// are currently blocked: a waiting attempt keeps every later attempt
    /// queued behind it.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::ExceedsCapacity`] immediately, without
    /// waiting or changing the reserved amount, if `amount` is larger than
    /// the total capacity.
    pub fn reserve_for<T>(
        self: &Arc<Self>,
        amount: u64,
        payload: T,
    ) -> Result<Reservation<T>, ReservationError> {
        self.check_capacity(amount)?;

        let _attempt = self.attempt.lock();
        let mut reserved = self.reserved.lock();
        if !self.fits(*reserved, amount) {
            self.observer.reservation_blocked(amount, *reserved);
            while !self.fits(*reserved, amount) {
                self.freed.wait(&mut reserved);
            }
        }
        *reserved += amount;
        self.observer.reservation_granted(amount, *reserved);
        drop(reserved);

        Ok(Reservation::new(Arc::clone(self), amount, payload))
    }

    /// Reserves `floor(total_capacity * ratio)`.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::InvalidRatio`] for a negative or
    /// non-finite ratio, and [`ReservationError::ExceedsCapacity`] when the
    /// ratio is above 1.
    pub fn reserve_ratio<T>(
        self: &Arc<Self>,
        ratio: f64,
        payload: T,
    ) -> Result<Reservation<T>, ReservationError> {
        let amount = self.amount_for_ratio(ratio)?;
        self.reserve_for(amount, payload)
    }

    /// Async form of [`reserve_for`](Self::reserve_for).
    ///
    /// The blocking wait runs on tokio's blocking pool so async workers are
    /// never parked on the condition variable. If the calling task is
    /// dropped while waiting, the reservation is still granted on the
    /// blocking thread and returned immediately when its result is dropped.
    ///
    /// # Errors
    ///
    /// Same as [`reserve_for`](Self::reserve_for), plus
    /// [`ReservationError::Interrupted`] if the blocking task fails.
    pub async fn reserve_for_async<T: Send + 'static>(
        self: &Arc<Self>,
        amount: u64,
        payload: T,
    ) -> Result<Reservation<T>, ReservationError> {
        self.check_capacity(amount)?;
        let manager = Arc::clone(self);
        tokio::task::spawn_blocking(move || manager.reserve_for(amount, payload))
            .await
            .map_err(|e| ReservationError::Interrupted(e.to_string()))?
    }

    /// Async form of [`reserve_ratio`](Self::reserve_ratio).
    ///
    /// # Errors
    ///
    /// Same as [`reserve_ratio`](Self::reserve_ratio), plus
    /// [`ReservationError::Interrupted`] if the blocking task fails.
    pub async fn reserve_ratio_async<T: Send + 'static>(
        self: &Arc<Self>,
        ratio: f64,
        payload: T,
    ) -> Result<Reservation<T>, ReservationError> {
        let amount = self.amount_for_ratio(ratio)?;
        self.reserve_for_async(amount, payload).await
    }

    /// Returns `amount` to the budget and wakes one waiting attempt.
    ///
    /// Prefer [`Reservation::release`], which guarantees a reservation's
    /// capacity is returned only once.
    pub fn release(&self, amount: u64) {
        let mut reserved = self.reserved.lock();
        debug_assert!(
            amount <= *reserved,
            "released {amount} but only {} is reserved",
            *reserved
        );
        *reserved = reserved.saturating_sub(amount);
        self.observer.reservation_released(amount, *reserved);
        drop(reserved);
        // One wakeup suffices while attempts are serialized: at most one
        // attempt is ever waiting on the condvar.
        self.freed.notify_one();
    }

    fn check_capacity(&self, amount: u64) -> Result<(), ReservationError> {
        if amount > self.total_capacity {
            return Err(ReservationError::ExceedsCapacity {
                requested: amount,
                capacity: self.total_capacity,
            });
        }
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    fn amount_for_ratio(&self, ratio: f64) -> Result<u64, ReservationError> {
        if !ratio.is_finite() || ratio < 0.0 {
            return Err(ReservationError::InvalidRatio(ratio));
        }
        Ok((self.total_capacity as f64 * ratio).floor() as u64)
    }

    fn fits(&self, reserved: u64, amount: u64) -> bool {
        reserved.saturating_add(amount) <= self.total_capacity
    }
}

impl fmt::Debug for ReservationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReservationManager")
            .field("total_capacity", &self.total_capacity)
            .field("reserved", &self.reserved())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingObserver {
        granted: AtomicU64,
        blocked: AtomicU64,
        released: AtomicU64,
    }

    impl ReservationObserver for CountingObserver {
        fn reservation_granted(&self, _amount: u64, _reserved: u64) {
            self.granted.fetch_add(1, Ordering::Relaxed);
        }
        fn reservation_blocked(&self, _amount: u64, _reserved: u64) {
            self.blocked.fetch_add(1, Ordering::Relaxed);
        }
        fn reservation_released(&self, _amount: u64, _reserved: u64) {
            self.released.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_reserve_and_release() {
        let manager = Arc::new(ReservationManager::new(100));
        let reservation = manager.reserve_for(40, "a").unwrap();

        assert_eq!(reservation.amount(), 40);
        assert_eq!(*reservation.payload(), "a");
        assert_eq!(manager.reserved(), 40);
        assert_eq!(manager.remaining(), 60);

        reservation.release();
        assert_eq!(manager.reserved(), 0);
    }

    #[test]
    fn test_exceeds_capacity_fails_without_mutation() {
        let manager = Arc::new(ReservationManager::new(100));
        let _held = manager.reserve_for(30, ()).unwrap();

        let err = manager.reserve_for(101, ()).unwrap_err();
        assert_eq!(
            err,
            ReservationError::ExceedsCapacity {
                requested: 101,
                capacity: 100
            }
        );
        assert_eq!(manager.reserved(), 30);
    }

    #[test]
    fn test_exact_capacity_is_granted() {
        let manager = Arc::new(ReservationManager::new(100));
        let reservation = manager.reserve_for(100, ()).unwrap();
        assert_eq!(manager.remaining(), 0);
        drop(reservation);
        assert_eq!(manager.remaining(), 100);
    }

    #[test]
    fn test_blocked_request_granted_after_release() {
        let observer = Arc::new(CountingObserver::default());
        let manager = Arc::new(ReservationManager::with_observer(100, observer.clone()));

        let a = manager.reserve_for(60, "A").unwrap();
        assert_eq!(manager.reserved(), 60);

        let granted = Arc::new(AtomicBool::new(false));
        let waiter = {
            let manager = Arc::clone(&manager);
            let granted = Arc::clone(&granted);
            thread::spawn(move || {
                let b = manager.reserve_for(60, "B").unwrap();
                granted.store(true, Ordering::SeqCst);
                b
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!granted.load(Ordering::SeqCst));
        assert_eq!(manager.reserved(), 60);
        assert_eq!(observer.blocked.load(Ordering::Relaxed), 1);

        a.release();
        let b = waiter.join().unwrap();

        assert!(granted.load(Ordering::SeqCst));
        assert_eq!(*b.payload(), "B");
        assert_eq!(manager.reserved(), 60);
        assert_eq!(observer.granted.load(Ordering::Relaxed), 2);
        assert_eq!(observer.released.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_blocked_attempt_holds_up_smaller_requests() {
        let manager = Arc::new(ReservationManager::new(100));
        let a = manager.reserve_for(70, "A").unwrap();

        let big = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.reserve_for(80, "big").unwrap())
        };
        thread::sleep(Duration::from_millis(30));

        let small_done = Arc::new(AtomicBool::new(false));
        let small = {
            let manager = Arc::clone(&manager);
            let small_done = Arc::clone(&small_done);
            thread::spawn(move || {
                let r = manager.reserve_for(10, "small").unwrap();
                small_done.store(true, Ordering::SeqCst);
                r
            })
        };
        thread::sleep(Duration::from_millis(30));

        // 10 would fit next to 70, but the blocked 80 is ahead of it.
        assert!(!small_done.load(Ordering::SeqCst));

        a.release();
        let big = big.join().unwrap();
        let small = small.join().unwrap();
        assert_eq!(manager.reserved(), 90);

        drop(big);
        drop(small);
        assert_eq!(manager.reserved(), 0);
    }

    #[test]
    fn test_reserve_ratio_floors() {
        let manager = Arc::new(ReservationManager::new(100));
        let r = manager.reserve_ratio(0.337, ()).unwrap();
        assert_eq!(r.amount(), 33);

        let err = manager.reserve_ratio(1.5, ()).unwrap_err();
        assert!(matches!(err, ReservationError::ExceedsCapacity { requested: 150, .. }));
    }

    #[test]
    fn test_reserve_ratio_rejects_invalid() {
        let manager = Arc::new(ReservationManager::new(100));
        assert!(matches!(
            manager.reserve_ratio(-0.1, ()),
            Err(ReservationError::InvalidRatio(_))
        ));
        assert!(matches!(
            manager.reserve_ratio(f64::NAN, ()),
            Err(ReservationError::InvalidRatio(_))
        ));
        assert_eq!(manager.reserved(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reserve_for_async_waits_for_release() {
        let manager = Arc::new(ReservationManager::new(100));
        let a = manager.reserve_for_async(60, "A").await.unwrap();

        let waiter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.reserve_for_async(60, "B").await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        a.release();
        let b = waiter.await.unwrap().unwrap();
        assert_eq!(b.amount(), 60);
        assert_eq!(manager.reserved(), 60);
    }

    #[tokio::test]
    async fn test_reserve_for_async_exceeds_capacity() {
        let manager = Arc::new(ReservationManager::new(10));
        let err = manager.reserve_for_async(11, ()).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_debug_output() {
        let manager = ReservationManager::new(64);
        let debug = format!("{manager:?}");
        assert!(debug.contains("total_capacity: 64"));
        assert!(debug.contains("reserved: 0"));
    }
}
