//! # Fair (ticket) lock.
//!
//! A ticket lock serializes a critical section among any number of callers,
//! host threads and offloaded lanes alike, and admits them in strict
//! first-come-first-served order.
//!
//! The lock keeps two counters. Each caller of [`FairLock::acquire`] takes a
//! ticket by atomically incrementing `next_ticket`, then spins until
//! `now_serving` equals its ticket. Dropping the returned [`FairLockGuard`]
//! increments `now_serving`, admitting the holder of the next ticket.
//!
//! | Step         | Operation on          | Ordering                 |
//! |--------------|-----------------------|--------------------------|
//! | take ticket  | `next_ticket` (+1)    | [`TICKET`] (relaxed)     |
//! | wait         | `now_serving` (load)  | [`ENTER`] (acquire)      |
//! | release      | `now_serving` (+1)    | [`LEAVE`] (release)      |
//!
//! Since tickets come from a single fetch-and-add, they are allocated
//! without gaps or duplicates even when thousands of lanes and dozens of
//! threads race for them, and a later ticket can never be admitted before an
//! earlier one.
//!
//! ## Wrap-around
//!
//! Both counters are `u32` and wrap on overflow. Admission only compares the
//! two counters for equality, so ticket `N + 2^32` behaves exactly like
//! ticket `N`. The lock stays correct for any number of acquisitions, as long
//! as fewer than `2^32` callers are queued at the same time.
//!
//! ## Scoped release
//!
//! A [`FairLockGuard`] releases on drop, including on an early return or
//! while unwinding from a panic. A holder cannot leak the lock by forgetting
//! to release it. For a structured form, see [`FairLock::with`].
//!
//! [`TICKET`]: super::ordering::TICKET
//! [`ENTER`]: super::ordering::ENTER
//! [`LEAVE`]: super::ordering::LEAVE

use super::{
    WouldBlock,
    ordering::{ENTER, LEAVE, TICKET, spin_until},
};
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU32, Ordering},
};
use crossbeam_utils::CachePadded;

/// A mutual exclusion primitive with first-come-first-served admission.
///
/// The lock protects a value of type `T`, which is only reachable through the
/// guard returned by [`acquire`] or [`try_acquire`]. `FairLock<()>` is a bare
/// lock guarding an external critical section.
///
/// # Examples
///
/// ```
/// use hetsync::FairLock;
/// use std::sync::Arc;
///
/// const N: usize = 64;
///
/// // Increment a plain integer from many threads. The increment is not
/// // atomic, it is safe because only the ticket holder can reach it.
/// let lock = Arc::new(FairLock::new(0usize));
/// let threads = (0..N)
///     .map(|_| {
///         let lock = Arc::clone(&lock);
///         std::thread::spawn(move || {
///             let mut message = lock.acquire();
///             *message += 1;
///         })
///     })
///     .collect::<Vec<_>>();
/// for t in threads {
///     t.join().unwrap();
/// }
/// assert_eq!(*lock.acquire(), N);
/// ```
///
/// [`acquire`]: Self::acquire
/// [`try_acquire`]: Self::try_acquire
pub struct FairLock<T: ?Sized = ()> {
    next_ticket: CachePadded<AtomicU32>,
    now_serving: CachePadded<AtomicU32>,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for FairLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for FairLock<T> {}

impl<T> FairLock<T> {
    /// Creates a new lock in an unlocked state ready for use.
    #[inline]
    pub const fn new(data: T) -> FairLock<T> {
        Self::starting_at(0, data)
    }

    /// Creates an unlocked lock whose first ticket is `ticket`.
    ///
    /// Only useful to exercise counter wrap-around.
    #[doc(hidden)]
    #[inline]
    pub const fn starting_at(ticket: u32, data: T) -> FairLock<T> {
        FairLock {
            next_ticket: CachePadded::new(AtomicU32::new(ticket)),
            now_serving: CachePadded::new(AtomicU32::new(ticket)),
            data: UnsafeCell::new(data),
        }
    }

    /// Consumes this lock, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> FairLock<T> {
    /// Acquires the lock, spinning until this caller's ticket is served.
    ///
    /// Callers are admitted strictly in the order in which they took their
    /// tickets. Upon returning, the caller is the only holder of the lock, and
    /// every write made by previous holders inside their critical sections is
    /// visible. The lock is released when the returned guard is dropped.
    ///
    /// There is no timeout. Acquiring the lock again on a thread that already
    /// holds it deadlocks.
    #[inline]
    pub fn acquire(&self) -> FairLockGuard<'_, T> {
        let ticket = self.next_ticket.fetch_add(1, TICKET);
        spin_until(|| self.now_serving.load(ENTER) == ticket);
        FairLockGuard { lock: self, ticket }
    }

    /// Attempts to acquire the lock without waiting.
    ///
    /// The lock is only taken if nobody holds it and nobody is queued for it,
    /// in which case the caller is served next by definition. When it fails,
    /// no ticket is consumed, so callers already queued keep their order.
    ///
    /// # Errors
    ///
    /// Returns [`WouldBlock`] if the lock is held or contended.
    pub fn try_acquire(&self) -> Result<FairLockGuard<'_, T>, WouldBlock> {
        let serving = self.now_serving.load(ENTER);
        match self.next_ticket.compare_exchange(
            serving,
            serving.wrapping_add(1),
            TICKET,
            Ordering::Relaxed,
        ) {
            Ok(ticket) => Ok(FairLockGuard { lock: self, ticket }),
            Err(_) => Err(WouldBlock),
        }
    }

    /// Runs `f` with exclusive access to the data, releasing the lock
    /// afterwards on every exit path.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.acquire();
        f(&mut guard)
    }

    /// Returns whether the lock is currently held.
    ///
    /// The answer may be stale by the time it is read; use it for
    /// diagnostics only.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.queued() != 0
    }

    /// Returns the number of callers that hold or wait for the lock.
    ///
    /// Like [`is_locked`](Self::is_locked), this is a racy snapshot.
    #[inline]
    pub fn queued(&self) -> u32 {
        let serving = self.now_serving.load(Ordering::Relaxed);
        self.next_ticket
            .load(Ordering::Relaxed)
            .wrapping_sub(serving)
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// No locking is needed since the mutable borrow statically guarantees
    /// that no guard exists.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for FairLock<T> {
    /// Creates a `FairLock<T>`, with the `Default` value for T.
    fn default() -> FairLock<T> {
        FairLock::new(Default::default())
    }
}

impl<T: ?Sized> core::fmt::Debug for FairLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FairLock")
            .field("next_ticket", &self.next_ticket.load(Ordering::Relaxed))
            .field("now_serving", &self.now_serving.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// An implementation of a "scoped lock" of a [`FairLock`]. When this
/// structure is dropped (falls out of scope), the lock is released and the
/// next ticket is admitted.
///
/// The data protected by the lock can be accessed through this guard.
///
/// This structure is created by the [`acquire`] and [`try_acquire`] methods
/// on [`FairLock`].
///
/// [`acquire`]: FairLock::acquire
/// [`try_acquire`]: FairLock::try_acquire
#[must_use = "if unused the FairLock will immediately unlock"]
pub struct FairLockGuard<'a, T: ?Sized + 'a> {
    lock: &'a FairLock<T>,
    ticket: u32,
}

unsafe impl<T: ?Sized + Sync> Sync for FairLockGuard<'_, T> {}

impl<T: ?Sized> FairLockGuard<'_, T> {
    /// The ticket this guard was admitted with.
    #[inline]
    pub fn ticket(&self) -> u32 {
        self.ticket
    }
}

impl<T: ?Sized> Deref for FairLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for FairLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for FairLockGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // Exactly one release per admitted ticket.
        self.lock.now_serving.fetch_add(1, LEAVE);
    }
}

impl<T: ?Sized + core::fmt::Debug> core::fmt::Debug for FairLockGuard<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FairLockGuard")
            .field("ticket", &self.ticket)
            .field("data", &&**self)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::{Arc, Barrier};

    #[test]
    fn smoke() {
        let lock = FairLock::new(0);
        {
            let mut guard = lock.acquire();
            assert_eq!(guard.ticket(), 0);
            *guard = 42;
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());
        assert_eq!(lock.acquire().ticket(), 1);
        assert_eq!(lock.into_inner(), 42);
    }

    #[test]
    fn concurrent_increments() {
        const THREADS: usize = 16;
        const ROUNDS: usize = 1000;
        let barrier = Arc::new(Barrier::new(THREADS));
        let lock = Arc::new(FairLock::new(0usize));
        let inside = Arc::new(AtomicBool::new(false));

        let handles = (0..THREADS)
            .map(|_| {
                let (barrier, lock, inside) = (barrier.clone(), lock.clone(), inside.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..ROUNDS {
                        let mut guard = lock.acquire();
                        assert!(!inside.swap(true, Ordering::Relaxed));
                        *guard += 1;
                        inside.store(false, Ordering::Relaxed);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.acquire(), THREADS * ROUNDS);
    }

    #[test]
    fn try_acquire_respects_holder() {
        let lock = FairLock::new(());
        let guard = lock.try_acquire().unwrap();
        assert_eq!(lock.try_acquire().unwrap_err(), WouldBlock);
        // The failed attempt did not take a ticket.
        assert_eq!(lock.queued(), 1);
        drop(guard);
        assert_eq!(lock.try_acquire().map(|g| g.ticket()), Ok(1));
    }

    #[test]
    fn early_return_releases() {
        fn bump_if_even(lock: &FairLock<usize>) -> bool {
            let mut guard = lock.acquire();
            if *guard % 2 == 1 {
                return false;
            }
            *guard += 1;
            true
        }

        let lock = FairLock::new(0);
        assert!(bump_if_even(&lock));
        assert!(!bump_if_even(&lock));
        assert!(lock.try_acquire().is_ok());
    }

    #[test]
    fn panic_releases() {
        let lock = FairLock::new(0);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = lock.acquire();
            panic!("holder died");
        }));
        assert!(result.is_err());
        assert!(!lock.is_locked());
        lock.with(|v| *v += 1);
        assert_eq!(lock.into_inner(), 1);
    }

    #[test]
    fn wraps_around() {
        let lock = FairLock::starting_at(u32::MAX - 1, 0usize);
        let tickets = (0..4)
            .map(|_| {
                let mut guard = lock.acquire();
                *guard += 1;
                guard.ticket()
            })
            .collect::<Vec<_>>();
        assert_eq!(tickets, [u32::MAX - 1, u32::MAX, 0, 1]);
        assert!(!lock.is_locked());
        assert_eq!(lock.into_inner(), 4);
    }

    #[test]
    fn wraps_around_under_contention() {
        const THREADS: usize = 8;
        let lock = Arc::new(FairLock::starting_at(u32::MAX - 3, 0usize));
        let order = Arc::new(AtomicUsize::new(0));
        let handles = (0..THREADS)
            .map(|_| {
                let (lock, order) = (lock.clone(), order.clone());
                std::thread::spawn(move || {
                    let guard = lock.acquire();
                    let admitted = order.fetch_add(1, Ordering::Relaxed) as u32;
                    assert_eq!(guard.ticket(), (u32::MAX - 3).wrapping_add(admitted));
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(lock.queued(), 0);
    }
}
