//! # Completion Flag.
//!
//! A completion flag lets a consumer discover that a producer, possibly a
//! lane of an offloaded task running on another device, has finished writing
//! some shared data.
//!
//! The flag starts as "not signaled" and transitions exactly once to
//! "signaled". The producer performs its writes, then calls
//! [`CompletionFlag::signal`]; the consumer calls [`CompletionFlag::wait`],
//! which spins until the transition is observed. Because the store is a
//! release and the load an acquire, every write the producer made before
//! signaling is visible to the consumer after `wait` returns.
//!
//! ```
//! use hetsync::CompletionFlag;
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! let flag = CompletionFlag::new();
//! let message = AtomicU32::new(0);
//!
//! std::thread::scope(|s| {
//!     s.spawn(|| {
//!         message.store(42, Ordering::Relaxed);
//!         flag.signal();
//!     });
//!     flag.wait();
//!     assert_eq!(message.load(Ordering::Relaxed), 42);
//! });
//! ```
//!
//! When the guarded data is a single value, [`Completion`] carries it next to
//! the flag so that no extra synchronization is needed for the payload.
//!
//! ## Preconditions
//!
//! - Exactly one producer calls [`CompletionFlag::signal`], at most once.
//!   This is not checked.
//! - A consumer must not wait on a flag that will never be signaled; it would
//!   spin forever.

use super::ordering::{ENTER, LEAVE, spin_until};
use core::{cell::UnsafeCell, mem::MaybeUninit, sync::atomic::AtomicU32};

const PENDING: u32 = 0;
const SIGNALED: u32 = 1;

/// A one-shot, busy-waited completion signal.
#[derive(Debug, Default)]
pub struct CompletionFlag {
    state: AtomicU32,
}

impl CompletionFlag {
    /// Creates a flag in the "not signaled" state.
    #[inline]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(PENDING),
        }
    }

    /// Marks the flag as signaled.
    ///
    /// All writes performed by the caller before this call become visible to
    /// any thread or lane that subsequently observes the flag as signaled.
    ///
    /// Must be called at most once, by the single producer.
    #[inline]
    pub fn signal(&self) {
        tracing::trace!(target: "hetsync::completion", "signal");
        self.state.store(SIGNALED, LEAVE);
    }

    /// Spins until the flag is observed as signaled.
    ///
    /// On return, every write the producer performed before calling
    /// [`signal`] is visible to the caller. There is no timeout.
    ///
    /// [`signal`]: Self::signal
    pub fn wait(&self) {
        spin_until(|| self.is_signaled());
        tracing::trace!(target: "hetsync::completion", "wait done");
    }

    /// Returns whether the flag has been signaled, without blocking.
    ///
    /// A `true` result carries the same visibility guarantee as [`wait`].
    ///
    /// [`wait`]: Self::wait
    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.state.load(ENTER) == SIGNALED
    }
}

/// Returned by [`Completion::complete`] when a value was already published.
///
/// The rejected value is handed back to the caller.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("completion already published a value")]
pub struct AlreadyCompleted<T>(pub T);

/// A value published once by a producer and read by any number of consumers.
///
/// This is the "message plus flag" pattern: the producer writes the payload
/// and signals in one call to [`complete`], and consumers get a shared
/// reference to the payload from [`wait`].
///
/// [`complete`]: Self::complete
/// [`wait`]: Self::wait
pub struct Completion<T> {
    // 0: empty, 1: a producer is writing, 2: published.
    claimed: AtomicU32,
    flag: CompletionFlag,
    value: UnsafeCell<MaybeUninit<T>>,
}

const EMPTY: u32 = 0;
const WRITING: u32 = 1;
const PUBLISHED: u32 = 2;

unsafe impl<T: Send> Send for Completion<T> {}
unsafe impl<T: Send + Sync> Sync for Completion<T> {}

impl<T> Completion<T> {
    /// Creates an empty completion.
    pub const fn new() -> Self {
        Self {
            claimed: AtomicU32::new(EMPTY),
            flag: CompletionFlag::new(),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Publishes `value` and signals every waiter.
    ///
    /// # Errors
    ///
    /// If a value was already published (or is being published by another
    /// producer), `value` is returned inside [`AlreadyCompleted`].
    pub fn complete(&self, value: T) -> Result<(), AlreadyCompleted<T>> {
        if self
            .claimed
            .compare_exchange(EMPTY, WRITING, ENTER, core::sync::atomic::Ordering::Relaxed)
            .is_err()
        {
            tracing::warn!(target: "hetsync::completion", "second producer rejected");
            return Err(AlreadyCompleted(value));
        }
        // Only the producer that won the claim reaches here.
        unsafe { (*self.value.get()).write(value) };
        self.claimed.store(PUBLISHED, core::sync::atomic::Ordering::Relaxed);
        self.flag.signal();
        Ok(())
    }

    /// Spins until a value is published and returns it.
    pub fn wait(&self) -> &T {
        self.flag.wait();
        // The acquire load in `wait` synchronizes with the release in
        // `complete`, after which the slot is never written again.
        unsafe { (*self.value.get()).assume_init_ref() }
    }

    /// Returns the published value, if any, without blocking.
    pub fn try_get(&self) -> Option<&T> {
        if self.flag.is_signaled() {
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Consumes the completion, returning the published value, if any.
    pub fn into_inner(mut self) -> Option<T> {
        if *self.claimed.get_mut() != PUBLISHED {
            return None;
        }
        *self.claimed.get_mut() = EMPTY;
        Some(unsafe { (*self.value.get()).assume_init_read() })
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if *self.claimed.get_mut() == PUBLISHED {
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Completion")
            .field("value", &self.try_get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    #[test]
    fn starts_pending() {
        let flag = CompletionFlag::new();
        assert!(!flag.is_signaled());
        flag.signal();
        assert!(flag.is_signaled());
        // Waiting on an already signaled flag returns at once.
        flag.wait();
    }

    #[test]
    fn message_written_before_signal_is_visible() {
        for trial in 0..500usize {
            let flag = Arc::new(CompletionFlag::new());
            let message = Arc::new(AtomicUsize::new(0));
            let producer = {
                let (flag, message) = (flag.clone(), message.clone());
                std::thread::spawn(move || {
                    message.store(trial + 1, Ordering::Relaxed);
                    flag.signal();
                })
            };
            flag.wait();
            assert_eq!(message.load(Ordering::Relaxed), trial + 1);
            producer.join().unwrap();
        }
    }

    #[test]
    fn completion_hands_value_to_every_waiter() {
        let done = Completion::new();
        std::thread::scope(|s| {
            let waiters = (0..8)
                .map(|_| s.spawn(|| *done.wait()))
                .collect::<Vec<_>>();
            done.complete(42u64).unwrap();
            for waiter in waiters {
                assert_eq!(waiter.join().unwrap(), 42);
            }
        });
    }

    #[test]
    fn second_complete_is_rejected() {
        let done = Completion::new();
        assert_eq!(done.try_get(), None);
        done.complete(String::from("first")).unwrap();
        assert_eq!(
            done.complete(String::from("second")),
            Err(AlreadyCompleted(String::from("second")))
        );
        assert_eq!(done.try_get().map(String::as_str), Some("first"));
        assert_eq!(done.into_inner().as_deref(), Some("first"));
    }

    #[test]
    fn racing_producers_publish_exactly_once() {
        const PRODUCERS: usize = 8;
        const CONSUMERS: usize = 4;
        for _ in 0..200 {
            let done = Completion::<usize>::new();
            let start = Barrier::new(PRODUCERS);
            let (winners, mut rejected, seen) = std::thread::scope(|s| {
                let consumers = (0..CONSUMERS)
                    .map(|_| s.spawn(|| *done.wait()))
                    .collect::<Vec<_>>();
                let producers = (0..PRODUCERS)
                    .map(|id| {
                        let (done, start) = (&done, &start);
                        s.spawn(move || {
                            start.wait();
                            done.complete(id).map(|()| id)
                        })
                    })
                    .collect::<Vec<_>>();
                let (mut winners, mut rejected) = (Vec::new(), Vec::new());
                for producer in producers {
                    match producer.join().unwrap() {
                        Ok(id) => winners.push(id),
                        Err(AlreadyCompleted(id)) => rejected.push(id),
                    }
                }
                let seen = consumers
                    .into_iter()
                    .map(|c| c.join().unwrap())
                    .collect::<Vec<_>>();
                (winners, rejected, seen)
            });

            assert_eq!(winners.len(), 1, "more or fewer than one producer won");
            let winner = winners[0];
            assert!(seen.iter().all(|&v| v == winner), "a consumer saw {seen:?}, not {winner}");
            assert_eq!(done.try_get(), Some(&winner));
            // Every losing value is handed back to its producer.
            rejected.push(winner);
            rejected.sort_unstable();
            assert_eq!(rejected, (0..PRODUCERS).collect::<Vec<_>>());
        }
    }

    #[test]
    fn dropping_published_value_runs_destructor() {
        let witness = Arc::new(());
        let done = Completion::new();
        done.complete(witness.clone()).unwrap();
        assert_eq!(Arc::strong_count(&witness), 2);
        drop(done);
        assert_eq!(Arc::strong_count(&witness), 1);
    }

    #[test]
    fn empty_completion_into_inner_is_none() {
        assert_eq!(Completion::<u8>::new().into_inner(), None);
    }
}
