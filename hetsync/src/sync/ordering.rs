//! Memory-ordering contract between host threads and offloaded lanes.
//!
//! No cache coherence or sequential consistency is assumed between the host
//! and the lanes of an offloaded task. Every cross-domain hand-off goes
//! through one atomic operation whose ordering depends on the side it is on:
//!
//! - the side **leaving** a critical section, or publishing a result, uses a
//!   [`LEAVE`] (release) write, so that everything it wrote before is
//!   published with it;
//! - the side **entering** a critical section, or consuming a result, uses an
//!   [`ENTER`] (acquire) read, so that once it observes the write it also
//!   observes everything published with it;
//! - ticket allocation carries no data and uses [`TICKET`] (relaxed). The
//!   fetch-and-add is still a single atomic read-modify-write, so no ticket is
//!   ever lost or handed out twice.

use core::sync::atomic::Ordering;
use crossbeam_utils::Backoff;

/// Ordering for taking a ticket.
pub const TICKET: Ordering = Ordering::Relaxed;

/// Ordering for the read that lets a waiter proceed.
pub const ENTER: Ordering = Ordering::Acquire;

/// Ordering for the write that lets a waiter proceed.
pub const LEAVE: Ordering = Ordering::Release;

/// Busy-waits until `cond` returns `true`.
///
/// Between polls the CPU is given a spin hint. The wait never yields to the
/// OS scheduler, since lanes of an offloaded task have no scheduler to yield
/// to. There is no timeout.
#[inline]
pub fn spin_until(mut cond: impl FnMut() -> bool) {
    let backoff = Backoff::new();
    while !cond() {
        backoff.spin();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn returns_immediately_when_ready() {
        let polls = Cell::new(0);
        spin_until(|| {
            polls.set(polls.get() + 1);
            true
        });
        assert_eq!(polls.get(), 1);
    }

    #[test]
    fn polls_until_condition_holds() {
        let polls = Cell::new(0);
        spin_until(|| {
            polls.set(polls.get() + 1);
            polls.get() == 100
        });
        assert_eq!(polls.get(), 100);
    }
}
