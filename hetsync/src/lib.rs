//! # hetsync: Heterogeneous Synchronization Primitives
//!
//! **hetsync** provides two small synchronization primitives that coordinate
//! ordinary host threads with a *bulk-parallel offloaded task*: a kernel that
//! runs thousands of lightweight execution lanes at once, possibly on a
//! separate memory domain without implicit cache coherence.
//!
//! The two worlds are very different. A host has a handful of heavyweight OS
//! threads that can block, sleep and be woken by the scheduler. The lanes of
//! an offloaded task cannot call into the OS at all. The only contract that
//! both sides understand is the **atomic operation**, and every primitive in
//! this crate is built from atomics alone.
//!
//! ## Primitives
//!
//! - [`CompletionFlag`]: a one-shot signal. A single producer (a lane or a
//!   thread) publishes a result and calls [`CompletionFlag::signal`]; any
//!   number of consumers spin in [`CompletionFlag::wait`] until the result is
//!   visible.
//! - [`FairLock`]: a ticket lock. Callers are admitted strictly in the order
//!   they took a ticket, regardless of whether they are host threads or lanes.
//!   Admission is handed over through a [`FairLockGuard`], which releases the
//!   lock on every exit path of the critical section.
//!
//! Both primitives **busy-wait**. Lanes cannot park, so neither primitive
//! yields to the scheduler or offers a timeout. See [`sync`] for the full
//! comparison and [`sync::ordering`] for the memory-ordering contract.
//!
//! ## Offloaded tasks
//!
//! The [`offload`] module abstracts "run this kernel over N lanes" behind the
//! [`Offload`] trait, so that the same primitives are exercised whether lanes
//! are simulated by a rayon pool, by plain OS threads, or run inline.
//!
//! ```
//! use hetsync::{FairLock, Lane, offload::{Offload, RayonOffload}};
//!
//! let counter = FairLock::new(0usize);
//! let gpu = RayonOffload::new(4).unwrap();
//!
//! gpu.for_each_lane(4096, &|_lane: Lane| {
//!     *counter.acquire() += 1;
//! });
//! assert_eq!(counter.into_inner(), 4096);
//! ```
//!
//! ## Protocol violations
//!
//! These are primitives, not a framework. Calling
//! [`CompletionFlag::signal`] twice, or acquiring a [`FairLock`] recursively
//! on the same thread, is a programmer error that is not detected. A producer
//! that never signals, or a holder that never releases, makes its waiters
//! spin forever.

#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod offload;
pub mod sync;

pub use offload::{Backend, Lane, Offload};
pub use sync::{
    Completion, CompletionFlag, FairLock, FairLockGuard, WouldBlock, completion::AlreadyCompleted,
};
