//! # Synchronization Primitives.
//!
//! Host threads and the lanes of an offloaded task must agree on who may touch
//! shared data and when data written on one side becomes visible on the
//! other. The host side could rely on OS blocking primitives, but lanes
//! cannot: they have no scheduler to park on and may live in a memory domain
//! that only atomics reach. Every primitive in this module is therefore a
//! busy-waiting one, built on a couple of atomic integers.
//!
//! | Primitive          | Blocks Thread? | Fair?       | Typical Use Case                                  |
//! |--------------------|----------------|-------------|---------------------------------------------------|
//! | [`CompletionFlag`] | No (busy wait) | N/A         | Host waits for a result produced by a lane        |
//! | [`Completion`]     | No (busy wait) | N/A         | Same, with the result carried alongside the flag  |
//! | [`FairLock`]       | No (busy wait) | Yes (FIFO)  | Critical section shared by host threads and lanes |
//!
//! - **CompletionFlag** transitions exactly once, from "not signaled" to
//!   "signaled". The producer's release store pairs with the consumer's
//!   acquire load, giving a one-shot happens-before edge.
//! - **FairLock** hands out tickets with a fetch-and-add and admits holders in
//!   ticket order. A late lane can never overtake an early host thread, or the
//!   other way around.
//!
//! The orderings used on each side are named in [`ordering`].
//!
//! [`CompletionFlag`]: completion::CompletionFlag
//! [`Completion`]: completion::Completion
//! [`FairLock`]: ticket_lock::FairLock

pub mod completion;
pub mod ordering;
pub mod ticket_lock;

pub use completion::{Completion, CompletionFlag};
pub use ticket_lock::{FairLock, FairLockGuard};

/// The lock could not be acquired at this time because the operation would
/// otherwise block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("lock is held or contended; acquiring would block")]
pub struct WouldBlock;
