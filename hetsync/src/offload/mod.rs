//! # Offloaded parallel tasks.
//!
//! An offloaded task is a kernel launched over a large number of logical
//! **lanes**. Lanes run in no particular order, may overlap in time with each
//! other and with host threads, and share memory with the host only through
//! atomics. This module hides *how* lanes are executed behind the [`Offload`]
//! trait, so that code using [`FairLock`] or [`CompletionFlag`] runs the same
//! whether lanes are simulated or mapped onto an accelerator backend.
//!
//! Backends provided here:
//!
//! | Backend               | Lanes run on                               |
//! |-----------------------|--------------------------------------------|
//! | [`RayonOffload`]      | a dedicated rayon thread pool               |
//! | [`ThreadOffload`]     | a fixed set of scoped OS threads            |
//! | [`SequentialOffload`] | the calling thread, one lane after another  |
//!
//! A kernel must not assume anything about the schedule: every lane may run
//! on a different thread, or all of them on the same one.
//!
//! ## Launching from the host
//!
//! [`launch`] starts a task from its own host thread and returns at once, the
//! way a host thread enqueues a kernel and keeps going. The returned
//! [`LaunchHandle`] waits for every lane on [`LaunchHandle::join`].
//!
//! ```
//! use hetsync::{CompletionFlag, Lane, offload::{self, SequentialOffload}};
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! let flag = CompletionFlag::new();
//! let message = AtomicU32::new(0);
//! let kernel = |_lane: Lane| {
//!     message.store(42, Ordering::Relaxed);
//!     flag.signal();
//! };
//!
//! std::thread::scope(|s| {
//!     let task = offload::launch(s, &SequentialOffload, 1, &kernel).unwrap();
//!     flag.wait();
//!     assert_eq!(message.load(Ordering::Relaxed), 42);
//!     task.join().unwrap();
//! });
//! ```
//!
//! [`FairLock`]: crate::FairLock
//! [`CompletionFlag`]: crate::CompletionFlag

mod pool;
mod threads;

pub use pool::RayonOffload;
pub use threads::{SequentialOffload, ThreadOffload};

use serde::{Deserialize, Serialize};
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Mutex,
    thread::{self, Scope, ScopedJoinHandle},
    time::Instant,
};

/// Identifies one logical lane of an offloaded task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lane(usize);

impl Lane {
    /// Creates the lane with the given index.
    #[inline]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The index of this lane, in `0..lanes`.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A strategy for running a kernel over many logical lanes.
pub trait Offload: Send + Sync {
    /// A short name of the backend, used in logs.
    fn name(&self) -> &'static str;

    /// Runs `kernel` exactly once for every lane in `0..lanes`, and returns
    /// once all of them have finished.
    ///
    /// Lanes may run in any order and overlap arbitrarily. A panic in any
    /// lane does not stop the others: every lane still runs, and the first
    /// panic is resumed on the caller once all of them have finished.
    fn for_each_lane(&self, lanes: usize, kernel: &(dyn Fn(Lane) + Sync));
}

impl<O: Offload + ?Sized> Offload for Box<O> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn for_each_lane(&self, lanes: usize, kernel: &(dyn Fn(Lane) + Sync)) {
        (**self).for_each_lane(lanes, kernel)
    }
}

/// Collects lane panics so that one failing lane does not cut the others
/// short.
#[derive(Default)]
pub(crate) struct LanePanics {
    first: Mutex<Option<Box<dyn Any + Send>>>,
}

impl LanePanics {
    /// Runs `kernel` on `lane`, keeping the payload if it is the first to
    /// panic.
    pub(crate) fn run(&self, kernel: &(dyn Fn(Lane) + Sync), lane: Lane) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| kernel(lane))) {
            tracing::debug!(lane = lane.index(), "lane panicked");
            let mut first = self.first.lock().unwrap_or_else(|e| e.into_inner());
            first.get_or_insert(payload);
        }
    }

    /// Resumes the first collected panic, if any.
    pub(crate) fn finish(self) {
        let first = self.first.into_inner().unwrap_or_else(|e| e.into_inner());
        if let Some(payload) = first {
            panic::resume_unwind(payload);
        }
    }
}

/// Errors raised while setting up or running an offloaded task.
#[derive(Debug, thiserror::Error)]
pub enum OffloadError {
    /// A backend was asked for zero workers.
    #[error("an offload backend needs at least one worker")]
    NoWorkers,
    /// The rayon pool could not be built.
    #[error("failed to build offload pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    /// The host thread launching the task could not be spawned.
    #[error("failed to spawn launch thread: {0}")]
    Spawn(#[from] std::io::Error),
    /// At least one lane panicked.
    #[error("offloaded task panicked: {0}")]
    Panicked(String),
    /// The backend name is unknown.
    #[error("unknown offload backend `{0}` (expected rayon, threads or sequential)")]
    UnknownBackend(String),
}

/// Selects one of the provided [`Offload`] backends.
///
/// Deserializes from the same names [`str::parse`] accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Backend {
    /// [`RayonOffload`].
    #[default]
    Rayon,
    /// [`ThreadOffload`].
    Threads,
    /// [`SequentialOffload`].
    Sequential,
}

impl Backend {
    /// Builds the backend.
    ///
    /// `workers` is the number of OS threads lanes are spread over; `None`
    /// picks one per available CPU. It is ignored by
    /// [`Backend::Sequential`].
    pub fn build(self, workers: Option<usize>) -> Result<Box<dyn Offload>, OffloadError> {
        let workers = workers.unwrap_or_else(default_workers);
        Ok(match self {
            Backend::Rayon => Box::new(RayonOffload::new(workers)?),
            Backend::Threads => Box::new(ThreadOffload::new(workers)?),
            Backend::Sequential => Box::new(SequentialOffload),
        })
    }

    /// The name of this backend, as accepted by [`str::parse`].
    pub const fn as_str(self) -> &'static str {
        match self {
            Backend::Rayon => "rayon",
            Backend::Threads => "threads",
            Backend::Sequential => "sequential",
        }
    }
}

impl core::fmt::Display for Backend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Backend {
    type Err = OffloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rayon" => Ok(Backend::Rayon),
            "threads" => Ok(Backend::Threads),
            "sequential" => Ok(Backend::Sequential),
            _ => Err(OffloadError::UnknownBackend(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Backend {
    type Error = OffloadError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

/// One worker per available CPU, at least one.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// A task started by [`launch`].
#[must_use = "an offloaded task must be joined"]
#[derive(Debug)]
pub struct LaunchHandle<'scope> {
    handle: ScopedJoinHandle<'scope, ()>,
}

impl LaunchHandle<'_> {
    /// Waits for every lane of the task to finish.
    ///
    /// # Errors
    ///
    /// Returns [`OffloadError::Panicked`] if any lane panicked.
    pub fn join(self) -> Result<(), OffloadError> {
        self.handle
            .join()
            .map_err(|payload| OffloadError::Panicked(panic_message(payload.as_ref())))
    }

    /// Returns whether every lane has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Launches `kernel` over `lanes` lanes of `offload`, from a dedicated host
/// thread spawned in `scope`.
///
/// Returns once the launch thread is spawned; the lanes proceed
/// concurrently with the caller.
///
/// # Errors
///
/// Returns [`OffloadError::Spawn`] if the launch thread cannot be created.
pub fn launch<'scope, 'env>(
    scope: &'scope Scope<'scope, 'env>,
    offload: &'env dyn Offload,
    lanes: usize,
    kernel: &'env (dyn Fn(Lane) + Sync),
) -> Result<LaunchHandle<'scope>, OffloadError> {
    let handle = thread::Builder::new()
        .name("offload-launch".into())
        .spawn_scoped(scope, move || {
            let _span = tracing::info_span!("offload", backend = offload.name(), lanes).entered();
            let start = Instant::now();
            offload.for_each_lane(lanes, kernel);
            tracing::debug!(elapsed = ?start.elapsed(), "all lanes finished");
        })?;
    Ok(LaunchHandle { handle })
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
