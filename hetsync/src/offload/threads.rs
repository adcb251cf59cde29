//! Lanes simulated on plain OS threads, or run inline.

use super::{Lane, LanePanics, Offload, OffloadError};
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

/// Runs lanes on a fixed number of scoped OS threads.
///
/// Every call spawns `workers` threads that pull lane indices from a shared
/// cursor until the range is exhausted, so consecutive lanes usually run on
/// different threads and overlap in time.
#[derive(Debug, Clone, Copy)]
pub struct ThreadOffload {
    workers: usize,
    stack_size: Option<usize>,
}

impl ThreadOffload {
    /// Creates a backend that spreads lanes over `workers` threads.
    ///
    /// # Errors
    ///
    /// Fails with [`OffloadError::NoWorkers`] if `workers` is zero.
    pub fn new(workers: usize) -> Result<Self, OffloadError> {
        if workers == 0 {
            return Err(OffloadError::NoWorkers);
        }
        Ok(Self {
            workers,
            stack_size: None,
        })
    }

    /// Sets the stack size of the worker threads, in bytes.
    ///
    /// Lanes run on the calling thread instead if no worker can be spawned.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Number of threads spawned per task.
    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl Offload for ThreadOffload {
    fn name(&self) -> &'static str {
        "threads"
    }

    fn for_each_lane(&self, lanes: usize, kernel: &(dyn Fn(Lane) + Sync)) {
        let cursor = AtomicUsize::new(0);
        let panics = LanePanics::default();
        let drain = || {
            loop {
                let index = cursor.fetch_add(1, Ordering::Relaxed);
                if index >= lanes {
                    break;
                }
                panics.run(kernel, Lane::new(index));
            }
        };
        // Never spawn more threads than there are lanes.
        let workers = self.workers.min(lanes);
        thread::scope(|s| {
            let mut started = 0;
            for worker in 0..workers {
                let mut builder = thread::Builder::new().name(format!("offload-thread-{worker}"));
                if let Some(bytes) = self.stack_size {
                    builder = builder.stack_size(bytes);
                }
                match builder.spawn_scoped(s, drain)
                {
                    Ok(_) => started += 1,
                    Err(e) => {
                        tracing::warn!(worker, started, "failed to spawn offload worker: {e}");
                        break;
                    }
                }
            }
            // Workers that did start drain every lane on their own.
            if started == 0 {
                drain();
            }
        });
        panics.finish();
    }
}

/// Runs every lane on the calling thread, in index order.
///
/// This is one legal schedule of an offloaded task: lanes are allowed, not
/// required, to overlap. Kernels that are correct only when lanes actually
/// run in parallel are buggy, and this backend is the quickest way to find
/// out.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialOffload;

impl Offload for SequentialOffload {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn for_each_lane(&self, lanes: usize, kernel: &(dyn Fn(Lane) + Sync)) {
        let panics = LanePanics::default();
        (0..lanes).for_each(|index| panics.run(kernel, Lane::new(index)));
        panics.finish();
    }
}
