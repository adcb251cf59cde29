//! Lanes simulated on a dedicated rayon pool.

use super::{Lane, LanePanics, Offload, OffloadError};
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};

/// Runs lanes on its own rayon thread pool, the way a parallel execution
/// policy spreads an index range over a device.
///
/// The pool is private to this backend, so lanes never share workers with
/// other rayon users in the process. Its threads are named
/// `offload-lane-{i}`.
#[derive(Debug)]
pub struct RayonOffload {
    pool: ThreadPool,
}

impl RayonOffload {
    /// Builds a pool of `workers` threads.
    ///
    /// # Errors
    ///
    /// Fails with [`OffloadError::NoWorkers`] if `workers` is zero, or with
    /// [`OffloadError::Pool`] if rayon cannot start the pool.
    pub fn new(workers: usize) -> Result<Self, OffloadError> {
        if workers == 0 {
            return Err(OffloadError::NoWorkers);
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("offload-lane-{i}"))
            .build()?;
        tracing::debug!(workers, "rayon offload pool ready");
        Ok(Self { pool })
    }

    /// Number of worker threads in the pool.
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Offload for RayonOffload {
    fn name(&self) -> &'static str {
        "rayon"
    }

    fn for_each_lane(&self, lanes: usize, kernel: &(dyn Fn(Lane) + Sync)) {
        let panics = LanePanics::default();
        self.pool.install(|| {
            (0..lanes)
                .into_par_iter()
                .for_each(|index| panics.run(kernel, Lane::new(index)))
        });
        panics.finish();
    }
}
