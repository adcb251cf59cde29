use crate::config;
use grading::deadline;
use hetsync::{Backend, FairLock, Lane, WouldBlock, offload};
use std::{
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
    thread,
    time::Instant,
};

/// Runs `body` once on each of `host_threads` host threads and once on each
/// lane of one offloaded task, all at the same time.
fn contend(host_threads: usize, lanes: usize, body: &(dyn Fn() + Sync)) {
    let config = config::get();
    let offload = config.offload().expect("failed to build offload backend");
    let kernel = |_: Lane| body();
    thread::scope(|s| {
        let task = offload::launch(s, &*offload, lanes, &kernel).expect("failed to launch task");
        for i in 0..host_threads {
            thread::Builder::new()
                .name(format!("host-{i}"))
                .spawn_scoped(s, body)
                .expect("failed to spawn host thread");
        }
        task.join().expect("offloaded task failed");
    });
}

/// 64 host threads and 4096 lanes each increment a plain integer once.
pub fn message_count() {
    let config = config::get();
    let lock = FairLock::new(0usize);

    contend(config.host_threads, config.lanes, &|| {
        let mut message = lock.acquire();
        *message += 1;
    });

    let message = lock.into_inner();
    let should = config.host_threads + config.lanes;
    assert_eq!(
        message, should,
        "FAILED: message = {message} != {should} threads"
    );
    tracing::info!("SUCCESS: message = {message} == {should} threads");
}

/// No two holders are ever inside the critical section at the same time.
pub fn mutual_exclusion() {
    let config = config::get();
    let lock = FairLock::new(0usize);
    let inside = AtomicBool::new(false);
    let overlaps = AtomicU32::new(0);

    contend(config.host_threads, config.lanes, &|| {
        let mut guard = lock.acquire();
        if inside.swap(true, Ordering::Relaxed) {
            overlaps.fetch_add(1, Ordering::Relaxed);
        }
        *guard += 1;
        for _ in 0..16 {
            core::hint::spin_loop();
        }
        inside.store(false, Ordering::Relaxed);
    });

    assert_eq!(overlaps.load(Ordering::Relaxed), 0, "critical sections overlapped");
    assert_eq!(lock.into_inner(), config.host_threads + config.lanes);
}

/// Holders are admitted in ticket order, at non-decreasing times.
pub fn fifo_admission() {
    let config = config::get();
    let lock = FairLock::new(Vec::new());

    contend(config.host_threads, config.lanes, &|| {
        let mut log = lock.acquire();
        let ticket = log.ticket();
        log.push((ticket, Instant::now()));
    });

    let log = lock.into_inner();
    assert_eq!(log.len(), config.host_threads + config.lanes);
    for (admitted, window) in log.windows(2).enumerate() {
        let ((t0, at0), (t1, at1)) = (window[0], window[1]);
        assert_eq!(t0 as usize, admitted, "ticket {t0} admitted out of order");
        assert_eq!(t1, t0 + 1, "ticket {t1} admitted after {t0}");
        assert!(at0 <= at1, "ticket {t1} admitted before {t0}");
    }
}

/// Tickets handed out across all callers are exactly `0..K`.
pub fn unique_tickets() {
    let config = config::get();
    let lock = FairLock::new(());
    let tickets = FairLock::new(Vec::new());

    contend(config.host_threads, config.lanes, &|| {
        let guard = lock.acquire();
        let ticket = guard.ticket();
        drop(guard);
        tickets.acquire().push(ticket);
    });

    let mut tickets = tickets.into_inner();
    tickets.sort_unstable();
    let expected = (0..(config.host_threads + config.lanes) as u32).collect::<Vec<_>>();
    assert_eq!(tickets, expected, "tickets were lost or duplicated");
}

/// A critical section left through an early return still releases the lock.
#[deadline(5000)]
pub fn early_return_releases() {
    fn take_if_positive(lock: &FairLock<i64>) -> Option<i64> {
        let mut value = lock.acquire();
        if *value <= 0 {
            return None;
        }
        *value -= 1;
        Some(*value)
    }

    let lock = FairLock::new(0i64);
    assert_eq!(take_if_positive(&lock), None);
    assert!(!lock.is_locked());

    thread::scope(|s| {
        let other = s.spawn(|| {
            *lock.acquire() = 2;
        });
        other.join().expect("second caller failed");
    });
    assert_eq!(take_if_positive(&lock), Some(1));
}

/// Tickets keep working across the `u32` wrap-around.
pub fn wrap_around() {
    let config = config::get();
    let total = config.host_threads + config.lanes;
    let lock = FairLock::starting_at(0u32.wrapping_sub((total / 2).max(1) as u32), Vec::new());

    contend(config.host_threads, config.lanes, &|| {
        let mut log = lock.acquire();
        let ticket = log.ticket();
        log.push(ticket);
    });

    assert!(!lock.is_locked());
    let log = lock.into_inner();
    assert_eq!(log.len(), total);
    if total >= 2 {
        assert!(log.contains(&u32::MAX) && log.contains(&0), "counters did not wrap");
    }
    for window in log.windows(2) {
        assert_eq!(window[1], window[0].wrapping_add(1));
    }
}

/// A failing `try_acquire` leaves the queue untouched.
#[deadline(5000)]
pub fn try_acquire_contended() {
    let lock = FairLock::new(0usize);
    let holder = lock.acquire();

    thread::scope(|s| {
        let attempt = s.spawn(|| lock.try_acquire().map(|g| g.ticket()));
        assert_eq!(attempt.join().expect("try_acquire panicked"), Err(WouldBlock));
    });
    assert_eq!(lock.queued(), 1);

    drop(holder);
    let guard = lock.try_acquire().expect("uncontended try_acquire failed");
    assert_eq!(guard.ticket(), 1);
}

/// The counting scenario holds on every backend.
pub fn every_backend() {
    let config = config::get();
    let lanes = config.lanes.min(1024);
    for backend in [Backend::Rayon, Backend::Threads, Backend::Sequential] {
        let offload = backend
            .build(config.workers)
            .expect("failed to build offload backend");
        let lock = FairLock::new(0usize);
        let kernel = |_: Lane| *lock.acquire() += 1;
        thread::scope(|s| {
            let task = offload::launch(s, &*offload, lanes, &kernel).expect("failed to launch task");
            for _ in 0..8 {
                s.spawn(|| *lock.acquire() += 1);
            }
            task.join().expect("offloaded task failed");
        });
        assert_eq!(lock.into_inner(), lanes + 8, "backend {backend} lost an increment");
    }
}
