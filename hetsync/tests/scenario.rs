//! Host threads and offloaded lanes sharing one lock and one flag.

use grading::{deadline, repeat};
use hetsync::{
    Backend, Completion, CompletionFlag, FairLock, Lane,
    offload::{self, OffloadError},
};
use std::{
    sync::atomic::{AtomicU32, Ordering},
    thread,
};

const HOST_THREADS: usize = 64;
const LANES: usize = 4096;

fn counting_scenario(backend: Backend, host_threads: usize, lanes: usize) -> usize {
    let offload = backend.build(Some(4)).unwrap();
    let lock = FairLock::new(0usize);
    let kernel = |_: Lane| *lock.acquire() += 1;
    thread::scope(|s| {
        let task = offload::launch(s, &*offload, lanes, &kernel).unwrap();
        for _ in 0..host_threads {
            s.spawn(|| *lock.acquire() += 1);
        }
        task.join().unwrap();
    });
    assert!(!lock.is_locked());
    lock.into_inner()
}

#[test]
#[deadline(60000)]
fn message_count_reaches_4160() {
    assert_eq!(counting_scenario(Backend::Rayon, HOST_THREADS, LANES), 4160);
}

#[test]
#[deadline(30000)]
fn message_count_on_every_backend() {
    for backend in [Backend::Threads, Backend::Sequential] {
        assert_eq!(counting_scenario(backend, 8, 512), 520, "backend {backend}");
    }
}

#[test]
#[deadline(30000)]
fn lane_publishes_to_host() {
    let offload = Backend::Rayon.build(Some(2)).unwrap();
    let flag = CompletionFlag::new();
    let message = AtomicU32::new(0);
    let kernel = |_: Lane| {
        message.store(42, Ordering::Relaxed);
        flag.signal();
    };
    thread::scope(|s| {
        let task = offload::launch(s, &*offload, 1, &kernel).unwrap();
        flag.wait();
        assert_eq!(message.load(Ordering::Relaxed), 42);
        task.join().unwrap();
    });
}

#[test]
#[repeat(50)]
fn host_publishes_to_lanes() {
    let offload = Backend::Threads.build(Some(4)).unwrap();
    let done = Completion::new();
    let seen = AtomicU32::new(0);
    let kernel = |_: Lane| {
        if *done.wait() == 7u32 {
            seen.fetch_add(1, Ordering::Relaxed);
        }
    };
    thread::scope(|s| {
        let task = offload::launch(s, &*offload, 64, &kernel).unwrap();
        done.complete(7).unwrap();
        task.join().unwrap();
    });
    assert_eq!(seen.into_inner(), 64);
}

#[test]
#[deadline(30000)]
fn lock_held_across_lanes_in_fifo_order() {
    let offload = Backend::Threads.build(Some(4)).unwrap();
    let lock = FairLock::new(Vec::new());
    let holder = lock.acquire();
    let kernel = |_: Lane| {
        let mut log = lock.acquire();
        let ticket = log.ticket();
        log.push(ticket);
    };
    thread::scope(|s| {
        let task = offload::launch(s, &*offload, 256, &kernel).unwrap();
        // Holder plus one waiting lane per worker.
        while lock.queued() < 5 {
            thread::yield_now();
        }
        drop(holder);
        task.join().unwrap();
    });
    assert_eq!(lock.into_inner(), (1..=256).collect::<Vec<u32>>());
}

#[test]
fn lane_panic_is_reported_after_every_lane_ran() {
    for backend in [Backend::Rayon, Backend::Threads, Backend::Sequential] {
        let offload = backend.build(Some(4)).unwrap();
        let lock = FairLock::new(0usize);
        let kernel = |lane: Lane| {
            let mut guard = lock.acquire();
            *guard += 1;
            if lane.index() == 3 {
                panic!("lane 3 gave up");
            }
        };
        thread::scope(|s| {
            let task = offload::launch(s, &*offload, 512, &kernel).unwrap();
            match task.join() {
                Err(OffloadError::Panicked(message)) => assert_eq!(message, "lane 3 gave up"),
                other => panic!("unexpected outcome on {backend}: {other:?}"),
            }
        });
        assert!(!lock.is_locked());
        assert_eq!(lock.into_inner(), 512, "backend {backend} skipped lanes");
    }
}
