use crate::config;
use grading::{deadline, repeat};
use hetsync::{Completion, CompletionFlag, Lane, offload};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::Duration,
};

/// One lane writes 42 and signals; the host waits and reads 42.
#[repeat(10)]
pub fn message_42() {
    let offload = config::get()
        .offload()
        .expect("failed to build offload backend");
    let flag = CompletionFlag::new();
    // Relaxed on purpose: visibility comes from the flag alone.
    let message = AtomicU64::new(0);
    let kernel = |_: Lane| {
        message.store(42, Ordering::Relaxed);
        flag.signal();
    };

    thread::scope(|s| {
        let task = offload::launch(s, &*offload, 1, &kernel).expect("failed to launch task");
        flag.wait();
        let message = message.load(Ordering::Relaxed);
        tracing::info!("CPU read message sent by offloaded lane: {message}");
        assert_eq!(message, 42);
        task.join().expect("offloaded task failed");
    });
}

/// Every trial publishes a distinct multi-word message; the consumer must
/// never see a torn or stale one after `wait` returns.
pub fn visibility_trials() {
    const WORDS: usize = 8;
    let config = config::get();
    let offload = config.offload().expect("failed to build offload backend");

    for trial in 0..config.trials as u64 {
        let flag = CompletionFlag::new();
        let message = [const { AtomicU64::new(0) }; WORDS];
        let kernel = |_: Lane| {
            for (i, word) in message.iter().enumerate() {
                word.store(trial * WORDS as u64 + i as u64 + 1, Ordering::Relaxed);
            }
            flag.signal();
        };

        thread::scope(|s| {
            let task = offload::launch(s, &*offload, 1, &kernel).expect("failed to launch task");
            flag.wait();
            for (i, word) in message.iter().enumerate() {
                assert_eq!(
                    word.load(Ordering::Relaxed),
                    trial * WORDS as u64 + i as u64 + 1,
                    "trial {trial}: word {i} not visible after wait"
                );
            }
            task.join().expect("offloaded task failed");
        });
    }
}

/// One lane among many publishes a value that every host thread receives.
pub fn many_waiters() {
    let config = config::get();
    let offload = config.offload().expect("failed to build offload backend");
    let done = Completion::new();
    let producer = config.lanes / 2;
    let kernel = |lane: Lane| {
        if lane.index() == producer {
            done.complete(format!("hello from lane {}", lane.index()))
                .expect("only one lane publishes");
        }
    };

    thread::scope(|s| {
        let waiters = (0..config.host_threads)
            .map(|_| s.spawn(|| done.wait().clone()))
            .collect::<Vec<_>>();
        let task = offload::launch(s, &*offload, config.lanes, &kernel).expect("failed to launch task");
        for waiter in waiters {
            assert_eq!(
                waiter.join().expect("waiter panicked"),
                format!("hello from lane {producer}")
            );
        }
        task.join().expect("offloaded task failed");
    });
    assert!(done.complete(String::new()).is_err());
}

/// A consumer that starts waiting before the producer exists still returns.
#[deadline(10000)]
pub fn wait_before_launch() {
    let offload = config::get()
        .offload()
        .expect("failed to build offload backend");
    let flag = CompletionFlag::new();
    let kernel = |_: Lane| flag.signal();

    thread::scope(|s| {
        let waiter = s.spawn(|| flag.wait());
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished(), "wait returned before the signal");
        let task = offload::launch(s, &*offload, 1, &kernel).expect("failed to launch task");
        task.join().expect("offloaded task failed");
        waiter.join().expect("waiter panicked");
    });
    assert!(flag.is_signaled());
}
