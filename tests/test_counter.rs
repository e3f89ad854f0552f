// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared counter: guarded updates never lose increments, unguarded ones can.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use proptest::prelude::*;

use libsync::{Semaphore, SharedCounter};

fn run_guarded(counter: &Arc<SharedCounter>, workers: usize, iterations: usize) {
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let c = Arc::clone(counter);
            thread::spawn(move || {
                for _ in 0..iterations {
                    c.increment().expect("increment");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

// Widens the window between read and write so lost updates are certain
// to show up within a few runs.
fn run_unguarded(workers: usize, iterations: usize) -> i64 {
    let counter = Arc::new(SharedCounter::new(0));
    let start = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let (c, s) = (Arc::clone(&counter), Arc::clone(&start));
            thread::spawn(move || {
                s.wait();
                for _ in 0..iterations {
                    c.update_unguarded(|v| {
                        thread::sleep(Duration::from_micros(200));
                        v + 1
                    });
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    counter.get()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn guarded_total_is_exact(workers in 1usize..6, iterations in 1usize..400) {
        let counter = Arc::new(SharedCounter::new(0));
        run_guarded(&counter, workers, iterations);
        prop_assert_eq!(counter.get(), (workers * iterations) as i64);
        prop_assert!(!counter.is_locked());
    }
}

#[test]
fn four_by_five_reaches_twenty() {
    let counter = Arc::new(SharedCounter::new(0));
    run_guarded(&counter, 4, 5);
    assert_eq!(counter.get(), 20);
}

#[test]
fn unguarded_updates_get_lost() {
    let (workers, iterations) = (4, 20);
    let expected = (workers * iterations) as i64;
    let lost = (0..5).any(|_| {
        let got = run_unguarded(workers, iterations);
        assert!(got <= expected, "counter overshot: {got}");
        got < expected
    });
    assert!(lost, "no update was lost in five unguarded runs");
}

#[test]
fn binary_semaphore_guarded_counter() {
    let counter =
        Arc::new(SharedCounter::with_primitive(0, Semaphore::binary()).expect("binary permit"));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let c = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..250 {
                    c.increment().expect("increment");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(counter.get(), 1000);
}

#[test]
fn update_returns_new_value() {
    let counter = SharedCounter::new(10);
    assert_eq!(counter.update(|v| v * 3).expect("update"), 30);
    assert_eq!(counter.with_lock(|v| std::mem::replace(v, -1)).expect("swap"), 30);
    assert_eq!(counter.get(), -1);
}
