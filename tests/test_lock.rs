// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// In-process exclusive lock: exclusion, bounded waits and usage defects.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use libsync::{Deadline, Lock, SyncError, UsageError};

#[test]
fn acquire_release() {
    let lock = Lock::new();
    lock.acquire().expect("acquire");
    assert!(lock.is_locked());
    lock.release().expect("release");
    assert!(!lock.is_locked());
}

#[test]
fn multiple_cycles() {
    let lock = Lock::new();
    for _ in 0..100 {
        lock.acquire().expect("acquire");
        lock.release().expect("release");
    }
}

#[test]
fn try_acquire_busy_returns_promptly() {
    let lock = Arc::new(Lock::new());
    lock.acquire().expect("acquire main");

    let l = Arc::clone(&lock);
    let t = thread::spawn(move || {
        let start = Instant::now();
        let got = l.try_acquire().expect("try_acquire");
        (got, start.elapsed())
    });
    let (got, elapsed) = t.join().unwrap();
    assert!(!got, "lock is held by the main thread");
    assert!(elapsed < Duration::from_millis(50), "try_acquire blocked for {elapsed:?}");

    lock.release().expect("release");
}

#[test]
fn relock_by_owner_is_reentrant_error() {
    let lock = Lock::new();
    lock.acquire().expect("acquire");
    assert_eq!(lock.acquire().unwrap_err().usage(), Some(UsageError::Reentrant));
    assert_eq!(lock.try_acquire().unwrap_err().usage(), Some(UsageError::Reentrant));
    // The first hold is intact.
    assert!(lock.is_held_by_current());
    lock.release().expect("release");
}

#[test]
fn release_by_non_owner_is_rejected() {
    let lock = Arc::new(Lock::new());
    lock.acquire().expect("acquire");

    let l = Arc::clone(&lock);
    let err = thread::spawn(move || l.release().unwrap_err()).join().unwrap();
    assert_eq!(err.usage(), Some(UsageError::NotOwner));
    assert!(lock.is_held_by_current(), "failed release must not change ownership");

    lock.release().expect("release");
    assert_eq!(lock.release().unwrap_err().usage(), Some(UsageError::NotOwner));
}

#[test]
fn past_deadline_times_out_immediately() {
    let lock = Lock::new();
    let past = Deadline::at(Instant::now() - Duration::from_millis(10));
    // Free lock, but the deadline has gone: no acquire is attempted.
    assert!(matches!(lock.acquire_until(past), Err(SyncError::TimedOut)));
    assert!(!lock.is_locked());
}

#[test]
fn bounded_wait_times_out_when_held() {
    let lock = Arc::new(Lock::new());
    lock.acquire().expect("acquire");

    let l = Arc::clone(&lock);
    let t = thread::spawn(move || {
        let start = Instant::now();
        let r = l.acquire_within(Duration::from_millis(50));
        (r, start.elapsed())
    });
    let (r, elapsed) = t.join().unwrap();
    assert!(matches!(r, Err(SyncError::TimedOut)));
    assert!(elapsed >= Duration::from_millis(40), "gave up after {elapsed:?}");

    lock.release().expect("release");
}

#[test]
fn bounded_wait_succeeds_after_release() {
    let lock = Arc::new(Lock::new());
    lock.acquire().expect("acquire");

    let l = Arc::clone(&lock);
    let t = thread::spawn(move || {
        l.acquire_within(Duration::from_secs(5))?;
        l.release()
    });
    thread::sleep(Duration::from_millis(20));
    lock.release().expect("release");
    t.join().unwrap().expect("waiter acquires once freed");
}

#[test]
fn mutual_exclusion() {
    let lock = Arc::new(Lock::new());
    let inside = Arc::new(AtomicBool::new(false));
    let violation = Arc::new(AtomicBool::new(false));
    let counter = Arc::new(AtomicI32::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let (lock, inside, violation, counter) = (
                Arc::clone(&lock),
                Arc::clone(&inside),
                Arc::clone(&violation),
                Arc::clone(&counter),
            );
            thread::spawn(move || {
                for _ in 0..200 {
                    lock.acquire().expect("acquire");
                    if inside.swap(true, Ordering::SeqCst) {
                        violation.store(true, Ordering::SeqCst);
                    }
                    counter.fetch_add(1, Ordering::Relaxed);
                    inside.store(false, Ordering::SeqCst);
                    lock.release().expect("release");
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert!(!violation.load(Ordering::SeqCst), "two holders at once");
    assert_eq!(counter.load(Ordering::Relaxed), 800);
}

#[test]
fn destroy_refused_while_waited_on() {
    let lock = Arc::new(Lock::new());
    lock.acquire().expect("acquire");

    let l = Arc::clone(&lock);
    let waiter = thread::spawn(move || {
        l.acquire()?;
        l.release()
    });
    while lock.waiters() == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(lock.destroy().unwrap_err().usage(), Some(UsageError::Busy));
    lock.release().expect("release");
    waiter.join().unwrap().expect("waiter");

    lock.destroy().expect("destroy when idle");
    assert!(lock.is_destroyed());
    assert_eq!(lock.try_acquire().unwrap_err().usage(), Some(UsageError::Destroyed));
}
