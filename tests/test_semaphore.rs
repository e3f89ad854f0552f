// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Counting permits: bound enforcement, blocking, release and teardown.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use libsync::{Deadline, Semaphore, SyncError, UsageError, PERMIT_MAX};

#[test]
fn initial_count() {
    let initial = 3u32;
    let sem = Semaphore::new(initial, initial).expect("new");
    for _ in 0..initial {
        sem.try_acquire().expect("permit available");
    }
    assert!(matches!(sem.try_acquire(), Err(SyncError::Unavailable)));
    assert_eq!(sem.peek(), 0);
}

#[test]
fn zero_initial_is_allowed() {
    let sem = Semaphore::new(0, 4).expect("new");
    assert_eq!(sem.peek(), 0);
    assert_eq!(sem.bound(), 4);
}

#[test]
fn with_permits_uses_platform_bound() {
    let sem = Semaphore::with_permits(1).expect("new");
    assert_eq!(sem.bound(), PERMIT_MAX);
}

#[test]
fn v_holders_then_next_blocks() {
    let v = 2u32;
    let sem = Arc::new(Semaphore::new(v, v).expect("new"));
    for _ in 0..v {
        sem.acquire().expect("acquire");
    }

    let started = Arc::new(AtomicBool::new(false));
    let entered = Arc::new(AtomicBool::new(false));
    let (s, st, en) = (Arc::clone(&sem), Arc::clone(&started), Arc::clone(&entered));
    let extra = thread::spawn(move || {
        st.store(true, Ordering::SeqCst);
        s.acquire().expect("acquire extra");
        en.store(true, Ordering::SeqCst);
    });

    while !started.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }
    thread::sleep(Duration::from_millis(50));
    assert!(!entered.load(Ordering::SeqCst), "holder V+1 entered without a release");
    assert_eq!(sem.waiters(), 1);

    sem.release().expect("release");
    extra.join().unwrap();
    assert!(entered.load(Ordering::SeqCst));
}

#[test]
fn never_more_than_v_inside() {
    let v = 3u32;
    let sem = Arc::new(Semaphore::new(v, v).expect("new"));
    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let (sem, inside, peak) = (Arc::clone(&sem), Arc::clone(&inside), Arc::clone(&peak));
            thread::spawn(move || {
                for _ in 0..20 {
                    sem.acquire().expect("acquire");
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_micros(200));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    sem.release().expect("release");
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= v as usize);
    assert_eq!(sem.peek(), v);
}

#[test]
fn release_beyond_bound_overflows() {
    let sem = Semaphore::new(2, 2).expect("new");
    assert!(matches!(sem.release(), Err(SyncError::Overflow { bound: 2 })));
    assert_eq!(sem.peek(), 2);
}

#[test]
fn release_many_wakes_waiters() {
    let sem = Arc::new(Semaphore::new(0, 10).expect("new"));
    let acquired = Arc::new(AtomicI32::new(0));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let (sem, acquired) = (Arc::clone(&sem), Arc::clone(&acquired));
            thread::spawn(move || {
                sem.acquire().expect("acquire");
                acquired.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    while sem.waiters() < 3 {
        thread::sleep(Duration::from_millis(1));
    }
    sem.release_many(3).expect("release 3");
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(acquired.load(Ordering::SeqCst), 3);
    assert_eq!(sem.peek(), 0);
}

#[test]
fn any_thread_may_release() {
    let sem = Arc::new(Semaphore::new(1, 1).expect("new"));
    sem.acquire().expect("acquire");
    let s = Arc::clone(&sem);
    thread::spawn(move || s.release().expect("release from another thread"))
        .join()
        .unwrap();
    assert_eq!(sem.peek(), 1);
}

#[test]
fn wait_timeout() {
    let sem = Semaphore::new(0, 1).expect("new");
    let start = Instant::now();
    let r = sem.acquire_within(Duration::from_millis(50));
    let elapsed = start.elapsed();
    assert!(matches!(r, Err(SyncError::TimedOut)));
    assert!(elapsed.as_millis() >= 40, "should have waited ~50ms, got {}ms", elapsed.as_millis());
}

#[test]
fn past_deadline_never_takes_a_permit() {
    let sem = Semaphore::new(1, 1).expect("new");
    let past = Deadline::at(Instant::now() - Duration::from_millis(1));
    assert!(matches!(sem.acquire_until(past), Err(SyncError::TimedOut)));
    assert_eq!(sem.peek(), 1);
}

#[test]
fn producer_consumer() {
    let sem = Arc::new(Semaphore::with_permits(0).expect("new"));
    let consumed = Arc::new(AtomicI32::new(0));
    let count = 10;

    let s = Arc::clone(&sem);
    let producer = thread::spawn(move || {
        for _ in 0..count {
            s.release().expect("release");
            thread::sleep(Duration::from_millis(1));
        }
    });

    let (s, c) = (Arc::clone(&sem), Arc::clone(&consumed));
    let consumer = thread::spawn(move || {
        for _ in 0..count {
            s.acquire().expect("acquire");
            c.fetch_add(1, Ordering::Relaxed);
        }
    });

    producer.join().unwrap();
    consumer.join().unwrap();
    assert_eq!(consumed.load(Ordering::Relaxed), count);
}

#[test]
fn destroy_with_waiters_is_busy() {
    let sem = Arc::new(Semaphore::new(0, 1).expect("new"));
    let s = Arc::clone(&sem);
    let waiter = thread::spawn(move || s.acquire());

    while sem.waiters() == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(sem.destroy().unwrap_err().usage(), Some(UsageError::Busy));

    sem.release().expect("release");
    waiter.join().unwrap().expect("waiter");
    sem.destroy().expect("destroy");
    assert_eq!(sem.release().unwrap_err().usage(), Some(UsageError::Destroyed));
}
