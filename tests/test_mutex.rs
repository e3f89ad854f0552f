// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named process-shared mutex: exclusion, error checking and use as the
// primitive of a guarded region.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use libsync::{Guarded, IpcMutex, Protect, SyncError, UsageError};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_mtx_{}_{n}", std::process::id())
}

#[test]
fn lock_unlock() {
    let name = unique_name("lock_unlock");
    IpcMutex::clear_storage(&name);

    let mtx = IpcMutex::open(&name).expect("open");
    for _ in 0..100 {
        mtx.lock().expect("lock");
        mtx.unlock().expect("unlock");
    }
}

#[test]
fn clear_storage_then_reopen() {
    let name = unique_name("clear_storage");
    IpcMutex::clear_storage(&name);
    {
        let _mtx = IpcMutex::open(&name).expect("open");
    }
    IpcMutex::clear_storage(&name);
    let mtx = IpcMutex::open(&name).expect("reopen after clear");
    assert!(mtx.try_lock().expect("try_lock"));
    mtx.unlock().expect("unlock");
}

#[test]
fn relock_by_owner_is_reentrant_error() {
    let name = unique_name("relock");
    IpcMutex::clear_storage(&name);

    let mtx = IpcMutex::open(&name).expect("open");
    mtx.lock().expect("lock");
    assert_eq!(mtx.lock().unwrap_err().usage(), Some(UsageError::Reentrant));
    // try_lock by the holder reports busy rather than an error.
    assert!(!mtx.try_lock().expect("try_lock"));
    mtx.unlock().expect("unlock");
}

#[test]
fn unlock_by_non_owner_is_rejected() {
    let name = unique_name("not_owner");
    IpcMutex::clear_storage(&name);

    let mtx = IpcMutex::open(&name).expect("open");
    mtx.lock().expect("lock");

    let n = name.clone();
    let err = thread::spawn(move || {
        let other = IpcMutex::open(&n).expect("open other");
        other.unlock().unwrap_err()
    })
    .join()
    .unwrap();
    assert_eq!(err.usage(), Some(UsageError::NotOwner));
    mtx.unlock().expect("unlock");
}

#[test]
fn try_lock_contended() {
    let name = unique_name("try_contended");
    IpcMutex::clear_storage(&name);

    let mtx_main = IpcMutex::open(&name).expect("open main");
    mtx_main.lock().expect("lock main");

    let name_t = name.clone();
    let t = thread::spawn(move || {
        let mtx = IpcMutex::open(&name_t).expect("open thread");
        let start = Instant::now();
        let got = mtx.try_lock().expect("try_lock");
        (got, start.elapsed())
    });
    let (got, elapsed) = t.join().unwrap();
    assert!(!got, "try_lock should have been contended");
    assert!(elapsed < Duration::from_millis(50));

    mtx_main.unlock().expect("unlock main");
}

#[test]
fn timed_lock_times_out() {
    let name = unique_name("timed");
    IpcMutex::clear_storage(&name);

    let mtx_main = IpcMutex::open(&name).expect("open main");
    mtx_main.lock().expect("lock main");

    let name_t = name.clone();
    let r = thread::spawn(move || {
        let mtx = IpcMutex::open(&name_t).expect("open thread");
        let start = Instant::now();
        (mtx.lock_within(Duration::from_millis(50)), start.elapsed())
    })
    .join()
    .unwrap();
    assert!(matches!(r.0, Err(SyncError::TimedOut)));
    assert!(r.1 >= Duration::from_millis(40), "gave up after {:?}", r.1);

    mtx_main.unlock().expect("unlock main");
}

#[test]
fn lock_contention() {
    let name = unique_name("contention");
    IpcMutex::clear_storage(&name);

    let inside = Arc::new(AtomicBool::new(false));
    let violation = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let (name, inside, violation) =
                (name.clone(), Arc::clone(&inside), Arc::clone(&violation));
            thread::spawn(move || {
                let mtx = IpcMutex::open(&name).expect("open");
                for _ in 0..50 {
                    mtx.lock().expect("lock");
                    if inside.swap(true, Ordering::SeqCst) {
                        violation.store(true, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_micros(10));
                    inside.store(false, Ordering::SeqCst);
                    mtx.unlock().expect("unlock");
                    thread::yield_now();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert!(!violation.load(Ordering::SeqCst), "both threads in critical section simultaneously");
}

#[test]
fn guards_a_region() {
    let name = unique_name("region");
    IpcMutex::clear_storage(&name);

    let region = Arc::new(
        Guarded::with_primitive(0u64, IpcMutex::open(&name).expect("open")).expect("exclusive"),
    );
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let r = Arc::clone(&region);
            thread::spawn(move || {
                for _ in 0..250 {
                    r.with_lock(|v| *v += 1).expect("with_lock");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(region.read().expect("read"), 1000);
    assert!(!region.is_locked());
}

#[test]
fn scoped_hold_cannot_be_released_through_another_handle() {
    let name = unique_name("scoped_hold");
    IpcMutex::clear_storage(&name);
    let region =
        Guarded::with_primitive(0u64, IpcMutex::open(&name).expect("open")).expect("exclusive");

    region
        .with_lock(|v| {
            let other = IpcMutex::open(&name).expect("open second handle");
            assert_eq!(other.unlock().unwrap_err().usage(), Some(UsageError::HeldByScope));
            assert_eq!(other.leave().unwrap_err().usage(), Some(UsageError::HeldByScope));

            // Still held: another thread cannot get in.
            let n = name.clone();
            let busy = thread::spawn(move || IpcMutex::open(&n).expect("open").try_lock())
                .join()
                .unwrap()
                .expect("try_lock");
            assert!(!busy);
            *v += 1;
        })
        .expect("with_lock");

    assert!(!region.is_locked());
    let other = IpcMutex::open(&name).expect("open");
    other.lock().expect("lock");
    other.unlock().expect("plain unlock after the scope ended");
    assert_eq!(region.read().expect("read"), 1);
}
