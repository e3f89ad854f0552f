// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared integer counter with a guarded and an unguarded update path.
// The unguarded path exists to show the lost-update race; the storage is an
// atomic word so the race stays logical and never becomes undefined behaviour.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::region::{AcquireMode, Region};
use crate::scoped_access::Protect;
use crate::{Lock, Result, SyncError};

/// An integer counter shared by concurrent workers.
#[derive(Debug)]
pub struct SharedCounter<P: Protect = Lock> {
    value: AtomicI64,
    prim: P,
}

impl SharedCounter<Lock> {
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
            prim: Lock::new(),
        }
    }
}

impl Default for SharedCounter<Lock> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<P: Protect> SharedCounter<P> {
    /// Guard the counter with `prim`, which must admit a single holder.
    pub fn with_primitive(initial: i64, prim: P) -> Result<Self> {
        if prim.max_holders() != 1 {
            return Err(SyncError::invalid("counter needs an exclusive primitive"));
        }
        Ok(Self {
            value: AtomicI64::new(initial),
            prim,
        })
    }

    /// Read-modify-write as one step under the primitive.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut i64) -> R) -> Result<R> {
        self.with_access(AcquireMode::Blocking, f)
    }

    /// Replace the value with `f(old)` under the primitive. Returns the new value.
    pub fn update(&self, f: impl FnOnce(i64) -> i64) -> Result<i64> {
        self.with_lock(|v| {
            *v = f(*v);
            *v
        })
    }

    /// Guarded increment. Returns the new value.
    pub fn increment(&self) -> Result<i64> {
        self.update(|v| v + 1)
    }

    /// Read, compute `f(old)`, write back, all without the primitive.
    /// Concurrent callers overwrite each other's results.
    pub fn update_unguarded(&self, f: impl FnOnce(i64) -> i64) -> i64 {
        let v = self.value.load(Ordering::Relaxed);
        let next = f(v);
        self.value.store(next, Ordering::Relaxed);
        next
    }

    /// Unguarded increment with a yield between the read and the write.
    pub fn increment_unguarded(&self) -> i64 {
        self.update_unguarded(|v| {
            std::thread::yield_now();
            v + 1
        })
    }

    /// Instantaneous value. Advisory unless all workers have been joined.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Overwrite the value under the primitive.
    pub fn reset(&self, value: i64) -> Result<()> {
        self.with_lock(|v| *v = value)
    }

    pub fn is_locked(&self) -> bool {
        self.prim.is_held()
    }
}

impl<P: Protect> Region for SharedCounter<P> {
    type Value = i64;

    fn with_access<R>(&self, mode: AcquireMode<'_>, f: impl FnOnce(&mut i64) -> R) -> Result<R> {
        let _access = mode.acquire(&self.prim)?;
        let mut v = self.value.load(Ordering::Relaxed);
        let out = f(&mut v);
        self.value.store(v, Ordering::Relaxed);
        Ok(out)
    }
}
