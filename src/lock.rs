// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// In-process exclusive lock with owner tracking.
// Non-reentrant: relocking from the owner and unlocking from a non-owner are
// reported as usage errors instead of deadlocking or corrupting state.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::scoped_access::Protect;
use crate::{Deadline, Result, SyncError, UsageError};

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    waiters: usize,
    destroyed: bool,
}

/// A binary mutual-exclusion primitive; at most one holder at any instant.
#[derive(Debug, Default)]
pub struct Lock {
    state: Mutex<LockState>,
    freed: Condvar,
}

impl Lock {
    /// Create a new unlocked lock.
    pub fn new() -> Self {
        Self::default()
    }

    // The inner mutex only guards plain fields that are never left half
    // updated, so a poisoned guard is still consistent.
    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(st: &LockState, me: ThreadId) -> Result<()> {
        if st.destroyed {
            return Err(UsageError::Destroyed.into());
        }
        if st.owner == Some(me) {
            return Err(UsageError::Reentrant.into());
        }
        Ok(())
    }

    /// Block until no other thread holds the lock, then take it.
    pub fn acquire(&self) -> Result<()> {
        let me = thread::current().id();
        let mut st = self.state();
        Self::check(&st, me)?;
        while st.owner.is_some() {
            st.waiters += 1;
            st = self.freed.wait(st).unwrap_or_else(PoisonError::into_inner);
            st.waiters -= 1;
            if st.destroyed {
                return Err(UsageError::Destroyed.into());
            }
        }
        st.owner = Some(me);
        Ok(())
    }

    /// Take the lock if it is free. Never blocks.
    /// Returns `Ok(true)` if acquired, `Ok(false)` if held elsewhere.
    pub fn try_acquire(&self) -> Result<bool> {
        let me = thread::current().id();
        let mut st = self.state();
        Self::check(&st, me)?;
        if st.owner.is_some() {
            return Ok(false);
        }
        st.owner = Some(me);
        Ok(true)
    }

    /// Bounded acquire. Returns `Err(SyncError::TimedOut)` if the lock could
    /// not be taken within `timeout`.
    pub fn acquire_within(&self, timeout: Duration) -> Result<()> {
        self.acquire_until(Deadline::after(timeout))
    }

    /// Bounded acquire against an absolute deadline. A deadline that has
    /// already passed fails immediately without blocking.
    pub fn acquire_until(&self, deadline: Deadline) -> Result<()> {
        let me = thread::current().id();
        let mut st = self.state();
        Self::check(&st, me)?;
        if deadline.is_elapsed() {
            return Err(SyncError::TimedOut);
        }
        while st.owner.is_some() {
            let Some(left) = deadline.remaining() else {
                tracing::trace!("lock acquire timed out");
                return Err(SyncError::TimedOut);
            };
            st.waiters += 1;
            let (guard, _) = self
                .freed
                .wait_timeout(st, left)
                .unwrap_or_else(PoisonError::into_inner);
            st = guard;
            st.waiters -= 1;
            if st.destroyed {
                return Err(UsageError::Destroyed.into());
            }
        }
        st.owner = Some(me);
        Ok(())
    }

    /// Give the lock back. Only the holder may release it.
    pub fn release(&self) -> Result<()> {
        let me = thread::current().id();
        let mut st = self.state();
        if st.destroyed {
            return Err(UsageError::Destroyed.into());
        }
        if st.owner != Some(me) {
            return Err(UsageError::NotOwner.into());
        }
        st.owner = None;
        let wake = st.waiters > 0;
        drop(st);
        if wake {
            self.freed.notify_one();
        }
        Ok(())
    }

    /// Whether some thread holds the lock right now. Advisory.
    pub fn is_locked(&self) -> bool {
        self.state().owner.is_some()
    }

    /// Whether the calling thread holds the lock.
    pub fn is_held_by_current(&self) -> bool {
        self.state().owner == Some(thread::current().id())
    }

    /// Threads currently blocked in an acquire. Advisory.
    pub fn waiters(&self) -> usize {
        self.state().waiters
    }

    /// Tear the lock down. Refused while it is held or waited on; every
    /// later operation fails with `UsageError::Destroyed`.
    pub fn destroy(&self) -> Result<()> {
        let mut st = self.state();
        if st.destroyed {
            return Err(UsageError::Destroyed.into());
        }
        if st.owner.is_some() || st.waiters > 0 {
            return Err(UsageError::Busy.into());
        }
        st.destroyed = true;
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.state().destroyed
    }
}

// Safety: ownership is tracked; a second holder is impossible.
unsafe impl Protect for Lock {
    fn enter(&self) -> Result<()> {
        self.acquire()
    }

    fn try_enter(&self) -> Result<bool> {
        self.try_acquire()
    }

    fn enter_until(&self, deadline: Deadline) -> Result<()> {
        self.acquire_until(deadline)
    }

    fn leave(&self) -> Result<()> {
        self.release()
    }

    fn is_held(&self) -> bool {
        self.is_locked()
    }
}
