// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Counting semaphore with an explicit upper bound.
// Permits are not owned: any thread may release, regardless of who acquired.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::scoped_access::Protect;
use crate::{Deadline, Result, SyncError, UsageError};

/// Largest permit count a semaphore may hold (`SEM_VALUE_MAX` on Linux).
pub const PERMIT_MAX: u32 = i32::MAX as u32;

#[derive(Debug)]
struct SemState {
    count: u32,
    waiters: usize,
    destroyed: bool,
}

/// A counting permit gate bounding how many holders may be inside at once.
///
/// The observable count never goes negative; blocked acquirers are tracked
/// separately and reported by [`Semaphore::waiters`].
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<SemState>,
    available: Condvar,
    bound: u32,
}

impl Semaphore {
    /// Create a semaphore holding `initial` permits, never exceeding `bound`.
    pub fn new(initial: u32, bound: u32) -> Result<Self> {
        if bound == 0 {
            return Err(SyncError::invalid("permit bound must be at least 1"));
        }
        if initial > bound {
            return Err(SyncError::invalid(format!(
                "initial permits {initial} exceed bound {bound}"
            )));
        }
        Ok(Self {
            state: Mutex::new(SemState {
                count: initial,
                waiters: 0,
                destroyed: false,
            }),
            available: Condvar::new(),
            bound,
        })
    }

    /// `initial` permits with the platform maximum as bound.
    pub fn with_permits(initial: u32) -> Result<Self> {
        Self::new(initial, PERMIT_MAX)
    }

    /// A single permit that can never be over-released. Usable as a region guard.
    pub fn binary() -> Self {
        Self {
            state: Mutex::new(SemState {
                count: 1,
                waiters: 0,
                destroyed: false,
            }),
            available: Condvar::new(),
            bound: 1,
        }
    }

    fn state(&self) -> MutexGuard<'_, SemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live(st: &SemState) -> Result<()> {
        if st.destroyed {
            return Err(UsageError::Destroyed.into());
        }
        Ok(())
    }

    /// Take one permit, blocking while none is available.
    pub fn acquire(&self) -> Result<()> {
        let mut st = self.state();
        Self::live(&st)?;
        while st.count == 0 {
            st.waiters += 1;
            st = self.available.wait(st).unwrap_or_else(PoisonError::into_inner);
            st.waiters -= 1;
            Self::live(&st)?;
        }
        st.count -= 1;
        Ok(())
    }

    /// Take one permit if available. Fails with `SyncError::Unavailable`
    /// when the count is 0. Never blocks.
    pub fn try_acquire(&self) -> Result<()> {
        let mut st = self.state();
        Self::live(&st)?;
        if st.count == 0 {
            return Err(SyncError::Unavailable);
        }
        st.count -= 1;
        Ok(())
    }

    /// Bounded acquire relative to now.
    pub fn acquire_within(&self, timeout: Duration) -> Result<()> {
        self.acquire_until(Deadline::after(timeout))
    }

    /// Bounded acquire against an absolute deadline. A deadline that has
    /// already passed fails immediately with `SyncError::TimedOut`.
    pub fn acquire_until(&self, deadline: Deadline) -> Result<()> {
        let mut st = self.state();
        Self::live(&st)?;
        if deadline.is_elapsed() {
            return Err(SyncError::TimedOut);
        }
        while st.count == 0 {
            let Some(left) = deadline.remaining() else {
                tracing::trace!("permit acquire timed out");
                return Err(SyncError::TimedOut);
            };
            st.waiters += 1;
            let (guard, _) = self
                .available
                .wait_timeout(st, left)
                .unwrap_or_else(PoisonError::into_inner);
            st = guard;
            st.waiters -= 1;
            Self::live(&st)?;
        }
        st.count -= 1;
        Ok(())
    }

    /// Return one permit, waking a single blocked acquirer if there is one.
    pub fn release(&self) -> Result<()> {
        self.release_many(1)
    }

    /// Return `n` permits at once. Either all of them fit under the bound
    /// or none is added.
    pub fn release_many(&self, n: u32) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let mut st = self.state();
        Self::live(&st)?;
        match st.count.checked_add(n) {
            Some(c) if c <= self.bound => st.count = c,
            _ => return Err(SyncError::Overflow { bound: self.bound }),
        }
        let wake = st.waiters.min(n as usize);
        drop(st);
        for _ in 0..wake {
            self.available.notify_one();
        }
        Ok(())
    }

    /// Instantaneous permit count. Advisory only: it may be stale before the
    /// caller looks at it and must never drive a synchronization decision.
    pub fn peek(&self) -> u32 {
        self.state().count
    }

    /// Threads currently blocked in an acquire. Advisory.
    pub fn waiters(&self) -> usize {
        self.state().waiters
    }

    pub fn bound(&self) -> u32 {
        self.bound
    }

    /// Tear the semaphore down. Refused while any acquirer is blocked.
    pub fn destroy(&self) -> Result<()> {
        let mut st = self.state();
        Self::live(&st)?;
        if st.waiters > 0 {
            return Err(UsageError::Busy.into());
        }
        st.destroyed = true;
        Ok(())
    }
}

// Safety: with a bound of 1 the count never exceeds 1, so at most one
// holder can be inside. Regions own their semaphore, so nobody else can
// release on the holder's behalf.
unsafe impl Protect for Semaphore {
    fn enter(&self) -> Result<()> {
        self.acquire()
    }

    fn try_enter(&self) -> Result<bool> {
        match self.try_acquire() {
            Ok(()) => Ok(true),
            Err(SyncError::Unavailable) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn enter_until(&self, deadline: Deadline) -> Result<()> {
        self.acquire_until(deadline)
    }

    fn leave(&self) -> Result<()> {
        self.release()
    }

    fn max_holders(&self) -> u32 {
        self.bound
    }

    fn is_held(&self) -> bool {
        self.peek() < self.bound
    }
}
