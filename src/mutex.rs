// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named process-shared mutex.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::platform::PlatformMutex;
use crate::scoped_access::Protect;
use crate::{Deadline, Result, UsageError};

/// A named mutex usable across processes.
///
/// A `pthread_mutex_t` stored in shared memory with the process-shared,
/// robust and error-checking attributes. Relocking from the holding thread
/// fails with `UsageError::Reentrant`; unlocking from any other thread fails
/// with `UsageError::NotOwner`. If a holder dies, the next locker recovers
/// the mutex.
///
/// `try_lock` from the holding thread reports busy, as POSIX specifies.
///
/// While a handle holds the mutex through a
/// [`ScopedAccess`](crate::ScopedAccess), only that access may release it:
/// `unlock` through any handle of the same name, in this process, fails with
/// `UsageError::HeldByScope`.
pub struct IpcMutex {
    inner: PlatformMutex,
    name: String,
}

impl IpcMutex {
    /// Open the mutex called `name`, creating it if needed.
    pub fn open(name: &str) -> Result<Self> {
        Ok(Self {
            inner: PlatformMutex::open(name)?,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lock(&self) -> Result<()> {
        self.inner.lock()
    }

    /// `Ok(false)` if another holder has it.
    pub fn try_lock(&self) -> Result<bool> {
        self.inner.try_lock()
    }

    /// Lock or fail with `SyncError::TimedOut` once `deadline` passes.
    pub fn lock_until(&self, deadline: Deadline) -> Result<()> {
        self.inner.lock_until(deadline)
    }

    pub fn lock_within(&self, timeout: Duration) -> Result<()> {
        self.lock_until(Deadline::after(timeout))
    }

    pub fn unlock(&self) -> Result<()> {
        if self.inner.scope().load(Ordering::Acquire) != 0 {
            return Err(UsageError::HeldByScope.into());
        }
        self.inner.unlock()
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    fn enter_scope(&self) {
        self.inner.scope().store(self.addr(), Ordering::Release);
    }

    /// Remove the named storage backing a mutex.
    pub fn clear_storage(name: &str) {
        PlatformMutex::clear_storage(name);
    }
}

impl std::fmt::Debug for IpcMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcMutex").field("name", &self.name).finish()
    }
}

// Safety: the error-checking mutex admits one holder and rejects release
// from other threads. Within the holding thread, a scoped hold is recorded
// per process and every release other than the one through the entering
// handle is refused, so a second handle of the same name cannot free it.
// Other processes can only reach the mutex, never the holder's memory.
unsafe impl Protect for IpcMutex {
    fn enter(&self) -> Result<()> {
        self.lock()?;
        self.enter_scope();
        Ok(())
    }

    fn try_enter(&self) -> Result<bool> {
        let held = self.try_lock()?;
        if held {
            self.enter_scope();
        }
        Ok(held)
    }

    fn enter_until(&self, deadline: Deadline) -> Result<()> {
        self.lock_until(deadline)?;
        self.enter_scope();
        Ok(())
    }

    fn leave(&self) -> Result<()> {
        let scope = self.inner.scope();
        match scope.load(Ordering::Acquire) {
            0 => self.inner.unlock(),
            a if a == self.addr() => {
                // Still held here, so no other thread can set the slot.
                scope.store(0, Ordering::Release);
                self.inner.unlock().inspect_err(|_| self.enter_scope())
            }
            _ => Err(UsageError::HeldByScope.into()),
        }
    }

    // Probing takes and drops the lock, so it is only a hint.
    fn is_held(&self) -> bool {
        match self.try_lock() {
            Ok(true) => {
                let _ = self.inner.unlock();
                false
            }
            _ => true,
        }
    }
}
