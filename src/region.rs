// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// A value reachable only through its protecting primitive.

use std::cell::UnsafeCell;
use std::fmt;
use std::time::Duration;

use crate::scoped_access::{Protect, ScopedAccess};
use crate::worker::Context;
use crate::{Deadline, Lock, Result, SyncError};

/// How a region takes its own primitive.
///
/// The region always acquires the primitive it owns; callers only pick the
/// waiting policy and never see the primitive itself.
#[derive(Clone, Copy)]
pub enum AcquireMode<'c> {
    /// Block until held.
    Blocking,
    /// Give up with `SyncError::TimedOut` at the deadline.
    Until(Deadline),
    /// Wait as a cancellation point of a worker.
    Cancellable(&'c Context),
}

impl AcquireMode<'_> {
    pub(crate) fn acquire<'a, P>(self, prim: &'a P) -> Result<ScopedAccess<'a, P>>
    where
        P: Protect + ?Sized,
    {
        match self {
            Self::Blocking => ScopedAccess::new(prim),
            Self::Until(deadline) => ScopedAccess::new_until(prim, deadline),
            Self::Cancellable(ctx) => ctx.acquire(prim),
        }
    }
}

impl fmt::Debug for AcquireMode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking => f.write_str("Blocking"),
            Self::Until(d) => f.debug_tuple("Until").field(d).finish(),
            Self::Cancellable(ctx) => f.debug_tuple("Cancellable").field(&ctx.id()).finish(),
        }
    }
}

/// Anything whose value is reached through a scoped acquire of a single
/// exclusive primitive it owns. Lets worker contexts wait for it as a
/// cancellation point.
///
/// There is no way to hand a region some other primitive:
///
/// ```compile_fail
/// use libsync::{Guarded, Lock, Region, ScopedAccess};
/// let g = Guarded::new(0u64);
/// let other = Lock::new();
/// let _ = g.with_access(|_| ScopedAccess::new(&other), |v| *v += 1);
/// ```
pub trait Region {
    type Value;

    /// Take the region's primitive as `mode` says, run `f` on the value,
    /// release.
    fn with_access<R>(
        &self,
        mode: AcquireMode<'_>,
        f: impl FnOnce(&mut Self::Value) -> R,
    ) -> Result<R>;
}

/// A guarded region: `T` protected by exactly one exclusive primitive.
///
/// The region owns its primitive; no handle to it is given out, so the
/// only way in is through the acquire/release bracket below.
///
/// [`Guarded::with_lock`] is the single sanctioned access path. Each call is
/// atomic on its own; two calls (say a [`read`](Guarded::read) followed by a
/// [`write`](Guarded::write)) are not atomic as a pair.
pub struct Guarded<T, P: Protect = Lock> {
    prim: P,
    value: UnsafeCell<T>,
}

// Safety: `value` is only reached while `prim` is held, and `prim` admits a
// single holder (checked at construction).
unsafe impl<T: Send, P: Protect> Send for Guarded<T, P> {}
unsafe impl<T: Send, P: Protect> Sync for Guarded<T, P> {}

impl<T> Guarded<T, Lock> {
    /// Protect `value` with a fresh [`Lock`].
    pub fn new(value: T) -> Self {
        Self {
            prim: Lock::new(),
            value: UnsafeCell::new(value),
        }
    }
}

impl<T, P: Protect> Guarded<T, P> {
    /// Protect `value` with `prim`. The primitive must admit one holder.
    pub fn with_primitive(value: T, prim: P) -> Result<Self> {
        let holders = prim.max_holders();
        if holders != 1 {
            return Err(SyncError::invalid(format!(
                "guarded region needs an exclusive primitive, got one admitting {holders} holders"
            )));
        }
        Ok(Self {
            prim,
            value: UnsafeCell::new(value),
        })
    }

    /// Acquire, run `f` on the value, release. The primitive is released on
    /// every exit path; a panic inside `f` resumes after the release.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let access = ScopedAccess::new(&self.prim)?;
        Ok(self.run(access, f))
    }

    /// Like [`with_lock`](Self::with_lock) for a mutator that can fail. The
    /// failure propagates after the primitive has been released.
    pub fn try_with_lock<R, E>(&self, f: impl FnOnce(&mut T) -> Result<R, E>) -> Result<R, E>
    where
        E: From<SyncError>,
    {
        let access = ScopedAccess::new(&self.prim)?;
        self.run(access, f)
    }

    /// Bounded variant: `SyncError::TimedOut` if the primitive could not be
    /// taken within `timeout`.
    pub fn with_lock_within<R>(&self, timeout: Duration, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let access = ScopedAccess::new_until(&self.prim, Deadline::after(timeout))?;
        Ok(self.run(access, f))
    }

    // `access` is dropped when this returns or unwinds, so the primitive is
    // released before the caller sees the result or the panic.
    fn run<R>(&self, access: ScopedAccess<'_, P>, f: impl FnOnce(&mut T) -> R) -> R {
        let _access = access;
        // Safety: `_access` proves the exclusive primitive is held by us.
        let value = unsafe { &mut *self.value.get() };
        f(value)
    }

    /// Snapshot of the value under the primitive.
    pub fn read(&self) -> Result<T>
    where
        T: Clone,
    {
        self.with_lock(|v| v.clone())
    }

    /// Overwrite the value under the primitive.
    pub fn write(&self, value: T) -> Result<()> {
        self.with_lock(|v| *v = value)
    }

    /// Whether the protecting primitive is held right now. Advisory.
    pub fn is_locked(&self) -> bool {
        self.prim.is_held()
    }

    /// Exclusive access through `&mut self` needs no locking.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T, P: Protect> Region for Guarded<T, P> {
    type Value = T;

    fn with_access<R>(&self, mode: AcquireMode<'_>, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let access = mode.acquire(&self.prim)?;
        Ok(self.run(access, f))
    }
}

impl<T: Default> Default for Guarded<T, Lock> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T, P: Protect> fmt::Debug for Guarded<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guarded").finish_non_exhaustive()
    }
}
