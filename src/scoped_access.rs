// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// RAII guard that holds a synchronization primitive for the lifetime of the
// access and releases it on drop, including during unwinding.

use std::marker::PhantomData;

use crate::{Deadline, Result};

/// A primitive that can protect a region: an exclusive lock, a binary
/// permit, or a process-shared mutex.
///
/// # Safety
///
/// When [`max_holders`](Protect::max_holders) returns 1, a successful
/// `enter`/`try_enter`/`enter_until` must exclude every other holder until
/// the matching `leave`. [`Guarded`](crate::Guarded) hands out `&mut T`
/// on that promise.
pub unsafe trait Protect: Send + Sync {
    /// Block until the primitive is held by the caller.
    fn enter(&self) -> Result<()>;

    /// Non-blocking attempt. `Ok(false)` means busy.
    fn try_enter(&self) -> Result<bool>;

    /// Block until held or `deadline` passes (`SyncError::TimedOut`).
    fn enter_until(&self, deadline: Deadline) -> Result<()>;

    /// Give the primitive back.
    fn leave(&self) -> Result<()>;

    /// How many units may hold the primitive at once. A region only
    /// accepts primitives for which this is 1.
    fn max_holders(&self) -> u32 {
        1
    }

    /// Whether the primitive is currently held by anyone. Advisory.
    fn is_held(&self) -> bool;
}

/// RAII guard: the primitive is held from construction until drop.
///
/// Not `Send`: owner-tracked primitives must be released by the thread that
/// acquired them.
pub struct ScopedAccess<'a, P: Protect + ?Sized> {
    prim: &'a P,
    held: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a, P: Protect + ?Sized> ScopedAccess<'a, P> {
    /// Acquire `prim`, blocking.
    pub fn new(prim: &'a P) -> Result<Self> {
        prim.enter()?;
        Ok(Self::held(prim))
    }

    /// Acquire `prim` without blocking. `Ok(None)` if busy.
    pub fn try_new(prim: &'a P) -> Result<Option<Self>> {
        if prim.try_enter()? {
            Ok(Some(Self::held(prim)))
        } else {
            Ok(None)
        }
    }

    /// Acquire `prim`, giving up at `deadline`.
    pub fn new_until(prim: &'a P, deadline: Deadline) -> Result<Self> {
        prim.enter_until(deadline)?;
        Ok(Self::held(prim))
    }

    /// Wrap a primitive the caller has already entered.
    pub(crate) fn held(prim: &'a P) -> Self {
        Self {
            prim,
            held: true,
            _not_send: PhantomData,
        }
    }

    pub fn primitive(&self) -> &'a P {
        self.prim
    }

    /// Release now and report the outcome instead of swallowing it in `drop`.
    pub fn release(mut self) -> Result<()> {
        self.held = false;
        self.prim.leave()
    }
}

impl<P: Protect + ?Sized> Drop for ScopedAccess<'_, P> {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = self.prim.leave() {
                tracing::warn!(error = %e, "failed to release primitive on scope exit");
            }
        }
    }
}
