// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cooperative cancellation: a request flag per worker plus a broadcast handle.
// A request is only a request; the worker acts on it at its next
// cancellation point, and only while cancellation is enabled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use crate::Deadline;

/// Whether a worker honours cancellation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelState {
    #[default]
    Enabled,
    /// Requests stay pending until cancellation is enabled again.
    Disabled,
}

/// When an honoured request takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelType {
    /// Only at cancellation points: sleeps, blocking acquires, channel
    /// reads and explicit checks.
    #[default]
    Deferred,
    /// At every interaction with the worker context. Critical sections are
    /// refused in this mode since a cancelled holder could leave a lock held.
    Asynchronous,
}

#[derive(Debug, Default)]
struct TokenInner {
    requested: AtomicBool,
    // Sleepers park here so a request wakes them at once.
    lock: Mutex<()>,
    wake: Condvar,
}

/// The request flag shared between a worker and whoever may cancel it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark cancellation as requested and wake any sleeper.
    /// Returns `false` if it was already requested.
    pub fn request(&self) -> bool {
        let first = !self.inner.requested.swap(true, Ordering::AcqRel);
        let _g = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.inner.wake.notify_all();
        first
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Sleep until `deadline` or until a request arrives, whichever is first.
    /// Returns `true` if woken by a request.
    pub(crate) fn sleep_until(&self, deadline: Deadline) -> bool {
        let mut g = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.is_requested() {
                return true;
            }
            let Some(left) = deadline.remaining() else {
                return false;
            };
            g = self
                .inner
                .wake
                .wait_timeout(g, left)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Broadcast handle over a set of workers' tokens.
///
/// Cheap to clone and safe to move into an interrupt handler: an external
/// interrupt becomes a single [`Canceller::cancel_all`]. Tokens are held
/// weakly; once every handle and context of a worker is gone its entry is
/// dropped on the next registration or broadcast.
#[derive(Debug, Clone, Default)]
pub struct Canceller {
    tokens: Arc<Mutex<Vec<Weak<TokenInner>>>>,
}

impl Canceller {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self) -> MutexGuard<'_, Vec<Weak<TokenInner>>> {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens.retain(|t| t.strong_count() > 0);
        tokens
    }

    pub fn register(&self, token: CancelToken) {
        self.live().push(Arc::downgrade(&token.inner));
    }

    /// Request cancellation of every registered worker still alive.
    /// Returns how many requests were new.
    pub fn cancel_all(&self) -> usize {
        let tokens = self.live();
        let fresh = tokens
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| CancelToken { inner })
            .filter(|t| t.request())
            .count();
        tracing::debug!(workers = tokens.len(), fresh, "cancellation broadcast");
        fresh
    }

    /// Registered tokens whose worker is still reachable.
    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
