// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cancellable workers: OS threads with explicit payload ownership, deferred
// cooperative cancellation and single-shot join.
//
// Lifecycle: Created -> Running -> (CancelRequested) -> Terminated{Normal,
// Cancelled, Failed}. Only `join` may hand a shared payload or a result back.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::cancel::{CancelState, CancelToken, CancelType};
use crate::region::{AcquireMode, Region};
use crate::scoped_access::{Protect, ScopedAccess};
use crate::{Deadline, Result, SyncError, UsageError};

/// Smallest stack a worker may be given (`PTHREAD_STACK_MIN` on Linux).
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// How often a blocking acquire inside a worker re-checks for cancellation.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(5);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique worker identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Who releases the spawn-time payload. Fixed at spawn, never renegotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The worker drops the payload on its own thread before terminating.
    Consumes,
    /// The payload outlives the worker and is handed back by `join`.
    Shares,
}

/// Spawn-time argument tagged with its ownership.
#[derive(Debug)]
pub enum Payload<T> {
    Consumes(T),
    Shares(T),
}

impl<T> Payload<T> {
    pub fn ownership(&self) -> Ownership {
        match self {
            Self::Consumes(_) => Ownership::Consumes,
            Self::Shares(_) => Ownership::Shares,
        }
    }

    fn split(self) -> (Ownership, T) {
        match self {
            Self::Consumes(v) => (Ownership::Consumes, v),
            Self::Shares(v) => (Ownership::Shares, v),
        }
    }
}

impl Payload<()> {
    /// No argument at all.
    pub fn none() -> Self {
        Self::Consumes(())
    }
}

/// How a worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Normal,
    Cancelled,
    Failed,
}

/// Observable lifecycle position of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    CancelRequested,
    Terminated(Termination),
}

impl WorkerState {
    fn encode(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Running => 1,
            Self::CancelRequested => 2,
            Self::Terminated(Termination::Normal) => 3,
            Self::Terminated(Termination::Cancelled) => 4,
            Self::Terminated(Termination::Failed) => 5,
        }
    }

    fn decode(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::CancelRequested,
            3 => Self::Terminated(Termination::Normal),
            4 => Self::Terminated(Termination::Cancelled),
            _ => Self::Terminated(Termination::Failed),
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

/// Why a worker failed.
#[derive(Debug, Error)]
pub enum Failure {
    #[error("{0}")]
    Error(SyncError),
    #[error("panicked: {0}")]
    Panicked(String),
}

/// Terminal result of a worker. `Cancelled` is an outcome, not a failure.
#[derive(Debug)]
pub enum Outcome<R> {
    Finished(R),
    Cancelled,
    Failed(Failure),
}

impl<R> Outcome<R> {
    pub fn termination(&self) -> Termination {
        match self {
            Self::Finished(_) => Termination::Normal,
            Self::Cancelled => Termination::Cancelled,
            Self::Failed(_) => Termination::Failed,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The routine's return value, if it finished normally.
    pub fn into_value(self) -> Option<R> {
        match self {
            Self::Finished(r) => Some(r),
            _ => None,
        }
    }
}

/// What `join` hands back: the outcome and, for `Shares`, the payload.
#[derive(Debug)]
pub struct Joined<R, T> {
    pub outcome: Outcome<R>,
    pub payload: Option<T>,
}

struct Shared {
    state: AtomicU8,
    token: CancelToken,
}

impl Shared {
    // A request delivered through a broadcast token shows up here too.
    fn state(&self) -> WorkerState {
        match WorkerState::decode(self.state.load(Ordering::Acquire)) {
            WorkerState::Running if self.token.is_requested() => WorkerState::CancelRequested,
            s => s,
        }
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.state
            .compare_exchange(from.encode(), to.encode(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn terminate(&self, how: Termination) {
        self.state
            .store(WorkerState::Terminated(how).encode(), Ordering::Release);
    }
}

// Restores the previous cancel state when a critical section ends,
// including by unwinding.
struct StateRestore<'a> {
    ctx: &'a Context,
    prev: CancelState,
}

impl Drop for StateRestore<'_> {
    fn drop(&mut self) {
        self.ctx.cancel_state.set(self.prev);
    }
}

/// The worker's own view of itself, passed to its routine.
///
/// Cancellation state and type belong to the worker and can only be changed
/// from inside the routine.
pub struct Context {
    id: WorkerId,
    name: Option<String>,
    token: CancelToken,
    cancel_state: Cell<CancelState>,
    cancel_type: Cell<CancelType>,
}

impl Context {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn cancel_state(&self) -> CancelState {
        self.cancel_state.get()
    }

    pub fn cancel_type(&self) -> CancelType {
        self.cancel_type.get()
    }

    /// Enable or disable cancellation. Returns the previous state.
    /// A pending request survives while disabled.
    pub fn set_cancel_state(&self, state: CancelState) -> CancelState {
        self.cancel_state.replace(state)
    }

    /// Switch between deferred and asynchronous cancellation. Returns the
    /// previous type.
    pub fn set_cancel_type(&self, ty: CancelType) -> CancelType {
        self.cancel_type.replace(ty)
    }

    /// Whether a request is pending. Not a cancellation point.
    pub fn is_cancel_requested(&self) -> bool {
        self.token.is_requested()
    }

    /// Explicit cancellation point.
    pub fn test_cancel(&self) -> Result<()> {
        if self.cancel_state() == CancelState::Enabled && self.token.is_requested() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    // Under asynchronous cancellation every context call is a point.
    fn async_point(&self) -> Result<()> {
        if self.cancel_type() == CancelType::Asynchronous {
            self.test_cancel()?;
        }
        Ok(())
    }

    /// Sleep for `duration`. A cancellation point: with cancellation enabled
    /// a request cuts the sleep short and returns `SyncError::Cancelled`.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        self.test_cancel()?;
        if self.cancel_state() == CancelState::Disabled {
            thread::sleep(duration);
            return self.async_point();
        }
        if self.token.sleep_until(Deadline::after(duration)) {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Blocking acquire that doubles as a cancellation point: while waiting
    /// the request flag is re-checked every [`CANCEL_POLL_INTERVAL`].
    pub fn acquire<'a, P: Protect + ?Sized>(&self, prim: &'a P) -> Result<ScopedAccess<'a, P>> {
        loop {
            self.test_cancel()?;
            if self.cancel_state() == CancelState::Disabled {
                return ScopedAccess::new(prim);
            }
            match ScopedAccess::new_until(prim, Deadline::after(CANCEL_POLL_INTERVAL)) {
                Err(SyncError::TimedOut) => continue,
                other => return other,
            }
        }
    }

    /// Scoped access to `region` from inside a worker.
    ///
    /// Waiting for the primitive is a cancellation point; the mutation runs
    /// with cancellation disabled, so a request arriving mid-mutation is
    /// honoured only after the primitive has been released.
    pub fn with_lock<G, R>(&self, region: &G, f: impl FnOnce(&mut G::Value) -> R) -> Result<R>
    where
        G: Region,
    {
        if self.cancel_type() == CancelType::Asynchronous {
            return Err(UsageError::AsyncCancelInCriticalSection.into());
        }
        region.with_access(AcquireMode::Cancellable(self), |v| {
            let _restore = self.disable();
            f(v)
        })
    }

    /// Run `f` with cancellation disabled, then restore the previous state.
    pub fn critical<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let out = {
            let _restore = self.disable();
            f()
        };
        self.async_point()?;
        Ok(out)
    }

    fn disable(&self) -> StateRestore<'_> {
        StateRestore {
            ctx: self,
            prev: self.set_cancel_state(CancelState::Disabled),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("cancel_state", &self.cancel_state.get())
            .field("cancel_type", &self.cancel_type.get())
            .finish()
    }
}

/// Worker attributes: name, stack size, joinability and initial
/// cancellation settings.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    name: Option<String>,
    stack_size: Option<usize>,
    detached: bool,
    cancel_state: CancelState,
    cancel_type: CancelType,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stack size in bytes; at least [`MIN_STACK_SIZE`].
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// A detached worker releases its resources on exit and cannot be joined.
    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    pub fn cancel_state(mut self, state: CancelState) -> Self {
        self.cancel_state = state;
        self
    }

    pub fn cancel_type(mut self, ty: CancelType) -> Self {
        self.cancel_type = ty;
        self
    }

    pub fn worker_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Start a worker running `routine` over `payload`.
    ///
    /// The routine gets the payload by mutable reference whatever the
    /// ownership. With `Consumes` the worker drops it before terminating;
    /// with `Shares` it comes back through [`WorkerHandle::join`].
    pub fn spawn<T, R, F>(self, payload: Payload<T>, routine: F) -> Result<WorkerHandle<R, T>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: FnOnce(&Context, &mut T) -> Result<R> + Send + 'static,
    {
        if let Some(bytes) = self.stack_size {
            if bytes < MIN_STACK_SIZE {
                return Err(SyncError::invalid(format!(
                    "stack size {bytes} below minimum {MIN_STACK_SIZE}"
                )));
            }
        }

        if self.detached && payload.ownership() == Ownership::Shares {
            return Err(SyncError::invalid(
                "a shared payload comes back through join; detached workers cannot share one",
            ));
        }

        let id = WorkerId::next();
        let shared = Arc::new(Shared {
            state: AtomicU8::new(WorkerState::Created.encode()),
            token: CancelToken::new(),
        });

        let mut tb = thread::Builder::new();
        if let Some(name) = &self.name {
            tb = tb.name(name.clone());
        }
        if let Some(bytes) = self.stack_size {
            tb = tb.stack_size(bytes);
        }

        let ctx = Context {
            id,
            name: self.name.clone(),
            token: shared.token.clone(),
            cancel_state: Cell::new(self.cancel_state),
            cancel_type: Cell::new(self.cancel_type),
        };
        let body_shared = Arc::clone(&shared);
        let ownership = payload.ownership();
        let handle = tb.spawn(move || run_worker(ctx, body_shared, payload, routine))?;

        tracing::debug!(
            worker = %id,
            name = ?self.name,
            ?ownership,
            detached = self.detached,
            "worker spawned"
        );

        let thread = if self.detached {
            drop(handle);
            None
        } else {
            Some(handle)
        };

        Ok(WorkerHandle {
            id,
            name: self.name,
            shared,
            thread,
            joinable: !self.detached,
        })
    }
}

/// Spawn a joinable worker with default attributes.
pub fn spawn<T, R, F>(payload: Payload<T>, routine: F) -> Result<WorkerHandle<R, T>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: FnOnce(&Context, &mut T) -> Result<R> + Send + 'static,
{
    Builder::new().spawn(payload, routine)
}

fn run_worker<T, R, F>(
    ctx: Context,
    shared: Arc<Shared>,
    payload: Payload<T>,
    routine: F,
) -> (Outcome<R>, Option<T>)
where
    F: FnOnce(&Context, &mut T) -> Result<R>,
{
    // A request that arrived before start leaves the state at CancelRequested.
    shared.transition(WorkerState::Created, WorkerState::Running);

    let (ownership, mut value) = payload.split();
    let result = panic::catch_unwind(AssertUnwindSafe(|| routine(&ctx, &mut value)));

    let payload = match ownership {
        Ownership::Consumes => {
            drop(value);
            None
        }
        Ownership::Shares => Some(value),
    };

    let outcome = match result {
        Ok(Ok(r)) => Outcome::Finished(r),
        Ok(Err(SyncError::Cancelled)) => Outcome::Cancelled,
        Ok(Err(e)) => Outcome::Failed(Failure::Error(e)),
        Err(p) => Outcome::Failed(Failure::Panicked(panic_message(p.as_ref()))),
    };
    let how = outcome.termination();
    shared.terminate(how);
    match &outcome {
        Outcome::Failed(f) => tracing::debug!(worker = %ctx.id, failure = %f, "worker failed"),
        _ => tracing::debug!(worker = %ctx.id, termination = ?how, "worker terminated"),
    }
    (outcome, payload)
}

fn panic_message(p: &(dyn Any + Send)) -> String {
    if let Some(s) = p.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = p.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Coordinator-side handle to a worker.
pub struct WorkerHandle<R, T = ()> {
    id: WorkerId,
    name: Option<String>,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<(Outcome<R>, Option<T>)>>,
    joinable: bool,
}

impl<R, T> WorkerHandle<R, T> {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    pub fn is_joinable(&self) -> bool {
        self.joinable
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminated()
    }

    /// Token observed by this worker, for registration with a
    /// [`Canceller`](crate::Canceller).
    pub fn token(&self) -> CancelToken {
        self.shared.token.clone()
    }

    /// Ask the worker to stop at its next cancellation point.
    /// Returns `false` when the worker had already terminated.
    pub fn request_cancel(&self) -> bool {
        if self.state().is_terminated() {
            return false;
        }
        self.shared.token.request();
        self.shared
            .transition(WorkerState::Running, WorkerState::CancelRequested);
        tracing::debug!(worker = %self.id, "cancellation requested");
        true
    }

    /// Wait for the worker to terminate and collect its outcome and, for a
    /// shared payload, the payload itself.
    pub fn join(&mut self) -> Result<Joined<R, T>> {
        if !self.joinable {
            return Err(UsageError::NotJoinable.into());
        }
        let handle = self.thread.take().ok_or(UsageError::AlreadyJoined)?;
        let (outcome, payload) = match handle.join() {
            Ok(done) => done,
            // Only reachable if dropping a consumed payload panicked.
            Err(p) => {
                self.shared.terminate(Termination::Failed);
                (Outcome::Failed(Failure::Panicked(panic_message(p.as_ref()))), None)
            }
        };
        Ok(Joined { outcome, payload })
    }
}

impl<R, T> fmt::Debug for WorkerHandle<R, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("joinable", &self.joinable)
            .finish()
    }
}

impl<R, T> Drop for WorkerHandle<R, T> {
    fn drop(&mut self) {
        if self.joinable && self.thread.is_some() {
            tracing::warn!(
                worker = %self.id,
                name = ?self.name,
                state = ?self.state(),
                "joinable worker dropped without join; its resources leak until exit"
            );
        }
    }
}
