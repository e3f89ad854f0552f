// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Synchronized access to shared state: an owner-tracked lock, a bounded
// counting semaphore, guarded regions reached only through scoped acquires,
// and cancellable workers with explicit payload ownership. Process-shared
// variants sit on named POSIX shared memory.

mod error;
pub use error::{Result, SyncError, UsageError};

mod deadline;
pub use deadline::Deadline;

mod scoped_access;
pub use scoped_access::{Protect, ScopedAccess};

mod lock;
pub use lock::Lock;

mod semaphore;
pub use semaphore::{Semaphore, PERMIT_MAX};

mod region;
pub use region::{AcquireMode, Guarded, Region};

mod counter;
pub use counter::SharedCounter;

mod cancel;
pub use cancel::{CancelState, CancelToken, CancelType, Canceller};

pub mod worker;
pub use worker::{
    Builder, Context, Failure, Joined, Outcome, Ownership, Payload, Termination, WorkerHandle,
    WorkerId, WorkerState, CANCEL_POLL_INTERVAL, MIN_STACK_SIZE,
};

mod coordinator;
pub use coordinator::Coordinator;

pub mod pipe;
pub use pipe::{ByteSink, ByteSource, Fifo, PipeReader, PipeWriter};

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod mutex;
pub use mutex::IpcMutex;

mod shm_region;
pub use shm_region::{ShmGuarded, ShmValue};
