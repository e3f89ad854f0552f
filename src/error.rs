// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy shared by every primitive, the guarded region and workers.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Programming defects. Never retried; they abort the offending call only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("lock is already held by the calling thread")]
    Reentrant,
    #[error("release by a thread that does not hold the lock")]
    NotOwner,
    #[error("primitive used after destroy")]
    Destroyed,
    #[error("primitive destroyed while held or waited on")]
    Busy,
    #[error("worker already joined")]
    AlreadyJoined,
    #[error("worker was spawned detached and cannot be joined")]
    NotJoinable,
    #[error("critical section entered with asynchronous cancellation")]
    AsyncCancelInCriticalSection,
    #[error("mutex is held by a scoped access and only it may release it")]
    HeldByScope,
}

/// Errors raised by locks, permits, guarded regions, workers and channels.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("usage error: {0}")]
    Usage(#[from] UsageError),

    #[error("no permit available")]
    Unavailable,

    #[error("timed out")]
    TimedOut,

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("permit count would exceed bound {bound}")]
    Overflow { bound: u32 },

    /// Raised at a cancellation point; a worker routine returning it
    /// terminates as cancelled, not failed.
    #[error("cancelled")]
    Cancelled,

    #[error("channel closed after {transferred} of {requested} bytes")]
    Closed { transferred: usize, requested: usize },

    #[error("routine failed: {0}")]
    Routine(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SyncError {
    /// Shorthand for [`SyncError::InvalidValue`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    /// Shorthand for an application failure inside a worker routine.
    pub fn routine(msg: impl std::fmt::Display) -> Self {
        Self::Routine(msg.to_string())
    }

    /// Expected contention outcome the caller may retry or back off from.
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Unavailable | Self::TimedOut)
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The usage defect, if this is one.
    pub fn usage(&self) -> Option<UsageError> {
        match self {
            Self::Usage(u) => Some(*u),
            _ => None,
        }
    }

    /// Map a raw pthread error number. `EDEADLK` and `EPERM` are the
    /// error-checking mutex reporting a usage defect.
    #[cfg(unix)]
    pub(crate) fn from_errno(eno: i32) -> Self {
        match eno {
            libc::EDEADLK => Self::Usage(UsageError::Reentrant),
            libc::EPERM => Self::Usage(UsageError::NotOwner),
            libc::ETIMEDOUT => Self::TimedOut,
            _ => Self::Io(io::Error::from_raw_os_error(eno)),
        }
    }
}

impl From<SyncError> for io::Error {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Io(e) => e,
            SyncError::TimedOut => io::Error::new(io::ErrorKind::TimedOut, e),
            SyncError::Unavailable => io::Error::new(io::ErrorKind::WouldBlock, e),
            SyncError::InvalidValue(_) => io::Error::new(io::ErrorKind::InvalidInput, e),
            SyncError::Closed { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            SyncError::Cancelled => io::Error::new(io::ErrorKind::Interrupted, e),
            other => io::Error::other(other),
        }
    }
}
