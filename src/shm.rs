// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named shared-memory segment handle.

use std::io;

use crate::platform::{PlatformShm, ShmMode};
use crate::{Result, SyncError};

/// How to open a named segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmOpenMode {
    /// Fail if the name already exists.
    Create,
    /// Fail if the name does not exist.
    Open,
    CreateOrOpen,
}

impl From<ShmOpenMode> for ShmMode {
    fn from(mode: ShmOpenMode) -> Self {
        match mode {
            ShmOpenMode::Create => ShmMode::Create,
            ShmOpenMode::Open => ShmMode::Open,
            ShmOpenMode::CreateOrOpen => ShmMode::CreateOrOpen,
        }
    }
}

/// A named shared-memory segment mapped into this process.
///
/// Every handle bumps a reference counter stored after the user bytes; the
/// segment is unlinked when the last handle, in any process, goes away.
pub struct ShmHandle {
    inner: PlatformShm,
}

impl ShmHandle {
    /// Map `size` user-visible bytes of the segment called `name`.
    /// A freshly created segment is zero-filled.
    pub fn acquire(name: &str, size: usize, mode: ShmOpenMode) -> Result<Self> {
        let inner = PlatformShm::acquire(name, size, mode.into()).map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                SyncError::TimedOut
            } else {
                SyncError::Io(e)
            }
        })?;
        tracing::trace!(shm = inner.name(), size, creator = inner.is_creator(), "shm mapped");
        Ok(Self { inner })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.inner.as_mut_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.as_mut_ptr()
    }

    pub fn user_size(&self) -> usize {
        self.inner.user_size()
    }

    /// Mapped bytes, including the trailing reference counter.
    pub fn mapped_size(&self) -> usize {
        self.inner.mapped_size()
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Whether this handle was the first to map the segment, and so
    /// responsible for initialising its contents.
    pub fn is_creator(&self) -> bool {
        self.inner.is_creator()
    }

    /// Handles currently mapping the segment, across processes.
    pub fn ref_count(&self) -> i32 {
        self.inner.ref_count()
    }

    /// Remove the name now. Existing mappings stay valid.
    pub fn unlink(&self) {
        self.inner.unlink();
    }

    /// Remove a segment by name without opening it.
    pub fn clear_storage(name: &str) {
        PlatformShm::unlink_by_name(name);
    }
}

impl std::fmt::Debug for ShmHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmHandle")
            .field("name", &self.name())
            .field("user_size", &self.user_size())
            .field("creator", &self.is_creator())
            .finish()
    }
}
