// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

#[cfg(not(unix))]
compile_error!("libsync's process-shared primitives require a POSIX target");

pub mod posix;

pub use posix::{PlatformMutex, PlatformShm, ShmMode};
