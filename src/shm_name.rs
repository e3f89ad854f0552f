// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX shared-memory object names.

/// FNV-1a, 64 bit.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    data.iter().fold(0xcbf2_9ce4_8422_2325, |h, &b| {
        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Longest name `shm_open` accepts, leading '/' included. 0 means no limit.
#[cfg(target_os = "macos")]
pub const SHM_NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
pub const SHM_NAME_MAX: usize = 0;

/// `name` with a leading '/', shortened to `/<prefix>_<hash>` when it would
/// exceed [`SHM_NAME_MAX`]. Distinct long names keep distinct hashes.
pub fn make_shm_name(name: &str) -> String {
    let full = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };
    if SHM_NAME_MAX == 0 || full.len() <= SHM_NAME_MAX {
        return full;
    }
    let hash = format!("{:016x}", fnv1a_64(full.as_bytes()));
    let keep = SHM_NAME_MAX.saturating_sub(hash.len() + 2);
    let prefix: String = full[1..].chars().take(keep).collect();
    format!("/{prefix}_{hash}")
}
