// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX shm names for allocator pools and named frame segments.

use crate::config::AllocatorEndpoint;

/// FNV-1a 64-bit hash.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    data.iter().fold(0xcbf29ce484222325u64, |hash, &b| {
        (hash ^ b as u64).wrapping_mul(0x100000001b3)
    })
}

/// Maximum length for POSIX shm names. 0 disables shortening.
///
/// On macOS `PSHMNAMLEN` is 31. On Linux the limit is typically 255.
#[cfg(target_os = "macos")]
pub const SHM_NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
pub const SHM_NAME_MAX: usize = 0;

/// Produce a POSIX shm name (with leading '/').
///
/// Names longer than `SHM_NAME_MAX` become `/<prefix>_<16-hex-FNV-1a-hash>`.
pub fn make_shm_name(name: &str) -> String {
    let full = if name.starts_with('/') {
        name.to_owned()
    } else {
        format!("/{name}")
    };
    if SHM_NAME_MAX == 0 || full.len() <= SHM_NAME_MAX {
        return full;
    }

    // '/' + prefix + '_' + 16 hex digits
    let keep = SHM_NAME_MAX.saturating_sub(1 + 1 + 16);
    let body = &full[1..];
    let prefix: String = body.chars().take(keep).collect();
    format!("/{prefix}_{:016x}", fnv1a_64(full.as_bytes()))
}

/// Replace everything outside `[A-Za-z0-9_.-]` so the result is a single path
/// component.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') { c } else { '_' })
        .collect()
}

/// Name of the allocator pool serving `endpoint`.
pub fn pool_name(endpoint: &AllocatorEndpoint) -> String {
    format!(
        "smem_{}_{}_{}",
        sanitize(&endpoint.address),
        endpoint.port,
        sanitize(&endpoint.channel)
    )
}

/// Name of segment `id` in a named-segment store rooted at `prefix`.
pub fn segment_name(prefix: &str, id: i32) -> String {
    format!("{}_{id}", sanitize(prefix))
}
