// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named shared memory handle.
// Delegates to platform::PlatformShm.

use std::io;

use crate::platform::{PlatformShm, ShmMode};

/// Open mode for named shared memory regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmOpenMode {
    /// Create exclusively — fail if it already exists. The creating handle
    /// unlinks the region when dropped.
    Create,
    /// Open existing read/write — fail if it does not exist.
    Open,
    /// Open existing read-only.
    OpenReadOnly,
}

/// A named, inter-process shared memory region.
pub struct ShmHandle {
    inner: PlatformShm,
}

impl ShmHandle {
    /// Acquire a named region of at least `size` bytes.
    pub fn acquire(name: &str, size: usize, mode: ShmOpenMode) -> io::Result<Self> {
        let platform_mode = match mode {
            ShmOpenMode::Create => ShmMode::Create,
            ShmOpenMode::Open => ShmMode::Open,
            ShmOpenMode::OpenReadOnly => ShmMode::OpenReadOnly,
        };
        let inner = PlatformShm::acquire(name, size, platform_mode)?;
        Ok(Self { inner })
    }

    /// Pointer to the start of the region.
    pub fn as_ptr(&self) -> *const u8 {
        self.inner.as_ptr()
    }

    /// Mutable pointer, or `None` when mapped read-only.
    pub fn as_mut_ptr(&self) -> Option<*mut u8> {
        self.inner.as_mut_ptr()
    }

    /// The mapped region as a byte slice.
    pub fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.inner.as_ptr(), self.inner.size()) }
    }

    /// Mapped size in bytes.
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// The platform name used to open the region.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Unmap now and report failure instead of ignoring it in `Drop`.
    pub fn close(self) -> io::Result<()> {
        self.inner.unmap()
    }

    /// Remove a named region without needing an open handle.
    pub fn unlink_by_name(name: &str) {
        PlatformShm::unlink_by_name(name);
    }
}

impl std::fmt::Debug for ShmHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmHandle")
            .field("name", &self.name())
            .field("size", &self.size())
            .finish()
    }
}
