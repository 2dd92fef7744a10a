// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX implementation of the shared memory primitives:
// - named regions (`shm_open` + `mmap`) for allocator pools and named segments
// - SysV attachments (`shmat` / `shmdt`) for integer segment identifiers

use std::ffi::CString;
use std::io;
use std::ptr;

use crate::shm_name;

// ---------------------------------------------------------------------------
// PlatformShm — POSIX named shared memory
// ---------------------------------------------------------------------------

pub struct PlatformShm {
    mem: *mut u8,
    size: usize,
    name: String, // POSIX name (with leading '/')
    writable: bool,
    owner: bool, // created by this handle; unlinked on drop
}

// Safety: the shared memory region is process-shared by design.
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

/// Open mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmMode {
    /// Create exclusively with the requested size; unlinked when dropped.
    Create,
    /// Open an existing region read/write.
    Open,
    /// Open an existing region read-only.
    OpenReadOnly,
}

impl PlatformShm {
    /// Acquire a named region.
    ///
    /// For the open modes `size` is a lower bound (0 accepts any size) and
    /// the whole existing object is mapped.
    pub fn acquire(name: &str, size: usize, mode: ShmMode) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        if mode == ShmMode::Create && size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        let posix_name = shm_name::make_shm_name(name);
        let c_name = CString::new(posix_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let perms: libc::mode_t = 0o666;
        let oflag = match mode {
            ShmMode::Create => libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
            ShmMode::Open => libc::O_RDWR,
            ShmMode::OpenReadOnly => libc::O_RDONLY,
        };
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), oflag, perms as libc::c_uint) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        let mapped = match mode {
            ShmMode::Create => {
                // Ensure permissions regardless of umask.
                unsafe { libc::fchmod(fd, perms) };
                if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
                    let err = io::Error::last_os_error();
                    unsafe {
                        libc::close(fd);
                        libc::shm_unlink(c_name.as_ptr());
                    }
                    return Err(err);
                }
                size
            }
            ShmMode::Open | ShmMode::OpenReadOnly => match object_size(fd) {
                Ok(actual) if actual >= size.max(1) => actual,
                Ok(actual) => {
                    unsafe { libc::close(fd) };
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("{posix_name} is {actual} bytes, expected at least {size}"),
                    ));
                }
                Err(e) => {
                    unsafe { libc::close(fd) };
                    return Err(e);
                }
            },
        };

        let writable = mode != ShmMode::OpenReadOnly;
        let prot = if writable {
            libc::PROT_READ | libc::PROT_WRITE
        } else {
            libc::PROT_READ
        };
        let mem = unsafe { libc::mmap(ptr::null_mut(), mapped, prot, libc::MAP_SHARED, fd, 0) };
        unsafe { libc::close(fd) };

        if mem == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            if mode == ShmMode::Create {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
            }
            return Err(err);
        }

        Ok(Self {
            mem: mem as *mut u8,
            size: mapped,
            name: posix_name,
            writable,
            owner: mode == ShmMode::Create,
        })
    }

    /// Pointer to the start of the mapping.
    pub fn as_ptr(&self) -> *const u8 {
        self.mem
    }

    /// Mutable pointer to the mapping. `None` for read-only mappings.
    pub fn as_mut_ptr(&self) -> Option<*mut u8> {
        self.writable.then_some(self.mem)
    }

    /// Mapped size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// POSIX name (with leading '/').
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unmap explicitly, reporting `munmap` failure. The handle is consumed
    /// either way.
    pub fn unmap(mut self) -> io::Result<()> {
        let ret = unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        let result = if ret == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        };
        self.mem = ptr::null_mut();
        if self.owner {
            Self::unlink_by_name(&self.name);
        }
        result
    }

    /// Unlink a named shm segment by name.
    pub fn unlink_by_name(name: &str) {
        let posix_name = shm_name::make_shm_name(name);
        if let Ok(c_name) = CString::new(posix_name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        if self.mem.is_null() {
            return;
        }
        unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        if self.owner {
            Self::unlink_by_name(&self.name);
        }
    }
}

fn object_size(fd: libc::c_int) -> io::Result<usize> {
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(st.st_size as usize)
}

// ---------------------------------------------------------------------------
// SysvAttachment — read-only attach of a SysV segment by identifier
// ---------------------------------------------------------------------------

pub struct SysvAttachment {
    mem: *const u8,
    size: usize,
    id: i32,
}

// Safety: the attachment is read-only and owned by one claim at a time.
unsafe impl Send for SysvAttachment {}

impl SysvAttachment {
    /// Attach segment `id` read-only. The length comes from `IPC_STAT`.
    pub fn attach(id: i32) -> io::Result<Self> {
        let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
        if unsafe { libc::shmctl(id, libc::IPC_STAT, &mut ds) } == -1 {
            return Err(io::Error::last_os_error());
        }

        let mem = unsafe { libc::shmat(id, ptr::null(), libc::SHM_RDONLY) };
        if mem as isize == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            mem: mem as *const u8,
            size: ds.shm_segsz as usize,
            id,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mem
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Detach, reporting `shmdt` failure.
    pub fn detach(mut self) -> io::Result<()> {
        let mem = std::mem::replace(&mut self.mem, ptr::null());
        if unsafe { libc::shmdt(mem as *const libc::c_void) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for SysvAttachment {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe { libc::shmdt(self.mem as *const libc::c_void) };
        }
    }
}
