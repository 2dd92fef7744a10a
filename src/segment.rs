// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Segment stores: attach a claimed segment id and expose it as bytes.
// Stores own no data; a mapping lives from `map` until `unmap`.

use std::collections::{HashMap, HashSet};
use std::io;

use crate::allocator::SegmentId;
use crate::error::{Error, Result};
use crate::shm::{ShmHandle, ShmOpenMode};
use crate::shm_name;

#[cfg(unix)]
use crate::platform::SysvAttachment;

/// A segment attached to this process.
pub trait MappedSegment {
    fn id(&self) -> SegmentId;

    /// The whole segment.
    fn bytes(&self) -> &[u8];
}

/// Maps segment ids to memory.
pub trait SegmentStore {
    type Segment: MappedSegment;

    /// Attach `id`. Fails with `Error::Map`.
    fn map(&mut self, id: SegmentId) -> Result<Self::Segment>;

    /// Detach a segment returned by `map`. Fails with `Error::Release`.
    fn unmap(&mut self, segment: Self::Segment) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SysV segments (`shmat` by integer id)
// ---------------------------------------------------------------------------

#[cfg(unix)]
pub struct SysvSegment {
    inner: SysvAttachment,
}

#[cfg(unix)]
impl MappedSegment for SysvSegment {
    fn id(&self) -> SegmentId {
        self.inner.id()
    }

    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.inner.as_ptr(), self.inner.size()) }
    }
}

/// Segment ids are SysV shared memory identifiers; segments are attached
/// read-only.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SysvSegmentStore;

#[cfg(unix)]
impl SegmentStore for SysvSegmentStore {
    type Segment = SysvSegment;

    fn map(&mut self, id: SegmentId) -> Result<SysvSegment> {
        SysvAttachment::attach(id)
            .map(|inner| SysvSegment { inner })
            .map_err(|source| Error::Map { id, source })
    }

    fn unmap(&mut self, segment: SysvSegment) -> Result<()> {
        let id = segment.id();
        segment
            .inner
            .detach()
            .map_err(|e| Error::release(id, format!("shmdt: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Named POSIX segments (`<prefix>_<id>`)
// ---------------------------------------------------------------------------

pub struct NamedSegment {
    id: SegmentId,
    shm: ShmHandle,
}

impl MappedSegment for NamedSegment {
    fn id(&self) -> SegmentId {
        self.id
    }

    fn bytes(&self) -> &[u8] {
        self.shm.bytes()
    }
}

/// Segment `n` is the POSIX region `<prefix>_<n>`, opened read-only.
#[derive(Debug, Clone)]
pub struct NamedSegmentStore {
    prefix: String,
}

impl NamedSegmentStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn segment_name(&self, id: SegmentId) -> String {
        shm_name::segment_name(&self.prefix, id)
    }
}

impl SegmentStore for NamedSegmentStore {
    type Segment = NamedSegment;

    fn map(&mut self, id: SegmentId) -> Result<NamedSegment> {
        ShmHandle::acquire(&self.segment_name(id), 0, ShmOpenMode::OpenReadOnly)
            .map(|shm| NamedSegment { id, shm })
            .map_err(|source| Error::Map { id, source })
    }

    fn unmap(&mut self, segment: NamedSegment) -> Result<()> {
        let id = segment.id;
        segment
            .shm
            .close()
            .map_err(|e| Error::release(id, format!("munmap: {e}")))
    }
}

// ---------------------------------------------------------------------------
// HeapSegmentStore — in-process segments
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct HeapSegment {
    id: SegmentId,
    data: Vec<u8>,
}

impl MappedSegment for HeapSegment {
    fn id(&self) -> SegmentId {
        self.id
    }

    fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Segments held in process memory, with injectable map and unmap failures.
#[derive(Debug, Default)]
pub struct HeapSegmentStore {
    segments: HashMap<SegmentId, Vec<u8>>,
    fail_map: HashSet<SegmentId>,
    fail_unmap: HashSet<SegmentId>,
    mapped: usize,
}

impl HeapSegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) the contents of segment `id`.
    pub fn insert(&mut self, id: SegmentId, data: Vec<u8>) {
        self.segments.insert(id, data);
    }

    /// The next `map(id)` fails with a permission error.
    pub fn fail_next_map(&mut self, id: SegmentId) {
        self.fail_map.insert(id);
    }

    /// The next `unmap` of `id` fails.
    pub fn fail_next_unmap(&mut self, id: SegmentId) {
        self.fail_unmap.insert(id);
    }

    /// Segments currently mapped.
    pub fn mapped(&self) -> usize {
        self.mapped
    }
}

impl SegmentStore for HeapSegmentStore {
    type Segment = HeapSegment;

    fn map(&mut self, id: SegmentId) -> Result<HeapSegment> {
        if self.fail_map.remove(&id) {
            return Err(Error::Map {
                id,
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }
        let data = self.segments.get(&id).cloned().ok_or_else(|| Error::Map {
            id,
            source: io::Error::from(io::ErrorKind::NotFound),
        })?;
        self.mapped += 1;
        Ok(HeapSegment { id, data })
    }

    fn unmap(&mut self, segment: HeapSegment) -> Result<()> {
        self.mapped -= 1;
        if self.fail_unmap.remove(&segment.id) {
            return Err(Error::release(segment.id, "injected unmap failure"));
        }
        Ok(())
    }
}
