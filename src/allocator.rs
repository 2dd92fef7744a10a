// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Segment allocator clients: the handoff point between producer and consumer.
//
// A claim grants exclusive use of one segment until it is released. Claims
// never block; callers poll.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::AllocatorEndpoint;
use crate::error::{Error, Result};
use crate::ring::{IdRing, RingLayout};
use crate::shm::{ShmHandle, ShmOpenMode};
use crate::shm_name;

/// Identifier of one shared memory segment. Valid ids are positive.
pub type SegmentId = i32;

/// Producer-side pool of ready segments.
pub trait SegmentAllocator {
    /// One non-blocking attempt to take a ready segment. `Ok(None)` means
    /// nothing is ready yet. An error means the connection is unusable.
    ///
    /// `hint` is the caller's remaining budget; implementations may ignore it.
    fn claim(&mut self, hint: Duration) -> Result<Option<SegmentId>>;

    /// Hand `id` back to the pool.
    fn release(&mut self, id: SegmentId) -> Result<()>;
}

impl<A: SegmentAllocator + ?Sized> SegmentAllocator for &mut A {
    fn claim(&mut self, hint: Duration) -> Result<Option<SegmentId>> {
        (**self).claim(hint)
    }

    fn release(&mut self, id: SegmentId) -> Result<()> {
        (**self).release(id)
    }
}

impl<A: SegmentAllocator + ?Sized> SegmentAllocator for Box<A> {
    fn claim(&mut self, hint: Duration) -> Result<Option<SegmentId>> {
        (**self).claim(hint)
    }

    fn release(&mut self, id: SegmentId) -> Result<()> {
        (**self).release(id)
    }
}

// ---------------------------------------------------------------------------
// Shared memory pool layout
// ---------------------------------------------------------------------------

/// "SMEMPOOL" — written last by the creator once both rings are reset.
const POOL_MAGIC: u64 = 0x4c4f_4f50_4d45_4d53;

#[repr(C)]
struct PoolLayout {
    magic: AtomicU64,
    _pad: [u8; 64 - 8],
    /// producer → consumer
    ready: RingLayout,
    /// consumer → producer
    free: RingLayout,
}

const POOL_SIZE: usize = std::mem::size_of::<PoolLayout>();

fn layout_of(shm: &ShmHandle) -> &PoolLayout {
    // mmap returns page-aligned memory at least POOL_SIZE bytes long.
    unsafe { &*(shm.as_ptr() as *const PoolLayout) }
}

// ---------------------------------------------------------------------------
// ShmPoolAllocator — consumer end of a named pool
// ---------------------------------------------------------------------------

/// Consumer end of a shared memory pool created by the producer.
///
/// The pool holds two rings: ids ready for reading and ids handed back.
#[derive(Debug)]
pub struct ShmPoolAllocator {
    shm: ShmHandle,
}

impl ShmPoolAllocator {
    /// Open the pool serving `endpoint`. Never creates it.
    pub fn connect(endpoint: &AllocatorEndpoint) -> Result<Self> {
        let name = shm_name::pool_name(endpoint);
        let shm = ShmHandle::acquire(&name, POOL_SIZE, ShmOpenMode::Open)
            .map_err(|e| Error::Connection(format!("cannot open pool for {endpoint}: {e}")))?;
        if layout_of(&shm).magic.load(Ordering::Acquire) != POOL_MAGIC {
            return Err(Error::Connection(format!("pool for {endpoint} is not initialised")));
        }
        debug!(%endpoint, pool = shm.name(), "connected to segment pool");
        Ok(Self { shm })
    }

    fn ready(&self) -> IdRing<'_> {
        IdRing::new(&layout_of(&self.shm).ready)
    }

    fn free(&self) -> IdRing<'_> {
        IdRing::new(&layout_of(&self.shm).free)
    }

    /// Segments waiting to be claimed.
    pub fn pending(&self) -> usize {
        self.ready().len()
    }
}

impl SegmentAllocator for ShmPoolAllocator {
    fn claim(&mut self, _hint: Duration) -> Result<Option<SegmentId>> {
        if layout_of(&self.shm).magic.load(Ordering::Acquire) != POOL_MAGIC {
            return Err(Error::Connection(format!("pool {} was torn down", self.shm.name())));
        }
        match self.ready().pop() {
            Some(id) if id > 0 => Ok(Some(id)),
            Some(id) => {
                warn!(id, "ignoring non-positive segment id");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn release(&mut self, id: SegmentId) -> Result<()> {
        if self.free().push(id) {
            Ok(())
        } else {
            Err(Error::release(id, "free ring is full"))
        }
    }
}

// ---------------------------------------------------------------------------
// PoolHost — producer end, owns the pool
// ---------------------------------------------------------------------------

/// Creator of a named pool. Publishes ready ids and reclaims released ones.
/// The pool is unlinked when the host is dropped.
#[derive(Debug)]
pub struct PoolHost {
    shm: ShmHandle,
}

impl PoolHost {
    pub fn create(endpoint: &AllocatorEndpoint) -> Result<Self> {
        let name = shm_name::pool_name(endpoint);
        let shm = ShmHandle::acquire(&name, POOL_SIZE, ShmOpenMode::Create)?;
        let layout = layout_of(&shm);
        IdRing::new(&layout.ready).reset();
        IdRing::new(&layout.free).reset();
        layout.magic.store(POOL_MAGIC, Ordering::Release);
        Ok(Self { shm })
    }

    /// Make `id` claimable. Returns `false` if the ready ring is full.
    pub fn publish(&self, id: SegmentId) -> bool {
        IdRing::new(&layout_of(&self.shm).ready).push(id)
    }

    /// Take back one released id.
    pub fn reclaim(&self) -> Option<SegmentId> {
        IdRing::new(&layout_of(&self.shm).free).pop()
    }

    /// Mark the pool unusable for connected consumers.
    pub fn shut_down(&self) {
        layout_of(&self.shm).magic.store(0, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// LocalPool — in-process allocator
// ---------------------------------------------------------------------------

/// In-process pool over a queue of ids. Tracks outstanding claims so that
/// leaked segments are visible. Non-positive ids are skipped, as by
/// [`ShmPoolAllocator`].
#[derive(Debug, Default)]
pub struct LocalPool {
    ready: VecDeque<SegmentId>,
    claimed: HashSet<SegmentId>,
    released: Vec<SegmentId>,
    broken: Option<String>,
}

impl LocalPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ready(ids: impl IntoIterator<Item = SegmentId>) -> Self {
        Self {
            ready: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn publish(&mut self, id: SegmentId) {
        self.ready.push_back(id);
    }

    /// Make every further claim fail with `Error::Connection`.
    pub fn break_connection(&mut self, message: impl Into<String>) {
        self.broken = Some(message.into());
    }

    /// Ids claimed and not yet released.
    pub fn outstanding(&self) -> usize {
        self.claimed.len()
    }

    /// Ids still waiting to be claimed.
    pub fn pending(&self) -> usize {
        self.ready.len()
    }

    /// Released ids in release order.
    pub fn released(&self) -> &[SegmentId] {
        &self.released
    }
}

impl SegmentAllocator for LocalPool {
    fn claim(&mut self, _hint: Duration) -> Result<Option<SegmentId>> {
        if let Some(msg) = &self.broken {
            return Err(Error::Connection(msg.clone()));
        }
        match self.ready.pop_front() {
            Some(id) if id > 0 => {
                self.claimed.insert(id);
                Ok(Some(id))
            }
            Some(id) => {
                warn!(id, "ignoring non-positive segment id");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn release(&mut self, id: SegmentId) -> Result<()> {
        if !self.claimed.remove(&id) {
            return Err(Error::release(id, "segment was not claimed"));
        }
        self.released.push(id);
        Ok(())
    }
}
