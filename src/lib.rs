// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Consumer side of a shared-memory media frame transport.
// A producer publishes encoded frames in shared memory segments handed out by
// a segment allocator; this crate claims them, copies each frame out, returns
// the segment and rebuilds a monotonic timeline per stream.

#[cfg(not(unix))]
compile_error!("smem-source requires a unix target");

mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::{AllocatorEndpoint, SourceConfig};

pub mod shm_name;

#[cfg(unix)]
mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod ring;
pub use ring::RING_CAPACITY;

mod allocator;
pub use allocator::{LocalPool, PoolHost, SegmentAllocator, SegmentId, ShmPoolAllocator};

mod segment;
pub use segment::{
    HeapSegment, HeapSegmentStore, MappedSegment, NamedSegment, NamedSegmentStore, SegmentStore,
};
#[cfg(unix)]
pub use segment::{SysvSegment, SysvSegmentStore};

pub mod layout;

pub mod timeline;

mod registry;
pub use registry::{StreamInfo, StreamRegistry};

mod source;
pub use source::{Packet, Packets, PollStats, SmemSource};
