// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The consumer poll loop.
//
// Every read claims a segment, maps it, decodes its header, copies what it
// needs out, unmaps, releases, and only then rebuilds timestamps. Nothing
// borrowed from a segment outlives that sequence. Waiting is a bounded
// sleep/poll loop against a per-call deadline.

use std::thread;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::allocator::{SegmentAllocator, SegmentId, ShmPoolAllocator};
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::layout::{FrameDescriptor, StreamTable};
use crate::registry::{StreamInfo, StreamRegistry};
use crate::segment::{MappedSegment, SegmentStore};

#[cfg(unix)]
use crate::segment::SysvSegmentStore;

/// One frame on the output timeline. The caller owns the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub stream_index: usize,
    /// Presentation timestamp in output ticks (1/1,000,000 s).
    pub pts: i64,
    /// Decode timestamp in output ticks (1/1,000,000 s).
    pub dts: i64,
    pub key: bool,
    pub data: Vec<u8>,
}

/// Counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub delivered: u64,
    pub discarded: u64,
    pub map_failures: u64,
    pub release_failures: u64,
}

/// Consumer of a shared-memory frame transport.
pub struct SmemSource<A, S> {
    config: SourceConfig,
    allocator: A,
    store: S,
    registry: StreamRegistry,
    stats: PollStats,
}

#[cfg(unix)]
impl SmemSource<ShmPoolAllocator, SysvSegmentStore> {
    /// Connect to the pool named by `config.endpoint`, read the stream table
    /// and register its streams.
    pub fn open(config: SourceConfig) -> Result<Self> {
        let allocator = ShmPoolAllocator::connect(&config.endpoint).inspect_err(|e| {
            error!(endpoint = %config.endpoint, error = %e, "connection failed");
        })?;
        Self::with_parts(config, allocator, SysvSegmentStore)
    }
}

impl<A: SegmentAllocator, S: SegmentStore> SmemSource<A, S> {
    /// Read the stream table through caller-supplied collaborators.
    ///
    /// Fails with `Error::Decode` when the first segment does not hold a
    /// valid stream table.
    pub fn with_parts(config: SourceConfig, allocator: A, store: S) -> Result<Self> {
        let mut source = Self {
            config,
            allocator,
            store,
            registry: StreamRegistry::new(),
            stats: PollStats::default(),
        };

        // The first segment is the table. A table that fails to decode ends
        // startup; the next segment would be a frame.
        let started = Instant::now();
        let table = source
            .take_segment(started, |bytes| Ok(StreamTable::decode(bytes)))?
            .inspect_err(|e| error!(error = %e, "cannot decode stream table"))?;
        source.registry = StreamRegistry::from_table(&table);
        info!(
            declared = table.streams.len(),
            registered = source.registry.len(),
            "stream table loaded"
        );
        Ok(source)
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Registered streams in index order.
    pub fn streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.registry.streams()
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.allocator
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn stats(&self) -> PollStats {
        self.stats
    }

    /// Wait for the next frame and return it on the output timeline.
    ///
    /// `Error::Timeout` means no usable frame arrived within the configured
    /// timeout; it marks the end of the stream. `Error::Connection` is fatal.
    pub fn read_packet(&mut self) -> Result<Packet> {
        let started = Instant::now();
        loop {
            let (frame, data) = self.take_segment(started, |bytes| {
                let frame = FrameDescriptor::decode(bytes)?;
                Ok((frame, frame.payload(bytes).to_vec()))
            })?;

            match self.registry.reconstruct(&frame) {
                Ok(ts) => {
                    self.stats.delivered += 1;
                    let packet = Packet {
                        stream_index: frame.stream_index as usize,
                        pts: ts.pts,
                        dts: ts.dts,
                        key: frame.key,
                        data,
                    };
                    debug!(
                        stream = packet.stream_index,
                        pts = packet.pts,
                        dts = packet.dts,
                        size = packet.data.len(),
                        key = packet.key,
                        "packet"
                    );
                    return Ok(packet);
                }
                Err(e) => {
                    self.stats.discarded += 1;
                    warn!(stream = frame.stream_index, error = %e, "discarding frame");
                    self.check_deadline(started)?;
                }
            }
        }
    }

    /// Iterate over packets until the first timeout.
    pub fn packets(&mut self) -> Packets<'_, A, S> {
        Packets { source: self, done: false }
    }

    // --- poll loop ---

    fn check_deadline(&self, started: Instant) -> Result<()> {
        if started.elapsed() >= self.config.timeout {
            info!(timeout = ?self.config.timeout, "timed out waiting for a segment");
            return Err(Error::Timeout(self.config.timeout));
        }
        Ok(())
    }

    /// Poll the allocator until a segment is claimed or the deadline passes.
    fn claim(&mut self, started: Instant) -> Result<SegmentId> {
        loop {
            let remaining = self.config.timeout.saturating_sub(started.elapsed());
            if let Some(id) = self.allocator.claim(remaining)? {
                debug!(id, "claimed segment");
                return Ok(id);
            }
            self.check_deadline(started)?;
            thread::sleep(self.config.poll_interval);
        }
    }

    fn release(&mut self, id: SegmentId) -> bool {
        match self.allocator.release(id) {
            Ok(()) => true,
            Err(e) => {
                self.stats.release_failures += 1;
                error!(id, error = %e, "failed to return segment");
                false
            }
        }
    }

    /// Claim, map and run `extract` over one segment, then unmap and release
    /// it. Segments that fail to map or extract are discarded and polling
    /// continues until the deadline.
    fn take_segment<T>(
        &mut self,
        started: Instant,
        mut extract: impl FnMut(&[u8]) -> Result<T>,
    ) -> Result<T> {
        loop {
            let id = self.claim(started)?;

            let segment = match self.store.map(id) {
                Ok(segment) => segment,
                Err(e) => {
                    self.stats.map_failures += 1;
                    error!(id, error = %e, "cannot map segment");
                    self.release(id);
                    self.check_deadline(started)?;
                    thread::sleep(self.config.poll_interval);
                    continue;
                }
            };

            let extracted = extract(segment.bytes());
            let unmapped = match self.store.unmap(segment) {
                Ok(()) => true,
                Err(e) => {
                    self.stats.release_failures += 1;
                    error!(id, error = %e, "failed to unmap segment");
                    false
                }
            };
            let released = self.release(id);

            match extracted {
                Ok(value) if (unmapped && released) || !self.config.strict_release => {
                    return Ok(value)
                }
                Ok(_) => {
                    self.stats.discarded += 1;
                    warn!(id, "dropping frame from a segment that was not cleanly released");
                }
                Err(e) => {
                    self.stats.discarded += 1;
                    warn!(id, error = %e, "discarding segment");
                }
            }
            self.check_deadline(started)?;
        }
    }
}

/// Iterator returned by [`SmemSource::packets`].
///
/// Ends at the first timeout. A fatal error is yielded once, then the
/// iterator ends.
pub struct Packets<'a, A, S> {
    source: &'a mut SmemSource<A, S>,
    done: bool,
}

impl<A: SegmentAllocator, S: SegmentStore> Iterator for Packets<'_, A, S> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.source.read_packet() {
            Ok(packet) => Some(Ok(packet)),
            Err(e) if e.is_end_of_stream() => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<A, S> std::fmt::Debug for SmemSource<A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmemSource")
            .field("endpoint", &self.config.endpoint)
            .field("streams", &self.registry.len())
            .field("stats", &self.stats)
            .finish()
    }
}
