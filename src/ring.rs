// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Lock-free single-producer single-consumer ring of segment ids.
//
// The ring lives inside a shared memory region owned by someone else; this
// module only interprets the bytes. One side pushes, the other pops.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

/// Slots per ring. Must be a power of two.
pub const RING_CAPACITY: usize = 256;

const _: () = assert!(RING_CAPACITY.is_power_of_two());

/// Cache-line-padded cursors.
#[repr(C)]
pub(crate) struct RingHeader {
    write_idx: AtomicU64,
    _pad0: [u8; 64 - 8],
    read_idx: AtomicU64,
    _pad1: [u8; 64 - 8],
}

/// Shared memory layout of one ring.
#[repr(C)]
pub(crate) struct RingLayout {
    hdr: RingHeader,
    slots: [AtomicI32; RING_CAPACITY],
}

const _: () = assert!(std::mem::size_of::<RingHeader>() == 128);

/// A view over a ring stored in shared memory.
#[derive(Clone, Copy)]
pub(crate) struct IdRing<'a> {
    layout: &'a RingLayout,
}

impl<'a> IdRing<'a> {
    const MASK: u64 = (RING_CAPACITY as u64) - 1;

    pub(crate) fn new(layout: &'a RingLayout) -> Self {
        Self { layout }
    }

    /// Reset both cursors. Only the creator may call this, before publishing.
    pub(crate) fn reset(&self) {
        self.layout.hdr.write_idx.store(0, Ordering::Relaxed);
        self.layout.hdr.read_idx.store(0, Ordering::Relaxed);
        for slot in &self.layout.slots {
            slot.store(0, Ordering::Relaxed);
        }
    }

    fn slot(&self, idx: u64) -> &AtomicI32 {
        &self.layout.slots[(idx & Self::MASK) as usize]
    }

    // --- Producer side (single writer) ---

    /// Append `id`. Returns `false` if the ring is full.
    pub(crate) fn push(&self, id: i32) -> bool {
        let hdr = &self.layout.hdr;
        let w = hdr.write_idx.load(Ordering::Relaxed);
        let r = hdr.read_idx.load(Ordering::Acquire);
        if w.wrapping_sub(r) >= RING_CAPACITY as u64 {
            return false;
        }
        self.slot(w).store(id, Ordering::Relaxed);
        hdr.write_idx.store(w.wrapping_add(1), Ordering::Release);
        true
    }

    // --- Consumer side (single reader) ---

    /// Take the oldest id, or `None` if the ring is empty.
    pub(crate) fn pop(&self) -> Option<i32> {
        let hdr = &self.layout.hdr;
        let r = hdr.read_idx.load(Ordering::Relaxed);
        let w = hdr.write_idx.load(Ordering::Acquire);
        if r == w {
            return None;
        }
        let id = self.slot(r).load(Ordering::Relaxed);
        hdr.read_idx.store(r.wrapping_add(1), Ordering::Release);
        Some(id)
    }

    // --- Status ---

    /// Number of ids waiting to be popped.
    pub(crate) fn len(&self) -> usize {
        let hdr = &self.layout.hdr;
        let w = hdr.write_idx.load(Ordering::Acquire);
        let r = hdr.read_idx.load(Ordering::Acquire);
        w.wrapping_sub(r) as usize
    }

}
