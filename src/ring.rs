// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Lock-free single-producer single-consumer ring buffer over a named shared
// segment. Fixed-size records, power-of-two capacity, monotonically growing
// 64-bit indices; a record's slot is its index reduced modulo the capacity.
//
// Exactly one writer and one reader across all attached processes; anything
// else is undefined. Neither side ever blocks: the producer either fails a
// full write or drops the oldest record (overwrite mode, for audio paths
// where the producer must never stall).

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::segment::{OpenMode, Segment};
use crate::Result;

/// One 64-byte cache line holding a single cursor, so the producer's and
/// consumer's lines never false-share.
#[repr(C, align(64))]
struct Lane {
    pos: AtomicU64,
}

#[repr(C)]
struct Header {
    /// Producer cursor: total records ever committed.
    tail: Lane,
    /// Consumer cursor: total records ever consumed.
    head: Lane,
    /// Nonzero once the creator has finished zeroing the record area.
    ready: ReadyLane,
}

#[repr(C, align(64))]
struct ReadyLane {
    word: AtomicU32,
}

const _: () = assert!(std::mem::size_of::<Header>() == 192);

/// SPSC ring of `N` records of `T` in a named shared segment.
///
/// `T` must be `Copy` (records are raw-copied across the process boundary);
/// `N` must be a power of two.
pub struct SpscRing<T: Copy + 'static, const N: usize> {
    seg: Segment,
    _marker: PhantomData<T>,
}

impl<T: Copy + 'static, const N: usize> SpscRing<T, N> {
    fn segment_size() -> usize {
        std::mem::size_of::<Header>() + std::mem::size_of::<T>() * N
    }

    /// Open the named ring, creating and initializing it if missing.
    pub fn open_or_create(name: &str) -> Result<Self> {
        assert!(N.is_power_of_two(), "ring capacity must be a power of two");
        let seg = Segment::acquire(name, Self::segment_size(), OpenMode::CreateOrOpen)?;
        let ring = Self {
            seg,
            _marker: PhantomData,
        };
        let hdr = ring.hdr();
        if hdr.ready.word.load(Ordering::Acquire) == 0 {
            hdr.tail.pos.store(0, Ordering::Relaxed);
            hdr.head.pos.store(0, Ordering::Relaxed);
            unsafe {
                std::ptr::write_bytes(ring.records(), 0, N);
            }
            hdr.ready.word.store(1, Ordering::Release);
        }
        Ok(ring)
    }

    /// Attach to an existing ring; `NotFound` if it was never created.
    /// `Unavailable` if the creator has not finished construction yet.
    pub fn open_existing(name: &str) -> Result<Self> {
        assert!(N.is_power_of_two(), "ring capacity must be a power of two");
        let seg = Segment::acquire(name, Self::segment_size(), OpenMode::Open)?;
        let ring = Self {
            seg,
            _marker: PhantomData,
        };
        if ring.hdr().ready.word.load(Ordering::Acquire) == 0 {
            return Err(crate::Error::Unavailable);
        }
        Ok(ring)
    }

    /// Detach and unlink the backing segment.
    pub fn destroy(self) {
        let name = self.seg.name().to_string();
        drop(self);
        Segment::remove(&name);
    }

    /// The ring name.
    pub fn name(&self) -> &str {
        self.seg.name()
    }

    /// Compile-time capacity.
    pub const fn capacity(&self) -> usize {
        N
    }

    fn hdr(&self) -> &Header {
        unsafe { &*(self.seg.as_ptr() as *const Header) }
    }

    /// First record, right after the header.
    fn records(&self) -> *mut T {
        unsafe { self.seg.as_mut_ptr().add(std::mem::size_of::<Header>()) as *mut T }
    }

    fn record_at(&self, pos: u64) -> *mut T {
        unsafe { self.records().add(pos as usize & (N - 1)) }
    }

    /// Producer's view of the ring: its own cursor plus how many records the
    /// consumer has yet to take. The acquire load of `head` pairs with the
    /// consumer's release in [`read_commit`](Self::read_commit).
    fn producer_view(&self) -> (u64, usize) {
        let hdr = self.hdr();
        let tail = hdr.tail.pos.load(Ordering::Relaxed);
        let head = hdr.head.pos.load(Ordering::Acquire);
        (tail, tail.wrapping_sub(head) as usize)
    }

    /// Consumer's mirror image: its own cursor plus the unread backlog. The
    /// acquire load of `tail` makes every record byte the producer wrote for
    /// earlier positions visible.
    fn consumer_view(&self) -> (u64, usize) {
        let hdr = self.hdr();
        let head = hdr.head.pos.load(Ordering::Relaxed);
        let tail = hdr.tail.pos.load(Ordering::Acquire);
        (head, tail.wrapping_sub(head) as usize)
    }

    /// Advance a cursor owned exclusively by the calling side. A plain
    /// load/store pair suffices: nobody else ever writes this lane.
    fn bump(lane: &Lane) {
        let cur = lane.pos.load(Ordering::Relaxed);
        lane.pos.store(cur.wrapping_add(1), Ordering::Release);
    }

    // --- producer side (one writer) ---

    /// Pointer to the next writable slot, or `None` when full. The caller
    /// fills the slot and then calls [`write_commit`](Self::write_commit).
    pub fn write_slot(&self) -> Option<*mut T> {
        let (tail, backlog) = self.producer_view();
        (backlog < N).then(|| self.record_at(tail))
    }

    /// Publish the slot obtained from [`write_slot`](Self::write_slot).
    pub fn write_commit(&self) {
        Self::bump(&self.hdr().tail);
    }

    /// Copy `item` into the next slot. `false` when the ring is full.
    pub fn write(&self, item: &T) -> bool {
        let Some(slot) = self.write_slot() else {
            return false;
        };
        unsafe { slot.write(*item) };
        self.write_commit();
        true
    }

    /// Copy `item` unconditionally, dropping the oldest unread record when
    /// the ring is full. The producer never blocks and never fails. The
    /// release store of the advanced `head` keeps the consumer's view
    /// coherent when the drop races a concurrent read.
    pub fn write_overwrite(&self, item: &T) {
        let (tail, backlog) = self.producer_view();
        if backlog == N {
            let head = &self.hdr().head;
            let cur = head.pos.load(Ordering::Relaxed);
            head.pos.store(cur.wrapping_add(1), Ordering::Release);
        }
        unsafe { self.record_at(tail).write(*item) };
        self.write_commit();
    }

    // --- consumer side (one reader) ---

    /// Pointer to the next readable slot, or `None` when empty. The caller
    /// copies out and then calls [`read_commit`](Self::read_commit).
    pub fn read_slot(&self) -> Option<*const T> {
        let (head, backlog) = self.consumer_view();
        (backlog > 0).then(|| self.record_at(head) as *const T)
    }

    /// Release the slot obtained from [`read_slot`](Self::read_slot).
    pub fn read_commit(&self) {
        Self::bump(&self.hdr().head);
    }

    /// Copy the next record into `out`. `false` when the ring is empty.
    pub fn read(&self, out: &mut T) -> bool {
        let Some(slot) = self.read_slot() else {
            return false;
        };
        *out = unsafe { *slot };
        self.read_commit();
        true
    }

    // --- status ---

    /// Records currently readable.
    pub fn available(&self) -> usize {
        self.consumer_view().1
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    pub fn is_full(&self) -> bool {
        self.available() >= N
    }
}
