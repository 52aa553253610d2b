// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Broadcast byte bus over shared memory.
//
// Two endpoint flavours share one transport:
// - `Route`   — single producer, multiple consumers
// - `Channel` — multiple producers, multiple consumers
//
// The transport is a fixed ring of 256 slots of 64 payload bytes. Messages
// larger than one slot are chunked; bit 31 of the slot size marks the final
// chunk. Each receiver owns one bit of a 32-bit connection mask; a published
// slot carries the mask in its `rc` word and every receiver clears its bit
// after copying. A slot is reusable once `rc` drops to zero; the last
// receiver out wakes any blocked senders.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::buffer::MsgBuf;
use crate::segment::{OpenMode, Segment};
use crate::spin;
use crate::waiter::Waiter;
use crate::{Error, Result};

/// Payload bytes per slot.
const CHUNK: usize = 64;

/// Slots in the ring. Cursor arithmetic wraps through u8, so this is fixed.
const SLOTS: usize = 256;

/// Bit 31 of the slot size word: final chunk of a message.
const LAST_CHUNK: u32 = 0x8000_0000;

#[repr(C)]
struct MsgSlot {
    data: [u8; CHUNK],
    size: AtomicU32,
    /// Pending-receiver mask; 0 means the slot is free.
    rc: AtomicU32,
}

#[repr(C)]
struct BusHeader {
    /// One bit per connected receiver.
    connections: AtomicU32,
    write_cursor: AtomicU32,
    sender_count: AtomicU32,
}

const fn bus_segment_size() -> usize {
    std::mem::size_of::<BusHeader>() + SLOTS * std::mem::size_of::<MsgSlot>()
}

/// Endpoint direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sender,
    Receiver,
}

// ---------------------------------------------------------------------------
// Bus — transport shared by Route and Channel
// ---------------------------------------------------------------------------

struct Bus {
    name: String,
    mode: Mode,
    ring: Segment,
    /// This receiver's connection bit (0 for senders).
    conn_bit: u32,
    /// This receiver's private read position.
    read_cursor: u32,
    /// Senders sleep here when their target slot is still owned by readers.
    wt_waiter: Waiter,
    /// Receivers sleep here when their slot has no data yet.
    rd_waiter: Waiter,
    /// `wait_for_receivers` sleeps here; broadcast on every new connection.
    cc_waiter: Waiter,
}

impl Bus {
    fn open(prefix: &str, name: &str, mode: Mode) -> Result<Self> {
        let p = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}_")
        };
        // Fresh segments are zero-filled, which is exactly the initial state
        // (no connections, cursor 0, all slots free).
        let ring = Segment::acquire(
            &format!("{p}QU_CONN__{name}"),
            bus_segment_size(),
            OpenMode::CreateOrOpen,
        )?;
        let wt_waiter = Waiter::open(&format!("{p}WT_CONN__{name}"))?;
        let rd_waiter = Waiter::open(&format!("{p}RD_CONN__{name}"))?;
        let cc_waiter = Waiter::open(&format!("{p}CC_CONN__{name}"))?;

        let hdr = unsafe { &*(ring.as_ptr() as *const BusHeader) };
        let mut conn_bit = 0u32;
        let mut read_cursor = 0u32;
        match mode {
            Mode::Sender => {
                hdr.sender_count.fetch_add(1, Ordering::Relaxed);
            }
            Mode::Receiver => {
                // Claim the lowest clear bit of the connection mask.
                let mut k = 0u32;
                loop {
                    let cur = hdr.connections.load(Ordering::Acquire);
                    let next = cur | cur.wrapping_add(1);
                    if next == cur {
                        return Err(Error::Full);
                    }
                    if hdr
                        .connections
                        .compare_exchange_weak(cur, next, Ordering::Release, Ordering::Relaxed)
                        .is_ok()
                    {
                        conn_bit = next ^ cur;
                        break;
                    }
                    spin::backoff(&mut k);
                }
                read_cursor = hdr.write_cursor.load(Ordering::Acquire);
                cc_waiter.broadcast();
            }
        }

        Ok(Self {
            name: name.to_string(),
            mode,
            ring,
            conn_bit,
            read_cursor,
            wt_waiter,
            rd_waiter,
            cc_waiter,
        })
    }

    fn hdr(&self) -> &BusHeader {
        unsafe { &*(self.ring.as_ptr() as *const BusHeader) }
    }

    fn slot(&self, cursor: u32) -> &MsgSlot {
        unsafe {
            let base = self.ring.as_ptr().add(std::mem::size_of::<BusHeader>());
            &*(base as *const MsgSlot).add(cursor as u8 as usize)
        }
    }

    fn receiver_count(&self) -> usize {
        self.hdr().connections.load(Ordering::Acquire).count_ones() as usize
    }

    /// Block until at least `count` receivers are connected.
    fn wait_for_receivers(&self, count: usize, timeout_ms: Option<u64>) -> bool {
        let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        loop {
            if self.receiver_count() >= count {
                return true;
            }
            let tm = match deadline {
                None => None,
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return false;
                    }
                    Some(left.as_millis() as u64)
                }
            };
            self.cc_waiter
                .wait_while(|| self.receiver_count() < count, tm);
        }
    }

    /// Spin briefly, then sleep on `waiter` while `pred()` is true.
    /// Returns `false` when the deadline passes first.
    fn spin_then_wait<F>(waiter: &Waiter, pred: F, deadline: Option<Instant>) -> bool
    where
        F: Fn() -> bool,
    {
        const SPIN: u32 = 32;
        let mut k = 0u32;
        while pred() {
            if k < SPIN {
                std::thread::yield_now();
                k += 1;
                continue;
            }
            let tm = match deadline {
                None => None,
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return false;
                    }
                    Some(left.as_millis().max(1) as u64)
                }
            };
            if !waiter.wait_while(&pred, tm) {
                return false;
            }
            k = 0;
        }
        true
    }

    /// Send `data`, chunking across slots. `false` on timeout or when no
    /// receiver is connected.
    fn send(&self, data: &[u8], timeout_ms: u64) -> Result<bool> {
        if self.mode != Mode::Sender {
            return Err(Error::InvalidArgument("send on a receiver endpoint"));
        }
        if data.is_empty() {
            return Ok(false);
        }
        let hdr = self.hdr();
        if hdr.connections.load(Ordering::Acquire) == 0 {
            return Ok(false);
        }
        let deadline = Some(Instant::now() + Duration::from_millis(timeout_ms));

        let mut offset = 0usize;
        while offset < data.len() {
            let len = CHUNK.min(data.len() - offset);
            let last = offset + len >= data.len();

            // Claim a free slot: the cursor's slot must have been drained
            // (rc == 0) before it can be reused. CAS on the cursor keeps
            // multiple producers from claiming the same slot.
            let claimed = loop {
                let wt = hdr.write_cursor.load(Ordering::Acquire);
                if self.slot(wt).rc.load(Ordering::Acquire) != 0 {
                    let ok = Self::spin_then_wait(
                        &self.wt_waiter,
                        || self.slot(wt).rc.load(Ordering::Acquire) != 0,
                        deadline,
                    );
                    if !ok {
                        return Ok(false);
                    }
                    continue;
                }
                if hdr
                    .write_cursor
                    .compare_exchange_weak(
                        wt,
                        wt.wrapping_add(1),
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    break wt;
                }
            };

            let slot = self.slot(claimed);
            unsafe {
                std::ptr::copy_nonoverlapping(
                    data.as_ptr().add(offset),
                    slot.data.as_ptr() as *mut u8,
                    len,
                );
            }
            let size = if last {
                LAST_CHUNK | len as u32
            } else {
                len as u32
            };
            slot.size.store(size, Ordering::Relaxed);
            // Publish: the release store of the receiver mask makes payload
            // and size visible to any receiver that acquires rc.
            let mask = hdr.connections.load(Ordering::Relaxed);
            slot.rc.store(mask, Ordering::Release);

            offset += len;
        }

        self.rd_waiter.broadcast();
        Ok(true)
    }

    /// Receive one message, assembling chunks. Empty buffer on timeout.
    fn recv(&mut self, timeout_ms: Option<u64>) -> Result<MsgBuf> {
        if self.mode != Mode::Receiver {
            return Err(Error::InvalidArgument("recv on a sender endpoint"));
        }
        let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        let mut assembled: Vec<u8> = Vec::new();

        loop {
            let cur = self.read_cursor;
            let slot = self.slot(cur);

            if slot.rc.load(Ordering::Acquire) & self.conn_bit == 0 {
                let bit = self.conn_bit;
                let ok = Self::spin_then_wait(
                    &self.rd_waiter,
                    || self.slot(cur).rc.load(Ordering::Acquire) & bit == 0,
                    deadline,
                );
                if !ok {
                    return Ok(MsgBuf::new());
                }
                continue;
            }

            // rc was acquired, so the sender's payload and size stores are
            // visible.
            let size = slot.size.load(Ordering::Relaxed);
            let len = (size & !LAST_CHUNK) as usize;
            let last = size & LAST_CHUNK != 0;
            let chunk = unsafe { std::slice::from_raw_parts(slot.data.as_ptr(), len.min(CHUNK)) };
            assembled.extend_from_slice(chunk);

            let before = slot.rc.fetch_and(!self.conn_bit, Ordering::AcqRel);
            if before & !self.conn_bit == 0 {
                // Last reader out: the slot is free again, wake senders.
                self.wt_waiter.broadcast();
            }
            self.read_cursor = self.read_cursor.wrapping_add(1);

            if last {
                return Ok(MsgBuf::from_vec(assembled));
            }
        }
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        let hdr = self.hdr();
        match self.mode {
            Mode::Sender => {
                hdr.sender_count.fetch_sub(1, Ordering::Relaxed);
            }
            Mode::Receiver => {
                hdr.connections.fetch_and(!self.conn_bit, Ordering::AcqRel);
            }
        }
    }
}

fn clear_bus_storage(prefix: &str, name: &str) {
    let p = if prefix.is_empty() {
        String::new()
    } else {
        format!("{prefix}_")
    };
    Segment::remove(&format!("{p}QU_CONN__{name}"));
    Waiter::clear_storage(&format!("{p}WT_CONN__{name}"));
    Waiter::clear_storage(&format!("{p}RD_CONN__{name}"));
    Waiter::clear_storage(&format!("{p}CC_CONN__{name}"));
}

// ---------------------------------------------------------------------------
// Route — single producer, broadcast
// ---------------------------------------------------------------------------

/// Single-producer broadcast bus: one `Sender` endpoint, every `Receiver`
/// endpoint with the same name sees every message.
pub struct Route {
    bus: Bus,
}

impl Route {
    pub fn connect(name: &str, mode: Mode) -> Result<Self> {
        Self::connect_with_prefix("", name, mode)
    }

    pub fn connect_with_prefix(prefix: &str, name: &str, mode: Mode) -> Result<Self> {
        Ok(Self {
            bus: Bus::open(prefix, name, mode)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.bus.name
    }

    pub fn mode(&self) -> Mode {
        self.bus.mode
    }

    /// Connected receiver endpoints.
    pub fn receiver_count(&self) -> usize {
        self.bus.receiver_count()
    }

    /// Block until at least `count` receivers are connected.
    pub fn wait_for_receivers(&self, count: usize, timeout_ms: Option<u64>) -> bool {
        self.bus.wait_for_receivers(count, timeout_ms)
    }

    /// Send raw bytes. `false` on timeout or with no receiver connected.
    pub fn send(&self, data: &[u8], timeout_ms: u64) -> Result<bool> {
        self.bus.send(data, timeout_ms)
    }

    /// Send a string payload with a trailing NUL.
    pub fn send_str(&self, s: &str, timeout_ms: u64) -> Result<bool> {
        let mut v = Vec::with_capacity(s.len() + 1);
        v.extend_from_slice(s.as_bytes());
        v.push(0);
        self.bus.send(&v, timeout_ms)
    }

    pub fn try_send(&self, data: &[u8]) -> Result<bool> {
        self.bus.send(data, 0)
    }

    /// Receive one message; empty buffer on timeout.
    pub fn recv(&mut self, timeout_ms: Option<u64>) -> Result<MsgBuf> {
        self.bus.recv(timeout_ms)
    }

    pub fn try_recv(&mut self) -> Result<MsgBuf> {
        self.bus.recv(Some(0))
    }

    pub fn clear_storage(name: &str) {
        clear_bus_storage("", name);
    }

    pub fn clear_storage_with_prefix(prefix: &str, name: &str) {
        clear_bus_storage(prefix, name);
    }
}

// ---------------------------------------------------------------------------
// Channel — multi producer, broadcast
// ---------------------------------------------------------------------------

/// Multi-producer broadcast bus. The transport is identical to [`Route`];
/// producer safety comes from the CAS slot claim.
pub struct Channel {
    bus: Bus,
}

impl Channel {
    pub fn connect(name: &str, mode: Mode) -> Result<Self> {
        Self::connect_with_prefix("", name, mode)
    }

    pub fn connect_with_prefix(prefix: &str, name: &str, mode: Mode) -> Result<Self> {
        Ok(Self {
            bus: Bus::open(prefix, name, mode)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.bus.name
    }

    pub fn mode(&self) -> Mode {
        self.bus.mode
    }

    pub fn receiver_count(&self) -> usize {
        self.bus.receiver_count()
    }

    pub fn wait_for_receivers(&self, count: usize, timeout_ms: Option<u64>) -> bool {
        self.bus.wait_for_receivers(count, timeout_ms)
    }

    pub fn send(&self, data: &[u8], timeout_ms: u64) -> Result<bool> {
        self.bus.send(data, timeout_ms)
    }

    pub fn send_str(&self, s: &str, timeout_ms: u64) -> Result<bool> {
        let mut v = Vec::with_capacity(s.len() + 1);
        v.extend_from_slice(s.as_bytes());
        v.push(0);
        self.bus.send(&v, timeout_ms)
    }

    pub fn try_send(&self, data: &[u8]) -> Result<bool> {
        self.bus.send(data, 0)
    }

    pub fn recv(&mut self, timeout_ms: Option<u64>) -> Result<MsgBuf> {
        self.bus.recv(timeout_ms)
    }

    pub fn try_recv(&mut self) -> Result<MsgBuf> {
        self.bus.recv(Some(0))
    }

    pub fn clear_storage(name: &str) {
        clear_bus_storage("", name);
    }

    pub fn clear_storage_with_prefix(prefix: &str, name: &str) {
        clear_bus_storage(prefix, name);
    }
}
