// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Counting semaphore over a shared 32-bit count plus address-based waiting.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::park::{self, ParkOutcome, Remaining};
use crate::segment::{OpenMode, Segment};
use crate::Result;

#[repr(C)]
struct SemState {
    count: AtomicU32,
}

/// A named counting semaphore shared between processes.
pub struct Semaphore {
    seg: Segment,
}

impl Semaphore {
    /// Open (or create) the named semaphore. `initial` is applied only when
    /// this call creates the underlying segment.
    pub fn open(name: &str, initial: u32) -> Result<Self> {
        let seg = Segment::acquire_with(
            name,
            std::mem::size_of::<SemState>(),
            OpenMode::CreateOrOpen,
            |base| {
                let s = unsafe { &*(base as *const SemState) };
                s.count.store(initial, Ordering::Release);
                Ok(())
            },
        )?;
        Ok(Self { seg })
    }

    fn shared(&self) -> &SemState {
        unsafe { &*(self.seg.as_ptr() as *const SemState) }
    }

    /// Current count. Advisory under concurrency.
    pub fn count(&self) -> u32 {
        self.shared().count.load(Ordering::Acquire)
    }

    /// Decrement the count, sleeping while it is zero. `None` waits forever;
    /// returns `false` on timeout.
    pub fn wait(&self, timeout_ms: Option<u64>) -> bool {
        let s = self.shared();
        let deadline = park::deadline_after(timeout_ms);
        loop {
            let c = s.count.load(Ordering::Relaxed);
            if c > 0 {
                if s.count
                    .compare_exchange_weak(c, c - 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return true;
                }
                continue;
            }
            let wait = match park::remaining(deadline) {
                Remaining::Infinite => None,
                Remaining::For(d) => Some(d),
                Remaining::Elapsed => return false,
            };
            if park::park(&s.count, 0, wait) == ParkOutcome::TimedOut {
                return false;
            }
        }
    }

    /// Add `n` to the count, waking up to `n` sleepers.
    pub fn post(&self, n: u32) {
        let s = self.shared();
        for _ in 0..n {
            s.count.fetch_add(1, Ordering::Release);
            park::unpark_one(&s.count);
        }
    }

    /// Remove the backing storage for a named semaphore.
    pub fn clear_storage(name: &str) {
        crate::segment::purge(name);
        Segment::remove(name);
    }
}
