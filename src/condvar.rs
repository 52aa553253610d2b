// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Sequence-counter condition variable, paired with RobustMutex.
//
// Waiters snapshot `seq` under the mutex, release it, and park on `seq` with
// the snapshot as the expected value. Notifiers bump `seq` before waking, so
// a waiter that has read the old value but not yet parked falls straight
// through the expected-value check, closing the classic lost-wakeup window.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::park::{self, ParkOutcome, Remaining};
use crate::segment::{OpenMode, Segment};
use crate::{Result, RobustMutex};

#[repr(C)]
struct CondState {
    seq: AtomicU32,
    waiters: AtomicU32,
}

/// A named condition variable shared between processes.
pub struct Condvar {
    seg: Segment,
}

impl Condvar {
    /// Open (or create) the named condition variable. Zero-filled state is
    /// valid, so no construction step is needed.
    pub fn open(name: &str) -> Result<Self> {
        let seg = Segment::acquire(
            name,
            std::mem::size_of::<CondState>(),
            OpenMode::CreateOrOpen,
        )?;
        Ok(Self { seg })
    }

    fn shared(&self) -> &CondState {
        unsafe { &*(self.seg.as_ptr() as *const CondState) }
    }

    /// Atomically release `mutex` and sleep until notified or `timeout_ms`
    /// elapses, then reacquire `mutex` (unconditionally, with an infinite
    /// wait; callers rely on holding the lock when this returns).
    ///
    /// The caller must hold `mutex`. Returns `false` on timeout.
    pub fn wait(&self, mutex: &RobustMutex, timeout_ms: Option<u64>) -> bool {
        let c = self.shared();
        let snapshot = c.seq.load(Ordering::Relaxed);
        c.waiters.fetch_add(1, Ordering::Relaxed);
        mutex.unlock();

        let deadline = park::deadline_after(timeout_ms);
        let notified = loop {
            if c.seq.load(Ordering::Relaxed) != snapshot {
                break true;
            }
            let wait = match park::remaining(deadline) {
                Remaining::Infinite => None,
                Remaining::For(d) => Some(d),
                Remaining::Elapsed => break false,
            };
            match park::park(&c.seq, snapshot, wait) {
                ParkOutcome::TimedOut => break c.seq.load(Ordering::Relaxed) != snapshot,
                // Woken or expected-value mismatch: re-check the counter.
                ParkOutcome::Woken | ParkOutcome::Mismatch => {}
            }
        };

        c.waiters.fetch_sub(1, Ordering::Relaxed);
        mutex.lock(None);
        notified
    }

    /// Wake at most one waiter.
    pub fn notify(&self) {
        let c = self.shared();
        c.seq.fetch_add(1, Ordering::Release);
        if c.waiters.load(Ordering::Relaxed) > 0 {
            park::unpark_one(&c.seq);
        }
    }

    /// Wake all waiters.
    pub fn broadcast(&self) {
        let c = self.shared();
        c.seq.fetch_add(1, Ordering::Release);
        if c.waiters.load(Ordering::Relaxed) > 0 {
            park::unpark_all(&c.seq);
        }
    }

    /// Remove the backing storage for a named condition variable.
    pub fn clear_storage(name: &str) {
        crate::segment::purge(name);
        Segment::remove(name);
    }
}
