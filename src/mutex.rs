// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Robust cross-process mutex: a word lock in a shared segment with
// kernel-assisted waiting and dead-owner recovery.
//
// `state` protocol: 0 = unlocked, 1 = locked, 2 = locked with (possible)
// waiters. Uncontended paths never touch the kernel. A thread that has
// slept re-acquires with 0 -> 2 so the waiters-present signal is never lost.
// The holder's PID sits next to the state word; when an acquisition times
// out, the PID is probed with signal 0, and a dead holder gets the lock
// forcibly reset with all waiters woken to re-race.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::park::{self, ParkOutcome, Remaining};
use crate::proc;
use crate::segment::{OpenMode, Segment};
use crate::spin;
use crate::Result;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

/// Spin attempts before falling back to the kernel.
const SPIN_LIMIT: u32 = 40;

#[repr(C)]
struct MutexState {
    state: AtomicU32,
    holder: AtomicI32,
}

/// A named mutex shared between processes, with dead-owner recovery.
///
/// Zero-filled segment state is a valid unlocked mutex, so no construction
/// step is needed and a crash-leftover segment is usable as-is (a stale
/// locked state is cleared by recovery once the dead holder is detected).
pub struct RobustMutex {
    seg: Segment,
}

impl RobustMutex {
    /// Open (or create) the named mutex.
    pub fn open(name: &str) -> Result<Self> {
        let seg = Segment::acquire(
            name,
            std::mem::size_of::<MutexState>(),
            OpenMode::CreateOrOpen,
        )?;
        Ok(Self { seg })
    }

    fn shared(&self) -> &MutexState {
        unsafe { &*(self.seg.as_ptr() as *const MutexState) }
    }

    /// The mutex name.
    pub fn name(&self) -> &str {
        self.seg.name()
    }

    /// PID currently recorded as holder (0 when unlocked). Advisory: the
    /// value can be stale the instant it is read.
    pub fn holder(&self) -> i32 {
        self.shared().holder.load(Ordering::Relaxed)
    }

    /// Acquire the lock. `None` waits forever; otherwise returns `false`
    /// once `timeout_ms` elapses. Performs at most one dead-owner recovery
    /// before giving up.
    pub fn lock(&self, timeout_ms: Option<u64>) -> bool {
        let s = self.shared();

        // Fast path.
        if s.state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            s.holder.store(proc::current_pid(), Ordering::Relaxed);
            return true;
        }

        let deadline = park::deadline_after(timeout_ms);
        let mut k = 0u32;
        for _ in 0..SPIN_LIMIT {
            if s.state
                .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                s.holder.store(proc::current_pid(), Ordering::Relaxed);
                return true;
            }
            spin::backoff(&mut k);
        }

        // Parking phase. After the first sleep we acquire with 0 -> 2:
        // we cannot know whether other sleepers remain, so the unlocker
        // must keep waking.
        let mut acquire_as = LOCKED;
        let mut tried_recovery = false;
        loop {
            let cur = s.state.load(Ordering::Relaxed);
            if cur == UNLOCKED {
                if s.state
                    .compare_exchange(UNLOCKED, acquire_as, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    s.holder.store(proc::current_pid(), Ordering::Relaxed);
                    return true;
                }
                continue;
            }
            if cur == LOCKED
                && s.state
                    .compare_exchange(LOCKED, CONTENDED, Ordering::Relaxed, Ordering::Relaxed)
                    .is_err()
            {
                continue;
            }

            let wait = match park::remaining(deadline) {
                Remaining::Infinite => None,
                Remaining::For(d) => Some(d),
                Remaining::Elapsed => {
                    if !tried_recovery {
                        tried_recovery = true;
                        if self.recover_dead_holder() {
                            continue;
                        }
                    }
                    return false;
                }
            };
            match park::park(&s.state, CONTENDED, wait) {
                ParkOutcome::TimedOut => {
                    if !tried_recovery {
                        tried_recovery = true;
                        if self.recover_dead_holder() {
                            acquire_as = CONTENDED;
                            continue;
                        }
                    }
                    return false;
                }
                ParkOutcome::Woken | ParkOutcome::Mismatch => {
                    acquire_as = CONTENDED;
                }
            }
        }
    }

    /// Single non-blocking acquisition attempt.
    pub fn try_lock(&self) -> bool {
        let s = self.shared();
        if s.state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            s.holder.store(proc::current_pid(), Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Release the lock. The caller must hold it.
    pub fn unlock(&self) {
        let s = self.shared();
        s.holder.store(0, Ordering::Relaxed);
        if s.state.swap(UNLOCKED, Ordering::Release) == CONTENDED {
            park::unpark_one(&s.state);
        }
    }

    /// Scope-bound acquisition; `None` on timeout.
    pub fn guard(&self, timeout_ms: Option<u64>) -> Option<MutexGuard<'_>> {
        if self.lock(timeout_ms) {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// If the recorded holder is a dead process, reset the lock and wake all
    /// waiters to re-race. The PID probe is racy: a false "alive" costs one
    /// more timeout cycle, a false "dead" resets a lock its (dead) holder
    /// can no longer be inside.
    fn recover_dead_holder(&self) -> bool {
        let s = self.shared();
        let holder = s.holder.load(Ordering::Relaxed);
        if holder == 0 || proc::pid_alive(holder) {
            return false;
        }
        tracing::debug!(
            mutex = %self.seg.name(),
            pid = holder,
            "dead lock holder detected; resetting"
        );
        s.holder.store(0, Ordering::Relaxed);
        s.state.store(UNLOCKED, Ordering::Release);
        park::unpark_all(&s.state);
        true
    }

    /// Remove the backing storage for a named mutex.
    pub fn clear_storage(name: &str) {
        crate::segment::purge(name);
        Segment::remove(name);
    }
}

/// Unlocks the mutex on drop.
pub struct MutexGuard<'a> {
    mutex: &'a RobustMutex,
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
