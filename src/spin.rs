// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Test-and-set spinlock, laid out so it can live inside a shared segment
// (a single i32 word), plus the adaptive backoff used by every spin loop
// in the crate.

use std::sync::atomic::{AtomicI32, Ordering};

/// Adaptive backoff: busy spin, then CPU pause hint, then yield, then 1 ms sleep.
#[inline]
pub(crate) fn backoff(k: &mut u32) {
    if *k < 4 {
        // busy spin
    } else if *k < 16 {
        std::hint::spin_loop();
    } else if *k < 32 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(std::time::Duration::from_millis(1));
        return;
    }
    *k += 1;
}

/// A test-and-set spinlock embeddable in shared memory.
///
/// Zero-initialized state is unlocked, so a fresh zero-filled segment needs
/// no construction step. Must not be held across anything that can block.
#[repr(transparent)]
pub struct RawSpinLock {
    word: AtomicI32,
}

impl RawSpinLock {
    pub const fn new() -> Self {
        Self {
            word: AtomicI32::new(0),
        }
    }

    /// Acquire, spinning with adaptive backoff. Returns a guard that releases
    /// on drop.
    pub fn lock(&self) -> SpinGuard<'_> {
        let mut k = 0u32;
        while self
            .word
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff(&mut k);
        }
        SpinGuard { lock: self }
    }

    /// Single acquisition attempt.
    pub fn try_lock(&self) -> Option<SpinGuard<'_>> {
        if self
            .word
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinGuard { lock: self })
        } else {
            None
        }
    }

    fn unlock(&self) {
        self.word.store(0, Ordering::Release);
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the spinlock on drop.
pub struct SpinGuard<'a> {
    lock: &'a RawSpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
