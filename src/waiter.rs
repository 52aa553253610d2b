// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named condvar + mutex + quit-flag composite. The bus uses one of these per
// blocking edge (ring-full, ring-empty, receiver-connected) to put threads
// to sleep against a predicate with timeout support.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::{Condvar, Result, RobustMutex};

/// A named waiter shared between processes.
pub struct Waiter {
    cond: Condvar,
    lock: RobustMutex,
    quit: AtomicBool,
}

impl Waiter {
    /// Open a named waiter; the condvar and mutex segments derive their
    /// names from `name`.
    pub fn open(name: &str) -> Result<Self> {
        let cond = Condvar::open(&format!("{name}_WAITER_COND_"))?;
        let lock = RobustMutex::open(&format!("{name}_WAITER_LOCK_"))?;
        Ok(Self {
            cond,
            lock,
            quit: AtomicBool::new(false),
        })
    }

    /// Sleep while `pred()` is true, until notified, quit, or timeout.
    /// Returns `false` on timeout.
    pub fn wait_while<F>(&self, pred: F, timeout_ms: Option<u64>) -> bool
    where
        F: Fn() -> bool,
    {
        self.lock.lock(None);
        while !self.quit.load(Ordering::Relaxed) && pred() {
            if !self.cond.wait(&self.lock, timeout_ms) {
                self.lock.unlock();
                return false;
            }
        }
        self.lock.unlock();
        true
    }

    /// Wake one sleeper.
    pub fn notify(&self) {
        // Lock barrier: a sleeper that has passed its predicate check but
        // not yet parked observes the seq bump made under the same lock.
        self.lock.lock(None);
        self.lock.unlock();
        self.cond.notify();
    }

    /// Wake all sleepers.
    pub fn broadcast(&self) {
        self.lock.lock(None);
        self.lock.unlock();
        self.cond.broadcast();
    }

    /// Mark this handle as quitting and wake everyone.
    pub fn quit_waiting(&self) {
        self.quit.store(true, Ordering::Release);
        self.broadcast();
    }

    /// Remove the backing storage for a named waiter.
    pub fn clear_storage(name: &str) {
        Condvar::clear_storage(&format!("{name}_WAITER_COND_"));
        RobustMutex::clear_storage(&format!("{name}_WAITER_LOCK_"));
    }
}
