// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Address-based park/unpark over shared memory. This is the one primitive
// everything blocking in the crate reduces to: atomically check that a
// 32-bit word still holds an expected value, and if so sleep until another
// process wakes that address or the timeout elapses.
//
// Linux: futex(2) without FUTEX_PRIVATE_FLAG (the waiters live in different
// processes mapping the same page).
// macOS: the Darwin __ulock_wait/__ulock_wake calls with the SHARED
// compare-and-wait operation. These are private APIs; they are also what
// modern std/parking_lot sit on.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
compile_error!(
    "shmkit needs a cross-process address-based wait primitive \
     (Linux futex or Darwin shared ulock)"
);

/// Outcome of a [`park`] call. Callers must re-verify their predicate in
/// every case; `Woken` includes spurious wakeups and signal interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkOutcome {
    /// The address was woken (or the sleep ended spuriously).
    Woken,
    /// The timeout elapsed.
    TimedOut,
    /// `*addr` no longer held the expected value; returned without sleeping.
    Mismatch,
}

/// Convert a millisecond timeout (`None` = infinite) into a deadline.
pub(crate) fn deadline_after(timeout_ms: Option<u64>) -> Option<std::time::Instant> {
    timeout_ms.map(|ms| std::time::Instant::now() + Duration::from_millis(ms))
}

/// Time left until a deadline. Parking operations take the remaining time,
/// not the original timeout, so spurious wakes never reset the clock.
pub(crate) enum Remaining {
    Infinite,
    For(Duration),
    Elapsed,
}

pub(crate) fn remaining(deadline: Option<std::time::Instant>) -> Remaining {
    match deadline {
        None => Remaining::Infinite,
        Some(d) => {
            let left = d.saturating_duration_since(std::time::Instant::now());
            if left.is_zero() {
                Remaining::Elapsed
            } else {
                Remaining::For(left)
            }
        }
    }
}

/// Sleep on `addr` while it holds `expected`. `None` means wait forever.
pub fn park(addr: &AtomicU32, expected: u32, timeout: Option<Duration>) -> ParkOutcome {
    if let Some(t) = timeout {
        if t.is_zero() {
            return ParkOutcome::TimedOut;
        }
    }
    imp::wait(addr, expected, timeout)
}

/// Wake one thread parked on `addr`.
pub fn unpark_one(addr: &AtomicU32) {
    imp::wake(addr, false);
}

/// Wake every thread parked on `addr`.
pub fn unpark_all(addr: &AtomicU32) {
    imp::wake(addr, true);
}

// ---------------------------------------------------------------------------
// Linux — futex
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
mod imp {
    use super::ParkOutcome;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    pub fn wait(addr: &AtomicU32, expected: u32, timeout: Option<Duration>) -> ParkOutcome {
        let ts = timeout.map(|t| libc::timespec {
            tv_sec: t.as_secs() as libc::time_t,
            tv_nsec: t.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts
            .as_ref()
            .map_or(std::ptr::null(), |ts| ts as *const libc::timespec);

        let rc = unsafe {
            libc::syscall(
                libc::SYS_futex,
                addr.as_ptr(),
                libc::FUTEX_WAIT,
                expected as libc::c_int,
                ts_ptr,
                std::ptr::null::<u32>(),
                0u32,
            )
        };
        if rc == 0 {
            return ParkOutcome::Woken;
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::ETIMEDOUT) => ParkOutcome::TimedOut,
            Some(libc::EAGAIN) => ParkOutcome::Mismatch,
            // EINTR and anything unexpected: let the caller re-check.
            _ => ParkOutcome::Woken,
        }
    }

    pub fn wake(addr: &AtomicU32, all: bool) {
        let n: libc::c_int = if all { libc::c_int::MAX } else { 1 };
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                addr.as_ptr(),
                libc::FUTEX_WAKE,
                n,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}

// ---------------------------------------------------------------------------
// macOS — __ulock_wait / __ulock_wake (shared compare-and-wait)
// ---------------------------------------------------------------------------

#[cfg(target_os = "macos")]
mod imp {
    use super::ParkOutcome;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    const UL_COMPARE_AND_WAIT_SHARED: u32 = 3;
    const ULF_WAKE_ALL: u32 = 0x0000_0100;
    const ULF_NO_ERRNO: u32 = 0x0100_0000;

    extern "C" {
        fn __ulock_wait(
            operation: u32,
            addr: *mut libc::c_void,
            value: u64,
            timeout_us: u32,
        ) -> libc::c_int;
        fn __ulock_wake(operation: u32, addr: *mut libc::c_void, wake_value: u64) -> libc::c_int;
    }

    pub fn wait(addr: &AtomicU32, expected: u32, timeout: Option<Duration>) -> ParkOutcome {
        // 0 means "no timeout" to ulock; clamp a nonzero request up to 1 µs.
        let timeout_us = match timeout {
            None => 0u32,
            Some(t) => (t.as_micros().clamp(1, u32::MAX as u128)) as u32,
        };
        let rc = unsafe {
            __ulock_wait(
                UL_COMPARE_AND_WAIT_SHARED | ULF_NO_ERRNO,
                addr.as_ptr() as *mut libc::c_void,
                expected as u64,
                timeout_us,
            )
        };
        if rc >= 0 {
            // Also covers the immediate return when *addr != expected.
            return ParkOutcome::Woken;
        }
        match -rc {
            libc::ETIMEDOUT => ParkOutcome::TimedOut,
            _ => ParkOutcome::Woken,
        }
    }

    pub fn wake(addr: &AtomicU32, all: bool) {
        let mut op = UL_COMPARE_AND_WAIT_SHARED | ULF_NO_ERRNO;
        if all {
            op |= ULF_WAKE_ALL;
        }
        unsafe {
            __ulock_wake(op, addr.as_ptr() as *mut libc::c_void, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn park_mismatch_returns_immediately() {
        let w = AtomicU32::new(7);
        let start = Instant::now();
        let out = park(&w, 0, Some(Duration::from_millis(500)));
        assert!(matches!(out, ParkOutcome::Mismatch | ParkOutcome::Woken));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn park_times_out() {
        let w = AtomicU32::new(0);
        let start = Instant::now();
        let out = park(&w, 0, Some(Duration::from_millis(60)));
        assert_eq!(out, ParkOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn zero_timeout_never_sleeps() {
        let w = AtomicU32::new(0);
        assert_eq!(park(&w, 0, Some(Duration::ZERO)), ParkOutcome::TimedOut);
    }

    #[test]
    fn unpark_one_wakes_parker() {
        let w = Arc::new(AtomicU32::new(0));
        let w2 = Arc::clone(&w);
        let t = thread::spawn(move || {
            while w2.load(Ordering::Acquire) == 0 {
                if park(&w2, 0, Some(Duration::from_secs(5))) == ParkOutcome::TimedOut {
                    panic!("never woken");
                }
            }
        });
        thread::sleep(Duration::from_millis(50));
        w.store(1, Ordering::Release);
        unpark_one(&w);
        t.join().unwrap();
    }

    #[test]
    fn unpark_all_wakes_everyone() {
        let w = Arc::new(AtomicU32::new(0));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let w = Arc::clone(&w);
                thread::spawn(move || {
                    while w.load(Ordering::Acquire) == 0 {
                        park(&w, 0, Some(Duration::from_secs(5)));
                    }
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(50));
        w.store(1, Ordering::Release);
        unpark_all(&w);
        for t in threads {
            t.join().unwrap();
        }
    }
}
