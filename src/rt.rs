// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Real-time thread scheduling for audio-grade consumers of the ring buffer.

/// Nominal callback period in nanoseconds for a sample rate and buffer size.
pub fn audio_period_ns(sample_rate: u32, frames_per_buffer: u32) -> u64 {
    (frames_per_buffer as u64) * 1_000_000_000 / (sample_rate as u64)
}

/// Promote the calling thread to a real-time scheduling class.
///
/// - `period_ns`: nominal period between wakeups.
/// - `computation_ns`: expected computation per period (default half period).
/// - `constraint_ns`: hard deadline (default the full period).
///
/// Returns `false` when the host refuses (typically missing privileges);
/// never panics.
pub fn set_realtime_priority(
    period_ns: u64,
    computation_ns: Option<u64>,
    constraint_ns: Option<u64>,
) -> bool {
    let computation_ns = computation_ns.unwrap_or(period_ns / 2);
    let constraint_ns = constraint_ns.unwrap_or(period_ns);

    #[cfg(target_os = "linux")]
    {
        let _ = (computation_ns, constraint_ns);
        set_realtime_linux()
    }
    #[cfg(target_os = "macos")]
    {
        set_realtime_macos(period_ns, computation_ns, constraint_ns)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = (period_ns, computation_ns, constraint_ns);
        false
    }
}

// ---------------------------------------------------------------------------
// Linux — SCHED_FIFO (needs CAP_SYS_NICE or root)
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
fn set_realtime_linux() -> bool {
    // Priority 80 is the usual RT-audio choice.
    let param = libc::sched_param { sched_priority: 80 };
    let rc =
        unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    rc == 0
}

// ---------------------------------------------------------------------------
// macOS — Mach time-constraint policy
// ---------------------------------------------------------------------------

#[cfg(target_os = "macos")]
fn set_realtime_macos(period_ns: u64, computation_ns: u64, constraint_ns: u64) -> bool {
    #[repr(C)]
    struct MachTimebaseInfo {
        numer: u32,
        denom: u32,
    }

    #[repr(C)]
    struct ThreadTimeConstraintPolicy {
        period: u32,
        computation: u32,
        constraint: u32,
        preemptible: i32,
    }

    extern "C" {
        fn mach_timebase_info(info: *mut MachTimebaseInfo) -> i32;
        fn pthread_mach_thread_np(thread: libc::pthread_t) -> u32;
        fn thread_policy_set(thread: u32, flavor: u32, policy: *const u32, count: u32) -> i32;
    }

    const THREAD_TIME_CONSTRAINT_POLICY: u32 = 2;
    const THREAD_TIME_CONSTRAINT_POLICY_COUNT: u32 = 4;

    let mut tb = MachTimebaseInfo { numer: 0, denom: 0 };
    unsafe { mach_timebase_info(&mut tb) };
    if tb.numer == 0 || tb.denom == 0 {
        return false;
    }
    let to_abs = |ns: u64| ((ns * tb.denom as u64) / tb.numer as u64) as u32;

    let policy = ThreadTimeConstraintPolicy {
        period: to_abs(period_ns),
        computation: to_abs(computation_ns),
        constraint: to_abs(constraint_ns),
        preemptible: 1,
    };
    let kr = unsafe {
        thread_policy_set(
            pthread_mach_thread_np(libc::pthread_self()),
            THREAD_TIME_CONSTRAINT_POLICY,
            &policy as *const _ as *const u32,
            THREAD_TIME_CONSTRAINT_POLICY_COUNT,
        )
    };
    kr == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_48k_256_frames() {
        assert_eq!(audio_period_ns(48_000, 256), 5_333_333);
    }

    #[test]
    fn period_44k1_512_frames() {
        let ns = audio_period_ns(44_100, 512);
        assert!(ns > 11_000_000 && ns < 12_000_000);
    }

    #[test]
    fn set_realtime_does_not_panic() {
        // Success needs elevated privileges; only the no-panic contract is
        // asserted here.
        let _ = set_realtime_priority(5_333_333, None, None);
    }
}
