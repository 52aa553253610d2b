// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Multi-process test helper.
//
//   lock_probe hold <mutex>                      lock and sleep forever
//   lock_probe bump <mutex> <segment> <n> <t>    t threads x n increments
//   lock_probe idle                              sleep forever
//
// `hold` prints "locked" on stdout once it owns the lock so the parent can
// synchronize before killing this process.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use shmkit::{OpenMode, RobustMutex, Segment};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("hold") if args.len() == 3 => hold(&args[2]),
        Some("bump") if args.len() == 6 => bump(&args[2], &args[3], &args[4], &args[5]),
        Some("idle") => idle(),
        _ => {
            eprintln!("usage: lock_probe hold <mutex> | bump <mutex> <segment> <n> <threads> | idle");
            ExitCode::FAILURE
        }
    }
}

fn hold(mutex_name: &str) -> ExitCode {
    let mtx = match RobustMutex::open(mutex_name) {
        Ok(m) => m,
        Err(_) => return ExitCode::FAILURE,
    };
    if !mtx.lock(Some(5_000)) {
        return ExitCode::FAILURE;
    }
    println!("locked");
    std::io::stdout().flush().ok();
    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}

fn bump(mutex_name: &str, seg_name: &str, n: &str, threads: &str) -> ExitCode {
    let (Ok(n), Ok(threads)) = (n.parse::<u64>(), threads.parse::<usize>()) else {
        return ExitCode::FAILURE;
    };
    let seg = match Segment::acquire(seg_name, std::mem::size_of::<u64>(), OpenMode::CreateOrOpen) {
        Ok(s) => Arc::new(s),
        Err(_) => return ExitCode::FAILURE,
    };
    let mtx = match RobustMutex::open(mutex_name) {
        Ok(m) => Arc::new(m),
        Err(_) => return ExitCode::FAILURE,
    };

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let seg = Arc::clone(&seg);
            let mtx = Arc::clone(&mtx);
            std::thread::spawn(move || {
                let counter = seg.as_mut_ptr() as *mut u64;
                for _ in 0..n {
                    mtx.lock(None);
                    unsafe { *counter += 1 };
                    mtx.unlock();
                }
            })
        })
        .collect();
    for h in handles {
        if h.join().is_err() {
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

fn idle() -> ExitCode {
    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}
