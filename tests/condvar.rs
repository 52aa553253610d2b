// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Sequence-counter condition variable: bounded waits, wakeups, and the
// no-lost-wakeup property.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use shmkit::{Condvar, RobustMutex};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_pair(prefix: &str) -> (String, String) {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    (
        format!("{prefix}_cv_{n}_{pid}"),
        format!("{prefix}_cvmtx_{n}_{pid}"),
    )
}

#[test]
fn wait_times_out_within_bounds() {
    let (cv_name, mtx_name) = unique_pair("bounded");
    let cv = Condvar::open(&cv_name).expect("condvar");
    let mtx = RobustMutex::open(&mtx_name).expect("mutex");

    assert!(mtx.lock(None));
    let start = Instant::now();
    let notified = cv.wait(&mtx, Some(200));
    let elapsed = start.elapsed();

    assert!(!notified, "nobody notified");
    assert!(elapsed >= Duration::from_millis(180), "woke early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(400), "overslept: {elapsed:?}");
    // The mutex is reacquired even on timeout.
    assert_eq!(mtx.holder(), std::process::id() as i32);
    mtx.unlock();
}

#[test]
fn notify_wakes_one_waiter() {
    let (cv_name, mtx_name) = unique_pair("notify");
    let cv = Arc::new(Condvar::open(&cv_name).expect("condvar"));
    let mtx = Arc::new(RobustMutex::open(&mtx_name).expect("mutex"));
    let ready = Arc::new(AtomicBool::new(false));

    let (cv2, mtx2, ready2) = (Arc::clone(&cv), Arc::clone(&mtx), Arc::clone(&ready));
    let t = thread::spawn(move || {
        assert!(mtx2.lock(None));
        let mut notified = true;
        while !ready2.load(Ordering::Acquire) && notified {
            notified = cv2.wait(&mtx2, Some(5_000));
        }
        mtx2.unlock();
        notified
    });

    thread::sleep(Duration::from_millis(100));
    assert!(mtx.lock(None));
    ready.store(true, Ordering::Release);
    mtx.unlock();
    cv.notify();

    assert!(t.join().unwrap(), "waiter should be notified, not time out");
}

#[test]
fn broadcast_wakes_all_waiters() {
    let (cv_name, mtx_name) = unique_pair("bcast");
    let cv = Arc::new(Condvar::open(&cv_name).expect("condvar"));
    let mtx = Arc::new(RobustMutex::open(&mtx_name).expect("mutex"));
    let go = Arc::new(AtomicBool::new(false));

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let (cv, mtx, go) = (Arc::clone(&cv), Arc::clone(&mtx), Arc::clone(&go));
            thread::spawn(move || {
                assert!(mtx.lock(None));
                let mut ok = true;
                while !go.load(Ordering::Acquire) && ok {
                    ok = cv.wait(&mtx, Some(5_000));
                }
                mtx.unlock();
                ok
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(100));
    assert!(mtx.lock(None));
    go.store(true, Ordering::Release);
    mtx.unlock();
    cv.broadcast();

    for w in waiters {
        assert!(w.join().unwrap(), "every waiter should wake");
    }
}

// A notification issued between the waiter's predicate check and its park
// must not be lost: the sequence bump makes the park fall through.
#[test]
fn notify_before_park_is_not_lost() {
    let (cv_name, mtx_name) = unique_pair("no_lost");
    let cv = Arc::new(Condvar::open(&cv_name).expect("condvar"));
    let mtx = Arc::new(RobustMutex::open(&mtx_name).expect("mutex"));

    for _ in 0..50 {
        let flag = Arc::new(AtomicBool::new(false));
        let (cv2, mtx2, flag2) = (Arc::clone(&cv), Arc::clone(&mtx), Arc::clone(&flag));
        let waiter = thread::spawn(move || {
            assert!(mtx2.lock(None));
            let mut ok = true;
            while !flag2.load(Ordering::Acquire) && ok {
                ok = cv2.wait(&mtx2, Some(2_000));
            }
            mtx2.unlock();
            ok
        });

        // Race the notifier as hard as possible against the waiter's park.
        assert!(mtx.lock(None));
        flag.store(true, Ordering::Release);
        mtx.unlock();
        cv.notify();

        assert!(waiter.join().unwrap(), "wakeup was lost");
    }
}

#[test]
fn ping_pong_through_shared_state() {
    let (cv_name, mtx_name) = unique_pair("pingpong");
    let cv = Arc::new(Condvar::open(&cv_name).expect("condvar"));
    let mtx = Arc::new(RobustMutex::open(&mtx_name).expect("mutex"));
    let turns = Arc::new(AtomicUsize::new(0));
    const ROUNDS: usize = 200;

    let (cv2, mtx2, turns2) = (Arc::clone(&cv), Arc::clone(&mtx), Arc::clone(&turns));
    let t = thread::spawn(move || {
        for _ in 0..ROUNDS {
            assert!(mtx2.lock(None));
            while turns2.load(Ordering::Acquire) % 2 != 1 {
                assert!(cv2.wait(&mtx2, Some(10_000)), "odd side starved");
            }
            turns2.fetch_add(1, Ordering::AcqRel);
            mtx2.unlock();
            cv2.notify();
        }
    });

    for _ in 0..ROUNDS {
        assert!(mtx.lock(None));
        while turns.load(Ordering::Acquire) % 2 != 0 {
            assert!(cv.wait(&mtx, Some(10_000)), "even side starved");
        }
        turns.fetch_add(1, Ordering::AcqRel);
        mtx.unlock();
        cv.notify();
    }

    t.join().unwrap();
    assert_eq!(turns.load(Ordering::Relaxed), ROUNDS * 2);
}
