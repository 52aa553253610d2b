// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Demo worker for supervised service groups. The supervisor passes the
// instance id as the sole argument; the logical service name and registry
// domain arrive via SHMKIT_SERVICE / SHMKIT_DOMAIN. Registers
// `<service>.<id>` and idles until SIGTERM.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use shmkit::ServiceRegistry;

static TERM: AtomicBool = AtomicBool::new(false);

extern "C" fn on_term(_sig: libc::c_int) {
    TERM.store(true, Ordering::Release);
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Some(id) = std::env::args().nth(1) else {
        eprintln!("usage: svc_worker <instance-id>");
        return ExitCode::FAILURE;
    };
    let service = std::env::var("SHMKIT_SERVICE").unwrap_or_else(|_| "demo".to_owned());
    let domain = std::env::var("SHMKIT_DOMAIN").unwrap_or_default();

    let instance = format!("{service}.{id}");
    let control = format!("{instance}.ctl");
    let reply = format!("{instance}.rpy");

    unsafe {
        libc::signal(libc::SIGTERM, on_term as libc::sighandler_t);
        libc::signal(libc::SIGINT, on_term as libc::sighandler_t);
    }

    let registry = match ServiceRegistry::open(&domain) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "cannot open registry");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = registry.register(&instance, &control, &reply) {
        tracing::error!(%instance, error = %e, "registration failed");
        return ExitCode::FAILURE;
    }
    tracing::info!(%instance, "registered; serving");

    while !TERM.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(50));
    }

    registry.unregister(&instance);
    tracing::info!(%instance, "unregistered; exiting");
    ExitCode::SUCCESS
}
