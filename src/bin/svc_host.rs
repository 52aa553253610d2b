// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Demo supervisor: runs a service group of svc_worker replicas, health-checks
// on an interval, and reports failovers. Ctrl+C stops the group gracefully.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use shmkit::{GroupConfig, ServiceGroup, ServiceRegistry};

#[derive(Parser)]
#[command(about = "Supervise a replicated shared-memory service")]
struct Args {
    /// Logical service name.
    #[arg(long, default_value = "demo")]
    service: String,

    /// Worker binary to spawn (defaults to the bundled svc_worker).
    #[arg(long)]
    worker: Option<String>,

    /// Registry domain.
    #[arg(long, default_value = "")]
    domain: String,

    /// Number of replicas (one primary, the rest standby).
    #[arg(long, default_value_t = 2)]
    replicas: usize,

    /// Disable automatic respawn of dead instances.
    #[arg(long)]
    no_respawn: bool,

    /// Health-check interval in milliseconds.
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,
}

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_int(_sig: libc::c_int) {
    STOP.store(true, Ordering::Release);
}

fn sibling_worker() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("svc_worker")))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "svc_worker".to_owned())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let worker = args.worker.unwrap_or_else(sibling_worker);

    unsafe {
        libc::signal(libc::SIGINT, on_int as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_int as libc::sighandler_t);
    }

    let registry = match ServiceRegistry::open(&args.domain) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "cannot open registry");
            return ExitCode::FAILURE;
        }
    };

    let mut config = GroupConfig::new(&args.service, &worker);
    config.replicas = args.replicas;
    config.auto_respawn = !args.no_respawn;
    config.extra_env = vec![
        ("SHMKIT_SERVICE".to_owned(), args.service.clone()),
        ("SHMKIT_DOMAIN".to_owned(), args.domain.clone()),
    ];

    let mut group = ServiceGroup::new(&registry, config);
    if !group.start() {
        tracing::error!(service = %args.service, "no instance came up");
        return ExitCode::FAILURE;
    }
    tracing::info!(
        service = %args.service,
        alive = group.alive_count(),
        primary = ?group.primary().map(|p| p.id),
        "group started"
    );

    while !STOP.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(args.interval_ms));
        if group.health_check() {
            tracing::warn!(
                new_primary = ?group.primary().map(|p| p.id),
                alive = group.alive_count(),
                "failover"
            );
        }
    }

    tracing::info!("stopping group");
    group.stop(Duration::from_secs(2));
    ExitCode::SUCCESS
}
