// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Service group: startup, registration, primary election, failover, and
// respawn, driving the bundled svc_worker binary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use shmkit::{GroupConfig, Role, ServiceGroup, ServiceRegistry};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_grp_{n}_{}", std::process::id())
}

fn config(service: &str, domain: &str, replicas: usize) -> GroupConfig {
    let mut cfg = GroupConfig::new(service, env!("CARGO_BIN_EXE_svc_worker"));
    cfg.replicas = replicas;
    cfg.spawn_timeout = Duration::from_secs(10);
    cfg.extra_env = vec![
        ("SHMKIT_SERVICE".to_owned(), service.to_owned()),
        ("SHMKIT_DOMAIN".to_owned(), domain.to_owned()),
    ];
    cfg
}

#[test]
fn start_brings_up_all_replicas() {
    let service = unique("svc_up");
    let domain = unique("dom_up");
    let registry = ServiceRegistry::open(&domain).expect("registry");

    let mut group = ServiceGroup::new(&registry, config(&service, &domain, 2));
    assert!(group.start(), "group should come up");
    assert_eq!(group.alive_count(), 2);
    assert_eq!(group.primary().expect("primary").id, 0);
    assert_eq!(group.instances()[1].role, Role::Standby);

    // Both instances advertised themselves.
    assert!(registry.find(&format!("{service}.0")).is_some());
    assert!(registry.find(&format!("{service}.1")).is_some());

    group.stop(Duration::from_secs(2));
    assert_eq!(group.alive_count(), 0);
}

// Killing the primary and running one health check promotes the standby;
// auto-respawn brings the group back to full strength with the old primary
// slot demoted to standby.
#[test]
fn primary_death_triggers_failover_and_respawn() {
    let service = unique("svc_fo");
    let domain = unique("dom_fo");
    let registry = ServiceRegistry::open(&domain).expect("registry");

    let mut group = ServiceGroup::new(&registry, config(&service, &domain, 2));
    assert!(group.start());
    assert_eq!(group.alive_count(), 2);
    let primary_pid = group.primary().expect("primary").pid();
    assert_eq!(group.primary().unwrap().id, 0);

    unsafe { libc::kill(primary_pid, libc::SIGKILL) };
    std::thread::sleep(Duration::from_millis(200));

    assert!(group.health_check(), "primary death must report a failover");
    assert_eq!(group.primary().expect("new primary").id, 1);

    // Follow-up check: instance 0 is back as a standby.
    group.health_check();
    assert_eq!(group.alive_count(), 2);
    assert_eq!(group.instances()[0].role, Role::Standby);
    assert_eq!(group.primary().unwrap().id, 1);

    group.stop(Duration::from_secs(2));
}

#[test]
fn healthy_group_reports_no_failover() {
    let service = unique("svc_ok");
    let domain = unique("dom_ok");
    let registry = ServiceRegistry::open(&domain).expect("registry");

    let mut group = ServiceGroup::new(&registry, config(&service, &domain, 2));
    assert!(group.start());
    assert!(!group.health_check(), "nothing died, no failover");
    assert_eq!(group.alive_count(), 2);
    group.stop(Duration::from_secs(2));
}

#[test]
fn force_failover_promotes_standby() {
    let service = unique("svc_force");
    let domain = unique("dom_force");
    let registry = ServiceRegistry::open(&domain).expect("registry");

    let mut group = ServiceGroup::new(&registry, config(&service, &domain, 2));
    assert!(group.start());
    assert_eq!(group.primary().unwrap().id, 0);

    assert!(group.force_failover(), "a standby should take over");
    assert_eq!(group.primary().expect("new primary").id, 1);
    assert_eq!(group.alive_count(), 2, "old primary respawned as standby");

    group.stop(Duration::from_secs(2));
}

#[test]
fn standby_death_is_not_a_failover() {
    let service = unique("svc_standby");
    let domain = unique("dom_standby");
    let registry = ServiceRegistry::open(&domain).expect("registry");

    let mut group = ServiceGroup::new(&registry, config(&service, &domain, 2));
    assert!(group.start());
    let standby_pid = group.instances()[1].pid();

    unsafe { libc::kill(standby_pid, libc::SIGKILL) };
    std::thread::sleep(Duration::from_millis(200));

    assert!(!group.health_check(), "standby death is not a failover");
    assert_eq!(group.primary().unwrap().id, 0);
    // Auto-respawn restored the standby.
    assert_eq!(group.alive_count(), 2);

    group.stop(Duration::from_secs(2));
}

#[test]
fn unspawnable_worker_leaves_group_down() {
    let service = unique("svc_bad");
    let domain = unique("dom_bad");
    let registry = ServiceRegistry::open(&domain).expect("registry");

    let mut cfg = config(&service, &domain, 2);
    cfg.executable = "/nonexistent/worker/binary".to_owned();
    cfg.auto_respawn = false;

    let mut group = ServiceGroup::new(&registry, cfg);
    assert!(!group.start(), "no instance can come up");
    assert_eq!(group.alive_count(), 0);
    assert!(group.primary().is_none());
    assert!(group.instances().iter().all(|i| i.role == Role::Dead));
}

#[test]
fn single_replica_group() {
    let service = unique("svc_one");
    let domain = unique("dom_one");
    let registry = ServiceRegistry::open(&domain).expect("registry");

    let mut group = ServiceGroup::new(&registry, config(&service, &domain, 1));
    assert!(group.start());
    assert_eq!(group.alive_count(), 1);
    assert_eq!(group.primary().unwrap().id, 0);
    group.stop(Duration::from_secs(2));
}
