// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Supervised service group: keep N replicas of a worker binary running,
// designate exactly one primary, detect death, promote a standby, respawn.
//
// The supervisor is the only party that knows about roles. Workers are
// oblivious; they just register `<service>.<id>` and serve. Warm-standby
// state replication is the application's business.

use std::time::{Duration, Instant};

use crate::proc::{self, ChildProc};
use crate::registry::{ServiceEntry, ServiceRegistry};

/// Role of one managed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Standby,
    Dead,
}

/// One managed replica.
pub struct Instance {
    pub id: usize,
    pub role: Role,
    pub proc: Option<ChildProc>,
    /// Registry entry captured when the instance came up.
    pub entry: ServiceEntry,
    /// `<service>.<id>`, the name the worker registers under.
    pub instance_name: String,
}

impl Instance {
    pub fn is_alive(&self) -> bool {
        self.proc.as_ref().is_some_and(|p| p.is_alive())
    }

    pub fn pid(&self) -> i32 {
        self.proc.as_ref().map_or(0, |p| p.pid())
    }
}

/// Supervisor configuration.
pub struct GroupConfig {
    /// Logical service name; instances register `<service_name>.<id>`.
    pub service_name: String,
    /// Worker binary path. Spawned with the instance id as sole argument.
    pub executable: String,
    /// Total instances (one primary, the rest standby).
    pub replicas: usize,
    /// Respawn dead instances during health checks.
    pub auto_respawn: bool,
    /// How long a freshly spawned worker gets to appear in the registry.
    pub spawn_timeout: Duration,
    /// Extra environment for spawned workers (service name, domain, ...).
    pub extra_env: Vec<(String, String)>,
}

impl GroupConfig {
    pub fn new(service_name: &str, executable: &str) -> Self {
        Self {
            service_name: service_name.to_owned(),
            executable: executable.to_owned(),
            replicas: 2,
            auto_respawn: true,
            spawn_timeout: Duration::from_secs(5),
            extra_env: Vec::new(),
        }
    }
}

/// Registry polling interval while waiting for a spawned worker.
const SPAWN_POLL: Duration = Duration::from_millis(50);

/// A supervised group of redundant service instances with failover.
pub struct ServiceGroup<'a> {
    registry: &'a ServiceRegistry,
    config: GroupConfig,
    instances: Vec<Instance>,
    primary_idx: Option<usize>,
}

impl<'a> ServiceGroup<'a> {
    pub fn new(registry: &'a ServiceRegistry, config: GroupConfig) -> Self {
        let instances = (0..config.replicas)
            .map(|id| Instance {
                id,
                role: Role::Dead,
                proc: None,
                entry: ServiceEntry::default(),
                instance_name: format!("{}.{id}", config.service_name),
            })
            .collect();
        Self {
            registry,
            config,
            instances,
            primary_idx: None,
        }
    }

    /// Spawn every instance and elect the first live one primary.
    /// `true` when at least one instance came up.
    pub fn start(&mut self) -> bool {
        for i in 0..self.instances.len() {
            self.spawn_instance(i);
        }
        self.elect_primary()
    }

    /// Scan instance liveness; on primary death elect a successor and (when
    /// configured) respawn the dead slots. Returns `true` when a failover
    /// happened; the caller must re-point its channels at the new primary.
    pub fn health_check(&mut self) -> bool {
        let mut primary_lost = false;
        for inst in &mut self.instances {
            if inst.role == Role::Dead {
                continue;
            }
            if !inst.is_alive() {
                if inst.role == Role::Primary {
                    primary_lost = true;
                }
                tracing::debug!(instance = %inst.instance_name, "instance died");
                inst.role = Role::Dead;
            }
        }

        if primary_lost {
            self.elect_primary();
            if self.config.auto_respawn {
                self.respawn_dead();
            }
            return true;
        }
        if self.config.auto_respawn {
            self.respawn_dead();
        }
        false
    }

    /// Kill the primary, reap it, elect a successor, respawn. Testing aid.
    pub fn force_failover(&mut self) -> bool {
        if let Some(idx) = self.primary_idx {
            let inst = &mut self.instances[idx];
            if let Some(p) = inst.proc.as_ref() {
                if p.is_alive() {
                    p.force_kill();
                    p.wait_for_exit(Duration::from_secs(2));
                }
            }
            inst.role = Role::Dead;
        }
        let ok = self.elect_primary();
        if self.config.auto_respawn {
            self.respawn_dead();
        }
        ok
    }

    /// Gracefully stop every live instance.
    pub fn stop(&mut self, grace: Duration) {
        for inst in &mut self.instances {
            if let Some(p) = inst.proc.as_ref() {
                if p.is_alive() {
                    p.shutdown(grace);
                }
            }
            inst.role = Role::Dead;
        }
        self.primary_idx = None;
    }

    /// The current primary, if one is elected and still marked as such.
    pub fn primary(&self) -> Option<&Instance> {
        let inst = &self.instances[self.primary_idx?];
        (inst.role == Role::Primary).then_some(inst)
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn alive_count(&self) -> usize {
        self.instances.iter().filter(|i| i.is_alive()).count()
    }

    // --- internals ---

    fn spawn_instance(&mut self, idx: usize) -> bool {
        // Clear any stale advertisement so the wait below observes the new
        // worker, not a crash leftover.
        self.registry.gc();

        let instance_name = self.instances[idx].instance_name.clone();
        let id_arg = idx.to_string();
        let child = match proc::spawn_with_env(
            &instance_name,
            &self.config.executable,
            &[&id_arg],
            &self.config.extra_env,
        ) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(instance = %instance_name, error = %e, "spawn failed");
                self.instances[idx].role = Role::Dead;
                return false;
            }
        };

        let deadline = Instant::now() + self.config.spawn_timeout;
        loop {
            if let Some(entry) = self.registry.find(&instance_name) {
                let inst = &mut self.instances[idx];
                inst.proc = Some(child);
                inst.entry = entry;
                inst.role = Role::Standby;
                return true;
            }
            if !child.is_alive() {
                tracing::debug!(instance = %instance_name, "worker exited before registering");
                self.instances[idx].role = Role::Dead;
                return false;
            }
            if Instant::now() >= deadline {
                tracing::debug!(instance = %instance_name, "worker missed registration deadline");
                child.force_kill();
                child.wait_for_exit(Duration::from_secs(1));
                self.instances[idx].role = Role::Dead;
                return false;
            }
            std::thread::sleep(SPAWN_POLL);
        }
    }

    /// Lowest-index live instance becomes primary; other live instances
    /// become standbys. `false` when nothing is alive.
    fn elect_primary(&mut self) -> bool {
        self.primary_idx = None;
        let winner = match self.instances.iter().position(Instance::is_alive) {
            Some(i) => i,
            None => return false,
        };
        for (i, inst) in self.instances.iter_mut().enumerate() {
            if !inst.is_alive() {
                continue;
            }
            inst.role = if i == winner {
                Role::Primary
            } else {
                Role::Standby
            };
        }
        self.primary_idx = Some(winner);
        tracing::debug!(
            service = %self.config.service_name,
            primary = winner,
            "primary elected"
        );
        true
    }

    fn respawn_dead(&mut self) {
        for i in 0..self.instances.len() {
            if self.instances[i].role == Role::Dead {
                self.spawn_instance(i);
            }
        }
    }
}
