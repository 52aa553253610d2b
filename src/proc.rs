// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Minimal subprocess control: spawn, liveness probe, polite and forceful
// termination, bounded wait. Just enough for a supervisor; not a general
// process library.

use std::cell::Cell;
use std::ffi::CString;
use std::io;
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// PID of the calling process.
pub fn current_pid() -> i32 {
    unsafe { libc::getpid() }
}

/// Whether a PID names an existing process (zero-signal probe). Racy by
/// nature; callers must tolerate both stale answers.
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

/// Final disposition of a child, as observed by [`ChildProc::wait_for_exit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Exited normally with this code.
    Exited(i32),
    /// Terminated by this signal.
    Signaled(i32),
    /// Still running when the wait deadline passed.
    StillRunning,
}

/// Owning handle to a spawned child process.
///
/// Deliberately not `Clone`: exactly one owner reaps the child. Liveness
/// probes reap with `WNOHANG` first so a killed child reads as dead without
/// an explicit wait (a zombie still answers the zero-signal probe).
pub struct ChildProc {
    pid: libc::pid_t,
    name: String,
    reaped: Cell<Option<ExitStatus>>,
}

/// Spawn `executable` with `args`, inheriting the parent environment.
/// `name` is a logical label carried in the handle for diagnostics.
pub fn spawn(name: &str, executable: &str, args: &[&str]) -> Result<ChildProc> {
    spawn_with_env(name, executable, args, &[])
}

/// Like [`spawn`], additionally setting (or overriding) the given
/// environment variables in the child.
pub fn spawn_with_env(
    name: &str,
    executable: &str,
    args: &[&str],
    extra_env: &[(String, String)],
) -> Result<ChildProc> {
    if executable.is_empty() {
        return Err(Error::InvalidArgument("executable path is empty"));
    }
    let c_exe = CString::new(executable)
        .map_err(|_| Error::InvalidArgument("executable path contains NUL"))?;

    let mut argv: Vec<CString> = Vec::with_capacity(args.len() + 1);
    argv.push(c_exe.clone());
    for a in args {
        argv.push(CString::new(*a).map_err(|_| Error::InvalidArgument("argument contains NUL"))?);
    }
    let mut argv_ptrs: Vec<*mut libc::c_char> =
        argv.iter().map(|s| s.as_ptr() as *mut libc::c_char).collect();
    argv_ptrs.push(std::ptr::null_mut());

    let envs: Vec<CString> = std::env::vars()
        .filter(|(k, _)| !extra_env.iter().any(|(ek, _)| ek == k))
        .map(|(k, v)| format!("{k}={v}"))
        .chain(extra_env.iter().map(|(k, v)| format!("{k}={v}")))
        .filter_map(|kv| CString::new(kv).ok())
        .collect();
    let mut env_ptrs: Vec<*mut libc::c_char> =
        envs.iter().map(|s| s.as_ptr() as *mut libc::c_char).collect();
    env_ptrs.push(std::ptr::null_mut());

    let mut pid: libc::pid_t = -1;
    let eno = unsafe {
        libc::posix_spawn(
            &mut pid,
            c_exe.as_ptr(),
            std::ptr::null(),
            std::ptr::null(),
            argv_ptrs.as_mut_ptr(),
            env_ptrs.as_mut_ptr(),
        )
    };
    if eno != 0 {
        return Err(Error::IoError(io::Error::from_raw_os_error(eno)));
    }
    tracing::debug!(name, executable, pid, "spawned child");
    Ok(ChildProc {
        pid,
        name: name.to_string(),
        reaped: Cell::new(None),
    })
}

impl ChildProc {
    pub fn pid(&self) -> i32 {
        self.pid as i32
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the child is still running. Reaps a finished child as a side
    /// effect, so SIGKILLed children do not linger as live-looking zombies.
    pub fn is_alive(&self) -> bool {
        if self.reaped.get().is_some() {
            return false;
        }
        self.try_reap().is_none()
    }

    /// Non-blocking reap. Returns the exit status once the child has
    /// finished, `None` while it is still running.
    fn try_reap(&self) -> Option<ExitStatus> {
        if let Some(st) = self.reaped.get() {
            return Some(st);
        }
        let mut status: libc::c_int = 0;
        let rc = unsafe { libc::waitpid(self.pid, &mut status, libc::WNOHANG) };
        if rc == self.pid {
            let st = if libc::WIFSIGNALED(status) {
                ExitStatus::Signaled(libc::WTERMSIG(status))
            } else {
                ExitStatus::Exited(libc::WEXITSTATUS(status))
            };
            self.reaped.set(Some(st));
            return Some(st);
        }
        if rc == -1 && !pid_alive(self.pid as i32) {
            // Not our child to reap (or already collected elsewhere) and the
            // PID is gone: treat as exited with unknown status.
            let st = ExitStatus::Exited(0);
            self.reaped.set(Some(st));
            return Some(st);
        }
        None
    }

    /// Request graceful termination (SIGTERM).
    pub fn request_shutdown(&self) -> bool {
        if self.reaped.get().is_some() {
            return false;
        }
        unsafe { libc::kill(self.pid, libc::SIGTERM) == 0 }
    }

    /// Terminate immediately (SIGKILL).
    pub fn force_kill(&self) -> bool {
        if self.reaped.get().is_some() {
            return false;
        }
        unsafe { libc::kill(self.pid, libc::SIGKILL) == 0 }
    }

    /// Wait up to `timeout` for the child to finish, polling every 10 ms.
    pub fn wait_for_exit(&self, timeout: Duration) -> ExitStatus {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(st) = self.try_reap() {
                return st;
            }
            if Instant::now() >= deadline {
                return ExitStatus::StillRunning;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Graceful stop: SIGTERM, wait up to `grace`, SIGKILL if still alive,
    /// then a short final wait.
    pub fn shutdown(&self, grace: Duration) -> ExitStatus {
        self.request_shutdown();
        let st = self.wait_for_exit(grace);
        if st != ExitStatus::StillRunning {
            return st;
        }
        self.force_kill();
        self.wait_for_exit(Duration::from_secs(1))
    }
}

impl std::fmt::Debug for ChildProc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildProc")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("reaped", &self.reaped.get())
            .finish()
    }
}
