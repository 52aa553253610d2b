// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared-memory service registry: a per-domain table of live service
// advertisements with opportunistic garbage collection of dead entries.
//
// The table is guarded by a test-and-set spinlock in the segment preamble.
// A process dying while holding the spinlock leaves the registry locked;
// hold windows are a single table scan whose only syscall is the
// zero-signal PID probe, which keeps that window narrow. No caller may
// retain a pointer into the table across a registry call: GC can reap any
// dead entry at any time.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::proc;
use crate::segment::{OpenMode, Segment};
use crate::spin::RawSpinLock;
use crate::{Error, Result};

/// Maximum entries per domain.
pub const MAX_SERVICES: usize = 32;

/// Fixed width of name and channel fields (NUL-padded).
pub const MAX_NAME_LEN: usize = 64;

// ---------------------------------------------------------------------------
// ServiceEntry — fixed wire layout
// ---------------------------------------------------------------------------

/// One service advertisement. Field offsets are part of the cross-process
/// contract: name 0, control 64, reply 128, pid 192, registered_at 196,
/// flags 204 (packed to 4-byte alignment).
#[repr(C, packed(4))]
#[derive(Clone, Copy)]
pub struct ServiceEntry {
    pub name: [u8; MAX_NAME_LEN],
    pub control_channel: [u8; MAX_NAME_LEN],
    pub reply_channel: [u8; MAX_NAME_LEN],
    pub pid: i32,
    /// Unix timestamp, seconds.
    pub registered_at: i64,
    /// Reserved, 0.
    pub flags: u32,
}

const _: () = assert!(std::mem::size_of::<ServiceEntry>() == 208);

fn field_str(field: &[u8; MAX_NAME_LEN]) -> &str {
    let end = field.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
    std::str::from_utf8(&field[..end]).unwrap_or("")
}

fn copy_str(dst: &mut [u8; MAX_NAME_LEN], src: &str) {
    let bytes = src.as_bytes();
    let len = bytes.len().min(MAX_NAME_LEN - 1);
    dst[..len].copy_from_slice(&bytes[..len]);
    dst[len..].fill(0);
}

impl ServiceEntry {
    /// A slot is active when it carries a name and a positive PID.
    pub fn active(&self) -> bool {
        self.pid > 0 && self.name[0] != 0
    }

    /// Active and the advertised PID still exists.
    pub fn is_alive(&self) -> bool {
        self.active() && proc::pid_alive(self.pid)
    }

    pub fn name_str(&self) -> &str {
        field_str(&self.name)
    }

    pub fn control_channel_str(&self) -> &str {
        field_str(&self.control_channel)
    }

    pub fn reply_channel_str(&self) -> &str {
        field_str(&self.reply_channel)
    }
}

impl Default for ServiceEntry {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

impl std::fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pid = self.pid;
        f.debug_struct("ServiceEntry")
            .field("name", &self.name_str())
            .field("pid", &pid)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Table layout
// ---------------------------------------------------------------------------

#[repr(C)]
struct Table {
    lock: RawSpinLock,
    count: u32,
    entries: [ServiceEntry; MAX_SERVICES],
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Per-domain registry of live services. Every process opening the same
/// domain sees the same table.
pub struct ServiceRegistry {
    seg: Segment,
}

unsafe impl Send for ServiceRegistry {}
unsafe impl Sync for ServiceRegistry {}

impl ServiceRegistry {
    fn segment_name(domain: &str) -> String {
        if domain.is_empty() {
            "__ipc_registry__default".to_owned()
        } else {
            format!("__ipc_registry__{domain}")
        }
    }

    /// Open (or create) the registry for `domain` ("" means "default").
    /// A fresh zero-filled table is already valid: unlocked, empty.
    pub fn open(domain: &str) -> Result<Self> {
        let seg = Segment::acquire(
            &Self::segment_name(domain),
            std::mem::size_of::<Table>(),
            OpenMode::CreateOrOpen,
        )?;
        Ok(Self { seg })
    }

    fn table(&self) -> &Table {
        unsafe { &*(self.seg.as_ptr() as *const Table) }
    }

    /// Entries slice for mutation; only call with the table lock held.
    #[allow(clippy::mut_from_ref)]
    fn entries_mut(&self) -> &mut [ServiceEntry; MAX_SERVICES] {
        unsafe { &mut (*(self.seg.as_mut_ptr() as *mut Table)).entries }
    }

    fn stamp(e: &mut ServiceEntry, name: &str, control: &str, reply: &str, pid: i32) {
        *e = ServiceEntry::default();
        copy_str(&mut e.name, name);
        copy_str(&mut e.control_channel, control);
        copy_str(&mut e.reply_channel, reply);
        e.pid = pid;
        e.registered_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
    }

    /// Advertise a service under this process's PID.
    pub fn register(&self, name: &str, control: &str, reply: &str) -> Result<()> {
        self.register_as(name, control, reply, proc::current_pid())
    }

    /// Advertise with an explicit PID (tests and proxies).
    ///
    /// Fails with `AlreadyExists` when a live process already holds the
    /// name; a dead holder's slot is silently reused. `Full` when the table
    /// has no usable slot.
    pub fn register_as(&self, name: &str, control: &str, reply: &str, pid: i32) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("service name is empty"));
        }
        let t = self.table();
        let _g = t.lock.lock();
        let entries = self.entries_mut();

        for e in entries.iter_mut() {
            if e.active() && e.name_str() == name {
                if e.is_alive() {
                    return Err(Error::AlreadyExists(name.to_string()));
                }
                Self::stamp(e, name, control, reply, pid);
                return Ok(());
            }
        }
        for e in entries.iter_mut() {
            if !e.active() || !e.is_alive() {
                Self::stamp(e, name, control, reply, pid);
                unsafe {
                    let count = &mut (*(self.seg.as_mut_ptr() as *mut Table)).count;
                    if (*count as usize) < MAX_SERVICES {
                        *count += 1;
                    }
                }
                return Ok(());
            }
        }
        Err(Error::Full)
    }

    /// Withdraw this process's advertisement. `false` when no entry matches
    /// the name and caller PID.
    pub fn unregister(&self, name: &str) -> bool {
        self.unregister_as(name, proc::current_pid())
    }

    pub fn unregister_as(&self, name: &str, pid: i32) -> bool {
        let t = self.table();
        let _g = t.lock.lock();
        for e in self.entries_mut().iter_mut() {
            if e.active() && e.name_str() == name && e.pid == pid {
                *e = ServiceEntry::default();
                return true;
            }
        }
        false
    }

    /// Look up a live service by exact name. Returns a copy; dead entries
    /// found along the way are reaped.
    pub fn find(&self, name: &str) -> Option<ServiceEntry> {
        let t = self.table();
        let _g = t.lock.lock();
        for e in self.entries_mut().iter_mut() {
            if !e.active() || e.name_str() != name {
                continue;
            }
            if !e.is_alive() {
                *e = ServiceEntry::default();
                continue;
            }
            return Some(e.clone());
        }
        None
    }

    /// Copies of all live entries whose name starts with `prefix`.
    pub fn find_all(&self, prefix: &str) -> Vec<ServiceEntry> {
        self.scan(|e| e.name_str().starts_with(prefix))
    }

    /// Copies of all live entries.
    pub fn list(&self) -> Vec<ServiceEntry> {
        self.scan(|_| true)
    }

    fn scan<F: Fn(&ServiceEntry) -> bool>(&self, keep: F) -> Vec<ServiceEntry> {
        let t = self.table();
        let _g = t.lock.lock();
        let mut out = Vec::new();
        for e in self.entries_mut().iter_mut() {
            if !e.active() {
                continue;
            }
            if !e.is_alive() {
                *e = ServiceEntry::default();
                continue;
            }
            if keep(e) {
                out.push(e.clone());
            }
        }
        out
    }

    /// Sweep the whole table, zeroing entries whose process is gone.
    /// Returns the number reaped.
    pub fn gc(&self) -> usize {
        let t = self.table();
        let _g = t.lock.lock();
        let mut reaped = 0;
        for e in self.entries_mut().iter_mut() {
            if e.active() && !e.is_alive() {
                tracing::debug!(service = e.name_str(), pid = { e.pid }, "reaping dead entry");
                *e = ServiceEntry::default();
                reaped += 1;
            }
        }
        reaped
    }

    /// Zero the entire table.
    pub fn clear(&self) {
        let t = self.table();
        let _g = t.lock.lock();
        for e in self.entries_mut().iter_mut() {
            *e = ServiceEntry::default();
        }
        unsafe {
            (*(self.seg.as_mut_ptr() as *mut Table)).count = 0;
        }
    }

    /// Remove the backing storage for a domain's registry.
    pub fn clear_storage(domain: &str) {
        let name = Self::segment_name(domain);
        crate::segment::purge(&name);
        Segment::remove(&name);
    }
}
