// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named shared-memory segments with an in-band attach counter.
//
// Layout: the user payload comes first; a trailing atomic<i32> attach counter
// sits at align4(declared_size). The counter offset is always derived from
// the size the caller declared, never from the OS-reported object size (the
// OS may round to pages). This is why `Open` mode also requires the size.
//
// A process-local cache keyed by OS name guarantees one mapping per process
// and exactly one attach-counter increment per process. When the last local
// handle drops, the counter is decremented; whoever drops it to zero unlinks
// the object from the namespace.

use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::name;
use crate::{Error, Result};

/// Open disposition for [`Segment::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create exclusively; fail with `AlreadyExists` if the name is taken.
    Create,
    /// Attach to an existing object; fail with `NotFound` otherwise.
    Open,
    /// Create if missing, attach if present.
    CreateOrOpen,
}

const ALIGN: usize = std::mem::align_of::<AtomicI32>();

/// Total mapped size: payload rounded up to the counter's alignment, plus
/// the counter itself.
pub(crate) fn total_size(user_size: usize) -> usize {
    let aligned = ((user_size.wrapping_sub(1) / ALIGN) + 1) * ALIGN;
    aligned + std::mem::size_of::<AtomicI32>()
}

/// The trailing attach counter of a mapping of `total` bytes at `base`.
///
/// # Safety
/// `base` must point to a live mapping of at least `total` bytes.
unsafe fn attach_word(base: *mut u8, total: usize) -> &'static AtomicI32 {
    let offset = total - std::mem::size_of::<AtomicI32>();
    &*(base.add(offset) as *const AtomicI32)
}

// ---------------------------------------------------------------------------
// Mapping — one per (process, OS name)
// ---------------------------------------------------------------------------

struct Mapping {
    base: *mut u8,
    total: usize,
    user: usize,
    os_name: String,
    /// Attach-counter value before our increment; 0 means we were first.
    prev_ref: i32,
}

unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Drop for Mapping {
    fn drop(&mut self) {
        let prev = unsafe { attach_word(self.base, self.total) }.fetch_sub(1, Ordering::AcqRel);
        if unsafe { libc::munmap(self.base as *mut libc::c_void, self.total) } != 0 {
            tracing::warn!(
                name = %self.os_name,
                error = %io::Error::last_os_error(),
                "munmap failed"
            );
        }
        if prev <= 1 {
            unlink_os_name(&self.os_name);
        }
    }
}

fn unlink_os_name(os_name: &str) {
    let Ok(c_name) = CString::new(os_name.as_bytes()) else {
        return;
    };
    if unsafe { libc::shm_unlink(c_name.as_ptr()) } != 0 {
        let e = io::Error::last_os_error();
        if e.raw_os_error() != Some(libc::ENOENT) {
            tracing::warn!(name = %os_name, error = %e, "shm_unlink failed");
        }
    }
}

fn os_acquire(os_name: &str, user_size: usize, mode: OpenMode) -> Result<Mapping> {
    let c_name = CString::new(os_name.as_bytes())
        .map_err(|_| Error::InvalidArgument("segment name contains NUL"))?;
    let total = total_size(user_size);
    let perms: libc::mode_t = 0o666;

    // Two attempts: the second handles a stale object left behind by a crash
    // with a smaller declared size (unlink, then recreate).
    for attempt in 0..2 {
        let (fd, created) = match mode {
            OpenMode::Create => {
                let fd = unsafe {
                    libc::shm_open(
                        c_name.as_ptr(),
                        libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                        perms as libc::c_uint,
                    )
                };
                if fd == -1 {
                    let e = io::Error::last_os_error();
                    return Err(if e.raw_os_error() == Some(libc::EEXIST) {
                        Error::AlreadyExists(os_name.to_string())
                    } else {
                        Error::IoError(e)
                    });
                }
                (fd, true)
            }
            OpenMode::Open => {
                let fd =
                    unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, perms as libc::c_uint) };
                if fd == -1 {
                    let e = io::Error::last_os_error();
                    return Err(if e.raw_os_error() == Some(libc::ENOENT) {
                        Error::NotFound(os_name.to_string())
                    } else {
                        Error::IoError(e)
                    });
                }
                (fd, false)
            }
            OpenMode::CreateOrOpen => {
                // Exclusive create first, so ftruncate only ever runs on an
                // object we own. Truncating an already-sized object on macOS
                // can zero it before failing.
                let fd = unsafe {
                    libc::shm_open(
                        c_name.as_ptr(),
                        libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                        perms as libc::c_uint,
                    )
                };
                if fd != -1 {
                    (fd, true)
                } else {
                    let e = io::Error::last_os_error();
                    if e.raw_os_error() != Some(libc::EEXIST) {
                        return Err(Error::IoError(e));
                    }
                    let fd = unsafe {
                        libc::shm_open(c_name.as_ptr(), libc::O_RDWR, perms as libc::c_uint)
                    };
                    if fd == -1 {
                        let e = io::Error::last_os_error();
                        if e.raw_os_error() == Some(libc::ENOENT) && attempt == 0 {
                            // Lost a race with a concurrent unlink; retry.
                            continue;
                        }
                        return Err(Error::IoError(e));
                    }
                    (fd, false)
                }
            }
        };

        unsafe { libc::fchmod(fd, perms) };

        if created {
            if unsafe { libc::ftruncate(fd, total as libc::off_t) } != 0 {
                let e = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                unlink_os_name(os_name);
                return Err(Error::IoError(e));
            }
        } else {
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            if unsafe { libc::fstat(fd, &mut st) } != 0 {
                let e = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(Error::IoError(e));
            }
            if (st.st_size as usize) < total {
                unsafe { libc::close(fd) };
                if mode == OpenMode::CreateOrOpen && attempt == 0 {
                    tracing::warn!(
                        name = %os_name,
                        have = st.st_size,
                        need = total,
                        "stale undersized shared object; recreating"
                    );
                    unlink_os_name(os_name);
                    continue;
                }
                return Err(Error::IoError(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "shared object smaller than declared size",
                )));
            }
        }

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if base == libc::MAP_FAILED {
            return Err(Error::last_os_error());
        }
        let base = base as *mut u8;

        let prev_ref = unsafe { attach_word(base, total) }.fetch_add(1, Ordering::AcqRel);
        return Ok(Mapping {
            base,
            total,
            user: user_size,
            os_name: os_name.to_string(),
            prev_ref,
        });
    }
    Err(Error::last_os_error())
}

// ---------------------------------------------------------------------------
// Process-local cache
// ---------------------------------------------------------------------------

struct CacheEntry {
    mapping: Mapping,
    /// Live `Segment` handles in this process.
    local: AtomicUsize,
}

type Cache = Mutex<HashMap<String, Arc<CacheEntry>>>;

fn cache() -> &'static Cache {
    static CACHE: OnceLock<Cache> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Drop the cache entry for `name` so the next acquire maps a fresh object.
/// Existing handles keep their mapping alive until they drop.
pub(crate) fn purge(user_name: &str) {
    let key = name::os_name(user_name);
    cache().lock().unwrap().remove(&key);
}

// ---------------------------------------------------------------------------
// Segment — the public handle
// ---------------------------------------------------------------------------

/// A handle onto a named shared-memory segment.
///
/// All handles for the same name within one process share a single mapping;
/// the in-band attach counter counts attached *processes*. Dropping the last
/// handle in the last attached process unlinks the object.
pub struct Segment {
    entry: Arc<CacheEntry>,
    user_name: String,
}

unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Attach to (or create) the named segment with `size` payload bytes.
    pub fn acquire(name: &str, size: usize, mode: OpenMode) -> Result<Self> {
        Self::acquire_with(name, size, mode, |_| Ok(()))
    }

    /// Like [`acquire`](Self::acquire), running `init` on the payload when
    /// this call created the object. `init` runs while the process-local
    /// cache is locked, so no other thread in this process can observe the
    /// segment before construction finishes. Other *processes* must gate on
    /// an in-segment flag; a fresh object is guaranteed zero-filled.
    pub(crate) fn acquire_with<F>(name: &str, size: usize, mode: OpenMode, init: F) -> Result<Self>
    where
        F: FnOnce(*mut u8) -> Result<()>,
    {
        if name.is_empty() {
            return Err(Error::InvalidArgument("segment name is empty"));
        }
        if size == 0 {
            return Err(Error::InvalidArgument("segment size is zero"));
        }

        let key = name::os_name(name);
        let mut map = cache().lock().unwrap();

        if let Some(entry) = map.get(&key) {
            if mode == OpenMode::Create {
                return Err(Error::AlreadyExists(key));
            }
            if entry.mapping.user < size {
                return Err(Error::InvalidArgument(
                    "segment already mapped locally with a smaller size",
                ));
            }
            entry.local.fetch_add(1, Ordering::Relaxed);
            return Ok(Self {
                entry: Arc::clone(entry),
                user_name: name.to_string(),
            });
        }

        let mapping = os_acquire(&key, size, mode)?;
        if mapping.prev_ref == 0 {
            init(mapping.base)?;
        }
        let entry = Arc::new(CacheEntry {
            mapping,
            local: AtomicUsize::new(1),
        });
        map.insert(key, Arc::clone(&entry));
        Ok(Self {
            entry,
            user_name: name.to_string(),
        })
    }

    /// Pointer to the payload.
    pub fn as_ptr(&self) -> *const u8 {
        self.entry.mapping.base
    }

    /// Mutable pointer to the payload.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.entry.mapping.base
    }

    /// Declared payload size.
    pub fn user_size(&self) -> usize {
        self.entry.mapping.user
    }

    /// Full mapped size, attach counter included.
    pub fn total_size(&self) -> usize {
        self.entry.mapping.total
    }

    /// The name this handle was acquired under.
    pub fn name(&self) -> &str {
        &self.user_name
    }

    /// Current value of the in-band attach counter (attached processes).
    pub fn attach_count(&self) -> i32 {
        unsafe { attach_word(self.entry.mapping.base, self.entry.mapping.total) }
            .load(Ordering::Acquire)
    }

    /// Force-unlink the name from the namespace. Existing mappings in any
    /// process stay valid; the next `acquire` creates a fresh object.
    pub fn remove(name: &str) {
        unlink_os_name(&name::os_name(name));
    }

    /// Synonym for [`remove`](Self::remove).
    pub fn clear_storage(name: &str) {
        Self::remove(name);
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        let key = name::os_name(&self.user_name);
        let mut map = cache().lock().unwrap();
        let prev = self.entry.local.fetch_sub(1, Ordering::AcqRel);
        if prev <= 1 {
            // Only drop the cache's Arc if it still points at our entry;
            // a purge + re-acquire may have replaced it.
            if map
                .get(&key)
                .is_some_and(|e| Arc::ptr_eq(e, &self.entry))
            {
                map.remove(&key);
            }
        }
    }
}
