// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Crate-wide error taxonomy. Timeouts on lock/wait paths are reported as
// boolean outcomes, not through this type; only constructor-like operations
// (acquire, open, connect, register, spawn) surface an `Error`.

use std::io;

/// Errors surfaced by constructor-like operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Primitive not yet initialized, or already closed.
    #[error("primitive unavailable (not initialized or already closed)")]
    Unavailable,

    /// The named object does not exist (open-only mode).
    #[error("no shared object named {0:?}")]
    NotFound(String),

    /// Exclusive creation collided with an existing object.
    #[error("shared object {0:?} already exists")]
    AlreadyExists(String),

    /// A fixed-size table has no free slot.
    #[error("table is full")]
    Full,

    /// Deadline reached with no success.
    #[error("timed out")]
    TimedOut,

    /// Caller-supplied argument is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A cooperating process died mid-operation; state was recovered.
    #[error("peer process died")]
    DeadPeer,

    /// Underlying OS call failed.
    #[error(transparent)]
    IoError(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build an `IoError` variant from the calling thread's errno.
    pub(crate) fn last_os_error() -> Self {
        Error::IoError(io::Error::last_os_error())
    }
}
