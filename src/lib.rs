// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared-memory IPC toolkit for low-latency coordination between cooperating
// processes on a single host. Everything cross-process goes through named
// shared segments plus address-based park/unpark; no primitive here survives
// a reboot, but all of them survive the abrupt death of any participant.

pub mod error;
pub use error::{Error, Result};

pub mod name;

mod segment;
pub use segment::{OpenMode, Segment};

pub mod park;

mod spin;
pub use spin::{RawSpinLock, SpinGuard};

mod mutex;
pub use mutex::{MutexGuard, RobustMutex};

mod condvar;
pub use condvar::Condvar;

mod semaphore;
pub use semaphore::Semaphore;

pub mod ring;
pub use ring::SpscRing;

pub mod buffer;
pub use buffer::MsgBuf;

pub mod waiter;
pub use waiter::Waiter;

pub mod channel;
pub use channel::{Channel, Mode, Route};

pub mod proc;
pub use proc::{spawn, ChildProc, ExitStatus};

pub mod registry;
pub use registry::{ServiceEntry, ServiceRegistry, MAX_NAME_LEN, MAX_SERVICES};

pub mod group;
pub use group::{GroupConfig, Instance, Role, ServiceGroup};

pub mod typed;
pub use typed::{Builder, Message, TypedChannel, TypedRoute};

pub mod rt;
