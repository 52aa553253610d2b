// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Typed FlatBuffer envelope over the byte bus. The serialization format is
// opaque to the transport: a `Builder` produces a contiguous byte span, the
// bus moves bytes, and `Message<T>` offers zero-copy typed access on the
// receiving side. The wrapper adds typing only; no concurrency of its own.

use flatbuffers::{
    root, FlatBufferBuilder, Follow, ForwardsUOffset, Verifiable, Verifier, VerifierOptions,
    WIPOffset,
};

use crate::buffer::MsgBuf;
use crate::channel::{Channel, Mode, Route};
use crate::Result;

// ---------------------------------------------------------------------------
// Message<T> — received bytes with typed access
// ---------------------------------------------------------------------------

/// A received message. `T` is the FlatBuffers-generated root table type.
/// An empty message is the timed-out / nothing-received outcome.
pub struct Message<T> {
    buf: MsgBuf,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Message<T> {
    pub fn new(buf: MsgBuf) -> Self {
        Self {
            buf,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn empty() -> Self {
        Self::new(MsgBuf::new())
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        self.buf.as_slice()
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }
}

impl<T> Message<T>
where
    T: for<'a> Follow<'a> + Verifiable,
{
    /// Structural verification; run this on untrusted input before `root`.
    pub fn verify(&self) -> bool {
        if self.buf.is_empty() {
            return false;
        }
        let opts = VerifierOptions::default();
        let mut v = Verifier::new(&opts, self.buf.as_slice());
        <ForwardsUOffset<T>>::run_verifier(&mut v, 0).is_ok()
    }

    /// Zero-copy access to the root table; `None` for an empty or
    /// malformed buffer.
    pub fn root(&self) -> Option<<T as Follow<'_>>::Inner> {
        if self.buf.is_empty() {
            return None;
        }
        root::<T>(self.buf.as_slice()).ok()
    }
}

// ---------------------------------------------------------------------------
// Builder — message construction
// ---------------------------------------------------------------------------

/// Builder for outgoing messages; wraps a growable `FlatBufferBuilder`.
pub struct Builder {
    fbb: FlatBufferBuilder<'static>,
    finished: bool,
}

impl Builder {
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            fbb: FlatBufferBuilder::with_capacity(initial_capacity),
            finished: false,
        }
    }

    /// The inner builder, for creating strings, vectors and tables.
    pub fn fbb(&mut self) -> &mut FlatBufferBuilder<'static> {
        &mut self.fbb
    }

    /// Finish with `root` as the buffer root.
    pub fn finish<T>(&mut self, root: WIPOffset<T>) {
        self.fbb.finish(root, None);
        self.finished = true;
    }

    /// Finish with a 4-byte schema file identifier.
    pub fn finish_with_id<T>(&mut self, root: WIPOffset<T>, file_id: &str) {
        self.fbb.finish(root, Some(file_id));
        self.finished = true;
    }

    /// The finished bytes; empty until `finish` is called.
    pub fn data(&self) -> &[u8] {
        if self.finished {
            self.fbb.finished_data()
        } else {
            &[]
        }
    }

    pub fn size(&self) -> usize {
        self.data().len()
    }

    /// Reset for reuse.
    pub fn clear(&mut self) {
        self.fbb.reset();
        self.finished = false;
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new(1024)
    }
}

// ---------------------------------------------------------------------------
// TypedChannel / TypedRoute
// ---------------------------------------------------------------------------

/// Typed wrapper over [`Channel`]. A sender endpoint may only send, a
/// receiver endpoint may only recv; the underlying bus enforces this.
pub struct TypedChannel<T> {
    ch: Channel,
    _marker: std::marker::PhantomData<T>,
}

impl<T> TypedChannel<T> {
    pub fn connect(name: &str, mode: Mode) -> Result<Self> {
        Ok(Self {
            ch: Channel::connect(name, mode)?,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn connect_with_prefix(prefix: &str, name: &str, mode: Mode) -> Result<Self> {
        Ok(Self {
            ch: Channel::connect_with_prefix(prefix, name, mode)?,
            _marker: std::marker::PhantomData,
        })
    }

    /// Send a finished builder's bytes.
    pub fn send(&self, b: &Builder, timeout_ms: u64) -> Result<bool> {
        self.ch.send(b.data(), timeout_ms)
    }

    /// Send already-serialized bytes.
    pub fn send_bytes(&self, data: &[u8], timeout_ms: u64) -> Result<bool> {
        self.ch.send(data, timeout_ms)
    }

    /// Receive one message; empty on timeout.
    pub fn recv(&mut self, timeout_ms: Option<u64>) -> Result<Message<T>> {
        Ok(Message::new(self.ch.recv(timeout_ms)?))
    }

    pub fn try_recv(&mut self) -> Result<Message<T>> {
        Ok(Message::new(self.ch.try_recv()?))
    }

    /// The untyped bus underneath.
    pub fn raw(&mut self) -> &mut Channel {
        &mut self.ch
    }

    pub fn clear_storage(name: &str) {
        Channel::clear_storage(name);
    }
}

/// Typed wrapper over [`Route`].
pub struct TypedRoute<T> {
    rt: Route,
    _marker: std::marker::PhantomData<T>,
}

impl<T> TypedRoute<T> {
    pub fn connect(name: &str, mode: Mode) -> Result<Self> {
        Ok(Self {
            rt: Route::connect(name, mode)?,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn send(&self, b: &Builder, timeout_ms: u64) -> Result<bool> {
        self.rt.send(b.data(), timeout_ms)
    }

    pub fn send_bytes(&self, data: &[u8], timeout_ms: u64) -> Result<bool> {
        self.rt.send(data, timeout_ms)
    }

    pub fn recv(&mut self, timeout_ms: Option<u64>) -> Result<Message<T>> {
        Ok(Message::new(self.rt.recv(timeout_ms)?))
    }

    pub fn try_recv(&mut self) -> Result<Message<T>> {
        Ok(Message::new(self.rt.try_recv()?))
    }

    pub fn raw(&mut self) -> &mut Route {
        &mut self.rt
    }

    pub fn clear_storage(name: &str) {
        Route::clear_storage(name);
    }
}
