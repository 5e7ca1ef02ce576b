//! Opaque native handles and scoped reference ownership.

use std::fmt;
use std::sync::Arc;

use crate::gate::EngineGate;
use crate::gateway::NativeEngine;

/// Opaque identifier of a native engine object. The engine reference-counts
/// the object behind it; a bare `RawHandle` carries no ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(u64);

impl RawHandle {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "0x{:x}", self.0)
    }
}

/// Kind of native object a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Session,
    Search,
    AlbumBrowse,
    ArtistBrowse,
    Image,
    Track,
}

/// A native handle that owns exactly one engine reference.
///
/// Construction adds a reference through the engine (already gated at the
/// call site); the reference is dropped exactly once, either by an explicit
/// [`OwnedHandle::close`] or on drop. Dropping takes the gate itself, so an
/// `OwnedHandle` must not be dropped from inside a gated call or callback;
/// the runtime only ever drops these on application or dispatch threads.
///
/// There is deliberately no `Clone`: a second owner must add its own engine
/// reference through [`OwnedHandle::acquire`].
pub struct OwnedHandle {
    raw: RawHandle,
    kind: ObjectKind,
    gate: Arc<EngineGate>,
    released: bool,
}

impl OwnedHandle {
    /// Wraps `raw`, adding one reference via `engine`. The caller must hold
    /// the gate (or be inside a callback on the thread that does).
    pub fn acquire(
        engine: &dyn NativeEngine,
        gate: Arc<EngineGate>,
        raw: RawHandle,
        kind: ObjectKind,
    ) -> Self {
        engine.object_add_ref(raw, kind);
        Self { raw, kind, gate, released: false }
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Releases the native reference through an engine reference already in
    /// hand, for callers that are inside a gated call or callback and must
    /// not take the gate again.
    pub fn release_with(mut self, engine: &dyn NativeEngine) {
        if self.released {
            return;
        }
        self.released = true;
        engine.object_release(self.raw, self.kind);
        log::trace!("released {:?} handle {} in place", self.kind, self.raw);
    }

    /// Releases the native reference. Safe to call more than once; only the
    /// first call reaches the engine.
    pub fn close(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let (raw, kind) = (self.raw, self.kind);
        self.gate.with(|engine| engine.object_release(raw, kind));
        log::trace!("released {kind:?} handle {raw}");
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("OwnedHandle")
            .field("raw", &self.raw)
            .field("kind", &self.kind)
            .field("released", &self.released)
            .finish()
    }
}
