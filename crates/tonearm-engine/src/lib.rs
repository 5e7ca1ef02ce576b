//! Abstractions over the native streaming engine.
//!
//! The native engine is an opaque, single-threaded library reached through a
//! foreign call interface and a set of registered callbacks. This crate
//! defines the seam the rest of the runtime is built against:
//! - The [`gateway::NativeEngine`] trait covering every engine entry point
//!   the runtime uses, and the [`gateway::EngineEvents`] callback surface
//!   the engine invokes back into.
//! - The [`gate::EngineGate`], the single process-wide lock that serializes
//!   all calls into the engine.
//! - Opaque [`handle::RawHandle`] identifiers and the scoped
//!   [`handle::OwnedHandle`] wrapper that ties one native reference count to
//!   one Rust value.
//!
//! Nothing in this crate talks to a real engine; concrete backends (an FFI
//! shim in production, fakes in tests) implement the traits.

pub mod gate;
pub mod gateway;
pub mod handle;
pub mod status;

pub use gate::EngineGate;
pub use gateway::{
    AudioDelivery, AudioFormat, EngineConfig, EngineError, EngineEvents, ImageId, InvalidImageId,
    NativeEngine, RequestId, SearchKind, SearchQuery,
};
pub use handle::{ObjectKind, OwnedHandle, RawHandle};
pub use status::{ConnectionState, StatusCode};
