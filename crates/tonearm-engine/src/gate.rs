//! The process-wide lock serializing all calls into the native engine.

use std::sync::{Arc, Mutex};

use crate::gateway::NativeEngine;

/// Exclusive gate in front of the non-thread-safe native engine.
///
/// Every call into the engine, from any thread, goes through [`EngineGate::with`].
/// Callbacks the engine fires while a gated call is running execute on the
/// calling thread and receive the engine by reference instead of re-locking;
/// see [`crate::gateway::EngineEvents`].
///
/// The gate must never be held while blocking on an unrelated resource (in
/// particular the audio buffer pool's condition variables); the audio
/// delivery path runs entirely outside it.
pub struct EngineGate {
    engine: Mutex<Box<dyn NativeEngine>>,
}

impl EngineGate {
    pub fn new(engine: Box<dyn NativeEngine>) -> Arc<Self> {
        Arc::new(Self { engine: Mutex::new(engine) })
    }

    /// Runs `operation` with exclusive access to the engine.
    ///
    /// A poisoned lock is recovered rather than propagated: a panicking
    /// application handler must not permanently wedge the engine for every
    /// other thread.
    pub fn with<R>(&self, operation: impl FnOnce(&dyn NativeEngine) -> R) -> R {
        let guard = match self.engine.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        operation(guard.as_ref())
    }
}
