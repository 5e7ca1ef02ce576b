//! Construction and tracking of sessions against one engine instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tonearm_engine::{EngineGate, NativeEngine, RawHandle};

use crate::config::SessionConfig;
use crate::events::EventSubscriber;
use crate::session::{Session, SessionError, SessionInner};

/// Live sessions keyed by their native handle, so engine-side identifiers
/// can be mapped back to runtime sessions.
pub(crate) struct Registry {
    sessions: Mutex<HashMap<RawHandle, Weak<SessionInner>>>,
}

impl Registry {
    fn new() -> Arc<Self> {
        Arc::new(Self { sessions: Mutex::new(HashMap::new()) })
    }

    fn insert(&self, handle: RawHandle, session: &Arc<SessionInner>) {
        self.lock().insert(handle, Arc::downgrade(session));
    }

    pub(crate) fn remove(&self, handle: RawHandle) {
        self.lock().remove(&handle);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RawHandle, Weak<SessionInner>>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Owner of one engine instance and factory for its sessions.
///
/// All sessions created through one manager share the engine gate, so their
/// engine calls serialize against each other. Dropping the manager does not
/// close its sessions; call [`SessionManager::close_all`] for that.
pub struct SessionManager {
    gate: Arc<EngineGate>,
    registry: Arc<Registry>,
}

impl SessionManager {
    /// Wraps `engine` for session use. The engine must not be driven through
    /// any other path once handed over.
    pub fn new(engine: Box<dyn NativeEngine>) -> Arc<Self> {
        Arc::new(Self { gate: EngineGate::new(engine), registry: Registry::new() })
    }

    /// Creates a session and starts its runtime threads. `subscriber`
    /// receives every event of this session, on a dedicated thread.
    pub fn create_session(
        &self,
        config: &SessionConfig,
        application_key: &[u8],
        subscriber: Arc<dyn EventSubscriber>,
    ) -> Result<Session, SessionError> {
        let session = Session::create(
            self.gate.clone(),
            Arc::downgrade(&self.registry),
            config,
            application_key,
            subscriber,
        )?;
        if let Some(handle) = session.raw_handle() {
            self.registry.insert(handle, session.inner());
        }
        Ok(session)
    }

    /// The session behind a native handle, if it is still alive.
    pub fn lookup(&self, handle: RawHandle) -> Option<Session> {
        let inner = self.registry.lock().get(&handle)?.upgrade()?;
        Some(Session::from_inner(inner))
    }

    /// Closes every session still registered.
    pub fn close_all(&self) {
        let sessions: Vec<Weak<SessionInner>> =
            self.registry.lock().values().cloned().collect();
        for session in sessions {
            if let Some(inner) = session.upgrade() {
                inner.close();
            }
        }
    }

    /// The shared engine gate, for components that issue their own calls.
    pub fn gate(&self) -> Arc<EngineGate> {
        self.gate.clone()
    }
}
