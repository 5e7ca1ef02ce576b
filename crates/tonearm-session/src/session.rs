//! The session: login lifecycle, request issuing, playback control, and the
//! engine callback surface.
//!
//! A [`Session`] is a cheap clonable handle onto the shared runtime state.
//! The same state object is registered with the engine as its callback
//! receiver, so completion callbacks resolve the correlation table and either
//! enqueue an event or wake a blocked caller directly.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};
use std::time::Duration;

use tonearm_engine::{
    AudioDelivery, AudioFormat, ConnectionState, EngineConfig, EngineError, EngineEvents,
    EngineGate, ImageId, InvalidImageId, NativeEngine, ObjectKind, OwnedHandle, RawHandle,
    RequestId, SearchQuery, StatusCode,
};

use crate::config::SessionConfig;
use crate::correlation::{CompletionMode, RequestOutcome, RequestTable, WaitHandle};
use crate::dispatch::EventDispatcher;
use crate::driver::Driver;
use crate::events::{EventSubscriber, ImageData, RequestState, SessionEvent};
use crate::manager::Registry;

/// Grace period for a completion observed mid-flight when a blocking wait
/// times out. The completion callback consumes the table entry immediately
/// before signalling the wait handle, so this only has to cover that gap.
const COMPLETION_GRACE: Duration = Duration::from_secs(1);

/// Errors surfaced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The engine completed the call and reported a non-success status.
    #[error("engine call failed: {0}")]
    Native(StatusCode),
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// A blocking request did not complete in time. The request is
    /// abandoned; its late completion, if any, is discarded.
    #[error("request did not complete within {0:?}")]
    Timeout(Duration),
    /// A completion delivered a result of the wrong kind. Indicates a
    /// correlation bug, not a caller error.
    #[error("completion delivered an unexpected result kind")]
    UnexpectedOutcome,
    /// The engine declined to start the request; no completion will fire.
    #[error("the engine refused to start the request")]
    RequestNotStarted,
    #[error("session is closed")]
    Closed,
    #[error("failed to spawn runtime thread: {0}")]
    Spawn(#[from] io::Error),
    #[error(transparent)]
    InvalidImageId(#[from] InvalidImageId),
}

fn check(status: StatusCode) -> Result<(), SessionError> {
    if status.is_ok() { Ok(()) } else { Err(SessionError::Native(status)) }
}

/// A logged-in (or logging-in) connection to the engine.
///
/// Cloning shares the underlying session; [`Session::close`] shuts the shared
/// runtime down for all clones.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    gate: Arc<EngineGate>,
    handle: OnceLock<RawHandle>,
    requests: RequestTable,
    dispatcher: EventDispatcher,
    driver: OnceLock<Driver>,
    delivery: RwLock<Option<Arc<dyn AudioDelivery>>>,
    closed: AtomicBool,
    registry: Weak<Registry>,
}

impl Session {
    /// Creates the native session, registers callbacks, and starts the
    /// driver and dispatch threads. On any failure everything already
    /// started is torn back down.
    pub(crate) fn create(
        gate: Arc<EngineGate>,
        registry: Weak<Registry>,
        config: &SessionConfig,
        application_key: &[u8],
        subscriber: Arc<dyn EventSubscriber>,
    ) -> Result<Self, SessionError> {
        let dispatcher = EventDispatcher::start(subscriber)?;
        let inner = Arc::new(SessionInner {
            gate: gate.clone(),
            handle: OnceLock::new(),
            requests: RequestTable::new(),
            dispatcher,
            driver: OnceLock::new(),
            delivery: RwLock::new(None),
            closed: AtomicBool::new(false),
            registry,
        });

        let engine_config = EngineConfig {
            user_agent: &config.user_agent,
            settings_location: &config.settings_location,
            cache_location: &config.cache_location,
            application_key,
        };
        let events: Arc<dyn EngineEvents> = inner.clone();
        let created = gate.with(|engine| engine.create_session(&engine_config, events));
        let handle = match created {
            Ok(handle) => handle,
            Err(error) => {
                inner.dispatcher.stop();
                return Err(error.into());
            }
        };
        let _ = inner.handle.set(handle);
        log::info!("created session {handle}");

        match Driver::start(gate.clone(), handle) {
            Ok(driver) => {
                let _ = inner.driver.set(driver);
            }
            Err(error) => {
                gate.with(|engine| engine.release_session(handle));
                inner.dispatcher.stop();
                return Err(error.into());
            }
        }
        Ok(Self { inner })
    }

    pub(crate) fn inner(&self) -> &Arc<SessionInner> {
        &self.inner
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    /// Raw handle of the underlying native session.
    pub(crate) fn raw_handle(&self) -> Option<RawHandle> {
        self.inner.handle.get().copied()
    }

    fn handle(&self) -> Result<RawHandle, SessionError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        self.inner.handle.get().copied().ok_or(SessionError::Closed)
    }

    /// Starts a login. Completion arrives as
    /// [`SessionEvent::LoginComplete`]; an error here means the attempt
    /// never started.
    pub fn login(
        &self,
        username: &str,
        password: &str,
        remember: bool,
    ) -> Result<(), SessionError> {
        let handle = self.handle()?;
        check(self.inner.gate.with(|engine| engine.login(handle, username, password, remember)))
    }

    /// Logs in with credentials stored by a previous remembered login.
    pub fn relogin(&self) -> Result<(), SessionError> {
        let handle = self.handle()?;
        check(self.inner.gate.with(|engine| engine.relogin(handle)))
    }

    /// Logs out. When the session is not actually logged in, or the engine
    /// cannot say, the engine is not involved and a synthetic
    /// [`SessionEvent::LoggedOut`] is delivered instead, so the caller
    /// observes the same event either way.
    pub fn log_out(&self, forget: bool) -> Result<(), SessionError> {
        let handle = self.handle()?;
        let engaged = self.inner.gate.with(|engine| -> Result<bool, SessionError> {
            let state =
                engine.connection_state(handle).unwrap_or(ConnectionState::Undefined);
            if state != ConnectionState::LoggedIn {
                return Ok(false);
            }
            if forget {
                check(engine.forget_me(handle))?;
            }
            check(engine.logout(handle))?;
            Ok(true)
        })?;
        if !engaged {
            self.inner.dispatcher.enqueue(SessionEvent::LoggedOut);
        }
        Ok(())
    }

    /// Current connection state; [`ConnectionState::Undefined`] when the
    /// engine cannot be asked.
    pub fn connection_state(&self) -> ConnectionState {
        let Ok(handle) = self.handle() else {
            return ConnectionState::Undefined;
        };
        self.inner
            .gate
            .with(|engine| engine.connection_state(handle))
            .unwrap_or(ConnectionState::Undefined)
    }

    /// Starts an asynchronous search; the result arrives as
    /// [`SessionEvent::SearchComplete`] carrying `state` back.
    pub fn search(
        &self,
        query: &SearchQuery,
        state: Option<RequestState>,
    ) -> Result<(), SessionError> {
        let handle = self.handle()?;
        let request = self.inner.requests.allocate(state, CompletionMode::Async);
        let started = self
            .inner
            .gate
            .with(|engine| engine.search_create(handle, query, request).is_some());
        self.finish_issue(request, started)
    }

    /// Runs a search and blocks for its result.
    pub fn search_blocking(
        &self,
        query: &SearchQuery,
        timeout: Duration,
    ) -> Result<OwnedHandle, SessionError> {
        let handle = self.handle()?;
        let wait = WaitHandle::new();
        let request =
            self.inner.requests.allocate(None, CompletionMode::Blocking(wait.clone()));
        let started = self
            .inner
            .gate
            .with(|engine| engine.search_create(handle, query, request).is_some());
        self.finish_issue(request, started)?;
        match self.await_outcome(wait, request, timeout)? {
            RequestOutcome::Search(result) => Ok(result),
            _ => Err(SessionError::UnexpectedOutcome),
        }
    }

    /// Starts an asynchronous album browse for `album`; the result arrives
    /// as [`SessionEvent::AlbumBrowseComplete`].
    pub fn album_browse(
        &self,
        album: RawHandle,
        state: Option<RequestState>,
    ) -> Result<(), SessionError> {
        let handle = self.handle()?;
        let request = self.inner.requests.allocate(state, CompletionMode::Async);
        let started = self
            .inner
            .gate
            .with(|engine| engine.album_browse_create(handle, album, request).is_some());
        self.finish_issue(request, started)
    }

    /// Browses an album and blocks for the result.
    pub fn album_browse_blocking(
        &self,
        album: RawHandle,
        timeout: Duration,
    ) -> Result<OwnedHandle, SessionError> {
        let handle = self.handle()?;
        let wait = WaitHandle::new();
        let request =
            self.inner.requests.allocate(None, CompletionMode::Blocking(wait.clone()));
        let started = self
            .inner
            .gate
            .with(|engine| engine.album_browse_create(handle, album, request).is_some());
        self.finish_issue(request, started)?;
        match self.await_outcome(wait, request, timeout)? {
            RequestOutcome::AlbumBrowse(result) => Ok(result),
            _ => Err(SessionError::UnexpectedOutcome),
        }
    }

    /// Starts an asynchronous artist browse for `artist`.
    pub fn artist_browse(
        &self,
        artist: RawHandle,
        state: Option<RequestState>,
    ) -> Result<(), SessionError> {
        let handle = self.handle()?;
        let request = self.inner.requests.allocate(state, CompletionMode::Async);
        let started = self
            .inner
            .gate
            .with(|engine| engine.artist_browse_create(handle, artist, request).is_some());
        self.finish_issue(request, started)
    }

    /// Browses an artist and blocks for the result.
    pub fn artist_browse_blocking(
        &self,
        artist: RawHandle,
        timeout: Duration,
    ) -> Result<OwnedHandle, SessionError> {
        let handle = self.handle()?;
        let wait = WaitHandle::new();
        let request =
            self.inner.requests.allocate(None, CompletionMode::Blocking(wait.clone()));
        let started = self
            .inner
            .gate
            .with(|engine| engine.artist_browse_create(handle, artist, request).is_some());
        self.finish_issue(request, started)?;
        match self.await_outcome(wait, request, timeout)? {
            RequestOutcome::ArtistBrowse(result) => Ok(result),
            _ => Err(SessionError::UnexpectedOutcome),
        }
    }

    /// Starts loading the image identified by `id`. If the engine already
    /// holds the data the completion runs immediately, before this call
    /// returns; either way the result arrives as
    /// [`SessionEvent::ImageLoaded`].
    pub fn load_image(
        &self,
        id: &ImageId,
        state: Option<RequestState>,
    ) -> Result<(), SessionError> {
        let handle = self.handle()?;
        let request = self.inner.requests.allocate(state, CompletionMode::Async);
        let started = self.inner.gate.with(|engine| self.inner.start_image(engine, handle, id, request));
        self.finish_issue(request, started)
    }

    /// Loads an image and blocks for its data.
    pub fn load_image_blocking(
        &self,
        id: &ImageId,
        timeout: Duration,
    ) -> Result<ImageData, SessionError> {
        let handle = self.handle()?;
        let wait = WaitHandle::new();
        let request =
            self.inner.requests.allocate(None, CompletionMode::Blocking(wait.clone()));
        let started = self.inner.gate.with(|engine| self.inner.start_image(engine, handle, id, request));
        self.finish_issue(request, started)?;
        match self.await_outcome(wait, request, timeout)? {
            RequestOutcome::Image(Ok(data)) => Ok(data),
            RequestOutcome::Image(Err(status)) => Err(SessionError::Native(status)),
            _ => Err(SessionError::UnexpectedOutcome),
        }
    }

    /// Loads `track` into the engine's player, replacing whatever was
    /// loaded before.
    pub fn player_load(&self, track: RawHandle) -> Result<(), SessionError> {
        let handle = self.handle()?;
        self.inner.gate.with(|engine| {
            // The engine requires an explicit unload between tracks.
            engine.player_unload(handle);
            check(engine.player_load(handle, track))
        })
    }

    /// Starts or pauses playback of the loaded track.
    pub fn player_play(&self, play: bool) -> Result<(), SessionError> {
        let handle = self.handle()?;
        check(self.inner.gate.with(|engine| engine.player_play(handle, play)))
    }

    /// Seeks the loaded track to `offset_ms` milliseconds.
    pub fn player_seek(&self, offset_ms: u32) -> Result<(), SessionError> {
        let handle = self.handle()?;
        check(self.inner.gate.with(|engine| engine.player_seek(handle, offset_ms)))
    }

    /// Unloads the current track and stops delivery.
    pub fn player_unload(&self) -> Result<(), SessionError> {
        let handle = self.handle()?;
        check(self.inner.gate.with(|engine| engine.player_unload(handle)))
    }

    /// Installs (or clears) the consumer of the synchronous audio stream.
    /// Frames delivered while no consumer is installed are refused, which
    /// makes the engine pause and retry.
    pub fn set_audio_delivery(&self, delivery: Option<Arc<dyn AudioDelivery>>) {
        let mut slot = match self.inner.delivery.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = delivery;
    }

    /// Number of requests still awaiting their completion callback.
    pub fn pending_requests(&self) -> usize {
        self.inner.requests.pending()
    }

    /// Shuts the session down: stops the driver, releases the native
    /// session, and drains the dispatcher. Idempotent; all clones observe
    /// the closed state.
    pub fn close(&self) {
        self.inner.close();
    }

    fn finish_issue(&self, request: RequestId, started: bool) -> Result<(), SessionError> {
        if started {
            return Ok(());
        }
        // The engine never started the request, so no completion will fire;
        // reclaim the table entry here.
        self.inner.requests.resolve(request);
        Err(SessionError::RequestNotStarted)
    }

    /// Blocks on `wait` until the completion arrives or `timeout` elapses.
    fn await_outcome(
        &self,
        wait: WaitHandle,
        request: RequestId,
        timeout: Duration,
    ) -> Result<RequestOutcome, SessionError> {
        if let Some(outcome) = wait.wait_timeout(timeout) {
            return Ok(outcome);
        }
        if self.inner.requests.resolve(request).is_some() {
            // Entry reclaimed before the completion consumed it; the late
            // completion (if any) will be dropped as unknown.
            return Err(SessionError::Timeout(timeout));
        }
        // The completion consumed the entry and is about to signal (it does
        // so immediately after). Take the outcome here so its native handle
        // is dropped on this thread, never on the callback thread that still
        // holds the gate.
        match wait.wait_timeout(COMPLETION_GRACE) {
            Some(outcome) => {
                drop(outcome);
                Err(SessionError::Timeout(timeout))
            }
            None => {
                log::error!("request {request} completion never signalled; leaking its result");
                std::mem::forget(wait);
                Err(SessionError::Timeout(timeout))
            }
        }
    }
}

impl SessionInner {
    /// Issues an image load under the gate. Returns false when the engine
    /// refused to create the image object.
    fn start_image(
        &self,
        engine: &dyn NativeEngine,
        session: RawHandle,
        id: &ImageId,
        request: RequestId,
    ) -> bool {
        let Some(image) = engine.image_create(session, id) else {
            return false;
        };
        if engine.image_is_loaded(image) {
            // Data is already present: run the completion path in-line. It
            // consumes the image reference created above.
            self.image_loaded(engine, image, request);
        } else {
            engine.image_add_load_callback(image, request);
        }
        true
    }

    /// Shared completion path for search and browse callbacks.
    fn complete_object(
        &self,
        engine: &dyn NativeEngine,
        result: RawHandle,
        kind: ObjectKind,
        request: RequestId,
        as_event: fn(OwnedHandle, Option<RequestState>) -> SessionEvent,
        as_outcome: fn(OwnedHandle) -> RequestOutcome,
    ) {
        let Some(pending) = self.requests.resolve(request) else {
            log::warn!("dropping {kind:?} completion for unknown request {request}");
            return;
        };
        let result = OwnedHandle::acquire(engine, self.gate.clone(), result, kind);
        match pending.mode {
            CompletionMode::Async => {
                // This runs under the gate; an undeliverable event must hand
                // its handle straight back instead of dropping it here.
                if let Err(event) = self.dispatcher.try_enqueue(as_event(result, pending.state)) {
                    log::warn!("dispatcher stopped; releasing {} result in place", event.kind());
                    event.dispose(engine);
                }
            }
            CompletionMode::Blocking(wait) => wait.complete(as_outcome(result)),
        }
    }

    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(driver) = self.driver.get() {
            driver.stop();
        }
        if let Some(handle) = self.handle.get().copied() {
            self.gate.with(|engine| engine.release_session(handle));
            if let Some(registry) = self.registry.upgrade() {
                registry.remove(handle);
            }
            log::info!("closed session {handle}");
        }
        self.dispatcher.stop();
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.close();
    }
}

impl EngineEvents for SessionInner {
    fn logged_in(&self, status: StatusCode) {
        self.dispatcher.enqueue(SessionEvent::LoginComplete { status });
    }

    fn logged_out(&self) {
        self.dispatcher.enqueue(SessionEvent::LoggedOut);
    }

    fn connection_error(&self, status: StatusCode) {
        self.dispatcher.enqueue(SessionEvent::ConnectionError { status });
    }

    fn log_message(&self, message: &str) {
        // Engine log lines arrive newline-terminated and occasionally carry
        // stray control bytes.
        let message: String = message.chars().filter(|c| !c.is_control()).collect();
        log::debug!("engine: {message}");
        self.dispatcher.enqueue(SessionEvent::LogMessage { message });
    }

    fn message_to_user(&self, message: &str) {
        let message = message.trim_end().to_string();
        self.dispatcher.enqueue(SessionEvent::MessageToUser { message });
    }

    fn metadata_updated(&self) {
        self.dispatcher.enqueue(SessionEvent::MetadataUpdated);
    }

    fn userinfo_updated(&self) {
        self.dispatcher.enqueue(SessionEvent::UserinfoUpdated);
    }

    fn notify_wake(&self) {
        match self.driver.get() {
            Some(driver) => driver.notify(),
            // Only possible in the window between session creation and
            // driver start; the driver's first poll covers it.
            None => log::trace!("wake-up before driver start"),
        }
    }

    fn play_token_lost(&self) {
        self.dispatcher.enqueue(SessionEvent::PlayTokenLost);
    }

    fn end_of_track(&self) {
        self.dispatcher.enqueue(SessionEvent::EndOfTrack);
    }

    fn streaming_error(&self, status: StatusCode) {
        self.dispatcher.enqueue(SessionEvent::StreamingError { status });
    }

    fn music_delivery(&self, format: &AudioFormat, pcm: &[u8], frames: usize) -> usize {
        let consumer = {
            let slot = match self.delivery.read() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.clone()
        };
        match consumer {
            Some(consumer) => consumer.deliver(format, pcm, frames),
            None => 0,
        }
    }

    fn search_complete(&self, engine: &dyn NativeEngine, result: RawHandle, request: RequestId) {
        self.complete_object(
            engine,
            result,
            ObjectKind::Search,
            request,
            |result, state| SessionEvent::SearchComplete { result, state },
            RequestOutcome::Search,
        );
    }

    fn album_browse_complete(
        &self,
        engine: &dyn NativeEngine,
        result: RawHandle,
        request: RequestId,
    ) {
        self.complete_object(
            engine,
            result,
            ObjectKind::AlbumBrowse,
            request,
            |result, state| SessionEvent::AlbumBrowseComplete { result, state },
            RequestOutcome::AlbumBrowse,
        );
    }

    fn artist_browse_complete(
        &self,
        engine: &dyn NativeEngine,
        result: RawHandle,
        request: RequestId,
    ) {
        self.complete_object(
            engine,
            result,
            ObjectKind::ArtistBrowse,
            request,
            |result, state| SessionEvent::ArtistBrowseComplete { result, state },
            RequestOutcome::ArtistBrowse,
        );
    }

    fn image_loaded(&self, engine: &dyn NativeEngine, image: RawHandle, request: RequestId) {
        let pending = self.requests.resolve(request);
        let outcome = if pending.is_some() {
            Some(
                engine
                    .image_data(image)
                    .and_then(|bytes| engine.image_id(image).map(|id| ImageData { id, bytes }))
                    .map_err(|error| error.status()),
            )
        } else {
            log::warn!("dropping image completion for unknown request {request}");
            None
        };
        // The image reference from image_create is consumed here either way.
        engine.object_release(image, ObjectKind::Image);
        let (Some(pending), Some(outcome)) = (pending, outcome) else {
            return;
        };
        match pending.mode {
            CompletionMode::Async => self
                .dispatcher
                .enqueue(SessionEvent::ImageLoaded { image: outcome, state: pending.state }),
            CompletionMode::Blocking(wait) => wait.complete(RequestOutcome::Image(outcome)),
        }
    }
}
