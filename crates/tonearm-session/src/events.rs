//! Application-visible session events.
//!
//! One event per native callback, carrying the engine's status code and/or
//! the wrapped result object plus the caller's opaque request state. All
//! variants are delivered from the dedicated dispatch thread, never from a
//! native callback thread directly; the synchronous music-delivery path is
//! the sole exception and bypasses this enum entirely (see
//! [`tonearm_engine::AudioDelivery`]).

use std::any::Any;
use std::fmt;

use tonearm_engine::{ImageId, NativeEngine, OwnedHandle, StatusCode};

/// Opaque application-supplied state attached to a request and echoed back
/// in its completion event.
pub type RequestState = Box<dyn Any + Send>;

/// Decoded payload of a completed image load.
pub struct ImageData {
    pub id: ImageId,
    pub bytes: Vec<u8>,
}

/// Receiver of session events, registered at session creation.
///
/// `on_event` runs on the dispatch thread. A panic inside it is caught,
/// converted into [`SessionEvent::SubscriberPanicked`], and does not stop
/// delivery of subsequent events.
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// A queued, deferred invocation of application event handling.
pub enum SessionEvent {
    /// A login attempt finished. `Ok` means the session is now logged in;
    /// any other code leaves it logged out.
    LoginComplete { status: StatusCode },
    LoggedOut,
    /// Informational; no state transition.
    ConnectionError { status: StatusCode },
    LogMessage { message: String },
    MessageToUser { message: String },
    MetadataUpdated,
    UserinfoUpdated,
    PlayTokenLost,
    EndOfTrack,
    StreamingError { status: StatusCode },
    SearchComplete { result: OwnedHandle, state: Option<RequestState> },
    AlbumBrowseComplete { result: OwnedHandle, state: Option<RequestState> },
    ArtistBrowseComplete { result: OwnedHandle, state: Option<RequestState> },
    ImageLoaded { image: Result<ImageData, StatusCode>, state: Option<RequestState> },
    /// A subscriber panicked while handling the named event.
    SubscriberPanicked { event: &'static str, detail: String },
}

impl SessionEvent {
    /// Stable name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::LoginComplete { .. } => "login-complete",
            SessionEvent::LoggedOut => "logged-out",
            SessionEvent::ConnectionError { .. } => "connection-error",
            SessionEvent::LogMessage { .. } => "log-message",
            SessionEvent::MessageToUser { .. } => "message-to-user",
            SessionEvent::MetadataUpdated => "metadata-updated",
            SessionEvent::UserinfoUpdated => "userinfo-updated",
            SessionEvent::PlayTokenLost => "play-token-lost",
            SessionEvent::EndOfTrack => "end-of-track",
            SessionEvent::StreamingError { .. } => "streaming-error",
            SessionEvent::SearchComplete { .. } => "search-complete",
            SessionEvent::AlbumBrowseComplete { .. } => "album-browse-complete",
            SessionEvent::ArtistBrowseComplete { .. } => "artist-browse-complete",
            SessionEvent::ImageLoaded { .. } => "image-loaded",
            SessionEvent::SubscriberPanicked { .. } => "subscriber-panicked",
        }
    }

    /// Releases any engine reference the event carries, using an engine
    /// reference already in hand. For undeliverable events held on a thread
    /// that is inside a gated call, where a plain drop would take the gate
    /// again.
    pub fn dispose(self, engine: &dyn NativeEngine) {
        match self {
            SessionEvent::SearchComplete { result, .. }
            | SessionEvent::AlbumBrowseComplete { result, .. }
            | SessionEvent::ArtistBrowseComplete { result, .. } => result.release_with(engine),
            _ => {}
        }
    }
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::LoginComplete { status } => {
                write!(formatter, "LoginComplete({status})")
            }
            SessionEvent::ConnectionError { status } => {
                write!(formatter, "ConnectionError({status})")
            }
            SessionEvent::StreamingError { status } => {
                write!(formatter, "StreamingError({status})")
            }
            SessionEvent::LogMessage { message } => {
                write!(formatter, "LogMessage({message:?})")
            }
            SessionEvent::MessageToUser { message } => {
                write!(formatter, "MessageToUser({message:?})")
            }
            SessionEvent::SubscriberPanicked { event, detail } => {
                write!(formatter, "SubscriberPanicked({event}: {detail})")
            }
            other => formatter.write_str(other.kind()),
        }
    }
}
