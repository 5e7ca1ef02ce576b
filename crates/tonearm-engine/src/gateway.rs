//! The call surface into the native engine and the callback surface out of it.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::handle::{ObjectKind, RawHandle};
use crate::status::{ConnectionState, StatusCode};

/// Errors produced by gateway calls that can fail outright (as opposed to
/// calls that complete and report a [`StatusCode`]).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine completed the call but reported a non-success status.
    #[error("engine call failed: {0}")]
    Status(StatusCode),
    /// The backend shim itself failed before reaching the engine.
    #[error("engine backend failure: {0}")]
    Backend(String),
}

impl EngineError {
    /// The status code carried by this error, with backend failures mapped to
    /// a transient code so they can travel through event arguments.
    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::Status(status) => *status,
            EngineError::Backend(_) => StatusCode::OtherTransient,
        }
    }
}

/// Opaque per-request identifier handed to the engine as callback user data
/// and echoed back in the matching completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

/// Sample layout of a delivered audio stream: interleaved signed 16-bit PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Number of interleaved channels.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioFormat {
    /// Size of one frame (one sample per channel) in bytes.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 2
    }
}

/// Consumer of the synchronous audio delivery stream.
///
/// `deliver` runs in-line on the engine's own audio thread and its return
/// value carries backpressure: the engine re-delivers any frames not
/// consumed. The implementation may block waiting for buffer space, but it
/// runs outside the engine gate and must never try to acquire it.
pub trait AudioDelivery: Send + Sync {
    /// Accept `frames` frames of interleaved PCM; returns how many frames
    /// were actually consumed.
    fn deliver(&self, format: &AudioFormat, pcm: &[u8], frames: usize) -> usize;
}

/// Raw image identifier: 20 bytes, conventionally written as 40 hex chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId([u8; 20]);

/// The provided string was not a valid image identifier.
#[derive(Debug, thiserror::Error)]
#[error("image ids are exactly 40 hexadecimal characters")]
pub struct InvalidImageId;

impl ImageId {
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Parses the canonical 40-character hex form.
    pub fn from_hex(text: &str) -> Result<Self, InvalidImageId> {
        if text.len() != 40 || !text.is_ascii() {
            return Err(InvalidImageId);
        }
        let mut bytes = [0u8; 20];
        for (index, pair) in text.as_bytes().chunks_exact(2).enumerate() {
            let high = (pair[0] as char).to_digit(16).ok_or(InvalidImageId)?;
            let low = (pair[1] as char).to_digit(16).ok_or(InvalidImageId)?;
            bytes[index] = ((high << 4) | low) as u8;
        }
        Ok(Self(bytes))
    }

    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(formatter, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Search flavor understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchKind {
    #[default]
    Standard,
    Suggest,
}

/// Parameters of a metadata search request.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query: String,
    pub track_offset: u32,
    pub track_count: u32,
    pub album_offset: u32,
    pub album_count: u32,
    pub artist_offset: u32,
    pub artist_count: u32,
    pub kind: SearchKind,
}

impl SearchQuery {
    /// A query for the first page of tracks, albums, and artists.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            track_offset: 0,
            track_count: 20,
            album_offset: 0,
            album_count: 20,
            artist_offset: 0,
            artist_count: 20,
            kind: SearchKind::Standard,
        }
    }
}

/// Settings handed to the engine when creating a session.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig<'a> {
    pub user_agent: &'a str,
    pub settings_location: &'a Path,
    pub cache_location: &'a Path,
    pub application_key: &'a [u8],
}

/// Every entry point into the native engine the runtime uses.
///
/// # Gating
///
/// The engine is not thread-safe. Every method on this trait must be invoked
/// through [`crate::gate::EngineGate::with`]; two threads calling in
/// concurrently is the one fatal precondition of the whole design and is
/// prevented by construction, not detected at runtime. Implementations take
/// `&self` because the gate, not the receiver, provides exclusion.
///
/// # Callback threading
///
/// Callbacks registered via [`EngineEvents`] fire either synchronously on the
/// thread currently inside a gated call (completion callbacks, notify-wake),
/// or on the engine's own internal threads (`music_delivery`). Completion
/// callbacks therefore receive the engine by reference instead of re-taking
/// the gate.
pub trait NativeEngine: Send {
    /// Creates a session and registers the callback surface. Returns the
    /// session handle; the caller owns one reference to it.
    fn create_session(
        &self,
        config: &EngineConfig<'_>,
        events: Arc<dyn EngineEvents>,
    ) -> Result<RawHandle, EngineError>;

    /// Releases the session handle obtained from [`Self::create_session`].
    fn release_session(&self, session: RawHandle);

    fn login(&self, session: RawHandle, username: &str, password: &str, remember: bool)
    -> StatusCode;

    /// Logs in again with credentials stored by a previous remembered login.
    fn relogin(&self, session: RawHandle) -> StatusCode;

    fn logout(&self, session: RawHandle) -> StatusCode;

    /// Forgets credentials stored by a remembered login.
    fn forget_me(&self, session: RawHandle) -> StatusCode;

    fn connection_state(&self, session: RawHandle) -> Result<ConnectionState, EngineError>;

    /// Runs one round of the engine's internal event processing and returns
    /// the recommended delay before the next call. Zero means "call again
    /// immediately".
    fn process_events(&self, session: RawHandle) -> Result<Duration, EngineError>;

    /// Starts an asynchronous search. `None` means the call never started and
    /// no completion callback will fire for `request`.
    fn search_create(
        &self,
        session: RawHandle,
        query: &SearchQuery,
        request: RequestId,
    ) -> Option<RawHandle>;

    /// Starts an asynchronous album browse; same contract as
    /// [`Self::search_create`].
    fn album_browse_create(
        &self,
        session: RawHandle,
        album: RawHandle,
        request: RequestId,
    ) -> Option<RawHandle>;

    /// Starts an asynchronous artist browse; same contract as
    /// [`Self::search_create`].
    fn artist_browse_create(
        &self,
        session: RawHandle,
        artist: RawHandle,
        request: RequestId,
    ) -> Option<RawHandle>;

    /// Creates an image object for `id`. The caller owns the returned
    /// reference and must release it when done.
    fn image_create(&self, session: RawHandle, id: &ImageId) -> Option<RawHandle>;

    /// Whether the image already has its data available.
    fn image_is_loaded(&self, image: RawHandle) -> bool;

    /// Arranges for [`EngineEvents::image_loaded`] to fire once the image
    /// data becomes available.
    fn image_add_load_callback(&self, image: RawHandle, request: RequestId);

    /// Raw encoded image bytes of a loaded image.
    fn image_data(&self, image: RawHandle) -> Result<Vec<u8>, EngineError>;

    /// Identifier of an image object.
    fn image_id(&self, image: RawHandle) -> Result<ImageId, EngineError>;

    /// Adds one reference to a native object.
    fn object_add_ref(&self, object: RawHandle, kind: ObjectKind);

    /// Drops one reference from a native object.
    fn object_release(&self, object: RawHandle, kind: ObjectKind);

    fn player_load(&self, session: RawHandle, track: RawHandle) -> StatusCode;

    fn player_seek(&self, session: RawHandle, offset_ms: u32) -> StatusCode;

    fn player_play(&self, session: RawHandle, play: bool) -> StatusCode;

    fn player_unload(&self, session: RawHandle) -> StatusCode;
}

/// The fixed callback surface a session registers once at creation.
///
/// Plain notifications may be invoked from any engine thread, including a
/// thread currently inside a gated call; implementations must therefore never
/// acquire the engine gate. Completion callbacks additionally receive the
/// engine by reference for wrapping their result objects. `music_delivery`
/// arrives on the engine's dedicated audio thread, never from
/// [`NativeEngine::process_events`], and is the only callback whose return
/// value feeds back into the engine.
pub trait EngineEvents: Send + Sync {
    /// Login attempt finished; `status` is `Ok` on success.
    fn logged_in(&self, status: StatusCode);

    fn logged_out(&self);

    fn connection_error(&self, status: StatusCode);

    fn log_message(&self, message: &str);

    fn message_to_user(&self, message: &str);

    fn metadata_updated(&self);

    fn userinfo_updated(&self);

    /// The engine wants [`NativeEngine::process_events`] called soon.
    fn notify_wake(&self);

    fn play_token_lost(&self);

    fn end_of_track(&self);

    fn streaming_error(&self, status: StatusCode);

    /// Synchronous audio delivery; returns consumed frames (backpressure).
    fn music_delivery(&self, format: &AudioFormat, pcm: &[u8], frames: usize) -> usize;

    fn search_complete(&self, engine: &dyn NativeEngine, result: RawHandle, request: RequestId);

    fn album_browse_complete(
        &self,
        engine: &dyn NativeEngine,
        result: RawHandle,
        request: RequestId,
    );

    fn artist_browse_complete(
        &self,
        engine: &dyn NativeEngine,
        result: RawHandle,
        request: RequestId,
    );

    fn image_loaded(&self, engine: &dyn NativeEngine, image: RawHandle, request: RequestId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_id_round_trips_through_hex() {
        let hex = "0123456789abcdef0123456789abcdef01234567";
        let id = ImageId::from_hex(hex).unwrap();
        assert_eq!(id.to_string(), hex);
    }

    #[test]
    fn image_id_rejects_bad_input() {
        assert!(ImageId::from_hex("too short").is_err());
        assert!(ImageId::from_hex(&"g".repeat(40)).is_err());
        assert!(ImageId::from_hex(&"0".repeat(39)).is_err());
    }

    #[test]
    fn bytes_per_frame_follows_channel_count() {
        let stereo = AudioFormat { channels: 2, sample_rate: 44_100 };
        assert_eq!(stereo.bytes_per_frame(), 4);
        let mono = AudioFormat { channels: 1, sample_rate: 22_050 };
        assert_eq!(mono.bytes_per_frame(), 2);
    }
}
