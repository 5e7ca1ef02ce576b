//! Tonearm: a client-side runtime for an opaque native streaming-media
//! engine.
//!
//! The crates compose as follows:
//! - [`tonearm_engine`] defines the gateway trait into the native engine,
//!   its callback surface, the serializing call gate, and owned handles.
//! - [`tonearm_session`] drives the engine's cooperative event loop,
//!   correlates asynchronous completions back to requests, and dispatches
//!   events to the application on a dedicated thread.
//! - [`tonearm_player`] absorbs the engine's synchronous PCM delivery into
//!   a fixed buffer pool with backpressure.
//! - [`tonearm_audio`] plays pool buffers through `cpal`.
//!
//! This facade re-exports the surface an application needs: hand a
//! [`NativeEngine`] implementation to a [`SessionManager`], create a
//! [`Session`] with an [`EventSubscriber`], and wire a [`StreamingPlayer`]
//! over a [`CpalSink`] into the session's audio delivery.

pub use tonearm_audio::{CpalSink, HostOutputDevice, list_host_output_devices};
pub use tonearm_engine::{
    AudioDelivery, AudioFormat, ConnectionState, EngineConfig, EngineError, EngineEvents,
    EngineGate, ImageId, InvalidImageId, NativeEngine, ObjectKind, OwnedHandle, RawHandle,
    RequestId, SearchKind, SearchQuery, StatusCode,
};
pub use tonearm_player::{
    BufferId, OutputSink, PlaybackEvent, PlayerError, PlayerTuning, StreamingPlayer,
};
pub use tonearm_session::{
    ConfigError, EventSubscriber, ImageData, PlaybackTuning, RequestState, Session, SessionConfig,
    SessionError, SessionEvent, SessionManager, load_config, save_config,
};

/// Player tuning matching a session config's playback section.
pub fn player_tuning(tuning: &PlaybackTuning) -> PlayerTuning {
    PlayerTuning {
        buffer_count: tuning.buffer_count,
        target_buffer_seconds: tuning.target_buffer_seconds,
    }
}
