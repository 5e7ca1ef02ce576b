//! The output sink boundary.

use tonearm_engine::AudioFormat;

/// Index of a buffer within the player's fixed pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(usize);

impl BufferId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

/// Invoked by the sink when a previously enqueued buffer has finished
/// playing. May run on any sink thread, including its realtime callback
/// thread; implementations must not block.
pub type CompletionCallback = Box<dyn Fn(BufferId) + Send + Sync>;

/// Errors reported by an output sink.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    /// The sink was used before [`OutputSink::configure`] succeeded.
    #[error("output sink is not configured")]
    Unconfigured,
    /// The underlying audio backend failed.
    #[error("output sink failure: {0}")]
    Sink(String),
}

/// An audio output accepting whole buffers and reporting their completion.
///
/// The player enqueues each buffer at most once and never re-enqueues it
/// until the completion callback has fired for it.
pub trait OutputSink: Send + Sync {
    /// Prepares the sink for `format`, with `buffer_size` bytes per enqueued
    /// buffer. May be called again on a format change; pending buffers are
    /// discarded.
    fn configure(&self, format: &AudioFormat, buffer_size: usize) -> Result<(), PlayerError>;

    /// Registers the completion callback. Must be called before the first
    /// enqueue.
    fn set_completion(&self, callback: CompletionCallback);

    /// Submits `data` for playback as buffer `id`.
    fn enqueue(&self, id: BufferId, data: &[u8]) -> Result<(), PlayerError>;

    /// Starts (or resumes) playback.
    fn start(&self) -> Result<(), PlayerError>;

    /// Pauses playback; enqueued buffers are kept.
    fn stop(&self);

    /// Plays out whatever is enqueued without waiting for more.
    fn flush(&self);

    /// Playback volume in `0.0..=1.0`.
    fn set_volume(&self, volume: f32);

    fn volume(&self) -> f32;
}
