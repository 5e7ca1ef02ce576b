//! Buffered streaming playback.
//!
//! The engine pushes PCM synchronously on its own audio thread; output
//! hardware drains buffers asynchronously at playback rate. This crate sits
//! between the two: a fixed pool of reusable buffers absorbs the rate
//! mismatch, blocking the delivery thread when the pool is full and recycling
//! buffers as the sink reports them played.

pub mod player;
pub mod pool;
pub mod sink;

pub use player::{PlaybackEvent, PlayerTuning, StreamingPlayer};
pub use sink::{BufferId, CompletionCallback, OutputSink, PlayerError};
