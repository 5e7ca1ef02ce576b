//! Audio output for the streaming runtime.
//!
//! This crate connects the player's buffer pool to real hardware:
//! - Enumerating output devices with `cpal`.
//! - A buffer-oriented output sink that converts delivered 16-bit PCM to
//!   float samples and feeds them to a `cpal` output stream through a
//!   blocking ring buffer.
//!
//! # Real-time constraints
//! The `cpal` output callback runs on a real-time thread. It only moves
//! samples out of the ring buffer; volume scaling and completion accounting
//! happen on a dedicated worker thread.

pub mod device;
pub mod sink;

pub use device::{AudioDeviceError, HostOutputDevice, list_host_output_devices};
pub use sink::CpalSink;
