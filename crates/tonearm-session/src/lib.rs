//! Session runtime for the native streaming engine.
//!
//! This crate owns the concurrency machinery between the engine and the
//! application: the driver thread pumping the engine's cooperative event
//! loop, the correlation table matching asynchronous completions back to
//! caller requests, the dispatch thread fanning callbacks out to application
//! handlers, and the session state machine tying them together.

pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod driver;
pub mod events;
pub mod manager;
pub mod session;

pub use config::{ConfigError, PlaybackTuning, SessionConfig, load_config, save_config};
pub use events::{EventSubscriber, ImageData, RequestState, SessionEvent};
pub use manager::SessionManager;
pub use session::{Session, SessionError};
