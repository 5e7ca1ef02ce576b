//! The driver loop pumping the engine's cooperative event processing.
//!
//! A dedicated thread calls the engine's process-events function under the
//! gate, honoring the delay the engine requests between rounds. The engine's
//! notify-wake callback (or any caller) can cut a wait short; a stop signal
//! is checked at every wait point.

use std::io;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use tonearm_engine::{EngineGate, RawHandle};

/// Delay before retrying after a failed process-events call. Engine failures
/// here are always recoverable; the loop never gives up.
const RETRY_DELAY: Duration = Duration::from_millis(1000);

enum Signal {
    Wake,
    Stop,
}

/// Handle to the driver thread of one session.
pub struct Driver {
    signals: Sender<Signal>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Driver {
    /// Spawns the driver thread for `session`. The first poll happens
    /// immediately.
    pub fn start(gate: Arc<EngineGate>, session: RawHandle) -> io::Result<Self> {
        let (signals, inbox) = unbounded();
        let worker = thread::Builder::new()
            .name("tonearm-driver".into())
            .spawn(move || run(gate, session, inbox))?;
        Ok(Self { signals, worker: Mutex::new(Some(worker)) })
    }

    /// Wakes the loop ahead of its current timeout. Called from the engine's
    /// notify-wake callback, which may run on any thread.
    pub fn notify(&self) {
        let _ = self.signals.send(Signal::Wake);
    }

    /// Stops and joins the driver thread. Idempotent.
    pub fn stop(&self) {
        let _ = self.signals.send(Signal::Stop);
        let worker = self.worker.lock().map(|mut slot| slot.take()).unwrap_or(None);
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::error!("driver thread terminated abnormally");
            }
        }
    }
}

fn run(gate: Arc<EngineGate>, session: RawHandle, inbox: Receiver<Signal>) {
    log::debug!("driver thread started for session {session}");
    let mut wait = Duration::ZERO;
    loop {
        match inbox.recv_timeout(wait) {
            Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Signal::Wake) | Err(RecvTimeoutError::Timeout) => {}
        }
        // Pump until the engine asks for a pause; zero means "again, now".
        loop {
            wait = match gate.with(|engine| engine.process_events(session)) {
                Ok(next) => next,
                Err(error) => {
                    log::warn!(
                        "engine event processing failed ({error}); retrying in {RETRY_DELAY:?}"
                    );
                    RETRY_DELAY
                }
            };
            if !wait.is_zero() {
                break;
            }
            if let Ok(Signal::Stop) = inbox.try_recv() {
                log::debug!("driver thread stopping for session {session}");
                return;
            }
        }
    }
    log::debug!("driver thread stopped for session {session}");
}
