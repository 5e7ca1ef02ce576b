//! A cpal-backed output sink for the player's buffer pool.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, unbounded};
use ringbuf_blocking::{
    BlockingHeapRb,
    traits::{Consumer, Producer, Split},
};

use tonearm_engine::AudioFormat;
use tonearm_player::{BufferId, CompletionCallback, OutputSink, PlayerError};

use crate::device::{AudioDeviceError, HostOutputDevice, default_output_device};

enum WorkerMessage {
    Buffer { id: BufferId, samples: Vec<f32> },
    Shutdown,
}

struct SinkState {
    stream: cpal::Stream,
    worker: JoinHandle<()>,
    messages: Sender<WorkerMessage>,
    closing: Arc<AtomicBool>,
}

/// Output sink playing through the system's audio device.
///
/// Enqueued 16-bit PCM buffers are converted to float samples and handed to
/// a worker thread, which scales them by the current volume and pushes them
/// into a ring buffer drained by the `cpal` output callback. The completion
/// callback for a buffer fires from the worker thread once its samples are
/// fully inside the ring buffer; the ring holds roughly two pool buffers, so
/// completions pace the pool at playback rate.
pub struct CpalSink {
    device: Mutex<Option<HostOutputDevice>>,
    state: Mutex<Option<SinkState>>,
    completion: Arc<Mutex<Option<CompletionCallback>>>,
    volume: Arc<AtomicU32>,
    pending: Arc<AtomicUsize>,
}

impl CpalSink {
    /// A sink on the host's default output device, resolved at configure
    /// time.
    pub fn new() -> Self {
        Self::with_device(None)
    }

    /// A sink pinned to a specific output device.
    pub fn with_device(device: Option<HostOutputDevice>) -> Self {
        Self {
            device: Mutex::new(device),
            state: Mutex::new(None),
            completion: Arc::new(Mutex::new(None)),
            volume: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn teardown(&self, state: &mut Option<SinkState>) {
        let Some(state) = state.take() else {
            return;
        };
        state.closing.store(true, Ordering::SeqCst);
        let _ = state.messages.send(WorkerMessage::Shutdown);
        if state.worker.join().is_err() {
            log::error!("audio worker thread terminated abnormally");
        }
        // Dropping the stream stops playback.
        drop(state.stream);
        self.pending.store(0, Ordering::SeqCst);
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<SinkState>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for CpalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        let mut state = self.lock_state();
        self.teardown(&mut state);
    }
}

impl OutputSink for CpalSink {
    fn configure(&self, format: &AudioFormat, buffer_size: usize) -> Result<(), PlayerError> {
        let mut state = self.lock_state();
        self.teardown(&mut state);

        let device = {
            let selected = match self.device.lock() {
                Ok(device) => device,
                Err(poisoned) => poisoned.into_inner(),
            };
            match selected.as_ref() {
                Some(device) => device.clone(),
                None => default_output_device(&cpal::default_host())
                    .map_err(|error| PlayerError::Sink(error.to_string()))?,
            }
        };
        log::info!("configuring output sink on {device} for {format:?}");

        // One 16-bit sample becomes one f32; hold two pool buffers of
        // headroom so the worker can stay ahead of the output callback.
        let samples_per_buffer = (buffer_size / 2).max(1);
        let ring = BlockingHeapRb::<f32>::new(samples_per_buffer * 2);
        let (mut producer, mut consumer) = ring.split();

        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: format.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let stream = device
            .raw()
            .build_output_stream(
                &config,
                move |data: &mut [f32], _| {
                    let len = consumer.pop_slice(data);
                    // Underrun plays silence rather than stale samples.
                    data[len..].fill(0.0);
                },
                |error| {
                    log::error!("an error occured while writing the output stream: {error}");
                },
                None,
            )
            .map_err(AudioDeviceError::BuildStream)
            .map_err(|error| PlayerError::Sink(error.to_string()))?;

        let (messages, inbox) = unbounded();
        let closing = Arc::new(AtomicBool::new(false));
        let worker = {
            let closing = closing.clone();
            let volume = self.volume.clone();
            let pending = self.pending.clone();
            let completion = self.completion.clone();
            thread::Builder::new()
                .name("tonearm-audio".into())
                .spawn(move || {
                    run_worker(inbox, closing, volume, pending, completion, move |samples| {
                        producer.push_slice(samples)
                    })
                })
                .map_err(|error| PlayerError::Sink(error.to_string()))?
        };

        *state = Some(SinkState { stream, worker, messages, closing });
        Ok(())
    }

    fn set_completion(&self, callback: CompletionCallback) {
        let mut slot = match self.completion.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(callback);
    }

    fn enqueue(&self, id: BufferId, data: &[u8]) -> Result<(), PlayerError> {
        let state = self.lock_state();
        let Some(state) = state.as_ref() else {
            return Err(PlayerError::Unconfigured);
        };
        let mut samples = Vec::with_capacity(data.len() / 2);
        for pair in data.chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            samples.push(sample as f32 / 32_768.0);
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        if state.messages.send(WorkerMessage::Buffer { id, samples }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(PlayerError::Sink("audio worker is gone".to_string()));
        }
        Ok(())
    }

    fn start(&self) -> Result<(), PlayerError> {
        let state = self.lock_state();
        let Some(state) = state.as_ref() else {
            return Err(PlayerError::Unconfigured);
        };
        state.stream.play().map_err(|error| PlayerError::Sink(error.to_string()))
    }

    fn stop(&self) {
        let state = self.lock_state();
        if let Some(state) = state.as_ref() {
            if let Err(error) = state.stream.pause() {
                log::warn!("failed to pause output stream: {error}");
            }
        }
    }

    fn flush(&self) {
        // Wait for the worker to move every accepted buffer into the ring;
        // the stream itself drains at playback rate.
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.pending.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                log::warn!("flush timed out with buffers still pending");
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::SeqCst);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::SeqCst))
    }
}

fn run_worker(
    inbox: Receiver<WorkerMessage>,
    closing: Arc<AtomicBool>,
    volume: Arc<AtomicU32>,
    pending: Arc<AtomicUsize>,
    completion: Arc<Mutex<Option<CompletionCallback>>>,
    mut push: impl FnMut(&[f32]) -> usize,
) {
    while let Ok(message) = inbox.recv() {
        let (id, mut samples) = match message {
            WorkerMessage::Shutdown => break,
            WorkerMessage::Buffer { id, samples } => (id, samples),
        };
        let gain = f32::from_bits(volume.load(Ordering::Relaxed));
        if gain != 1.0 {
            for sample in &mut samples {
                *sample *= gain;
            }
        }
        let mut written = 0;
        while written < samples.len() {
            if closing.load(Ordering::SeqCst) {
                return;
            }
            written += push(&samples[written..]);
            if written < samples.len() {
                thread::sleep(Duration::from_millis(1));
            }
        }
        pending.fetch_sub(1, Ordering::SeqCst);
        let callback = match completion.lock() {
            Ok(callback) => callback,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(callback) = callback.as_ref() {
            callback(id);
        }
    }
}
