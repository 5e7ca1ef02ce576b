//! The streaming player: buffer pool plus playback control.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tonearm_engine::{AudioDelivery, AudioFormat};

use crate::pool::{BufferSlot, FillOutcome};
use crate::sink::{BufferId, OutputSink};

/// Sizing of the buffer pool.
#[derive(Debug, Clone, Copy)]
pub struct PlayerTuning {
    /// Number of buffers cycled through the sink.
    pub buffer_count: usize,
    /// Seconds of audio the pool holds when every buffer is full.
    pub target_buffer_seconds: f32,
}

impl Default for PlayerTuning {
    fn default() -> Self {
        Self { buffer_count: 5, target_buffer_seconds: 10.0 }
    }
}

/// Notifications about the playback lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The sink started draining buffers.
    Started,
    /// More audio was accepted; `position_ms` is the total delivered so far.
    Progress { position_ms: u64 },
    /// The stream ended and the last buffer finished playing. Fired at most
    /// once per stream.
    Ended,
}

struct PlayerState {
    format: Option<AudioFormat>,
    slots: Vec<Arc<BufferSlot>>,
    cursor: usize,
    queued: usize,
    started: bool,
    paused: bool,
    end_of_stream: bool,
    end_raised: bool,
    position_ms: u64,
}

/// Absorbs the engine's synchronous PCM delivery into a fixed pool of
/// buffers feeding an [`OutputSink`].
///
/// The delivery thread fills buffers and blocks when the pool is full; the
/// sink's completion callback recycles them. At most `buffer_count` buffers
/// are ever outstanding at the sink.
pub struct StreamingPlayer {
    sink: Arc<dyn OutputSink>,
    tuning: PlayerTuning,
    state: Mutex<PlayerState>,
    listener: RwLock<Option<Box<dyn Fn(PlaybackEvent) + Send + Sync>>>,
}

impl StreamingPlayer {
    pub fn new(sink: Arc<dyn OutputSink>, tuning: PlayerTuning) -> Arc<Self> {
        let buffer_count = tuning.buffer_count.max(1);
        let player = Arc::new(Self {
            sink,
            tuning: PlayerTuning { buffer_count, ..tuning },
            state: Mutex::new(PlayerState {
                format: None,
                slots: Vec::new(),
                cursor: 0,
                queued: 0,
                started: false,
                paused: false,
                end_of_stream: false,
                end_raised: false,
                position_ms: 0,
            }),
            listener: RwLock::new(None),
        });
        let completer = Arc::downgrade(&player);
        player.sink.set_completion(Box::new(move |id| {
            if let Some(player) = completer.upgrade() {
                player.on_sink_completed(id);
            }
        }));
        player
    }

    /// Registers the playback lifecycle listener, replacing any previous one.
    pub fn set_listener(&self, listener: Box<dyn Fn(PlaybackEvent) + Send + Sync>) {
        let mut slot = match self.listener.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(listener);
    }

    /// Starts the sink and resumes accepting delivery.
    pub fn play(&self) {
        {
            let mut state = self.lock_state();
            state.paused = false;
            state.started = true;
        }
        match self.sink.start() {
            Ok(()) => self.emit(PlaybackEvent::Started),
            Err(error) => log::error!("failed to start output sink: {error}"),
        }
    }

    /// Pauses: delivery is refused and the sink stops, keeping its queue.
    pub fn pause(&self) {
        self.lock_state().paused = true;
        self.sink.stop();
    }

    /// Stops the sink without tearing the pool down.
    pub fn stop(&self) {
        self.lock_state().started = false;
        self.sink.stop();
    }

    /// Graceful end-of-stream: pushes the partially filled current buffer to
    /// the sink and lets the queue drain. [`PlaybackEvent::Ended`] fires once
    /// the last buffer completes (immediately when nothing is queued).
    pub fn flush_and_close(&self) {
        let current = {
            let mut state = self.lock_state();
            state.end_of_stream = true;
            state.slots.get(state.cursor).cloned()
        };
        if let Some(slot) = current {
            self.enqueue_slot(&slot);
        }
        self.sink.flush();
        let ended = {
            let mut state = self.lock_state();
            if state.queued == 0 && !state.end_raised {
                state.end_raised = true;
                true
            } else {
                false
            }
        };
        if ended {
            self.emit(PlaybackEvent::Ended);
        }
    }

    /// Discards all buffered audio and zeroes timing state, keeping the
    /// current format. Used when switching tracks.
    pub fn reset(&self) {
        self.sink.stop();
        self.sink.flush();
        let mut state = self.lock_state();
        if let Some(format) = state.format {
            self.reinitialize(&mut state, format);
        }
    }

    pub fn set_volume(&self, volume: f32) {
        self.sink.set_volume(volume.clamp(0.0, 1.0));
    }

    pub fn volume(&self) -> f32 {
        self.sink.volume()
    }

    /// Milliseconds of audio accepted since the last reset.
    pub fn position_ms(&self) -> u64 {
        self.lock_state().position_ms
    }

    /// Buffers currently outstanding at the sink.
    pub fn queued_buffers(&self) -> usize {
        self.lock_state().queued
    }

    pub fn is_started(&self) -> bool {
        self.lock_state().started
    }

    pub fn is_paused(&self) -> bool {
        self.lock_state().paused
    }

    /// Tears the pool down and configures it (and the sink) for `format`.
    /// Per-buffer size is the target seconds of audio split across the pool.
    fn reinitialize(&self, state: &mut PlayerState, format: AudioFormat) {
        self.sink.stop();
        let per_second = format.bytes_per_frame() * format.sample_rate as usize;
        let total = (per_second as f32 * self.tuning.target_buffer_seconds) as usize;
        let buffer_size = (total / self.tuning.buffer_count).max(format.bytes_per_frame());
        if let Err(error) = self.sink.configure(&format, buffer_size) {
            log::error!("failed to configure output sink for {format:?}: {error}");
            state.format = None;
            state.slots.clear();
            return;
        }
        log::debug!(
            "initialized {} buffers of {buffer_size} bytes for {format:?}",
            self.tuning.buffer_count
        );
        state.format = Some(format);
        state.slots = (0..self.tuning.buffer_count)
            .map(|index| Arc::new(BufferSlot::new(BufferId::new(index), buffer_size)))
            .collect();
        state.cursor = 0;
        state.queued = 0;
        state.started = false;
        state.end_of_stream = false;
        state.end_raised = false;
        state.position_ms = 0;
    }

    /// Hands a filled slot to the sink, auto-starting playback on the first
    /// buffer. Empty or already queued slots are skipped.
    fn enqueue_slot(&self, slot: &BufferSlot) {
        // Count the buffer before the sink sees it: its completion may run
        // on another thread the moment enqueue returns, and the decrement
        // must never observe a count the increment has not reached yet.
        self.lock_state().queued += 1;
        let submitted = slot.begin_playback(|bytes| self.sink.enqueue(slot.id(), bytes));
        match submitted {
            None => {
                self.lock_state().queued -= 1;
                return;
            }
            Some(Err(error)) => {
                log::error!("sink refused buffer {:?}: {error}", slot.id());
                slot.reset();
                self.lock_state().queued -= 1;
                return;
            }
            Some(Ok(())) => {}
        }
        let auto_start = {
            let mut state = self.lock_state();
            if !state.started && !state.paused {
                state.started = true;
                true
            } else {
                false
            }
        };
        if auto_start {
            match self.sink.start() {
                Ok(()) => self.emit(PlaybackEvent::Started),
                Err(error) => log::error!("failed to auto-start output sink: {error}"),
            }
        }
    }

    /// Advances the round-robin cursor and blocks until that slot is free.
    /// The sole blocking point of the delivery path; the state lock is never
    /// held across the wait.
    fn advance_and_wait(&self) -> Arc<BufferSlot> {
        let slot = {
            let mut state = self.lock_state();
            state.cursor = (state.cursor + 1) % state.slots.len();
            state.slots[state.cursor].clone()
        };
        slot.wait_until_free();
        slot
    }

    /// Completion handshake, on the sink's own thread.
    fn on_sink_completed(&self, id: BufferId) {
        let slot = self.lock_state().slots.get(id.index()).cloned();
        let Some(slot) = slot else {
            log::warn!("completion for unknown buffer {id:?}");
            return;
        };
        slot.reset();
        let ended = {
            let mut state = self.lock_state();
            state.queued = state.queued.saturating_sub(1);
            if state.queued == 0 && state.end_of_stream && !state.end_raised {
                state.end_raised = true;
                true
            } else {
                false
            }
        };
        if ended {
            self.sink.stop();
            self.emit(PlaybackEvent::Ended);
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        let listener = match self.listener.read() {
            Ok(listener) => listener,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(listener) = listener.as_ref() {
            listener(event);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PlayerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl AudioDelivery for StreamingPlayer {
    /// Synchronous delivery from the engine's audio thread. Consumes zero
    /// frames when paused or when the format changed (the pool reinitializes
    /// and the engine re-delivers); otherwise copies everything, blocking on
    /// the pool when it is full.
    fn deliver(&self, format: &AudioFormat, pcm: &[u8], frames: usize) -> usize {
        if frames == 0 {
            return 0;
        }
        let mut slot = {
            let mut state = self.lock_state();
            if state.paused {
                return 0;
            }
            if state.format != Some(*format) {
                self.reinitialize(&mut state, *format);
                return 0;
            }
            state.slots[state.cursor].clone()
        };

        let mut offset = 0;
        while offset < pcm.len() {
            match slot.fill_from(&pcm[offset..]) {
                FillOutcome::Busy | FillOutcome::Wrote(0) => {
                    self.enqueue_slot(&slot);
                    slot = self.advance_and_wait();
                }
                FillOutcome::Wrote(written) => {
                    offset += written;
                    if offset < pcm.len() {
                        // The chunk spills over; this buffer is full.
                        self.enqueue_slot(&slot);
                        slot = self.advance_and_wait();
                    }
                }
            }
        }
        // A buffer filled exactly to the brim stays current; the next write
        // (or flush_and_close) pushes it to the sink.
        let position_ms = {
            let mut state = self.lock_state();
            state.position_ms += frames as u64 * 1000 / format.sample_rate as u64;
            state.position_ms
        };
        self.emit(PlaybackEvent::Progress { position_ms });
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{CompletionCallback, PlayerError};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Records enqueued buffers; completions are driven by the test.
    struct FakeSink {
        enqueued: Mutex<Vec<(BufferId, usize)>>,
        completion: Mutex<Option<CompletionCallback>>,
        running: Mutex<bool>,
        volume: AtomicU32,
        configured: Mutex<Option<(AudioFormat, usize)>>,
    }

    impl FakeSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                enqueued: Mutex::new(Vec::new()),
                completion: Mutex::new(None),
                running: Mutex::new(false),
                volume: AtomicU32::new(1.0f32.to_bits()),
                configured: Mutex::new(None),
            })
        }

        fn complete(&self, id: BufferId) {
            let callback = self.completion.lock().unwrap();
            callback.as_ref().expect("completion registered")(id);
        }

        fn enqueued(&self) -> Vec<(BufferId, usize)> {
            self.enqueued.lock().unwrap().clone()
        }
    }

    impl OutputSink for FakeSink {
        fn configure(&self, format: &AudioFormat, buffer_size: usize) -> Result<(), PlayerError> {
            *self.configured.lock().unwrap() = Some((*format, buffer_size));
            self.enqueued.lock().unwrap().clear();
            Ok(())
        }

        fn set_completion(&self, callback: CompletionCallback) {
            *self.completion.lock().unwrap() = Some(callback);
        }

        fn enqueue(&self, id: BufferId, data: &[u8]) -> Result<(), PlayerError> {
            self.enqueued.lock().unwrap().push((id, data.len()));
            Ok(())
        }

        fn start(&self) -> Result<(), PlayerError> {
            *self.running.lock().unwrap() = true;
            Ok(())
        }

        fn stop(&self) {
            *self.running.lock().unwrap() = false;
        }

        fn flush(&self) {}

        fn set_volume(&self, volume: f32) {
            self.volume.store(volume.to_bits(), Ordering::SeqCst);
        }

        fn volume(&self) -> f32 {
            f32::from_bits(self.volume.load(Ordering::SeqCst))
        }
    }

    /// 3 buffers of 1024 bytes: stereo 16-bit at a rate chosen so that
    /// target seconds / count lands on 1024 bytes per buffer.
    fn small_pool() -> (Arc<StreamingPlayer>, Arc<FakeSink>, AudioFormat) {
        let sink = FakeSink::new();
        let tuning = PlayerTuning { buffer_count: 3, target_buffer_seconds: 3.0 };
        let player = StreamingPlayer::new(sink.clone(), tuning);
        let format = AudioFormat { channels: 2, sample_rate: 256 };
        // First delivery configures the pool and consumes nothing.
        assert_eq!(player.deliver(&format, &[], 1), 0);
        assert_eq!(sink.configured.lock().unwrap().unwrap().1, 1024);
        (player, sink, format)
    }

    #[test]
    fn oversized_chunk_blocks_once_and_consumes_everything() {
        let (player, sink, format) = small_pool();
        let pcm = vec![0u8; 4096];
        let frames = 4096 / format.bytes_per_frame();

        let delivery = {
            let player = player.clone();
            thread::spawn(move || player.deliver(&format, &pcm, frames))
        };
        // Three buffers fill and enqueue, then the pool is exhausted and the
        // delivery thread blocks on buffer 0.
        thread::sleep(Duration::from_millis(100));
        assert!(!delivery.is_finished());
        assert_eq!(
            sink.enqueued(),
            vec![(BufferId::new(0), 1024), (BufferId::new(1), 1024), (BufferId::new(2), 1024)]
        );

        sink.complete(BufferId::new(0));
        assert_eq!(delivery.join().unwrap(), frames);
        // The final 1024 bytes sit in buffer 0 awaiting the next write.
        assert_eq!(player.queued_buffers(), 2);
    }

    #[test]
    fn at_most_pool_size_buffers_are_outstanding() {
        let (player, sink, format) = small_pool();
        let delivery = {
            let player = player.clone();
            let pcm = vec![0u8; 1024 * 7];
            thread::spawn(move || player.deliver(&format, &pcm, 1024 * 7 / 4))
        };
        for round in 0..8 {
            thread::sleep(Duration::from_millis(20));
            assert!(player.queued_buffers() <= 3, "round {round}");
            sink.complete(BufferId::new(round % 3));
        }
        delivery.join().unwrap();
    }

    #[test]
    fn paused_pool_refuses_delivery() {
        let (player, _sink, format) = small_pool();
        player.pause();
        assert_eq!(player.deliver(&format, &[0u8; 64], 16), 0);
        player.play();
        assert_eq!(player.deliver(&format, &[0u8; 64], 16), 16);
    }

    #[test]
    fn format_change_reinitializes_the_pool() {
        let (player, sink, format) = small_pool();
        assert_eq!(player.deliver(&format, &[0u8; 64], 16), 16);
        assert!(player.position_ms() > 0);

        let changed = AudioFormat { channels: 1, sample_rate: 512 };
        // The mismatched delivery consumes nothing and reconfigures.
        assert_eq!(player.deliver(&changed, &[0u8; 64], 32), 0);
        assert_eq!(
            sink.configured.lock().unwrap().unwrap(),
            (changed, 1024)
        );
        assert_eq!(player.position_ms(), 0);
        assert_eq!(player.deliver(&changed, &[0u8; 64], 32), 32);
    }

    #[test]
    fn playback_auto_starts_on_the_first_full_buffer() {
        let (player, sink, format) = small_pool();
        let events: Arc<Mutex<Vec<PlaybackEvent>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let events = events.clone();
            player.set_listener(Box::new(move |event| events.lock().unwrap().push(event)));
        }
        assert!(!*sink.running.lock().unwrap());
        // 1½ buffers: the first fills, spills, and is enqueued.
        player.deliver(&format, &[0u8; 1536], 384);
        assert!(*sink.running.lock().unwrap());
        assert_eq!(events.lock().unwrap().first(), Some(&PlaybackEvent::Started));
    }

    #[test]
    fn ended_fires_exactly_once_when_the_queue_drains() {
        let (player, sink, format) = small_pool();
        let events: Arc<Mutex<Vec<PlaybackEvent>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let events = events.clone();
            player.set_listener(Box::new(move |event| events.lock().unwrap().push(event)));
        }
        // Half a buffer, then a graceful close pushes the partial buffer.
        player.deliver(&format, &[1u8; 512], 128);
        player.flush_and_close();
        assert_eq!(sink.enqueued(), vec![(BufferId::new(0), 512)]);

        sink.complete(BufferId::new(0));
        sink.complete(BufferId::new(0));
        let ended = events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| **event == PlaybackEvent::Ended)
            .count();
        assert_eq!(ended, 1);
    }

    #[test]
    fn racing_completions_never_strand_the_queue_count() {
        let (player, sink, format) = small_pool();
        let events: Arc<Mutex<Vec<PlaybackEvent>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let events = events.clone();
            player.set_listener(Box::new(move |event| events.lock().unwrap().push(event)));
        }

        // Completes each buffer the instant the sink records it, so the
        // completion handshake races the player's own accounting.
        let done = Arc::new(AtomicBool::new(false));
        let completer = {
            let sink = sink.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut seen = 0;
                loop {
                    let enqueued = sink.enqueued();
                    for (id, _) in &enqueued[seen..] {
                        sink.complete(*id);
                    }
                    seen = enqueued.len();
                    if done.load(Ordering::SeqCst) && seen == sink.enqueued().len() {
                        break;
                    }
                    thread::yield_now();
                }
            })
        };

        for _ in 0..50 {
            assert_eq!(player.deliver(&format, &[0u8; 1024], 256), 256);
        }
        player.flush_and_close();
        done.store(true, Ordering::SeqCst);
        completer.join().unwrap();

        assert_eq!(player.queued_buffers(), 0);
        let ended = events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| **event == PlaybackEvent::Ended)
            .count();
        assert_eq!(ended, 1);
    }

    #[test]
    fn close_with_nothing_buffered_ends_immediately() {
        let (player, _sink, _format) = small_pool();
        let events: Arc<Mutex<Vec<PlaybackEvent>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let events = events.clone();
            player.set_listener(Box::new(move |event| events.lock().unwrap().push(event)));
        }
        player.flush_and_close();
        assert_eq!(*events.lock().unwrap(), vec![PlaybackEvent::Ended]);
    }

    #[test]
    fn reset_discards_position_and_buffers() {
        let (player, sink, format) = small_pool();
        player.deliver(&format, &[0u8; 2048], 512);
        assert!(player.queued_buffers() > 0);
        player.reset();
        assert_eq!(player.position_ms(), 0);
        assert_eq!(player.queued_buffers(), 0);
        assert!(!*sink.running.lock().unwrap());
    }
}
