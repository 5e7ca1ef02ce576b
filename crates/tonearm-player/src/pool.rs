//! Reusable playback buffers and their recycling handshake.

use std::sync::{Condvar, Mutex, MutexGuard};

use crate::sink::BufferId;

/// Result of offering bytes to a slot.
#[derive(Debug, PartialEq, Eq)]
pub enum FillOutcome {
    /// The slot is enqueued at the sink and cannot take data yet.
    Busy,
    /// This many bytes were appended. Zero means the slot is full and must
    /// be handed to the sink before more can fit.
    Wrote(usize),
}

struct SlotCell {
    data: Vec<u8>,
    fill: usize,
    in_use: bool,
}

/// One pool buffer. `in_use` marks the span between handing the buffer to
/// the sink and the sink's completion; only the filler thread touches the
/// data outside that span.
pub struct BufferSlot {
    id: BufferId,
    cell: Mutex<SlotCell>,
    freed: Condvar,
}

impl BufferSlot {
    pub fn new(id: BufferId, capacity: usize) -> Self {
        Self {
            id,
            cell: Mutex::new(SlotCell { data: vec![0; capacity], fill: 0, in_use: false }),
            freed: Condvar::new(),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Appends as much of `bytes` as fits.
    pub fn fill_from(&self, bytes: &[u8]) -> FillOutcome {
        let mut cell = self.lock();
        if cell.in_use {
            return FillOutcome::Busy;
        }
        let room = cell.data.len() - cell.fill;
        let take = room.min(bytes.len());
        let start = cell.fill;
        cell.data[start..start + take].copy_from_slice(&bytes[..take]);
        cell.fill += take;
        FillOutcome::Wrote(take)
    }

    /// Marks the slot in use and exposes its filled bytes to `submit`,
    /// which hands them to the sink. Returns `None` without calling
    /// `submit` when the slot is empty or already in use.
    ///
    /// `submit` runs with the slot locked, so the sink must not complete
    /// this buffer before its enqueue call returns.
    pub fn begin_playback<R>(&self, submit: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let mut cell = self.lock();
        if cell.in_use || cell.fill == 0 {
            return None;
        }
        cell.in_use = true;
        let fill = cell.fill;
        Some(submit(&cell.data[..fill]))
    }

    /// Completion handshake: empties the slot and wakes any thread blocked
    /// in [`BufferSlot::wait_until_free`].
    pub fn reset(&self) {
        let mut cell = self.lock();
        cell.fill = 0;
        cell.in_use = false;
        self.freed.notify_all();
    }

    /// Blocks the calling thread until the sink has finished with this slot.
    pub fn wait_until_free(&self) {
        let mut cell = self.lock();
        while cell.in_use {
            cell = match self.freed.wait(cell) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    pub fn in_use(&self) -> bool {
        self.lock().in_use
    }

    pub fn fill(&self) -> usize {
        self.lock().fill
    }

    fn lock(&self) -> MutexGuard<'_, SlotCell> {
        match self.cell.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fills_accumulate_until_capacity() {
        let slot = BufferSlot::new(BufferId::new(0), 8);
        assert_eq!(slot.fill_from(&[1, 2, 3, 4, 5]), FillOutcome::Wrote(5));
        assert_eq!(slot.fill_from(&[6, 7, 8, 9]), FillOutcome::Wrote(3));
        assert_eq!(slot.fill_from(&[10]), FillOutcome::Wrote(0));
        assert_eq!(slot.fill(), 8);
    }

    #[test]
    fn playback_makes_the_slot_busy_until_reset() {
        let slot = BufferSlot::new(BufferId::new(1), 4);
        slot.fill_from(&[9, 9]);
        let submitted = slot.begin_playback(|bytes| bytes.to_vec()).unwrap();
        assert_eq!(submitted, vec![9, 9]);
        assert_eq!(slot.fill_from(&[1]), FillOutcome::Busy);
        assert!(slot.begin_playback(|_| ()).is_none());
        slot.reset();
        assert_eq!(slot.fill(), 0);
        assert_eq!(slot.fill_from(&[1]), FillOutcome::Wrote(1));
    }

    #[test]
    fn empty_slots_are_not_enqueued() {
        let slot = BufferSlot::new(BufferId::new(2), 4);
        assert!(slot.begin_playback(|_| ()).is_none());
    }

    #[test]
    fn wait_until_free_blocks_for_the_completion() {
        let slot = Arc::new(BufferSlot::new(BufferId::new(3), 4));
        slot.fill_from(&[1]);
        slot.begin_playback(|_| ()).unwrap();

        let waiter = {
            let slot = slot.clone();
            thread::spawn(move || slot.wait_until_free())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        slot.reset();
        waiter.join().unwrap();
    }
}
