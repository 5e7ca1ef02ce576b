//! Correlation of asynchronous engine completions back to caller requests.
//!
//! Every search, browse, or image operation allocates an entry here before
//! the native call is issued; the matching completion callback consumes it
//! exactly once. The completion strategy is an explicit tag on the entry:
//! `Async` entries produce a dispatched event, `Blocking` entries deliver
//! their result straight through a wait handle to the blocked caller.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tonearm_engine::{OwnedHandle, RequestId, StatusCode};

use crate::events::{ImageData, RequestState};

/// Wrapped result of a completed request, as handed to a blocking caller.
pub enum RequestOutcome {
    Search(OwnedHandle),
    AlbumBrowse(OwnedHandle),
    ArtistBrowse(OwnedHandle),
    Image(Result<ImageData, StatusCode>),
}

/// One-shot rendezvous between a blocked caller and the completion callback.
#[derive(Clone)]
pub struct WaitHandle {
    inner: Arc<WaitInner>,
}

struct WaitInner {
    slot: Mutex<Option<RequestOutcome>>,
    ready: Condvar,
}

impl WaitHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(WaitInner { slot: Mutex::new(None), ready: Condvar::new() }),
        }
    }

    /// Stores the outcome and wakes the waiting caller. Runs on the
    /// completion callback's thread; never blocks.
    pub fn complete(&self, outcome: RequestOutcome) {
        let mut slot = lock(&self.inner.slot);
        *slot = Some(outcome);
        self.inner.ready.notify_all();
    }

    /// Blocks until the outcome arrives or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<RequestOutcome> {
        let deadline = Instant::now() + timeout;
        let mut slot = lock(&self.inner.slot);
        while slot.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = match self.inner.ready.wait_timeout(slot, remaining) {
                Ok(result) => result,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot = guard;
        }
        slot.take()
    }
}

impl Default for WaitHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// How a request's completion is delivered.
pub enum CompletionMode {
    /// Wrap the result and enqueue an event for the dispatch thread.
    Async,
    /// Deliver the result directly to the blocked caller; nothing is
    /// enqueued, because the caller is waiting and must pick it up itself.
    Blocking(WaitHandle),
}

/// An issued request awaiting its completion callback.
pub struct PendingRequest {
    pub state: Option<RequestState>,
    pub mode: CompletionMode,
}

/// Table of in-flight requests keyed by their correlation id.
///
/// Ids come from a 64-bit monotone counter starting at 1, so reuse is not a
/// practical concern and the id itself carries no meaning beyond identity.
pub struct RequestTable {
    inner: Mutex<TableInner>,
}

struct TableInner {
    next_id: u64,
    pending: HashMap<u64, PendingRequest>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner { next_id: 1, pending: HashMap::new() }),
        }
    }

    /// Registers a request and returns its fresh correlation id.
    pub fn allocate(&self, state: Option<RequestState>, mode: CompletionMode) -> RequestId {
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.pending.insert(id, PendingRequest { state, mode });
        RequestId::new(id)
    }

    /// Looks up and removes the entry for `id`. Returns `None` for ids that
    /// were never allocated or were already resolved; the caller drops such
    /// completions with a diagnostic rather than failing.
    pub fn resolve(&self, id: RequestId) -> Option<PendingRequest> {
        lock(&self.inner).pending.remove(&id.get())
    }

    /// Number of requests still awaiting completion.
    pub fn pending(&self) -> usize {
        lock(&self.inner).pending.len()
    }
}

impl Default for RequestTable {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn ids_are_monotonic_from_one() {
        let table = RequestTable::new();
        let ids: Vec<u64> = (0..5)
            .map(|_| table.allocate(None, CompletionMode::Async).get())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn entries_resolve_at_most_once() {
        let table = RequestTable::new();
        let id = table.allocate(Some(Box::new(7u32)), CompletionMode::Async);
        let pending = table.resolve(id).expect("first resolve succeeds");
        let state = pending.state.expect("state preserved");
        assert_eq!(*state.downcast::<u32>().unwrap(), 7);
        assert!(table.resolve(id).is_none());
        assert_eq!(table.pending(), 0);
    }

    #[test]
    fn unknown_ids_resolve_to_none_without_side_effects() {
        let table = RequestTable::new();
        table.allocate(None, CompletionMode::Async);
        assert!(table.resolve(RequestId::new(999)).is_none());
        assert_eq!(table.pending(), 1);
    }

    #[test]
    fn wait_handle_delivers_to_the_blocked_caller() {
        let wait = WaitHandle::new();
        let signaller = wait.clone();
        let worker = thread::spawn(move || {
            signaller.complete(RequestOutcome::Image(Err(StatusCode::IsLoading)));
        });
        let outcome = wait.wait_timeout(Duration::from_secs(5)).expect("completed");
        assert!(matches!(outcome, RequestOutcome::Image(Err(StatusCode::IsLoading))));
        worker.join().unwrap();
    }

    #[test]
    fn wait_handle_times_out_when_nothing_completes() {
        let wait = WaitHandle::new();
        assert!(wait.wait_timeout(Duration::from_millis(20)).is_none());
    }
}
