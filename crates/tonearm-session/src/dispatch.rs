//! The event dispatch queue and its consumer thread.
//!
//! Any thread may enqueue; one dedicated thread delivers events to the
//! application subscriber in FIFO order. Slow or panicking handlers never
//! stall producers: enqueueing is a channel send, and each delivery is
//! individually isolated.

use std::any::Any;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::events::{EventSubscriber, SessionEvent};

enum WorkItem {
    Deliver(SessionEvent),
    Stop,
}

/// FIFO queue of pending subscriber invocations, drained by one thread.
pub struct EventDispatcher {
    queue: Sender<WorkItem>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    /// Spawns the dispatch thread delivering to `subscriber`.
    pub fn start(subscriber: Arc<dyn EventSubscriber>) -> io::Result<Self> {
        let (queue, items) = unbounded();
        let worker = thread::Builder::new()
            .name("tonearm-dispatch".into())
            .spawn(move || run(items, subscriber))?;
        Ok(Self { queue, worker: Mutex::new(Some(worker)) })
    }

    /// Appends an event; delivery order equals enqueue order. Events sent
    /// after [`EventDispatcher::stop`] are dropped with a diagnostic.
    pub fn enqueue(&self, event: SessionEvent) {
        if let Err(event) = self.try_enqueue(event) {
            log::warn!("event dispatcher stopped; dropping {} event", event.kind());
        }
    }

    /// Like [`EventDispatcher::enqueue`], but hands the event back when the
    /// dispatcher has stopped, so the caller can dispose of its payload
    /// itself. Events carrying engine references must go through this path
    /// from gated callbacks: dropping them re-takes the gate.
    pub fn try_enqueue(&self, event: SessionEvent) -> Result<(), SessionEvent> {
        match self.queue.send(WorkItem::Deliver(event)) {
            Ok(()) => Ok(()),
            Err(undelivered) => match undelivered.into_inner() {
                WorkItem::Deliver(event) => Err(event),
                WorkItem::Stop => Ok(()),
            },
        }
    }

    /// Drain-then-stop: events enqueued before this call are still delivered,
    /// then the dispatch thread exits and is joined. Idempotent.
    pub fn stop(&self) {
        let _ = self.queue.send(WorkItem::Stop);
        let worker = self.worker.lock().map(|mut slot| slot.take()).unwrap_or(None);
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                // Stopping from inside a delivery: the stop item is queued,
                // the thread exits on its own, and there is nobody to join.
                return;
            }
            if worker.join().is_err() {
                log::error!("event dispatch thread terminated abnormally");
            }
        }
    }
}

fn run(items: Receiver<WorkItem>, subscriber: Arc<dyn EventSubscriber>) {
    log::debug!("event dispatch thread started");
    while let Ok(item) = items.recv() {
        match item {
            WorkItem::Stop => break,
            WorkItem::Deliver(event) => deliver(subscriber.as_ref(), event),
        }
    }
    log::debug!("event dispatch thread stopped");
}

/// Delivers one event, converting a subscriber panic into a
/// `SubscriberPanicked` notification instead of unwinding the thread.
fn deliver(subscriber: &dyn EventSubscriber, event: SessionEvent) {
    let kind = event.kind();
    let Err(panic) = catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event))) else {
        return;
    };
    let detail = panic_message(panic);
    log::error!("subscriber panicked while handling {kind} event: {detail}");
    let notice = SessionEvent::SubscriberPanicked { event: kind, detail };
    if catch_unwind(AssertUnwindSafe(|| subscriber.on_event(notice))).is_err() {
        log::error!("subscriber panicked inside its own panic notification");
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::RecvTimeoutError;
    use std::time::Duration;
    use tonearm_engine::StatusCode;

    struct Recording {
        seen: Sender<String>,
        panic_on: Option<&'static str>,
    }

    impl EventSubscriber for Recording {
        fn on_event(&self, event: SessionEvent) {
            if self.panic_on == Some(event.kind()) {
                panic!("handler failure for test");
            }
            self.seen.send(event.kind().to_string()).unwrap();
        }
    }

    fn message(status: StatusCode) -> SessionEvent {
        SessionEvent::ConnectionError { status }
    }

    #[test]
    fn events_are_delivered_in_enqueue_order() {
        let (seen, observed) = unbounded();
        let dispatcher =
            EventDispatcher::start(Arc::new(Recording { seen, panic_on: None })).unwrap();

        dispatcher.enqueue(SessionEvent::LoginComplete { status: StatusCode::Ok });
        dispatcher.enqueue(SessionEvent::LoggedOut);
        dispatcher.enqueue(message(StatusCode::NetworkDisabled));
        dispatcher.stop();

        let order: Vec<String> = observed.try_iter().collect();
        assert_eq!(order, vec!["login-complete", "logged-out", "connection-error"]);
    }

    #[test]
    fn order_is_preserved_per_producer_across_threads() {
        let (seen, observed) = unbounded();
        let dispatcher =
            Arc::new(EventDispatcher::start(Arc::new(Recording { seen, panic_on: None })).unwrap());

        let producers: Vec<_> = [("log-message", 0), ("message-to-user", 1)]
            .into_iter()
            .map(|(_, which)| {
                let dispatcher = dispatcher.clone();
                thread::spawn(move || {
                    for index in 0..50 {
                        let text = format!("{which}:{index}");
                        let event = if which == 0 {
                            SessionEvent::LogMessage { message: text }
                        } else {
                            SessionEvent::MessageToUser { message: text }
                        };
                        dispatcher.enqueue(event);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        dispatcher.stop();

        let kinds: Vec<String> = observed.try_iter().collect();
        assert_eq!(kinds.len(), 100);
        for which in ["log-message", "message-to-user"] {
            let count = kinds.iter().filter(|kind| kind.as_str() == which).count();
            assert_eq!(count, 50);
        }
    }

    #[test]
    fn a_panicking_handler_does_not_stop_the_queue() {
        let (seen, observed) = unbounded();
        let subscriber = Arc::new(Recording { seen, panic_on: Some("logged-out") });
        let dispatcher = EventDispatcher::start(subscriber).unwrap();

        dispatcher.enqueue(SessionEvent::LoggedOut);
        dispatcher.enqueue(SessionEvent::MetadataUpdated);
        dispatcher.stop();

        let order: Vec<String> = observed.try_iter().collect();
        // The panicking delivery produces a panic notification, then the
        // next queued item still executes.
        assert_eq!(order, vec!["subscriber-panicked", "metadata-updated"]);
    }

    #[test]
    fn stop_drains_pending_events_first() {
        let (seen, observed) = unbounded();
        let dispatcher =
            EventDispatcher::start(Arc::new(Recording { seen, panic_on: None })).unwrap();
        for _ in 0..20 {
            dispatcher.enqueue(SessionEvent::MetadataUpdated);
        }
        dispatcher.stop();
        assert_eq!(observed.try_iter().count(), 20);
        // Enqueue after stop is dropped, not delivered.
        dispatcher.enqueue(SessionEvent::LoggedOut);
        assert_eq!(
            observed.recv_timeout(Duration::from_millis(20)),
            Err(RecvTimeoutError::Disconnected)
        );
    }
}
