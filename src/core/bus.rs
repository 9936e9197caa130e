//! Typed publish/subscribe event bus
//!
//! Subscribers register for one [`EventKind`] or for every event. Dispatch is
//! synchronous by default; a queued mode backed by a channel is available for
//! callers that want to decouple publication from delivery, with an optional
//! worker thread. The engine itself only uses synchronous publication so that
//! replay stays deterministic.

use crate::core::events::{Event, EventKind};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use hashbrown::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::error;

/// Opaque handle returned by `subscribe`, used for `unsubscribe`
pub type SubscriptionHandle = u64;

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct SubscriberTable {
    by_kind: HashMap<EventKind, Vec<(SubscriptionHandle, Handler)>>,
    all: Vec<(SubscriptionHandle, Handler)>,
    next_handle: SubscriptionHandle,
}

impl SubscriberTable {
    /// Snapshot of the handlers interested in `kind`, typed first then catch-all
    fn handlers_for(&self, kind: EventKind) -> Vec<Handler> {
        let mut out = Vec::new();
        if let Some(typed) = self.by_kind.get(&kind) {
            out.extend(typed.iter().map(|(_, h)| h.clone()));
        }
        out.extend(self.all.iter().map(|(_, h)| h.clone()));
        out
    }
}

/// Deliver one event to every interested handler, lock released, panics
/// isolated per subscriber
fn dispatch(subscribers: &Mutex<SubscriberTable>, event: &Event) {
    let handlers = {
        let table = subscribers.lock().unwrap();
        table.handlers_for(event.kind())
    };
    // Lock released: handlers may publish or subscribe reentrantly
    for handler in handlers {
        if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
            error!(kind = ?event.kind(), "subscriber panicked; other subscribers still served");
        }
    }
}

/// Event bus with typed and catch-all subscriptions
pub struct EventBus {
    subscribers: Arc<Mutex<SubscriberTable>>,
    tx: Sender<Event>,
    rx: Receiver<Event>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            subscribers: Arc::new(Mutex::new(SubscriberTable::default())),
            tx,
            rx,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Subscribe to one event kind
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let mut table = self.subscribers.lock().unwrap();
        let handle = table.next_handle;
        table.next_handle += 1;
        table
            .by_kind
            .entry(kind)
            .or_default()
            .push((handle, Arc::new(handler)));
        handle
    }

    /// Subscribe to every event
    pub fn subscribe_all(
        &self,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let mut table = self.subscribers.lock().unwrap();
        let handle = table.next_handle;
        table.next_handle += 1;
        table.all.push((handle, Arc::new(handler)));
        handle
    }

    /// Remove a subscription. Unknown handles are a no-op.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut table = self.subscribers.lock().unwrap();
        for list in table.by_kind.values_mut() {
            list.retain(|(h, _)| *h != handle);
        }
        table.all.retain(|(h, _)| *h != handle);
    }

    /// Deliver an event on the caller's context, immediately
    pub fn publish_sync(&self, event: &Event) {
        dispatch(&self.subscribers, event);
    }

    /// Enqueue an event for the worker or a later `process_pending`
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Drain the queue on the caller's context
    pub fn process_pending(&self) {
        while let Ok(event) = self.rx.try_recv() {
            self.publish_sync(&event);
        }
    }

    pub fn queue_len(&self) -> usize {
        self.rx.len()
    }

    /// Spawn the worker thread that drains the queue FIFO
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let subscribers = Arc::clone(&self.subscribers);
        let running = Arc::clone(&self.running);
        let rx = self.rx.clone();
        let handle = std::thread::spawn(move || loop {
            match rx.recv_timeout(std::time::Duration::from_millis(20)) {
                Ok(event) => dispatch(&subscribers, &event),
                Err(RecvTimeoutError::Timeout) => {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        *self.worker.lock().unwrap() = Some(handle);
    }

    /// Stop the worker thread, draining nothing further
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.get_mut().unwrap().take() {
            let _ = handle.join();
        }
    }
}
