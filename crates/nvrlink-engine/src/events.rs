//! Listener registry for session events.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::warn;

use nvrlink_ipc::{event_channel, EventKind, StreamEvent};

/// Callback invoked for each matching event.
pub type Listener = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Fans events out to listeners in registration order.
///
/// A panicking listener is logged and does not affect the others.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
    channels: Mutex<Vec<Sender<StreamEvent>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        for entries in listeners.values_mut() {
            if let Some(pos) = entries.iter().position(|(entry, _)| *entry == id) {
                entries.remove(pos);
                return true;
            }
        }
        false
    }

    /// Receive every event on a bounded channel.
    ///
    /// Events are dropped for this receiver while it is full.
    pub fn channel(&self) -> Receiver<StreamEvent> {
        let (tx, rx) = event_channel();
        self.channels.lock().push(tx);
        rx
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to its listeners and channels.
    pub fn dispatch(&self, event: &StreamEvent) {
        let kind = event.kind();
        // Snapshot so listeners may (un)subscribe while being called.
        let snapshot: Vec<Listener> = self
            .listeners
            .read()
            .get(&kind)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(event = kind.name(), "Event listener panicked");
            }
        }

        self.channels.lock().retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(event = kind.name(), "Event channel full, dropping event");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Drop every listener and channel.
    pub fn clear(&self) {
        self.listeners.write().clear();
        self.channels.lock().clear();
    }
}
