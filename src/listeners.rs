//! Observer registries for message handlers and lifecycle listeners.
//!
//! Three arenas live here, all keyed by integer handles from an atomic
//! counter so deregistration never depends on closure identity:
//!
//! - [`HandlerRegistry`]: room id → set of message handlers. A room has at
//!   most one broker-level subscription regardless of how many local
//!   handlers are registered; the registry reports the 0→1 and 1→0
//!   transitions that drive broker subscribe/unsubscribe.
//! - [`StatusBus`]: current [`ConnectionStatus`] plus listeners. A new
//!   listener is invoked once immediately with the current status and then
//!   on every transition.
//! - [`ErrorBus`]: listeners for transport-level errors that do not in
//!   themselves change the connection status.
//!
//! Handlers are looked up at delivery time, never captured at subscribe
//! time, so a frame that straggles in after the last unsubscribe is dropped
//! instead of reaching a stale handler set.

use crate::{error::SouqLinkError, models::ChatMessage, status::ConnectionStatus};
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

/// Callback invoked with every message delivered for a subscribed room.
pub type MessageHandler = Arc<dyn Fn(ChatMessage) + Send + Sync>;

/// Callback invoked on every status transition.
pub type StatusHandler = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Callback invoked on transport-level errors.
pub type ErrorHandler = Arc<dyn Fn(&SouqLinkError) + Send + Sync>;

#[derive(Default)]
pub(crate) struct HandlerRegistry {
    rooms: Mutex<HashMap<String, HashMap<u64, MessageHandler>>>,
    next_handle: AtomicU64,
}

impl HandlerRegistry {
    /// Register a handler. Returns `(handle, first)` where `first` is `true`
    /// when the room went from zero to one handler.
    pub fn add(&self, room_id: &str, handler: MessageHandler) -> (u64, bool) {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let mut rooms = self.rooms.lock().unwrap();
        let entry = rooms.entry(room_id.to_string()).or_default();
        let first = entry.is_empty();
        entry.insert(handle, handler);
        (handle, first)
    }

    /// Remove one handler. Returns `true` when the room lost its last
    /// handler (the broker-level subscription should be torn down).
    pub fn remove(&self, room_id: &str, handle: u64) -> bool {
        let mut rooms = self.rooms.lock().unwrap();
        match rooms.get_mut(room_id) {
            Some(entry) => {
                entry.remove(&handle);
                if entry.is_empty() {
                    rooms.remove(room_id);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Remove every handler for a room. Returns `true` if any were present.
    pub fn remove_room(&self, room_id: &str) -> bool {
        self.rooms.lock().unwrap().remove(room_id).is_some()
    }

    pub fn clear(&self) {
        self.rooms.lock().unwrap().clear();
    }

    pub fn has_room(&self, room_id: &str) -> bool {
        self.rooms.lock().unwrap().contains_key(room_id)
    }

    /// Rooms that currently have at least one handler.
    pub fn rooms(&self) -> Vec<String> {
        self.rooms.lock().unwrap().keys().cloned().collect()
    }

    /// Deliver a message to every handler currently registered for the room.
    /// Returns the number of handlers invoked. Handlers run outside the
    /// registry lock so they may subscribe/unsubscribe reentrantly.
    pub fn dispatch(&self, room_id: &str, message: ChatMessage) -> usize {
        let handlers: Vec<MessageHandler> = {
            let rooms = self.rooms.lock().unwrap();
            match rooms.get(room_id) {
                Some(entry) => entry.values().cloned().collect(),
                None => return 0,
            }
        };
        let delivered = handlers.len();
        for handler in handlers {
            handler(message.clone());
        }
        delivered
    }
}

struct StatusInner {
    current: ConnectionStatus,
    listeners: HashMap<u64, StatusHandler>,
}

pub(crate) struct StatusBus {
    inner: Mutex<StatusInner>,
    next_handle: AtomicU64,
}

impl StatusBus {
    fn new() -> Self {
        Self {
            inner: Mutex::new(StatusInner {
                current: ConnectionStatus::Disconnected,
                listeners: HashMap::new(),
            }),
            next_handle: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> ConnectionStatus {
        self.inner.lock().unwrap().current
    }

    /// Transition to a new status, notifying listeners. Setting the current
    /// status again is a no-op.
    pub fn set(&self, status: ConnectionStatus) {
        let to_notify: Vec<StatusHandler> = {
            let mut inner = self.inner.lock().unwrap();
            if inner.current == status {
                return;
            }
            inner.current = status;
            inner.listeners.values().cloned().collect()
        };
        log::debug!("[souq-link] Status changed to '{}'", status);
        for listener in to_notify {
            listener(status);
        }
    }

    /// Register a listener; it is invoked once immediately with the current
    /// status.
    pub fn add(&self, listener: StatusHandler) -> u64 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let current = {
            let mut inner = self.inner.lock().unwrap();
            inner.listeners.insert(handle, listener.clone());
            inner.current
        };
        listener(current);
        handle
    }

    pub fn remove(&self, handle: u64) {
        self.inner.lock().unwrap().listeners.remove(&handle);
    }
}

#[derive(Default)]
pub(crate) struct ErrorBus {
    listeners: Mutex<HashMap<u64, ErrorHandler>>,
    next_handle: AtomicU64,
}

impl ErrorBus {
    pub fn emit(&self, error: &SouqLinkError) {
        let to_notify: Vec<ErrorHandler> = self.listeners.lock().unwrap().values().cloned().collect();
        for listener in to_notify {
            listener(error);
        }
    }

    pub fn add(&self, listener: ErrorHandler) -> u64 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().unwrap().insert(handle, listener);
        handle
    }

    pub fn remove(&self, handle: u64) {
        self.listeners.lock().unwrap().remove(&handle);
    }
}

/// State shared between the public client handle and the transport: the
/// status bus, the error bus, and the room handler registry. Private to one
/// client instance — there is no process-wide global.
pub(crate) struct Shared {
    pub status: StatusBus,
    pub errors: ErrorBus,
    pub handlers: HandlerRegistry,
}

impl Shared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            status: StatusBus::new(),
            errors: ErrorBus::default(),
            handlers: HandlerRegistry::default(),
        })
    }
}

pub(crate) enum ListenerKind {
    Status,
    Error,
}

/// Capability handle for a registered status or error listener.
///
/// Dropping the guard removes the listener; call [`detach`](Self::detach) to
/// keep it registered for the lifetime of the client instead.
pub struct ListenerGuard {
    shared: Arc<Shared>,
    kind: ListenerKind,
    handle: u64,
    active: bool,
}

impl ListenerGuard {
    pub(crate) fn new(shared: Arc<Shared>, kind: ListenerKind, handle: u64) -> Self {
        Self {
            shared,
            kind,
            handle,
            active: true,
        }
    }

    /// Remove the listener now. Equivalent to dropping the guard.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keep the listener registered for the lifetime of the client and
    /// consume the guard.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        match self.kind {
            ListenerKind::Status => self.shared.status.remove(self.handle),
            ListenerKind::Error => self.shared.errors.remove(self.handle),
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, MessageKind};
    use std::sync::atomic::AtomicUsize;

    fn talk(room: &str, content: &str) -> ChatMessage {
        ChatMessage::new(MessageKind::Talk, room, "tester", content)
    }

    #[test]
    fn test_first_and_last_handler_transitions() {
        let registry = HandlerRegistry::default();
        let (h1, first) = registry.add("room-1", Arc::new(|_| {}));
        assert!(first);
        let (h2, first) = registry.add("room-1", Arc::new(|_| {}));
        assert!(!first);

        assert!(!registry.remove("room-1", h1));
        assert!(registry.remove("room-1", h2));
        assert!(!registry.has_room("room-1"));
    }

    #[test]
    fn test_dispatch_reaches_all_handlers_once() {
        let registry = HandlerRegistry::default();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            registry.add("room-1", Arc::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let delivered = registry.dispatch("room-1", talk("room-1", "hi"));
        assert_eq!(delivered, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_dispatch_after_removal_delivers_nothing() {
        let registry = HandlerRegistry::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let (handle, _) = registry.add("room-1", Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        registry.remove("room-1", handle);
        let delivered = registry.dispatch("room-1", talk("room-1", "late"));
        assert_eq!(delivered, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dispatch_ignores_other_rooms() {
        let registry = HandlerRegistry::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry.add("room-1", Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        registry.dispatch("room-2", talk("room-2", "elsewhere"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_status_listener_replays_current_status() {
        let bus = StatusBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.add(Arc::new(move |status| {
            sink.lock().unwrap().push(status);
        }));

        bus.set(ConnectionStatus::Connecting);
        bus.set(ConnectionStatus::Connecting); // duplicate — no notification
        bus.set(ConnectionStatus::Connected);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ConnectionStatus::Disconnected,
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
            ]
        );
    }

    #[test]
    fn test_removed_status_listener_is_silent() {
        let bus = StatusBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handle = bus.add(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(seen.load(Ordering::SeqCst), 1); // immediate replay

        bus.remove(handle);
        bus.set(ConnectionStatus::Connecting);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_bus_emits_to_all_listeners() {
        let bus = ErrorBus::default();
        let seen = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let counter = seen.clone();
            bus.add(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        bus.emit(&SouqLinkError::TransportError("boom".into()));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
