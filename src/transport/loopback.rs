//! In-memory loopback transport for development without a backend.
//!
//! `connect()` resolves immediately with no network I/O; `publish` appends
//! the message to a per-room log and echoes it back to the registered
//! handlers after a fixed simulated latency, through the same registry
//! dispatch path as the real transport. Queue and subscription bookkeeping
//! follow the same semantics, so calling code is agnostic to the mode.

use crate::{
    error::Result, listeners::Shared, models::ChatMessage, status::ConnectionStatus,
    transport::ChatTransport,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell};

pub struct LoopbackTransport {
    shared: Arc<Shared>,
    latency: Duration,
    state: Arc<Mutex<LoopbackState>>,
    /// Single dispatcher task keeps deliveries strictly FIFO.
    dispatch_tx: OnceCell<mpsc::UnboundedSender<ChatMessage>>,
    seq: AtomicU64,
}

#[derive(Default)]
struct LoopbackState {
    /// Rooms with a (simulated) broker-level subscription, or a pending one
    /// while disconnected.
    rooms: HashSet<String>,
    /// Messages accepted while disconnected, drained FIFO on connect.
    pending: VecDeque<ChatMessage>,
    /// Everything published so far, per room.
    log: HashMap<String, Vec<ChatMessage>>,
    /// Broker-level subscription registrations, in order.
    subscribe_calls: Vec<String>,
}

impl LoopbackTransport {
    pub fn new(shared: Arc<Shared>, latency: Duration) -> Self {
        Self {
            shared,
            latency,
            state: Arc::new(Mutex::new(LoopbackState::default())),
            dispatch_tx: OnceCell::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Rooms for which a broker-level subscription was registered, in order.
    /// A room appears once per registration regardless of how many handlers
    /// observe it.
    pub fn subscribe_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().subscribe_calls.clone()
    }

    /// Messages published to a room so far.
    pub fn room_log(&self, room_id: &str) -> Vec<ChatMessage> {
        self.state
            .lock()
            .unwrap()
            .log
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn dispatcher(&self) -> mpsc::UnboundedSender<ChatMessage> {
        self.dispatch_tx
            .get_or_init(|| async {
                let (tx, mut rx) = mpsc::unbounded_channel::<ChatMessage>();
                let shared = self.shared.clone();
                let state = self.state.clone();
                let latency = self.latency;
                tokio::spawn(async move {
                    while let Some(message) = rx.recv().await {
                        if !latency.is_zero() {
                            tokio::time::sleep(latency).await;
                        }
                        // Subscription and handler set are checked at
                        // delivery time, mirroring the real transport:
                        // unsubscribe wins over an in-flight echo.
                        let subscribed = state.lock().unwrap().rooms.contains(&message.room_id);
                        if subscribed {
                            let room_id = message.room_id.clone();
                            shared.handlers.dispatch(&room_id, message);
                        }
                    }
                });
                tx
            })
            .await
            .clone()
    }

    async fn deliver(&self, mut message: ChatMessage) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        message.message_id = Some(format!("loop-{}", seq));
        {
            let mut state = self.state.lock().unwrap();
            state
                .log
                .entry(message.room_id.clone())
                .or_default()
                .push(message.clone());
        }
        let dispatcher = self.dispatcher().await;
        let _ = dispatcher.send(message);
    }
}

#[async_trait]
impl ChatTransport for LoopbackTransport {
    async fn connect(&self, _token_override: Option<String>) -> Result<()> {
        if self.shared.status.current().is_connected() {
            return Ok(());
        }
        self.shared.status.set(ConnectionStatus::Connecting);
        let queued: Vec<ChatMessage> = {
            let mut state = self.state.lock().unwrap();
            let rooms: Vec<String> = state.rooms.iter().cloned().collect();
            for room in rooms {
                state.subscribe_calls.push(room);
            }
            state.pending.drain(..).collect()
        };
        self.shared.status.set(ConnectionStatus::Connected);
        for message in queued {
            self.deliver(message).await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.rooms.clear();
            state.pending.clear();
        }
        self.shared.status.set(ConnectionStatus::Disconnected);
        Ok(())
    }

    async fn ensure_subscribed(&self, room_id: &str) -> Result<()> {
        let connected = self.shared.status.current().is_connected();
        let mut state = self.state.lock().unwrap();
        if state.rooms.insert(room_id.to_string()) && connected {
            state.subscribe_calls.push(room_id.to_string());
        }
        Ok(())
    }

    fn release_subscription(&self, room_id: &str) {
        self.state.lock().unwrap().rooms.remove(room_id);
    }

    async fn publish(&self, message: ChatMessage) -> Result<()> {
        if !self.shared.status.current().is_connected() {
            self.state.lock().unwrap().pending.push_back(message);
            return Ok(());
        }
        self.deliver(message).await;
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        self.shared.status.current()
    }
}
