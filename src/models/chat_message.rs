use super::{MessageKind, SenderId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A chat message, as seen by subscription handlers and `send_message`.
///
/// Outbound messages need a room id, a sender id, a kind, and content; the
/// timestamp and the client message id are stamped at send time when left
/// unset. Inbound messages additionally carry the broker-assigned
/// `message_id`, and echo the `client_message_id` so callers can reconcile
/// optimistic UI state — deduplication across redeliveries is the caller's
/// concern, the transport delivers each broker delivery exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Broker-assigned message id. `None` until the broker has seen it.
    pub message_id: Option<String>,
    /// Client-generated idempotency token.
    pub client_message_id: Option<String>,
    pub kind: MessageKind,
    pub room_id: String,
    pub sender_id: SenderId,
    pub content: String,
    /// Epoch milliseconds. Stamped at send time when zero.
    pub timestamp: u64,
}

impl ChatMessage {
    pub fn new(
        kind: MessageKind,
        room_id: impl Into<String>,
        sender_id: impl Into<SenderId>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            message_id: None,
            client_message_id: None,
            kind,
            room_id: room_id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            timestamp: 0,
        }
    }

    /// A regular chat line.
    pub fn talk(
        room_id: impl Into<String>,
        sender_id: impl Into<SenderId>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(MessageKind::Talk, room_id, sender_id, content)
    }

    /// A room-join notification.
    pub fn enter(room_id: impl Into<String>, sender_id: impl Into<SenderId>) -> Self {
        Self::new(MessageKind::Enter, room_id, sender_id, "")
    }

    /// A room-leave notification.
    pub fn leave(room_id: impl Into<String>, sender_id: impl Into<SenderId>) -> Self {
        Self::new(MessageKind::Leave, room_id, sender_id, "")
    }
}

/// Current time in millis since Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

static CLIENT_MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a client message id unique within this process.
pub(crate) fn generate_client_message_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let counter = CLIENT_MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("cmsg_{}_{}", nanos, counter)
}
