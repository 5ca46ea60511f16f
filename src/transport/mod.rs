//! Transport strategies for the chat client.
//!
//! [`ChatTransport`] is the seam between the public client API and the wire.
//! [`StompTransport`] speaks STOMP over WebSocket against a real broker;
//! [`LoopbackTransport`] loops messages back in memory for development
//! without a backend. The strategy is selected once at construction, so call
//! sites never branch on a mode flag.

mod loopback;
mod stomp;

pub use loopback::LoopbackTransport;
pub use stomp::StompTransport;

pub(crate) use stomp::{resolve_ws_url, TransportConfig};

use crate::{error::Result, models::ChatMessage, status::ConnectionStatus};
use async_trait::async_trait;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Bring the session up. Resolves once the status reaches
    /// [`ConnectionStatus::Connected`]; a no-op when already connected.
    /// A token override is cached for the rest of the session.
    async fn connect(&self, token_override: Option<String>) -> Result<()>;

    /// Tear the session down: drop every broker-level subscription and
    /// clear the pending queues. Idempotent.
    async fn disconnect(&self) -> Result<()>;

    /// Ensure a broker-level subscription exists for the room — sent
    /// immediately when connected, queued otherwise. At most one broker
    /// subscription per room regardless of how often this is called.
    async fn ensure_subscribed(&self, room_id: &str) -> Result<()>;

    /// Drop the broker-level subscription (or pending entry) for the room.
    /// Fire-and-forget so it can run from `Drop`.
    fn release_subscription(&self, room_id: &str);

    /// Publish a message. Fire-and-forget while disconnected (the message
    /// is queued and replayed once on the next successful connect); on a
    /// live session a failed send surfaces as
    /// [`PublishError`](crate::SouqLinkError::PublishError).
    async fn publish(&self, message: ChatMessage) -> Result<()>;

    /// Current session status.
    fn status(&self) -> ConnectionStatus;
}
