//! Main chat client with builder pattern.
//!
//! [`SouqLinkClient`] is the primary interface to the marketplace chat
//! broker. Construct it once at application startup via
//! [`SouqLinkClientBuilder`] and pass it by reference (or clone the cheap
//! handle) to any consumer — there is no module-level global session.

use crate::{
    error::{Result, SouqLinkError},
    listeners::{ListenerGuard, ListenerKind, Shared},
    models::{
        chat_message::{generate_client_message_id, now_ms},
        ChatMessage, ConnectionOptions,
    },
    status::ConnectionStatus,
    timeouts::SouqLinkTimeouts,
    token::TokenStore,
    transport::{resolve_ws_url, ChatTransport, LoopbackTransport, StompTransport, TransportConfig},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Client for the marketplace real-time chat broker.
///
/// One client owns one session. Handles are cheap to clone; all clones share
/// the same session, subscriptions, and listeners.
///
/// # Examples
///
/// ```rust,no_run
/// use souq_link::{ChatMessage, SouqLinkClient};
///
/// # async fn example() -> souq_link::Result<()> {
/// let client = SouqLinkClient::builder()
///     .base_url("https://chat.souq.example")
///     .bearer_token("eyJhbGc...")
///     .build()?;
///
/// client.connect().await?;
/// let _subscription = client
///     .subscribe("room-42", |message| {
///         println!("[{}] {}", message.room_id, message.content);
///     })
///     .await?;
/// client
///     .send_message(ChatMessage::talk("room-42", "buyer-7", "still available?"))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SouqLinkClient {
    transport: Arc<dyn ChatTransport>,
    shared: Arc<Shared>,
    tokens: Arc<TokenStore>,
}

impl SouqLinkClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> SouqLinkClientBuilder {
        SouqLinkClientBuilder::new()
    }

    /// Bring the session up, resolving the bearer token from the configured
    /// [`TokenStore`]. Resolves once the status reaches
    /// [`ConnectionStatus::Connected`]; calling while already connected is a
    /// no-op. A caller-initiated handshake failure is returned without any
    /// automatic retry.
    pub async fn connect(&self) -> Result<()> {
        self.transport.connect(None).await
    }

    /// Like [`connect`](Self::connect), with an explicit bearer token that
    /// is cached for the rest of the session.
    pub async fn connect_with_token(&self, token: impl Into<String>) -> Result<()> {
        self.transport.connect(Some(token.into())).await
    }

    /// Tear the session down: every room subscription and handler is
    /// removed and the pending queues are cleared. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        self.shared.handlers.clear();
        self.transport.disconnect().await
    }

    /// Register `handler` for `room_id`.
    ///
    /// The first handler for a room triggers a broker-level subscription
    /// (registered immediately when connected, queued otherwise); further
    /// handlers share it. The returned [`RoomSubscription`] removes exactly
    /// this handler when dropped or explicitly unsubscribed; the
    /// broker-level subscription is torn down when the room loses its last
    /// handler.
    pub async fn subscribe(
        &self,
        room_id: impl Into<String>,
        handler: impl Fn(ChatMessage) + Send + Sync + 'static,
    ) -> Result<RoomSubscription> {
        let room_id = room_id.into();
        if room_id.is_empty() {
            return Err(SouqLinkError::ConfigurationError(
                "room_id must not be empty".to_string(),
            ));
        }

        let (handle, first) = self.shared.handlers.add(&room_id, Arc::new(handler));
        if first {
            if let Err(e) = self.transport.ensure_subscribed(&room_id).await {
                self.shared.handlers.remove(&room_id, handle);
                return Err(e);
            }
        }

        Ok(RoomSubscription {
            transport: self.transport.clone(),
            shared: self.shared.clone(),
            room_id,
            handle,
            active: true,
        })
    }

    /// Forcibly remove every handler for a room along with its broker-level
    /// subscription (or pending entry). Outstanding [`RoomSubscription`]
    /// guards for the room become inert.
    pub fn unsubscribe(&self, room_id: &str) {
        self.shared.handlers.remove_room(room_id);
        self.transport.release_subscription(room_id);
    }

    /// Send a chat message.
    ///
    /// The message must carry a room id, sender id, kind, and content; the
    /// timestamp and client message id are stamped here when unset. While
    /// connected the message is published immediately and a send failure is
    /// returned as [`PublishError`](SouqLinkError::PublishError); while
    /// disconnected it is queued fire-and-forget and replayed once on the
    /// next successful connect.
    pub async fn send_message(&self, mut message: ChatMessage) -> Result<()> {
        if message.room_id.is_empty() {
            return Err(SouqLinkError::ConfigurationError(
                "message.room_id is required".to_string(),
            ));
        }
        if message.timestamp == 0 {
            message.timestamp = now_ms();
        }
        if message.client_message_id.is_none() {
            message.client_message_id = Some(generate_client_message_id());
        }
        self.transport.publish(message).await
    }

    /// Register a status listener. It is invoked once immediately with the
    /// current status, then on every transition. Drop the guard to remove
    /// the listener, or [`detach`](ListenerGuard::detach) it to keep it for
    /// the lifetime of the client.
    pub fn on_status_change(
        &self,
        handler: impl Fn(ConnectionStatus) + Send + Sync + 'static,
    ) -> ListenerGuard {
        let handle = self.shared.status.add(Arc::new(handler));
        ListenerGuard::new(self.shared.clone(), ListenerKind::Status, handle)
    }

    /// Register an error listener for transport-level errors (parse
    /// failures, publish failures, authentication failures). Status changes
    /// are reported separately via
    /// [`on_status_change`](Self::on_status_change).
    pub fn on_error(
        &self,
        handler: impl Fn(&SouqLinkError) + Send + Sync + 'static,
    ) -> ListenerGuard {
        let handle = self.shared.errors.add(Arc::new(handler));
        ListenerGuard::new(self.shared.clone(), ListenerKind::Error, handle)
    }

    /// Current session status.
    pub fn status(&self) -> ConnectionStatus {
        self.transport.status()
    }

    /// Returns `true` iff the status is exactly
    /// [`Connected`](ConnectionStatus::Connected).
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// The token store consulted at connect time.
    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }
}

/// Capability handle for one registered room handler.
///
/// Dropping the guard (or calling [`unsubscribe`](Self::unsubscribe))
/// removes exactly this handler. When the room loses its last handler the
/// broker-level subscription is torn down; frames already in flight for the
/// room are dropped silently rather than delivered to a stale handler set.
pub struct RoomSubscription {
    transport: Arc<dyn ChatTransport>,
    shared: Arc<Shared>,
    room_id: String,
    handle: u64,
    active: bool,
}

impl RoomSubscription {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Returns `false` once this handler has been removed.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Remove this handler now. Safe to call multiple times.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if self.shared.handlers.remove(&self.room_id, self.handle) {
            self.transport.release_subscription(&self.room_id);
        }
    }
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Builder for configuring [`SouqLinkClient`] instances.
pub struct SouqLinkClientBuilder {
    base_url: Option<String>,
    token: Option<String>,
    token_path: Option<PathBuf>,
    cookie_path: Option<PathBuf>,
    cookie_name: Option<String>,
    options: ConnectionOptions,
    timeouts: SouqLinkTimeouts,
    loopback: bool,
}

impl SouqLinkClientBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            token: None,
            token_path: None,
            cookie_path: None,
            cookie_name: None,
            options: ConnectionOptions::default(),
            timeouts: SouqLinkTimeouts::default(),
            loopback: false,
        }
    }

    /// Set the base URL of the chat broker (http(s) or ws(s) scheme).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Pre-seed the token cache with a bearer token.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the persistent token file consulted when no token is cached.
    pub fn token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = Some(path.into());
        self
    }

    /// Set the cookie-jar file used as the last token fallback.
    pub fn cookie_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookie_path = Some(path.into());
        self
    }

    /// Set the cookie name looked up in the cookie file.
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = Some(name.into());
        self
    }

    /// Set connection options (reconnect policy, heart-beats, destinations).
    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Set operation timeouts.
    pub fn timeouts(mut self, timeouts: SouqLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Use the in-memory loopback transport instead of the network. For
    /// local development and tests; no base URL or token is required.
    pub fn loopback(mut self) -> Self {
        self.loopback = true;
        self
    }

    /// Build the client. The transport strategy — real STOMP/WebSocket or
    /// in-memory loopback — is fixed here, once.
    pub fn build(self) -> Result<SouqLinkClient> {
        let shared = Shared::new();

        let mut tokens = TokenStore::new();
        if let Some(path) = self.token_path {
            tokens = tokens.with_token_path(path);
        }
        if let Some(path) = self.cookie_path {
            tokens = tokens.with_cookie_path(path);
        }
        if let Some(name) = self.cookie_name {
            tokens = tokens.with_cookie_name(name);
        }
        if let Some(token) = self.token {
            tokens = tokens.with_token(token);
        }
        let tokens = Arc::new(tokens);

        let transport: Arc<dyn ChatTransport> = if self.loopback {
            Arc::new(LoopbackTransport::new(
                shared.clone(),
                Duration::from_millis(self.options.loopback_latency_ms),
            ))
        } else {
            let base_url = self.base_url.ok_or_else(|| {
                SouqLinkError::ConfigurationError("base_url is required".to_string())
            })?;
            let (ws_url, host) = resolve_ws_url(&base_url, &self.options.ws_path)?;
            let config = TransportConfig {
                ws_url,
                host,
                options: self.options,
                timeouts: self.timeouts,
            };
            Arc::new(StompTransport::new(config, shared.clone(), tokens.clone()))
        };

        Ok(SouqLinkClient {
            transport,
            shared,
            tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_base_url_for_real_transport() {
        let result = SouqLinkClient::builder().build();
        assert!(matches!(
            result,
            Err(SouqLinkError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_builder_with_base_url() {
        let client = SouqLinkClient::builder()
            .base_url("https://chat.souq.example")
            .bearer_token("tok")
            .build();
        assert!(client.is_ok());
        let client = client.unwrap();
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert_eq!(client.tokens().resolve().as_deref(), Some("tok"));
    }

    #[test]
    fn test_builder_rejects_bad_scheme() {
        let result = SouqLinkClient::builder()
            .base_url("ftp://chat.souq.example")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_loopback_needs_no_base_url() {
        let client = SouqLinkClient::builder().loopback().build();
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_send_message_requires_room_id() {
        let client = SouqLinkClient::builder().loopback().build().unwrap();
        let result = client
            .send_message(ChatMessage::talk("", "buyer-7", "hi"))
            .await;
        assert!(matches!(
            result,
            Err(SouqLinkError::ConfigurationError(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_requires_room_id() {
        let client = SouqLinkClient::builder().loopback().build().unwrap();
        let result = client.subscribe("", |_| {}).await;
        assert!(result.is_err());
    }
}
