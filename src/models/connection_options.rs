use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection-level options for the chat transport.
///
/// These control reconnection behavior, STOMP heart-beats, and the broker
/// destinations. Separate from [`SouqLinkTimeouts`](crate::SouqLinkTimeouts),
/// which bounds individual operations.
///
/// # Example
///
/// ```rust
/// use souq_link::ConnectionOptions;
///
/// let options = ConnectionOptions::new()
///     .with_auto_reconnect(true)
///     .with_reconnect_delay_ms(2000)
///     .with_max_reconnect_attempts(Some(10));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Enable automatic reconnection after an unexpected disconnect.
    /// Default: true.
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Delay before the first reconnect attempt, in milliseconds.
    /// Doubles on every subsequent attempt up to `max_reconnect_delay_ms`.
    /// Default: 1000.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Cap on the exponential backoff delay, in milliseconds.
    /// Default: 30000.
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Maximum number of reconnect attempts before the session parks in the
    /// `error` state. `None` retries forever. Default: Some(5).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: Option<u32>,

    /// Smallest interval at which this client will emit STOMP heart-beats,
    /// in milliseconds. 0 disables outgoing heart-beats. Default: 10000.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_send_ms: u64,

    /// Interval at which this client wants to receive broker heart-beats,
    /// in milliseconds. 0 disables liveness monitoring. Default: 10000.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_expect_ms: u64,

    /// Path of the WebSocket endpoint on the broker host.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// The single SEND destination shared by every room; the broker routes
    /// on the `roomId` field of the body.
    #[serde(default = "default_publish_destination")]
    pub publish_destination: String,

    /// Prefix of the room-scoped subscription destinations; the room id is
    /// appended as the final path segment.
    #[serde(default = "default_subscribe_prefix")]
    pub subscribe_prefix: String,

    /// Simulated delivery latency of the loopback transport, in
    /// milliseconds. Default: 10.
    #[serde(default = "default_loopback_latency_ms")]
    pub loopback_latency_ms: u64,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30000
}

fn default_max_reconnect_attempts() -> Option<u32> {
    Some(5)
}

fn default_heartbeat_ms() -> u64 {
    10000
}

fn default_ws_path() -> String {
    "/ws/chat".to_string()
}

fn default_publish_destination() -> String {
    "/pub/chat/message".to_string()
}

fn default_subscribe_prefix() -> String {
    "/sub/chat/room".to_string()
}

fn default_loopback_latency_ms() -> u64 {
    10
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30000,
            max_reconnect_attempts: Some(5),
            heartbeat_send_ms: 10000,
            heartbeat_expect_ms: 10000,
            ws_path: default_ws_path(),
            publish_destination: default_publish_destination(),
            subscribe_prefix: default_subscribe_prefix(),
            loopback_latency_ms: 10,
        }
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to automatically reconnect after an unexpected disconnect.
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the delay before the first reconnect attempt (in milliseconds).
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Set the cap on the exponential backoff delay (in milliseconds).
    pub fn with_max_reconnect_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_reconnect_delay_ms = max_delay_ms;
        self
    }

    /// Set the maximum number of reconnect attempts.
    /// Pass `None` to retry forever.
    pub fn with_max_reconnect_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Set the outgoing heart-beat interval in milliseconds. 0 disables.
    pub fn with_heartbeat_send_ms(mut self, ms: u64) -> Self {
        self.heartbeat_send_ms = ms;
        self
    }

    /// Set the expected incoming heart-beat interval in milliseconds.
    /// 0 disables liveness monitoring.
    pub fn with_heartbeat_expect_ms(mut self, ms: u64) -> Self {
        self.heartbeat_expect_ms = ms;
        self
    }

    /// Set the WebSocket endpoint path on the broker host.
    pub fn with_ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Set the shared SEND destination for chat messages.
    pub fn with_publish_destination(mut self, destination: impl Into<String>) -> Self {
        self.publish_destination = destination.into();
        self
    }

    /// Set the prefix of room-scoped subscription destinations.
    pub fn with_subscribe_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subscribe_prefix = prefix.into();
        self
    }

    /// Set the simulated delivery latency of the loopback transport.
    pub fn with_loopback_latency_ms(mut self, ms: u64) -> Self {
        self.loopback_latency_ms = ms;
        self
    }
}

/// Backoff delay before the Nth reconnect attempt (1-based):
/// `reconnect_delay_ms × 2^(N-1)`, capped at `max_reconnect_delay_ms`.
pub(crate) fn backoff_delay(options: &ConnectionOptions, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let delay = options
        .reconnect_delay_ms
        .saturating_mul(2u64.saturating_pow(exp))
        .min(options.max_reconnect_delay_ms);
    Duration::from_millis(delay)
}
