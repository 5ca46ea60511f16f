//! Timeout configuration for chat client operations.

use std::time::Duration;

/// Timeouts for individual transport operations.
///
/// # Examples
///
/// ```rust
/// use souq_link::SouqLinkTimeouts;
/// use std::time::Duration;
///
/// // Use defaults (recommended for most cases)
/// let timeouts = SouqLinkTimeouts::default();
///
/// // Custom timeouts for high-latency environments
/// let timeouts = SouqLinkTimeouts::builder()
///     .connection_timeout(Duration::from_secs(30))
///     .build();
///
/// // Aggressive timeouts for local development
/// let timeouts = SouqLinkTimeouts::fast();
/// ```
#[derive(Debug, Clone)]
pub struct SouqLinkTimeouts {
    /// Timeout for establishing the WebSocket connection (TCP + TLS +
    /// upgrade). Default: 10 seconds.
    pub connection_timeout: Duration,

    /// Timeout for the STOMP handshake (CONNECT sent, waiting for
    /// CONNECTED or ERROR). Default: 5 seconds.
    pub handshake_timeout: Duration,

    /// Upper bound on the graceful teardown performed by `disconnect()`.
    /// Default: 2 seconds.
    pub disconnect_timeout: Duration,
}

impl Default for SouqLinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(2),
        }
    }
}

impl SouqLinkTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> SouqLinkTimeoutsBuilder {
        SouqLinkTimeoutsBuilder::new()
    }

    /// Timeouts optimized for fast local development.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(2),
            disconnect_timeout: Duration::from_secs(1),
        }
    }

    /// Timeouts optimized for high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(15),
            disconnect_timeout: Duration::from_secs(5),
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Builder for [`SouqLinkTimeouts`].
#[derive(Debug, Clone)]
pub struct SouqLinkTimeoutsBuilder {
    timeouts: SouqLinkTimeouts,
}

impl SouqLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: SouqLinkTimeouts::default(),
        }
    }

    /// Set the WebSocket connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    /// Set the WebSocket connection timeout in seconds.
    pub fn connection_timeout_secs(self, secs: u64) -> Self {
        self.connection_timeout(Duration::from_secs(secs))
    }

    /// Set the STOMP handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.handshake_timeout = timeout;
        self
    }

    /// Set the STOMP handshake timeout in seconds.
    pub fn handshake_timeout_secs(self, secs: u64) -> Self {
        self.handshake_timeout(Duration::from_secs(secs))
    }

    /// Set the graceful teardown timeout.
    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.disconnect_timeout = timeout;
        self
    }

    /// Build the timeout configuration.
    pub fn build(self) -> SouqLinkTimeouts {
        self.timeouts
    }
}
