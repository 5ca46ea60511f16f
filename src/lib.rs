//! souq-link — Rust client for the Souq marketplace real-time chat broker.
//!
//! One STOMP-over-WebSocket session per client, multiplexing per-room
//! message subscriptions over that session, with:
//!
//! - Pending outbound and subscription queues while disconnected, drained
//!   FIFO on (re)connect
//! - Automatic reconnection with exponential backoff, bounded by a
//!   configurable attempt budget
//! - Status and error listeners with capability-style deregistration
//! - An in-memory [`LoopbackTransport`] for development without a backend,
//!   sharing the handler dispatch path with the real transport
//!
//! # Example
//!
//! ```rust,no_run
//! use souq_link::{ChatMessage, SouqLinkClient};
//!
//! # async fn example() -> souq_link::Result<()> {
//! let client = SouqLinkClient::builder()
//!     .base_url("https://chat.souq.example")
//!     .bearer_token("eyJhbGc...")
//!     .build()?;
//!
//! client.connect().await?;
//!
//! let _subscription = client
//!     .subscribe("room-42", |message| {
//!         println!("[{}] {}: {}", message.room_id, message.sender_id, message.content);
//!     })
//!     .await?;
//!
//! client
//!     .send_message(ChatMessage::talk("room-42", "buyer-7", "still available?"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod listeners;
pub mod models;
pub mod status;
pub mod stomp;
pub mod timeouts;
pub mod token;
pub mod transport;

pub use client::{RoomSubscription, SouqLinkClient, SouqLinkClientBuilder};
pub use error::{Result, SouqLinkError};
pub use listeners::ListenerGuard;
pub use models::{ChatMessage, ConnectionOptions, MessageKind, SenderId};
pub use status::ConnectionStatus;
pub use timeouts::SouqLinkTimeouts;
pub use token::TokenStore;
pub use transport::{ChatTransport, LoopbackTransport, StompTransport};
