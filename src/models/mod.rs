//! Data models for the souq-link client library.
//!
//! Defines the public chat message type and the JSON wire payloads exchanged
//! with the broker, plus connection-level options.

pub mod chat_message;
pub mod connection_options;
pub mod delivery_payload;
pub mod message_kind;
pub mod publish_payload;
pub mod sender_id;

pub use chat_message::ChatMessage;
pub use connection_options::ConnectionOptions;
pub use delivery_payload::DeliveryPayload;
pub use message_kind::MessageKind;
pub use publish_payload::PublishPayload;
pub use sender_id::SenderId;
