use serde::{Deserialize, Serialize};

use super::{ChatMessage, MessageKind, SenderId};

/// Body of an outbound SEND frame.
///
/// One shared publish destination carries messages for every room; the
/// broker routes on `roomId`, not on the destination path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishPayload {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub room_id: String,
    pub sender_id: SenderId,
    pub message: String,
    /// Epoch milliseconds.
    pub timestamp: u64,
    /// Client-generated idempotency token.
    pub client_message_id: String,
}

impl PublishPayload {
    /// Build the wire payload for a message that has already been stamped
    /// with a timestamp and a client message id.
    pub fn from_message(message: &ChatMessage) -> Self {
        Self {
            kind: message.kind,
            room_id: message.room_id.clone(),
            sender_id: message.sender_id.clone(),
            message: message.content.clone(),
            timestamp: message.timestamp,
            client_message_id: message.client_message_id.clone().unwrap_or_default(),
        }
    }
}
