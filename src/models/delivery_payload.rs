use serde::{Deserialize, Serialize};

use super::{ChatMessage, MessageKind, SenderId};

/// Body of an inbound MESSAGE frame on a room-scoped subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPayload {
    #[serde(default)]
    pub message_id: Option<String>,
    /// Echo of the sender's idempotency token, when the broker preserved it.
    #[serde(default)]
    pub client_message_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub room_id: String,
    pub sender_id: SenderId,
    pub message: String,
    #[serde(default)]
    pub timestamp: u64,
}

impl DeliveryPayload {
    pub fn into_message(self) -> ChatMessage {
        ChatMessage {
            message_id: self.message_id,
            client_message_id: self.client_message_id,
            kind: self.kind,
            room_id: self.room_id,
            sender_id: self.sender_id,
            content: self.message,
            timestamp: self.timestamp,
        }
    }
}
