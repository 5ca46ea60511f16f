use serde::{Deserialize, Serialize};
use std::fmt;

/// Sender identifier as it appears on the wire.
///
/// The broker accepts either a string user id or a numeric account id,
/// depending on which identity service issued it, so both shapes are
/// preserved instead of coercing to one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SenderId {
    Text(String),
    Number(i64),
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderId::Text(id) => write!(f, "{}", id),
            SenderId::Number(id) => write!(f, "{}", id),
        }
    }
}

impl From<&str> for SenderId {
    fn from(id: &str) -> Self {
        SenderId::Text(id.to_string())
    }
}

impl From<String> for SenderId {
    fn from(id: String) -> Self {
        SenderId::Text(id)
    }
}

impl From<i64> for SenderId {
    fn from(id: i64) -> Self {
        SenderId::Number(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_round_trip() {
        let text: SenderId = serde_json::from_str("\"buyer-7\"").unwrap();
        assert_eq!(text, SenderId::Text("buyer-7".to_string()));
        assert_eq!(serde_json::to_string(&text).unwrap(), "\"buyer-7\"");

        let number: SenderId = serde_json::from_str("42").unwrap();
        assert_eq!(number, SenderId::Number(42));
        assert_eq!(serde_json::to_string(&number).unwrap(), "42");
    }

    #[test]
    fn test_display() {
        assert_eq!(SenderId::from("seller-3").to_string(), "seller-3");
        assert_eq!(SenderId::from(42i64).to_string(), "42");
    }
}
