use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of chat message exchanged in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    /// A participant joined the room.
    Enter,
    /// A regular chat line.
    Talk,
    /// A participant left the room.
    Leave,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Enter => "ENTER",
            MessageKind::Talk => "TALK",
            MessageKind::Leave => "LEAVE",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_is_uppercase() {
        assert_eq!(serde_json::to_string(&MessageKind::Talk).unwrap(), "\"TALK\"");
        assert_eq!(serde_json::to_string(&MessageKind::Enter).unwrap(), "\"ENTER\"");
        assert_eq!(
            serde_json::from_str::<MessageKind>("\"LEAVE\"").unwrap(),
            MessageKind::Leave
        );
    }
}
