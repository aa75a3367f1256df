//! Conversation room keys.

use std::fmt;

/// Root collection holding every room.
pub const CHAT_ROOT: &str = "chats";

/// Identifier of a two-party conversation room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomKey(String);

impl RoomKey {
    /// Key for the room shared by two participants.
    ///
    /// The ids are concatenated in lexicographic order so both sides derive
    /// the same key.
    pub fn between(a: &str, b: &str) -> Self {
        if a <= b {
            Self(format!("{a}{b}"))
        } else {
            Self(format!("{b}{a}"))
        }
    }

    /// Wrap a key that was already derived elsewhere.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Backend path of the room's message collection.
    pub fn path(&self) -> String {
        format!("{}/{}", CHAT_ROOT, self.0)
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_between_is_order_independent() {
        assert_eq!(RoomKey::between("alice", "bob"), RoomKey::between("bob", "alice"));
        assert_eq!(RoomKey::between("42", "7").as_str(), "427");
        assert_eq!(RoomKey::between("same", "same").as_str(), "samesame");
    }

    #[test]
    fn test_path() {
        let room = RoomKey::from_raw("ab");
        assert_eq!(room.path(), "chats/ab");
        assert_eq!(room.to_string(), "ab");
    }
}
