//! Chat message model and parsing of raw room entries.
//!
//! A room collection mixes real messages with control records (the typing
//! indicator and similar), so every entry goes through the reserved-key and
//! data-type filters before it becomes a [`ChatMessage`].

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Key of the typing-indicator pseudo-entry stored next to the messages.
pub const TYPING_SENTINEL_KEY: &str = "typing";

/// Punctuation token some clients write as a placeholder child.
pub const RESERVED_PUNCTUATION_KEY: &str = ":";

/// Kind of content a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "Text")]
    Text,
    #[serde(rename = "img")]
    Image,
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "doc")]
    Document,
    #[serde(rename = "contact")]
    Contact,
    #[serde(rename = "voiceAudio")]
    VoiceNote,
}

impl DataType {
    /// Map a wire tag to a data type. Unknown tags return `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Text" => Some(DataType::Text),
            "img" => Some(DataType::Image),
            "video" => Some(DataType::Video),
            "doc" => Some(DataType::Document),
            "contact" => Some(DataType::Contact),
            "voiceAudio" => Some(DataType::VoiceNote),
            _ => None,
        }
    }

    /// The wire tag for this data type.
    pub fn tag(&self) -> &'static str {
        match self {
            DataType::Text => "Text",
            DataType::Image => "img",
            DataType::Video => "video",
            DataType::Document => "doc",
            DataType::Contact => "contact",
            DataType::VoiceNote => "voiceAudio",
        }
    }
}

/// Attachment metadata. Opaque to the sync engine apart from `document`,
/// which is the attachment reference compared on updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attachment {
    /// Remote URL of the uploaded file.
    pub document: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub extension: String,
    pub thumbnail: String,
    pub caption: String,
    #[serde(rename = "docSize")]
    pub doc_size: String,
    #[serde(rename = "imageWidth")]
    pub image_width: String,
    #[serde(rename = "imageHeight")]
    pub image_height: String,
    #[serde(rename = "aspectRatio")]
    pub aspect_ratio: String,
    /// Voice note duration as displayed.
    #[serde(rename = "miceTiming")]
    pub voice_duration: String,
    /// Shared contact card name.
    pub name: String,
    /// Shared contact card phone number.
    pub phone: String,
}

/// Reference to the message being replied to, if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyRef {
    #[serde(rename = "replyKey")]
    pub key: String,
    #[serde(rename = "replyType")]
    pub kind: String,
    #[serde(rename = "replytextData")]
    pub quoted_text: String,
}

impl ReplyRef {
    /// Whether this message replies to another one.
    pub fn is_reply(&self) -> bool {
        !self.key.is_empty()
    }
}

/// A single chat message as stored in a conversation room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message id, unique within the room. Always equal to the entry key.
    #[serde(rename = "modelId", default)]
    pub id: String,
    #[serde(rename = "uid", default)]
    pub sender_id: String,
    #[serde(rename = "receiverUid", default)]
    pub receiver_id: String,
    #[serde(rename = "message", default)]
    pub body: String,
    #[serde(rename = "dataType")]
    pub data_type: DataType,
    /// Ordering key in milliseconds.
    #[serde(deserialize_with = "timestamp_millis")]
    pub timestamp: i64,
    #[serde(flatten)]
    pub attachment: Attachment,
    #[serde(flatten)]
    pub reply: ReplyRef,
    /// Emoji reaction summary.
    #[serde(rename = "emojiCount", default)]
    pub emoji_count: String,
    /// Day bucket label, assigned by the sync engine.
    #[serde(rename = "currentDate", default)]
    pub current_date: String,
    /// Wire fields this model does not know about, kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    /// Build a plain text message.
    pub fn text(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        body: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            body: body.into(),
            data_type: DataType::Text,
            timestamp,
            attachment: Attachment::default(),
            reply: ReplyRef::default(),
            emoji_count: String::new(),
            current_date: String::new(),
            extra: Map::new(),
        }
    }

    /// Parse a raw room entry.
    ///
    /// Reserved keys and unsupported data types are rejected before the
    /// payload is deserialized. The entry key becomes the message id.
    pub fn from_entry(entry: &RawEntry) -> Result<Self, EntryError> {
        if is_reserved_key(&entry.key) {
            return Err(EntryError::ReservedKey(entry.key.clone()));
        }

        let tag = entry
            .value
            .get("dataType")
            .and_then(Value::as_str)
            .ok_or(EntryError::MissingType)?;
        if DataType::from_tag(tag).is_none() {
            return Err(EntryError::UnsupportedType(tag.to_string()));
        }

        let mut message: ChatMessage = serde_json::from_value(entry.value.clone())?;
        message.id = entry.key.clone();
        Ok(message)
    }

    /// Wire representation of this message.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Whether any field that matters for display changed between two
    /// versions of the same message.
    pub fn payload_differs(&self, other: &ChatMessage) -> bool {
        self.body != other.body
            || self.attachment.document != other.attachment.document
            || self.emoji_count != other.emoji_count
            || self.timestamp != other.timestamp
    }
}

/// One child of a room collection, as delivered by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    pub key: String,
    pub value: Value,
}

impl RawEntry {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Numeric `timestamp` field, if the entry has one.
    pub fn timestamp(&self) -> Option<i64> {
        let ts = self.value.get("timestamp")?;
        ts.as_i64().or_else(|| ts.as_f64().map(|f| f as i64))
    }
}

/// Reasons an entry is not turned into a message.
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("reserved key {0:?}")]
    ReservedKey(String),
    #[error("unsupported data type {0:?}")]
    UnsupportedType(String),
    #[error("entry has no dataType")]
    MissingType,
    #[error("malformed entry: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Whether a key names a control record rather than a message.
pub fn is_reserved_key(key: &str) -> bool {
    key.chars().count() <= 1 || key == TYPING_SENTINEL_KEY || key == RESERVED_PUNCTUATION_KEY
}

/// Parse a batch of entries, skipping the ones that are not messages.
///
/// A bad entry never aborts the batch. Output keeps the input order.
pub fn parse_entries<'a, I>(entries: I) -> Vec<ChatMessage>
where
    I: IntoIterator<Item = &'a RawEntry>,
{
    entries
        .into_iter()
        .filter_map(|entry| match ChatMessage::from_entry(entry) {
            Ok(message) => Some(message),
            Err(EntryError::Malformed(e)) => {
                tracing::warn!("Skipping malformed entry {}: {}", entry.key, e);
                None
            }
            Err(e) => {
                tracing::debug!("Skipping entry {}: {}", entry.key, e);
                None
            }
        })
        .collect()
}

/// Accept integer or floating point millisecond timestamps.
fn timestamp_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    number
        .as_i64()
        .or_else(|| number.as_f64().map(|f| f as i64))
        .ok_or_else(|| de::Error::custom("timestamp out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str, value: Value) -> RawEntry {
        RawEntry::new(key, value)
    }

    #[test]
    fn test_reserved_keys() {
        assert!(is_reserved_key("typing"));
        assert!(is_reserved_key(":"));
        assert!(is_reserved_key("a"));
        assert!(is_reserved_key(""));
        assert!(!is_reserved_key("m1"));
        assert!(!is_reserved_key("-Nx9aZ"));
    }

    #[test]
    fn test_parse_text_entry() {
        let raw = entry(
            "m100",
            json!({
                "uid": "alice",
                "receiverUid": "bob",
                "message": "hello",
                "dataType": "Text",
                "timestamp": 100,
                "modelId": "ignored",
            }),
        );
        let msg = ChatMessage::from_entry(&raw).unwrap();
        assert_eq!(msg.id, "m100");
        assert_eq!(msg.sender_id, "alice");
        assert_eq!(msg.body, "hello");
        assert_eq!(msg.data_type, DataType::Text);
        assert_eq!(msg.timestamp, 100);
        assert!(!msg.reply.is_reply());
    }

    #[test]
    fn test_parse_float_timestamp_and_attachment() {
        let raw = entry(
            "img1",
            json!({
                "dataType": "img",
                "timestamp": 1_700_000_000_123.0,
                "document": "https://cdn.example/a.jpg",
                "imageWidth": "640",
                "replyKey": "m9",
            }),
        );
        let msg = ChatMessage::from_entry(&raw).unwrap();
        assert_eq!(msg.timestamp, 1_700_000_000_123);
        assert_eq!(msg.data_type, DataType::Image);
        assert_eq!(msg.attachment.document, "https://cdn.example/a.jpg");
        assert_eq!(msg.attachment.image_width, "640");
        assert!(msg.reply.is_reply());
    }

    #[test]
    fn test_unknown_fields_are_preserved() {
        let raw = entry(
            "m1x",
            json!({"dataType": "Text", "timestamp": 5, "forwaredKey": "f1", "notification": 1}),
        );
        let msg = ChatMessage::from_entry(&raw).unwrap();
        assert_eq!(msg.extra.get("forwaredKey"), Some(&json!("f1")));
        let value = msg.to_value().unwrap();
        assert_eq!(value.get("notification"), Some(&json!(1)));
        assert_eq!(value.get("dataType"), Some(&json!("Text")));
    }

    #[test]
    fn test_rejections() {
        let typing = entry("typing", json!({"dataType": "Text", "timestamp": 1}));
        assert!(matches!(
            ChatMessage::from_entry(&typing),
            Err(EntryError::ReservedKey(_))
        ));

        let sticker = entry("m2", json!({"dataType": "sticker", "timestamp": 1}));
        assert!(matches!(
            ChatMessage::from_entry(&sticker),
            Err(EntryError::UnsupportedType(t)) if t == "sticker"
        ));

        let untyped = entry("m3", json!({"timestamp": 1}));
        assert!(matches!(
            ChatMessage::from_entry(&untyped),
            Err(EntryError::MissingType)
        ));

        let no_timestamp = entry("m4", json!({"dataType": "Text"}));
        assert!(matches!(
            ChatMessage::from_entry(&no_timestamp),
            Err(EntryError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_entries_skips_bad_records() {
        let entries = vec![
            entry("m1", json!({"dataType": "Text", "timestamp": 1})),
            entry("typing", json!(true)),
            entry("m2", json!({"dataType": "Text", "timestamp": "soon"})),
            entry("m3", json!({"dataType": "poll", "timestamp": 3})),
            entry("m4", json!({"dataType": "voiceAudio", "timestamp": 4})),
        ];
        let ids: Vec<String> = parse_entries(&entries).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m1", "m4"]);
    }

    #[test]
    fn test_payload_differs() {
        let base = ChatMessage::text("m1", "a", "b", "hi", 10);

        let mut same = base.clone();
        same.current_date = "~01 Jan 2026".to_string();
        same.attachment.caption = "ignored".to_string();
        assert!(!base.payload_differs(&same));

        let mut reacted = base.clone();
        reacted.emoji_count = "2".to_string();
        assert!(base.payload_differs(&reacted));

        let mut moved = base.clone();
        moved.timestamp = 11;
        assert!(base.payload_differs(&moved));

        let mut reuploaded = base.clone();
        reuploaded.attachment.document = "https://cdn.example/b".to_string();
        assert!(base.payload_differs(&reuploaded));
    }
}
