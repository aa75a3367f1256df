//! Live listener over a room's change notifications.
//!
//! The stream subscribes lazily on first poll, then turns backend change
//! events into parsed message events. Control records and unsupported types
//! never leave this module.

use chat_store::{
    is_reserved_key, BackendError, ChangeEvent, ChangeStream, ChatMessage, ConversationBackend,
    EntryError, RoomKey,
};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;

/// Parsed change delivered to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    /// Subscription established.
    Attached,
    Inserted(ChatMessage),
    Changed(ChatMessage),
    /// Id of the removed message.
    Removed(String),
    /// Subscription refused or broken. The stream ends after this.
    Failed(BackendError),
    /// Backend closed the subscription.
    Ended,
}

pub type ListenerStream = BoxStream<'static, ListenerEvent>;

enum ListenerState {
    Init {
        backend: Arc<dyn ConversationBackend>,
        room: RoomKey,
        start_at: Option<i64>,
    },
    Listening {
        stream: ChangeStream,
        room: RoomKey,
    },
    Done,
}

/// Create a stream of live changes for a room.
///
/// Entries at or after `start_at` are replayed as inserts first; the
/// caller's dedup rules decide what to do with them. Dropping the stream
/// detaches the subscription.
pub fn listener_stream(
    backend: Arc<dyn ConversationBackend>,
    room: RoomKey,
    start_at: Option<i64>,
) -> ListenerStream {
    futures_util::stream::unfold(
        ListenerState::Init {
            backend,
            room,
            start_at,
        },
        |state| async move {
            match state {
                ListenerState::Init {
                    backend,
                    room,
                    start_at,
                } => match backend.subscribe(&room, start_at).await {
                    Ok(stream) => {
                        tracing::info!("Live listener attached to room {} from {:?}", room, start_at);
                        Some((ListenerEvent::Attached, ListenerState::Listening { stream, room }))
                    }
                    Err(e) => {
                        tracing::warn!("Failed to subscribe to room {}: {}", room, e);
                        Some((ListenerEvent::Failed(e), ListenerState::Done))
                    }
                },
                ListenerState::Listening { mut stream, room } => loop {
                    match stream.next().await {
                        Some(Ok(change)) => {
                            if let Some(event) = parse_change(&room, change) {
                                return Some((event, ListenerState::Listening { stream, room }));
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!("Change stream error for room {}: {}", room, e);
                            return Some((ListenerEvent::Failed(e), ListenerState::Done));
                        }
                        None => {
                            tracing::info!("Change stream ended for room {}", room);
                            return Some((ListenerEvent::Ended, ListenerState::Done));
                        }
                    }
                },
                ListenerState::Done => None,
            }
        },
    )
    .boxed()
}

fn parse_change(room: &RoomKey, change: ChangeEvent) -> Option<ListenerEvent> {
    match change {
        ChangeEvent::Added(entry) => match ChatMessage::from_entry(&entry) {
            Ok(message) => Some(ListenerEvent::Inserted(message)),
            Err(e) => {
                log_skipped(room, &entry.key, &e);
                None
            }
        },
        ChangeEvent::Changed(entry) => match ChatMessage::from_entry(&entry) {
            Ok(message) => Some(ListenerEvent::Changed(message)),
            Err(e) => {
                log_skipped(room, &entry.key, &e);
                None
            }
        },
        ChangeEvent::Removed(entry) => {
            if is_reserved_key(&entry.key) {
                None
            } else {
                Some(ListenerEvent::Removed(entry.key))
            }
        }
    }
}

fn log_skipped(room: &RoomKey, key: &str, error: &EntryError) {
    match error {
        EntryError::Malformed(_) => {
            tracing::warn!("Skipping live entry {} in room {}: {}", key, room, error)
        }
        _ => tracing::debug!("Skipping live entry {} in room {}: {}", key, room, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_store::{MemoryBackend, RawEntry};
    use serde_json::json;

    fn room() -> RoomKey {
        RoomKey::from_raw("ab")
    }

    #[tokio::test]
    async fn test_filters_and_translates_changes() {
        let backend = Arc::new(MemoryBackend::new());
        let mut stream = listener_stream(backend.clone(), room(), None);
        assert_eq!(stream.next().await, Some(ListenerEvent::Attached));

        backend.put(&room(), "typing", json!({"dataType": "Text", "timestamp": 1}));
        backend.put(&room(), "m1", json!({"dataType": "sticker", "timestamp": 1}));
        backend.put(&room(), "m2", json!({"dataType": "Text", "timestamp": 2, "message": "hi"}));
        backend.put(&room(), "m2", json!({"dataType": "Text", "timestamp": 2, "message": "hey"}));
        backend.remove(&room(), "typing");
        backend.remove(&room(), "m2");

        match stream.next().await {
            Some(ListenerEvent::Inserted(m)) => assert_eq!((m.id.as_str(), m.body.as_str()), ("m2", "hi")),
            other => panic!("unexpected {other:?}"),
        }
        match stream.next().await {
            Some(ListenerEvent::Changed(m)) => assert_eq!(m.body, "hey"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(stream.next().await, Some(ListenerEvent::Removed("m2".to_string())));
    }

    #[tokio::test]
    async fn test_replay_starts_at_watermark() {
        let backend = Arc::new(MemoryBackend::new());
        for ts in [5, 10, 15] {
            backend
                .insert_message(&room(), &ChatMessage::text(format!("m{ts}"), "a", "b", "", ts))
                .unwrap();
        }
        let mut stream = listener_stream(backend.clone(), room(), Some(10));
        assert_eq!(stream.next().await, Some(ListenerEvent::Attached));
        for expected in ["m10", "m15"] {
            match stream.next().await {
                Some(ListenerEvent::Inserted(m)) => assert_eq!(m.id, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_subscribe_failure_ends_stream() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_next_subscribe(BackendError::PermissionDenied("rules".into()));
        let mut stream = listener_stream(backend.clone(), room(), None);
        assert_eq!(
            stream.next().await,
            Some(ListenerEvent::Failed(BackendError::PermissionDenied("rules".into())))
        );
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_dropping_stream_detaches() {
        let backend = Arc::new(MemoryBackend::new());
        let mut stream = listener_stream(backend.clone(), room(), None);
        assert_eq!(stream.next().await, Some(ListenerEvent::Attached));
        assert_eq!(backend.subscriber_count(&room()), 1);
        drop(stream);
        assert_eq!(backend.subscriber_count(&room()), 0);
    }

    #[test]
    fn test_parse_change_removed_needs_only_key() {
        let event = parse_change(&room(), ChangeEvent::Removed(RawEntry::new("m9", json!(null))));
        assert_eq!(event, Some(ListenerEvent::Removed("m9".to_string())));
    }
}
