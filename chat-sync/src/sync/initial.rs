//! Bounded initial fetch of the most recent messages.

use super::with_timeout;
use crate::config::SyncConfig;
use chat_store::{parse_entries, BackendError, ChatMessage, ConversationBackend, RoomKey};

/// Messages returned by the initial load, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialBatch {
    pub messages: Vec<ChatMessage>,
    /// Smallest timestamp in the batch, `None` for an empty room.
    pub oldest: Option<i64>,
}

/// Fetch the last `initial_page_size` messages of a room.
///
/// Control records and unsupported types are dropped, and the result is
/// re-sorted by timestamp since backend order is not trusted.
pub async fn load_initial(
    backend: &dyn ConversationBackend,
    room: &RoomKey,
    config: &SyncConfig,
) -> Result<InitialBatch, BackendError> {
    tracing::debug!(
        "Requesting last {} messages for room {}",
        config.initial_page_size,
        room
    );
    let entries = with_timeout(
        config.fetch_timeout(),
        backend.fetch_last(room, config.initial_page_size),
    )
    .await?;

    let mut messages = parse_entries(&entries);
    messages.sort_by_key(|m| m.timestamp);
    let oldest = messages.first().map(|m| m.timestamp);

    tracing::info!(
        "Initial load for room {}: {} entries, {} messages, oldest {:?}",
        room,
        entries.len(),
        messages.len(),
        oldest
    );
    Ok(InitialBatch { messages, oldest })
}
