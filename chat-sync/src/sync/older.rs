//! Backward pagination below the oldest loaded message.

use super::with_timeout;
use crate::config::SyncConfig;
use chat_store::{parse_entries, BackendError, ChatMessage, ConversationBackend, RoomKey};

/// Fetch messages strictly older than `watermark`, oldest first.
///
/// The query over-fetches (`older_page_size * older_fetch_multiplier`) so
/// filtered entries do not leave the page short. Dedup against what is
/// already loaded happens when the page is merged.
pub async fn fetch_older(
    backend: &dyn ConversationBackend,
    room: &RoomKey,
    watermark: i64,
    config: &SyncConfig,
) -> Result<Vec<ChatMessage>, BackendError> {
    let limit = config.older_fetch_limit();
    tracing::debug!(
        "Requesting up to {} messages before {} for room {}",
        limit,
        watermark,
        room
    );
    let entries = with_timeout(
        config.fetch_timeout(),
        backend.fetch_before(room, watermark, limit),
    )
    .await?;

    let mut messages: Vec<ChatMessage> = parse_entries(&entries)
        .into_iter()
        .filter(|m| m.timestamp < watermark)
        .collect();
    messages.sort_by_key(|m| m.timestamp);

    tracing::info!(
        "Loaded {} older messages for room {} (from {} entries)",
        messages.len(),
        room,
        entries.len()
    );
    Ok(messages)
}
