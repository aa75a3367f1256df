//! Contracts between the sync engine and the conversation backend.

use crate::entry::{ChatMessage, RawEntry};
use crate::room::RoomKey;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Errors reported by a conversation backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend could not be reached (offline, connection reset).
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend request timed out")]
    Timeout,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// The subscription or connection was closed by the backend.
    #[error("backend connection closed")]
    Closed,
}

impl BackendError {
    /// Connectivity failures that are logged but not shown to the user.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_) | BackendError::Timeout)
    }
}

/// A change notification on a room collection.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Added(RawEntry),
    Changed(RawEntry),
    Removed(RawEntry),
}

impl ChangeEvent {
    pub fn entry(&self) -> &RawEntry {
        match self {
            ChangeEvent::Added(e) | ChangeEvent::Changed(e) | ChangeEvent::Removed(e) => e,
        }
    }
}

/// Live change stream. Dropping it detaches the subscription.
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, BackendError>>;

/// Ordered, timestamp-indexed message collection per room.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// The last `limit` entries ordered by timestamp, oldest first.
    async fn fetch_last(&self, room: &RoomKey, limit: usize)
        -> Result<Vec<RawEntry>, BackendError>;

    /// The last `limit` entries with a timestamp strictly below `before`,
    /// oldest first.
    async fn fetch_before(
        &self,
        room: &RoomKey,
        before: i64,
        limit: usize,
    ) -> Result<Vec<RawEntry>, BackendError>;

    /// Subscribe to inserts, updates and removals.
    ///
    /// Entries already stored with a timestamp at or after `start_at` (all
    /// entries when `None`) are replayed first as `Added` events, then live
    /// changes follow in the order the backend emits them.
    async fn subscribe(
        &self,
        room: &RoomKey,
        start_at: Option<i64>,
    ) -> Result<ChangeStream, BackendError>;
}

/// Persists locally composed messages.
#[async_trait]
pub trait DeliveryService: Send + Sync {
    async fn deliver(&self, room: &RoomKey, message: &ChatMessage) -> Result<(), BackendError>;
}
