//! Error type for session operations.

use chat_store::BackendError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The session was closed before or while the request was handled.
    #[error("conversation session closed")]
    Closed,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl SyncError {
    /// Whether the failure should be shown to the user.
    pub fn is_user_visible(&self) -> bool {
        match self {
            SyncError::Closed => false,
            SyncError::Backend(e) => !e.is_transient(),
        }
    }
}
