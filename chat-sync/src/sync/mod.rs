//! Backend-facing halves of the sync controller: initial load, backward
//! pagination, and the live listener stream.

pub mod initial;
pub mod listener;
pub mod older;

pub use initial::*;
pub use listener::*;
pub use older::*;

use chat_store::BackendError;
use std::future::Future;
use std::time::Duration;

/// Run a backend call with an upper bound; running out of time is a
/// transient `BackendError::Timeout`.
pub(crate) async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout),
    }
}
