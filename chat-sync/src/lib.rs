//! Client-side conversation sync engine.
//!
//! Materializes a chat room as an ordered, deduplicated render list from a
//! bounded initial fetch, a live change listener and on-demand backward
//! pagination, all reconciled on one session task.

pub mod config;
pub mod constants;
pub mod dates;
pub mod error;
pub mod render_list;
pub mod session;
pub mod sync;

pub use config::SyncConfig;
pub use dates::DayZone;
pub use error::SyncError;
pub use render_list::{RenderList, RenderSnapshot};
pub use session::{
    ConversationSyncSession, InitialOutcome, ListChange, LoadOlderOutcome, SessionState,
    SkipReason, SyncEvent,
};
