//! Centralized constants for page sizes, timers, and limits.
//!
//! These are the defaults behind [`crate::config::SyncConfig`]; the config
//! file can override every one of them.

/// Backend query sizing.
pub mod paging {
    /// Number of most recent messages fetched when a conversation opens.
    pub const INITIAL_PAGE_SIZE: usize = 10;

    /// Target number of messages per backward page.
    pub const OLDER_PAGE_SIZE: usize = 10;

    /// Backward queries ask for this many pages at once so that filtered
    /// control records and unsupported types do not leave a page short.
    pub const OLDER_FETCH_MULTIPLIER: usize = 3;
}

/// Session timers.
pub mod timing {
    /// Delay between initial load completion and listener attachment (milliseconds).
    /// Lets the UI settle after the first render.
    pub const LISTENER_ATTACH_DELAY_MS: u64 = 500;

    /// Quiet period after the last live insert before the one-time
    /// scroll-to-bottom signal (milliseconds).
    pub const INITIAL_SCROLL_DEBOUNCE_MS: u64 = 1000;

    /// Minimum spacing between accepted load-older requests (milliseconds).
    pub const LOAD_OLDER_THROTTLE_MS: u64 = 500;

    /// How long the floating date marker stays visible (milliseconds).
    pub const DATE_MARKER_HIDE_MS: u64 = 1500;

    /// Upper bound on a single backend fetch (seconds).
    pub const FETCH_TIMEOUT_SECS: u64 = 10;
}

/// Channel sizing.
pub mod channels {
    /// Capacity of the command channel into the session actor.
    pub const COMMAND_CHANNEL_CAPACITY: usize = 32;
}
