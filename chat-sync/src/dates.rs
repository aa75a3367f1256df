//! Calendar day buckets and duplicate-day markers.
//!
//! The first message of each day carries the plain day label in
//! `current_date`; every later message of the same day carries the label
//! behind [`DUPLICATE_DAY_PREFIX`], so the UI draws one header per day.

use chat_store::ChatMessage;
use chrono::{FixedOffset, Local, TimeZone};
use std::collections::HashSet;
use std::fmt::Display;

/// Prefix marking a message whose day header is already shown above it.
pub const DUPLICATE_DAY_PREFIX: &str = "~";

/// Display format of a day label, e.g. `05 Mar 2026`.
pub const DAY_FORMAT: &str = "%d %b %Y";

/// Days already seen while folding over an ascending list.
pub type DaySet = HashSet<String>;

/// Time zone used to cut timestamps into calendar days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DayZone {
    /// The device's local time zone.
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl DayZone {
    pub fn bucket(&self, timestamp_ms: i64) -> String {
        match self {
            DayZone::Local => day_bucket_in(timestamp_ms, &Local),
            DayZone::Fixed(offset) => day_bucket_in(timestamp_ms, offset),
        }
    }
}

/// Day label of a millisecond timestamp in the local time zone.
pub fn day_bucket(timestamp_ms: i64) -> String {
    DayZone::Local.bucket(timestamp_ms)
}

/// Day label of a millisecond timestamp in `tz`. Out-of-range timestamps
/// yield an empty label.
pub fn day_bucket_in<Tz>(timestamp_ms: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    tz.timestamp_millis_opt(timestamp_ms)
        .earliest()
        .map(|dt| dt.format(DAY_FORMAT).to_string())
        .unwrap_or_default()
}

/// Tag one message given the days already present before it.
pub fn tag_day(mut prior: DaySet, mut message: ChatMessage, zone: DayZone) -> (ChatMessage, DaySet) {
    let day = zone.bucket(message.timestamp);
    message.current_date = if prior.contains(&day) {
        format!("{DUPLICATE_DAY_PREFIX}{day}")
    } else {
        prior.insert(day.clone());
        day
    };
    (message, prior)
}

/// Re-run [`tag_day`] over a list sorted ascending by timestamp.
pub fn retag(messages: Vec<ChatMessage>, zone: DayZone) -> (Vec<ChatMessage>, DaySet) {
    let capacity = messages.len();
    messages.into_iter().fold(
        (Vec::with_capacity(capacity), DaySet::new()),
        |(mut tagged, days), message| {
            let (message, days) = tag_day(days, message, zone);
            tagged.push(message);
            (tagged, days)
        },
    )
}

pub fn is_duplicate_day(label: &str) -> bool {
    label.starts_with(DUPLICATE_DAY_PREFIX)
}

/// Day label without the duplicate marker.
pub fn strip_marker(label: &str) -> &str {
    label.strip_prefix(DUPLICATE_DAY_PREFIX).unwrap_or(label)
}
