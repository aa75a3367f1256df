//! The ordered, deduplicated message list backing a conversation screen.
//!
//! Invariants held after every mutation:
//! - messages are sorted ascending by timestamp (stable for equal timestamps)
//! - no two messages share an id
//! - day markers are consistent with the current order

use crate::dates::{is_duplicate_day, retag, DayZone};
use chat_store::ChatMessage;
use std::collections::HashSet;
use std::sync::Arc;

/// Result of applying a live insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveInsert {
    Inserted,
    /// Already materialized by the initial load.
    SuppressedInitial,
    AlreadyPresent,
}

/// Immutable view of the list handed to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSnapshot {
    pub messages: Arc<Vec<ChatMessage>>,
    pub oldest_watermark: Option<i64>,
    pub has_more_history: bool,
    /// Day labels present, oldest first.
    pub unique_dates: Vec<String>,
}

impl Default for RenderSnapshot {
    fn default() -> Self {
        Self {
            messages: Arc::new(Vec::new()),
            oldest_watermark: None,
            has_more_history: true,
            unique_dates: Vec::new(),
        }
    }
}

impl RenderSnapshot {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.messages.iter().map(|m| m.id.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct RenderList {
    messages: Vec<ChatMessage>,
    ids: HashSet<String>,
    initially_loaded_ids: HashSet<String>,
    oldest_watermark: Option<i64>,
    has_more_history: bool,
    zone: DayZone,
}

impl Default for RenderList {
    fn default() -> Self {
        Self::new(DayZone::default())
    }
}

impl RenderList {
    pub fn new(zone: DayZone) -> Self {
        Self {
            messages: Vec::new(),
            ids: HashSet::new(),
            initially_loaded_ids: HashSet::new(),
            oldest_watermark: None,
            has_more_history: true,
            zone,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Oldest timestamp fetched from history; `None` until something was loaded.
    pub fn oldest_watermark(&self) -> Option<i64> {
        self.oldest_watermark
    }

    pub fn has_more_history(&self) -> bool {
        self.has_more_history
    }

    pub fn initially_loaded_ids(&self) -> &HashSet<String> {
        &self.initially_loaded_ids
    }

    /// Day labels present in the list, oldest first.
    pub fn unique_dates(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter(|m| !m.current_date.is_empty() && !is_duplicate_day(&m.current_date))
            .map(|m| m.current_date.clone())
            .collect()
    }

    pub fn snapshot(&self) -> RenderSnapshot {
        RenderSnapshot {
            messages: Arc::new(self.messages.clone()),
            oldest_watermark: self.oldest_watermark,
            has_more_history: self.has_more_history,
            unique_dates: self.unique_dates(),
        }
    }

    /// Fold the initial batch in and record the dedup set and watermark.
    ///
    /// Returns the number of messages added. Ids already present (a local
    /// message appended before the load finished) are not duplicated.
    pub fn publish_initial(&mut self, batch: Vec<ChatMessage>) -> usize {
        self.initially_loaded_ids = batch.iter().map(|m| m.id.clone()).collect();
        self.oldest_watermark = batch.iter().map(|m| m.timestamp).min();

        let before = self.messages.len();
        for message in batch {
            if self.ids.insert(message.id.clone()) {
                self.messages.push(message);
            }
        }
        self.sort_and_retag();
        self.messages.len() - before
    }

    /// Apply a live insert event.
    pub fn insert_live(&mut self, message: ChatMessage) -> LiveInsert {
        if self.initially_loaded_ids.contains(&message.id) {
            return LiveInsert::SuppressedInitial;
        }
        if !self.ids.insert(message.id.clone()) {
            return LiveInsert::AlreadyPresent;
        }
        self.messages.push(message);
        self.sort_and_retag();
        LiveInsert::Inserted
    }

    /// Replace a message if its payload changed. Returns whether the list changed.
    ///
    /// Unknown ids are ignored. With `resort`, a changed timestamp moves the
    /// message to its new position.
    pub fn apply_update(&mut self, mut message: ChatMessage, resort: bool) -> bool {
        let Some(slot) = self.messages.iter_mut().find(|m| m.id == message.id) else {
            return false;
        };
        if !slot.payload_differs(&message) {
            return false;
        }

        let moved = slot.timestamp != message.timestamp;
        message.current_date = std::mem::take(&mut slot.current_date);
        *slot = message;

        if moved {
            if resort {
                self.sort_and_retag();
            } else {
                self.retag();
            }
        }
        true
    }

    /// Remove a message by id. Absence is not an error.
    pub fn remove(&mut self, id: &str) -> bool {
        if !self.ids.remove(id) {
            return false;
        }
        self.initially_loaded_ids.remove(id);
        self.messages.retain(|m| m.id != id);
        self.retag();
        true
    }

    /// Merge a page of older messages.
    ///
    /// Keeps only messages strictly older than the watermark and not already
    /// present. An empty result marks history as exhausted; otherwise the
    /// watermark moves down to the oldest merged timestamp.
    pub fn merge_older(&mut self, batch: Vec<ChatMessage>) -> usize {
        let watermark = self.oldest_watermark;
        let mut merged = 0;
        let mut oldest = watermark;

        for message in batch {
            if watermark.is_some_and(|w| message.timestamp >= w) {
                continue;
            }
            if !self.ids.insert(message.id.clone()) {
                continue;
            }
            oldest = Some(oldest.map_or(message.timestamp, |o| o.min(message.timestamp)));
            self.messages.push(message);
            merged += 1;
        }

        if merged == 0 {
            self.has_more_history = false;
            return 0;
        }

        self.oldest_watermark = oldest;
        self.has_more_history = true;
        self.sort_and_retag();
        merged
    }

    /// Optimistically append a locally composed message.
    pub fn append_local(&mut self, message: ChatMessage) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        self.sort_and_retag();
        true
    }

    /// Drop everything, as on close.
    pub fn clear(&mut self) {
        *self = Self::new(self.zone);
    }

    fn sort_and_retag(&mut self) {
        self.messages.sort_by_key(|m| m.timestamp);
        self.retag();
    }

    fn retag(&mut self) {
        let messages = std::mem::take(&mut self.messages);
        let (tagged, _) = retag(messages, self.zone);
        self.messages = tagged;
    }
}
