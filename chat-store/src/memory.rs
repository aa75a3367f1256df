//! In-process conversation backend.
//!
//! Mirrors the realtime database behaviour the sync engine depends on:
//! timestamp-ordered queries, child-added replay on subscribe, and live
//! added/changed/removed notifications. Faults and latency can be injected
//! for tests.

use crate::backend::{BackendError, ChangeEvent, ChangeStream, ConversationBackend, DeliveryService};
use crate::entry::{ChatMessage, RawEntry};
use crate::room::RoomKey;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

/// Capacity of each room's change channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

struct Room {
    entries: HashMap<String, Value>,
    events: broadcast::Sender<ChangeEvent>,
}

impl Room {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: HashMap::new(),
            events,
        }
    }

    /// Entries in backend order: untimestamped first, then by timestamp, then key.
    fn sorted(&self) -> Vec<RawEntry> {
        let mut entries: Vec<RawEntry> = self
            .entries
            .iter()
            .map(|(key, value)| RawEntry::new(key.clone(), value.clone()))
            .collect();
        entries.sort_by(|a, b| {
            a.timestamp()
                .cmp(&b.timestamp())
                .then_with(|| a.key.cmp(&b.key))
        });
        entries
    }

    fn publish(&self, event: ChangeEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[derive(Default)]
struct Faults {
    queries: VecDeque<BackendError>,
    subscribes: VecDeque<BackendError>,
    deliveries: VecDeque<BackendError>,
    query_delay: Option<Duration>,
}

/// Realtime store kept entirely in memory.
#[derive(Default)]
pub struct MemoryBackend {
    rooms: Mutex<HashMap<RoomKey, Room>>,
    faults: Mutex<Faults>,
    last_queries: AtomicUsize,
    before_queries: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<RoomKey, Room>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write a raw value. Emits `Added` for a new key, `Changed` otherwise.
    pub fn put(&self, room: &RoomKey, key: impl Into<String>, value: Value) {
        let key = key.into();
        let mut rooms = self.rooms();
        let room = rooms.entry(room.clone()).or_insert_with(Room::new);
        let entry = RawEntry::new(key.clone(), value.clone());
        let event = match room.entries.insert(key, value) {
            Some(_) => ChangeEvent::Changed(entry),
            None => ChangeEvent::Added(entry),
        };
        room.publish(event);
    }

    /// Store a message under its id.
    pub fn insert_message(&self, room: &RoomKey, message: &ChatMessage) -> Result<(), serde_json::Error> {
        let value = message.to_value()?;
        self.put(room, message.id.clone(), value);
        Ok(())
    }

    /// Delete an entry. Returns whether it existed.
    pub fn remove(&self, room: &RoomKey, key: &str) -> bool {
        let mut rooms = self.rooms();
        let Some(room) = rooms.get_mut(room) else {
            return false;
        };
        match room.entries.remove(key) {
            Some(value) => {
                room.publish(ChangeEvent::Removed(RawEntry::new(key, value)));
                true
            }
            None => false,
        }
    }

    /// Push an event to subscribers without touching stored entries.
    pub fn emit(&self, room: &RoomKey, event: ChangeEvent) {
        let mut rooms = self.rooms();
        rooms
            .entry(room.clone())
            .or_insert_with(Room::new)
            .publish(event);
    }

    /// Snapshot of a room in backend order.
    pub fn entries(&self, room: &RoomKey) -> Vec<RawEntry> {
        self.rooms()
            .get(room)
            .map(Room::sorted)
            .unwrap_or_default()
    }

    /// Number of live subscriptions on a room.
    pub fn subscriber_count(&self, room: &RoomKey) -> usize {
        self.rooms()
            .get(room)
            .map(|r| r.events.receiver_count())
            .unwrap_or(0)
    }

    /// Fail the next `fetch_last`/`fetch_before` call.
    pub fn fail_next_query(&self, error: BackendError) {
        self.faults().queries.push_back(error);
    }

    /// Fail the next `subscribe` call.
    pub fn fail_next_subscribe(&self, error: BackendError) {
        self.faults().subscribes.push_back(error);
    }

    /// Fail the next `deliver` call.
    pub fn fail_next_delivery(&self, error: BackendError) {
        self.faults().deliveries.push_back(error);
    }

    /// Delay every fetch by `delay`, or remove the delay.
    pub fn set_query_delay(&self, delay: Option<Duration>) {
        self.faults().query_delay = delay;
    }

    /// Number of `fetch_last` calls served so far.
    pub fn last_query_count(&self) -> usize {
        self.last_queries.load(Ordering::SeqCst)
    }

    /// Number of `fetch_before` calls served so far.
    pub fn before_query_count(&self) -> usize {
        self.before_queries.load(Ordering::SeqCst)
    }

    async fn begin_query(&self) -> Result<(), BackendError> {
        let delay = self.faults().query_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.faults().queries.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ConversationBackend for MemoryBackend {
    async fn fetch_last(&self, room: &RoomKey, limit: usize) -> Result<Vec<RawEntry>, BackendError> {
        self.last_queries.fetch_add(1, Ordering::SeqCst);
        self.begin_query().await?;

        let mut entries = self.entries(room);
        let skip = entries.len().saturating_sub(limit);
        let entries = entries.split_off(skip);
        tracing::debug!("fetch_last {} limit {} -> {} entries", room, limit, entries.len());
        Ok(entries)
    }

    async fn fetch_before(
        &self,
        room: &RoomKey,
        before: i64,
        limit: usize,
    ) -> Result<Vec<RawEntry>, BackendError> {
        self.before_queries.fetch_add(1, Ordering::SeqCst);
        self.begin_query().await?;

        let mut entries: Vec<RawEntry> = self
            .entries(room)
            .into_iter()
            .filter(|e| e.timestamp().map(|ts| ts < before).unwrap_or(true))
            .collect();
        let skip = entries.len().saturating_sub(limit);
        let entries = entries.split_off(skip);
        tracing::debug!(
            "fetch_before {} before {} limit {} -> {} entries",
            room,
            before,
            limit,
            entries.len()
        );
        Ok(entries)
    }

    async fn subscribe(
        &self,
        room: &RoomKey,
        start_at: Option<i64>,
    ) -> Result<ChangeStream, BackendError> {
        if let Some(error) = self.faults().subscribes.pop_front() {
            return Err(error);
        }

        // Subscribe before taking the replay snapshot so no write falls between.
        let (receiver, replay) = {
            let mut rooms = self.rooms();
            let room = rooms.entry(room.clone()).or_insert_with(Room::new);
            let receiver = room.events.subscribe();
            let replay: Vec<Result<ChangeEvent, BackendError>> = room
                .sorted()
                .into_iter()
                .filter(|e| match (start_at, e.timestamp()) {
                    (None, _) => true,
                    (Some(start), Some(ts)) => ts >= start,
                    (Some(_), None) => false,
                })
                .map(|e| Ok(ChangeEvent::Added(e)))
                .collect();
            (receiver, replay)
        };
        tracing::debug!("subscribe {} replaying {} entries", room, replay.len());

        let live = futures_util::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((Ok(event), receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Change stream lagged, {} events dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(futures_util::stream::iter(replay).chain(live).boxed())
    }
}

#[async_trait]
impl DeliveryService for MemoryBackend {
    async fn deliver(&self, room: &RoomKey, message: &ChatMessage) -> Result<(), BackendError> {
        if let Some(error) = self.faults().deliveries.pop_front() {
            return Err(error);
        }
        self.insert_message(room, message)
            .map_err(|e| BackendError::InvalidQuery(e.to_string()))
    }
}
