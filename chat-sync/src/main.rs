//! Chat sync demo.
//!
//! Seeds an in-memory room, opens a session on it, pages back through the
//! whole history, sends a message, receives a reply and prints the result.

use anyhow::Context;
use chat_store::{ChatMessage, MemoryBackend, RoomKey};
use chat_sync::dates::{is_duplicate_day, strip_marker};
use chat_sync::{ConversationSyncSession, LoadOlderOutcome, SkipReason, SyncConfig};
use chrono::{Local, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

const LOCAL_USER: &str = "uid-alice";
const REMOTE_USER: &str = "uid-bob";
const SEED_MESSAGES: i64 = 35;
/// Spacing between seeded messages (90 minutes).
const SEED_SPACING_MS: i64 = 90 * 60 * 1000;

const SEED_BODIES: &[&str] = &[
    "Hey!",
    "How's it going?",
    "Pretty good, you?",
    "Busy week.",
    "Lunch tomorrow?",
    "Sure, where?",
    "The usual place.",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_sync=debug".parse()?),
        )
        .init();

    tracing::info!("Starting chat sync demo");
    let config = SyncConfig::load();

    let backend = Arc::new(MemoryBackend::new());
    let room = RoomKey::between(LOCAL_USER, REMOTE_USER);
    seed(&backend, &room)?;

    let (session, mut events) = ConversationSyncSession::open(
        backend.clone(),
        backend.clone(),
        room.clone(),
        config.clone(),
    );
    let event_log = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!("Event: {:?}", event);
        }
    });

    let outcome = session.load_initial().await?;
    tracing::info!("Initial load: {:?}", outcome);
    tokio::time::sleep(config.listener_attach_delay() + Duration::from_millis(100)).await;

    loop {
        tokio::time::sleep(config.load_older_throttle()).await;
        match session.load_older().await? {
            LoadOlderOutcome::Merged(count) => {
                tracing::info!("Paged in {} older messages", count)
            }
            LoadOlderOutcome::Skipped(SkipReason::Throttled | SkipReason::InFlight) => {}
            LoadOlderOutcome::Failed(e) => {
                return Err(e).context("paging back through history");
            }
            LoadOlderOutcome::Exhausted | LoadOlderOutcome::Skipped(_) => break,
        }
    }

    let now = Utc::now().timestamp_millis();
    let outgoing = ChatMessage::text(
        format!("local-{now}"),
        LOCAL_USER,
        REMOTE_USER,
        "On my way",
        now,
    );
    session.append_local(outgoing).await?;

    let reply = ChatMessage::text(
        format!("remote-{}", now + 1),
        REMOTE_USER,
        LOCAL_USER,
        "See you soon",
        now + 1,
    );
    backend.insert_message(&room, &reply)?;
    tokio::time::sleep(config.initial_scroll_debounce()).await;

    let snapshot = session.snapshot();
    if let Some(last) = snapshot.messages.last() {
        session
            .reveal_date(strip_marker(&last.current_date).to_string())
            .await?;
    }

    println!("Room {} ({} messages)", room, snapshot.len());
    for message in snapshot.messages.iter() {
        if !message.current_date.is_empty() && !is_duplicate_day(&message.current_date) {
            println!("--- {} ---", message.current_date);
        }
        let time = Local
            .timestamp_millis_opt(message.timestamp)
            .earliest()
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_default();
        println!("[{}] {}: {}", time, message.sender_id, message.body);
    }

    session.close().await;
    event_log.await?;
    tracing::info!("Chat sync demo finished");
    Ok(())
}

/// Fill the room with alternating messages ending just before now.
fn seed(backend: &MemoryBackend, room: &RoomKey) -> anyhow::Result<()> {
    let newest = Utc::now().timestamp_millis() - SEED_SPACING_MS;
    for i in 0..SEED_MESSAGES {
        let timestamp = newest - (SEED_MESSAGES - 1 - i) * SEED_SPACING_MS;
        let (sender, receiver) = if i % 2 == 0 {
            (REMOTE_USER, LOCAL_USER)
        } else {
            (LOCAL_USER, REMOTE_USER)
        };
        let body = SEED_BODIES[i as usize % SEED_BODIES.len()];
        let message = ChatMessage::text(format!("seed-{i:03}"), sender, receiver, body, timestamp);
        backend
            .insert_message(room, &message)
            .with_context(|| format!("seeding message {i}"))?;
    }
    tracing::info!("Seeded room {} with {} messages", room, SEED_MESSAGES);
    Ok(())
}
