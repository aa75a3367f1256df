//! Conversation sync session.
//!
//! One session exists per open room. All state lives in a single actor task;
//! backend fetches run as child tasks whose results are handled back on the
//! actor, and live changes arrive through the listener stream it polls.
//! Nothing outside the actor ever mutates the render list.
//!
//! ```text
//!   UI ──commands──▶ ┌───────────────┐ ──watch──▶ RenderSnapshot
//!                    │ SessionActor  │ ──events─▶ SyncEvent
//!   fetch tasks ───▶ │  RenderList   │
//!   listener ──────▶ │  timers       │
//!                    └───────────────┘
//! ```

use crate::config::SyncConfig;
use crate::constants::channels::COMMAND_CHANNEL_CAPACITY;
use crate::dates::DayZone;
use crate::error::SyncError;
use crate::render_list::{LiveInsert, RenderList, RenderSnapshot};
use crate::sync::{fetch_older, listener_stream, load_initial, InitialBatch, ListenerEvent, ListenerStream};
use chat_store::{BackendError, ChatMessage, ConversationBackend, DeliveryService, RoomKey};
use futures_util::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, Sleep};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    LoadingInitial,
    Ready,
    LoadingOlder,
    Closed,
}

/// Result of a `load_initial` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialOutcome {
    /// Number of messages materialized.
    Loaded(usize),
    AlreadyLoaded,
    /// The load finished without data. The session is still usable.
    Failed(BackendError),
}

/// Why a `load_older` request did not query the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Initial load has not completed.
    NotReady,
    InFlight,
    Throttled,
    /// Nothing loaded yet to paginate from.
    NoWatermark,
    HistoryExhausted,
}

/// Result of a `load_older` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOlderOutcome {
    /// Number of older messages merged.
    Merged(usize),
    /// No older messages exist; the start of the conversation was reached.
    Exhausted,
    Failed(BackendError),
    Skipped(SkipReason),
}

/// What changed in the render list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListChange {
    Initial { count: usize },
    Inserted { id: String },
    Updated { id: String },
    Removed { id: String },
    Prepended { count: usize },
    LocalAppended { id: String },
    Cleared,
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    StateChanged(SessionState),
    ListChanged { change: ListChange, len: usize },
    /// Perform the one-time scroll to the newest message.
    ScrollToBottom,
    HistoryExhausted,
    /// User-visible failure, shown as a transient notification.
    Notice(String),
    DateMarkerShown(String),
    DateMarkerHidden,
    ListenerAttached,
    ListenerDetached,
}

enum Command {
    LoadInitial(oneshot::Sender<InitialOutcome>),
    LoadOlder(oneshot::Sender<LoadOlderOutcome>),
    AppendLocal(ChatMessage, oneshot::Sender<bool>),
    RevealDate(String),
    Close(oneshot::Sender<()>),
}

enum FetchResult {
    Initial(Result<InitialBatch, BackendError>),
    Older(Result<Vec<ChatMessage>, BackendError>),
}

struct Delivered {
    id: String,
    result: Result<(), BackendError>,
}

/// Handle to an open conversation. Cheap to clone; the session closes when
/// `close` is called or the last handle is dropped.
#[derive(Clone)]
pub struct ConversationSyncSession {
    room: RoomKey,
    commands: mpsc::Sender<Command>,
    list: watch::Receiver<RenderSnapshot>,
    state: watch::Receiver<SessionState>,
}

impl ConversationSyncSession {
    /// Open a room and start its initial load.
    ///
    /// Must be called from within a tokio runtime. Returns the handle and
    /// the receiver of UI events.
    pub fn open(
        backend: Arc<dyn ConversationBackend>,
        delivery: Arc<dyn DeliveryService>,
        room: RoomKey,
        config: SyncConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        Self::open_with_zone(backend, delivery, room, config, DayZone::Local)
    }

    /// Like [`open`](Self::open), cutting day markers in the given zone.
    pub fn open_with_zone(
        backend: Arc<dyn ConversationBackend>,
        delivery: Arc<dyn DeliveryService>,
        room: RoomKey,
        config: SyncConfig,
        zone: DayZone,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (list_tx, list_rx) = watch::channel(RenderSnapshot::default());
        let (state_tx, state_rx) = watch::channel(SessionState::Unopened);
        let (delivered_tx, delivered_rx) = mpsc::unbounded_channel();

        tracing::info!("Opening conversation session for room {}", room);
        let actor = SessionActor {
            backend,
            delivery,
            room: room.clone(),
            config,
            list: RenderList::new(zone),
            state: SessionState::Unopened,
            initial_loaded: false,
            initial_waiters: Vec::new(),
            pending_older: None,
            last_older_request: None,
            listener: None,
            listener_attached: false,
            initial_scroll_done: false,
            attach_timer: None,
            scroll_timer: None,
            date_timer: None,
            fetches: JoinSet::new(),
            delivered_tx,
            events: event_tx,
            list_tx,
            state_tx,
        };
        tokio::spawn(actor.run(command_rx, delivered_rx));

        let handle = Self {
            room,
            commands: command_tx,
            list: list_rx,
            state: state_rx,
        };
        (handle, event_rx)
    }

    pub fn room(&self) -> &RoomKey {
        &self.room
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Current contents of the render list.
    pub fn snapshot(&self) -> RenderSnapshot {
        self.list.borrow().clone()
    }

    /// Observe the render list. The value only changes on real mutations.
    pub fn subscribe_list(&self) -> watch::Receiver<RenderSnapshot> {
        self.list.clone()
    }

    /// Run the initial load, or wait for the one in progress.
    /// A no-op once a load has succeeded; after a failure it retries.
    pub async fn load_initial(&self) -> Result<InitialOutcome, SyncError> {
        self.request(Command::LoadInitial).await
    }

    /// Fetch the next page of older history.
    pub async fn load_older(&self) -> Result<LoadOlderOutcome, SyncError> {
        self.request(Command::LoadOlder).await
    }

    /// Append a locally composed message and hand it to the delivery
    /// service. Returns `false` if a message with that id is already shown.
    pub async fn append_local(&self, message: ChatMessage) -> Result<bool, SyncError> {
        self.request(|reply| Command::AppendLocal(message, reply))
            .await
    }

    /// Show the floating date marker; it hides itself after a delay.
    pub async fn reveal_date(&self, day: impl Into<String>) -> Result<(), SyncError> {
        self.commands
            .send(Command::RevealDate(day.into()))
            .await
            .map_err(|_| SyncError::Closed)
    }

    /// Detach the listener, cancel timers and discard state. Idempotent.
    pub async fn close(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Close(reply)).await.is_ok() {
            let _ = done.await;
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SyncError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| SyncError::Closed)?;
        response.await.map_err(|_| SyncError::Closed)
    }
}

struct SessionActor {
    backend: Arc<dyn ConversationBackend>,
    delivery: Arc<dyn DeliveryService>,
    room: RoomKey,
    config: SyncConfig,
    list: RenderList,
    state: SessionState,
    initial_loaded: bool,
    initial_waiters: Vec<oneshot::Sender<InitialOutcome>>,
    pending_older: Option<oneshot::Sender<LoadOlderOutcome>>,
    last_older_request: Option<Instant>,
    listener: Option<ListenerStream>,
    /// Set on first attach and never cleared, so the room is subscribed at most once.
    listener_attached: bool,
    initial_scroll_done: bool,
    attach_timer: Option<Pin<Box<Sleep>>>,
    scroll_timer: Option<Pin<Box<Sleep>>>,
    date_timer: Option<Pin<Box<Sleep>>>,
    fetches: JoinSet<FetchResult>,
    delivered_tx: mpsc::UnboundedSender<Delivered>,
    events: mpsc::UnboundedSender<SyncEvent>,
    list_tx: watch::Sender<RenderSnapshot>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut delivered: mpsc::UnboundedReceiver<Delivered>,
    ) {
        self.start_initial_load();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Close(reply)) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        tracing::debug!("All handles dropped for room {}", self.room);
                        self.shutdown();
                        break;
                    }
                },
                Some(joined) = self.fetches.join_next(), if !self.fetches.is_empty() => match joined {
                    Ok(result) => self.handle_fetch(result),
                    Err(e) => tracing::error!("Fetch task for room {} failed: {}", self.room, e),
                },
                Some(done) = delivered.recv() => self.handle_delivered(done),
                event = next_listener_event(&mut self.listener) => match event {
                    Some(event) => self.handle_listener_event(event),
                    None => self.listener = None,
                },
                _ = fire(&mut self.attach_timer) => {
                    self.attach_timer = None;
                    self.attach_listener();
                }
                _ = fire(&mut self.scroll_timer) => {
                    self.scroll_timer = None;
                    self.initial_scroll_done = true;
                    tracing::debug!("Initial scroll to bottom for room {}", self.room);
                    self.emit(SyncEvent::ScrollToBottom);
                }
                _ = fire(&mut self.date_timer) => {
                    self.date_timer = None;
                    self.emit(SyncEvent::DateMarkerHidden);
                }
            }
        }

        tracing::info!("Conversation session for room {} closed", self.room);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::LoadInitial(reply) => {
                // Locally appended messages do not count as loaded.
                if self.initial_loaded {
                    let _ = reply.send(InitialOutcome::AlreadyLoaded);
                    return;
                }
                self.initial_waiters.push(reply);
                if self.state != SessionState::LoadingInitial {
                    tracing::info!("Retrying initial load for room {}", self.room);
                    self.start_initial_load();
                }
            }
            Command::LoadOlder(reply) => match self.begin_load_older() {
                Ok(()) => self.pending_older = Some(reply),
                Err(reason) => {
                    tracing::debug!("load_older skipped for room {}: {:?}", self.room, reason);
                    let _ = reply.send(LoadOlderOutcome::Skipped(reason));
                }
            },
            Command::AppendLocal(message, reply) => {
                let _ = reply.send(self.append_local(message));
            }
            Command::RevealDate(day) => {
                self.date_timer = Some(Box::pin(tokio::time::sleep(self.config.date_marker_hide())));
                self.emit(SyncEvent::DateMarkerShown(day));
            }
            // Handled by the run loop.
            Command::Close(_) => {}
        }
    }

    fn start_initial_load(&mut self) {
        self.set_state(SessionState::LoadingInitial);
        let backend = self.backend.clone();
        let room = self.room.clone();
        let config = self.config.clone();
        self.fetches.spawn(async move {
            FetchResult::Initial(load_initial(backend.as_ref(), &room, &config).await)
        });
    }

    fn begin_load_older(&mut self) -> Result<(), SkipReason> {
        match self.state {
            SessionState::LoadingOlder => return Err(SkipReason::InFlight),
            SessionState::Ready => {}
            _ => return Err(SkipReason::NotReady),
        }
        if let Some(last) = self.last_older_request {
            if last.elapsed() < self.config.load_older_throttle() {
                return Err(SkipReason::Throttled);
            }
        }
        let Some(watermark) = self.list.oldest_watermark() else {
            return Err(SkipReason::NoWatermark);
        };
        if !self.list.has_more_history() {
            return Err(SkipReason::HistoryExhausted);
        }

        self.last_older_request = Some(Instant::now());
        self.set_state(SessionState::LoadingOlder);
        tracing::info!("Loading messages older than {} for room {}", watermark, self.room);

        let backend = self.backend.clone();
        let room = self.room.clone();
        let config = self.config.clone();
        self.fetches.spawn(async move {
            FetchResult::Older(fetch_older(backend.as_ref(), &room, watermark, &config).await)
        });
        Ok(())
    }

    fn handle_fetch(&mut self, result: FetchResult) {
        match result {
            FetchResult::Initial(result) => self.finish_initial_load(result),
            FetchResult::Older(result) => self.finish_load_older(result),
        }
    }

    fn finish_initial_load(&mut self, result: Result<InitialBatch, BackendError>) {
        let outcome = match result {
            Ok(batch) => {
                self.initial_loaded = true;
                let count = self.list.publish_initial(batch.messages);
                self.publish(ListChange::Initial { count });
                if !self.list.is_empty() {
                    self.arm_initial_scroll();
                }
                InitialOutcome::Loaded(count)
            }
            Err(e) => {
                self.report(&e, "Loading messages");
                InitialOutcome::Failed(e)
            }
        };

        self.set_state(SessionState::Ready);
        for waiter in self.initial_waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }

        // Attaching without a loaded window would replay the whole room.
        if self.initial_loaded && !self.listener_attached && self.attach_timer.is_none() {
            let delay = self.config.listener_attach_delay();
            if delay.is_zero() {
                self.attach_listener();
            } else {
                self.attach_timer = Some(Box::pin(tokio::time::sleep(delay)));
            }
        }
    }

    fn finish_load_older(&mut self, result: Result<Vec<ChatMessage>, BackendError>) {
        self.set_state(SessionState::Ready);

        let outcome = match result {
            Ok(page) => {
                let count = self.list.merge_older(page);
                if count > 0 {
                    self.publish(ListChange::Prepended { count });
                    LoadOlderOutcome::Merged(count)
                } else {
                    tracing::info!("Reached the start of room {}", self.room);
                    self.list_tx.send_replace(self.list.snapshot());
                    self.emit(SyncEvent::HistoryExhausted);
                    LoadOlderOutcome::Exhausted
                }
            }
            Err(e) => {
                self.report(&e, "Loading older messages");
                LoadOlderOutcome::Failed(e)
            }
        };

        if let Some(reply) = self.pending_older.take() {
            let _ = reply.send(outcome);
        }
    }

    fn attach_listener(&mut self) {
        if self.listener_attached {
            return;
        }
        self.listener_attached = true;
        let start_at = self.list.oldest_watermark();
        self.listener = Some(listener_stream(
            self.backend.clone(),
            self.room.clone(),
            start_at,
        ));
    }

    fn handle_listener_event(&mut self, event: ListenerEvent) {
        match event {
            ListenerEvent::Attached => self.emit(SyncEvent::ListenerAttached),
            ListenerEvent::Inserted(message) => {
                let id = message.id.clone();
                match self.list.insert_live(message) {
                    LiveInsert::Inserted => {
                        tracing::debug!("Live insert {} in room {}", id, self.room);
                        self.publish(ListChange::Inserted { id });
                        if !self.initial_scroll_done {
                            self.arm_initial_scroll();
                        }
                    }
                    LiveInsert::SuppressedInitial => {
                        tracing::debug!("Ignoring replay of initially loaded {}", id);
                    }
                    LiveInsert::AlreadyPresent => {
                        tracing::debug!("Ignoring duplicate insert {}", id);
                    }
                }
            }
            ListenerEvent::Changed(message) => {
                let id = message.id.clone();
                if self.list.apply_update(message, self.config.resort_on_update) {
                    tracing::debug!("Updated {} in room {}", id, self.room);
                    self.publish(ListChange::Updated { id });
                }
            }
            ListenerEvent::Removed(id) => {
                if self.list.remove(&id) {
                    tracing::debug!("Removed {} from room {}", id, self.room);
                    self.publish(ListChange::Removed { id });
                }
            }
            ListenerEvent::Failed(e) => {
                self.report(&e, "Live updates");
                self.listener = None;
                self.emit(SyncEvent::ListenerDetached);
            }
            ListenerEvent::Ended => {
                self.listener = None;
                self.emit(SyncEvent::ListenerDetached);
            }
        }
    }

    fn append_local(&mut self, message: ChatMessage) -> bool {
        if !self.list.append_local(message.clone()) {
            tracing::debug!("Local message {} already present", message.id);
            return false;
        }
        let id = message.id.clone();
        self.publish(ListChange::LocalAppended { id: id.clone() });

        let delivery = self.delivery.clone();
        let room = self.room.clone();
        let delivered = self.delivered_tx.clone();
        // Not tied to the session: closing the screen must not drop an outgoing message.
        tokio::spawn(async move {
            let result = delivery.deliver(&room, &message).await;
            let _ = delivered.send(Delivered { id, result });
        });
        true
    }

    fn handle_delivered(&mut self, done: Delivered) {
        match done.result {
            Ok(()) => tracing::debug!("Delivered {} to room {}", done.id, self.room),
            Err(e) => self.report(&e, "Sending message"),
        }
    }

    /// (Re)start the quiet period before the one-time scroll to bottom.
    fn arm_initial_scroll(&mut self) {
        if self.initial_scroll_done {
            return;
        }
        self.scroll_timer = Some(Box::pin(tokio::time::sleep(
            self.config.initial_scroll_debounce(),
        )));
    }

    fn shutdown(&mut self) {
        if self.listener.take().is_some() {
            self.emit(SyncEvent::ListenerDetached);
        }
        self.attach_timer = None;
        self.scroll_timer = None;
        self.date_timer = None;
        self.fetches.abort_all();
        // Dropping the reply senders resolves waiting callers with `SyncError::Closed`.
        self.pending_older = None;
        self.initial_waiters.clear();

        self.list.clear();
        self.publish(ListChange::Cleared);
        self.set_state(SessionState::Closed);
    }

    fn report(&self, error: &BackendError, context: &str) {
        let error = SyncError::from(error.clone());
        if error.is_user_visible() {
            tracing::error!("{} failed for room {}: {}", context, self.room, error);
            self.emit(SyncEvent::Notice(format!("{context} failed: {error}")));
        } else {
            tracing::warn!("{} failed for room {}: {}", context, self.room, error);
        }
    }

    fn publish(&self, change: ListChange) {
        self.list_tx.send_replace(self.list.snapshot());
        self.emit(SyncEvent::ListChanged {
            change,
            len: self.list.len(),
        });
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.state_tx.send_replace(state);
        self.emit(SyncEvent::StateChanged(state));
    }

    fn emit(&self, event: SyncEvent) {
        // The UI may have stopped listening; that is not an error.
        let _ = self.events.send(event);
    }
}

async fn next_listener_event(listener: &mut Option<ListenerStream>) -> Option<ListenerEvent> {
    match listener {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
