//! Collaboration client: one per open document.
//!
//! Provides:
//! - Optimistic local edits, broadcast to peers
//! - Remote edits rebased through the session log and applied
//! - Cursor and presence tracking with a throttled outgoing cursor
//! - Connection lifecycle (connect, heartbeat, reconnect with backoff, disconnect)
//! - Offline queue for edits made while the channel is down
//!
//! ```text
//!   CollabClient (API) ──DriverCommand──► driver task ──► Channel ──► transport
//!         │                                   │  ▲
//!         └──── Arc<Mutex<SessionState>> ─────┘  └── ChannelEvent
//!                                             │
//!                                             ▼
//!                                      CollabEvent (mpsc)
//! ```
//!
//! The driver task owns the channel, the heartbeat interval and the cursor
//! throttle deadline, so stopping it releases every timer at once.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};

use quill_core::Operation;

use crate::error::CollabError;
use crate::presence::{
    now_millis, CursorPosition, CursorThrottle, LocalUser, PresenceTracker, Selection,
    UserPresence, CURSOR_THROTTLE, STALE_CURSOR_AFTER,
};
use crate::protocol::{BroadcastEvent, OperationMessage, ProtocolError};
use crate::reconnect::{Backoff, ConnectionState, ReconnectPolicy};
use crate::session::DocumentSession;
use crate::transport::{Channel, ChannelEvent, Transport};

/// Capacity of the application event queue.
pub const EVENT_BUFFER: usize = 256;

/// Client tuning knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub heartbeat_interval: Duration,
    pub cursor_throttle: Duration,
    /// Remote cursors older than this are dropped.
    pub stale_cursor_after: Duration,
    /// How long `open` may take before the attempt counts as TIMED_OUT.
    pub subscribe_timeout: Duration,
    /// Operations kept while the channel is down.
    pub offline_queue_capacity: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            cursor_throttle: CURSOR_THROTTLE,
            stale_cursor_after: STALE_CURSOR_AFTER,
            subscribe_timeout: Duration::from_secs(10),
            offline_queue_capacity: 10_000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Notifications for the editor UI, sent after the state change completed.
#[derive(Debug, Clone, PartialEq)]
pub enum CollabEvent {
    /// Remote edits changed the document.
    ContentChanged(String),
    /// Remote cursors, ordered by participant id.
    CursorsChanged(Vec<CursorPosition>),
    /// Remote participants, ordered by participant id.
    PresenceChanged(Vec<UserPresence>),
    Error(CollabError),
    ConnectionChanged(bool),
}

/// Operations made while the channel was down, replayed after the next
/// successful subscription.
pub struct OfflineQueue {
    queue: VecDeque<QueuedOperation>,
    max_size: usize,
}

#[derive(Debug, Clone)]
struct QueuedOperation {
    message: OperationMessage,
    queued_at: Instant,
}

impl OfflineQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue an operation. Returns `false` when full.
    pub fn enqueue(&mut self, message: OperationMessage) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(QueuedOperation {
            message,
            queued_at: Instant::now(),
        });
        true
    }

    /// Take every queued operation, oldest first.
    pub fn drain(&mut self) -> Vec<OperationMessage> {
        self.queue.drain(..).map(|q| q.message).collect()
    }

    /// Put operations that could not be sent back in front, keeping order.
    pub fn restore(&mut self, messages: Vec<OperationMessage>) {
        let now = Instant::now();
        for message in messages.into_iter().rev() {
            self.queue.push_front(QueuedOperation {
                message,
                queued_at: now,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.max_size
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// How long the oldest operation has been waiting.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.queue.front().map(|q| q.queued_at.elapsed())
    }
}

/// Document and presence state shared by the API and the driver.
struct SessionState {
    session: DocumentSession,
    tracker: PresenceTracker,
}

#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<SessionState>>,
    connection: Arc<RwLock<ConnectionState>>,
    offline_queue: Arc<Mutex<OfflineQueue>>,
    events: mpsc::Sender<CollabEvent>,
}

impl Shared {
    /// Drops the event when the queue is full.
    async fn emit(&self, event: CollabEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                log::warn!("Event queue full, dropping {event:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => log::trace!("Event receiver dropped"),
        }
    }

    async fn set_connection(&self, state: ConnectionState) {
        *self.connection.write().await = state;
    }

    /// Queue an operation for replay, reporting overflow.
    async fn enqueue(&self, message: OperationMessage) {
        let mut queue = self.offline_queue.lock().await;
        if !queue.enqueue(message) {
            let capacity = queue.capacity();
            drop(queue);
            log::error!("Offline queue full, dropping operation");
            self.emit(CollabEvent::Error(CollabError::OfflineQueueFull { capacity }))
                .await;
        }
    }
}

enum DriverCommand {
    Publish(OperationMessage),
    Cursor(CursorPosition),
    Shutdown(oneshot::Sender<()>),
}

struct DriverHandle {
    commands: mpsc::UnboundedSender<DriverCommand>,
    handle: JoinHandle<()>,
}

/// Real-time collaboration on one document.
pub struct CollabClient<T: Transport> {
    user: LocalUser,
    document_id: String,
    config: ClientConfig,
    transport: Arc<T>,
    shared: Shared,
    event_rx: Option<mpsc::Receiver<CollabEvent>>,
    driver: Option<DriverHandle>,
}

impl<T: Transport> CollabClient<T> {
    /// Client for `document_id` starting from `initial_content`.
    pub fn new(
        transport: T,
        document_id: impl Into<String>,
        user: LocalUser,
        initial_content: impl Into<String>,
        config: ClientConfig,
    ) -> Self {
        let session = DocumentSession::new(document_id, user.id, initial_content);
        Self::with_session(transport, session, user, config)
    }

    /// Client around an existing session, e.g. one restored from a snapshot.
    pub fn with_session(
        transport: T,
        session: DocumentSession,
        user: LocalUser,
        config: ClientConfig,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let tracker = PresenceTracker::with_stale_after(user.id, config.stale_cursor_after);
        let document_id = session.document_id().to_string();
        Self {
            shared: Shared {
                state: Arc::new(Mutex::new(SessionState { session, tracker })),
                connection: Arc::new(RwLock::new(ConnectionState::Disconnected)),
                offline_queue: Arc::new(Mutex::new(OfflineQueue::new(
                    config.offline_queue_capacity,
                ))),
                events: event_tx,
            },
            user,
            document_id,
            config,
            transport: Arc::new(transport),
            event_rx: Some(event_rx),
            driver: None,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<CollabEvent>> {
        self.event_rx.take()
    }

    /// Subscribe to the document channel.
    ///
    /// Returns once the first subscription attempt settled. Configuration
    /// errors are returned (and reported) without starting anything; a
    /// transient failure starts the reconnect loop and returns `Ok`.
    pub async fn connect(&mut self) -> Result<(), CollabError> {
        if let Some(driver) = &self.driver {
            if !driver.handle.is_finished() {
                return Err(CollabError::AlreadyConnected);
            }
        }
        if let Some(stale) = self.driver.take() {
            let _ = stale.handle.await;
        }

        if let Err(e) = self.transport.validate() {
            return Err(self.fail_connect(e).await);
        }

        self.shared.set_connection(ConnectionState::Connecting).await;
        log::info!("Connecting to document {}", self.document_id);

        let initial = match open_channel(
            self.transport.as_ref(),
            &self.document_id,
            &self.user,
            self.config.subscribe_timeout,
        )
        .await
        {
            Ok(channel) => match establish(&self.shared, &channel, &self.user).await {
                Ok(()) => Some(channel),
                Err(e) => {
                    log::warn!("Channel for {} failed while starting: {e}", self.document_id);
                    None
                }
            },
            Err(e) if !e.is_transient() => return Err(self.fail_connect(e).await),
            Err(e) => {
                log::warn!("Subscribing to {} failed: {e}", self.document_id);
                None
            }
        };

        let (commands, command_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            transport: self.transport.clone(),
            topic: self.document_id.clone(),
            user: self.user.clone(),
            heartbeat_interval: self.config.heartbeat_interval,
            subscribe_timeout: self.config.subscribe_timeout,
            shared: self.shared.clone(),
            commands: command_rx,
            throttle: CursorThrottle::new(self.config.cursor_throttle),
            backoff: Backoff::new(self.config.reconnect.clone()),
            synced: false,
        };
        self.driver = Some(DriverHandle {
            commands,
            handle: tokio::spawn(driver.run(initial)),
        });
        Ok(())
    }

    async fn fail_connect(&self, e: ProtocolError) -> CollabError {
        let err = CollabError::from(e);
        log::error!("Cannot connect to {}: {err}", self.document_id);
        self.shared.set_connection(ConnectionState::Disconnected).await;
        self.shared.emit(CollabEvent::Error(err.clone())).await;
        err
    }

    /// Leave the channel and stop every timer. Waits until done.
    pub async fn disconnect(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if driver.commands.send(DriverCommand::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        if let Err(e) = driver.handle.await {
            log::error!("Collaboration driver for {} panicked: {e}", self.document_id);
        }
        log::info!("Disconnected from document {}", self.document_id);
    }

    /// Apply a local edit and broadcast it.
    ///
    /// The edit is applied even while offline; it is then queued and sent
    /// after reconnecting. Fails without changing anything if the operation
    /// does not fit the document (also reported as [`CollabEvent::Error`])
    /// or the offline queue is full.
    pub async fn send_operation(&self, op: Operation) -> Result<(), CollabError> {
        let mut state = self.shared.state.lock().await;

        if !self.shared.connection.read().await.is_connected() {
            let queue = self.shared.offline_queue.lock().await;
            if queue.is_full() {
                return Err(CollabError::OfflineQueueFull {
                    capacity: queue.capacity(),
                });
            }
        }

        let message = match state.session.apply_local(op) {
            Ok(message) => message,
            Err(e) => {
                drop(state);
                log::warn!("Rejected local operation on {}: {e}", self.document_id);
                self.shared.emit(CollabEvent::Error(e.clone())).await;
                return Err(e);
            }
        };
        state.tracker.transform_cursors(&message.operation);

        // Sent while the state lock is held so publish order matches seq order.
        let unsent = match &self.driver {
            Some(driver) => match driver.commands.send(DriverCommand::Publish(message)) {
                Ok(()) => None,
                Err(mpsc::error::SendError(DriverCommand::Publish(message))) => Some(message),
                Err(_) => None,
            },
            None => Some(message),
        };
        if let Some(message) = unsent {
            self.shared.enqueue(message).await;
        }
        Ok(())
    }

    /// Broadcast the local caret, throttled. Dropped while offline.
    pub fn update_cursor(&self, position: usize, selection: Option<Selection>) {
        if let Some(driver) = &self.driver {
            let cursor = self.user.cursor(position, selection, now_millis());
            let _ = driver.commands.send(DriverCommand::Cursor(cursor));
        }
    }

    pub async fn content(&self) -> String {
        self.shared.state.lock().await.session.content().to_string()
    }

    pub async fn revision(&self) -> u64 {
        self.shared.state.lock().await.session.revision()
    }

    /// Local operations not yet acknowledged by every peer.
    pub async fn pending_operations(&self) -> Vec<Operation> {
        self.shared.state.lock().await.session.pending_operations()
    }

    pub async fn cursors(&self) -> Vec<CursorPosition> {
        self.shared.state.lock().await.tracker.cursors()
    }

    pub async fn presence(&self) -> Vec<UserPresence> {
        self.shared.state.lock().await.tracker.peers()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.shared.connection.read().await
    }

    pub async fn offline_queue_len(&self) -> usize {
        self.shared.offline_queue.lock().await.len()
    }

    pub fn user(&self) -> &LocalUser {
        &self.user
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

/// Open the document channel, bounded by `timeout`.
async fn open_channel<T: Transport>(
    transport: &T,
    topic: &str,
    user: &LocalUser,
    timeout: Duration,
) -> Result<Channel, ProtocolError> {
    match tokio::time::timeout(timeout, transport.open(topic, user.id)).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

/// Bring a freshly subscribed channel into service: announce presence,
/// replay queued operations, flip the state to connected.
async fn establish(shared: &Shared, channel: &Channel, user: &LocalUser) -> Result<(), ProtocolError> {
    channel.track(user.presence(now_millis())).await?;

    let queued = shared.offline_queue.lock().await.drain();
    if !queued.is_empty() {
        log::info!("Replaying {} queued operations", queued.len());
    }
    let mut queued = queued.into_iter();
    while let Some(message) = queued.next() {
        if let Err(e) = channel.publish(BroadcastEvent::Operation(message.clone())).await {
            let mut rest = vec![message];
            rest.extend(queued);
            shared.offline_queue.lock().await.restore(rest);
            return Err(e);
        }
    }

    shared.set_connection(ConnectionState::Connected).await;
    shared.emit(CollabEvent::ConnectionChanged(true)).await;
    log::info!("Connected to document {}", channel.topic());
    Ok(())
}

/// Why the driver stopped serving a channel.
enum Exit {
    Shutdown(Option<oneshot::Sender<()>>),
    Lost,
}

struct Driver<T: Transport> {
    transport: Arc<T>,
    topic: String,
    user: LocalUser,
    heartbeat_interval: Duration,
    subscribe_timeout: Duration,
    shared: Shared,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
    throttle: CursorThrottle,
    backoff: Backoff,
    /// A presence snapshot arrived on the current channel.
    synced: bool,
}

impl<T: Transport> Driver<T> {
    async fn run(mut self, initial: Option<Channel>) {
        let mut channel = initial;
        if channel.is_some() {
            self.backoff.reset();
        }

        loop {
            let current = match channel.take() {
                Some(current) => current,
                None => match self.reconnect().await {
                    Ok(Some(current)) => current,
                    Ok(None) => return,
                    Err(ack) => {
                        self.finish(ack).await;
                        return;
                    }
                },
            };

            match self.serve(current).await {
                (Exit::Shutdown(ack), current) => {
                    if let Err(e) = current.unsubscribe().await {
                        log::warn!("Unsubscribe from {} failed: {e}", self.topic);
                    }
                    self.finish(ack).await;
                    return;
                }
                (Exit::Lost, current) => {
                    log::warn!("Lost channel for {}", self.topic);
                    self.throttle.cancel();
                    self.synced = false;
                    // Tear the half-open channel down before trying again.
                    let _ = current.unsubscribe().await;
                    self.shared.emit(CollabEvent::ConnectionChanged(false)).await;
                }
            }
        }
    }

    async fn finish(&mut self, ack: Option<oneshot::Sender<()>>) {
        self.throttle.cancel();
        self.shared.set_connection(ConnectionState::Disconnected).await;
        self.shared.emit(CollabEvent::ConnectionChanged(false)).await;
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    /// Serve one subscribed channel until it fails or shutdown is requested.
    async fn serve(&mut self, mut channel: Channel) -> (Exit, Channel) {
        let start = Instant::now() + self.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(start, self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.throttle.deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(DriverCommand::Publish(message)) => {
                        let event = BroadcastEvent::Operation(message.clone());
                        if channel.publish(event).await.is_err() {
                            self.shared.enqueue(message).await;
                            return (Exit::Lost, channel);
                        }
                        self.prune().await;
                    }
                    Some(DriverCommand::Cursor(cursor)) => {
                        self.throttle.offer(cursor, Instant::now());
                    }
                    Some(DriverCommand::Shutdown(ack)) => return (Exit::Shutdown(Some(ack)), channel),
                    None => return (Exit::Shutdown(None), channel),
                },

                event = channel.recv() => match event {
                    Some(ChannelEvent::Status(status)) if status.is_failure() => {
                        log::warn!("Channel {} reported {status:?}", self.topic);
                        return (Exit::Lost, channel);
                    }
                    Some(event) => {
                        if self.handle_event(event, &channel).await.is_err() {
                            return (Exit::Lost, channel);
                        }
                    }
                    None => return (Exit::Lost, channel),
                },

                _ = heartbeat.tick() => {
                    log::trace!("Heartbeat on {}", self.topic);
                    let refreshed = channel.track(self.user.presence(now_millis())).await;
                    if refreshed.is_err() || channel.heartbeat().await.is_err() {
                        return (Exit::Lost, channel);
                    }
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(cursor) = self.throttle.take_due(Instant::now()) {
                        if channel.publish(BroadcastEvent::Cursor(cursor)).await.is_err() {
                            return (Exit::Lost, channel);
                        }
                    }
                }
            }
        }
    }

    /// Back off and reopen until it works, attempts run out, or shutdown.
    ///
    /// `Ok(None)` when giving up, `Err(ack)` on shutdown.
    async fn reconnect(&mut self) -> Result<Option<Channel>, Option<oneshot::Sender<()>>> {
        loop {
            let Some((attempt, delay)) = self.backoff.next_delay() else {
                let attempts = self.backoff.attempts();
                log::error!("Giving up on {} after {attempts} reconnect attempts", self.topic);
                self.shared.set_connection(ConnectionState::Disconnected).await;
                self.shared
                    .emit(CollabEvent::Error(CollabError::ReconnectExhausted { attempts }))
                    .await;
                return Ok(None);
            };

            self.shared
                .set_connection(ConnectionState::Reconnecting {
                    attempt,
                    next_delay: delay,
                })
                .await;
            log::info!("Reconnecting to {} in {delay:?} (attempt {attempt})", self.topic);

            let wake = Instant::now() + delay;
            loop {
                tokio::select! {
                    _ = sleep_until(wake) => break,
                    command = self.commands.recv() => match command {
                        Some(DriverCommand::Publish(message)) => self.shared.enqueue(message).await,
                        Some(DriverCommand::Cursor(_)) => {}
                        Some(DriverCommand::Shutdown(ack)) => return Err(Some(ack)),
                        None => return Err(None),
                    },
                }
            }

            self.shared.set_connection(ConnectionState::Connecting).await;
            match open_channel(
                self.transport.as_ref(),
                &self.topic,
                &self.user,
                self.subscribe_timeout,
            )
            .await
            {
                Ok(channel) => match establish(&self.shared, &channel, &self.user).await {
                    Ok(()) => {
                        self.backoff.reset();
                        return Ok(Some(channel));
                    }
                    Err(e) => log::warn!("Reconnect attempt {attempt} failed while starting: {e}"),
                },
                Err(e) if !e.is_transient() => {
                    let err = CollabError::from(e);
                    log::error!("Reconnect to {} refused: {err}", self.topic);
                    self.shared.set_connection(ConnectionState::Disconnected).await;
                    self.shared.emit(CollabEvent::Error(err)).await;
                    return Ok(None);
                }
                Err(e) => log::warn!("Reconnect attempt {attempt} failed: {e}"),
            }
        }
    }

    async fn handle_event(&mut self, event: ChannelEvent, channel: &Channel) -> Result<(), ProtocolError> {
        match event {
            ChannelEvent::Broadcast(BroadcastEvent::Operation(message)) => {
                let (content, cursors, ack, rejected) = {
                    let mut state = self.shared.state.lock().await;
                    let outcome = state.session.handle_remote(&message);
                    if outcome.applied.is_empty() {
                        (None, None, None, outcome.rejected)
                    } else {
                        for op in &outcome.applied {
                            state.tracker.transform_cursors(op);
                        }
                        let SessionState { session, tracker } = &mut *state;
                        if self.synced {
                            session.prune(&tracker.peer_ids());
                        }
                        (
                            Some(session.content().to_string()),
                            Some(tracker.cursors()),
                            Some(session.ack_message()),
                            outcome.rejected,
                        )
                    }
                };

                if let Some(content) = content {
                    self.shared.emit(CollabEvent::ContentChanged(content)).await;
                }
                if let Some(cursors) = cursors {
                    self.shared.emit(CollabEvent::CursorsChanged(cursors)).await;
                }
                for e in rejected {
                    self.shared.emit(CollabEvent::Error(e)).await;
                }
                if let Some(ack) = ack {
                    channel.publish(BroadcastEvent::Ack(ack)).await?;
                }
            }

            ChannelEvent::Broadcast(BroadcastEvent::Cursor(cursor)) => {
                let cursors = {
                    let mut state = self.shared.state.lock().await;
                    state
                        .tracker
                        .handle_cursor(cursor, now_millis())
                        .then(|| state.tracker.cursors())
                };
                if let Some(cursors) = cursors {
                    self.shared.emit(CollabEvent::CursorsChanged(cursors)).await;
                }
            }

            ChannelEvent::Broadcast(BroadcastEvent::Ack(ack)) => {
                let mut state = self.shared.state.lock().await;
                state.session.record_ack(ack.user_id, &ack.context);
                drop(state);
                self.prune().await;
            }

            ChannelEvent::PresenceSync(records) => {
                self.synced = true;
                let peers = {
                    let mut state = self.shared.state.lock().await;
                    state.tracker.sync(records);
                    state.tracker.peers()
                };
                self.prune().await;
                self.shared.emit(CollabEvent::PresenceChanged(peers)).await;
            }

            ChannelEvent::PresenceJoin(records) => {
                let peers = {
                    let mut state = self.shared.state.lock().await;
                    state.tracker.join(records);
                    state.tracker.peers()
                };
                self.shared.emit(CollabEvent::PresenceChanged(peers)).await;
            }

            ChannelEvent::PresenceLeave(records) => {
                let (peers, cursors) = {
                    let mut state = self.shared.state.lock().await;
                    let SessionState { session, tracker } = &mut *state;
                    for id in tracker.leave(records) {
                        session.forget_peer(&id);
                    }
                    (tracker.peers(), tracker.cursors())
                };
                self.prune().await;
                self.shared.emit(CollabEvent::PresenceChanged(peers)).await;
                self.shared.emit(CollabEvent::CursorsChanged(cursors)).await;
            }

            ChannelEvent::Status(_) => {}
        }
        Ok(())
    }

    /// Drop history every present peer has integrated.
    ///
    /// Skipped until a presence snapshot tells us who is present.
    async fn prune(&self) {
        if !self.synced {
            return;
        }
        let mut state = self.shared.state.lock().await;
        let SessionState { session, tracker } = &mut *state;
        session.prune(&tracker.peer_ids());
    }
}
