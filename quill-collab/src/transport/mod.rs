//! Realtime channel abstraction.
//!
//! A [`Transport`] opens one [`Channel`] per document topic. The channel is
//! a pair of queues bridged to the backend by a task the transport owns.
//! Commands are bounded; events are not, so a backend task never waits on
//! a client that is itself waiting to publish.
//!
//! ```text
//!   client ── ChannelCommand ──► [ transport task ] ──► relay / hub
//!   client ◄── ChannelEvent ──── [ transport task ] ◄── relay / hub
//! ```
//!
//! Backends:
//! - [`memory::MemoryHub`]: in-process, for tests and embedding
//! - [`websocket::WebSocketTransport`]: talks to a `RelayServer`

pub mod memory;
pub mod websocket;

use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::presence::UserPresence;
use crate::protocol::{BroadcastEvent, ProtocolError};

pub use memory::MemoryHub;
pub use websocket::WebSocketTransport;

/// Queue depth of the command direction.
pub const CHANNEL_BUFFER: usize = 256;

/// How long `unsubscribe` waits for the backend to confirm.
pub const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Channel lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError(String),
    TimedOut,
    Closed,
}

impl ChannelStatus {
    /// Whether the channel is gone and must be reopened.
    pub fn is_failure(&self) -> bool {
        !matches!(self, ChannelStatus::Subscribed)
    }
}

/// Client → backend.
#[derive(Debug)]
pub enum ChannelCommand {
    Publish(BroadcastEvent),
    /// Publish this participant's presence record.
    Track(UserPresence),
    /// Keep-alive; a backend that sees two without a reply reports `TimedOut`.
    Heartbeat,
    /// Leave the topic; the sender fires once the backend let go.
    Unsubscribe(oneshot::Sender<()>),
}

/// Backend → client.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Broadcast(BroadcastEvent),
    /// Full presence state, sent right after subscribing.
    PresenceSync(Vec<UserPresence>),
    PresenceJoin(Vec<UserPresence>),
    PresenceLeave(Vec<UserPresence>),
    Status(ChannelStatus),
}

/// An open, subscribed topic.
pub struct Channel {
    topic: String,
    commands: mpsc::Sender<ChannelCommand>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl Channel {
    /// Assemble a channel from the queues a backend task serves.
    pub fn new(
        topic: impl Into<String>,
        commands: mpsc::Sender<ChannelCommand>,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self {
            topic: topic.into(),
            commands,
            events,
        }
    }

    /// Both ends of a fresh channel: `(client side, backend side)`.
    pub fn pair(
        topic: impl Into<String>,
    ) -> (Self, mpsc::Receiver<ChannelCommand>, mpsc::UnboundedSender<ChannelEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        (Self::new(topic, cmd_tx, evt_rx), cmd_rx, evt_tx)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn publish(&self, event: BroadcastEvent) -> Result<(), ProtocolError> {
        self.send(ChannelCommand::Publish(event)).await
    }

    pub async fn track(&self, record: UserPresence) -> Result<(), ProtocolError> {
        self.send(ChannelCommand::Track(record)).await
    }

    pub async fn heartbeat(&self) -> Result<(), ProtocolError> {
        self.send(ChannelCommand::Heartbeat).await
    }

    /// Next backend event; `None` once the backend task is gone.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Leave the topic and wait (bounded) for the backend to confirm.
    pub async fn unsubscribe(self) -> Result<(), ProtocolError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(ChannelCommand::Unsubscribe(ack_tx)).await?;
        match tokio::time::timeout(UNSUBSCRIBE_TIMEOUT, ack_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Err(_) => Err(ProtocolError::Timeout),
        }
    }

    async fn send(&self, command: ChannelCommand) -> Result<(), ProtocolError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}

/// A realtime backend that can open document channels.
pub trait Transport: Send + Sync + 'static {
    /// Reject configuration that no retry could fix.
    fn validate(&self) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// Subscribe to `topic` as `peer_id`. Resolves once subscribed.
    fn open(
        &self,
        topic: &str,
        peer_id: Uuid,
    ) -> impl Future<Output = Result<Channel, ProtocolError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AckMessage;

    #[tokio::test]
    async fn test_channel_pair_bridges_both_ways() {
        let (mut channel, mut commands, events) = Channel::pair("doc");
        assert_eq!(channel.topic(), "doc");

        let event = BroadcastEvent::Ack(AckMessage {
            user_id: Uuid::new_v4(),
            context: Default::default(),
        });
        channel.publish(event.clone()).await.unwrap();
        match commands.recv().await {
            Some(ChannelCommand::Publish(sent)) => assert_eq!(sent, event),
            other => panic!("unexpected command: {other:?}"),
        }

        events
            .send(ChannelEvent::Status(ChannelStatus::Closed))
            .unwrap();
        assert_eq!(
            channel.recv().await,
            Some(ChannelEvent::Status(ChannelStatus::Closed))
        );
    }

    #[tokio::test]
    async fn test_events_queue_while_client_is_busy() {
        let (mut channel, mut commands, events) = Channel::pair("doc");

        // The client fills its command queue while the backend keeps
        // producing events nobody reads yet.
        for _ in 0..CHANNEL_BUFFER {
            channel.heartbeat().await.unwrap();
        }
        for _ in 0..CHANNEL_BUFFER * 4 {
            events.send(ChannelEvent::PresenceJoin(vec![])).unwrap();
        }

        assert!(matches!(commands.recv().await, Some(ChannelCommand::Heartbeat)));
        for _ in 0..CHANNEL_BUFFER * 4 {
            assert_eq!(channel.recv().await, Some(ChannelEvent::PresenceJoin(vec![])));
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_waits_for_ack() {
        let (channel, mut commands, _events) = Channel::pair("doc");
        let backend = tokio::spawn(async move {
            if let Some(ChannelCommand::Unsubscribe(ack)) = commands.recv().await {
                let _ = ack.send(());
            }
        });
        channel.unsubscribe().await.unwrap();
        backend.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_backend_gone() {
        let (channel, commands, _events) = Channel::pair("doc");
        drop(commands);
        let record = UserPresence {
            user_id: Uuid::new_v4(),
            user_name: "Alice".into(),
            user_color: "#000000".into(),
            user_avatar: None,
            last_active: 0,
            is_active: true,
        };
        assert_eq!(
            channel.track(record).await.unwrap_err(),
            ProtocolError::ConnectionClosed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_times_out() {
        let (channel, _commands, _events) = Channel::pair("doc");
        assert_eq!(
            channel.unsubscribe().await.unwrap_err(),
            ProtocolError::Timeout
        );
    }

    #[test]
    fn test_status_failure() {
        assert!(!ChannelStatus::Subscribed.is_failure());
        assert!(ChannelStatus::TimedOut.is_failure());
        assert!(ChannelStatus::ChannelError("x".into()).is_failure());
    }
}
