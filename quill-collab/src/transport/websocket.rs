//! WebSocket transport to a [`RelayServer`](crate::server::RelayServer).
//!
//! ```text
//!   connect ws://relay/<topic>
//!   ──► Subscribe { token }
//!   ◄── Subscribed | Rejected { reason }
//!   ◄── PresenceSync [...]
//!   ◄─► Broadcast / Track / PresenceJoin / PresenceLeave / Ping / Pong
//! ```

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use super::{Channel, ChannelCommand, ChannelEvent, ChannelStatus, Transport};
use crate::protocol::{MessageType, ProtocolError, SyncMessage};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Relay endpoint plus credentials.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    endpoint: String,
    token: Option<String>,
}

impl WebSocketTransport {
    /// `endpoint` is the relay base URL, e.g. `ws://127.0.0.1:9090`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), topic)
    }
}

impl Transport for WebSocketTransport {
    fn validate(&self) -> Result<(), ProtocolError> {
        if self.endpoint.trim().is_empty() {
            return Err(ProtocolError::InvalidConfig("relay endpoint is empty".into()));
        }
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(ProtocolError::InvalidConfig(format!(
                "relay endpoint must be a ws:// or wss:// URL, got {:?}",
                self.endpoint
            )));
        }
        if matches!(self.token.as_deref(), Some(t) if t.is_empty()) {
            return Err(ProtocolError::InvalidConfig("access token is empty".into()));
        }
        Ok(())
    }

    async fn open(&self, topic: &str, peer_id: Uuid) -> Result<Channel, ProtocolError> {
        self.validate()?;

        let url = self.topic_url(topic);
        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ProtocolError::ChannelError(e.to_string()))?;

        let subscribe = SyncMessage::subscribe(peer_id, topic, self.token.as_deref())?;
        socket
            .send(Message::Binary(subscribe.encode()?.into()))
            .await
            .map_err(|e| ProtocolError::ChannelError(e.to_string()))?;

        // Wait for the relay's verdict.
        loop {
            match socket.next().await {
                Some(Ok(Message::Binary(data))) => {
                    let msg = SyncMessage::decode(&data)?;
                    match msg.msg_type {
                        MessageType::Subscribed => break,
                        MessageType::Rejected => {
                            return Err(ProtocolError::Unauthorized(msg.reason()?));
                        }
                        other => log::debug!("Ignoring {other:?} before subscription"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Err(ProtocolError::ConnectionClosed),
                Some(Err(e)) => return Err(ProtocolError::ChannelError(e.to_string())),
                _ => {}
            }
        }

        log::info!("Subscribed to {topic} at {}", self.endpoint);
        let (channel, commands, events) = super::Channel::pair(topic);
        tokio::spawn(run_socket(socket, peer_id, topic.to_string(), commands, events));
        Ok(channel)
    }
}

/// Pump frames between the socket and the channel queues.
async fn run_socket(
    socket: Socket,
    peer_id: Uuid,
    topic: String,
    mut commands: mpsc::Receiver<ChannelCommand>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let (mut writer, mut reader) = socket.split();
    let mut awaiting_pong = false;

    let failure = loop {
        tokio::select! {
            command = commands.recv() => {
                let frame = match command {
                    Some(ChannelCommand::Publish(event)) => SyncMessage::broadcast(peer_id, topic.as_str(), &event),
                    Some(ChannelCommand::Track(record)) => SyncMessage::track(peer_id, topic.as_str(), &record),
                    Some(ChannelCommand::Heartbeat) => {
                        if awaiting_pong {
                            break Some(ChannelStatus::TimedOut);
                        }
                        awaiting_pong = true;
                        Ok(SyncMessage::ping(peer_id))
                    }
                    Some(ChannelCommand::Unsubscribe(ack)) => {
                        let _ = writer.send(Message::Close(None)).await;
                        let _ = ack.send(());
                        break None;
                    }
                    None => {
                        let _ = writer.close().await;
                        break None;
                    }
                };

                match frame.and_then(|f| f.encode()) {
                    Ok(bytes) => {
                        if let Err(e) = writer.send(Message::Binary(bytes.into())).await {
                            break Some(ChannelStatus::ChannelError(e.to_string()));
                        }
                    }
                    Err(e) => log::warn!("Dropping outgoing frame on {topic}: {e}"),
                }
            }

            incoming = reader.next() => match incoming {
                Some(Ok(Message::Binary(data))) => match SyncMessage::decode(&data) {
                    Ok(msg) => {
                        if let Some(event) = channel_event(&msg, &mut awaiting_pong) {
                            if events.send(event).is_err() {
                                break None;
                            }
                        }
                    }
                    Err(e) => log::warn!("Failed to decode relay frame on {topic}: {e}"),
                },
                Some(Ok(Message::Close(_))) | None => break Some(ChannelStatus::Closed),
                Some(Err(e)) => break Some(ChannelStatus::ChannelError(e.to_string())),
                _ => {}
            }
        }
    };

    if let Some(status) = failure {
        log::warn!("Channel {topic} lost: {status:?}");
        let _ = events.send(ChannelEvent::Status(status));
    }
}

/// Translate a relay frame; `None` for frames the client does not surface.
fn channel_event(msg: &SyncMessage, awaiting_pong: &mut bool) -> Option<ChannelEvent> {
    let decoded = match msg.msg_type {
        MessageType::Broadcast => msg.event().map(ChannelEvent::Broadcast),
        MessageType::PresenceSync => msg.presence_records().map(ChannelEvent::PresenceSync),
        MessageType::PresenceJoin => msg.presence_records().map(ChannelEvent::PresenceJoin),
        MessageType::PresenceLeave => msg.presence_records().map(ChannelEvent::PresenceLeave),
        MessageType::Rejected => msg
            .reason()
            .map(|reason| ChannelEvent::Status(ChannelStatus::ChannelError(reason))),
        MessageType::Pong => {
            *awaiting_pong = false;
            return None;
        }
        other => {
            log::debug!("Unhandled relay frame: {other:?}");
            return None;
        }
    };
    match decoded {
        Ok(event) => Some(event),
        Err(e) => {
            log::warn!("Malformed {:?} frame: {e}", msg.msg_type);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::LocalUser;

    #[test]
    fn test_validate_endpoint() {
        assert!(WebSocketTransport::new("ws://127.0.0.1:9090").validate().is_ok());
        assert!(WebSocketTransport::new("wss://relay.example.org").validate().is_ok());
        assert!(matches!(
            WebSocketTransport::new("").validate(),
            Err(ProtocolError::InvalidConfig(_))
        ));
        assert!(matches!(
            WebSocketTransport::new("http://relay").validate(),
            Err(ProtocolError::InvalidConfig(_))
        ));
        assert!(matches!(
            WebSocketTransport::new("ws://relay").with_token("").validate(),
            Err(ProtocolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_topic_url() {
        let transport = WebSocketTransport::new("ws://relay:9090/");
        assert_eq!(transport.topic_url("doc-1"), "ws://relay:9090/doc-1");
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config_without_dialing() {
        let err = WebSocketTransport::new("")
            .open("doc", Uuid::new_v4())
            .await
            .err();
        assert!(matches!(err, Some(ProtocolError::InvalidConfig(_))));
    }

    #[test]
    fn test_channel_event_translation() {
        let record = LocalUser::new("Alice").presence(0);
        let mut awaiting_pong = true;

        let join = SyncMessage::presence_join("doc", &[record.clone()]).unwrap();
        assert_eq!(
            channel_event(&join, &mut awaiting_pong),
            Some(ChannelEvent::PresenceJoin(vec![record]))
        );

        let pong = SyncMessage::pong(Uuid::nil());
        assert_eq!(channel_event(&pong, &mut awaiting_pong), None);
        assert!(!awaiting_pong);

        let rejected = SyncMessage::rejected("doc", "room full");
        assert_eq!(
            channel_event(&rejected, &mut awaiting_pong),
            Some(ChannelEvent::Status(ChannelStatus::ChannelError("room full".into())))
        );
    }
}
