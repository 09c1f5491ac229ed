//! WebSocket relay with topic-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (topic) ── BroadcastGroup ── presence members
//! Client B ──┘          │
//!                ┌──────┼──────┐
//!                ▼      ▼      ▼
//!            Client A  Client B  Client C   (sender skipped)
//! ```
//!
//! The relay holds no document state. Broadcast payloads are forwarded
//! without decoding; ordering and transformation are the clients' job.
//! Each topic keeps the presence records its connections tracked, sends a
//! snapshot to every new subscriber, and announces joins and leaves.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::broadcast::{RoomFrame, RoomManager};
use crate::protocol::{MessageType, SyncMessage};

/// Environment variable overriding the bind address.
pub const ENV_BIND_ADDR: &str = "QUILL_RELAY_ADDR";
/// Environment variable holding the shared access token.
pub const ENV_ACCESS_TOKEN: &str = "QUILL_RELAY_TOKEN";

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum connections per topic
    pub max_peers_per_room: usize,
    /// Broadcast channel capacity per topic
    pub broadcast_capacity: usize,
    /// Token clients must present; `None` admits everyone
    pub access_token: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
            access_token: None,
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by `QUILL_RELAY_ADDR` and `QUILL_RELAY_TOKEN`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup(ENV_BIND_ADDR).filter(|v| !v.trim().is_empty()) {
            config.bind_addr = addr;
        }
        config.access_token = lookup(ENV_ACCESS_TOKEN).filter(|v| !v.is_empty());
        config
    }
}

async fn send_frame(ws_sender: &mut WsSink, msg: &SyncMessage) -> Result<(), BoxError> {
    ws_sender.send(Message::Binary(msg.encode()?.into())).await?;
    Ok(())
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub rejected_subscriptions: u64,
    pub active_rooms: usize,
}

/// The relay server.
#[derive(Clone)]
pub struct RelayServer {
    config: RelayConfig,
    rooms: Arc<RoomManager>,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let rooms = Arc::new(RoomManager::new(config.broadcast_capacity));
        Self {
            config,
            rooms,
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let relay = self.clone();
            tokio::spawn(async move {
                if let Err(e) = relay.handle_connection(stream, addr).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = self.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result = self.serve_peer(ws_stream, addr).await;

        let mut s = self.stats.write().await;
        s.active_connections -= 1;
        s.active_rooms = self.rooms.room_count().await;
        result
    }

    async fn serve_peer(
        &self,
        ws_stream: WebSocketStream<TcpStream>,
        addr: SocketAddr,
    ) -> Result<(), BoxError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // The first meaningful frame must be a subscription.
        let (peer_id, topic, room) = loop {
            let bytes: Vec<u8> = match ws_receiver.next().await {
                Some(Ok(Message::Binary(data))) => data.into(),
                Some(Ok(Message::Ping(data))) => {
                    ws_sender.send(Message::Pong(data)).await?;
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Err(e)) => return Err(e.into()),
                _ => continue,
            };
            self.count_message(bytes.len()).await;

            let msg = match SyncMessage::decode(&bytes) {
                Ok(msg) => msg,
                Err(e) => {
                    log::warn!("Failed to decode message from {addr}: {e}");
                    continue;
                }
            };
            if msg.msg_type != MessageType::Subscribe {
                log::debug!("Ignoring {:?} from unsubscribed {addr}", msg.msg_type);
                continue;
            }

            if let Some(expected) = &self.config.access_token {
                if msg.token()?.as_deref() != Some(expected.as_str()) {
                    return self.reject(&mut ws_sender, &msg.doc_id, "invalid access token").await;
                }
            }

            let room = self.rooms.get_or_create(&msg.doc_id).await;
            if room.receiver_count() >= self.config.max_peers_per_room {
                return self.reject(&mut ws_sender, &msg.doc_id, "room is full").await;
            }
            break (msg.peer_id, msg.doc_id, room);
        };

        let (mut frames, snapshot) = room.subscribe().await;
        send_frame(&mut ws_sender, &SyncMessage::subscribed(topic.as_str())).await?;
        send_frame(
            &mut ws_sender,
            &SyncMessage::presence_sync(topic.as_str(), &snapshot)?,
        )
        .await?;
        {
            let mut s = self.stats.write().await;
            s.active_rooms = self.rooms.room_count().await;
        }
        log::info!("Peer {peer_id} subscribed to {topic} from {addr}");

        let outcome = loop {
            tokio::select! {
                msg = ws_receiver.next() => match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let bytes: Vec<u8> = data.into();
                        self.count_message(bytes.len()).await;
                        match SyncMessage::decode(&bytes) {
                            Ok(sync_msg) => match sync_msg.msg_type {
                                MessageType::Broadcast => {
                                    room.publish(peer_id, sync_msg.payload);
                                }
                                MessageType::Track => match sync_msg.presence() {
                                    Ok(record) if record.user_id == peer_id => room.track(record).await,
                                    Ok(record) => log::warn!(
                                        "Peer {peer_id} tried to track presence for {}", record.user_id
                                    ),
                                    Err(e) => log::warn!("Bad presence from {peer_id}: {e}"),
                                },
                                MessageType::Ping => {
                                    let pong = SyncMessage::pong(peer_id);
                                    if let Err(e) = send_frame(&mut ws_sender, &pong).await {
                                        break Err(e);
                                    }
                                }
                                other => log::debug!("Unhandled message type: {other:?}"),
                            },
                            Err(e) => log::warn!("Failed to decode message from {addr}: {e}"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                            break Err(e.into());
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Connection closed from {addr}");
                        break Ok(());
                    }
                    Some(Err(e)) => {
                        log::error!("WebSocket error from {addr}: {e}");
                        break Ok(());
                    }
                    _ => {}
                },

                frame = frames.recv() => {
                    let outgoing = match frame {
                        Ok(frame) => match &*frame {
                            RoomFrame::Broadcast { from, .. } if *from == peer_id => continue,
                            RoomFrame::Broadcast { from, payload } => {
                                Ok(SyncMessage::broadcast_raw(*from, topic.as_str(), payload.clone()))
                            }
                            RoomFrame::Join(record) => {
                                SyncMessage::presence_join(topic.as_str(), std::slice::from_ref(record))
                            }
                            RoomFrame::Leave(record) => {
                                SyncMessage::presence_leave(topic.as_str(), std::slice::from_ref(record))
                            }
                            RoomFrame::Kick => {
                                let _ = ws_sender.send(Message::Close(None)).await;
                                break Ok(());
                            }
                        },
                        // Skipped frames may hold operations; make the client resync.
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Peer {peer_id} lagged by {n} frames, closing");
                            room.record_dropped(n);
                            let notice = SyncMessage::rejected(topic.as_str(), "lagged");
                            let _ = send_frame(&mut ws_sender, &notice).await;
                            let _ = ws_sender.send(Message::Close(None)).await;
                            break Ok(());
                        }
                        Err(broadcast::error::RecvError::Closed) => break Ok(()),
                    };
                    match outgoing {
                        Ok(msg) => {
                            if let Err(e) = send_frame(&mut ws_sender, &msg).await {
                                break Err(e);
                            }
                        }
                        Err(e) => log::warn!("Dropping frame for {peer_id}: {e}"),
                    }
                }
            }
        };

        room.untrack(&peer_id).await;
        drop(frames);
        if self.rooms.remove_if_empty(&topic).await {
            log::info!("Room {topic} removed (empty)");
        }
        outcome
    }

    async fn reject(
        &self,
        ws_sender: &mut WsSink,
        topic: &str,
        reason: &str,
    ) -> Result<(), BoxError> {
        log::warn!("Rejecting subscription to {topic}: {reason}");
        self.stats.write().await.rejected_subscriptions += 1;
        send_frame(ws_sender, &SyncMessage::rejected(topic, reason)).await?;
        ws_sender.send(Message::Close(None)).await?;
        Ok(())
    }

    async fn count_message(&self, len: usize) {
        let mut s = self.stats.write().await;
        s.total_messages += 1;
        s.total_bytes += len as u64;
    }

    /// Drop every connection on `topic`. Returns how many were reached.
    pub async fn kick(&self, topic: &str) -> usize {
        match self.rooms.get(topic).await {
            Some(room) => room.kick(),
            None => 0,
        }
    }

    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn room_manager(&self) -> &Arc<RoomManager> {
        &self.rooms
    }
}
