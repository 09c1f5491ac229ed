//! In-process realtime hub.
//!
//! Channels on the same hub see each other's broadcasts and presence just
//! like clients of a relay would. Faults can be injected: [`MemoryHub::set_online`]
//! makes new subscriptions fail, and [`MemoryHub::kick`] drops every
//! connection on a topic with a channel error.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::{Channel, ChannelCommand, ChannelEvent, ChannelStatus, Transport};
use crate::broadcast::{BroadcastGroup, RoomFrame, RoomManager};
use crate::protocol::{BroadcastEvent, ProtocolError};

struct HubInner {
    rooms: RoomManager,
    online: AtomicBool,
    subscribe_attempts: AtomicU64,
}

/// Cloneable handle to a shared in-process hub.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// `capacity` frames are buffered per connection.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                rooms: RoomManager::new(capacity),
                online: AtomicBool::new(true),
                subscribe_attempts: AtomicU64::new(0),
            }),
        }
    }

    /// While offline, every `open` fails with a channel error.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
        log::debug!("Memory hub {}", if online { "online" } else { "offline" });
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Drop every connection on `topic`. Returns how many were reached.
    pub async fn kick(&self, topic: &str) -> usize {
        match self.inner.rooms.get(topic).await {
            Some(room) => room.kick(),
            None => 0,
        }
    }

    /// Number of `open` calls so far, failed ones included.
    pub fn subscribe_attempts(&self) -> u64 {
        self.inner.subscribe_attempts.load(Ordering::SeqCst)
    }

    /// Participants currently tracked on `topic`.
    pub async fn member_count(&self, topic: &str) -> usize {
        match self.inner.rooms.get(topic).await {
            Some(room) => room.member_count().await,
            None => 0,
        }
    }

    /// Live connections on `topic`.
    pub async fn connection_count(&self, topic: &str) -> usize {
        match self.inner.rooms.get(topic).await {
            Some(room) => room.receiver_count(),
            None => 0,
        }
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryHub {
    async fn open(&self, topic: &str, peer_id: Uuid) -> Result<Channel, ProtocolError> {
        self.inner.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.is_online() {
            return Err(ProtocolError::ChannelError("hub offline".into()));
        }

        let room = self.inner.rooms.get_or_create(topic).await;
        let (frames, snapshot) = room.subscribe().await;
        let (channel, commands, events) = Channel::pair(topic);

        let _ = events.send(ChannelEvent::PresenceSync(snapshot));

        tokio::spawn(serve_connection(room, peer_id, commands, events, frames));
        log::debug!("Peer {peer_id} subscribed to {topic}");
        Ok(channel)
    }
}

/// Bridge one channel to its topic until either side goes away.
async fn serve_connection(
    room: Arc<BroadcastGroup>,
    peer_id: Uuid,
    mut commands: mpsc::Receiver<ChannelCommand>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    mut frames: broadcast::Receiver<Arc<RoomFrame>>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ChannelCommand::Publish(event)) => match event.encode() {
                    Ok(payload) => {
                        room.publish(peer_id, payload);
                    }
                    Err(e) => log::warn!("Dropping unencodable event from {peer_id}: {e}"),
                },
                Some(ChannelCommand::Track(record)) => room.track(record).await,
                // In-process delivery cannot go silent.
                Some(ChannelCommand::Heartbeat) => {}
                Some(ChannelCommand::Unsubscribe(ack)) => {
                    room.untrack(&peer_id).await;
                    let _ = ack.send(());
                    return;
                }
                None => break,
            },

            frame = frames.recv() => {
                let event = match frame {
                    Ok(frame) => match &*frame {
                        RoomFrame::Broadcast { from, .. } if *from == peer_id => continue,
                        RoomFrame::Broadcast { payload, .. } => match BroadcastEvent::decode(payload) {
                            Ok(event) => ChannelEvent::Broadcast(event),
                            Err(e) => {
                                log::warn!("Dropping undecodable frame for {peer_id}: {e}");
                                continue;
                            }
                        },
                        RoomFrame::Join(record) => ChannelEvent::PresenceJoin(vec![record.clone()]),
                        RoomFrame::Leave(record) => ChannelEvent::PresenceLeave(vec![record.clone()]),
                        RoomFrame::Kick => {
                            let _ = events
                                .send(ChannelEvent::Status(ChannelStatus::ChannelError("kicked".into())));
                            break;
                        }
                    },
                    // Skipped frames may hold operations; the client has to resync.
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Peer {peer_id} lagged by {n} frames, dropping its channel");
                        room.record_dropped(n);
                        let _ = events
                            .send(ChannelEvent::Status(ChannelStatus::ChannelError("lagged".into())));
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = events.send(ChannelEvent::Status(ChannelStatus::Closed));
                        break;
                    }
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        }
    }

    room.untrack(&peer_id).await;
    log::debug!("Peer {peer_id} connection closed");
}
