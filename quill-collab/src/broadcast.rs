//! Per-topic fan-out with presence membership.
//!
//! Every document topic gets one tokio broadcast channel. Members each hold
//! a receiver that buffers up to `capacity` frames; the sender's own
//! broadcasts are filtered by the receiving connection.
//!
//! ```text
//!   publish(from, bytes) ──► broadcast::Sender<Arc<RoomFrame>>
//!                                 │
//!                 ┌───────────────┼───────────────┐
//!                 ▼               ▼               ▼
//!             member A        member B        member C
//!           (skips own)
//! ```
//!
//! Used by both the in-process hub and the WebSocket relay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::presence::UserPresence;

/// What travels through a topic.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomFrame {
    /// Encoded `BroadcastEvent` published by `from`.
    Broadcast { from: Uuid, payload: Vec<u8> },
    Join(UserPresence),
    Leave(UserPresence),
    /// Every member's connection must drop.
    Kick,
}

/// Statistics for monitoring topic health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_members: usize,
}

/// Lock-free counters for the publish path.
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

/// Fan-out group for a single document topic.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<RoomFrame>>,
    /// Tracked presence records of the topic
    members: RwLock<HashMap<Uuid, UserPresence>>,
    capacity: usize,
    stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    /// `capacity` frames are buffered per receiver before a slow member lags.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            members: RwLock::new(HashMap::new()),
            capacity,
            stats: AtomicBroadcastStats::new(),
        }
    }

    /// Start receiving frames and take the current presence snapshot.
    ///
    /// The receiver is created first so no join after the snapshot is missed.
    pub async fn subscribe(&self) -> (broadcast::Receiver<Arc<RoomFrame>>, Vec<UserPresence>) {
        let rx = self.sender.subscribe();
        let snapshot = self.members().await;
        (rx, snapshot)
    }

    /// Register or refresh a member's presence and announce it.
    pub async fn track(&self, record: UserPresence) {
        self.members.write().await.insert(record.user_id, record.clone());
        self.send(RoomFrame::Join(record));
    }

    /// Remove a member and announce the departure.
    pub async fn untrack(&self, user_id: &Uuid) -> Option<UserPresence> {
        let removed = self.members.write().await.remove(user_id);
        if let Some(record) = &removed {
            self.send(RoomFrame::Leave(record.clone()));
        }
        removed
    }

    /// Publish an encoded event. Returns the number of receivers reached.
    pub fn publish(&self, from: Uuid, payload: Vec<u8>) -> usize {
        self.send(RoomFrame::Broadcast { from, payload })
    }

    /// Tell every connection on the topic to drop.
    pub fn kick(&self) -> usize {
        self.send(RoomFrame::Kick)
    }

    fn send(&self, frame: RoomFrame) -> usize {
        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.sender.send(Arc::new(frame)).unwrap_or(0)
    }

    /// Count frames a lagging receiver skipped.
    pub fn record_dropped(&self, n: u64) {
        self.stats.messages_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn members(&self) -> Vec<UserPresence> {
        self.members.read().await.values().cloned().collect()
    }

    pub async fn has_member(&self, user_id: &Uuid) -> bool {
        self.members.read().await.contains_key(user_id)
    }

    /// Live receivers, tracked or not.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            active_members: self.member_count().await,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Maps document topics to broadcast groups.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<BroadcastGroup>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the group for `topic`.
    pub async fn get_or_create(&self, topic: &str) -> Arc<BroadcastGroup> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(topic) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        // Another task may have created it between the locks.
        if let Some(room) = rooms.get(topic) {
            return room.clone();
        }
        let room = Arc::new(BroadcastGroup::new(self.default_capacity));
        rooms.insert(topic.to_string(), room.clone());
        room
    }

    pub async fn get(&self, topic: &str) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(topic).cloned()
    }

    /// Drop a topic nobody is tracked in or listening to.
    pub async fn remove_if_empty(&self, topic: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(topic) {
            if room.member_count().await == 0 && room.receiver_count() == 0 {
                rooms.remove(topic);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_topics(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
