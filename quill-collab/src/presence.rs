//! Presence and cursor awareness for collaborators on one document.
//!
//! Tracks who is here and where their caret is (participant profiles,
//! caret offsets and selections) and keeps the cursor map aligned with the
//! text as remote edits land.
//!
//! ## Data flow
//!
//! ```text
//! Local caret move
//!       │
//!       ▼
//! CursorThrottle::offer()        (trailing edge, one per 50ms)
//!       │
//!       ▼   (broadcast)
//! Remote PresenceTracker::handle_cursor()
//!       │  (drops cursors older than 10s)
//!       ▼
//! PresenceTracker::transform_cursors()   on every remote operation
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use uuid::Uuid;

use quill_core::Operation;

/// Default window after which a remote cursor is considered stale.
pub const STALE_CURSOR_AFTER: Duration = Duration::from_secs(10);

/// Default minimum spacing between outgoing cursor broadcasts.
pub const CURSOR_THROTTLE: Duration = Duration::from_millis(50);

/// Wall-clock milliseconds since the Unix epoch.
///
/// Cursor and presence timestamps travel between machines, so they use
/// wall time rather than a monotonic clock.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ───────────────────────────────────────────────────────────────────
// Core types
// ───────────────────────────────────────────────────────────────────

/// Selected char range, `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }
}

/// A participant's caret as last broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub user_id: Uuid,
    pub user_name: String,
    pub user_color: String,
    /// Char offset into the document.
    pub position: usize,
    pub selection: Option<Selection>,
    /// Wall-clock millis when the sender produced this cursor.
    pub timestamp: u64,
}

/// Presence record for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPresence {
    pub user_id: Uuid,
    pub user_name: String,
    pub user_color: String,
    pub user_avatar: Option<String>,
    pub last_active: u64,
    pub is_active: bool,
}

/// RGBA colour for cursor/selection rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl CursorColor {
    /// Stable, vivid colour derived from a participant id.
    pub fn from_uuid(id: Uuid) -> Self {
        let hash = id.as_u128();
        let hue = ((hash % 360) as f32) / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
        Self { r, g, b, a: 1.0 }
    }

    /// `#rrggbb` form used on the wire.
    pub fn to_hex(&self) -> String {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!(
            "#{:02x}{:02x}{:02x}",
            channel(self.r),
            channel(self.g),
            channel(self.b)
        )
    }
}

impl Default for CursorColor {
    fn default() -> Self {
        Self { r: 0.26, g: 0.52, b: 0.96, a: 1.0 }
    }
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// Identity of the local participant.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalUser {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub avatar: Option<String>,
}

impl LocalUser {
    /// New participant with a random id and a colour derived from it.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    /// Create with an explicit id.
    pub fn with_id(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            color: CursorColor::from_uuid(id).to_hex(),
            avatar: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    /// Presence record stamped with `now` (millis).
    pub fn presence(&self, now: u64) -> UserPresence {
        UserPresence {
            user_id: self.id,
            user_name: self.name.clone(),
            user_color: self.color.clone(),
            user_avatar: self.avatar.clone(),
            last_active: now,
            is_active: true,
        }
    }

    pub fn cursor(&self, position: usize, selection: Option<Selection>, now: u64) -> CursorPosition {
        CursorPosition {
            user_id: self.id,
            user_name: self.name.clone(),
            user_color: self.color.clone(),
            position,
            selection,
            timestamp: now,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Presence tracker
// ───────────────────────────────────────────────────────────────────

/// Presence and cursor maps for one document session.
///
/// Entries come from untrusted peer broadcasts and are only rendering
/// hints. Accessors never return the local participant.
pub struct PresenceTracker {
    local_user_id: Uuid,
    presence: HashMap<Uuid, UserPresence>,
    cursors: HashMap<Uuid, CursorPosition>,
    stale_after: Duration,
}

impl PresenceTracker {
    pub fn new(local_user_id: Uuid) -> Self {
        Self::with_stale_after(local_user_id, STALE_CURSOR_AFTER)
    }

    pub fn with_stale_after(local_user_id: Uuid, stale_after: Duration) -> Self {
        Self {
            local_user_id,
            presence: HashMap::new(),
            cursors: HashMap::new(),
            stale_after,
        }
    }

    /// Replace the presence map with the transport's full snapshot.
    pub fn sync(&mut self, records: Vec<UserPresence>) {
        self.presence = records.into_iter().map(|r| (r.user_id, r)).collect();
        log::debug!("Presence sync: {} participants", self.presence.len());
    }

    /// Add or refresh participants.
    pub fn join(&mut self, records: Vec<UserPresence>) {
        for record in records {
            if record.user_id != self.local_user_id {
                log::debug!("Presence: {} ({}) joined", record.user_name, record.user_id);
            }
            self.presence.insert(record.user_id, record);
        }
    }

    /// Remove participants and their cursors. Returns the removed ids.
    pub fn leave(&mut self, records: Vec<UserPresence>) -> Vec<Uuid> {
        let mut removed = Vec::new();
        for record in records {
            self.cursors.remove(&record.user_id);
            if self.presence.remove(&record.user_id).is_some() {
                log::debug!("Presence: {} left", record.user_id);
                removed.push(record.user_id);
            }
        }
        removed
    }

    /// Record a remote cursor, then drop every stale one.
    ///
    /// Returns `false` for the local participant's own echo.
    pub fn handle_cursor(&mut self, cursor: CursorPosition, now: u64) -> bool {
        if cursor.user_id == self.local_user_id {
            return false;
        }
        self.cursors.insert(cursor.user_id, cursor);
        self.prune_stale(now);
        true
    }

    /// Drop cursors whose timestamp is older than the staleness window.
    pub fn prune_stale(&mut self, now: u64) -> Vec<Uuid> {
        let window = self.stale_after.as_millis() as u64;
        let stale: Vec<Uuid> = self
            .cursors
            .iter()
            .filter(|(_, c)| now.saturating_sub(c.timestamp) > window)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            self.cursors.remove(id);
        }
        if !stale.is_empty() {
            log::trace!("Pruned {} stale cursors", stale.len());
        }
        stale
    }

    /// Shift every tracked cursor and selection through an applied operation.
    pub fn transform_cursors(&mut self, op: &Operation) {
        for cursor in self.cursors.values_mut() {
            cursor.position = op.transform_position(cursor.position);
            if let Some(selection) = cursor.selection.as_mut() {
                selection.start = op.transform_position(selection.start);
                selection.end = op.transform_position(selection.end);
            }
        }
    }

    /// Remote cursors, ordered by participant id.
    pub fn cursors(&self) -> Vec<CursorPosition> {
        let mut cursors: Vec<CursorPosition> = self
            .cursors
            .values()
            .filter(|c| c.user_id != self.local_user_id)
            .cloned()
            .collect();
        cursors.sort_by_key(|c| c.user_id);
        cursors
    }

    pub fn cursor(&self, user_id: &Uuid) -> Option<&CursorPosition> {
        self.cursors.get(user_id)
    }

    /// Remote participants, ordered by participant id.
    pub fn peers(&self) -> Vec<UserPresence> {
        let mut peers: Vec<UserPresence> = self
            .presence
            .values()
            .filter(|p| p.user_id != self.local_user_id)
            .cloned()
            .collect();
        peers.sort_by_key(|p| p.user_id);
        peers
    }

    pub fn peer_ids(&self) -> Vec<Uuid> {
        self.presence
            .keys()
            .filter(|id| **id != self.local_user_id)
            .copied()
            .collect()
    }

    pub fn peer(&self, user_id: &Uuid) -> Option<&UserPresence> {
        self.presence.get(user_id).filter(|p| p.user_id != self.local_user_id)
    }

    pub fn peer_count(&self) -> usize {
        self.presence
            .keys()
            .filter(|id| **id != self.local_user_id)
            .count()
    }

    pub fn local_user_id(&self) -> Uuid {
        self.local_user_id
    }
}

// ───────────────────────────────────────────────────────────────────
// Outgoing cursor throttle
// ───────────────────────────────────────────────────────────────────

/// Trailing-edge throttle for outgoing cursor broadcasts.
///
/// The first offer arms a deadline one interval out; later offers only
/// replace the pending cursor. When the deadline passes the latest cursor
/// is released, so at most one cursor leaves per interval.
#[derive(Debug)]
pub struct CursorThrottle {
    interval: Duration,
    pending: Option<CursorPosition>,
    deadline: Option<Instant>,
}

impl CursorThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
            deadline: None,
        }
    }

    /// Stash `cursor` for the next flush, arming the deadline if idle.
    pub fn offer(&mut self, cursor: CursorPosition, now: Instant) {
        self.pending = Some(cursor);
        if self.deadline.is_none() {
            self.deadline = Some(now + self.interval);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Release the pending cursor if its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<CursorPosition> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.pending.take()
            }
            _ => None,
        }
    }

    /// Forget the pending cursor and disarm.
    pub fn cancel(&mut self) {
        self.pending = None;
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }
}

impl Default for CursorThrottle {
    fn default() -> Self {
        Self::new(CURSOR_THROTTLE)
    }
}
