//! # quill-collab: Real-time collaboration for Quill
//!
//! Keeps every participant's copy of a document convergent while edits
//! flow over a publish/subscribe channel.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────┐  OperationMessage   ┌───────────────┐    ┌──────────┐
//!   │  Alice   │ ──────────────────► │     relay     │ ─► │   Bob    │
//!   │ (Client) │ ◄── Ack / Cursor ── │ (RelayServer  │ ◄─ │ (Client) │
//!   └──────────┘                     │  or MemoryHub)│    └──────────┘
//!        │                           └───────────────┘         │
//!   DocumentSession                                      DocumentSession
//!   (rebase log)                                         (rebase log)
//! ```
//!
//! ## Modules
//!
//! - [`session`]: per-document OT state (log, contexts, rebasing, pruning)
//! - [`client`]: `CollabClient`, optimistic edits, offline queue, driver task
//! - [`presence`]: participants, remote cursors, cursor throttle
//! - [`protocol`]: wire frames (bincode) and channel payloads
//! - [`transport`]: `Transport` trait with in-process and WebSocket backends
//! - [`broadcast`]: topic fan-out shared by the relay and the in-process hub
//! - [`reconnect`]: connection state and exponential backoff
//! - [`server`]: standalone WebSocket relay

pub mod broadcast;
pub mod client;
pub mod error;
pub mod presence;
pub mod protocol;
pub mod reconnect;
pub mod server;
pub mod session;
pub mod transport;

pub use client::{ClientConfig, CollabClient, CollabEvent, OfflineQueue};
pub use error::CollabError;
pub use presence::{CursorPosition, LocalUser, PresenceTracker, Selection, UserPresence};
pub use protocol::{AckMessage, BroadcastEvent, Context, OperationMessage, ProtocolError};
pub use reconnect::{ConnectionState, ReconnectPolicy};
pub use server::{RelayConfig, RelayServer};
pub use session::DocumentSession;
pub use transport::{MemoryHub, Transport, WebSocketTransport};
