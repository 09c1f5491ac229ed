//! Wire protocol for document collaboration.
//!
//! Two layers travel over a channel:
//!
//! - [`BroadcastEvent`]: what collaborators say to each other
//!   (operations, cursors, acknowledgements).
//! - [`SyncMessage`]: the relay frame that carries a broadcast event or a
//!   presence update between a client and the relay.
//!
//! Frame layout (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┐
//! │ msg_type │ peer_id   │ doc_id   │ payload  │
//! │ 1 byte   │ 16 bytes  │ varint+n │ variable │
//! └──────────┴───────────┴──────────┴──────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use quill_core::Operation;

use crate::presence::{CursorPosition, UserPresence};

/// Number of operations integrated per author.
///
/// Attached to outgoing operations and acks so receivers know which part of
/// their history the sender had already seen.
pub type Context = BTreeMap<Uuid, u64>;

/// An edit broadcast by its author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMessage {
    pub operation: Operation,
    pub user_id: Uuid,
    /// Author's session revision after applying the operation.
    pub revision: u64,
    /// Author-local sequence number, starting at 1.
    pub seq: u64,
    /// What the author had integrated when the operation was made.
    pub context: Context,
}

/// "I have integrated everything up to `context`."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckMessage {
    pub user_id: Uuid,
    pub context: Context,
}

/// Events exchanged between collaborators on a document topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BroadcastEvent {
    Operation(OperationMessage),
    Cursor(CursorPosition),
    Ack(AckMessage),
}

impl BroadcastEvent {
    /// Participant that produced the event.
    pub fn user_id(&self) -> Uuid {
        match self {
            BroadcastEvent::Operation(m) => m.user_id,
            BroadcastEvent::Cursor(c) => c.user_id,
            BroadcastEvent::Ack(a) => a.user_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (event, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(event)
    }
}

/// Relay frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Client asks to join a document topic (payload: access token)
    Subscribe = 1,
    /// Relay confirms the subscription
    Subscribed = 2,
    /// Relay refuses the subscription (payload: reason)
    Rejected = 3,
    /// Broadcast event, client → relay → other clients
    Broadcast = 4,
    /// Client publishes its presence record
    Track = 5,
    /// Full presence snapshot
    PresenceSync = 6,
    /// Participants added
    PresenceJoin = 7,
    /// Participants removed
    PresenceLeave = 8,
    /// Heartbeat ping
    Ping = 9,
    /// Heartbeat pong
    Pong = 10,
}

/// Top-level relay frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    pub peer_id: Uuid,
    pub doc_id: String,
    /// Message payload (varies by msg_type)
    pub payload: Vec<u8>,
}

fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn decode_payload<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(value)
}

impl SyncMessage {
    fn new(msg_type: MessageType, peer_id: Uuid, doc_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            peer_id,
            doc_id: doc_id.into(),
            payload,
        }
    }

    pub fn subscribe(
        peer_id: Uuid,
        doc_id: impl Into<String>,
        token: Option<&str>,
    ) -> Result<Self, ProtocolError> {
        let payload = encode_payload(&token.map(str::to_owned))?;
        Ok(Self::new(MessageType::Subscribe, peer_id, doc_id, payload))
    }

    pub fn subscribed(doc_id: impl Into<String>) -> Self {
        Self::new(MessageType::Subscribed, Uuid::nil(), doc_id, Vec::new())
    }

    pub fn rejected(doc_id: impl Into<String>, reason: &str) -> Self {
        Self::new(
            MessageType::Rejected,
            Uuid::nil(),
            doc_id,
            reason.as_bytes().to_vec(),
        )
    }

    pub fn broadcast(
        peer_id: Uuid,
        doc_id: impl Into<String>,
        event: &BroadcastEvent,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(MessageType::Broadcast, peer_id, doc_id, event.encode()?))
    }

    /// Broadcast frame around an already-encoded event, as the relay forwards it.
    pub fn broadcast_raw(peer_id: Uuid, doc_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::new(MessageType::Broadcast, peer_id, doc_id, payload)
    }

    pub fn track(
        peer_id: Uuid,
        doc_id: impl Into<String>,
        record: &UserPresence,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(MessageType::Track, peer_id, doc_id, encode_payload(record)?))
    }

    pub fn presence_sync(
        doc_id: impl Into<String>,
        records: &[UserPresence],
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(
            MessageType::PresenceSync,
            Uuid::nil(),
            doc_id,
            encode_payload(&records)?,
        ))
    }

    pub fn presence_join(
        doc_id: impl Into<String>,
        records: &[UserPresence],
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(
            MessageType::PresenceJoin,
            Uuid::nil(),
            doc_id,
            encode_payload(&records)?,
        ))
    }

    pub fn presence_leave(
        doc_id: impl Into<String>,
        records: &[UserPresence],
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(
            MessageType::PresenceLeave,
            Uuid::nil(),
            doc_id,
            encode_payload(&records)?,
        ))
    }

    pub fn ping(peer_id: Uuid) -> Self {
        Self::new(MessageType::Ping, peer_id, String::new(), Vec::new())
    }

    pub fn pong(peer_id: Uuid) -> Self {
        Self::new(MessageType::Pong, peer_id, String::new(), Vec::new())
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_payload(self)
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode_payload(bytes)
    }

    /// Parse the access token of a Subscribe frame.
    pub fn token(&self) -> Result<Option<String>, ProtocolError> {
        self.expect(MessageType::Subscribe)?;
        decode_payload(&self.payload)
    }

    /// Parse the reason of a Rejected frame.
    pub fn reason(&self) -> Result<String, ProtocolError> {
        self.expect(MessageType::Rejected)?;
        Ok(String::from_utf8_lossy(&self.payload).into_owned())
    }

    /// Parse the event of a Broadcast frame.
    pub fn event(&self) -> Result<BroadcastEvent, ProtocolError> {
        self.expect(MessageType::Broadcast)?;
        BroadcastEvent::decode(&self.payload)
    }

    /// Parse the record of a Track frame.
    pub fn presence(&self) -> Result<UserPresence, ProtocolError> {
        self.expect(MessageType::Track)?;
        decode_payload(&self.payload)
    }

    /// Parse the records of a PresenceSync / PresenceJoin / PresenceLeave frame.
    pub fn presence_records(&self) -> Result<Vec<UserPresence>, ProtocolError> {
        match self.msg_type {
            MessageType::PresenceSync | MessageType::PresenceJoin | MessageType::PresenceLeave => {
                decode_payload(&self.payload)
            }
            _ => Err(ProtocolError::InvalidMessageType),
        }
    }

    fn expect(&self, msg_type: MessageType) -> Result<(), ProtocolError> {
        if self.msg_type == msg_type {
            Ok(())
        } else {
            Err(ProtocolError::InvalidMessageType)
        }
    }
}

/// Protocol and transport errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    /// The channel reported an error (CHANNEL_ERROR).
    ChannelError(String),
    /// The channel did not confirm in time (TIMED_OUT).
    Timeout,
    ConnectionClosed,
    /// The relay refused our credentials.
    Unauthorized(String),
    /// The transport is misconfigured; retrying will not help.
    InvalidConfig(String),
}

impl ProtocolError {
    /// Whether a reconnect attempt could fix this.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ChannelError(_) | Self::Timeout | Self::ConnectionClosed
        )
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::ChannelError(e) => write!(f, "Channel error: {e}"),
            Self::Timeout => write!(f, "Channel timed out"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Unauthorized(e) => write!(f, "Unauthorized: {e}"),
            Self::InvalidConfig(e) => write!(f, "Invalid transport configuration: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
