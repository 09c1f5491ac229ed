//! Errors surfaced by a collaboration session.

use uuid::Uuid;

use quill_core::OtError;

use crate::protocol::ProtocolError;

/// Everything a session can report through `CollabEvent::Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum CollabError {
    /// A local or remote operation did not fit the document.
    Operation(OtError),
    /// A sender's operations arrived with a gap in their sequence.
    OutOfOrder { user_id: Uuid, expected: u64, got: u64 },
    /// A remote operation was built on history this session has already pruned.
    ContextUnavailable { user_id: Uuid },
    /// A remote operation claims to build on local edits that were never made.
    DivergentHistory { user_id: Uuid },
    /// Too many operations are waiting on edits that never arrived.
    MissingDependencies { user_id: Uuid },
    /// Transport or wire failure.
    Protocol(ProtocolError),
    /// Missing or invalid configuration; raised at `connect()`.
    Config(String),
    /// Reconnection gave up; collaboration is unavailable until the next `connect()`.
    ReconnectExhausted { attempts: u32 },
    /// `connect()` was called on a session that is already running.
    AlreadyConnected,
    /// The channel is down and the offline queue cannot take another operation.
    OfflineQueueFull { capacity: usize },
}

impl CollabError {
    /// Whether the error ends the session's collaboration.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ReconnectExhausted { .. } | Self::Config(_)
        )
    }
}

impl std::fmt::Display for CollabError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Operation(e) => write!(f, "Operation rejected: {e}"),
            Self::OutOfOrder { user_id, expected, got } => write!(
                f,
                "Operation from {user_id} out of order: expected seq {expected}, got {got}"
            ),
            Self::ContextUnavailable { user_id } => write!(
                f,
                "Operation from {user_id} depends on history that was already pruned"
            ),
            Self::DivergentHistory { user_id } => write!(
                f,
                "Operation from {user_id} builds on local edits that do not exist"
            ),
            Self::MissingDependencies { user_id } => write!(
                f,
                "Operation from {user_id} waits on edits that were never received"
            ),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::ReconnectExhausted { attempts } => {
                write!(f, "Gave up reconnecting after {attempts} attempts")
            }
            Self::AlreadyConnected => write!(f, "Session is already connected"),
            Self::OfflineQueueFull { capacity } => {
                write!(f, "Offline queue is full ({capacity} operations)")
            }
        }
    }
}

impl std::error::Error for CollabError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Operation(e) => Some(e),
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<OtError> for CollabError {
    fn from(e: OtError) -> Self {
        CollabError::Operation(e)
    }
}

impl From<ProtocolError> for CollabError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::InvalidConfig(msg) | ProtocolError::Unauthorized(msg) => {
                CollabError::Config(msg)
            }
            other => CollabError::Protocol(other),
        }
    }
}
