//! Contract errors raised by the OT engine.

/// Errors from applying or transforming operations.
///
/// Both variants mean the caller's revision bookkeeping is out of step
/// with the text; neither is recoverable by retrying the same call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtError {
    /// The operation does not span the text it was applied to.
    LengthMismatch { expected: usize, actual: usize },
    /// Two operations handed to `transform` were not built on the same base.
    BaseLengthMismatch { left: usize, right: usize },
    /// Decoding an operation from its JSON form failed.
    Json(String),
}

impl std::fmt::Display for OtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LengthMismatch { expected, actual } => write!(
                f,
                "Operation length mismatch: operation spans {expected} chars, text has {actual}"
            ),
            Self::BaseLengthMismatch { left, right } => write!(
                f,
                "Cannot transform operations with different base lengths ({left} vs {right})"
            ),
            Self::Json(e) => write!(f, "Invalid operation JSON: {e}"),
        }
    }
}

impl std::error::Error for OtError {}

impl From<serde_json::Error> for OtError {
    fn from(e: serde_json::Error) -> Self {
        OtError::Json(e.to_string())
    }
}
