//! # Core Error Types
//!
//! Errors raised by the pure conflict logic. I/O failures live in the
//! engine crate; everything here is deterministic.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors from conflict classification and resolution.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A manual resolution payload failed structural validation.
    /// The conflict stays unresolved; no resolution state is recorded.
    #[error("Malformed manual payload for conflict {conflict_id}: {reason}")]
    MalformedManualPayload {
        conflict_id: String,
        reason: String,
    },

    /// Manual strategy chosen without supplying a payload.
    #[error("Manual resolution for conflict {0} requires an explicit payload")]
    MissingManualPayload(String),

    /// Attempted to resolve a conflict that was already resolved.
    /// Resolution flips the flag exactly once.
    #[error("Conflict {0} is already resolved")]
    AlreadyResolved(String),
}
