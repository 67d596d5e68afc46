//! # Sync Error Types
//!
//! Error types for the sync engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Sync Error Categories                          │
//! │                                                                     │
//! │  ┌────────────────┐  ┌────────────────┐  ┌──────────────────────┐  │
//! │  │  Remote        │  │  Persistence   │  │  Conflicts           │  │
//! │  │                │  │                │  │                      │  │
//! │  │  Transient     │  │  Store         │  │  ConflictNotFound    │  │
//! │  │                │  │  Codec         │  │  AlreadyResolved     │  │
//! │  └────────────────┘  └────────────────┘  │  ManualPayload       │  │
//! │                                          └──────────────────────┘  │
//! │  ┌────────────────┐  ┌────────────────┐  ┌──────────────────────┐  │
//! │  │  Coordinator   │  │  Monitor       │  │  Configuration       │  │
//! │  │                │  │                │  │                      │  │
//! │  │  AlreadyIn-    │  │  Storage-      │  │  InvalidConfig       │  │
//! │  │  Flight        │  │  Unavailable   │  │  ConfigLoad/Save     │  │
//! │  └────────────────┘  └────────────────┘  └──────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible engine failures.
///
/// ## Design Principles
/// - Each variant includes enough context for debugging
/// - Errors are categorized for different handling strategies
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// Transient remote failure; the operation stays queued and is
    /// retried with backoff on a later cycle. Version clashes are not
    /// errors: they arrive as a push outcome and route to the conflict
    /// detector.
    #[error("Transient remote failure: {0}")]
    Transient(String),

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// The injected key-value store failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Failed to encode or decode a persisted value.
    #[error("Codec error: {0}")]
    Codec(String),

    // =========================================================================
    // Conflict Errors
    // =========================================================================
    /// No conflict with the given id.
    #[error("Conflict not found: {0}")]
    ConflictNotFound(String),

    /// The conflict was already resolved; resolution happens once.
    #[error("Conflict {0} is already resolved")]
    AlreadyResolved(String),

    /// A manual resolution payload failed structural validation.
    /// The conflict stays unresolved.
    #[error("Malformed manual payload for conflict {conflict_id}: {reason}")]
    MalformedManualPayload {
        conflict_id: String,
        reason: String,
    },

    /// Manual strategy chosen without a payload.
    #[error("Manual resolution for conflict {0} requires an explicit payload")]
    MissingManualPayload(String),

    // =========================================================================
    // Coordinator Errors
    // =========================================================================
    /// A sync cycle is already in flight for this branch; overlapping
    /// triggers coalesce instead of racing.
    #[error("Sync already in flight for branch {0}")]
    AlreadyInFlight(String),

    // =========================================================================
    // Monitor Errors
    // =========================================================================
    /// The storage usage estimator is unavailable; the monitor
    /// disables itself and sync continues without budget enforcement.
    #[error("Storage estimation unavailable: {0}")]
    StorageUnavailable(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load the config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save the config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Codec(err.to_string())
    }
}

impl From<meridian_core::CoreError> for SyncError {
    fn from(err: meridian_core::CoreError) -> Self {
        use meridian_core::CoreError;
        match err {
            CoreError::MalformedManualPayload { conflict_id, reason } => {
                SyncError::MalformedManualPayload { conflict_id, reason }
            }
            CoreError::MissingManualPayload(id) => SyncError::MissingManualPayload(id),
            CoreError::AlreadyResolved(id) => SyncError::AlreadyResolved(id),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if this error is recoverable and the operation can
    /// be retried on a later cycle.
    ///
    /// ## Retryable Errors
    /// - Transient remote failures (network issues)
    /// - Store failures (the platform store may recover)
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Malformed manual payloads
    /// - Already-resolved conflicts
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient(_) | SyncError::Store(_))
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Transient("timeout".into()).is_retryable());
        assert!(SyncError::Store("quota".into()).is_retryable());

        assert!(!SyncError::AlreadyResolved("c-1".into()).is_retryable());
        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
        assert!(!SyncError::AlreadyInFlight("branch-a".into()).is_retryable());
    }

    #[test]
    fn test_core_error_conversion() {
        let core = meridian_core::CoreError::AlreadyResolved("c-9".into());
        let sync: SyncError = core.into();
        assert!(matches!(sync, SyncError::AlreadyResolved(ref id) if id == "c-9"));
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::MalformedManualPayload {
            conflict_id: "abc-123".into(),
            reason: "expected a JSON object, got array".into(),
        };
        assert!(err.to_string().contains("abc-123"));
        assert!(err.to_string().contains("JSON object"));
    }
}
