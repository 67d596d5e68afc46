//! # Conflict Types
//!
//! A [`Conflict`] is a detected divergence between a local and a remote
//! version of the same entity. Conflicts are created only by the
//! detector ([`crate::detect`]) and mutated exactly once by the
//! resolver ([`crate::resolve`]): the `resolved` flag flips false→true
//! and stays true. They are never deleted except by an explicit
//! bulk-clear of resolved records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{EntityKind, OperationKind};

// =============================================================================
// Conflict Kind
// =============================================================================

/// Classification of a detected divergence.
///
/// Ordered here in detector priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Remote deleted the entity while local modifications were pending.
    DeletedModified,
    /// Local deleted the entity while remote modified it.
    ModifiedDeleted,
    /// Equal versions with differing payloads: both sides edited from
    /// the same base, unaware of each other.
    ConcurrentUpdate,
    /// Differing versions with differing payloads: one side is behind.
    VersionMismatch,
    /// Two independently created records collide on the remote's
    /// natural key.
    DuplicateEntity,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConflictKind::DeletedModified => "deleted_modified",
            ConflictKind::ModifiedDeleted => "modified_deleted",
            ConflictKind::ConcurrentUpdate => "concurrent_update",
            ConflictKind::VersionMismatch => "version_mismatch",
            ConflictKind::DuplicateEntity => "duplicate_entity",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Resolution Strategy
// =============================================================================

/// A rule for collapsing a conflict into one reconciled value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The snapshot with the larger timestamp wins; ties favor remote
    /// (the server is the tiebreak authority).
    LastWriteWins,
    /// Keep the local snapshot, timestamp-independent.
    KeepLocal,
    /// Keep the remote snapshot, timestamp-independent.
    KeepRemote,
    /// Field-wise union; local fields win on key collision.
    Merge,
    /// Caller supplies the replacement payload.
    Manual,
}

impl Default for ResolutionStrategy {
    fn default() -> Self {
        ResolutionStrategy::LastWriteWins
    }
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolutionStrategy::LastWriteWins => "last_write_wins",
            ResolutionStrategy::KeepLocal => "keep_local",
            ResolutionStrategy::KeepRemote => "keep_remote",
            ResolutionStrategy::Merge => "merge",
            ResolutionStrategy::Manual => "manual",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Conflict
// =============================================================================

/// A detected divergence between a local and a remote entity version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Entity type the conflict concerns.
    pub entity_kind: EntityKind,

    /// ID of the conflicted entity.
    pub entity_id: String,

    /// Classification assigned by the detector.
    pub kind: ConflictKind,

    /// Local payload snapshot (None when locally deleted).
    pub local: Option<Value>,

    /// Remote payload snapshot (None when remotely deleted).
    pub remote: Option<Value>,

    /// Local version at detection time.
    pub local_version: i64,

    /// Remote version at detection time.
    pub remote_version: i64,

    /// Local snapshot timestamp.
    pub local_updated_at: DateTime<Utc>,

    /// Remote snapshot timestamp.
    pub remote_updated_at: DateTime<Utc>,

    /// Kind of the queued operation that surfaced the conflict.
    pub operation_kind: OperationKind,

    /// Whether the conflict has been resolved. Flips exactly once.
    pub resolved: bool,

    /// Strategy used to resolve (set atomically with `resolved`).
    pub strategy: Option<ResolutionStrategy>,

    /// The reconciled payload (set atomically with `resolved`).
    pub resolved_data: Option<Value>,

    /// When the conflict was resolved.
    pub resolved_at: Option<DateTime<Utc>>,

    /// Who resolved it (actor id, or an automation identity).
    pub resolved_by: Option<String>,

    /// When the detector created this conflict.
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    /// Builder used by the detector; starts unresolved.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        kind: ConflictKind,
        local: Option<Value>,
        remote: Option<Value>,
        local_version: i64,
        remote_version: i64,
        local_updated_at: DateTime<Utc>,
        remote_updated_at: DateTime<Utc>,
        operation_kind: OperationKind,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Conflict {
            id: Uuid::new_v4().to_string(),
            entity_kind,
            entity_id: entity_id.into(),
            kind,
            local,
            remote,
            local_version,
            remote_version,
            local_updated_at,
            remote_updated_at,
            operation_kind,
            resolved: false,
            strategy: None,
            resolved_data: None,
            resolved_at: None,
            resolved_by: None,
            detected_at,
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// The output of applying a resolution strategy.
///
/// Carries everything the caller needs to re-submit the reconciled
/// value through the normal push path. Resolution itself never writes
/// to the remote system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// The reconciled payload.
    pub data: Value,

    /// Version for the reconciled record.
    pub version: i64,

    /// Timestamp for the reconciled record.
    pub updated_at: DateTime<Utc>,

    /// Which strategy produced this resolution.
    pub strategy: ResolutionStrategy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_conflict() -> Conflict {
        let now = Utc::now();
        Conflict::new(
            EntityKind::MenuItem,
            "item-1",
            ConflictKind::ConcurrentUpdate,
            Some(json!({"price": 10})),
            Some(json!({"price": 12})),
            3,
            3,
            now,
            now,
            OperationKind::Update,
            now,
        )
    }

    #[test]
    fn test_new_conflict_is_unresolved() {
        let c = sample_conflict();
        assert!(!c.resolved);
        assert!(c.strategy.is_none());
        assert!(c.resolved_data.is_none());
        assert!(c.resolved_at.is_none());
        assert!(c.resolved_by.is_none());
    }

    #[test]
    fn test_default_strategy_is_lww() {
        assert_eq!(ResolutionStrategy::default(), ResolutionStrategy::LastWriteWins);
    }

    #[test]
    fn test_conflict_serde_roundtrip() {
        let c = sample_conflict();
        let s = serde_json::to_string(&c).unwrap();
        let back: Conflict = serde_json::from_str(&s).unwrap();
        assert_eq!(c, back);
    }
}
