//! # Conflict Detector
//!
//! Pure classification of divergence between a local and a remote
//! snapshot of the same entity. Invoked by the push path when the
//! remote reports a version clash; never performs I/O.
//!
//! ## Classification Priority
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  1. remote deleted, local pending mods      → DeletedModified       │
//! │  2. local deleted, remote modified          → ModifiedDeleted       │
//! │  3. versions equal, payloads differ         → ConcurrentUpdate      │
//! │  4. versions differ, payloads differ        → VersionMismatch       │
//! │  5. natural-key collision (remote signal)   → DuplicateEntity       │
//! │                                                                     │
//! │  versions equal AND payloads equal          → no conflict           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A version collision with differing payloads is `ConcurrentUpdate`,
//! not `VersionMismatch`: both sides edited from the same base,
//! unaware of each other.

use chrono::{DateTime, Utc};

use crate::conflict::{Conflict, ConflictKind};
use crate::types::{EntityKind, EntityRecord, OperationKind};

// =============================================================================
// Classification
// =============================================================================

/// Classifies the divergence between two snapshots, if any.
///
/// `local` is the cached local snapshot (`None` when the entity was
/// never cached), `remote` the authoritative snapshot returned with
/// the version clash (`None` when the remote no longer has the
/// entity). `op` is the kind of the queued operation being pushed.
///
/// Returns `None` when versions and payloads are both equal: that is
/// not a conflict, however the push path got here.
pub fn classify(
    local: Option<&EntityRecord>,
    remote: Option<&EntityRecord>,
    op: OperationKind,
) -> Option<ConflictKind> {
    let remote_deleted = remote.map_or(true, |r| r.deleted);
    let local_deleted = op == OperationKind::Delete || local.is_some_and(|l| l.deleted);
    let local_pending = matches!(op, OperationKind::Create | OperationKind::Update);

    // Priority 1: the remote dropped an entity we still care about.
    if remote_deleted && local_pending {
        return Some(ConflictKind::DeletedModified);
    }

    // Priority 2: we dropped an entity the remote kept editing.
    if local_deleted && !remote_deleted {
        return Some(ConflictKind::ModifiedDeleted);
    }

    // Both deleted: converged, nothing to reconcile.
    let (local, remote) = match (local, remote) {
        (Some(l), Some(r)) => (l, r),
        _ => return None,
    };

    let payloads_equal = local.data == remote.data;

    if local.version == remote.version {
        if payloads_equal {
            None
        } else {
            Some(ConflictKind::ConcurrentUpdate)
        }
    } else if !payloads_equal {
        Some(ConflictKind::VersionMismatch)
    } else {
        // Version bump with identical content; the pull will catch up.
        None
    }
}

// =============================================================================
// Conflict Construction
// =============================================================================

/// Classifies and, on divergence, builds a new unresolved [`Conflict`].
pub fn detect(
    entity_kind: EntityKind,
    entity_id: &str,
    local: Option<&EntityRecord>,
    remote: Option<&EntityRecord>,
    op: OperationKind,
    now: DateTime<Utc>,
) -> Option<Conflict> {
    let kind = classify(local, remote, op)?;
    Some(build(entity_kind, entity_id, kind, local, remote, op, now))
}

/// Builds a `DuplicateEntity` conflict from a remote natural-key
/// collision signal. The remote's existing record is the "remote"
/// side; the locally created record is the "local" side.
pub fn detect_duplicate(
    entity_kind: EntityKind,
    entity_id: &str,
    local: Option<&EntityRecord>,
    existing: &EntityRecord,
    op: OperationKind,
    now: DateTime<Utc>,
) -> Conflict {
    build(
        entity_kind,
        entity_id,
        ConflictKind::DuplicateEntity,
        local,
        Some(existing),
        op,
        now,
    )
}

fn build(
    entity_kind: EntityKind,
    entity_id: &str,
    kind: ConflictKind,
    local: Option<&EntityRecord>,
    remote: Option<&EntityRecord>,
    op: OperationKind,
    now: DateTime<Utc>,
) -> Conflict {
    Conflict::new(
        entity_kind,
        entity_id,
        kind,
        local.filter(|l| !l.deleted).map(|l| l.data.clone()),
        remote.filter(|r| !r.deleted).map(|r| r.data.clone()),
        local.map_or(0, |l| l.version),
        remote.map_or(0, |r| r.version),
        local.map_or(now, |l| l.updated_at),
        remote.map_or(now, |r| r.updated_at),
        op,
        now,
    )
}

// =============================================================================
// Unit Tests
// =============================================================================
