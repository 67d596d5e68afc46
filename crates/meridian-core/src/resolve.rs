//! # Conflict Resolver
//!
//! Pure functions that collapse a [`Conflict`] into one reconciled
//! value. Every strategy is total for a structurally valid conflict:
//! none may fail on well-formed input (`Manual` validates its payload
//! *before* any resolution state exists, so a rejection leaves the
//! conflict untouched).
//!
//! ## Strategies
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  LastWriteWins  larger timestamp wins; ties favor remote            │
//! │  KeepLocal      local snapshot, timestamp-independent               │
//! │  KeepRemote     remote snapshot, timestamp-independent              │
//! │  Merge          field-wise union, local wins on key collision       │
//! │  Manual         caller-supplied payload (structurally validated)    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The resolver never talks to the remote system and never retries:
//! the reconciled payload re-enters the normal push path, subject to
//! the same retry and ordering rules as any other operation.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::conflict::{Conflict, Resolution, ResolutionStrategy};
use crate::error::{CoreError, CoreResult};

// =============================================================================
// Resolution Entry Point
// =============================================================================

/// Applies `strategy` to `conflict`, producing a [`Resolution`].
///
/// `manual_payload` is consulted only by [`ResolutionStrategy::Manual`]
/// and must be a JSON object; it is validated for structural
/// well-formedness only, not business correctness.
///
/// The resolution version is `max(local_version, remote_version) + 1`
/// for every strategy: the reconciled record is never stale relative
/// to either input when it is re-pushed.
pub fn resolve(
    conflict: &Conflict,
    strategy: ResolutionStrategy,
    manual_payload: Option<Value>,
    now: DateTime<Utc>,
) -> CoreResult<Resolution> {
    if conflict.resolved {
        return Err(CoreError::AlreadyResolved(conflict.id.clone()));
    }

    let data = match strategy {
        ResolutionStrategy::LastWriteWins => last_write_wins(conflict),
        ResolutionStrategy::KeepLocal => side_or_null(&conflict.local),
        ResolutionStrategy::KeepRemote => side_or_null(&conflict.remote),
        ResolutionStrategy::Merge => merge(&conflict.local, &conflict.remote),
        ResolutionStrategy::Manual => validate_manual(conflict, manual_payload)?,
    };

    Ok(Resolution {
        data,
        version: conflict.local_version.max(conflict.remote_version) + 1,
        updated_at: now,
        strategy,
    })
}

// =============================================================================
// Strategies
// =============================================================================

/// Larger timestamp wins. On an exact tie the remote snapshot wins:
/// the server is the tiebreak authority.
fn last_write_wins(conflict: &Conflict) -> Value {
    if conflict.local_updated_at > conflict.remote_updated_at {
        side_or_null(&conflict.local)
    } else {
        side_or_null(&conflict.remote)
    }
}

/// Field-wise union of the two snapshots; local fields win on key
/// collision. Falls back to whichever side exists when the snapshots
/// are not both JSON objects (a deleted side contributes nothing).
fn merge(local: &Option<Value>, remote: &Option<Value>) -> Value {
    match (local, remote) {
        (Some(Value::Object(l)), Some(Value::Object(r))) => {
            let mut out = r.clone();
            for (key, value) in l {
                out.insert(key.clone(), value.clone());
            }
            Value::Object(out)
        }
        (Some(l), _) => l.clone(),
        (None, Some(r)) => r.clone(),
        (None, None) => Value::Null,
    }
}

/// Manual payloads must be JSON objects. Anything else is rejected
/// before resolution state is recorded.
fn validate_manual(conflict: &Conflict, payload: Option<Value>) -> CoreResult<Value> {
    let payload = payload.ok_or_else(|| CoreError::MissingManualPayload(conflict.id.clone()))?;

    match payload {
        Value::Object(_) => Ok(payload),
        other => Err(CoreError::MalformedManualPayload {
            conflict_id: conflict.id.clone(),
            reason: format!("expected a JSON object, got {}", json_type_name(&other)),
        }),
    }
}

fn side_or_null(side: &Option<Value>) -> Value {
    side.clone().unwrap_or(Value::Null)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictKind;
    use crate::types::{EntityKind, OperationKind};
    use chrono::Duration;
    use serde_json::json;

    fn conflict_with(
        local: Value,
        remote: Value,
        local_version: i64,
        remote_version: i64,
        local_at: DateTime<Utc>,
        remote_at: DateTime<Utc>,
    ) -> Conflict {
        Conflict::new(
            EntityKind::MenuItem,
            "item-1",
            ConflictKind::ConcurrentUpdate,
            Some(local),
            Some(remote),
            local_version,
            remote_version,
            local_at,
            remote_at,
            OperationKind::Update,
            Utc::now(),
        )
    }

    #[test]
    fn test_keep_remote_takes_remote_price() {
        let now = Utc::now();
        let c = conflict_with(
            json!({"price": 10, "name": "Latte"}),
            json!({"price": 12, "name": "Latte"}),
            3,
            3,
            now,
            now,
        );

        let r = resolve(&c, ResolutionStrategy::KeepRemote, None, now).unwrap();
        assert_eq!(r.data["price"], 12);
        assert_eq!(r.version, 4);
    }

    #[test]
    fn test_keep_local_takes_local_price() {
        let now = Utc::now();
        let c = conflict_with(json!({"price": 10}), json!({"price": 12}), 3, 3, now, now);
        let r = resolve(&c, ResolutionStrategy::KeepLocal, None, now).unwrap();
        assert_eq!(r.data["price"], 10);
    }

    #[test]
    fn test_lww_newer_local_wins() {
        let remote_at = Utc::now();
        let local_at = remote_at + Duration::seconds(30);
        let c = conflict_with(json!({"price": 10}), json!({"price": 12}), 3, 3, local_at, remote_at);
        let r = resolve(&c, ResolutionStrategy::LastWriteWins, None, Utc::now()).unwrap();
        assert_eq!(r.data["price"], 10);
    }

    #[test]
    fn test_lww_tie_goes_to_remote() {
        let at = Utc::now();
        let c = conflict_with(json!({"price": 10}), json!({"price": 12}), 3, 3, at, at);
        let r = resolve(&c, ResolutionStrategy::LastWriteWins, None, Utc::now()).unwrap();
        assert_eq!(r.data["price"], 12);
    }

    #[test]
    fn test_merge_local_wins_on_key_collision() {
        let now = Utc::now();
        let c = conflict_with(
            json!({"price": 10, "stock": 5}),
            json!({"price": 12, "category": "coffee"}),
            3,
            5,
            now,
            now,
        );

        let r = resolve(&c, ResolutionStrategy::Merge, None, now).unwrap();
        assert_eq!(r.data["price"], 10); // local wins
        assert_eq!(r.data["stock"], 5); // local-only kept
        assert_eq!(r.data["category"], "coffee"); // remote-only kept
        assert_eq!(r.version, 6); // max(3, 5) + 1
        assert_eq!(r.updated_at, now);
    }

    #[test]
    fn test_merge_with_deleted_remote_keeps_local() {
        let now = Utc::now();
        let mut c = conflict_with(json!({"price": 10}), json!({}), 3, 4, now, now);
        c.remote = None;
        let r = resolve(&c, ResolutionStrategy::Merge, None, now).unwrap();
        assert_eq!(r.data, json!({"price": 10}));
    }

    #[test]
    fn test_manual_requires_payload() {
        let now = Utc::now();
        let c = conflict_with(json!({}), json!({}), 1, 1, now, now);
        let err = resolve(&c, ResolutionStrategy::Manual, None, now).unwrap_err();
        assert!(matches!(err, CoreError::MissingManualPayload(_)));
    }

    #[test]
    fn test_manual_rejects_non_object_payload() {
        let now = Utc::now();
        let c = conflict_with(json!({}), json!({}), 1, 1, now, now);
        let err = resolve(&c, ResolutionStrategy::Manual, Some(json!([1, 2])), now).unwrap_err();
        assert!(matches!(err, CoreError::MalformedManualPayload { .. }));
    }

    #[test]
    fn test_manual_accepts_object_payload() {
        let now = Utc::now();
        let c = conflict_with(json!({}), json!({}), 2, 7, now, now);
        let r = resolve(&c, ResolutionStrategy::Manual, Some(json!({"price": 11})), now).unwrap();
        assert_eq!(r.data["price"], 11);
        assert_eq!(r.version, 8);
    }

    #[test]
    fn test_resolving_resolved_conflict_fails() {
        let now = Utc::now();
        let mut c = conflict_with(json!({}), json!({}), 1, 1, now, now);
        c.resolved = true;
        let err = resolve(&c, ResolutionStrategy::KeepLocal, None, now).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyResolved(_)));
    }

    #[test]
    fn test_strategies_total_for_deleted_sides() {
        // DeletedModified conflicts carry no remote payload; every
        // automatic strategy must still produce a value.
        let now = Utc::now();
        let mut c = conflict_with(json!({"price": 10}), json!({}), 3, 4, now, now);
        c.remote = None;

        for strategy in [
            ResolutionStrategy::LastWriteWins,
            ResolutionStrategy::KeepLocal,
            ResolutionStrategy::KeepRemote,
            ResolutionStrategy::Merge,
        ] {
            assert!(resolve(&c, strategy, None, now).is_ok(), "{} failed", strategy);
        }
    }
}
