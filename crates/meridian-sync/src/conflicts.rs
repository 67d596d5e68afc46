//! # Conflict Registry
//!
//! Durable set of detected conflicts and the caller-facing resolution
//! surface. Classification lives in [`meridian_core::detect`] and the
//! strategy math in [`meridian_core::resolve`]; this module owns
//! persistence and the resolved-exactly-once invariant.
//!
//! ## Resolution Atomicity
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  resolve(id, strategy, actor)                                       │
//! │                                                                     │
//! │  1. apply pure strategy  ── may reject (manual payload malformed);  │
//! │                             nothing recorded, conflict unresolved   │
//! │  2. stamp resolved copy  ── resolved / strategy / resolved_data /   │
//! │                             resolved_at / resolved_by together      │
//! │  3. persist, then commit ── a store failure leaves the in-memory    │
//! │                             conflict untouched                      │
//! │                                                                     │
//! │  A conflict is never "half resolved".                               │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use meridian_core::{resolve as strategies, Conflict, Resolution, ResolutionStrategy};

use crate::error::{SyncError, SyncResult};
use crate::store::{Clock, KeyValueStore};

/// Storage key for the persisted conflict set.
const CONFLICTS_KEY: &str = "sync/conflicts";

// =============================================================================
// Conflict Registry
// =============================================================================

/// KV-persisted registry of conflicts, resolved and not.
pub struct ConflictRegistry {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    conflicts: RwLock<Vec<Conflict>>,
}

impl ConflictRegistry {
    /// Opens the registry, loading any persisted conflicts.
    pub async fn open(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> SyncResult<Self> {
        let conflicts = match store.get(CONFLICTS_KEY).await? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        };

        Ok(ConflictRegistry {
            store,
            clock,
            conflicts: RwLock::new(conflicts),
        })
    }

    /// Records a freshly detected conflict.
    pub async fn record(&self, conflict: Conflict) -> SyncResult<()> {
        debug!(
            id = %conflict.id,
            kind = %conflict.kind,
            entity_kind = %conflict.entity_kind,
            entity_id = %conflict.entity_id,
            "Recording conflict"
        );

        let mut conflicts = self.conflicts.write().await;
        conflicts.push(conflict);
        self.persist(&conflicts).await
    }

    /// Every conflict, resolved or not.
    pub async fn all(&self) -> Vec<Conflict> {
        self.conflicts.read().await.clone()
    }

    /// Conflicts still awaiting resolution.
    pub async fn unresolved(&self) -> Vec<Conflict> {
        self.conflicts
            .read()
            .await
            .iter()
            .filter(|c| !c.resolved)
            .cloned()
            .collect()
    }

    /// Looks up one conflict by id.
    pub async fn get(&self, id: &str) -> Option<Conflict> {
        self.conflicts.read().await.iter().find(|c| c.id == id).cloned()
    }

    /// Resolves one conflict. The resolution fields are written
    /// atomically; on any failure the conflict stays unresolved.
    ///
    /// The returned [`Resolution`] must be re-submitted through the
    /// normal push path by the caller - resolution itself never writes
    /// to the remote system.
    pub async fn resolve(
        &self,
        conflict_id: &str,
        strategy: ResolutionStrategy,
        actor_id: &str,
        manual_payload: Option<Value>,
    ) -> SyncResult<Resolution> {
        let now = self.clock.now();
        let mut conflicts = self.conflicts.write().await;

        let position = conflicts
            .iter()
            .position(|c| c.id == conflict_id)
            .ok_or_else(|| SyncError::ConflictNotFound(conflict_id.to_string()))?;

        if conflicts[position].resolved {
            return Err(SyncError::AlreadyResolved(conflict_id.to_string()));
        }

        // Pure strategy application; rejects before anything is recorded.
        let resolution = strategies::resolve(&conflicts[position], strategy, manual_payload, now)?;

        let mut resolved = conflicts[position].clone();
        resolved.resolved = true;
        resolved.strategy = Some(strategy);
        resolved.resolved_data = Some(resolution.data.clone());
        resolved.resolved_at = Some(now);
        resolved.resolved_by = Some(actor_id.to_string());

        // Persist first: a store failure leaves memory untouched and
        // the conflict unresolved.
        let mut snapshot = conflicts.clone();
        snapshot[position] = resolved.clone();
        self.persist(&snapshot).await?;
        conflicts[position] = resolved;

        info!(
            id = %conflict_id,
            strategy = %strategy,
            actor = %actor_id,
            "Resolved conflict"
        );

        Ok(resolution)
    }

    /// Bulk auto-resolve: applies `overrides.get(id)` or the default
    /// strategy to every unresolved conflict. A conflict that cannot
    /// be auto-resolved (e.g. `Manual` without a payload) is skipped
    /// with a warning; the rest still resolve.
    ///
    /// Returns the resolutions produced, paired with their conflict ids.
    pub async fn resolve_all(
        &self,
        default_strategy: ResolutionStrategy,
        overrides: &HashMap<String, ResolutionStrategy>,
        actor_id: &str,
    ) -> SyncResult<Vec<(String, Resolution)>> {
        let pending: Vec<String> = self
            .unresolved()
            .await
            .into_iter()
            .map(|c| c.id)
            .collect();

        let mut resolutions = Vec::new();

        for id in pending {
            let strategy = overrides.get(&id).copied().unwrap_or(default_strategy);

            match self.resolve(&id, strategy, actor_id, None).await {
                Ok(resolution) => resolutions.push((id, resolution)),
                Err(e) => warn!(id = %id, strategy = %strategy, error = %e, "Skipped conflict in bulk resolve"),
            }
        }

        info!(resolved = resolutions.len(), "Bulk resolve complete");
        Ok(resolutions)
    }

    /// Drops every resolved conflict: the only deletion path.
    /// Returns how many were cleared.
    pub async fn clear_resolved(&self) -> SyncResult<usize> {
        let mut conflicts = self.conflicts.write().await;
        let before = conflicts.len();
        conflicts.retain(|c| !c.resolved);
        let cleared = before - conflicts.len();

        if cleared > 0 {
            self.persist(&conflicts).await?;
            info!(cleared, "Cleared resolved conflicts");
        }

        Ok(cleared)
    }

    async fn persist(&self, conflicts: &[Conflict]) -> SyncResult<()> {
        let bytes = serde_json::to_vec(conflicts)?;
        self.store.set(CONFLICTS_KEY, bytes).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SystemClock};
    use chrono::Utc;
    use meridian_core::{ConflictKind, EntityKind, OperationKind};
    use serde_json::json;

    fn price_conflict(local_price: i64, remote_price: i64) -> Conflict {
        let now = Utc::now();
        Conflict::new(
            EntityKind::MenuItem,
            "item-1",
            ConflictKind::ConcurrentUpdate,
            Some(json!({"price": local_price, "name": "Latte"})),
            Some(json!({"price": remote_price, "name": "Latte"})),
            3,
            3,
            now,
            now,
            OperationKind::Update,
            now,
        )
    }

    async fn open_registry() -> (Arc<MemoryStore>, ConflictRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = ConflictRegistry::open(store.clone(), Arc::new(SystemClock))
            .await
            .unwrap();
        (store, registry)
    }

    #[tokio::test]
    async fn test_keep_remote_resolution() {
        let (_, registry) = open_registry().await;
        let conflict = price_conflict(10, 12);
        let id = conflict.id.clone();
        registry.record(conflict).await.unwrap();

        let resolution = registry
            .resolve(&id, ResolutionStrategy::KeepRemote, "manager-1", None)
            .await
            .unwrap();
        assert_eq!(resolution.data["price"], 12);

        let stored = registry.get(&id).await.unwrap();
        assert!(stored.resolved);
        assert_eq!(stored.strategy, Some(ResolutionStrategy::KeepRemote));
        assert_eq!(stored.resolved_by.as_deref(), Some("manager-1"));
        assert!(stored.resolved_at.is_some());
        assert_eq!(stored.resolved_data.as_ref().unwrap()["price"], 12);
    }

    #[tokio::test]
    async fn test_resolve_twice_fails() {
        let (_, registry) = open_registry().await;
        let conflict = price_conflict(10, 12);
        let id = conflict.id.clone();
        registry.record(conflict).await.unwrap();

        registry
            .resolve(&id, ResolutionStrategy::KeepLocal, "a", None)
            .await
            .unwrap();
        let err = registry
            .resolve(&id, ResolutionStrategy::KeepRemote, "b", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AlreadyResolved(_)));

        // First resolution untouched.
        let stored = registry.get(&id).await.unwrap();
        assert_eq!(stored.strategy, Some(ResolutionStrategy::KeepLocal));
    }

    #[tokio::test]
    async fn test_malformed_manual_payload_leaves_unresolved() {
        let (_, registry) = open_registry().await;
        let conflict = price_conflict(10, 12);
        let id = conflict.id.clone();
        registry.record(conflict).await.unwrap();

        let err = registry
            .resolve(&id, ResolutionStrategy::Manual, "m", Some(json!("oops")))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedManualPayload { .. }));

        let stored = registry.get(&id).await.unwrap();
        assert!(!stored.resolved);
        assert!(stored.resolved_data.is_none());
    }

    #[tokio::test]
    async fn test_resolve_all_with_overrides() {
        let (_, registry) = open_registry().await;
        let a = price_conflict(10, 12);
        let b = price_conflict(20, 22);
        let (id_a, id_b) = (a.id.clone(), b.id.clone());
        registry.record(a).await.unwrap();
        registry.record(b).await.unwrap();

        let mut overrides = HashMap::new();
        overrides.insert(id_b.clone(), ResolutionStrategy::KeepLocal);

        let resolutions = registry
            .resolve_all(ResolutionStrategy::KeepRemote, &overrides, "auto")
            .await
            .unwrap();
        assert_eq!(resolutions.len(), 2);
        assert!(registry.unresolved().await.is_empty());

        assert_eq!(
            registry.get(&id_a).await.unwrap().resolved_data.unwrap()["price"],
            12
        );
        assert_eq!(
            registry.get(&id_b).await.unwrap().resolved_data.unwrap()["price"],
            20
        );
    }

    #[tokio::test]
    async fn test_resolve_all_skips_manual_without_payload() {
        let (_, registry) = open_registry().await;
        let a = price_conflict(10, 12);
        let id_a = a.id.clone();
        registry.record(a).await.unwrap();

        let mut overrides = HashMap::new();
        overrides.insert(id_a.clone(), ResolutionStrategy::Manual);

        let resolutions = registry
            .resolve_all(ResolutionStrategy::KeepRemote, &overrides, "auto")
            .await
            .unwrap();
        assert!(resolutions.is_empty());
        assert_eq!(registry.unresolved().await.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_resolved_keeps_unresolved() {
        let (_, registry) = open_registry().await;
        let a = price_conflict(10, 12);
        let b = price_conflict(20, 22);
        let id_a = a.id.clone();
        registry.record(a).await.unwrap();
        registry.record(b).await.unwrap();

        registry
            .resolve(&id_a, ResolutionStrategy::KeepRemote, "m", None)
            .await
            .unwrap();
        let cleared = registry.clear_resolved().await.unwrap();
        assert_eq!(cleared, 1);
        assert_eq!(registry.all().await.len(), 1);
        assert!(!registry.all().await[0].resolved);
    }

    #[tokio::test]
    async fn test_registry_survives_reopen() {
        let (store, registry) = open_registry().await;
        registry.record(price_conflict(10, 12)).await.unwrap();

        let reopened = ConflictRegistry::open(store, Arc::new(SystemClock))
            .await
            .unwrap();
        assert_eq!(reopened.all().await.len(), 1);
    }
}
