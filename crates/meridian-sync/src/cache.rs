//! # Local Entity Cache
//!
//! Read-through offline snapshot store, one ordered collection per
//! entity kind.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Local Entity Cache                             │
//! │                                                                     │
//! │  per EntityKind:  ┌──────────────────┐   ┌──────────────────────┐  │
//! │                   │ id → EntityRecord │   │ ordered id list     │  │
//! │                   │ (O(1) upsert)     │   │ (insertion order    │  │
//! │                   └──────────────────┘   │  preserved)          │  │
//! │                                           └──────────────────────┘  │
//! │                                                                     │
//! │  batch_replace ── wholesale replace after a successful pull         │
//! │  upsert_one    ── single speculative local write                    │
//! │  get_all       ── ordered collection, empty if never populated      │
//! │  evict_older_than ── monitor-only; the ONLY implicit removal path   │
//! │                                                                     │
//! │  Reads never block on network. No implicit expiry.                  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use meridian_core::{EntityKind, EntityRecord};

use crate::error::SyncResult;
use crate::store::KeyValueStore;

fn cache_key(kind: EntityKind) -> String {
    format!("cache/{}", kind.as_str())
}

// =============================================================================
// Collection
// =============================================================================

/// Id-indexed records plus a separate insertion-ordered id list.
#[derive(Debug, Default)]
struct Collection {
    index: HashMap<String, EntityRecord>,
    order: Vec<String>,
}

impl Collection {
    fn from_records(records: Vec<EntityRecord>) -> Self {
        let mut collection = Collection::default();
        for record in records {
            collection.upsert(record);
        }
        collection
    }

    fn upsert(&mut self, record: EntityRecord) {
        if !self.index.contains_key(&record.id) {
            self.order.push(record.id.clone());
        }
        self.index.insert(record.id.clone(), record);
    }

    fn ordered(&self) -> Vec<EntityRecord> {
        self.order
            .iter()
            .filter_map(|id| self.index.get(id).cloned())
            .collect()
    }

    /// Removes records older than `cutoff`; returns how many went.
    fn evict_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let stale: Vec<String> = self
            .index
            .values()
            .filter(|r| r.updated_at < cutoff)
            .map(|r| r.id.clone())
            .collect();

        for id in &stale {
            self.index.remove(id);
        }
        self.order.retain(|id| self.index.contains_key(id));

        stale.len()
    }
}

// =============================================================================
// Entity Cache
// =============================================================================

/// Offline snapshot store for each cacheable entity type, write-through
/// to the injected key-value store.
pub struct EntityCache {
    store: Arc<dyn KeyValueStore>,
    collections: RwLock<HashMap<EntityKind, Collection>>,
}

impl EntityCache {
    /// Opens the cache, loading every persisted collection.
    pub async fn open(store: Arc<dyn KeyValueStore>) -> SyncResult<Self> {
        let mut collections = HashMap::new();

        for kind in EntityKind::ALL {
            if let Some(bytes) = store.get(&cache_key(kind)).await? {
                let records: Vec<EntityRecord> = serde_json::from_slice(&bytes)?;
                debug!(kind = %kind, count = records.len(), "Loaded cached collection");
                collections.insert(kind, Collection::from_records(records));
            }
        }

        Ok(EntityCache {
            store,
            collections: RwLock::new(collections),
        })
    }

    /// Wholesale replacement after a successful pull.
    pub async fn batch_replace(
        &self,
        kind: EntityKind,
        records: Vec<EntityRecord>,
    ) -> SyncResult<()> {
        let mut collections = self.collections.write().await;
        let collection = Collection::from_records(records);
        self.persist(kind, &collection).await?;
        collections.insert(kind, collection);
        Ok(())
    }

    /// Single speculative local write (upsert by id).
    pub async fn upsert_one(&self, kind: EntityKind, record: EntityRecord) -> SyncResult<()> {
        let mut collections = self.collections.write().await;
        let collection = collections.entry(kind).or_default();
        collection.upsert(record);
        self.persist(kind, collection).await
    }

    /// The cached collection in insertion order; empty if never
    /// populated. Never blocks on network.
    pub async fn get_all(&self, kind: EntityKind) -> Vec<EntityRecord> {
        self.collections
            .read()
            .await
            .get(&kind)
            .map(Collection::ordered)
            .unwrap_or_default()
    }

    /// Single record lookup (used by the conflict detection path).
    pub async fn get(&self, kind: EntityKind, id: &str) -> Option<EntityRecord> {
        self.collections
            .read()
            .await
            .get(&kind)
            .and_then(|c| c.index.get(id).cloned())
    }

    /// Evicts records of `kind` older than `cutoff`. Monitor-only:
    /// this is the one path that drops cached data.
    pub async fn evict_older_than(
        &self,
        kind: EntityKind,
        cutoff: DateTime<Utc>,
    ) -> SyncResult<usize> {
        let mut collections = self.collections.write().await;

        let collection = match collections.get_mut(&kind) {
            Some(c) => c,
            None => return Ok(0),
        };

        let evicted = collection.evict_older_than(cutoff);
        if evicted > 0 {
            self.persist(kind, collection).await?;
            info!(kind = %kind, evicted, "Evicted stale cached records");
        }

        Ok(evicted)
    }

    async fn persist(&self, kind: EntityKind, collection: &Collection) -> SyncResult<()> {
        let bytes = serde_json::to_vec(&collection.ordered())?;
        self.store.set(&cache_key(kind), bytes).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
