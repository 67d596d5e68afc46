//! # Operation Log
//!
//! Durable, ordered queue of pending mutations awaiting remote
//! application.
//!
//! ## Guarantees
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       Operation Log                                 │
//! │                                                                     │
//! │  enqueue ──► append with fresh id, retry 0, clock-now timestamp     │
//! │              persisted IMMEDIATELY (no batching): nothing is lost   │
//! │              on a crash between enqueue and first flush             │
//! │                                                                     │
//! │  list    ──► pending operations in enqueue order                    │
//! │  remove  ──► after confirmed remote success; a missing id is a      │
//! │              no-op (the monitor may have trimmed it concurrently)   │
//! │  update  ──► persists a mutated copy (retry bump)                   │
//! │  trim    ──► monitor-only emergency discard of the oldest entries   │
//! │                                                                     │
//! │  Operations for one branch are NEVER reordered: reordering can     │
//! │  corrupt derived totals such as per-shift revenue.                  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use meridian_core::{EntityKind, OperationKind, SyncOperation};

use crate::error::SyncResult;
use crate::store::{Clock, KeyValueStore};

/// Storage key for the persisted queue.
const OPLOG_KEY: &str = "sync/oplog";

// =============================================================================
// Operation Log
// =============================================================================

/// Durable FIFO queue of pending sync operations, write-through to the
/// injected key-value store.
pub struct OperationLog {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ops: RwLock<Vec<SyncOperation>>,
}

impl OperationLog {
    /// Opens the log, loading any persisted queue from the store.
    pub async fn open(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> SyncResult<Self> {
        let ops = match store.get(OPLOG_KEY).await? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        };

        debug!(pending = ops.len(), "Opened operation log");

        Ok(OperationLog {
            store,
            clock,
            ops: RwLock::new(ops),
        })
    }

    /// Appends a new operation and persists before returning.
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        entity_kind: EntityKind,
        entity_id: &str,
        payload: Value,
        branch_id: &str,
    ) -> SyncResult<SyncOperation> {
        let op = SyncOperation::new(
            kind,
            entity_kind,
            entity_id,
            payload,
            branch_id,
            self.clock.now(),
        );

        let mut ops = self.ops.write().await;
        ops.push(op.clone());
        self.persist(&ops).await?;

        debug!(
            id = %op.id,
            kind = %op.kind,
            entity_kind = %op.entity_kind,
            branch_id = %op.branch_id,
            "Enqueued operation"
        );

        Ok(op)
    }

    /// All pending operations in enqueue order.
    pub async fn list(&self) -> Vec<SyncOperation> {
        self.ops.read().await.clone()
    }

    /// Pending operations for one branch, in enqueue order.
    pub async fn list_branch(&self, branch_id: &str) -> Vec<SyncOperation> {
        self.ops
            .read()
            .await
            .iter()
            .filter(|op| op.branch_id == branch_id)
            .cloned()
            .collect()
    }

    /// Removes an operation after confirmed remote success.
    ///
    /// Returns `false` when the id is no longer present: the storage
    /// monitor may have trimmed it out from under an in-flight push,
    /// which the caller must treat as already applied/discarded.
    pub async fn remove(&self, id: &str) -> SyncResult<bool> {
        let mut ops = self.ops.write().await;
        let before = ops.len();
        ops.retain(|op| op.id != id);

        if ops.len() == before {
            debug!(id = %id, "Operation already gone, treating as discarded");
            return Ok(false);
        }

        self.persist(&ops).await?;
        Ok(true)
    }

    /// Persists a mutated copy of an operation (retry count bump).
    ///
    /// An operation that no longer exists is ignored for the same
    /// reason as [`remove`](Self::remove).
    pub async fn update(&self, updated: &SyncOperation) -> SyncResult<()> {
        let mut ops = self.ops.write().await;

        match ops.iter_mut().find(|op| op.id == updated.id) {
            Some(op) => *op = updated.clone(),
            None => {
                debug!(id = %updated.id, "Update target already gone, skipping");
                return Ok(());
            }
        }

        self.persist(&ops).await
    }

    /// Number of pending operations across all branches.
    pub async fn len(&self) -> usize {
        self.ops.read().await.len()
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.ops.read().await.is_empty()
    }

    /// Number of pending operations for one branch.
    pub async fn pending_for(&self, branch_id: &str) -> usize {
        self.ops
            .read()
            .await
            .iter()
            .filter(|op| op.branch_id == branch_id)
            .count()
    }

    /// Emergency trim: keeps only the most recent `keep` entries,
    /// discarding the oldest and preserving the relative order of
    /// survivors. Returns the discarded operations.
    ///
    /// Called only by the storage budget monitor under critical
    /// pressure. Discarded entries may never have been pushed; the
    /// caller is expected to log that.
    pub async fn trim_to_most_recent(&self, keep: usize) -> SyncResult<Vec<SyncOperation>> {
        let mut ops = self.ops.write().await;

        if ops.len() <= keep {
            return Ok(Vec::new());
        }

        let cut = ops.len() - keep;
        let discarded: Vec<SyncOperation> = ops.drain(..cut).collect();
        self.persist(&ops).await?;

        warn!(
            discarded = discarded.len(),
            retained = ops.len(),
            "Emergency-trimmed operation log"
        );

        Ok(discarded)
    }

    async fn persist(&self, ops: &[SyncOperation]) -> SyncResult<()> {
        let bytes = serde_json::to_vec(ops)?;
        self.store.set(OPLOG_KEY, bytes).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SystemClock};
    use serde_json::json;

    async fn open_log() -> (Arc<MemoryStore>, OperationLog) {
        let store = Arc::new(MemoryStore::new());
        let log = OperationLog::open(store.clone(), Arc::new(SystemClock))
            .await
            .unwrap();
        (store, log)
    }

    async fn enqueue_n(log: &OperationLog, branch: &str, n: usize) -> Vec<SyncOperation> {
        let mut out = Vec::new();
        for i in 0..n {
            let op = log
                .enqueue(
                    OperationKind::Create,
                    EntityKind::Order,
                    &format!("order-{i}"),
                    json!({"seq": i}),
                    branch,
                )
                .await
                .unwrap();
            out.push(op);
        }
        out
    }

    #[tokio::test]
    async fn test_enqueue_preserves_order() {
        let (_, log) = open_log().await;
        let ops = enqueue_n(&log, "branch-a", 3).await;

        let listed = log.list_branch("branch-a").await;
        let ids: Vec<_> = listed.iter().map(|op| op.id.clone()).collect();
        let expected: Vec<_> = ops.iter().map(|op| op.id.clone()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_enqueue_persists_immediately() {
        let (store, log) = open_log().await;
        enqueue_n(&log, "branch-a", 1).await;

        // Reopen from the same store: the operation must survive.
        let reopened = OperationLog::open(store, Arc::new(SystemClock))
            .await
            .unwrap();
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let (_, log) = open_log().await;
        enqueue_n(&log, "branch-a", 1).await;
        assert!(!log.remove("no-such-id").await.unwrap());
        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_bumps_retry_count() {
        let (_, log) = open_log().await;
        let mut op = enqueue_n(&log, "branch-a", 1).await.remove(0);
        op.retry_count += 1;
        log.update(&op).await.unwrap();

        let listed = log.list_branch("branch-a").await;
        assert_eq!(listed[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_branches_are_isolated() {
        let (_, log) = open_log().await;
        enqueue_n(&log, "branch-a", 2).await;
        enqueue_n(&log, "branch-b", 3).await;

        assert_eq!(log.pending_for("branch-a").await, 2);
        assert_eq!(log.pending_for("branch-b").await, 3);
        assert_eq!(log.len().await, 5);
    }

    #[tokio::test]
    async fn test_trim_keeps_most_recent() {
        let (_, log) = open_log().await;
        let ops = enqueue_n(&log, "branch-a", 150).await;

        let discarded = log.trim_to_most_recent(100).await.unwrap();
        assert_eq!(discarded.len(), 50);
        assert_eq!(log.len().await, 100);

        // The 50 oldest are gone; the survivors are the most recent
        // 100 in their original order.
        let remaining = log.list().await;
        let expected: Vec<_> = ops[50..].iter().map(|op| op.id.clone()).collect();
        let actual: Vec<_> = remaining.iter().map(|op| op.id.clone()).collect();
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_trim_below_bound_is_noop() {
        let (_, log) = open_log().await;
        enqueue_n(&log, "branch-a", 10).await;
        let discarded = log.trim_to_most_recent(100).await.unwrap();
        assert!(discarded.is_empty());
        assert_eq!(log.len().await, 10);
    }

    #[tokio::test]
    async fn test_trim_twice_is_idempotent() {
        let (_, log) = open_log().await;
        enqueue_n(&log, "branch-a", 150).await;

        log.trim_to_most_recent(100).await.unwrap();
        let first: Vec<_> = log.list().await.iter().map(|op| op.id.clone()).collect();

        let second_discard = log.trim_to_most_recent(100).await.unwrap();
        assert!(second_discard.is_empty());
        let second: Vec<_> = log.list().await.iter().map(|op| op.id.clone()).collect();
        assert_eq!(first, second);
    }
}
