//! # Remote System Contract
//!
//! The narrow interface the sync engine consumes from the central
//! system. The wire transport behind it is someone else's problem:
//! this engine never sees URLs, sockets, or retries below the
//! operation level.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  pull(branch)  → per-kind collections with {version, timestamp}    │
//! │                  per record                                         │
//! │  push(op)      → Applied                                           │
//! │                | VersionConflict(remote snapshot)                   │
//! │                | DuplicateKey(existing record)                      │
//! │                | Transient(reason)                                  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use async_trait::async_trait;

use meridian_core::{EntityKind, EntityRecord, SyncOperation};

use crate::error::SyncResult;

// =============================================================================
// Pull
// =============================================================================

/// Authoritative per-type collections returned by a pull.
#[derive(Debug, Clone, Default)]
pub struct PullBatch {
    /// One collection per entity kind. Kinds absent from the map were
    /// not included in this pull and leave the cache untouched.
    pub collections: HashMap<EntityKind, Vec<EntityRecord>>,
}

impl PullBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a collection for one kind (builder-style).
    pub fn with(mut self, kind: EntityKind, records: Vec<EntityRecord>) -> Self {
        self.collections.insert(kind, records);
        self
    }
}

// =============================================================================
// Push
// =============================================================================

/// Per-operation outcome of a remote push attempt.
#[derive(Debug, Clone)]
pub enum PushOutcome {
    /// The remote applied the operation; it can leave the queue.
    Applied,

    /// Version clash: the remote's current snapshot is returned for
    /// conflict detection. `None` means the remote no longer has the
    /// entity at all.
    VersionConflict(Option<EntityRecord>),

    /// Natural-key collision with an independently created record.
    DuplicateKey(EntityRecord),

    /// Transient failure (network, 5xx): the operation stays queued
    /// and is retried with backoff.
    Transient(String),
}

// =============================================================================
// Remote API
// =============================================================================

/// The remote system, injected into the coordinator.
///
/// Both calls perform network round-trips and may suspend.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Fetches authoritative per-type collections for a branch.
    ///
    /// An `Err` is a pull failure: the coordinator records it and
    /// leaves the cache stale-but-available.
    async fn pull(&self, branch_id: &str) -> SyncResult<PullBatch>;

    /// Attempts to apply one queued operation remotely.
    ///
    /// Application-level outcomes (conflict, duplicate, transient) are
    /// encoded in [`PushOutcome`], not in `Err`; `Err` is reserved for
    /// failures the coordinator cannot classify.
    async fn push(&self, operation: &SyncOperation) -> SyncResult<PushOutcome>;
}
