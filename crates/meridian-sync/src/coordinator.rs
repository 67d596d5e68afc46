//! # Sync Coordinator
//!
//! Drives pull/push cycles per branch and owns per-branch sync state.
//!
//! ## Cycle State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Per-Branch Sync Cycle                          │
//! │                                                                     │
//! │   Idle ──► Pulling ──► {PullOk, PullFailed}                         │
//! │                              │                                      │
//! │                              ▼                                      │
//! │            Pushing ──► {PushOk, PushFailed} ──► Idle                │
//! │                                                                     │
//! │  PULL: fetch authoritative collections; success → batch_replace     │
//! │        + lastPullAt; failure → lastPullFailed, cache untouched      │
//! │        (stale-but-available)                                        │
//! │                                                                     │
//! │  PUSH: branch queue in FIFO order                                   │
//! │        • Applied          → remove from log                         │
//! │        • VersionConflict  → detector + registry; STOP queue         │
//! │        • DuplicateKey     → detector + registry; STOP queue         │
//! │        • Transient        → retry+1, backoff stamp; STOP queue      │
//! │        A later operation never applies before an earlier one that   │
//! │        failed.                                                      │
//! │                                                                     │
//! │  Overlapping triggers (timer + manual + connectivity-regained)      │
//! │  coalesce: at most ONE in-flight cycle per branch, enforced by a    │
//! │  per-branch try-lock.                                               │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use meridian_core::{
    detect, EntityKind, EntityRecord, OperationKind, ResolutionStrategy, SyncOperation, SyncState,
};

use crate::cache::EntityCache;
use crate::config::SyncConfig;
use crate::conflicts::ConflictRegistry;
use crate::error::{SyncError, SyncResult};
use crate::oplog::OperationLog;
use crate::remote::{PushOutcome, RemoteApi};
use crate::store::{Clock, KeyValueStore};

/// Retry count past which an operation is warn-logged on every further
/// attempt. Nothing is dropped: there is no retry cap, only noise.
const RETRY_WARN_THRESHOLD: u32 = 10;

fn state_key(branch_id: &str) -> String {
    format!("sync/state/{branch_id}")
}

// =============================================================================
// Sync Phase
// =============================================================================

/// Where a branch currently is in its cycle, for external queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No cycle in flight.
    Idle,
    /// Fetching authoritative collections.
    Pulling,
    /// Pull finished successfully.
    PullOk,
    /// Pull failed; cache left stale-but-available.
    PullFailed,
    /// Replaying the branch queue.
    Pushing,
    /// Every queued operation applied.
    PushOk,
    /// Push stopped early (transient failure, conflict, or backoff).
    PushFailed,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Pulling => "pulling",
            SyncPhase::PullOk => "pull_ok",
            SyncPhase::PullFailed => "pull_failed",
            SyncPhase::Pushing => "pushing",
            SyncPhase::PushOk => "push_ok",
            SyncPhase::PushFailed => "push_failed",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Cycle Report
// =============================================================================

/// Why a push pass over the branch queue ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushStop {
    /// Every queued operation applied.
    Drained,
    /// An operation hit a transient failure; the rest stay queued.
    Transient,
    /// An operation raised a conflict awaiting resolution.
    Conflict,
    /// The head operation's retry backoff has not elapsed yet.
    BackoffPending,
}

/// Summary of one pull/push cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Whether the pull succeeded.
    pub pulled: bool,
    /// Operations confirmed applied (or found already discarded).
    pub applied: usize,
    /// Conflicts recorded this cycle.
    pub conflicts: usize,
    /// Why the push pass ended.
    pub push_stop: PushStop,
    /// Queue length after the cycle.
    pub pending: usize,
}

// =============================================================================
// Branch Slot
// =============================================================================

/// Per-branch coalescing lock and phase marker.
struct BranchSlot {
    cycle: Mutex<()>,
    phase: RwLock<SyncPhase>,
}

impl BranchSlot {
    fn new() -> Self {
        BranchSlot {
            cycle: Mutex::new(()),
            phase: RwLock::new(SyncPhase::Idle),
        }
    }

    async fn set_phase(&self, phase: SyncPhase) {
        *self.phase.write().await = phase;
    }
}

// =============================================================================
// Sync Coordinator
// =============================================================================

/// Orchestrates pull/push cycles. Constructed with injected
/// persistence, clock, and network capabilities - no hidden globals.
pub struct SyncCoordinator {
    remote: Arc<dyn RemoteApi>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: Arc<SyncConfig>,
    oplog: Arc<OperationLog>,
    cache: Arc<EntityCache>,
    conflicts: Arc<ConflictRegistry>,
    branches: RwLock<HashMap<String, Arc<BranchSlot>>>,
    states: RwLock<HashMap<String, SyncState>>,
}

impl SyncCoordinator {
    /// Creates a coordinator over already-opened components.
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: Arc<SyncConfig>,
        oplog: Arc<OperationLog>,
        cache: Arc<EntityCache>,
        conflicts: Arc<ConflictRegistry>,
    ) -> Self {
        SyncCoordinator {
            remote,
            store,
            clock,
            config,
            oplog,
            cache,
            conflicts,
            branches: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
        }
    }

    // =========================================================================
    // Caller Entry Points
    // =========================================================================

    /// Queues a mutation that could not be applied remotely and
    /// speculatively upserts the local cache so reads see it at once.
    pub async fn enqueue_local_mutation(
        &self,
        kind: OperationKind,
        entity_kind: EntityKind,
        entity_id: &str,
        payload: Value,
        branch_id: &str,
    ) -> SyncResult<SyncOperation> {
        let op = self
            .oplog
            .enqueue(kind, entity_kind, entity_id, payload.clone(), branch_id)
            .await?;

        let now = self.clock.now();
        match kind {
            OperationKind::Create | OperationKind::Update => {
                let local = self.cache.get(entity_kind, entity_id).await;
                let version = local.map_or(0, |r| r.version);
                self.cache
                    .upsert_one(entity_kind, EntityRecord::new(entity_id, version, now, payload))
                    .await?;
            }
            OperationKind::Delete => {
                let version = self
                    .cache
                    .get(entity_kind, entity_id)
                    .await
                    .map_or(0, |r| r.version);
                self.cache
                    .upsert_one(entity_kind, EntityRecord::tombstone(entity_id, version, now))
                    .await?;
            }
        }

        // Keep the published pending count honest between cycles.
        self.touch_pending(branch_id).await;
        self.slot(branch_id).await;

        Ok(op)
    }

    /// Runs one pull/push cycle for a branch.
    ///
    /// Returns [`SyncError::AlreadyInFlight`] when a cycle is already
    /// running for this branch; callers treating the in-flight cycle
    /// as their own should use [`trigger`](Self::trigger) instead.
    pub async fn sync_branch(&self, branch_id: &str) -> SyncResult<CycleReport> {
        let slot = self.slot(branch_id).await;
        let _guard = slot
            .cycle
            .try_lock()
            .map_err(|_| SyncError::AlreadyInFlight(branch_id.to_string()))?;

        debug!(branch_id = %branch_id, "Starting sync cycle");

        // ---- Pull phase -----------------------------------------------------
        slot.set_phase(SyncPhase::Pulling).await;
        let pulled = self.pull(branch_id).await;
        slot.set_phase(if pulled {
            SyncPhase::PullOk
        } else {
            SyncPhase::PullFailed
        })
        .await;

        // ---- Push phase -----------------------------------------------------
        slot.set_phase(SyncPhase::Pushing).await;
        let (applied, conflicts, push_stop) = self.push(branch_id).await?;
        slot.set_phase(if push_stop == PushStop::Drained {
            SyncPhase::PushOk
        } else {
            SyncPhase::PushFailed
        })
        .await;

        // ---- Finalize state -------------------------------------------------
        let pending = self.oplog.pending_for(branch_id).await;
        let now = self.clock.now();

        let mut states = self.states.write().await;
        let state = match states.get(branch_id) {
            Some(s) => s.clone(),
            None => self.load_state(branch_id).await?,
        };

        let mut state = state;
        state.pending_operations = pending;
        state.last_pull_failed = !pulled;
        if pulled {
            state.last_pull_at = Some(now);
        }
        if push_stop == PushStop::Drained {
            state.last_push_at = Some(now);
        }
        // Reaching the remote at all (even to be told "conflict")
        // counts as online; a transient stop or failed pull does not.
        // An empty queue draining proves nothing.
        state.online = pulled || applied > 0 || push_stop == PushStop::Conflict;

        self.persist_state(&state).await?;
        states.insert(branch_id.to_string(), state);
        drop(states);

        slot.set_phase(SyncPhase::Idle).await;

        info!(
            branch_id = %branch_id,
            pulled,
            applied,
            conflicts,
            pending,
            stop = ?push_stop,
            "Sync cycle complete"
        );

        Ok(CycleReport {
            pulled,
            applied,
            conflicts,
            push_stop,
            pending,
        })
    }

    /// Trigger that coalesces with an in-flight cycle: used by the
    /// periodic timer and the connectivity-regained transition.
    /// Returns `None` when another cycle was already running.
    pub async fn trigger(&self, branch_id: &str) -> SyncResult<Option<CycleReport>> {
        match self.sync_branch(branch_id).await {
            Ok(report) => Ok(Some(report)),
            Err(SyncError::AlreadyInFlight(_)) => {
                debug!(branch_id = %branch_id, "Cycle already in flight, coalescing");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Connectivity-regained transition: kick a coalesced cycle.
    pub async fn connectivity_regained(&self, branch_id: &str) -> SyncResult<Option<CycleReport>> {
        info!(branch_id = %branch_id, "Connectivity regained");
        self.trigger(branch_id).await
    }

    /// Resolves a conflict and re-submits the reconciled payload
    /// through the normal push path: the registry records the
    /// resolution, a fresh Update operation is enqueued for the
    /// branch, and the cache is speculatively updated.
    pub async fn resolve_conflict(
        &self,
        branch_id: &str,
        conflict_id: &str,
        strategy: ResolutionStrategy,
        actor_id: &str,
        manual_payload: Option<Value>,
    ) -> SyncResult<SyncOperation> {
        let conflict = self
            .conflicts
            .get(conflict_id)
            .await
            .ok_or_else(|| SyncError::ConflictNotFound(conflict_id.to_string()))?;

        let resolution = self
            .conflicts
            .resolve(conflict_id, strategy, actor_id, manual_payload)
            .await?;

        let op = self
            .oplog
            .enqueue(
                OperationKind::Update,
                conflict.entity_kind,
                &conflict.entity_id,
                resolution.data.clone(),
                branch_id,
            )
            .await?;

        self.cache
            .upsert_one(
                conflict.entity_kind,
                EntityRecord::new(
                    &conflict.entity_id,
                    resolution.version,
                    resolution.updated_at,
                    resolution.data,
                ),
            )
            .await?;

        self.touch_pending(branch_id).await;
        Ok(op)
    }

    /// Current sync state for a branch.
    pub async fn sync_state(&self, branch_id: &str) -> SyncResult<SyncState> {
        if let Some(state) = self.states.read().await.get(branch_id) {
            return Ok(state.clone());
        }
        self.load_state(branch_id).await
    }

    /// Pending operation count for a branch.
    pub async fn pending_operations(&self, branch_id: &str) -> usize {
        self.oplog.pending_for(branch_id).await
    }

    /// Current cycle phase for a branch.
    pub async fn phase(&self, branch_id: &str) -> SyncPhase {
        match self.branches.read().await.get(branch_id) {
            Some(slot) => *slot.phase.read().await,
            None => SyncPhase::Idle,
        }
    }

    /// Branches known to the coordinator (registered or queued).
    pub async fn known_branches(&self) -> Vec<String> {
        let mut branches: Vec<String> = self.branches.read().await.keys().cloned().collect();
        for op in self.oplog.list().await {
            if !branches.contains(&op.branch_id) {
                branches.push(op.branch_id);
            }
        }
        branches
    }

    // =========================================================================
    // Pull
    // =========================================================================

    async fn pull(&self, branch_id: &str) -> bool {
        match self.remote.pull(branch_id).await {
            Ok(batch) => {
                for (kind, records) in batch.collections {
                    if let Err(e) = self.cache.batch_replace(kind, records).await {
                        error!(branch_id = %branch_id, kind = %kind, error = %e, "Failed to cache pulled collection");
                        return false;
                    }
                }
                true
            }
            Err(e) => {
                // Stale-but-available: the cache is left untouched.
                warn!(branch_id = %branch_id, error = %e, "Pull failed, serving stale cache");
                false
            }
        }
    }

    // =========================================================================
    // Push
    // =========================================================================

    async fn push(&self, branch_id: &str) -> SyncResult<(usize, usize, PushStop)> {
        let queue = self.oplog.list_branch(branch_id).await;
        let mut applied = 0;
        let mut conflicts = 0;

        for op in queue {
            // Backoff gate: a retried operation whose window has not
            // elapsed stops the queue - later operations must not
            // overtake it.
            if !self.backoff_elapsed(&op) {
                debug!(id = %op.id, retry_count = op.retry_count, "Backoff pending, stopping queue");
                return Ok((applied, conflicts, PushStop::BackoffPending));
            }

            match self.remote.push(&op).await? {
                PushOutcome::Applied => {
                    // A missing id means the monitor trimmed it out
                    // from under us: already applied/discarded.
                    self.oplog.remove(&op.id).await?;
                    applied += 1;
                }

                PushOutcome::VersionConflict(remote_snapshot) => {
                    if self.handle_version_clash(&op, remote_snapshot).await? {
                        conflicts += 1;
                        return Ok((applied, conflicts, PushStop::Conflict));
                    }
                    // Converged (equal versions and payloads): the
                    // remote already has this state.
                    self.oplog.remove(&op.id).await?;
                    applied += 1;
                }

                PushOutcome::DuplicateKey(existing) => {
                    let local = self.local_snapshot(&op).await;
                    let conflict = detect::detect_duplicate(
                        op.entity_kind,
                        &op.entity_id,
                        local.as_ref(),
                        &existing,
                        op.kind,
                        self.clock.now(),
                    );
                    self.conflicts.record(conflict).await?;
                    conflicts += 1;
                    return Ok((applied, conflicts, PushStop::Conflict));
                }

                PushOutcome::Transient(reason) => {
                    let mut retried = op.clone();
                    retried.retry_count += 1;
                    retried.attempted_at = Some(self.clock.now());

                    if retried.retry_count > RETRY_WARN_THRESHOLD {
                        warn!(
                            id = %retried.id,
                            retry_count = retried.retry_count,
                            reason = %reason,
                            "Operation keeps failing; no retry cap is enforced"
                        );
                    } else {
                        debug!(id = %retried.id, retry_count = retried.retry_count, reason = %reason, "Transient push failure");
                    }

                    self.oplog.update(&retried).await?;
                    return Ok((applied, conflicts, PushStop::Transient));
                }
            }
        }

        Ok((applied, conflicts, PushStop::Drained))
    }

    /// Records a conflict for a version clash. Returns `false` when
    /// the detector classifies the clash as convergence (no conflict).
    async fn handle_version_clash(
        &self,
        op: &SyncOperation,
        remote_snapshot: Option<EntityRecord>,
    ) -> SyncResult<bool> {
        let local = self.local_snapshot(op).await;

        match detect::detect(
            op.entity_kind,
            &op.entity_id,
            local.as_ref(),
            remote_snapshot.as_ref(),
            op.kind,
            self.clock.now(),
        ) {
            Some(conflict) => {
                self.conflicts.record(conflict).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The local snapshot the detector compares against: the cached
    /// record, or one synthesized from the queued payload when the
    /// entity was never cached.
    async fn local_snapshot(&self, op: &SyncOperation) -> Option<EntityRecord> {
        if let Some(record) = self.cache.get(op.entity_kind, &op.entity_id).await {
            return Some(record);
        }

        match op.kind {
            OperationKind::Create | OperationKind::Update => Some(EntityRecord::new(
                &op.entity_id,
                0,
                op.enqueued_at,
                op.payload.clone(),
            )),
            OperationKind::Delete => None,
        }
    }

    /// Exponential backoff: `initial * 2^(retry-1)`, capped at the
    /// configured ceiling. An operation that has never been attempted
    /// is always ready.
    fn backoff_elapsed(&self, op: &SyncOperation) -> bool {
        let attempted_at = match (op.retry_count, op.attempted_at) {
            (0, _) | (_, None) => return true,
            (_, Some(at)) => at,
        };

        let initial_ms = self.config.sync.initial_backoff_ms as i64;
        let max_ms = self.config.sync.max_backoff_secs as i64 * 1000;
        let exp = op.retry_count.saturating_sub(1).min(20);
        let delay_ms = initial_ms.saturating_mul(1i64 << exp).min(max_ms);

        self.clock.now() >= attempted_at + Duration::milliseconds(delay_ms)
    }

    // =========================================================================
    // State Persistence
    // =========================================================================

    async fn load_state(&self, branch_id: &str) -> SyncResult<SyncState> {
        match self.store.get(&state_key(branch_id)).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(SyncState::new(branch_id)),
        }
    }

    async fn persist_state(&self, state: &SyncState) -> SyncResult<()> {
        let bytes = serde_json::to_vec(state)?;
        self.store.set(&state_key(&state.branch_id), bytes).await
    }

    /// Refreshes the published pending count outside a full cycle.
    async fn touch_pending(&self, branch_id: &str) {
        let pending = self.oplog.pending_for(branch_id).await;
        let mut states = self.states.write().await;
        let state = states
            .entry(branch_id.to_string())
            .or_insert_with(|| SyncState::new(branch_id));
        state.pending_operations = pending;
    }

    async fn slot(&self, branch_id: &str) -> Arc<BranchSlot> {
        if let Some(slot) = self.branches.read().await.get(branch_id) {
            return slot.clone();
        }

        let mut branches = self.branches.write().await;
        branches
            .entry(branch_id.to_string())
            .or_insert_with(|| Arc::new(BranchSlot::new()))
            .clone()
    }
}

// =============================================================================
// Periodic Runner
// =============================================================================

/// Handle for controlling the periodic sync loop.
#[derive(Clone)]
pub struct CoordinatorHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl CoordinatorHandle {
    /// Stops the periodic loop. In-flight cycles finish on their own.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Spawns the periodic timer loop: every `pull_interval_secs`, each
/// known branch gets a coalesced sync trigger.
pub fn spawn_periodic(coordinator: Arc<SyncCoordinator>) -> CoordinatorHandle {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    let interval_secs = coordinator.config.sync.pull_interval_secs;

    tokio::spawn(async move {
        info!(interval_secs, "Periodic sync loop starting");

        let mut interval = tokio::time::interval(StdDuration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup and the
        // first cycle do not race embedders still wiring things up.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for branch_id in coordinator.known_branches().await {
                        if let Err(e) = coordinator.trigger(&branch_id).await {
                            error!(branch_id = %branch_id, error = %e, "Periodic sync failed");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Periodic sync loop shutting down");
                    break;
                }
            }
        }
    });

    CoordinatorHandle { shutdown_tx }
}

// =============================================================================
// Unit Tests
// =============================================================================
