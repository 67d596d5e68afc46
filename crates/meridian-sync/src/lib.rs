//! # Meridian Sync
//!
//! Offline-first synchronization engine for multi-branch POS
//! deployments. Each branch keeps a local operation log and entity
//! cache, pushes queued mutations to the central system in order, and
//! reconciles divergence through explicit conflict records.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        meridian-sync                                │
//! │                                                                     │
//! │            ┌──────────────────────────────────┐                     │
//! │            │        SyncCoordinator           │                     │
//! │            │  pull → cache, push → remote     │                     │
//! │            │  per-branch FIFO, coalesced      │                     │
//! │            └───┬─────────┬──────────┬─────────┘                     │
//! │                │         │          │                               │
//! │        ┌───────▼──┐ ┌────▼─────┐ ┌──▼─────────────┐                │
//! │        │ Operation│ │  Entity  │ │   Conflict     │                │
//! │        │   Log    │ │  Cache   │ │   Registry     │                │
//! │        └───────┬──┘ └────┬─────┘ └──┬─────────────┘                │
//! │                │         │          │                               │
//! │        ┌───────▼─────────▼──────────▼─────────┐                     │
//! │        │     KeyValueStore (injected)         │                     │
//! │        └──────────────────────────────────────┘                     │
//! │                                                                     │
//! │  StorageMonitor ── thresholds + emergency cleanup (oplog, cache)    │
//! │  RemoteApi / StorageEstimator / Clock ── injected capabilities      │
//! │                                                                     │
//! │  Pure conflict detection and resolution live in meridian-core.      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use meridian_sync::{
//!     spawn_monitor, spawn_periodic, EntityCache, ConflictRegistry, MemoryStore,
//!     OperationLog, StorageMonitor, SyncConfig, SyncCoordinator, SystemClock,
//! };
//! # use meridian_sync::{RemoteApi, StorageEstimator};
//! # async fn run(remote: Arc<dyn RemoteApi>, estimator: Arc<dyn StorageEstimator>)
//! #     -> meridian_sync::SyncResult<()> {
//! let store = Arc::new(MemoryStore::new());
//! let clock = Arc::new(SystemClock);
//! let config = Arc::new(SyncConfig::load_or_default(None)?);
//!
//! let oplog = Arc::new(OperationLog::open(store.clone(), clock.clone()).await?);
//! let cache = Arc::new(EntityCache::open(store.clone()).await?);
//! let conflicts = Arc::new(ConflictRegistry::open(store.clone(), clock.clone()).await?);
//!
//! let coordinator = Arc::new(SyncCoordinator::new(
//!     remote, store, clock.clone(), config.clone(),
//!     oplog.clone(), cache.clone(), conflicts,
//! ));
//! let monitor = Arc::new(StorageMonitor::new(
//!     estimator, clock, config, oplog, cache,
//! ));
//!
//! let sync_handle = spawn_periodic(coordinator.clone());
//! let monitor_handle = spawn_monitor(monitor);
//!
//! coordinator.sync_branch("branch-a").await?;
//!
//! sync_handle.shutdown().await;
//! monitor_handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod conflicts;
pub mod coordinator;
pub mod error;
pub mod monitor;
pub mod oplog;
pub mod remote;
pub mod store;

pub use cache::EntityCache;
pub use config::{StorageSettings, SyncConfig, SyncSettings};
pub use conflicts::ConflictRegistry;
pub use coordinator::{
    spawn_periodic, CoordinatorHandle, CycleReport, PushStop, SyncCoordinator, SyncPhase,
};
pub use error::{SyncError, SyncResult};
pub use monitor::{
    spawn_monitor, AlertCallback, CheckOutcome, MonitorHandle, StorageMonitor, SubscriptionId,
};
pub use oplog::OperationLog;
pub use remote::{PullBatch, PushOutcome, RemoteApi};
pub use store::{
    Clock, KeyValueStore, ManualClock, MemoryStore, StorageEstimator, SystemClock, UsageEstimate,
};

// Re-export the pure core so embedders need a single dependency.
pub use meridian_core::{
    AlertLevel, Conflict, ConflictKind, EntityKind, EntityRecord, OperationKind, Resolution,
    ResolutionStrategy, StorageAlert, StorageStats, SyncOperation, SyncState,
};
