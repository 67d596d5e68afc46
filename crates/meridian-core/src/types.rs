//! # Sync Data Model
//!
//! Core types shared by every component of the sync engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Sync Data Model                              │
//! │                                                                     │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐   │
//! │  │  SyncOperation  │   │    SyncState    │   │  EntityRecord   │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │   │
//! │  │  id (UUID)      │   │  branch_id      │   │  id             │   │
//! │  │  kind           │   │  online         │   │  version        │   │
//! │  │  payload (JSON) │   │  last_pull_at   │   │  updated_at     │   │
//! │  │  branch_id      │   │  last_push_at   │   │  deleted        │   │
//! │  │  retry_count    │   │  pending_ops    │   │  data (JSON)    │   │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘   │
//! │                                                                     │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐   │
//! │  │  OperationKind  │   │   EntityKind    │   │  StorageStats   │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │   │
//! │  │  Create         │   │  Order, Shift   │   │  usage_bytes    │   │
//! │  │  Update         │   │  MenuItem       │   │  quota_bytes    │   │
//! │  │  Delete         │   │  Inventory      │   │  percentage     │   │
//! │  └─────────────────┘   │  Customer       │   └─────────────────┘   │
//! │                        └─────────────────┘                          │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Payloads are opaque `serde_json::Value` blobs: their shape belongs to
//! the domain logic that created them, not to this engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// Operation Kind
// =============================================================================

/// The kind of mutation a queued operation represents.
///
/// Exhaustive by design: a new kind added here forces every `match` in
/// the engine to handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// A new entity created locally.
    Create,
    /// An existing entity modified locally.
    Update,
    /// An entity deleted locally.
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

// =============================================================================
// Entity Kind
// =============================================================================

/// The cacheable entity types of the POS domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Customer orders. Highest volume; first target of emergency eviction.
    Order,
    /// Menu items (products, modifiers, prices).
    MenuItem,
    /// Inventory levels per branch.
    Inventory,
    /// Customer records.
    Customer,
    /// Cashier shifts.
    Shift,
}

impl EntityKind {
    /// All entity kinds, in cache iteration order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Order,
        EntityKind::MenuItem,
        EntityKind::Inventory,
        EntityKind::Customer,
        EntityKind::Shift,
    ];

    /// Stable storage key segment for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Order => "order",
            EntityKind::MenuItem => "menu_item",
            EntityKind::Inventory => "inventory",
            EntityKind::Customer => "customer",
            EntityKind::Shift => "shift",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Sync Operation
// =============================================================================

/// A single pending mutation awaiting remote application.
///
/// Created when a mutation cannot be applied remotely at the time it
/// occurs; removed on confirmed remote success. Never reordered
/// relative to siblings of the same branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// What kind of mutation this is.
    pub kind: OperationKind,

    /// Entity type the mutation targets.
    pub entity_kind: EntityKind,

    /// ID of the entity being mutated.
    pub entity_id: String,

    /// Opaque domain payload (full entity JSON for create/update).
    pub payload: Value,

    /// Branch this operation belongs to (unit of sync isolation).
    pub branch_id: String,

    /// When the operation was enqueued.
    pub enqueued_at: DateTime<Utc>,

    /// Number of failed remote attempts so far.
    pub retry_count: u32,

    /// When the last remote attempt happened (None before the first).
    /// Drives retry backoff pacing.
    #[serde(default)]
    pub attempted_at: Option<DateTime<Utc>>,
}

impl SyncOperation {
    /// Creates a fresh operation with a new id and zero retries.
    pub fn new(
        kind: OperationKind,
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        payload: Value,
        branch_id: impl Into<String>,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        SyncOperation {
            id: Uuid::new_v4().to_string(),
            kind,
            entity_kind,
            entity_id: entity_id.into(),
            payload,
            branch_id: branch_id.into(),
            enqueued_at,
            retry_count: 0,
            attempted_at: None,
        }
    }
}

// =============================================================================
// Sync State
// =============================================================================

/// Per-branch synchronization state.
///
/// Mutated only by the sync coordinator after each pull/push cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Branch this state belongs to.
    pub branch_id: String,

    /// Whether the last cycle reached the remote system.
    pub online: bool,

    /// Last successful pull.
    pub last_pull_at: Option<DateTime<Utc>>,

    /// Last successful push cycle (all queued operations applied).
    pub last_push_at: Option<DateTime<Utc>>,

    /// Number of operations still queued for this branch.
    pub pending_operations: usize,

    /// Whether the most recent pull attempt failed.
    pub last_pull_failed: bool,
}

impl SyncState {
    /// Initial state for a branch that has never synced.
    pub fn new(branch_id: impl Into<String>) -> Self {
        SyncState {
            branch_id: branch_id.into(),
            online: false,
            last_pull_at: None,
            last_push_at: None,
            pending_operations: 0,
            last_pull_failed: false,
        }
    }
}

// =============================================================================
// Entity Record
// =============================================================================

/// One snapshot of a cacheable entity, local or remote.
///
/// Versions increase monotonically on the authoritative side. A version
/// collision with differing payloads means both sides edited from the
/// same base (see the conflict detector).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Entity identifier.
    pub id: String,

    /// Monotonic version counter.
    pub version: i64,

    /// When this snapshot was written.
    pub updated_at: DateTime<Utc>,

    /// Tombstone marker for deleted entities.
    #[serde(default)]
    pub deleted: bool,

    /// Opaque domain payload.
    pub data: Value,
}

impl EntityRecord {
    /// Creates a live (non-deleted) record.
    pub fn new(id: impl Into<String>, version: i64, updated_at: DateTime<Utc>, data: Value) -> Self {
        EntityRecord {
            id: id.into(),
            version,
            updated_at,
            deleted: false,
            data,
        }
    }

    /// Creates a tombstone for a deleted entity.
    pub fn tombstone(id: impl Into<String>, version: i64, updated_at: DateTime<Utc>) -> Self {
        EntityRecord {
            id: id.into(),
            version,
            updated_at,
            deleted: true,
            data: Value::Null,
        }
    }
}

// =============================================================================
// Storage Stats & Alerts
// =============================================================================

/// Warning threshold as a fraction of quota (80%).
pub const NEAR_LIMIT_THRESHOLD: f64 = 80.0;

/// Critical threshold as a fraction of quota (95%).
pub const CRITICAL_THRESHOLD: f64 = 95.0;

/// A point-in-time view of local storage usage. Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    /// Bytes currently used.
    pub usage_bytes: u64,

    /// Total quota in bytes.
    pub quota_bytes: u64,

    /// Usage as a percentage of quota (0.0 when quota is zero).
    pub percentage: f64,

    /// Usage has crossed the warning threshold (80% by default).
    pub near_limit: bool,

    /// Usage has crossed the critical threshold (95% by default).
    pub critical: bool,
}

impl StorageStats {
    /// Derives stats from raw usage and quota figures using the
    /// default thresholds.
    pub fn from_usage(usage_bytes: u64, quota_bytes: u64) -> Self {
        Self::with_thresholds(
            usage_bytes,
            quota_bytes,
            NEAR_LIMIT_THRESHOLD,
            CRITICAL_THRESHOLD,
        )
    }

    /// Derives stats with caller-supplied thresholds (percent of
    /// quota). The monitor passes its configured thresholds here.
    pub fn with_thresholds(
        usage_bytes: u64,
        quota_bytes: u64,
        warn_pct: f64,
        critical_pct: f64,
    ) -> Self {
        let percentage = if quota_bytes == 0 {
            0.0
        } else {
            usage_bytes as f64 / quota_bytes as f64 * 100.0
        };

        StorageStats {
            usage_bytes,
            quota_bytes,
            percentage,
            near_limit: percentage >= warn_pct,
            critical: percentage >= critical_pct,
        }
    }
}

/// Severity of a storage alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Usage crossed the warning threshold.
    Warning,
    /// Usage crossed the critical threshold; emergency cleanup ran.
    Critical,
}

/// A storage budget alert delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageAlert {
    /// Alert severity.
    pub level: AlertLevel,

    /// The stats that triggered the alert.
    pub stats: StorageStats,

    /// When the alert was raised.
    pub raised_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================
