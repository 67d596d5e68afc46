//! # meridian-core: Pure Sync Logic for Meridian POS
//!
//! This crate contains the deterministic heart of the offline-first
//! sync engine: the data model, conflict classification, and
//! resolution strategies. All of it is pure functions with zero I/O
//! dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Meridian POS Sync Architecture                      │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  meridian-sync (engine crate)                   │   │
//! │  │   OperationLog ── EntityCache ── Coordinator ── Monitor         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ meridian-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐   │   │
//! │  │   │   types   │  │  conflict │  │  detect   │  │  resolve  │   │   │
//! │  │   │ SyncOp    │  │ Conflict  │  │ classify  │  │ LWW/Merge │   │   │
//! │  │   │ SyncState │  │ Strategy  │  │ priority  │  │ Manual    │   │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘   │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Sync data model (SyncOperation, SyncState, EntityRecord, StorageStats)
//! - [`conflict`] - Conflict record, kinds, and resolution strategies
//! - [`detect`] - Conflict classification in priority order
//! - [`resolve`] - Pure resolution strategy functions
//! - [`error`] - Core error types
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: every function is deterministic - same input = same output
//! 2. **No I/O**: database, network, file system access is FORBIDDEN here
//! 3. **Exhaustive Enums**: operation/conflict/strategy kinds are tagged
//!    unions - a new kind cannot silently fall through a default branch
//! 4. **Explicit Errors**: all errors are typed, never strings or panics
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::Utc;
//! use serde_json::json;
//! use meridian_core::{detect, resolve, EntityKind, EntityRecord, OperationKind, ResolutionStrategy};
//!
//! let now = Utc::now();
//! let local = EntityRecord::new("item-1", 3, now, json!({"price": 10}));
//! let remote = EntityRecord::new("item-1", 3, now, json!({"price": 12}));
//!
//! // Same version, different payloads: concurrent update.
//! let conflict = detect::detect(
//!     EntityKind::MenuItem, "item-1",
//!     Some(&local), Some(&remote),
//!     OperationKind::Update, now,
//! ).expect("divergent snapshots");
//!
//! // Ties favor remote: the server is the tiebreak authority.
//! let resolution = resolve::resolve(&conflict, ResolutionStrategy::LastWriteWins, None, now).unwrap();
//! assert_eq!(resolution.data["price"], 12);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod conflict;
pub mod detect;
pub mod error;
pub mod resolve;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use conflict::{Conflict, ConflictKind, Resolution, ResolutionStrategy};
pub use error::{CoreError, CoreResult};
pub use types::{
    AlertLevel, EntityKind, EntityRecord, OperationKind, StorageAlert, StorageStats, SyncOperation,
    SyncState, CRITICAL_THRESHOLD, NEAR_LIMIT_THRESHOLD,
};
