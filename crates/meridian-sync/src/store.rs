//! # Injected Capabilities
//!
//! The persistence boundary of the engine. The core depends on a
//! generic durable key-value capability and a storage-usage estimation
//! capability; neither is implemented here beyond the in-memory test
//! double. The platform embedding this engine supplies the real ones.
//!
//! ## Capability Seams
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  KeyValueStore     get/set/remove by key (oplog, cache, state)      │
//! │  StorageEstimator  usage bytes + quota bytes                        │
//! │  Clock             now() - injected so tests control time           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SyncResult;

// =============================================================================
// Key-Value Store
// =============================================================================

/// Generic durable key-value capability.
///
/// Used for the operation log, cache collections, sync state, and the
/// conflict registry. Values are opaque byte blobs; the engine
/// serializes with serde_json.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored at `key`, if any.
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>>;

    /// Writes `value` at `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> SyncResult<()>;

    /// Removes the value at `key`. Removing a missing key is a no-op.
    async fn remove(&self, key: &str) -> SyncResult<()>;
}

/// In-memory store for tests and embedders without a platform store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        Ok(self
            .entries
            .lock()
            .expect("memory store lock poisoned")
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> SyncResult<()> {
        self.entries
            .lock()
            .expect("memory store lock poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        self.entries
            .lock()
            .expect("memory store lock poisoned")
            .remove(key);
        Ok(())
    }
}

// =============================================================================
// Storage Estimator
// =============================================================================

/// Raw usage figures from the platform's usage-estimation capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageEstimate {
    /// Bytes currently used.
    pub usage_bytes: u64,
    /// Total quota in bytes.
    pub quota_bytes: u64,
}

/// Storage usage estimation capability.
#[async_trait]
pub trait StorageEstimator: Send + Sync {
    /// Returns current usage and quota. A failure here disables the
    /// storage budget monitor; sync continues without enforcement.
    async fn estimate(&self) -> SyncResult<UsageEstimate>;
}

// =============================================================================
// Clock
// =============================================================================

/// Time source, injected so tests control the clock.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            now: Mutex::new(start),
        }
    }

    /// Advances the clock by `duration`.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += duration;
    }

    /// Sets the clock to an absolute instant.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().expect("clock lock poisoned") = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", b"hello".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"hello".to_vec()));

        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_remove_missing_is_noop() {
        let store = MemoryStore::new();
        store.remove("missing").await.unwrap();
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), start + chrono::Duration::minutes(5));
    }
}
