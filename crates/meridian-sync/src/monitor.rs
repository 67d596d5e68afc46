//! # Storage Budget Monitor
//!
//! Periodically estimates local storage usage and raises alerts at the
//! warning and critical thresholds; at critical it also runs emergency
//! cleanup so sync can keep making progress.
//!
//! ## Behavior
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                   Storage Budget Monitor                            │
//! │                                                                     │
//! │  every check_interval:  estimator.estimate() → StorageStats         │
//! │                                                                     │
//! │    ≥ 80%  → Warning alert   (suppressed inside re-arm window)       │
//! │    ≥ 95%  → Critical alert  (same re-arm) + EMERGENCY CLEANUP:      │
//! │               1. evict cached Orders older than retention           │
//! │               2. trim operation log to the newest N entries         │
//! │                                                                     │
//! │  Estimator failure → monitor disables itself; sync continues        │
//! │  without budget enforcement.                                        │
//! │                                                                     │
//! │  Subscribers receive every delivered alert. A panicking callback    │
//! │  is caught and must not block delivery to the others.               │
//! │                                                                     │
//! │  No persistent state: only an in-memory recent-alerts window.       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use meridian_core::{AlertLevel, EntityKind, StorageAlert, StorageStats};

use crate::cache::EntityCache;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::oplog::OperationLog;
use crate::store::{Clock, StorageEstimator};

/// How many delivered alerts the in-memory window keeps.
const RECENT_ALERTS_CAP: usize = 32;

/// Alert callback. Must be panic-tolerant from the monitor's side but
/// is otherwise unconstrained.
pub type AlertCallback = Box<dyn Fn(&StorageAlert) + Send + Sync>;

/// Opaque handle returned by [`StorageMonitor::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// What one check concluded.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// Usage below every threshold.
    Ok(StorageStats),
    /// A threshold was crossed; `alert` is `None` when the re-arm
    /// window suppressed delivery.
    Alerted {
        stats: StorageStats,
        alert: Option<StorageAlert>,
        /// Cleanup counts when critical: (orders evicted, ops trimmed).
        cleanup: Option<(usize, usize)>,
    },
}

// =============================================================================
// Storage Monitor
// =============================================================================

/// Threshold watchdog over an injected storage estimator.
pub struct StorageMonitor {
    estimator: Arc<dyn StorageEstimator>,
    clock: Arc<dyn Clock>,
    config: Arc<SyncConfig>,
    oplog: Arc<OperationLog>,
    cache: Arc<EntityCache>,

    subscribers: StdMutex<HashMap<SubscriptionId, AlertCallback>>,
    next_subscription: AtomicU64,

    last_warning: RwLock<Option<DateTime<Utc>>>,
    last_critical: RwLock<Option<DateTime<Utc>>>,
    recent: RwLock<Vec<StorageAlert>>,
    disabled: AtomicBool,
}

impl StorageMonitor {
    /// Creates a monitor over already-opened components.
    pub fn new(
        estimator: Arc<dyn StorageEstimator>,
        clock: Arc<dyn Clock>,
        config: Arc<SyncConfig>,
        oplog: Arc<OperationLog>,
        cache: Arc<EntityCache>,
    ) -> Self {
        StorageMonitor {
            estimator,
            clock,
            config,
            oplog,
            cache,
            subscribers: StdMutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            last_warning: RwLock::new(None),
            last_critical: RwLock::new(None),
            recent: RwLock::new(Vec::new()),
            disabled: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Registers an alert callback. Multiple subscribers coexist.
    pub fn subscribe(&self, callback: AlertCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().unwrap().insert(id, callback);
        id
    }

    /// Removes a subscriber. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().unwrap().remove(&id);
    }

    /// Recently delivered alerts, oldest first.
    pub async fn recent_alerts(&self) -> Vec<StorageAlert> {
        self.recent.read().await.clone()
    }

    /// Whether an estimator failure has disabled the monitor.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Checks
    // =========================================================================

    /// Runs one threshold check immediately.
    ///
    /// An estimator failure disables the monitor and surfaces as
    /// [`SyncError::StorageUnavailable`]; sync itself is unaffected.
    pub async fn check_now(&self) -> SyncResult<CheckOutcome> {
        let estimate = match self.estimator.estimate().await {
            Ok(e) => e,
            Err(e) => {
                self.disabled.store(true, Ordering::Relaxed);
                warn!(error = %e, "Storage estimator failed; disabling budget monitor");
                return Err(SyncError::StorageUnavailable(e.to_string()));
            }
        };

        let stats = StorageStats::with_thresholds(
            estimate.usage_bytes,
            estimate.quota_bytes,
            self.config.storage.warn_threshold_pct,
            self.config.storage.critical_threshold_pct,
        );

        if !stats.near_limit {
            return Ok(CheckOutcome::Ok(stats));
        }

        let now = self.clock.now();
        let (level, window) = if stats.critical {
            (AlertLevel::Critical, &self.last_critical)
        } else {
            (AlertLevel::Warning, &self.last_warning)
        };

        let alert = if self.rearmed(window, now).await {
            *window.write().await = Some(now);
            let alert = StorageAlert {
                level,
                stats,
                raised_at: now,
            };
            self.deliver(&alert).await;
            Some(alert)
        } else {
            debug!(level = ?level, pct = stats.percentage, "Alert suppressed inside re-arm window");
            None
        };

        // Cleanup runs on every critical check, suppressed alert or
        // not: freeing space cannot wait for the re-arm window.
        let cleanup = if stats.critical {
            Some(self.emergency_cleanup().await?)
        } else {
            None
        };

        Ok(CheckOutcome::Alerted {
            stats,
            alert,
            cleanup,
        })
    }

    async fn rearmed(&self, window: &RwLock<Option<DateTime<Utc>>>, now: DateTime<Utc>) -> bool {
        match *window.read().await {
            None => true,
            Some(last) => now >= last + Duration::seconds(self.config.storage.alert_rearm_secs as i64),
        }
    }

    async fn deliver(&self, alert: &StorageAlert) {
        {
            let mut recent = self.recent.write().await;
            recent.push(alert.clone());
            if recent.len() > RECENT_ALERTS_CAP {
                recent.remove(0);
            }
        }

        let subscribers = self.subscribers.lock().unwrap();
        for (id, callback) in subscribers.iter() {
            // One panicking subscriber must not starve the rest.
            if catch_unwind(AssertUnwindSafe(|| callback(alert))).is_err() {
                error!(subscription = ?id, "Alert subscriber panicked");
            }
        }
    }

    /// Critical-usage cleanup: evict stale cached orders, then trim
    /// the operation log to its configured bound.
    async fn emergency_cleanup(&self) -> SyncResult<(usize, usize)> {
        let cutoff =
            self.clock.now() - Duration::seconds(self.config.storage.order_retention_secs as i64);
        let evicted = self.cache.evict_older_than(EntityKind::Order, cutoff).await?;

        let discarded = self
            .oplog
            .trim_to_most_recent(self.config.storage.oplog_max_entries)
            .await?;
        let trimmed = discarded.len();
        for op in &discarded {
            if op.retry_count == 0 && op.attempted_at.is_none() {
                warn!(id = %op.id, entity_id = %op.entity_id, "Emergency trim discarded a never-attempted operation");
            }
        }

        if evicted > 0 || trimmed > 0 {
            info!(evicted, trimmed, "Emergency cleanup complete");
        }

        Ok((evicted, trimmed))
    }
}

// =============================================================================
// Periodic Runner
// =============================================================================

/// Handle for controlling the monitor loop.
#[derive(Clone)]
pub struct MonitorHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl MonitorHandle {
    /// Stops the timer loop. An in-progress cleanup finishes on its
    /// own and is never rolled back.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Spawns the fixed-interval check loop.
pub fn spawn_monitor(monitor: Arc<StorageMonitor>) -> MonitorHandle {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    let interval_secs = monitor.config.storage.check_interval_secs;

    tokio::spawn(async move {
        info!(interval_secs, "Storage monitor starting");

        let mut interval = tokio::time::interval(StdDuration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match monitor.check_now().await {
                        Ok(_) => {}
                        Err(SyncError::StorageUnavailable(_)) => {
                            // Graceful self-disable: sync continues
                            // without budget enforcement.
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "Storage check failed");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Storage monitor shutting down");
                    break;
                }
            }
        }
    });

    MonitorHandle { shutdown_tx }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ManualClock, MemoryStore, UsageEstimate};
    use async_trait::async_trait;
    use meridian_core::OperationKind;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Estimator double with a settable reading.
    struct FakeEstimator {
        usage: StdMutex<u64>,
        quota: u64,
        fail: StdMutex<bool>,
    }

    impl FakeEstimator {
        fn new(usage: u64, quota: u64) -> Self {
            FakeEstimator {
                usage: StdMutex::new(usage),
                quota,
                fail: StdMutex::new(false),
            }
        }

        fn set_usage(&self, usage: u64) {
            *self.usage.lock().unwrap() = usage;
        }

        fn fail_next(&self) {
            *self.fail.lock().unwrap() = true;
        }
    }

    #[async_trait]
    impl StorageEstimator for FakeEstimator {
        async fn estimate(&self) -> SyncResult<UsageEstimate> {
            if *self.fail.lock().unwrap() {
                return Err(SyncError::StorageUnavailable("platform api gone".into()));
            }
            Ok(UsageEstimate {
                usage_bytes: *self.usage.lock().unwrap(),
                quota_bytes: self.quota,
            })
        }
    }

    struct Harness {
        estimator: Arc<FakeEstimator>,
        clock: Arc<ManualClock>,
        oplog: Arc<OperationLog>,
        cache: Arc<EntityCache>,
        monitor: StorageMonitor,
    }

    async fn harness(usage: u64, quota: u64) -> Harness {
        harness_with(usage, quota, SyncConfig::default()).await
    }

    async fn harness_with(usage: u64, quota: u64, config: SyncConfig) -> Harness {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let estimator = Arc::new(FakeEstimator::new(usage, quota));
        let config = Arc::new(config);

        let oplog = Arc::new(
            OperationLog::open(store.clone(), clock.clone())
                .await
                .unwrap(),
        );
        let cache = Arc::new(EntityCache::open(store).await.unwrap());

        let monitor = StorageMonitor::new(
            estimator.clone(),
            clock.clone(),
            config,
            oplog.clone(),
            cache.clone(),
        );

        Harness {
            estimator,
            clock,
            oplog,
            cache,
            monitor,
        }
    }

    #[tokio::test]
    async fn test_below_thresholds_is_quiet() {
        let h = harness(50, 100).await;
        let outcome = h.monitor.check_now().await.unwrap();
        assert!(matches!(outcome, CheckOutcome::Ok(_)));
        assert!(h.monitor.recent_alerts().await.is_empty());
    }

    #[tokio::test]
    async fn test_warning_fires_once_per_rearm_window() {
        let h = harness(85, 100).await;
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        h.monitor.subscribe(Box::new(move |alert| {
            assert_eq!(alert.level, AlertLevel::Warning);
            fired_clone.fetch_add(1, Ordering::Relaxed);
        }));

        h.monitor.check_now().await.unwrap();
        // Inside the re-arm window: suppressed.
        h.monitor.check_now().await.unwrap();
        assert_eq!(fired.load(Ordering::Relaxed), 1);

        // Past the window (5 min default): fires again.
        h.clock.advance(Duration::seconds(301));
        h.monitor.check_now().await.unwrap();
        assert_eq!(fired.load(Ordering::Relaxed), 2);
        assert_eq!(h.monitor.recent_alerts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_configured_thresholds_are_honored() {
        let mut config = SyncConfig::default();
        config.storage.warn_threshold_pct = 90.0;
        config.storage.critical_threshold_pct = 97.0;
        let h = harness_with(85, 100, config).await;

        // 85% is below the configured 90% warning line: quiet, even
        // though the default threshold would have fired.
        let outcome = h.monitor.check_now().await.unwrap();
        assert!(matches!(outcome, CheckOutcome::Ok(_)));
        assert!(h.monitor.recent_alerts().await.is_empty());

        h.estimator.set_usage(92);
        let outcome = h.monitor.check_now().await.unwrap();
        match outcome {
            CheckOutcome::Alerted { alert, cleanup, .. } => {
                assert_eq!(alert.unwrap().level, AlertLevel::Warning);
                assert!(cleanup.is_none());
            }
            other => panic!("expected warning, got {:?}", other),
        }

        h.estimator.set_usage(98);
        let outcome = h.monitor.check_now().await.unwrap();
        match outcome {
            CheckOutcome::Alerted { alert, cleanup, .. } => {
                assert_eq!(alert.unwrap().level, AlertLevel::Critical);
                assert!(cleanup.is_some());
            }
            other => panic!("expected critical, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_critical_runs_emergency_cleanup() {
        let h = harness(96, 100).await;
        let now = h.clock.now();

        // One stale order (2h old) and one fresh.
        h.cache
            .upsert_one(
                EntityKind::Order,
                meridian_core::EntityRecord::new(
                    "stale",
                    1,
                    now - Duration::hours(2),
                    json!({"total": 1}),
                ),
            )
            .await
            .unwrap();
        h.cache
            .upsert_one(
                EntityKind::Order,
                meridian_core::EntityRecord::new("fresh", 1, now, json!({"total": 2})),
            )
            .await
            .unwrap();

        // Queue above the trim bound.
        for i in 0..120 {
            h.oplog
                .enqueue(
                    OperationKind::Create,
                    EntityKind::Order,
                    &format!("op-{i}"),
                    json!({}),
                    "branch-a",
                )
                .await
                .unwrap();
        }

        let outcome = h.monitor.check_now().await.unwrap();
        match outcome {
            CheckOutcome::Alerted { alert, cleanup, .. } => {
                assert_eq!(alert.unwrap().level, AlertLevel::Critical);
                assert_eq!(cleanup, Some((1, 20)));
            }
            other => panic!("expected alert, got {:?}", other),
        }

        assert_eq!(h.cache.get_all(EntityKind::Order).await.len(), 1);
        assert_eq!(h.oplog.len().await, 100);

        // Cleanup is idempotent: a second critical check removes
        // nothing further.
        let outcome = h.monitor.check_now().await.unwrap();
        match outcome {
            CheckOutcome::Alerted { cleanup, .. } => assert_eq!(cleanup, Some((0, 0))),
            other => panic!("expected alert outcome, got {:?}", other),
        }
        assert_eq!(h.cache.get_all(EntityKind::Order).await.len(), 1);
        assert_eq!(h.oplog.len().await, 100);
    }

    #[tokio::test]
    async fn test_cleanup_runs_even_when_alert_suppressed() {
        let h = harness(96, 100).await;
        h.monitor.check_now().await.unwrap();

        for i in 0..110 {
            h.oplog
                .enqueue(
                    OperationKind::Create,
                    EntityKind::Order,
                    &format!("op-{i}"),
                    json!({}),
                    "branch-a",
                )
                .await
                .unwrap();
        }

        // Second check inside the re-arm window: no alert, but the
        // queue is still trimmed.
        let outcome = h.monitor.check_now().await.unwrap();
        match outcome {
            CheckOutcome::Alerted { alert, cleanup, .. } => {
                assert!(alert.is_none());
                assert_eq!(cleanup, Some((0, 10)));
            }
            other => panic!("expected alert outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_estimator_failure_disables_monitor() {
        let h = harness(50, 100).await;
        h.estimator.fail_next();

        let result = h.monitor.check_now().await;
        assert!(matches!(result, Err(SyncError::StorageUnavailable(_))));
        assert!(h.monitor.is_disabled());
    }

    #[tokio::test]
    async fn test_panicking_subscriber_does_not_block_others() {
        let h = harness(85, 100).await;
        let delivered = Arc::new(AtomicUsize::new(0));

        h.monitor.subscribe(Box::new(|_| panic!("subscriber bug")));
        let delivered_clone = delivered.clone();
        h.monitor.subscribe(Box::new(move |_| {
            delivered_clone.fetch_add(1, Ordering::Relaxed);
        }));

        h.monitor.check_now().await.unwrap();
        assert_eq!(delivered.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let h = harness(85, 100).await;
        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_clone = delivered.clone();
        let id = h.monitor.subscribe(Box::new(move |_| {
            delivered_clone.fetch_add(1, Ordering::Relaxed);
        }));

        h.monitor.check_now().await.unwrap();
        h.monitor.unsubscribe(id);

        h.clock.advance(Duration::seconds(301));
        h.monitor.check_now().await.unwrap();
        assert_eq!(delivered.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_warning_and_critical_rearm_independently() {
        let h = harness(85, 100).await;
        h.monitor.check_now().await.unwrap();

        // Escalating to critical fires immediately despite the recent
        // warning: the levels re-arm separately.
        h.estimator.set_usage(96);
        let outcome = h.monitor.check_now().await.unwrap();
        match outcome {
            CheckOutcome::Alerted { alert, .. } => {
                assert_eq!(alert.unwrap().level, AlertLevel::Critical);
            }
            other => panic!("expected alert, got {:?}", other),
        }
    }
}
