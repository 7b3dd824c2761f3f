//! Reconciliation Engine (`spec.md` §4.5, §2 item 5) — the core control
//! loop: event or timer triggers classification, the per-key serializer
//! enforces P1/P2, and each dispatched cluster runs through its
//! [`CompositeOperation`].

use crate::composite::CompositeOperation;
use crate::error::EngineError;
use crate::model::{ClusterKey, ClusterType};
use async_trait::async_trait;
use kafka_operator_common::{KeyedSerializer, ReconcileError};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// `spec.md` §4.5 dispatch step 2: 60s lock-acquisition timeout.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

/// A label-selected `ConfigMap` observation (`spec.md` §4.5 "Event
/// trigger"), or, for the periodic sweep, just a cluster identity derived
/// from list reconciliation.
pub struct ClusterEvent {
    pub cluster_type: ClusterType,
    pub namespace: String,
    pub name: String,
}

/// Lists the representative resource names currently present for a given
/// cluster type, used by [`ReconciliationEngine::sweep`] to compute the
/// add/update/delete partition from `spec.md` §4.5.
#[async_trait]
pub trait ClusterLister: Send + Sync {
    async fn config_names(&self, namespace: &str) -> Result<HashSet<String>, ReconcileError>;
    async fn resource_names(&self, namespace: &str) -> Result<HashSet<String>, ReconcileError>;
}

/// Tracks whether the last sweep completed within one interval, the signal
/// the health surface (`spec.md` §4.6/§6) reports through `/ready`.
#[derive(Default)]
pub struct SweepHealth {
    last_success_epoch_secs: AtomicU64,
    running: AtomicBool,
}

impl SweepHealth {
    pub fn mark_success(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.last_success_epoch_secs.store(now, Ordering::Relaxed);
    }

    pub fn mark_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    /// Whether a sweep is actively executing right now. Purely diagnostic —
    /// `/healthy` surfaces it, but readiness below does not gate on it:
    /// the multi-minute gap *between* sweeps is the normal case, not an
    /// outage.
    pub fn is_sweeping(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// `spec.md` §6: ready once the last sweep succeeded within one
    /// `fullReconciliationInterval` of now. Liveness (is the event loop
    /// still running at all) is a separate question the caller answers via
    /// `ReconciliationEngine::is_shutting_down`.
    pub fn is_ready(&self, interval: Duration) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let last = self.last_success_epoch_secs.load(Ordering::Relaxed);
        last != 0 && now.saturating_sub(last) <= interval.as_secs() * 2
    }
}

pub struct ReconciliationEngine {
    composites: HashMap<ClusterType, Arc<dyn CompositeOperation>>,
    listers: HashMap<ClusterType, Arc<dyn ClusterLister>>,
    serializer: KeyedSerializer<ClusterKey>,
    lock_timeout: Duration,
    pub health: Arc<SweepHealth>,
    shutting_down: Arc<AtomicBool>,
    /// `spec.md` §4.5 "single pending token per key": keys with a dispatch
    /// already in flight or queued, so a burst of events for the same key
    /// coalesces into the one already running instead of piling up.
    pending: StdMutex<HashSet<ClusterKey>>,
}

impl ReconciliationEngine {
    pub fn new(
        composites: HashMap<ClusterType, Arc<dyn CompositeOperation>>,
        listers: HashMap<ClusterType, Arc<dyn ClusterLister>>,
    ) -> Self {
        Self {
            composites,
            listers,
            serializer: KeyedSerializer::new(),
            lock_timeout: LOCK_TIMEOUT,
            health: Arc::new(SweepHealth::default()),
            shutting_down: Arc::new(AtomicBool::new(false)),
            pending: StdMutex::new(HashSet::new()),
        }
    }

    /// Signals the event/sweep loops to stop accepting new work. In-flight
    /// locked operations are left to drain (`spec.md` §5 "Shutdown").
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// `spec.md` §4.5 "Dispatch": acquire the per-key lock, build the
    /// `ClusterOperation`, run the composite, always release.
    pub async fn execute(&self, event: ClusterEvent) -> Result<(), ReconcileError> {
        if self.is_shutting_down() {
            return Err(ReconcileError::temporary("engine is shutting down"));
        }

        let key = ClusterKey::new(event.cluster_type, &event.namespace, &event.name);
        let composite = self
            .composites
            .get(&event.cluster_type)
            .ok_or_else(|| ReconcileError::permanent(format!("no composite for {}", event.cluster_type)))?
            .clone();

        let lease = self
            .serializer
            .acquire(key.clone(), self.lock_timeout)
            .await
            .map_err(|_| ReconcileError::from(EngineError::LockTimeout))?;

        let result = async {
            let op = composite.get_cluster(&event.namespace, &event.name).await?;
            composite.composite(&event.namespace, op).await
        }
        .await;

        drop(lease);

        match &result {
            Ok(()) => tracing::info!(%key, "reconciled cluster"),
            Err(err) => tracing::error!(%key, error = %err, "reconcile failed"),
        }
        result
    }

    /// `spec.md` §4.5 "A single event is classified and dispatched
    /// immediately (non-blocking; lock is asynchronous)": spawn `execute`
    /// as its own task so the caller (the watch stream's poll loop) is
    /// never held up by a reconcile in flight, and coalesce a burst of
    /// events for the same key into whichever run is already pending —
    /// that run's own `get_cluster` call reads the latest input, so a
    /// coalesced event loses nothing.
    pub fn dispatch(self: &Arc<Self>, event: ClusterEvent) {
        let key = ClusterKey::new(event.cluster_type, &event.namespace, &event.name);
        {
            let mut pending = self.pending.lock().expect("pending-set lock poisoned");
            if !pending.insert(key.clone()) {
                tracing::debug!(%key, "coalescing duplicate pending event");
                return;
            }
        }

        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.execute(event).await {
                tracing::warn!(%key, error = %err, "event-triggered reconcile failed");
            }
            engine.pending.lock().expect("pending-set lock poisoned").remove(&key);
        });
    }

    /// `spec.md` §4.5 "Periodic sweep": for each supported cluster type,
    /// partition by name-set and dispatch each partitioned element.
    pub async fn sweep(&self, namespace: &str) -> Result<(), ReconcileError> {
        self.health.mark_running(true);
        let mut any_failure = false;

        for (cluster_type, lister) in &self.listers {
            let configs = lister.config_names(namespace).await?;
            let resources = lister.resource_names(namespace).await?;

            let mut names: BTreeMap<&str, EventKind> = BTreeMap::new();
            for name in &configs {
                let kind = if resources.contains(name) {
                    EventKind::Modified
                } else {
                    EventKind::Added
                };
                names.insert(name, kind);
            }
            for name in &resources {
                if !configs.contains(name) {
                    names.insert(name, EventKind::Deleted);
                }
            }

            for (name, _kind) in names {
                let event = ClusterEvent {
                    cluster_type: *cluster_type,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                };
                if let Err(err) = self.execute(event).await {
                    tracing::error!(cluster_type = %cluster_type, name, error = %err, "sweep dispatch failed");
                    any_failure = true;
                }
            }
        }

        self.health.mark_running(false);
        if any_failure {
            Err(ReconcileError::temporary("one or more clusters failed to reconcile this sweep"))
        } else {
            self.health.mark_success();
            Ok(())
        }
    }

    /// Runs the periodic sweep loop until [`Self::begin_shutdown`] is
    /// observed. Intended to be spawned alongside the event-watch streams.
    pub async fn run_sweep_loop(self: Arc<Self>, namespace: String, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.is_shutting_down() {
                tracing::info!("sweep loop exiting on shutdown");
                return;
            }
            if let Err(err) = self.sweep(&namespace).await {
                tracing::warn!(error = %err, "sweep completed with failures");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::composite::{ClusterOperation, OperationType};
    use std::sync::atomic::AtomicUsize;

    struct CountingComposite {
        calls: Arc<AtomicUsize>,
        concurrent: Arc<AtomicUsize>,
        max_concurrent: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl CompositeOperation for CountingComposite {
        async fn get_cluster(&self, namespace: &str, name: &str) -> Result<ClusterOperation, ReconcileError> {
            Ok(ClusterOperation {
                key: ClusterKey::new(ClusterType::Kafka, namespace, name),
                op_type: OperationType::Update,
                desired: None,
                current: None,
                diff: Default::default(),
            })
        }

        async fn composite(&self, _namespace: &str, _op: ClusterOperation) -> Result<(), ReconcileError> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                Err(ReconcileError::permanent("boom"))
            } else {
                Ok(())
            }
        }
    }

    fn engine(fail: bool) -> (Arc<ReconciliationEngine>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));
        let mut composites: HashMap<ClusterType, Arc<dyn CompositeOperation>> = HashMap::new();
        composites.insert(
            ClusterType::Kafka,
            Arc::new(CountingComposite {
                calls: calls.clone(),
                concurrent: concurrent.clone(),
                max_concurrent: max_concurrent.clone(),
                fail,
            }),
        );
        (
            Arc::new(ReconciliationEngine::new(composites, HashMap::new())),
            calls,
            max_concurrent,
        )
    }

    #[tokio::test]
    async fn same_key_executions_serialize() {
        let (engine, calls, max_concurrent) = engine(false);

        let mut handles = vec![];
        for _ in 0..5 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .execute(ClusterEvent {
                        cluster_type: ClusterType::Kafka,
                        namespace: "ns".into(),
                        name: "my-cluster".into(),
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // P1: never more than one holder of the same key's lock.
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_interleave() {
        let (engine, _calls, max_concurrent) = engine(false);

        let mut handles = vec![];
        for i in 0..4 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .execute(ClusterEvent {
                        cluster_type: ClusterType::Kafka,
                        namespace: "ns".into(),
                        name: format!("cluster-{i}"),
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        // P2: distinct keys may run concurrently.
        assert!(max_concurrent.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let (engine, _calls, _max) = engine(false);
        engine.begin_shutdown();
        let err = engine
            .execute(ClusterEvent {
                cluster_type: ClusterType::Kafka,
                namespace: "ns".into(),
                name: "my-cluster".into(),
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn dispatch_does_not_block_the_caller() {
        let (engine, calls, _max) = engine(false);

        let start = std::time::Instant::now();
        engine.dispatch(ClusterEvent {
            cluster_type: ClusterType::Kafka,
            namespace: "ns".into(),
            name: "my-cluster".into(),
        });
        // `dispatch` only inserts into the pending set and spawns; it must
        // return long before the composite's 20ms sleep completes.
        assert!(start.elapsed() < Duration::from_millis(10));

        // Give the spawned task a chance to actually run.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_coalesces_duplicate_pending_events() {
        let (engine, calls, max_concurrent) = engine(false);

        for _ in 0..5 {
            engine.dispatch(ClusterEvent {
                cluster_type: ClusterType::Kafka,
                namespace: "ns".into(),
                name: "my-cluster".into(),
            });
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        // §4.5 "single pending token per key": a burst of events for the
        // same key while one is already in flight coalesces down to far
        // fewer composite runs than events, and never runs two at once.
        assert!(calls.load(Ordering::SeqCst) < 5);
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }
}
