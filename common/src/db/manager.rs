// Process-wide pool lifecycle: lazy creation, liveness checks, bounded retry

use crate::db::pool::PoolConnector;
use crate::errors::DatabaseError;
use crate::retry::{ExponentialBackoff, RetryStrategy};
use crate::telemetry;
use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle state of the managed pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Absent,
    Connecting,
    Connected,
}

impl PoolState {
    pub fn as_gauge(self) -> f64 {
        match self {
            PoolState::Absent => 0.0,
            PoolState::Connecting => 1.0,
            PoolState::Connected => 2.0,
        }
    }
}

/// Snapshot of the manager for health endpoints
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub state: PoolState,
    pub retry_count: u32,
    pub generation: Option<u64>,
}

/// A live pool together with the generation it was created in.
///
/// Dereferences to the driver pool so callers run queries directly on it.
#[derive(Debug, Clone)]
pub struct PoolHandle<P> {
    pool: P,
    generation: u64,
}

impl<P> PoolHandle<P> {
    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<P> Deref for PoolHandle<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.pool
    }
}

enum Slot<P> {
    Absent,
    Connecting,
    Connected(PoolHandle<P>),
}

impl<P> Slot<P> {
    fn state(&self) -> PoolState {
        match self {
            Slot::Absent => PoolState::Absent,
            Slot::Connecting => PoolState::Connecting,
            Slot::Connected(_) => PoolState::Connected,
        }
    }
}

struct Shared<P> {
    slot: RwLock<Slot<P>>,
    /// Held for the whole of a creation run or a release
    gate: Mutex<()>,
    retries: AtomicU32,
    generation: AtomicU64,
}

impl<P: Clone> Shared<P> {
    async fn current(&self) -> Option<PoolHandle<P>> {
        match &*self.slot.read().await {
            Slot::Connected(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    async fn set(&self, slot: Slot<P>) {
        let state = slot.state();
        *self.slot.write().await = slot;
        telemetry::set_pool_state(state);
    }

    /// Clear the slot only if it still holds `generation`
    async fn take_if_current(&self, generation: u64) -> Option<PoolHandle<P>> {
        let mut slot = self.slot.write().await;
        match &*slot {
            Slot::Connected(handle) if handle.generation == generation => {}
            _ => return None,
        }
        let previous = std::mem::replace(&mut *slot, Slot::Absent);
        drop(slot);
        telemetry::set_pool_state(PoolState::Absent);
        match previous {
            Slot::Connected(handle) => Some(handle),
            _ => None,
        }
    }
}

/// A pool that has been opened but not yet stored in the slot.
///
/// Closed in the background if the creating future is dropped first.
struct PendingPool<C: PoolConnector> {
    connector: Arc<C>,
    pool: Option<C::Pool>,
}

impl<C: PoolConnector> PendingPool<C> {
    fn new(connector: Arc<C>, pool: C::Pool) -> Self {
        Self {
            connector,
            pool: Some(pool),
        }
    }

    fn disarm(mut self) {
        self.pool = None;
    }
}

impl<C: PoolConnector> Drop for PendingPool<C> {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let connector = self.connector.clone();
        runtime.spawn(async move {
            warn!("Pool creation cancelled, closing unstored pool");
            if let Err(e) = connector.close(pool).await {
                warn!(error = %e, "Failed to close unstored pool");
            }
        });
    }
}

/// Owns the single database pool of the process.
///
/// At most one creation runs at a time; callers arriving while a creation
/// is in flight wait for it and share its result. Share it behind an `Arc`.
pub struct PoolManager<C: PoolConnector> {
    connector: Arc<C>,
    backoff: ExponentialBackoff,
    shared: Arc<Shared<C::Pool>>,
}

impl<C: PoolConnector> PoolManager<C> {
    pub fn new(connector: C, backoff: ExponentialBackoff) -> Self {
        Self {
            connector: Arc::new(connector),
            backoff,
            shared: Arc::new(Shared {
                slot: RwLock::new(Slot::Absent),
                gate: Mutex::new(()),
                retries: AtomicU32::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub async fn state(&self) -> PoolState {
        self.shared.slot.read().await.state()
    }

    /// Consecutive failed creation attempts in the current or latest run
    pub fn retry_count(&self) -> u32 {
        self.shared.retries.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> PoolStatus {
        let slot = self.shared.slot.read().await;
        let generation = match &*slot {
            Slot::Connected(handle) => Some(handle.generation),
            _ => None,
        };
        PoolStatus {
            state: slot.state(),
            retry_count: self.retry_count(),
            generation,
        }
    }

    /// Return a live pool, creating or replacing it as needed.
    ///
    /// # Errors
    /// `DatabaseError::RetriesExhausted` once every creation attempt failed.
    #[instrument(skip(self), fields(db = %self.connector.describe()))]
    pub async fn acquire(&self) -> Result<PoolHandle<C::Pool>, DatabaseError> {
        if let Some(handle) = self.shared.current().await {
            match self.connector.ping(handle.pool()).await {
                Ok(()) => return Ok(handle),
                Err(e) => {
                    warn!(
                        generation = handle.generation,
                        error = %e,
                        "Liveness check failed, discarding pool"
                    );
                    self.discard(handle.generation, "liveness").await;
                }
            }
        }

        let _gate = self.shared.gate.lock().await;

        // Another caller may have finished a creation while this one waited
        if let Some(handle) = self.shared.current().await {
            debug!(
                generation = handle.generation,
                "Joined pool created by concurrent caller"
            );
            return Ok(handle);
        }

        self.create().await
    }

    /// Creation loop; the gate must be held
    async fn create(&self) -> Result<PoolHandle<C::Pool>, DatabaseError> {
        self.shared.set(Slot::Connecting).await;
        self.shared.retries.store(0, Ordering::SeqCst);
        let max_retries = self.backoff.max_retries();

        loop {
            let attempt = self.shared.retries.load(Ordering::SeqCst) + 1;
            info!(attempt, max_retries, "Creating database connection pool");
            telemetry::record_pool_connect_attempt();

            let error = match self.connector.connect().await {
                Ok(pool) => {
                    let pending = PendingPool::new(self.connector.clone(), pool.clone());
                    let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let handle = PoolHandle { pool, generation };
                    // No await between storing the slot and disarming
                    self.shared.set(Slot::Connected(handle.clone())).await;
                    pending.disarm();
                    self.shared.retries.store(0, Ordering::SeqCst);
                    self.watch(&handle);

                    info!(generation, attempt, "Database connection pool established");
                    return Ok(handle);
                }
                Err(e) => e,
            };

            let failures = self.shared.retries.fetch_add(1, Ordering::SeqCst) + 1;
            telemetry::record_pool_connect_failure();

            match self.backoff.next_delay(failures) {
                Some(delay) => {
                    warn!(
                        attempt = failures,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Pool creation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    self.shared.set(Slot::Absent).await;
                    error!(
                        attempts = failures,
                        error = %error,
                        "Pool creation failed, retries exhausted"
                    );
                    return Err(DatabaseError::RetriesExhausted {
                        attempts: failures,
                        last_error: error.to_string(),
                    });
                }
            }
        }
    }

    /// Discard the pool when the driver reports it closed on its own
    fn watch(&self, handle: &PoolHandle<C::Pool>) {
        let Some(closed) = self.connector.closed(handle.pool()) else {
            return;
        };
        let shared: Weak<Shared<C::Pool>> = Arc::downgrade(&self.shared);
        let generation = handle.generation;

        tokio::spawn(async move {
            closed.await;
            let Some(shared) = shared.upgrade() else {
                return;
            };
            if shared.take_if_current(generation).await.is_some() {
                warn!(generation, "Pool closed outside the manager, discarded");
                telemetry::record_pool_discard("closed");
            }
        });
    }

    async fn discard(&self, generation: u64, reason: &'static str) {
        let Some(stale) = self.shared.take_if_current(generation).await else {
            return;
        };
        telemetry::record_pool_discard(reason);
        if let Err(e) = self.connector.close(stale.pool).await {
            warn!(generation, error = %e, "Failed to close discarded pool");
        }
    }

    /// Report that `handle` produced a connection-level failure.
    ///
    /// The pool is discarded if it is still the current one, so the next
    /// `acquire` builds a fresh pool. Reports about replaced pools are ignored.
    #[instrument(skip(self, handle), fields(generation = handle.generation))]
    pub async fn invalidate(&self, handle: &PoolHandle<C::Pool>) {
        info!("Connection failure reported, discarding pool");
        self.discard(handle.generation, "reported").await;
    }

    /// Close the pool if present and reset the manager to `Absent`.
    ///
    /// Waits for an in-flight creation to finish first. Calling it with no
    /// pool is a no-op.
    ///
    /// # Errors
    /// `DatabaseError::CloseFailed` if the driver fails to close; the
    /// manager is `Absent` either way.
    #[instrument(skip(self), fields(db = %self.connector.describe()))]
    pub async fn release(&self) -> Result<(), DatabaseError> {
        let _gate = self.shared.gate.lock().await;

        let previous = std::mem::replace(&mut *self.shared.slot.write().await, Slot::Absent);
        telemetry::set_pool_state(PoolState::Absent);
        self.shared.retries.store(0, Ordering::SeqCst);

        let Slot::Connected(handle) = previous else {
            debug!("No pool to release");
            return Ok(());
        };

        info!(generation = handle.generation, "Closing database connection pool");
        self.connector.close(handle.pool).await.map_err(|e| {
            error!(error = %e, "Failed to close database connection pool");
            DatabaseError::CloseFailed(e.to_string())
        })?;

        info!("Database connection pool closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::future::BoxFuture;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Scripted connector: pools are plain ids, outcomes are queued per call
    #[derive(Default)]
    struct ScriptedConnector {
        connect_results: StdMutex<VecDeque<Result<(), String>>>,
        ping_results: StdMutex<VecDeque<Result<(), String>>>,
        close_error: Option<String>,
        connect_delay: Duration,
        connects: AtomicU32,
        closes: AtomicU32,
        close_signal: Option<Arc<Notify>>,
    }

    impl ScriptedConnector {
        fn failing_first(failures: usize) -> Self {
            let mut results = VecDeque::new();
            for i in 0..failures {
                results.push_back(Err(format!("refused #{}", i + 1)));
            }
            Self {
                connect_results: StdMutex::new(results),
                ..Self::default()
            }
        }

        fn fail_next_ping(&self) {
            self.ping_results
                .lock()
                .unwrap()
                .push_back(Err("server closed the connection".to_string()));
        }
    }

    #[async_trait]
    impl PoolConnector for ScriptedConnector {
        type Pool = u32;

        async fn connect(&self) -> Result<u32, DatabaseError> {
            if !self.connect_delay.is_zero() {
                tokio::time::sleep(self.connect_delay).await;
            }
            let id = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
            let outcome = self.connect_results.lock().unwrap().pop_front();
            match outcome {
                Some(Err(message)) => Err(DatabaseError::ConnectionFailed(message)),
                _ => Ok(id),
            }
        }

        async fn ping(&self, _pool: &u32) -> Result<(), DatabaseError> {
            let outcome = self.ping_results.lock().unwrap().pop_front();
            match outcome {
                Some(Err(message)) => Err(DatabaseError::HealthCheckFailed(message)),
                _ => Ok(()),
            }
        }

        async fn close(&self, _pool: u32) -> Result<(), DatabaseError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            match &self.close_error {
                Some(message) => Err(DatabaseError::QueryFailed(message.clone())),
                None => Ok(()),
            }
        }

        fn closed(&self, _pool: &u32) -> Option<BoxFuture<'static, ()>> {
            let notify = self.close_signal.clone()?;
            Some(Box::pin(async move { notify.notified().await }))
        }
    }

    fn fast_backoff(max_retries: u32) -> ExponentialBackoff {
        ExponentialBackoff::with_config(max_retries, 1, 4, 0.0)
    }

    #[tokio::test]
    async fn test_first_acquire_creates_pool() {
        let manager = PoolManager::new(ScriptedConnector::default(), fast_backoff(3));
        assert_eq!(manager.state().await, PoolState::Absent);

        let handle = manager.acquire().await.unwrap();
        assert_eq!(handle.generation(), 1);
        assert_eq!(*handle, 1);
        assert_eq!(manager.state().await, PoolState::Connected);
        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connected_pool_is_reused() {
        let manager = PoolManager::new(ScriptedConnector::default(), fast_backoff(3));

        let first = manager.acquire().await.unwrap();
        let second = manager.acquire().await.unwrap();

        assert_eq!(first.generation(), second.generation());
        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_creates_once() {
        let connector = ScriptedConnector {
            connect_delay: Duration::from_millis(20),
            ..ScriptedConnector::default()
        };
        let manager = Arc::new(PoolManager::new(connector, fast_backoff(3)));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.acquire().await })
            })
            .collect();

        let mut generations = Vec::new();
        for task in tasks {
            generations.push(task.await.unwrap().unwrap().generation());
        }

        assert!(generations.iter().all(|g| *g == generations[0]));
        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let manager = PoolManager::new(ScriptedConnector::failing_first(2), fast_backoff(5));

        let handle = manager.acquire().await.unwrap();

        assert_eq!(*handle, 3);
        assert_eq!(manager.retry_count(), 0);
        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_store_nothing() {
        let manager = PoolManager::new(ScriptedConnector::failing_first(10), fast_backoff(3));

        let err = manager.acquire().await.unwrap_err();

        match err {
            DatabaseError::RetriesExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("refused #3"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(manager.state().await, PoolState::Absent);
        assert_eq!(manager.retry_count(), 3);
        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_new_run_after_exhaustion_gets_full_budget() {
        // 3 failures exhaust the first run, the second run succeeds on its first try
        let manager = PoolManager::new(ScriptedConnector::failing_first(3), fast_backoff(3));

        assert!(manager.acquire().await.is_err());
        let handle = manager.acquire().await.unwrap();

        assert_eq!(*handle, 4);
        assert_eq!(manager.retry_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_liveness_check_recreates_transparently() {
        let manager = PoolManager::new(ScriptedConnector::default(), fast_backoff(3));
        let first = manager.acquire().await.unwrap();

        manager.connector().fail_next_ping();
        let second = manager.acquire().await.unwrap();

        assert_ne!(first.generation(), second.generation());
        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 2);
        assert_eq!(manager.connector().closes.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state().await, PoolState::Connected);
    }

    #[tokio::test]
    async fn test_release_then_acquire_creates_fresh_pool() {
        let manager = PoolManager::new(ScriptedConnector::default(), fast_backoff(3));
        let first = manager.acquire().await.unwrap();

        manager.release().await.unwrap();
        assert_eq!(manager.state().await, PoolState::Absent);

        let second = manager.acquire().await.unwrap();
        assert_eq!(second.generation(), first.generation() + 1);
        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_release_without_pool_is_noop() {
        let manager = PoolManager::new(ScriptedConnector::default(), fast_backoff(3));

        manager.release().await.unwrap();
        manager.release().await.unwrap();

        assert_eq!(manager.connector().closes.load(Ordering::SeqCst), 0);
        assert_eq!(manager.state().await, PoolState::Absent);
    }

    #[tokio::test]
    async fn test_close_error_surfaces_and_clears_state() {
        let connector = ScriptedConnector {
            close_error: Some("socket already gone".to_string()),
            ..ScriptedConnector::default()
        };
        let manager = PoolManager::new(connector, fast_backoff(3));
        manager.acquire().await.unwrap();

        let err = manager.release().await.unwrap_err();

        assert!(matches!(err, DatabaseError::CloseFailed(_)));
        assert_eq!(manager.state().await, PoolState::Absent);
    }

    #[tokio::test]
    async fn test_invalidate_ignores_replaced_handle() {
        let manager = PoolManager::new(ScriptedConnector::default(), fast_backoff(3));
        let stale = manager.acquire().await.unwrap();
        manager.invalidate(&stale).await;
        let current = manager.acquire().await.unwrap();

        // A late report about the first pool must not tear down the second
        manager.invalidate(&stale).await;

        let status = manager.status().await;
        assert_eq!(status.state, PoolState::Connected);
        assert_eq!(status.generation, Some(current.generation()));
    }

    #[tokio::test]
    async fn test_closed_signal_discards_pool() {
        let notify = Arc::new(Notify::new());
        let connector = ScriptedConnector {
            close_signal: Some(notify.clone()),
            ..ScriptedConnector::default()
        };
        let manager = PoolManager::new(connector, fast_backoff(3));
        manager.acquire().await.unwrap();

        // notify_one stores a permit, so the watcher sees it even if not yet polled
        notify.notify_one();
        for _ in 0..50 {
            if manager.state().await == PoolState::Absent {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(manager.state().await, PoolState::Absent);
    }

    #[tokio::test]
    async fn test_release_waits_for_in_flight_creation() {
        let connector = ScriptedConnector {
            connect_delay: Duration::from_millis(50),
            ..ScriptedConnector::default()
        };
        let manager = Arc::new(PoolManager::new(connector, fast_backoff(3)));

        let creating = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.state().await, PoolState::Connecting);

        manager.release().await.unwrap();

        // The creation finished first and release closed what it produced
        assert!(creating.await.unwrap().is_ok());
        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 1);
        assert_eq!(manager.connector().closes.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state().await, PoolState::Absent);
    }

    #[tokio::test]
    async fn test_dropped_acquire_lets_next_caller_restart_creation() {
        let connector = ScriptedConnector {
            connect_delay: Duration::from_millis(50),
            ..ScriptedConnector::default()
        };
        let manager = PoolManager::new(connector, fast_backoff(3));

        let timed_out = tokio::time::timeout(Duration::from_millis(5), manager.acquire()).await;
        assert!(timed_out.is_err());
        assert_eq!(manager.state().await, PoolState::Connecting);

        let handle = manager.acquire().await.unwrap();

        assert_eq!(handle.generation(), 1);
        assert_eq!(manager.state().await, PoolState::Connected);
        assert_eq!(manager.retry_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_after_connect_closes_unstored_pool() {
        let connector = ScriptedConnector {
            connect_delay: Duration::from_millis(30),
            ..ScriptedConnector::default()
        };
        let manager = Arc::new(PoolManager::new(connector, fast_backoff(3)));

        let creating = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Hold a reader so the opened pool cannot be stored, then cancel
        let reader = manager.shared.slot.read().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(manager.connector().connects.load(Ordering::SeqCst), 1);
        creating.abort();
        assert!(creating.await.unwrap_err().is_cancelled());
        drop(reader);

        for _ in 0..50 {
            if manager.connector().closes.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(manager.connector().closes.load(Ordering::SeqCst), 1);

        let handle = manager.acquire().await.unwrap();
        assert_eq!(*handle, 2);
    }
}
