use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use rnetpool::config::ManagerConfig;
use rnetpool::driver::{ConnectParams, Driver, DriverError, DriverSession};
use rnetpool::error::PoolError;
use rnetpool::pool::{ConnectionStatus, PoolRegistry, SessionPoolManager};
use rnetpool::store::{Credential, MemoryStore, PoolConfig};

/// Scriptable driver: counts connect attempts, serves queued failures
/// first, and exposes per-session flags so tests can kill connections
/// or fail probes at will.
#[derive(Default)]
struct MockDriver {
    connects: AtomicU32,
    fail_plan: Mutex<VecDeque<DriverError>>,
    handles: Mutex<Vec<MockHandle>>,
    connect_delay: Duration,
}

#[derive(Clone)]
struct MockHandle {
    connected: Arc<AtomicBool>,
    probe_ok: Arc<AtomicBool>,
}

struct MockSession {
    handle: MockHandle,
}

impl MockDriver {
    fn new() -> Self {
        Self::default()
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            connect_delay: delay,
            ..Self::default()
        }
    }

    fn plan_failures(&self, failures: Vec<DriverError>) {
        self.fail_plan.lock().expect("fail plan lock").extend(failures);
    }

    fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    fn handle(&self, index: usize) -> MockHandle {
        self.handles.lock().expect("handles lock")[index].clone()
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn connect(
        &self,
        _params: &ConnectParams,
        _credential: &Credential,
        _timeout: Duration,
    ) -> Result<Box<dyn DriverSession>, DriverError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if let Some(err) = self.fail_plan.lock().expect("fail plan lock").pop_front() {
            return Err(err);
        }
        let handle = MockHandle {
            connected: Arc::new(AtomicBool::new(true)),
            probe_ok: Arc::new(AtomicBool::new(true)),
        };
        self.handles.lock().expect("handles lock").push(handle.clone());
        Ok(Box::new(MockSession { handle }))
    }
}

#[async_trait]
impl DriverSession for MockSession {
    fn is_connected(&self) -> bool {
        self.handle.connected.load(Ordering::SeqCst)
    }

    async fn probe(&mut self) -> Result<(), DriverError> {
        if self.is_connected() && self.handle.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DriverError::Transport("probe failed".to_string()))
        }
    }

    async fn execute(&mut self, command: &str, _timeout: Duration) -> Result<String, DriverError> {
        if !self.is_connected() {
            return Err(DriverError::Transport("connection closed".to_string()));
        }
        Ok(format!("ok: {command}"))
    }

    async fn close(&mut self) {
        self.handle.connected.store(false, Ordering::SeqCst);
    }
}

fn pool_config(id: &str, max_connections: u32) -> PoolConfig {
    PoolConfig {
        id: id.to_string(),
        credential_id: "cred-1".to_string(),
        max_connections,
        min_idle: 0,
        max_idle: max_connections,
        idle_timeout_secs: 60,
        connection_timeout_secs: 5,
        max_lifetime_secs: 3600,
    }
}

fn credential(secret: &str) -> Credential {
    Credential {
        id: "cred-1".to_string(),
        username: "admin".to_string(),
        secret: secret.to_string(),
    }
}

fn test_manager_config() -> ManagerConfig {
    ManagerConfig {
        max_retries: 3,
        initial_backoff: Duration::from_millis(10),
        ..ManagerConfig::default()
    }
}

async fn seeded_store(config: PoolConfig) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert_credential(credential("hunter2")).await;
    store.insert_pool(config).await;
    store
}

async fn setup(
    config: PoolConfig,
    driver: MockDriver,
) -> (Arc<MemoryStore>, Arc<MockDriver>, PoolRegistry) {
    let store = seeded_store(config).await;
    let driver = Arc::new(driver);
    let registry = PoolRegistry::new(store.clone(), driver.clone(), &test_manager_config());
    (store, driver, registry)
}

#[tokio::test]
async fn released_session_is_reused_by_next_acquire() {
    let (_store, driver, registry) = setup(pool_config("p1", 4), MockDriver::new()).await;

    let first = registry.acquire("p1", "10.0.0.1").await.expect("first acquire");
    let first_id = first.id();
    registry.release("p1", "10.0.0.1", first).await;
    assert_eq!(
        registry.status("p1", "10.0.0.1").await,
        ConnectionStatus::Idle
    );

    let second = registry.acquire("p1", "10.0.0.1").await.expect("second acquire");
    assert_eq!(second.id(), first_id, "pooled session should be reused");
    assert!(second.is_in_use());
    assert_eq!(driver.connects(), 1, "no second connection attempt");
    assert_eq!(
        registry.status("p1", "10.0.0.1").await,
        ConnectionStatus::Active
    );

    let stats = registry.stats("p1").await.expect("stats");
    assert_eq!((stats.current, stats.total), (1, 1));
}

#[tokio::test]
async fn idle_queues_are_per_host() {
    let (_store, driver, registry) = setup(pool_config("p1", 4), MockDriver::new()).await;

    let a = registry.acquire("p1", "10.0.0.1").await.expect("acquire a");
    registry.release("p1", "10.0.0.1", a).await;

    // A different host must not steal the idle session.
    let b = registry.acquire("p1", "10.0.0.2").await.expect("acquire b");
    assert_eq!(driver.connects(), 2);
    registry.release("p1", "10.0.0.2", b).await;
}

#[tokio::test(start_paused = true)]
async fn saturated_pool_fails_fast_and_recovers_on_release() {
    let (_store, driver, registry) = setup(
        pool_config("p1", 2),
        MockDriver::with_delay(Duration::from_millis(50)),
    )
    .await;

    let (first, second, third) = tokio::join!(
        registry.acquire("p1", "10.0.0.1"),
        registry.acquire("p1", "10.0.0.1"),
        registry.acquire("p1", "10.0.0.1"),
    );

    let first = first.expect("first concurrent acquire");
    let second = second.expect("second concurrent acquire");
    assert!(
        matches!(third, Err(PoolError::CapacityExceeded { max: 2, .. })),
        "third concurrent acquire must fail fast"
    );
    assert_eq!(driver.connects(), 2, "capacity error must not attempt a connect");

    let released_id = first.id();
    registry.release("p1", "10.0.0.1", first).await;

    let retried = registry.acquire("p1", "10.0.0.1").await.expect("retry after release");
    assert_eq!(retried.id(), released_id, "released session is handed back");
    assert_eq!(driver.connects(), 2, "reuse must not open a new connection");

    let stats = registry.stats("p1").await.expect("stats");
    assert_eq!((stats.current, stats.total), (2, 2));
    registry.release("p1", "10.0.0.1", retried).await;
    registry.release("p1", "10.0.0.1", second).await;
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_backoff() {
    let driver = MockDriver::new();
    driver.plan_failures(vec![
        DriverError::Timeout("slow".to_string()),
        DriverError::Timeout("slow again".to_string()),
    ]);
    let (_store, driver, registry) = setup(pool_config("p1", 2), driver).await;

    let session = registry
        .acquire("p1", "10.0.0.1")
        .await
        .expect("third attempt succeeds within max_retries");
    assert_eq!(driver.connects(), 3);

    let stats = registry.stats("p1").await.expect("stats");
    assert_eq!(stats.total, 1, "only the successful creation counts");
    assert_eq!(stats.current, 1);
    registry.release("p1", "10.0.0.1", session).await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_connect_timeout() {
    let driver = MockDriver::new();
    driver.plan_failures(vec![
        DriverError::Timeout("1".to_string()),
        DriverError::Refused("2".to_string()),
        DriverError::Timeout("3".to_string()),
    ]);
    let (_store, driver, registry) = setup(pool_config("p1", 2), driver).await;

    let err = registry.acquire("p1", "10.0.0.1").await.expect_err("must fail");
    assert!(matches!(err, PoolError::ConnectTimeout(_)));
    assert_eq!(driver.connects(), 3);
    assert_eq!(
        registry.status("p1", "10.0.0.1").await,
        ConnectionStatus::Failed
    );

    let stats = registry.stats("p1").await.expect("stats");
    assert_eq!((stats.current, stats.failed), (0, 1));
}

#[tokio::test]
async fn authentication_failure_is_terminal_not_retried() {
    let driver = MockDriver::new();
    driver.plan_failures(vec![DriverError::AuthenticationFailed(
        "10.0.0.1".to_string(),
    )]);
    let (_store, driver, registry) = setup(pool_config("p1", 2), driver).await;

    let err = registry.acquire("p1", "10.0.0.1").await.expect_err("must fail");
    assert!(matches!(err, PoolError::AuthenticationFailed(_)));
    assert_eq!(driver.connects(), 1, "auth rejection must not be retried");
}

#[tokio::test]
async fn unknown_pool_and_credential_are_reported() {
    let store = Arc::new(MemoryStore::new());
    let driver = Arc::new(MockDriver::new());
    let registry = PoolRegistry::new(store.clone(), driver.clone(), &test_manager_config());

    let err = registry.acquire("nope", "10.0.0.1").await.expect_err("no config");
    assert!(matches!(err, PoolError::ConfigNotFound(_)));

    // Pool exists but its credential does not.
    store.insert_pool(pool_config("p1", 2)).await;
    let err = registry.acquire("p1", "10.0.0.1").await.expect_err("no credential");
    assert!(matches!(err, PoolError::CredentialNotFound(_)));
    assert_eq!(driver.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn expired_idle_session_is_never_handed_out() {
    let (_store, driver, registry) = setup(pool_config("p1", 2), MockDriver::new()).await;

    let session = registry.acquire("p1", "10.0.0.1").await.expect("acquire");
    registry.release("p1", "10.0.0.1", session).await;

    // One second past the idle timeout; the reaper has not run yet.
    tokio::time::advance(Duration::from_secs(61)).await;

    let fresh = registry.acquire("p1", "10.0.0.1").await.expect("acquire fresh");
    assert_eq!(driver.connects(), 2, "expired session must not be reused");
    assert!(!driver.handle(0).connected.load(Ordering::SeqCst), "expired session closed");
    registry.release("p1", "10.0.0.1", fresh).await;
}

#[tokio::test(start_paused = true)]
async fn reaper_evicts_idle_sessions_past_timeout() {
    let (_store, driver, registry) = setup(pool_config("p1", 2), MockDriver::new()).await;

    let session = registry.acquire("p1", "10.0.0.1").await.expect("acquire");
    registry.release("p1", "10.0.0.1", session).await;

    tokio::time::advance(Duration::from_secs(61)).await;
    let report = registry.reap_pool("p1").await;
    assert_eq!(report.expired_idle, 1);

    let stats = registry.stats("p1").await.expect("stats");
    assert_eq!(stats.current, 0);
    assert_eq!(
        registry.status("p1", "10.0.0.1").await,
        ConnectionStatus::Disconnected
    );

    // The next acquire triggers a fresh connection.
    let fresh = registry.acquire("p1", "10.0.0.1").await.expect("fresh acquire");
    assert_eq!(driver.connects(), 2);
    registry.release("p1", "10.0.0.1", fresh).await;
}

#[tokio::test(start_paused = true)]
async fn reaper_keeps_warm_floor_but_lifetime_wins() {
    let mut config = pool_config("p1", 4);
    config.min_idle = 1;
    config.max_lifetime_secs = 120;
    let (_store, _driver, registry) = setup(config, MockDriver::new()).await;

    let a = registry.acquire("p1", "10.0.0.1").await.expect("a");
    let b = registry.acquire("p1", "10.0.0.1").await.expect("b");
    registry.release("p1", "10.0.0.1", a).await;
    registry.release("p1", "10.0.0.1", b).await;

    // Past idle timeout, under max lifetime: one session survives as the
    // warm floor.
    tokio::time::advance(Duration::from_secs(61)).await;
    let report = registry.reap_pool("p1").await;
    assert_eq!(report.expired_idle, 1);
    assert_eq!(registry.stats("p1").await.expect("stats").current, 1);

    // Past max lifetime the floor no longer applies.
    tokio::time::advance(Duration::from_secs(60)).await;
    let report = registry.reap_pool("p1").await;
    assert_eq!(report.expired_lifetime, 1);
    assert_eq!(registry.stats("p1").await.expect("stats").current, 0);
}

#[tokio::test]
async fn release_above_max_idle_closes_surplus() {
    let mut config = pool_config("p1", 3);
    config.max_idle = 1;
    let (_store, driver, registry) = setup(config, MockDriver::new()).await;

    let a = registry.acquire("p1", "10.0.0.1").await.expect("a");
    let b = registry.acquire("p1", "10.0.0.1").await.expect("b");
    registry.release("p1", "10.0.0.1", a).await;
    registry.release("p1", "10.0.0.1", b).await;

    let stats = registry.stats("p1").await.expect("stats");
    assert_eq!(stats.current, 1, "surplus idle session leaves the pool");
    assert!(
        !driver.handle(1).connected.load(Ordering::SeqCst),
        "surplus session is closed"
    );
}

#[tokio::test]
async fn dead_session_at_release_is_discarded() {
    let (_store, driver, registry) = setup(pool_config("p1", 2), MockDriver::new()).await;

    let session = registry.acquire("p1", "10.0.0.1").await.expect("acquire");
    driver.handle(0).connected.store(false, Ordering::SeqCst);
    registry.release("p1", "10.0.0.1", session).await;

    let stats = registry.stats("p1").await.expect("stats");
    assert_eq!((stats.current, stats.failed), (0, 1));
    assert_eq!(
        registry.status("p1", "10.0.0.1").await,
        ConnectionStatus::Failed
    );
}

#[tokio::test]
async fn health_probe_discards_dead_idle_sessions() {
    let (_store, driver, registry) = setup(pool_config("p1", 4), MockDriver::new()).await;

    let a = registry.acquire("p1", "10.0.0.1").await.expect("a");
    let b = registry.acquire("p1", "10.0.0.1").await.expect("b");
    registry.release("p1", "10.0.0.1", a).await;
    registry.release("p1", "10.0.0.1", b).await;

    driver.handle(0).probe_ok.store(false, Ordering::SeqCst);

    let report = registry.probe_pool("p1", Duration::from_secs(5)).await;
    assert_eq!((report.probed, report.discarded), (2, 1));
    assert_eq!(
        registry.status("p1", "10.0.0.1").await,
        ConnectionStatus::Failed
    );

    let stats = registry.stats("p1").await.expect("stats");
    assert_eq!((stats.current, stats.failed), (1, 1));

    // The survivor is still reusable.
    let survivor = registry.acquire("p1", "10.0.0.1").await.expect("survivor");
    assert_eq!(driver.connects(), 2);
    registry.release("p1", "10.0.0.1", survivor).await;
}

#[tokio::test]
async fn healthy_probe_leaves_pool_untouched() {
    let (_store, driver, registry) = setup(pool_config("p1", 4), MockDriver::new()).await;

    let session = registry.acquire("p1", "10.0.0.1").await.expect("acquire");
    let id = session.id();
    registry.release("p1", "10.0.0.1", session).await;

    let report = registry.probe_pool("p1", Duration::from_secs(5)).await;
    assert_eq!((report.probed, report.discarded), (1, 0));
    assert_eq!(
        registry.status("p1", "10.0.0.1").await,
        ConnectionStatus::Idle
    );

    let session = registry.acquire("p1", "10.0.0.1").await.expect("reacquire");
    assert_eq!(session.id(), id);
    assert_eq!(driver.connects(), 1);
    registry.release("p1", "10.0.0.1", session).await;
}

#[tokio::test]
async fn credential_rotation_discards_stale_idle_sessions() {
    let (store, driver, registry) = setup(pool_config("p1", 4), MockDriver::new()).await;

    let a = registry.acquire("p1", "10.0.0.1").await.expect("a");
    registry.release("p1", "10.0.0.1", a).await;

    // Rotate the secret, then force a creation that observes it.
    store.insert_credential(credential("rotated")).await;
    let b = registry.acquire("p1", "10.0.0.2").await.expect("b");
    registry.release("p1", "10.0.0.2", b).await;

    // The idle session for host .1 was built with the old secret.
    let c = registry.acquire("p1", "10.0.0.1").await.expect("c");
    assert_eq!(driver.connects(), 3, "stale session replaced by a new one");
    assert!(!driver.handle(0).connected.load(Ordering::SeqCst));
    registry.release("p1", "10.0.0.1", c).await;
}

#[tokio::test]
async fn cleanup_pool_resets_but_keeps_pool_usable() {
    let (_store, driver, registry) = setup(pool_config("p1", 4), MockDriver::new()).await;

    let a = registry.acquire("p1", "10.0.0.1").await.expect("a");
    let b = registry.acquire("p1", "10.0.0.1").await.expect("b");
    registry.release("p1", "10.0.0.1", a).await;

    registry.cleanup_pool("p1").await;

    let stats = registry.stats("p1").await.expect("stats survive cleanup");
    assert_eq!(
        (stats.current, stats.total, stats.failed),
        (1, 0, 0),
        "checked-out session stays counted, lifetime counters restart"
    );
    assert!(!driver.handle(0).connected.load(Ordering::SeqCst), "idle closed");
    assert_eq!(
        registry.status("p1", "10.0.0.1").await,
        ConnectionStatus::Disconnected
    );

    // The pool stays registered: the checked-out session comes back and
    // new acquires work without re-reading the store.
    registry.release("p1", "10.0.0.1", b).await;
    let c = registry.acquire("p1", "10.0.0.1").await.expect("reuse after cleanup");
    registry.release("p1", "10.0.0.1", c).await;
}

#[tokio::test]
async fn close_all_removes_pool_until_reconfigured() {
    let (store, driver, registry) = setup(pool_config("p1", 4), MockDriver::new()).await;

    let session = registry.acquire("p1", "10.0.0.1").await.expect("acquire");
    registry.release("p1", "10.0.0.1", session).await;

    // The pool configuration is deleted along with the pool.
    store.remove_pool("p1").await;
    registry.close_all("p1").await;

    assert_eq!(
        registry.stats("p1").await.map(|s| s.current).unwrap_or(0),
        0
    );
    assert!(!driver.handle(0).connected.load(Ordering::SeqCst));

    let err = registry.acquire("p1", "10.0.0.1").await.expect_err("pool gone");
    assert!(matches!(err, PoolError::ConfigNotFound(_)));

    // Reconfiguring the store brings the pool back.
    store.insert_pool(pool_config("p1", 4)).await;
    let session = registry.acquire("p1", "10.0.0.1").await.expect("reconfigured");
    registry.release("p1", "10.0.0.1", session).await;
}

#[tokio::test(start_paused = true)]
async fn reaper_loop_evicts_on_schedule() {
    let store = seeded_store(pool_config("p1", 2)).await;
    let driver = Arc::new(MockDriver::new());
    let mut config = test_manager_config();
    config.reaper_interval = Duration::from_secs(30);
    let manager = SessionPoolManager::new(store, driver.clone(), config);

    let session = manager.acquire("p1", "10.0.0.1").await.expect("acquire");
    manager.release("p1", "10.0.0.1", session).await;

    tokio::time::advance(Duration::from_secs(61)).await;
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }

    let stats = manager.stats("p1").await.expect("stats");
    assert_eq!(stats.current, 0, "reaper loop evicted the idle session");

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_loops_and_closes_idle_sessions() {
    let store = seeded_store(pool_config("p1", 2)).await;
    let driver = Arc::new(MockDriver::new());
    let manager = SessionPoolManager::new(store, driver.clone(), test_manager_config());

    let session = manager.acquire("p1", "10.0.0.1").await.expect("acquire");
    manager.release("p1", "10.0.0.1", session).await;

    manager.shutdown().await;

    assert!(!driver.handle(0).connected.load(Ordering::SeqCst), "idle closed");
    assert_eq!(manager.stats("p1").await.expect("stats").current, 0);

    // Shutdown is idempotent.
    manager.shutdown().await;
}
