use super::*;

impl SessionPoolManager {
    /// Builds a manager from its injected collaborators and starts both
    /// background loops immediately.
    pub fn new(
        store: Arc<dyn ConfigStore>,
        driver: Arc<dyn Driver>,
        config: ManagerConfig,
    ) -> Self {
        let registry = Arc::new(PoolRegistry::new(store, driver, &config));
        let cancel = CancellationToken::new();

        let monitor = HealthMonitor::new(registry.clone(), &config, cancel.child_token());
        let reaper = IdleReaper::new(registry.clone(), &config, cancel.child_token());
        let loops = vec![
            ("health monitor", monitor.spawn()),
            ("idle reaper", reaper.spawn()),
        ];

        Self {
            registry,
            cancel,
            loops: std::sync::Mutex::new(loops),
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Direct access to the registry, e.g. for on-demand probe or reap
    /// passes.
    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    pub async fn acquire(&self, pool_id: &str, host: &str) -> Result<Session, PoolError> {
        self.registry.acquire(pool_id, host).await
    }

    pub async fn release(&self, pool_id: &str, host: &str, session: Session) {
        self.registry.release(pool_id, host, session).await;
    }

    pub async fn cleanup_pool(&self, pool_id: &str) {
        self.registry.cleanup_pool(pool_id).await;
    }

    pub async fn close_all(&self, pool_id: &str) {
        self.registry.close_all(pool_id).await;
    }

    pub async fn status(&self, pool_id: &str, host: &str) -> ConnectionStatus {
        self.registry.status(pool_id, host).await
    }

    pub async fn stats(&self, pool_id: &str) -> Option<PoolStatsSnapshot> {
        self.registry.stats(pool_id).await
    }

    pub async fn snapshot_all(&self) -> Vec<PoolStatsSnapshot> {
        self.registry.snapshot_all().await
    }

    /// Signals both background loops to stop, waits for them up to the
    /// shutdown grace period (aborting stragglers), then closes every
    /// idle session still pooled. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let drained: Vec<(&'static str, JoinHandle<()>)> = match self.loops.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for (name, handle) in drained {
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.shutdown_grace, handle).await {
                Ok(_) => debug!("{} stopped", name),
                Err(_) => {
                    warn!(
                        "{} did not stop within {:?}; aborting",
                        name, self.shutdown_grace
                    );
                    abort.abort();
                }
            }
        }

        for pool_id in self.registry.pool_ids().await {
            self.registry.cleanup_pool(&pool_id).await;
        }
    }
}
