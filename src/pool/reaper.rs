use super::*;

impl IdleReaper {
    pub fn new(
        registry: Arc<PoolRegistry>,
        config: &ManagerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            interval: config.reaper_interval,
            cancel,
        }
    }

    /// Runs the reaper loop until its cancellation token fires.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        debug!("idle reaper started (interval {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.sweep().await,
            }
        }
        debug!("idle reaper stopped");
    }

    /// Evicts expired and surplus idle sessions across every pool.
    pub async fn sweep(&self) {
        for pool_id in self.registry.pool_ids().await {
            let report = self.registry.reap_pool(&pool_id).await;
            if report.evicted() > 0 {
                debug!(
                    "pool {}: reaper pass evicted {} sessions",
                    pool_id,
                    report.evicted()
                );
            }
        }
    }
}
