use super::*;

impl HealthMonitor {
    pub fn new(
        registry: Arc<PoolRegistry>,
        config: &ManagerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            interval: config.health_check_interval,
            probe_timeout: config.probe_timeout,
            cancel,
        }
    }

    /// Runs the monitor loop until its cancellation token fires.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        debug!("health monitor started (interval {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; a fresh registry has
        // nothing to probe yet.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.sweep().await,
            }
        }
        debug!("health monitor stopped");
    }

    /// Probes every pool once. One device's misbehavior is confined to
    /// its own pool; the sweep always visits the rest.
    pub async fn sweep(&self) {
        for pool_id in self.registry.pool_ids().await {
            let report = self.registry.probe_pool(&pool_id, self.probe_timeout).await;
            if report.discarded > 0 {
                warn!(
                    "pool {}: health sweep discarded {}/{} idle sessions",
                    pool_id, report.discarded, report.probed
                );
            } else if report.probed > 0 {
                trace!(
                    "pool {}: health sweep probed {} idle sessions",
                    pool_id, report.probed
                );
            }
        }
    }
}
