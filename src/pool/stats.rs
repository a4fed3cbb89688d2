use super::*;

impl StatsRecorder {
    pub(crate) fn new() -> Self {
        Self {
            current: 0,
            total: 0,
            failed: 0,
            last_used: None,
        }
    }

    pub(crate) fn record_created(&mut self) {
        self.current += 1;
        self.total += 1;
        self.touch();
    }

    /// Sessions that left the pool without counting as failures
    /// (expired, surplus, credential-stale).
    pub(crate) fn record_discarded(&mut self, n: u32) {
        self.current = self.current.saturating_sub(n);
    }

    /// Sessions discarded because they were dead or failed a probe.
    pub(crate) fn record_dead(&mut self, n: u32) {
        self.current = self.current.saturating_sub(n);
        self.failed += u64::from(n);
    }

    pub(crate) fn record_connect_failure(&mut self) {
        self.failed += 1;
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Some(Instant::now());
    }

    /// Cleanup semantics: the drained idle sessions leave `current`, the
    /// lifetime counters start over. Sessions still checked out stay in
    /// `current` so the count remains consistent when they come back.
    pub(crate) fn reset_after_drain(&mut self, drained: u32) {
        self.current = self.current.saturating_sub(drained);
        self.total = 0;
        self.failed = 0;
        self.last_used = None;
    }

    pub(crate) fn snapshot(&self, pool_id: &str) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            pool_id: pool_id.to_string(),
            current: self.current,
            total: self.total,
            failed: self.failed,
            last_used_secs_ago: self.last_used.map(|at| at.elapsed().as_secs()),
        }
    }
}

impl StatusTracker {
    pub(crate) fn new() -> Self {
        Self {
            by_host: HashMap::new(),
        }
    }

    pub(crate) fn get(&self, host: &str) -> ConnectionStatus {
        self.by_host.get(host).copied().unwrap_or_default()
    }

    pub(crate) fn set(&mut self, host: &str, status: ConnectionStatus) {
        self.by_host.insert(host.to_string(), status);
    }

    pub(crate) fn mark_all(&mut self, status: ConnectionStatus) {
        for value in self.by_host.values_mut() {
            *value = status;
        }
    }
}

impl PoolInner {
    pub(crate) fn new(credential_fingerprint: [u8; 32]) -> Self {
        Self {
            idle_by_host: HashMap::new(),
            status: StatusTracker::new(),
            stats: StatsRecorder::new(),
            pending: 0,
            credential_fingerprint,
        }
    }
}
