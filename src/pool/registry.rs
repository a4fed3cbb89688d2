use super::*;

enum Next {
    Reuse(Session),
    Create,
    AtCapacity(u32),
}

impl PoolRegistry {
    /// Creates a registry backed by `store` for configuration records and
    /// `driver` for session establishment.
    pub fn new(
        store: Arc<dyn ConfigStore>,
        driver: Arc<dyn Driver>,
        config: &ManagerConfig,
    ) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            store,
            factory: SessionFactory::new(driver, config),
        }
    }

    /// Checks a session out of the pool for `host`.
    ///
    /// Pops the host's idle queue first, discarding expired or
    /// credential-stale candidates on the way. On a miss, reserves
    /// capacity under the pool lock and creates a new session through the
    /// factory outside it; a saturated pool fails fast with
    /// `CapacityExceeded` instead of queueing the caller.
    pub async fn acquire(&self, pool_id: &str, host: &str) -> Result<Session, PoolError> {
        let entry = self.entry_or_init(pool_id).await?;

        let mut stale: Vec<Session> = Vec::new();
        let next = {
            let mut inner = entry.inner.lock().await;
            let fingerprint = inner.credential_fingerprint;
            let queue = inner.idle_by_host.entry(host.to_string()).or_default();
            let mut reuse = None;
            while let Some(mut session) = queue.pop_front() {
                if session.expired(&entry.config) || session.fingerprint() != fingerprint {
                    stale.push(session);
                    continue;
                }
                session.set_in_use(true);
                session.touch();
                reuse = Some(session);
                break;
            }
            if !stale.is_empty() {
                inner.stats.record_discarded(stale.len() as u32);
            }
            match reuse {
                Some(session) => {
                    inner.status.set(host, ConnectionStatus::Active);
                    inner.stats.touch();
                    Next::Reuse(session)
                }
                None => {
                    if inner.stats.current + inner.pending >= entry.config.max_connections {
                        Next::AtCapacity(entry.config.max_connections)
                    } else {
                        inner.pending += 1;
                        Next::Create
                    }
                }
            }
        };

        close_batch(stale).await;

        match next {
            Next::Reuse(session) => {
                debug!(
                    "pool {}: reusing idle session {} for {}",
                    pool_id,
                    session.id(),
                    host
                );
                Ok(session)
            }
            Next::AtCapacity(max) => {
                debug!("pool {}: at capacity ({} connections)", pool_id, max);
                Err(PoolError::CapacityExceeded {
                    pool: pool_id.to_string(),
                    max,
                })
            }
            Next::Create => self.create_for(&entry, pool_id, host).await,
        }
    }

    /// Creates a new session while holding one `pending` reservation.
    /// Every exit path returns the reservation.
    async fn create_for(
        &self,
        entry: &Arc<PoolEntry>,
        pool_id: &str,
        host: &str,
    ) -> Result<Session, PoolError> {
        let credential = match self.store.credential(&entry.config.credential_id).await {
            Some(credential) => credential,
            None => {
                let mut inner = entry.inner.lock().await;
                inner.pending = inner.pending.saturating_sub(1);
                return Err(PoolError::CredentialNotFound(
                    entry.config.credential_id.clone(),
                ));
            }
        };

        match self.factory.create(&entry.config, &credential, host).await {
            Ok(session) => {
                let mut inner = entry.inner.lock().await;
                inner.pending = inner.pending.saturating_sub(1);
                inner.credential_fingerprint = credential.fingerprint();
                inner.stats.record_created();
                inner.status.set(host, ConnectionStatus::Active);
                debug!(
                    "pool {}: created session {} for {}",
                    pool_id,
                    session.id(),
                    host
                );
                Ok(session)
            }
            Err(err) => {
                let mut inner = entry.inner.lock().await;
                inner.pending = inner.pending.saturating_sub(1);
                inner.stats.record_connect_failure();
                inner.status.set(host, ConnectionStatus::Failed);
                warn!("pool {}: session creation for {} failed: {}", pool_id, host, err);
                Err(err)
            }
        }
    }

    /// Returns a checked-out session to its pool.
    ///
    /// A session that fails the cheap liveness check is discarded and
    /// counted as failed; a healthy one re-enters the idle FIFO for its
    /// host, bounded by `max_idle`. Never propagates errors: release is
    /// fire-and-forget for the caller.
    pub async fn release(&self, pool_id: &str, host: &str, mut session: Session) {
        debug_assert_eq!(host, session.host());

        let Some(entry) = self.entry(pool_id).await else {
            debug!(
                "pool {}: released session {} after close; dropping",
                pool_id,
                session.id()
            );
            session.close().await;
            return;
        };

        if !session.is_connected() {
            {
                let mut inner = entry.inner.lock().await;
                inner.stats.record_dead(1);
                inner.status.set(host, ConnectionStatus::Failed);
            }
            debug!(
                "pool {}: session {} for {} dead at release",
                pool_id,
                session.id(),
                host
            );
            session.close().await;
            return;
        }

        session.set_in_use(false);
        session.touch();

        let surplus = {
            let mut inner = entry.inner.lock().await;
            let max_idle = entry.config.max_idle as usize;
            let queue = inner.idle_by_host.entry(host.to_string()).or_default();
            let surplus = if queue.len() >= max_idle {
                Some(session)
            } else {
                queue.push_back(session);
                None
            };
            let has_idle = !queue.is_empty();
            if surplus.is_some() {
                inner.stats.record_discarded(1);
            }
            if has_idle {
                inner.status.set(host, ConnectionStatus::Idle);
            }
            inner.stats.touch();
            surplus
        };

        if let Some(mut session) = surplus {
            debug!(
                "pool {}: idle queue for {} full; closing surplus session {}",
                pool_id,
                host,
                session.id()
            );
            session.close().await;
        }
    }

    /// Drains and closes every idle session across all hosts, resets the
    /// counters, but leaves the pool registered for reuse.
    pub async fn cleanup_pool(&self, pool_id: &str) {
        let Some(entry) = self.entry(pool_id).await else {
            return;
        };
        let drained = drain_entry(&entry).await;
        debug!(
            "pool {}: cleanup closed {} idle sessions",
            pool_id,
            drained.len()
        );
        close_batch(drained).await;
    }

    /// Cleans the pool up and removes its entry entirely. Used when the
    /// pool configuration is deleted; a later acquire re-reads the store.
    pub async fn close_all(&self, pool_id: &str) {
        let removed = self.pools.write().await.remove(pool_id);
        let Some(entry) = removed else {
            return;
        };
        let drained = drain_entry(&entry).await;
        debug!(
            "pool {}: close_all closed {} idle sessions",
            pool_id,
            drained.len()
        );
        close_batch(drained).await;
    }

    /// Current status for a (pool, host) pair. Unknown pools and hosts
    /// report `Disconnected`.
    pub async fn status(&self, pool_id: &str, host: &str) -> ConnectionStatus {
        let Some(entry) = self.entry(pool_id).await else {
            return ConnectionStatus::Disconnected;
        };
        let inner = entry.inner.lock().await;
        inner.status.get(host)
    }

    /// Point-in-time statistics for one pool, or `None` for unknown ids.
    pub async fn stats(&self, pool_id: &str) -> Option<PoolStatsSnapshot> {
        let entry = self.entry(pool_id).await?;
        let inner = entry.inner.lock().await;
        Some(inner.stats.snapshot(pool_id))
    }

    /// Snapshots every registered pool, for the periodic reporting layer.
    pub async fn snapshot_all(&self) -> Vec<PoolStatsSnapshot> {
        let entries: Vec<(String, Arc<PoolEntry>)> = {
            let pools = self.pools.read().await;
            pools
                .iter()
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect()
        };
        let mut snapshots = Vec::with_capacity(entries.len());
        for (pool_id, entry) in entries {
            let inner = entry.inner.lock().await;
            snapshots.push(inner.stats.snapshot(&pool_id));
        }
        snapshots
    }

    pub async fn pool_ids(&self) -> Vec<String> {
        self.pools.read().await.keys().cloned().collect()
    }

    /// One health sweep over a pool: drains the idle queues of hosts
    /// marked `Active` or `Idle`, probes each session outside the lock,
    /// and re-enqueues the survivors. Checked-out sessions are never
    /// touched. A probe failure transitions the host to `Failed`; a
    /// sweep that finds no idle sessions leaves status unchanged.
    pub async fn probe_pool(&self, pool_id: &str, probe_timeout: Duration) -> ProbeReport {
        let Some(entry) = self.entry(pool_id).await else {
            return ProbeReport::default();
        };

        let drained: Vec<(String, Vec<Session>)> = {
            let mut inner = entry.inner.lock().await;
            let eligible: Vec<String> = inner
                .idle_by_host
                .iter()
                .filter(|(host, queue)| {
                    !queue.is_empty()
                        && matches!(
                            inner.status.get(host),
                            ConnectionStatus::Active | ConnectionStatus::Idle
                        )
                })
                .map(|(host, _)| host.clone())
                .collect();
            eligible
                .into_iter()
                .map(|host| {
                    let sessions = inner
                        .idle_by_host
                        .get_mut(&host)
                        .map(|queue| queue.drain(..).collect())
                        .unwrap_or_default();
                    (host, sessions)
                })
                .collect()
        };

        let mut report = ProbeReport::default();
        for (host, sessions) in drained {
            let mut alive = Vec::new();
            let mut dead = 0u32;
            for mut session in sessions {
                report.probed += 1;
                match tokio::time::timeout(probe_timeout, session.probe()).await {
                    Ok(Ok(())) => alive.push(session),
                    Ok(Err(err)) => {
                        debug!(
                            "pool {}: probe failed for session {} on {}: {}",
                            pool_id,
                            session.id(),
                            host,
                            err
                        );
                        dead += 1;
                        session.close().await;
                    }
                    Err(_) => {
                        debug!(
                            "pool {}: probe timed out for session {} on {}",
                            pool_id,
                            session.id(),
                            host
                        );
                        dead += 1;
                        session.close().await;
                    }
                }
            }
            report.discarded += dead as usize;

            let mut inner = entry.inner.lock().await;
            let queue = inner.idle_by_host.entry(host.clone()).or_default();
            for session in alive {
                queue.push_back(session);
            }
            if dead > 0 {
                inner.stats.record_dead(dead);
                inner.status.set(&host, ConnectionStatus::Failed);
            }
        }
        report
    }

    /// One reaper pass over a pool. Lifetime eviction is unconditional;
    /// idle-timeout eviction keeps up to `min_idle` warm sessions per
    /// host; whatever still exceeds `max_idle` is trimmed oldest-first.
    /// Counter updates happen under the pool lock, the closes after it
    /// is released.
    pub async fn reap_pool(&self, pool_id: &str) -> ReapReport {
        let Some(entry) = self.entry(pool_id).await else {
            return ReapReport::default();
        };
        let config = &entry.config;

        let mut report = ReapReport::default();
        let evicted: Vec<Session> = {
            let mut inner = entry.inner.lock().await;
            let mut evicted = Vec::new();
            let mut emptied_hosts: Vec<String> = Vec::new();

            for (host, queue) in inner.idle_by_host.iter_mut() {
                let before = evicted.len();

                let mut kept = VecDeque::with_capacity(queue.len());
                while let Some(session) = queue.pop_front() {
                    if session.age() > config.max_lifetime() {
                        report.expired_lifetime += 1;
                        evicted.push(session);
                    } else {
                        kept.push_back(session);
                    }
                }
                *queue = kept;

                loop {
                    if queue.len() <= config.min_idle as usize {
                        break;
                    }
                    let front_expired = queue
                        .front()
                        .map(|session| session.idle_for() > config.idle_timeout())
                        .unwrap_or(false);
                    if !front_expired {
                        break;
                    }
                    if let Some(session) = queue.pop_front() {
                        report.expired_idle += 1;
                        evicted.push(session);
                    }
                }

                while queue.len() > config.max_idle as usize {
                    if let Some(session) = queue.pop_front() {
                        report.trimmed += 1;
                        evicted.push(session);
                    } else {
                        break;
                    }
                }

                if queue.is_empty() && evicted.len() > before {
                    emptied_hosts.push(host.clone());
                }
            }

            if !evicted.is_empty() {
                inner.stats.record_discarded(evicted.len() as u32);
            }
            for host in emptied_hosts {
                if inner.status.get(&host) == ConnectionStatus::Idle {
                    inner.status.set(&host, ConnectionStatus::Disconnected);
                }
            }
            evicted
        };

        if !evicted.is_empty() {
            debug!(
                "pool {}: reaper evicted {} sessions ({} lifetime, {} idle, {} surplus)",
                pool_id,
                evicted.len(),
                report.expired_lifetime,
                report.expired_idle,
                report.trimmed
            );
        }
        close_batch(evicted).await;
        report
    }

    async fn entry(&self, pool_id: &str) -> Option<Arc<PoolEntry>> {
        self.pools.read().await.get(pool_id).cloned()
    }

    /// Returns the pool entry, initializing it from the store on first
    /// use. The config and credential records are read before the write
    /// lock is taken; a racing initializer wins harmlessly.
    async fn entry_or_init(&self, pool_id: &str) -> Result<Arc<PoolEntry>, PoolError> {
        if let Some(entry) = self.entry(pool_id).await {
            return Ok(entry);
        }

        debug!("pool {}: initializing from store", pool_id);
        let config = self
            .store
            .pool_config(pool_id)
            .await
            .ok_or_else(|| PoolError::ConfigNotFound(pool_id.to_string()))?;
        let credential = self
            .store
            .credential(&config.credential_id)
            .await
            .ok_or_else(|| PoolError::CredentialNotFound(config.credential_id.clone()))?;

        let mut pools = self.pools.write().await;
        let entry = pools.entry(pool_id.to_string()).or_insert_with(|| {
            Arc::new(PoolEntry {
                config,
                inner: Mutex::new(PoolInner::new(credential.fingerprint())),
            })
        });
        Ok(entry.clone())
    }
}

async fn drain_entry(entry: &Arc<PoolEntry>) -> Vec<Session> {
    let mut inner = entry.inner.lock().await;
    let mut drained = Vec::new();
    for queue in inner.idle_by_host.values_mut() {
        drained.extend(queue.drain(..));
    }
    inner.status.mark_all(ConnectionStatus::Disconnected);
    inner.stats.reset_after_drain(drained.len() as u32);
    drained
}

async fn close_batch(sessions: Vec<Session>) {
    for mut session in sessions {
        session.close().await;
    }
}
