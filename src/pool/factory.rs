use super::*;

impl SessionFactory {
    pub(crate) fn new(driver: Arc<dyn Driver>, config: &ManagerConfig) -> Self {
        Self {
            driver,
            max_retries: config.max_retries.max(1),
            initial_backoff: config.initial_backoff,
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates one live session for `host`.
    ///
    /// Transient failures (connect timeout, connection refused) are
    /// retried with exponential backoff, doubling from the initial delay,
    /// up to `max_retries` attempts in total. Authentication rejections
    /// and other terminal failures short-circuit immediately: a wrong
    /// password will not resolve by waiting. Each attempt is bounded by
    /// the pool's `connection_timeout`.
    pub(crate) async fn create(
        &self,
        config: &PoolConfig,
        credential: &Credential,
        host: &str,
    ) -> Result<Session, PoolError> {
        let params = ConnectParams::parse(host);
        let attempt_timeout = config.connection_timeout();
        let mut backoff = self.initial_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let outcome = tokio::time::timeout(
                attempt_timeout,
                self.driver.connect(&params, credential, attempt_timeout),
            )
            .await;

            let err = match outcome {
                Ok(Ok(conn)) => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    debug!("created session {} for {} (attempt {})", id, host, attempt);
                    return Ok(Session::new(
                        id,
                        host.to_string(),
                        credential.fingerprint(),
                        conn,
                    ));
                }
                Ok(Err(err)) => err,
                Err(_) => DriverError::Timeout(format!(
                    "connect to {host} exceeded {attempt_timeout:?}"
                )),
            };

            if !err.is_transient() {
                debug!("session creation for {} failed terminally: {}", host, err);
                return Err(map_terminal(err, host));
            }
            if attempt >= self.max_retries {
                warn!(
                    "session creation for {} exhausted {} attempts: {}",
                    host, attempt, err
                );
                return Err(PoolError::ConnectTimeout(host.to_string()));
            }

            debug!(
                "transient connect failure for {} (attempt {}): {}; retrying in {:?}",
                host, attempt, err, backoff
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }
}

fn map_terminal(err: DriverError, host: &str) -> PoolError {
    match err {
        DriverError::AuthenticationFailed(_) => PoolError::AuthenticationFailed(host.to_string()),
        DriverError::Timeout(_) | DriverError::Refused(_) => {
            PoolError::ConnectTimeout(host.to_string())
        }
        DriverError::Transport(message) | DriverError::Protocol(message) => {
            PoolError::Transport(message)
        }
    }
}
