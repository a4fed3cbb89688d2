use super::*;

impl Session {
    pub(crate) fn new(
        id: u64,
        host: String,
        credential_fingerprint: [u8; 32],
        conn: Box<dyn DriverSession>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            host,
            created_at: now,
            last_used_at: now,
            in_use: true,
            credential_fingerprint,
            conn,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    /// Total age since establishment.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the session last ran a command or changed hands.
    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Cheap connectivity flag from the underlying driver session.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Runs one command on the remote shell.
    pub async fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, DriverError> {
        let output = self.conn.execute(command, timeout).await;
        if output.is_ok() {
            self.touch();
        }
        output
    }

    pub(crate) fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    pub(crate) fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }

    pub(crate) fn fingerprint(&self) -> [u8; 32] {
        self.credential_fingerprint
    }

    /// True once either expiry bound is violated. An expired idle session
    /// is never handed out, even before the reaper has seen it.
    pub(crate) fn expired(&self, config: &PoolConfig) -> bool {
        self.idle_for() > config.idle_timeout() || self.age() > config.max_lifetime()
    }

    pub(crate) async fn probe(&mut self) -> Result<(), DriverError> {
        self.conn.probe().await
    }

    pub(crate) async fn close(&mut self) {
        self.conn.close().await;
    }
}
