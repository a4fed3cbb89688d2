//! Runtime configuration for the pool manager.
//!
//! Per-pool limits and timeouts come from the external store as
//! [`crate::store::PoolConfig`] records; this module holds the settings
//! that belong to the manager process itself: background loop cadence,
//! retry policy, and shutdown behavior.

use std::time::Duration;

/// Default interval between health-monitor sweeps.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Default interval between idle-reaper sweeps.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// Default bound on a single liveness probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default connection attempts per acquire (first try included).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default first backoff delay; doubles on each further attempt.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Default grace period for background loops to exit on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Process-level settings for a [`crate::pool::SessionPoolManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How often the health monitor probes idle sessions.
    pub health_check_interval: Duration,

    /// How often the idle reaper evicts expired and surplus sessions.
    pub reaper_interval: Duration,

    /// Upper bound on one liveness probe against a single session.
    pub probe_timeout: Duration,

    /// Connection attempts allowed per session creation, counting the
    /// first try. Only transient failures are retried.
    pub max_retries: u32,

    /// Backoff before the second attempt; doubled for each attempt after.
    pub initial_backoff: Duration,

    /// How long `shutdown` waits for the background loops before
    /// aborting them.
    pub shutdown_grace: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            reaper_interval: DEFAULT_REAPER_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}
