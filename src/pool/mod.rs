//! Session pooling, admission control, and lifecycle management.
//!
//! Establishing an interactive session to a network device is expensive
//! relative to running a command, so sessions are pooled per pool
//! configuration and per target host and reused across operations. This
//! module holds the whole pooling core:
//!
//! # Main Components
//!
//! - [`SessionPoolManager`] - owns the registry and both background loops
//! - [`PoolRegistry`] - per-pool state, acquire/release/cleanup/close-all
//! - [`SessionFactory`] - session creation with retry/backoff
//! - [`HealthMonitor`] - periodic liveness probing of idle sessions
//! - [`IdleReaper`] - idle/lifetime eviction and surplus trimming
//! - [`Session`] - a live session checked out of (or idle in) a pool
//!
//! The manager is an explicitly constructed instance whose lifetime is
//! owned by the surrounding application; there is no global state.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, trace, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ManagerConfig;
use crate::driver::{ConnectParams, Driver, DriverError, DriverSession};
use crate::error::PoolError;
use crate::store::{ConfigStore, Credential, PoolConfig};

/// Lifecycle status of a (pool, host) pair.
///
/// Tracked per host, not per session: one value summarizes the most
/// recent transition observed for that host's sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No session established, or every session was evicted.
    #[default]
    Disconnected,
    /// At least one session is checked out.
    Active,
    /// Sessions are parked in the idle queue.
    Idle,
    /// The last probe, release check, or connect attempt failed.
    Failed,
}

/// A live, authenticated session to one target host.
///
/// Owned exclusively: either a single caller holds it between `acquire`
/// and `release`, or it sits in its pool's idle queue. Never both.
pub struct Session {
    id: u64,
    host: String,
    created_at: Instant,
    last_used_at: Instant,
    in_use: bool,
    credential_fingerprint: [u8; 32],
    conn: Box<dyn DriverSession>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("created_at", &self.created_at)
            .field("last_used_at", &self.last_used_at)
            .field("in_use", &self.in_use)
            .field("credential_fingerprint", &self.credential_fingerprint)
            .finish_non_exhaustive()
    }
}

/// Creates sessions on pool miss. Owns the retry/backoff policy.
pub struct SessionFactory {
    driver: Arc<dyn Driver>,
    max_retries: u32,
    initial_backoff: Duration,
    next_id: AtomicU64,
}

/// Per-pool counters: live sessions, creations, failures, last use.
pub(crate) struct StatsRecorder {
    pub(crate) current: u32,
    pub(crate) total: u64,
    pub(crate) failed: u64,
    pub(crate) last_used: Option<Instant>,
}

/// Per-host [`ConnectionStatus`] within one pool.
pub(crate) struct StatusTracker {
    by_host: HashMap<String, ConnectionStatus>,
}

/// Mutable pool state, guarded by the pool's single lock.
pub(crate) struct PoolInner {
    pub(crate) idle_by_host: HashMap<String, VecDeque<Session>>,
    pub(crate) status: StatusTracker,
    pub(crate) stats: StatsRecorder,
    /// In-flight session creations, held against `max_connections` so
    /// concurrent acquires cannot overshoot the cap.
    pub(crate) pending: u32,
    /// Fingerprint of the credential used by the most recent successful
    /// creation; idle sessions built with another secret are discarded
    /// on reuse instead of handed out.
    pub(crate) credential_fingerprint: [u8; 32],
}

struct PoolEntry {
    config: PoolConfig,
    inner: Mutex<PoolInner>,
}

/// The central pool data structure: one locked [`PoolInner`] per pool id.
///
/// All slow work (driver connects, probes, closes) happens outside the
/// per-pool lock so one host's latency never blocks another host's
/// traffic on the same pool.
pub struct PoolRegistry {
    pools: RwLock<HashMap<String, Arc<PoolEntry>>>,
    store: Arc<dyn ConfigStore>,
    factory: SessionFactory,
}

/// Background loop probing idle sessions with a benign command.
pub struct HealthMonitor {
    registry: Arc<PoolRegistry>,
    interval: Duration,
    probe_timeout: Duration,
    cancel: CancellationToken,
}

/// Background loop evicting expired and surplus idle sessions.
pub struct IdleReaper {
    registry: Arc<PoolRegistry>,
    interval: Duration,
    cancel: CancellationToken,
}

/// Owns a [`PoolRegistry`] plus the monitor and reaper loops.
///
/// Constructed explicitly with its collaborators injected; dropping it
/// without calling [`SessionPoolManager::shutdown`] detaches the loops.
pub struct SessionPoolManager {
    registry: Arc<PoolRegistry>,
    cancel: CancellationToken,
    loops: std::sync::Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    shutdown_grace: Duration,
}

/// Point-in-time statistics for one pool, safe to serialize and push to
/// an external metrics store.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PoolStatsSnapshot {
    pub pool_id: String,
    /// Live sessions: checked out + idle.
    pub current: u32,
    /// Sessions ever created since the last cleanup.
    pub total: u64,
    /// Connect failures plus sessions discarded as dead.
    pub failed: u64,
    /// Seconds since the pool last served or accepted a session.
    pub last_used_secs_ago: Option<u64>,
}

/// Outcome of one health sweep over a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub probed: usize,
    pub discarded: usize,
}

/// Outcome of one reaper pass over a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub expired_idle: usize,
    pub expired_lifetime: usize,
    pub trimmed: usize,
}

impl ReapReport {
    pub fn evicted(&self) -> usize {
        self.expired_idle + self.expired_lifetime + self.trimmed
    }
}

mod factory;
mod manager;
mod monitor;
mod reaper;
mod registry;
mod session;
mod stats;
