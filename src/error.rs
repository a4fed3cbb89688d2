//! Error types for pool management and session establishment.
//!
//! `PoolError` is the taxonomy surfaced to callers of the pool API;
//! driver-level failures are classified first as [`crate::driver::DriverError`]
//! and mapped here by the session factory.

use thiserror::Error;

/// Errors that can occur while acquiring or managing pooled sessions.
#[derive(Error, Debug)]
pub enum PoolError {
    /// No pool configuration record exists for the requested pool id.
    #[error("pool config not found: {0}")]
    ConfigNotFound(String),

    /// The credential referenced by the pool configuration is missing.
    #[error("credential not found: {0}")]
    CredentialNotFound(String),

    /// The pool is already running `max_connections` live sessions.
    ///
    /// Callers are expected to fail fast and apply backpressure at their
    /// own layer rather than queue on the pool.
    #[error("pool {pool} at capacity ({max} connections)")]
    CapacityExceeded { pool: String, max: u32 },

    /// Session establishment did not complete within the configured
    /// timeout budget, including retries on transient failures.
    #[error("connect timeout for {0}")]
    ConnectTimeout(String),

    /// The remote device rejected the supplied credentials.
    ///
    /// Terminal: never retried, surfaced to the caller immediately.
    #[error("authentication failed for {0}")]
    AuthenticationFailed(String),

    /// An idle session failed its liveness check and was discarded.
    #[error("session liveness check failed: {0}")]
    SessionDead(String),

    /// The underlying transport failed in a non-retryable way.
    #[error("transport failure: {0}")]
    Transport(String),
}
