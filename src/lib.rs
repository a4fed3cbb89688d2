//! # rnetpool - Session Pool Manager for Network Devices
//!
//! `rnetpool` maintains pools of long-lived, interactive SSH sessions to
//! network devices (routers, switches, firewalls). Establishing such a
//! session is expensive relative to running a command, so sessions are
//! pooled per logical configuration and per target host and reused across
//! many short-lived operations.
//!
//! ## Features
//!
//! - **Admission Control**: Hard per-pool cap with fail-fast `CapacityExceeded`
//! - **Session Reuse**: Released sessions return to a per-host idle queue
//! - **Retry with Backoff**: Transient connect failures retried, doubling delays
//! - **Background Health Checks**: Idle sessions probed and dead ones discarded
//! - **Idle/Lifetime Eviction**: Expired and surplus sessions reaped on a timer
//! - **Consistent Statistics**: Per-pool counters and per-host status tracking
//! - **Async/Await**: Built on Tokio; background loops are cancellable
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use rnetpool::config::ManagerConfig;
//! use rnetpool::driver::{SshDriver, SshOptions};
//! use rnetpool::pool::SessionPoolManager;
//! use rnetpool::store::{Credential, MemoryStore, PoolConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Seed the configuration store (normally the persistence layer).
//!     let store = MemoryStore::new();
//!     store
//!         .insert_credential(Credential {
//!             id: "lab-admin".to_string(),
//!             username: "admin".to_string(),
//!             secret: "password".to_string(),
//!         })
//!         .await;
//!     store
//!         .insert_pool(PoolConfig {
//!             id: "edge-routers".to_string(),
//!             credential_id: "lab-admin".to_string(),
//!             max_connections: 8,
//!             min_idle: 1,
//!             max_idle: 4,
//!             idle_timeout_secs: 300,
//!             connection_timeout_secs: 10,
//!             max_lifetime_secs: 3600,
//!         })
//!         .await;
//!
//!     // Build the manager; background loops start immediately.
//!     let manager = SessionPoolManager::new(
//!         Arc::new(store),
//!         Arc::new(SshDriver::new(SshOptions::legacy_compatible())),
//!         ManagerConfig::default(),
//!     );
//!
//!     // Check a session out, run a command, hand it back.
//!     let mut session = manager.acquire("edge-routers", "192.168.1.1").await?;
//!     let output = session
//!         .execute("show version", Duration::from_secs(60))
//!         .await?;
//!     println!("{output}");
//!     manager.release("edge-routers", "192.168.1.1", session).await;
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`pool::SessionPoolManager`] - Owns the registry and background loops
//! - [`pool::PoolRegistry`] - Acquire/release/cleanup across per-pool state
//! - [`driver::Driver`] - Protocol abstraction; [`driver::SshDriver`] ships
//! - [`store::ConfigStore`] - Read-only pool/credential configuration records
//! - [`error::PoolError`] - Typed errors surfaced by the pool API

pub mod config;
pub mod driver;
pub mod error;
pub mod pool;
pub mod store;
