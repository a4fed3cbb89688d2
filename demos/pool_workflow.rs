use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use rnetpool::config::ManagerConfig;
use rnetpool::driver::{SshDriver, SshOptions};
use rnetpool::pool::SessionPoolManager;
use rnetpool::store::{Credential, MemoryStore, PoolConfig};

/// Acquires a pooled session to one device, runs a few read-only
/// commands, and prints the pool statistics afterwards.
///
/// Usage:
///   DEVICE_HOST=192.168.1.1 DEVICE_USER=admin DEVICE_PASSWORD=secret \
///     cargo run --example pool_workflow
#[tokio::main]
async fn main() -> Result<()> {
    let host = std::env::var("DEVICE_HOST").context("DEVICE_HOST not set")?;
    let user = std::env::var("DEVICE_USER").context("DEVICE_USER not set")?;
    let password = std::env::var("DEVICE_PASSWORD").context("DEVICE_PASSWORD not set")?;

    let store = MemoryStore::new();
    store
        .insert_credential(Credential {
            id: "demo-cred".to_string(),
            username: user,
            secret: password,
        })
        .await;
    store
        .insert_pool(PoolConfig {
            id: "demo-pool".to_string(),
            credential_id: "demo-cred".to_string(),
            max_connections: 4,
            min_idle: 1,
            max_idle: 2,
            idle_timeout_secs: 300,
            connection_timeout_secs: 10,
            max_lifetime_secs: 3600,
        })
        .await;

    let manager = SessionPoolManager::new(
        Arc::new(store),
        Arc::new(SshDriver::new(SshOptions::legacy_compatible())),
        ManagerConfig::default(),
    );

    let mut session = manager
        .acquire("demo-pool", &host)
        .await
        .context("acquire session")?;
    println!("session {} established to {}", session.id(), session.host());

    for command in ["show version", "show clock"] {
        let output = session
            .execute(command, Duration::from_secs(30))
            .await
            .with_context(|| format!("execute '{command}'"))?;
        println!("--- {command}\n{output}");
    }

    manager.release("demo-pool", &host, session).await;

    // A second acquire for the same host reuses the pooled session.
    let session = manager
        .acquire("demo-pool", &host)
        .await
        .context("reacquire session")?;
    println!("reacquired session {} from the pool", session.id());
    manager.release("demo-pool", &host, session).await;

    let snapshots = manager.snapshot_all().await;
    println!("{}", serde_json::to_string_pretty(&snapshots)?);

    manager.shutdown().await;
    Ok(())
}
