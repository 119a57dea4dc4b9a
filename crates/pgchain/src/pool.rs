//! Connection pool utilities

use crate::config::PoolConfig;
use crate::error::{DbError, DbResult};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio_postgres::NoTls;

/// Snapshot of the pool's connection accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Configured upper bound.
    pub max_size: usize,
    /// Connections currently open (idle or checked out).
    pub size: usize,
    /// Idle connections ready to be handed out.
    pub available: usize,
    /// Callers queued for a connection.
    pub waiting: usize,
}

impl PoolStatus {
    pub(crate) fn of(pool: &Pool) -> Self {
        let status = pool.status();
        Self {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }
}

/// Create a connection pool from a [`PoolConfig`].
///
/// The connect timeout bounds both waiting for a free slot and opening a new
/// connection, so callers never block indefinitely. Connections are not opened
/// until first use.
///
/// # Example
///
/// ```ignore
/// let pool = pgchain::create_pool(&PoolConfig::from_env()?)?;
/// let client = pool.get().await?;
/// ```
pub fn create_pool(config: &PoolConfig) -> DbResult<Pool> {
    config.validate()?;

    let mgr = Manager::from_config(config.pg_config(), NoTls, default_manager_config());
    Pool::builder(mgr)
        .max_size(config.max_size)
        .runtime(Runtime::Tokio1)
        .wait_timeout(Some(config.connect_timeout))
        .create_timeout(Some(config.connect_timeout))
        .build()
        .map_err(|e| DbError::Config(e.to_string()))
}

/// Spawn a background task closing connections idle for longer than `idle_timeout`.
///
/// Returns `None` when called outside a tokio runtime. The task ends once the
/// pool is closed.
///
/// Idle time is measured from the connection's last checkout (deadpool's
/// `Metrics::last_used`), not from its return. A connection held longer than
/// `idle_timeout` is therefore closed on the first tick after it goes back to
/// the pool.
pub fn spawn_idle_reaper(
    pool: Pool,
    idle_timeout: Duration,
) -> Option<tokio::task::JoinHandle<()>> {
    let handle = tokio::runtime::Handle::try_current().ok()?;
    let period = (idle_timeout / 2).max(Duration::from_secs(1));

    Some(handle.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if pool.is_closed() {
                tracing::debug!(target: "pgchain.pool", "pool closed; idle reaper exiting");
                break;
            }
            let before = pool.status().size;
            pool.retain(|_, metrics| metrics.last_used() < idle_timeout);
            let after = pool.status().size;
            if after < before {
                tracing::debug!(
                    target: "pgchain.pool",
                    reaped = before - after,
                    open = after,
                    "closed idle connections"
                );
            }
        }
    }))
}

fn default_manager_config() -> ManagerConfig {
    ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    }
}
