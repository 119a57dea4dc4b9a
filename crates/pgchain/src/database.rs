//! Pool-owning entry point and the process-wide instance.

use crate::builder::TableQuery;
use crate::client::{GenericClient, QueryOutput};
use crate::config::PoolConfig;
use crate::envelope::{Data, Envelope};
use crate::error::{DbError, DbResult};
use crate::exec::run_plan;
use crate::pool::{PoolStatus, create_pool, spawn_idle_reaper};
use crate::stmt::Plan;
use crate::trace;
use crate::value::Value;
use deadpool_postgres::Pool;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_postgres::types::ToSql;

/// Handle to a connection pool. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
    /// Set when this handle owns reaping for the pool
    idle_timeout: Option<Duration>,
    reaper_started: Arc<AtomicBool>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("status", &self.status())
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

impl Database {
    /// Build the pool and start the idle reaper.
    ///
    /// No connection is opened until the first query. Outside a tokio runtime
    /// the reaper starts with the first query instead.
    pub fn connect(config: &PoolConfig) -> DbResult<Self> {
        let pool = create_pool(config)?;
        let reaper = spawn_idle_reaper(pool.clone(), config.idle_timeout);
        tracing::info!(
            target: "pgchain.pool",
            host = %config.host,
            port = config.port,
            database = %config.database,
            max_size = config.max_size,
            idle_reaper = reaper.is_some(),
            "connection pool created"
        );
        Ok(Self {
            pool,
            idle_timeout: Some(config.idle_timeout),
            reaper_started: Arc::new(AtomicBool::new(reaper.is_some())),
        })
    }

    /// Wrap an existing pool. Idle reaping is left to the caller.
    pub fn from_pool(pool: Pool) -> Self {
        Self {
            pool,
            idle_timeout: None,
            reaper_started: Arc::new(AtomicBool::new(false)),
        }
    }

    fn ensure_reaper(&self) {
        let Some(idle_timeout) = self.idle_timeout else {
            return;
        };
        if self
            .reaper_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if spawn_idle_reaper(self.pool.clone(), idle_timeout).is_some() {
            tracing::debug!(target: "pgchain.pool", "idle reaper started on first query");
        } else {
            self.reaper_started.store(false, Ordering::Release);
        }
    }

    #[cfg(test)]
    pub(crate) fn reaper_running(&self) -> bool {
        self.reaper_started.load(Ordering::Acquire)
    }

    /// Start a query against `table`.
    pub fn for_table(&self, table: impl Into<String>) -> TableQuery {
        TableQuery::new(self.clone(), table)
    }

    /// Run caller-written SQL with positional parameters.
    ///
    /// Rows come back as a list; `count` is the returned or affected row count.
    pub async fn raw_query(&self, sql: &str, params: &[Value]) -> Envelope {
        self.ensure_reaper();
        trace::raw(sql, params.len());
        match self.try_raw(sql, params).await {
            Ok(output) => Envelope::ok(Some(Data::Many(output.records)), Some(output.affected)),
            Err(err) => {
                trace::failure(None, &err);
                Envelope::failure(err)
            }
        }
    }

    async fn try_raw(&self, sql: &str, params: &[Value]) -> DbResult<QueryOutput> {
        let client = self.pool.get().await?;
        let params: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        client.query_records(sql, &params).await
    }

    /// The underlying pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus::of(&self.pool)
    }

    /// Close the pool. Checked-out connections are dropped when returned;
    /// later queries fail with an acquire error.
    pub fn close(&self) {
        self.pool.close();
        tracing::info!(target: "pgchain.pool", "connection pool closed");
    }

    /// Execute a compiled plan, one connection per call.
    pub(crate) async fn run(&self, plan: Plan) -> Envelope {
        self.ensure_reaper();
        if plan.statements.is_empty() {
            return Envelope::from_output(&plan, QueryOutput::default());
        }

        match self.try_run(&plan).await {
            Ok(output) => Envelope::from_output(&plan, output),
            Err(err) => {
                trace::failure(Some(&plan.table), &err);
                Envelope::failure(err)
            }
        }
    }

    async fn try_run(&self, plan: &Plan) -> DbResult<QueryOutput> {
        let mut client = self.pool.get().await?;

        if !plan.needs_transaction() {
            return run_plan(&client, plan).await;
        }

        let tx = client.transaction().await?;
        match run_plan(&tx, plan).await {
            Ok(output) => {
                tx.commit().await?;
                Ok(output)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(
                        target: trace::TARGET,
                        table = %plan.table,
                        error = %rollback_err,
                        "rollback failed"
                    );
                }
                Err(err)
            }
        }
    }
}

static GLOBAL: OnceLock<Database> = OnceLock::new();

/// Initialize the process-wide database from `config`.
///
/// Fails if it was already initialized, explicitly or by [`database()`].
pub fn init(config: &PoolConfig) -> DbResult<&'static Database> {
    let db = Database::connect(config)?;
    if let Err(db) = GLOBAL.set(db) {
        db.close();
        return Err(DbError::Config("database already initialized".to_string()));
    }
    global()
}

/// The process-wide database, created from the environment on first use.
pub fn database() -> DbResult<&'static Database> {
    if let Some(db) = GLOBAL.get() {
        return Ok(db);
    }
    let db = Database::connect(&PoolConfig::from_env()?)?;
    if let Err(db) = GLOBAL.set(db) {
        // Lost the race; keep the instance that won.
        db.close();
    }
    global()
}

/// Start a query on the process-wide database.
pub fn for_table(table: impl Into<String>) -> DbResult<TableQuery> {
    Ok(database()?.for_table(table))
}

fn global() -> DbResult<&'static Database> {
    GLOBAL
        .get()
        .ok_or_else(|| DbError::Config("database not initialized".to_string()))
}
