//! Client trait for executing compiled statements.
//!
//! [`GenericClient`] unifies plain `tokio-postgres` clients, pooled
//! connections and transactions so the executor can run a plan against any of
//! them.

use crate::error::DbResult;
use crate::row::{Record, decode_row};
use futures_util::TryStreamExt;
use tokio_postgres::types::ToSql;

/// Decoded rows plus the server-reported affected row count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub records: Vec<Record>,
    /// Rows touched by the statement (for SELECT, rows returned).
    pub affected: u64,
}

/// A trait that unifies database clients and transactions.
pub trait GenericClient: Send + Sync {
    /// Run one statement, decoding every returned row.
    fn query_records(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = DbResult<QueryOutput>> + Send;
}

impl GenericClient for tokio_postgres::Client {
    async fn query_records(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> DbResult<QueryOutput> {
        let stream = tokio_postgres::Client::query_raw(self, sql, params.iter().copied()).await?;
        collect(stream).await
    }
}

impl GenericClient for tokio_postgres::Transaction<'_> {
    async fn query_records(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> DbResult<QueryOutput> {
        let stream =
            tokio_postgres::Transaction::query_raw(self, sql, params.iter().copied()).await?;
        collect(stream).await
    }
}

impl GenericClient for deadpool_postgres::ClientWrapper {
    async fn query_records(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> DbResult<QueryOutput> {
        GenericClient::query_records(&**self, sql, params).await
    }
}

impl GenericClient for deadpool_postgres::Client {
    async fn query_records(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> DbResult<QueryOutput> {
        GenericClient::query_records(&**self, sql, params).await
    }
}

impl GenericClient for deadpool_postgres::Transaction<'_> {
    async fn query_records(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> DbResult<QueryOutput> {
        GenericClient::query_records(&**self, sql, params).await
    }
}

async fn collect(stream: tokio_postgres::RowStream) -> DbResult<QueryOutput> {
    let mut stream = std::pin::pin!(stream);
    let mut records = Vec::new();
    while let Some(row) = stream.try_next().await? {
        records.push(decode_row(&row)?);
    }
    // The command tag is only known once the stream is drained.
    let affected = stream
        .rows_affected()
        .unwrap_or(records.len() as u64);
    Ok(QueryOutput { records, affected })
}
