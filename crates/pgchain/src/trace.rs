//! `tracing` events for executed statements.
//!
//! Statements are logged at `debug` under the `pgchain.sql` target before they
//! run; failures are logged at `warn`. Parameter values are never logged, only
//! their count.

use crate::error::DbError;
use crate::stmt::{CompiledStatement, StatementKind};

pub(crate) const TARGET: &str = "pgchain.sql";

/// Longest SQL text (in bytes) included in a log event.
const MAX_SQL_LENGTH: usize = 200;

pub(crate) fn truncate_sql(sql: &str) -> String {
    if sql.len() <= MAX_SQL_LENGTH {
        return sql.to_string();
    }
    let mut end = MAX_SQL_LENGTH;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &sql[..end])
}

pub(crate) fn statement(kind: StatementKind, table: &str, stmt: &CompiledStatement) {
    tracing::debug!(
        target: TARGET,
        kind = ?kind,
        table,
        params = stmt.params.len(),
        sql = %truncate_sql(&stmt.sql),
        "executing statement"
    );
}

pub(crate) fn raw(sql: &str, params: usize) {
    tracing::debug!(
        target: TARGET,
        params,
        sql = %truncate_sql(sql),
        "executing raw query"
    );
}

pub(crate) fn failure(table: Option<&str>, err: &DbError) {
    tracing::warn!(
        target: TARGET,
        table = table.unwrap_or("-"),
        code = err.code().unwrap_or("-"),
        error = %err,
        "query failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_sql_is_untouched() {
        assert_eq!(truncate_sql("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn long_sql_is_cut_on_char_boundary() {
        let sql = format!("SELECT '{}'", "é".repeat(200));
        let out = truncate_sql(&sql);
        assert!(out.ends_with("..."));
        assert!(out.len() <= MAX_SQL_LENGTH + 3);
    }
}
