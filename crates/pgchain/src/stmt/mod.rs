//! Statement compilation.
//!
//! [`QueryState`] is the accumulated description of one table operation.
//! [`plan`] picks the terminal operation (insert > update > delete > select)
//! and hands the state to the matching builder, which produces one or more
//! [`CompiledStatement`]s.
//!
//! Everything here is pure: no connection is needed to compile.

mod delete;
mod insert;
mod select;
mod update;

pub use select::sanitize_columns;

use crate::error::{DbError, DbResult};
use crate::filter::Filter;
use crate::row::Record;
use crate::value::Value;
use tokio_postgres::types::ToSql;

/// SQL text plus the values for its `$n` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl CompiledStatement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Get parameters as references for tokio-postgres.
    pub fn params_ref(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|v| v as &(dyn ToSql + Sync))
            .collect()
    }
}

/// Which statement builder a plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

/// ORDER BY settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderOptions {
    pub ascending: bool,
}

impl Default for OrderOptions {
    fn default() -> Self {
        Self { ascending: true }
    }
}

impl OrderOptions {
    pub fn ascending() -> Self {
        Self { ascending: true }
    }

    pub fn descending() -> Self {
        Self { ascending: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub options: OrderOptions,
}

/// Accumulated description of one table operation.
#[derive(Debug, Default)]
pub struct QueryState {
    pub table: String,
    /// Raw column list passed to `select()`
    pub columns: Option<String>,
    pub filters: Vec<Filter>,
    pub or_fragments: Vec<String>,
    pub order: Option<Order>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub insert: Option<Vec<Record>>,
    pub update: Option<Record>,
    pub delete: bool,
    /// Mutations return rows (`RETURNING`) when set
    pub returning: bool,
    pub single: bool,
    /// First misuse detected while chaining; reported at execution
    pub build_error: Option<DbError>,
}

impl QueryState {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Record a build error. Only the first one is kept.
    pub fn fail(&mut self, err: DbError) {
        if self.build_error.is_none() {
            self.build_error = Some(err);
        }
    }

    /// The terminal operation that wins by precedence.
    pub fn kind(&self) -> StatementKind {
        if self.insert.is_some() {
            StatementKind::Insert
        } else if self.update.is_some() {
            StatementKind::Update
        } else if self.delete {
            StatementKind::Delete
        } else {
            StatementKind::Select
        }
    }

    fn returning_clause(&self) -> String {
        if self.returning {
            format!(" RETURNING {}", sanitize_columns(self.columns.as_deref()))
        } else {
            String::new()
        }
    }
}

/// The compiled form of a [`QueryState`], ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub kind: StatementKind,
    pub table: String,
    /// Statements to run in order; INSERT has one per row.
    pub statements: Vec<CompiledStatement>,
    /// Rows produced by the statements end up in the envelope.
    pub returns_rows: bool,
    pub single: bool,
}

impl Plan {
    /// Multi-statement plans run inside one transaction.
    pub fn needs_transaction(&self) -> bool {
        self.statements.len() > 1
    }
}

/// Compile a [`QueryState`] into a [`Plan`].
pub fn plan(state: &QueryState) -> DbResult<Plan> {
    if let Some(err) = &state.build_error {
        return Err(err.replicate());
    }

    let kind = state.kind();
    let statements = match kind {
        StatementKind::Insert => insert::build(state, state.insert.as_deref().unwrap_or_default())?,
        StatementKind::Update => {
            let payload = state.update.as_ref().ok_or_else(|| {
                DbError::validation("UPDATE requires a payload")
            })?;
            vec![update::build(state, payload)?]
        }
        StatementKind::Delete => vec![delete::build(state)],
        StatementKind::Select => vec![select::build(state)],
    };

    Ok(Plan {
        kind,
        table: state.table.clone(),
        statements,
        returns_rows: kind == StatementKind::Select || state.returning,
        single: state.single,
    })
}
