use super::{CompiledStatement, QueryState};
use crate::error::{DbError, DbResult};
use crate::filter::{compile_where, shift_placeholders};
use crate::row::Record;
use crate::value::Value;

/// `UPDATE t SET a = $1, b = $2 WHERE ... [RETURNING ...]`
///
/// SET claims `$1..$N`. The WHERE clause is compiled on its own from `$1` and
/// then shifted up by N, so its values follow the SET values.
pub(super) fn build(state: &QueryState, payload: &Record) -> DbResult<CompiledStatement> {
    if payload.is_empty() {
        return Err(DbError::validation(format!(
            "UPDATE on '{}' needs at least one column to set",
            state.table
        )));
    }

    let mut params: Vec<Value> = Vec::with_capacity(payload.len() + state.filters.len());
    let mut set_parts = Vec::with_capacity(payload.len());
    for (idx, (column, value)) in payload.iter().enumerate() {
        set_parts.push(format!("{} = ${}", column, idx + 1));
        params.push(Value::from_json(value.clone()));
    }

    let mut sql = format!("UPDATE {} SET {}", state.table, set_parts.join(", "));

    let clause = compile_where(&state.filters, &state.or_fragments, 1);
    if !clause.is_empty() {
        sql.push(' ');
        sql.push_str(&shift_placeholders(&clause.sql, payload.len()));
        params.extend(clause.params);
    }

    sql.push_str(&state.returning_clause());

    Ok(CompiledStatement::new(sql, params))
}
