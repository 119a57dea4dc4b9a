use super::{CompiledStatement, QueryState};
use crate::filter::compile_where;

/// `DELETE FROM t [WHERE ...] [RETURNING ...]`
///
/// No filters means every row is deleted; the statement is not guarded.
pub(super) fn build(state: &QueryState) -> CompiledStatement {
    let clause = compile_where(&state.filters, &state.or_fragments, 1);

    let mut sql = format!("DELETE FROM {}", state.table);
    if !clause.is_empty() {
        sql.push(' ');
        sql.push_str(&clause.sql);
    }
    sql.push_str(&state.returning_clause());

    CompiledStatement::new(sql, clause.params)
}
