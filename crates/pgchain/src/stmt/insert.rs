use super::{CompiledStatement, QueryState};
use crate::error::{DbError, DbResult};
use crate::row::Record;
use crate::value::Value;

/// One `INSERT INTO t (cols) VALUES ($1, ...)` per row.
///
/// Columns come from the first row. Every other row must carry the same key
/// set (in any order); a mismatch fails before any statement is produced.
pub(super) fn build(state: &QueryState, rows: &[Record]) -> DbResult<Vec<CompiledStatement>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };

    let columns: Vec<&String> = first.keys().collect();

    for (idx, row) in rows.iter().enumerate().skip(1) {
        let same_keys = row.len() == columns.len() && columns.iter().all(|c| row.contains_key(*c));
        if !same_keys {
            return Err(DbError::validation(format!(
                "INSERT into '{}': row {} has columns [{}], expected [{}]",
                state.table,
                idx,
                join_keys(row.keys()),
                join_keys(columns.iter().copied()),
            )));
        }
    }

    let returning = state.returning_clause();

    if columns.is_empty() {
        let sql = format!("INSERT INTO {} DEFAULT VALUES{}", state.table, returning);
        return Ok(rows
            .iter()
            .map(|_| CompiledStatement::new(sql.clone(), Vec::new()))
            .collect());
    }

    let column_list = join_keys(columns.iter().copied());
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}){}",
        state.table,
        column_list,
        placeholders.join(", "),
        returning
    );

    Ok(rows
        .iter()
        .map(|row| {
            let params = columns
                .iter()
                .map(|c| row.get(*c).cloned().map_or(Value::Null, Value::from_json))
                .collect();
            CompiledStatement::new(sql.clone(), params)
        })
        .collect())
}

fn join_keys<'a>(keys: impl Iterator<Item = &'a String>) -> String {
    keys.map(String::as_str).collect::<Vec<_>>().join(", ")
}
