use super::{CompiledStatement, QueryState};
use crate::filter::compile_where;

/// Normalize a `select()` column list.
///
/// The list is split on commas outside parentheses. Top-level tokens
/// containing parentheses (embedded-relation syntax such as
/// `owner:users(id, name)`, nested embeds, function calls) are dropped as a
/// whole; an empty result falls back to `*`.
pub fn sanitize_columns(columns: Option<&str>) -> String {
    let Some(columns) = columns else {
        return "*".to_string();
    };

    let kept: Vec<&str> = split_top_level(columns)
        .into_iter()
        .map(str::trim)
        .filter(|token| !token.is_empty() && !token.contains(['(', ')']))
        .collect();

    if kept.is_empty() {
        "*".to_string()
    } else {
        kept.join(", ")
    }
}

/// Split on commas at parenthesis depth 0. Unbalanced `)` never drives the
/// depth below zero.
fn split_top_level(columns: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (idx, ch) in columns.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                tokens.push(&columns[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    tokens.push(&columns[start..]);
    tokens
}

pub(super) fn build(state: &QueryState) -> CompiledStatement {
    let columns = sanitize_columns(state.columns.as_deref());
    let clause = compile_where(&state.filters, &state.or_fragments, 1);

    let mut sql = format!("SELECT {} FROM {}", columns, state.table);

    if !clause.is_empty() {
        sql.push(' ');
        sql.push_str(&clause.sql);
    }

    if let Some(order) = &state.order {
        let direction = if order.options.ascending { "ASC" } else { "DESC" };
        sql.push_str(&format!(" ORDER BY {} {}", order.column, direction));
    }

    let limit = if state.single { Some(1) } else { state.limit };
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    if let Some(offset) = state.offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }

    CompiledStatement::new(sql, clause.params)
}
