//! WHERE clause compilation.
//!
//! Filters are kept as data until execution time; [`compile_where`] turns the
//! ordered filter list plus raw OR fragments into SQL text with `$n`
//! placeholders and the matching flat parameter list.

use crate::error::DbError;
use crate::value::Value;
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
    Is,
    In,
    /// JSON/array containment (`@>`)
    Contains,
}

impl Operator {
    /// SQL spelling of the operator.
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Neq => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Like => "LIKE",
            Operator::Ilike => "ILIKE",
            Operator::Is => "IS",
            Operator::In => "IN",
            Operator::Contains => "@>",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for Operator {
    type Err = DbError;

    /// Accepts method-style names (`eq`, `ilike`, `cs`, ...) and SQL symbols.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim().to_ascii_lowercase().as_str() {
            "eq" | "=" => Operator::Eq,
            "neq" | "ne" | "!=" | "<>" => Operator::Neq,
            "gt" | ">" => Operator::Gt,
            "gte" | ">=" => Operator::Gte,
            "lt" | "<" => Operator::Lt,
            "lte" | "<=" => Operator::Lte,
            "like" => Operator::Like,
            "ilike" => Operator::Ilike,
            "is" => Operator::Is,
            "in" => Operator::In,
            "cs" | "contains" | "@>" => Operator::Contains,
            other => {
                return Err(DbError::validation(format!("unknown filter operator '{other}'")));
            }
        };
        Ok(op)
    }
}

/// Right-hand side of a [`Filter`].
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Single(Value),
    List(Vec<Value>),
}

/// One `column <op> value` condition. Immutable once appended to a builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub operator: Operator,
    pub negated: bool,
    pub value: FilterValue,
}

impl Filter {
    /// Create a filter. For [`Operator::In`] a JSON array value is spread into a list.
    pub fn new(column: impl Into<String>, operator: Operator, value: Value) -> Self {
        let value = match operator {
            Operator::In => FilterValue::List(spread(value)),
            _ => FilterValue::Single(value),
        };
        Self {
            column: column.into(),
            operator,
            negated: false,
            value,
        }
    }

    /// Create an `IN` filter from explicit values.
    pub fn list(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            column: column.into(),
            operator: Operator::In,
            negated: false,
            value: FilterValue::List(values),
        }
    }

    /// Negate this filter.
    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// Number of placeholders this filter will claim.
    pub fn placeholder_count(&self) -> usize {
        match (&self.operator, &self.value) {
            (Operator::Is, FilterValue::Single(Value::Null | Value::Bool(_))) => 0,
            (_, FilterValue::Single(_)) => 1,
            (_, FilterValue::List(values)) => values.len(),
        }
    }

    fn render(&self, binder: &mut Binder) -> String {
        let col = &self.column;
        let not = if self.negated { "NOT " } else { "" };

        match (&self.operator, &self.value) {
            (_, FilterValue::List(values)) if values.is_empty() => {
                // Empty IN matches nothing; empty NOT IN matches everything.
                let constant = if self.negated { "1=1" } else { "1=0" };
                constant.to_string()
            }
            (_, FilterValue::List(values)) => {
                let placeholders: Vec<String> =
                    values.iter().map(|v| binder.bind(v.clone())).collect();
                format!("{col} {not}IN ({})", placeholders.join(", "))
            }
            (Operator::Is, FilterValue::Single(Value::Null)) => format!("{col} IS {not}NULL"),
            (Operator::Is, FilterValue::Single(Value::Bool(b))) => {
                let literal = if *b { "TRUE" } else { "FALSE" };
                format!("{col} IS {not}{literal}")
            }
            (Operator::Is, FilterValue::Single(value)) => {
                // `IS $n` is not valid SQL; DISTINCT FROM gives the same null-safe comparison.
                let sense = if self.negated { "" } else { "NOT " };
                let p = binder.bind(value.clone());
                format!("{col} IS {sense}DISTINCT FROM {p}")
            }
            (Operator::Like | Operator::Ilike, FilterValue::Single(value)) => {
                let p = binder.bind(value.clone());
                format!("{col} {not}{} {p}", self.operator)
            }
            (Operator::Contains, FilterValue::Single(value)) => {
                let json = match value {
                    Value::Json(_) => value.clone(),
                    other => Value::Json(other.to_json()),
                };
                let p = binder.bind(json);
                wrap_not(self.negated, format!("{col} @> {p}"))
            }
            (op, FilterValue::Single(value)) => {
                let p = binder.bind(value.clone());
                wrap_not(self.negated, format!("{col} {op} {p}"))
            }
        }
    }
}

fn wrap_not(negated: bool, sql: String) -> String {
    if negated { format!("NOT ({sql})") } else { sql }
}

fn spread(value: Value) -> Vec<Value> {
    match value {
        Value::Json(serde_json::Value::Array(items)) => {
            items.into_iter().map(Value::from_json).collect()
        }
        other => vec![other],
    }
}

/// Hands out consecutive placeholders and records the bound values.
#[derive(Debug)]
struct Binder {
    params: Vec<Value>,
    next: usize,
}

impl Binder {
    fn starting_at(start: usize) -> Self {
        Self {
            params: Vec::new(),
            next: start,
        }
    }

    fn bind(&mut self, value: Value) -> String {
        let placeholder = format!("${}", self.next);
        self.next += 1;
        self.params.push(value);
        placeholder
    }
}

/// Output of [`compile_where`].
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    /// `WHERE ...` text, or empty when there are no conditions.
    pub sql: String,
    /// Values for the placeholders, in placeholder order.
    pub params: Vec<Value>,
    /// First placeholder index not used by this clause.
    pub next_index: usize,
}

impl WhereClause {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// Compile filters and OR fragments into a WHERE clause, numbering from `start`.
///
/// Filters are ANDed in order, followed by each OR fragment as an opaque
/// parenthesized term. Fragments claim no placeholders.
pub fn compile_where(filters: &[Filter], or_fragments: &[String], start: usize) -> WhereClause {
    let mut binder = Binder::starting_at(start);
    let mut terms: Vec<String> = filters.iter().map(|f| f.render(&mut binder)).collect();
    terms.extend(
        or_fragments
            .iter()
            .filter(|fragment| !fragment.trim().is_empty())
            .map(|fragment| format!("({})", fragment.trim())),
    );

    let sql = if terms.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", terms.join(" AND "))
    };

    WhereClause {
        sql,
        params: binder.params,
        next_index: binder.next,
    }
}

/// Add `offset` to every `$n` placeholder in `sql`.
///
/// Each digit run after `$` is read in full before rewriting, so `$1` is never
/// confused with the prefix of `$10`. Single-quoted literals, dollar-quoted
/// bodies (`$$...$$`, `$tag$...$tag$`) and `$` inside identifiers are left
/// untouched.
pub fn shift_placeholders(sql: &str, offset: usize) -> String {
    if offset == 0 {
        return sql.to_string();
    }

    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    // Start of text not yet copied to `out`; only ASCII positions are used.
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => i = skip_quoted(bytes, i),
            b'$' if i > 0 && is_ident_byte(bytes[i - 1]) => i += 1,
            b'$' => {
                let digits_end = i + 1 + bytes[i + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
                if digits_end > i + 1 {
                    if let Ok(n) = sql[i + 1..digits_end].parse::<usize>() {
                        out.push_str(&sql[copied..i]);
                        out.push('$');
                        out.push_str(&(n + offset).to_string());
                        copied = digits_end;
                    }
                    i = digits_end;
                } else if let Some(tag_end) = dollar_tag_end(bytes, i) {
                    let tag = &sql[i..tag_end];
                    i = match sql[tag_end..].find(tag) {
                        Some(pos) => tag_end + pos + tag.len(),
                        None => bytes.len(),
                    };
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    out.push_str(&sql[copied..]);
    out
}

/// Index just past the single-quoted literal opening at `start`.
/// `''` is an escaped quote and keeps the literal open.
fn skip_quoted(bytes: &[u8], start: usize) -> usize {
    let mut j = start + 1;
    while j < bytes.len() {
        if bytes[j] == b'\'' {
            if bytes.get(j + 1) == Some(&b'\'') {
                j += 2;
                continue;
            }
            return j + 1;
        }
        j += 1;
    }
    bytes.len()
}

/// If a dollar-quote delimiter (`$$` or `$tag$`) opens at `start`, the index
/// just past it.
fn dollar_tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if bytes.get(j).is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_') {
        j += 1;
        while bytes.get(j).is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_') {
            j += 1;
        }
    }
    (bytes.get(j) == Some(&b'$')).then_some(j + 1)
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || !b.is_ascii()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholders_in(sql: &str) -> Vec<usize> {
        let mut found = Vec::new();
        let bytes = sql.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start {
                    found.push(sql[start..end].parse().unwrap());
                }
                i = end.max(i + 1);
            } else {
                i += 1;
            }
        }
        found
    }

    #[test]
    fn empty_filters_produce_empty_clause() {
        let clause = compile_where(&[], &[], 1);
        assert!(clause.is_empty());
        assert!(clause.params.is_empty());
        assert_eq!(clause.next_index, 1);
    }

    #[test]
    fn comparisons_claim_one_placeholder_each() {
        let filters = vec![
            Filter::new("status", Operator::Eq, "open".into()),
            Filter::new("priority", Operator::Gte, 3.into()),
            Filter::new("title", Operator::Ilike, "%db%".into()),
        ];
        let clause = compile_where(&filters, &[], 1);

        assert_eq!(
            clause.sql,
            "WHERE status = $1 AND priority >= $2 AND title ILIKE $3"
        );
        assert_eq!(
            clause.params,
            vec![Value::Text("open".into()), Value::Int(3), Value::Text("%db%".into())]
        );
        assert_eq!(clause.next_index, 4);
    }

    #[test]
    fn is_null_claims_no_placeholder() {
        let filters = vec![
            Filter::new("deleted_at", Operator::Is, Value::Null),
            Filter::new("owner", Operator::Eq, "ana".into()),
            Filter::new("archived_at", Operator::Is, Value::Null).negate(),
        ];
        let clause = compile_where(&filters, &[], 1);

        assert_eq!(
            clause.sql,
            "WHERE deleted_at IS NULL AND owner = $1 AND archived_at IS NOT NULL"
        );
        assert_eq!(clause.params.len(), 1);
    }

    #[test]
    fn is_bool_renders_literal() {
        let clause = compile_where(&[Filter::new("done", Operator::Is, true.into())], &[], 1);
        assert_eq!(clause.sql, "WHERE done IS TRUE");
        assert!(clause.params.is_empty());
    }

    #[test]
    fn is_other_value_uses_distinct_from() {
        let filters = vec![
            Filter::new("kind", Operator::Is, "bug".into()),
            Filter::new("kind", Operator::Is, "todo".into()).negate(),
        ];
        let clause = compile_where(&filters, &[], 1);
        assert_eq!(
            clause.sql,
            "WHERE kind IS NOT DISTINCT FROM $1 AND kind IS DISTINCT FROM $2"
        );
    }

    #[test]
    fn in_list_expands_in_order() {
        let filters = vec![
            Filter::new("a", Operator::Eq, 1.into()),
            Filter::list("id", vec![10.into(), 20.into(), 30.into()]),
        ];
        let clause = compile_where(&filters, &[], 1);

        assert_eq!(clause.sql, "WHERE a = $1 AND id IN ($2, $3, $4)");
        assert_eq!(clause.params[1..], [Value::Int(10), Value::Int(20), Value::Int(30)]);
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let clause = compile_where(&[Filter::list("id", vec![])], &[], 1);
        assert_eq!(clause.sql, "WHERE 1=0");
        assert!(clause.params.is_empty());

        let clause = compile_where(&[Filter::list("id", vec![]).negate()], &[], 1);
        assert_eq!(clause.sql, "WHERE 1=1");
    }

    #[test]
    fn in_operator_spreads_json_array() {
        let filter = Filter::new("tag", Operator::In, serde_json::json!(["a", "b"]).into());
        assert_eq!(
            filter.value,
            FilterValue::List(vec![Value::Text("a".into()), Value::Text("b".into())])
        );
    }

    #[test]
    fn contains_binds_json() {
        let filter = Filter::new(
            "meta",
            Operator::Contains,
            Value::Json(serde_json::json!({"team": "ops"})),
        );
        let clause = compile_where(&[filter], &[], 1);

        assert_eq!(clause.sql, "WHERE meta @> $1");
        assert_eq!(clause.params, vec![Value::Json(serde_json::json!({"team": "ops"}))]);
    }

    #[test]
    fn negated_operators() {
        let filters = vec![
            Filter::new("title", Operator::Like, "%x%".into()).negate(),
            Filter::new("status", Operator::Eq, "done".into()).negate(),
            Filter::list("id", vec![1.into()]).negate(),
        ];
        let clause = compile_where(&filters, &[], 1);
        assert_eq!(
            clause.sql,
            "WHERE title NOT LIKE $1 AND NOT (status = $2) AND id NOT IN ($3)"
        );
    }

    #[test]
    fn or_fragments_are_parenthesized_and_unbound() {
        let filters = vec![Filter::new("project", Operator::Eq, "p1".into())];
        let fragments = vec!["status = 'open' OR status = 'blocked'".to_string()];
        let clause = compile_where(&filters, &fragments, 1);

        assert_eq!(
            clause.sql,
            "WHERE project = $1 AND (status = 'open' OR status = 'blocked')"
        );
        assert_eq!(clause.params.len(), 1);
    }

    #[test]
    fn numbering_starts_at_offset() {
        let filters = vec![
            Filter::new("a", Operator::Eq, 1.into()),
            Filter::list("b", vec![2.into(), 3.into()]),
        ];
        let clause = compile_where(&filters, &[], 7);
        assert_eq!(clause.sql, "WHERE a = $7 AND b IN ($8, $9)");
        assert_eq!(clause.next_index, 10);
    }

    #[test]
    fn params_match_placeholders_contiguously() {
        let filters = vec![
            Filter::new("a", Operator::Eq, 1.into()),
            Filter::new("b", Operator::Is, Value::Null),
            Filter::list("c", vec![1.into(), 2.into(), 3.into()]),
            Filter::list("d", vec![]),
            Filter::new("e", Operator::Contains, Value::Json(serde_json::json!([1]))),
            Filter::new("f", Operator::Is, "x".into()),
            Filter::new("g", Operator::Lt, 9.into()).negate(),
        ];
        for start in [1, 4, 12] {
            let clause = compile_where(&filters, &["x > 0".to_string()], start);
            let found = placeholders_in(&clause.sql);
            let expected: Vec<usize> = (start..start + clause.params.len()).collect();
            assert_eq!(found, expected);
            assert_eq!(clause.next_index, start + clause.params.len());
            let counted: usize = filters.iter().map(Filter::placeholder_count).sum();
            assert_eq!(counted, clause.params.len());
        }
    }

    #[test]
    fn and_order_changes_text_not_params_set() {
        let a = Filter::new("a", Operator::Eq, 1.into());
        let b = Filter::new("b", Operator::Eq, 2.into());
        let ab = compile_where(&[a.clone(), b.clone()], &[], 1);
        let ba = compile_where(&[b, a], &[], 1);

        assert_ne!(ab.sql, ba.sql);
        let mut left = ab.params.clone();
        let mut right = ba.params.clone();
        left.sort_by_key(|v| format!("{v:?}"));
        right.sort_by_key(|v| format!("{v:?}"));
        assert_eq!(left, right);
    }

    #[test]
    fn shift_rewrites_whole_tokens() {
        assert_eq!(shift_placeholders("a = $1 AND b = $10", 10), "a = $11 AND b = $20");
        assert_eq!(shift_placeholders("x IN ($1, $2, $3)", 0), "x IN ($1, $2, $3)");
        assert_eq!(shift_placeholders("$9 $99 $999", 1), "$10 $100 $1000");
    }

    #[test]
    fn shift_skips_literals_and_identifiers() {
        assert_eq!(
            shift_placeholders("a = $1 AND (note = 'costs $5' OR n = 'it''s $2')", 3),
            "a = $4 AND (note = 'costs $5' OR n = 'it''s $2')"
        );
        assert_eq!(shift_placeholders("col$1 = $1", 2), "col$1 = $3");
    }

    #[test]
    fn shift_skips_dollar_quoted_bodies() {
        assert_eq!(
            shift_placeholders("a = $1 AND (note = $$costs $5$$ OR b = $2)", 10),
            "a = $11 AND (note = $$costs $5$$ OR b = $12)"
        );
        assert_eq!(
            shift_placeholders("n = $x$ $1 and $$ $x$ AND m = $1", 4),
            "n = $x$ $1 and $$ $x$ AND m = $5"
        );
        assert_eq!(shift_placeholders("n = $$never closed $1", 4), "n = $$never closed $1");
    }

    #[test]
    fn shift_keeps_multibyte_text() {
        assert_eq!(
            shift_placeholders("título = $1 AND (n = 'é $2')", 1),
            "título = $2 AND (n = 'é $2')"
        );
    }

    #[test]
    fn operator_names_and_symbols_parse() {
        assert_eq!("eq".parse::<Operator>().unwrap(), Operator::Eq);
        assert_eq!("<>".parse::<Operator>().unwrap(), Operator::Neq);
        assert_eq!("CS".parse::<Operator>().unwrap(), Operator::Contains);
        assert!("between".parse::<Operator>().unwrap_err().is_validation());
    }
}
