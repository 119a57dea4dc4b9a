//! Fluent per-table query builder.
//!
//! A [`TableQuery`] accumulates filters, ordering, paging and at most one
//! meaningful mutation. Nothing touches the database until the builder is
//! executed, either with [`TableQuery::execute`] or by awaiting it directly.
//!
//! ```ignore
//! let open = db
//!     .for_table("todos")
//!     .select("id, title")
//!     .eq("status", "open")
//!     .order("created_at", OrderOptions::descending())
//!     .limit(20)
//!     .await;
//! ```

use crate::database::Database;
use crate::envelope::Envelope;
use crate::error::{DbError, DbResult};
use crate::filter::{Filter, Operator};
use crate::row::Record;
use crate::stmt::{self, Order, OrderOptions, Plan, QueryState};
use crate::trace;
use crate::value::Value;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::future::IntoFuture;

/// Builder for one operation on one table.
///
/// Chain methods consume and return the builder; executing consumes it, so a
/// builder runs at most once.
#[derive(Debug)]
#[must_use = "a query does nothing until it is executed or awaited"]
pub struct TableQuery {
    db: Database,
    state: QueryState,
}

impl TableQuery {
    pub(crate) fn new(db: Database, table: impl Into<String>) -> Self {
        Self {
            db,
            state: QueryState::new(table),
        }
    }

    pub fn table(&self) -> &str {
        &self.state.table
    }

    /// Columns to read. After `insert`/`update`/`delete` this requests
    /// `RETURNING` with the same list.
    ///
    /// Tokens containing parentheses (embedded relations, function calls) are
    /// dropped; an empty list means `*`.
    pub fn select(mut self, columns: &str) -> Self {
        self.state.columns = Some(columns.to_string());
        self.state.returning = true;
        self
    }

    fn filter(mut self, column: impl Into<String>, operator: Operator, value: Value) -> Self {
        self.state.filters.push(Filter::new(column, operator, value));
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, Operator::Eq, value.into())
    }

    pub fn neq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, Operator::Neq, value.into())
    }

    pub fn gt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, Operator::Gt, value.into())
    }

    pub fn gte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, Operator::Gte, value.into())
    }

    pub fn lt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, Operator::Lt, value.into())
    }

    pub fn lte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, Operator::Lte, value.into())
    }

    pub fn like(self, column: impl Into<String>, pattern: impl Into<Value>) -> Self {
        self.filter(column, Operator::Like, pattern.into())
    }

    pub fn ilike(self, column: impl Into<String>, pattern: impl Into<Value>) -> Self {
        self.filter(column, Operator::Ilike, pattern.into())
    }

    /// `IS NULL`, `IS TRUE`/`IS FALSE`, or a null-safe comparison for other values.
    pub fn is(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, Operator::Is, value.into())
    }

    /// Negated filter. `operator` is a name (`eq`, `like`, `in`, `cs`, ...) or
    /// an SQL symbol (`=`, `<>`, `@>`, ...).
    pub fn not(mut self, column: impl Into<String>, operator: &str, value: impl Into<Value>) -> Self {
        let Ok(op) = operator.parse::<Operator>() else {
            self.state.fail(DbError::validation(format!(
                "not(): unknown filter operator '{operator}'"
            )));
            return self;
        };
        self.state
            .filters
            .push(Filter::new(column, op, value.into()).negate());
        self
    }

    /// `column IN (...)`. An empty list matches no rows.
    pub fn in_list<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.state.filters.push(Filter::list(column, values));
        self
    }

    /// `column @> value`, with `value` serialized to JSON.
    pub fn contains<T: Serialize + ?Sized>(mut self, column: impl Into<String>, value: &T) -> Self {
        let column = column.into();
        match serde_json::to_value(value) {
            Ok(json) => self
                .state
                .filters
                .push(Filter::new(column, Operator::Contains, Value::Json(json))),
            Err(err) => self
                .state
                .fail(DbError::Serialization(format!("contains() on '{column}': {err}"))),
        }
        self
    }

    /// Raw boolean SQL ANDed with the other filters as one parenthesized term.
    ///
    /// The text is sent as-is and binds no parameters; never build it from
    /// untrusted input.
    pub fn or(mut self, expression: impl Into<String>) -> Self {
        self.state.or_fragments.push(expression.into());
        self
    }

    /// Sort order. A later call replaces an earlier one.
    pub fn order(mut self, column: impl Into<String>, options: OrderOptions) -> Self {
        self.state.order = Some(Order {
            column: column.into(),
            options,
        });
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.state.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.state.offset = Some(offset);
        self
    }

    /// Return the first row as a plain object (or null) instead of a list.
    pub fn single(mut self) -> Self {
        self.state.single = true;
        self
    }

    /// Insert one object or an array of objects. All objects must have the
    /// same keys.
    pub fn insert<P: Serialize + ?Sized>(mut self, payload: &P) -> Self {
        match to_records(&self.state.table, payload) {
            Ok(rows) => self.state.insert = Some(rows),
            Err(err) => self.state.fail(err),
        }
        self
    }

    /// Update rows matching the filters with the fields of one object.
    pub fn update<P: Serialize + ?Sized>(mut self, payload: &P) -> Self {
        match serde_json::to_value(payload).map_err(DbError::from) {
            Ok(serde_json::Value::Object(map)) => self.state.update = Some(map),
            Ok(_) => self.state.fail(DbError::validation(format!(
                "update() on '{}': payload must be an object",
                self.state.table
            ))),
            Err(err) => self.state.fail(err),
        }
        self
    }

    /// Delete rows matching the filters. Without filters every row is deleted.
    pub fn delete(mut self) -> Self {
        self.state.delete = true;
        self
    }

    /// Compile without executing.
    pub fn compile(&self) -> DbResult<Plan> {
        stmt::plan(&self.state)
    }

    /// Compile, run and release the connection. Never panics on database
    /// failures; they are reported in the envelope.
    pub async fn execute(self) -> Envelope {
        let plan = match stmt::plan(&self.state) {
            Ok(plan) => plan,
            Err(err) => {
                trace::failure(Some(&self.state.table), &err);
                return Envelope::failure(err);
            }
        };
        self.db.run(plan).await
    }
}

impl IntoFuture for TableQuery {
    type Output = Envelope;
    type IntoFuture = BoxFuture<'static, Envelope>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.execute())
    }
}

fn to_records<P: Serialize + ?Sized>(table: &str, payload: &P) -> DbResult<Vec<Record>> {
    match serde_json::to_value(payload)? {
        serde_json::Value::Object(map) => Ok(vec![map]),
        serde_json::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| match item {
                serde_json::Value::Object(map) => Ok(map),
                _ => Err(DbError::validation(format!(
                    "insert() into '{table}': element {idx} is not an object"
                ))),
            })
            .collect(),
        _ => Err(DbError::validation(format!(
            "insert() into '{table}': payload must be an object or an array of objects"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::create_pool;
    use crate::stmt::StatementKind;
    use serde_json::json;

    fn db() -> Database {
        Database::from_pool(create_pool(&PoolConfig::new()).unwrap())
    }

    fn sql(query: &TableQuery) -> String {
        let plan = query.compile().unwrap();
        assert_eq!(plan.statements.len(), 1);
        plan.statements[0].sql.clone()
    }

    #[test]
    fn chained_read() {
        let q = db()
            .for_table("todos")
            .select("id, title")
            .eq("status", "open")
            .gte("priority", 2)
            .ilike("title", "%deploy%")
            .order("created_at", OrderOptions::descending())
            .limit(10)
            .offset(20);

        assert_eq!(
            sql(&q),
            "SELECT id, title FROM todos WHERE status = $1 AND priority >= $2 AND title ILIKE $3 ORDER BY created_at DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn last_order_wins() {
        let q = db()
            .for_table("bugs")
            .order("severity", OrderOptions::descending())
            .order("id", OrderOptions::default());
        assert_eq!(sql(&q), "SELECT * FROM bugs ORDER BY id ASC");
    }

    #[test]
    fn is_null_and_negations() {
        let q = db()
            .for_table("journal")
            .is("archived_at", None::<String>)
            .not("kind", "eq", "draft")
            .not("tags", "in", json!(["x", "y"]));
        assert_eq!(
            sql(&q),
            "SELECT * FROM journal WHERE archived_at IS NULL AND NOT (kind = $1) AND tags NOT IN ($2, $3)"
        );
    }

    #[test]
    fn unknown_not_operator_is_validation_error() {
        let q = db().for_table("todos").not("status", "between", 1).eq("a", 1);
        let err = q.compile().unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("between"));
    }

    #[test]
    fn in_list_accepts_any_iterator() {
        let q = db().for_table("bugs").in_list("id", [3, 5, 8]);
        let plan = q.compile().unwrap();
        assert_eq!(plan.statements[0].sql, "SELECT * FROM bugs WHERE id IN ($1, $2, $3)");
        assert_eq!(plan.statements[0].params, vec![Value::Int(3), Value::Int(5), Value::Int(8)]);

        let empty: Vec<i64> = Vec::new();
        let q = db().for_table("bugs").in_list("id", empty);
        assert_eq!(sql(&q), "SELECT * FROM bugs WHERE 1=0");
    }

    #[test]
    fn contains_serializes_structs() {
        #[derive(Serialize)]
        struct Meta {
            team: &'static str,
        }

        let q = db().for_table("projects").contains("meta", &Meta { team: "ops" });
        let plan = q.compile().unwrap();
        assert_eq!(plan.statements[0].sql, "SELECT * FROM projects WHERE meta @> $1");
        assert_eq!(plan.statements[0].params, vec![Value::Json(json!({"team": "ops"}))]);
    }

    #[test]
    fn or_fragment_is_appended_last() {
        let q = db()
            .for_table("todos")
            .or("status = 'open' OR status = 'blocked'")
            .eq("owner", "sam");
        assert_eq!(
            sql(&q),
            "SELECT * FROM todos WHERE owner = $1 AND (status = 'open' OR status = 'blocked')"
        );
    }

    #[test]
    fn select_after_mutation_requests_returning() {
        let q = db()
            .for_table("todos")
            .update(&json!({"status": "done"}))
            .eq("id", 4)
            .select("id, status");
        assert_eq!(
            sql(&q),
            "UPDATE todos SET status = $1 WHERE id = $2 RETURNING id, status"
        );

        let q = db().for_table("todos").delete().eq("id", 4).select("");
        assert_eq!(sql(&q), "DELETE FROM todos WHERE id = $1 RETURNING *");
    }

    #[test]
    fn insert_precedence_over_other_intents() {
        let q = db()
            .for_table("todos")
            .delete()
            .update(&json!({"a": 1}))
            .insert(&json!({"a": 2}));
        assert_eq!(q.compile().unwrap().kind, StatementKind::Insert);
    }

    #[test]
    fn insert_payload_shapes() {
        let q = db().for_table("todos").insert(&json!([{"a": 1}, {"a": 2}]));
        assert_eq!(q.compile().unwrap().statements.len(), 2);

        let q = db().for_table("todos").insert(&json!([{"a": 1}, 5]));
        assert!(q.compile().unwrap_err().to_string().contains("element 1"));

        let q = db().for_table("todos").insert(&json!("oops"));
        assert!(q.compile().unwrap_err().is_validation());
    }

    #[test]
    fn update_requires_object() {
        let q = db().for_table("todos").update(&json!([1, 2]));
        assert!(q.compile().unwrap_err().is_validation());
    }

    #[test]
    fn single_narrows_select() {
        let q = db().for_table("todos").eq("status", "open").single();
        let plan = q.compile().unwrap();
        assert!(plan.single);
        assert_eq!(plan.statements[0].sql, "SELECT * FROM todos WHERE status = $1 LIMIT 1");
    }

    #[test]
    fn unserializable_payloads_are_serialization_errors() {
        use std::collections::BTreeMap;

        // JSON object keys must be strings.
        let bad = BTreeMap::from([((1, 2), 3)]);

        let err = db().for_table("todos").insert(&bad).compile().unwrap_err();
        assert!(matches!(err, DbError::Serialization(_)), "{err:?}");

        let err = db().for_table("todos").update(&bad).compile().unwrap_err();
        assert!(matches!(err, DbError::Serialization(_)), "{err:?}");

        let err = db().for_table("todos").contains("meta", &bad).compile().unwrap_err();
        assert!(matches!(err, DbError::Serialization(ref m) if m.contains("contains()")), "{err:?}");
    }
}
