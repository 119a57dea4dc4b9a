//! Running a compiled [`Plan`] against a [`GenericClient`].

use crate::client::{GenericClient, QueryOutput};
use crate::error::DbResult;
use crate::stmt::Plan;
use crate::trace;

/// Run every statement of `plan` in order, stopping at the first failure.
///
/// Rows from all statements are concatenated and affected counts summed.
/// Transaction handling is up to the caller; pass a transaction as `client`
/// when the plan has more than one statement.
pub async fn run_plan<C: GenericClient>(client: &C, plan: &Plan) -> DbResult<QueryOutput> {
    let mut output = QueryOutput::default();

    for stmt in &plan.statements {
        trace::statement(plan.kind, &plan.table, stmt);
        let params = stmt.params_ref();
        let part = client.query_records(&stmt.sql, &params).await?;
        output.records.extend(part.records);
        output.affected += part.affected;
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::row::Record;
    use crate::stmt::{QueryState, plan};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio_postgres::types::ToSql;

    /// Records every statement and answers from a script.
    #[derive(Default)]
    struct RecordingClient {
        seen: Mutex<Vec<(String, usize)>>,
        script: Mutex<VecDeque<DbResult<QueryOutput>>>,
    }

    impl RecordingClient {
        fn answering(outputs: Vec<DbResult<QueryOutput>>) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                script: Mutex::new(outputs.into()),
            }
        }

        fn seen(&self) -> Vec<(String, usize)> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl GenericClient for RecordingClient {
        async fn query_records(
            &self,
            sql: &str,
            params: &[&(dyn ToSql + Sync)],
        ) -> DbResult<QueryOutput> {
            self.seen.lock().unwrap().push((sql.to_string(), params.len()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(QueryOutput::default()))
        }
    }

    fn affected(n: u64) -> DbResult<QueryOutput> {
        Ok(QueryOutput {
            records: Vec::new(),
            affected: n,
        })
    }

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn runs_each_insert_row_in_order() {
        let mut state = QueryState::new("todos");
        state.insert = Some(vec![record(json!({"a": 1})), record(json!({"a": 2}))]);
        let plan = plan(&state).unwrap();

        let client = RecordingClient::answering(vec![affected(1), affected(1)]);
        let output = run_plan(&client, &plan).await.unwrap();

        assert_eq!(output.affected, 2);
        assert!(output.records.is_empty());
        assert_eq!(
            client.seen(),
            vec![
                ("INSERT INTO todos (a) VALUES ($1)".to_string(), 1),
                ("INSERT INTO todos (a) VALUES ($1)".to_string(), 1),
            ]
        );
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let mut state = QueryState::new("todos");
        state.insert = Some(vec![
            record(json!({"a": 1})),
            record(json!({"a": 2})),
            record(json!({"a": 3})),
        ]);
        let plan = plan(&state).unwrap();

        let client = RecordingClient::answering(vec![
            affected(1),
            Err(DbError::Acquire("connection reset".into())),
        ]);
        let err = run_plan(&client, &plan).await.unwrap_err();

        assert!(err.is_acquire());
        assert_eq!(client.seen().len(), 2);
    }

    #[tokio::test]
    async fn returned_rows_are_concatenated() {
        let mut state = QueryState::new("todos");
        state.insert = Some(vec![record(json!({"a": 1})), record(json!({"a": 2}))]);
        state.returning = true;
        let plan = plan(&state).unwrap();

        let client = RecordingClient::answering(vec![
            Ok(QueryOutput {
                records: vec![record(json!({"id": 1, "a": 1}))],
                affected: 1,
            }),
            Ok(QueryOutput {
                records: vec![record(json!({"id": 2, "a": 2}))],
                affected: 1,
            }),
        ]);
        let output = run_plan(&client, &plan).await.unwrap();

        let ids: Vec<_> = output.records.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn select_passes_filter_params() {
        let mut state = QueryState::new("bugs");
        state
            .filters
            .push(crate::filter::Filter::list("id", vec![1.into(), 2.into()]));
        let plan = plan(&state).unwrap();

        let client = RecordingClient::default();
        run_plan(&client, &plan).await.unwrap();

        assert_eq!(
            client.seen(),
            vec![("SELECT * FROM bugs WHERE id IN ($1, $2)".to_string(), 2)]
        );
    }
}
