//! The uniform `{data, error, count}` result of every execution.

use crate::client::QueryOutput;
use crate::error::{DbError, DbResult};
use crate::row::Record;
use crate::stmt::{Plan, StatementKind};
use serde::Serialize;
use serde::ser::{SerializeStruct, Serializer};

/// Payload of a successful envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Data {
    /// `.single()` result
    One(Record),
    Many(Vec<Record>),
}

/// Outcome of executing a builder or raw query.
///
/// Exactly one of `data`/`error` carries information: a failure always has
/// `data: None`. A `.single()` query that matched nothing is a success with
/// `data: None`.
#[derive(Debug)]
pub struct Envelope {
    pub data: Option<Data>,
    pub error: Option<DbError>,
    /// Rows returned (reads) or affected (writes); absent on failure.
    pub count: Option<u64>,
}

impl Envelope {
    pub fn ok(data: Option<Data>, count: Option<u64>) -> Self {
        Self {
            data,
            error: None,
            count,
        }
    }

    pub fn failure(error: DbError) -> Self {
        Self {
            data: None,
            error: Some(error),
            count: None,
        }
    }

    /// Shape the output of an executed plan.
    pub(crate) fn from_output(plan: &Plan, output: QueryOutput) -> Self {
        let count = match plan.kind {
            StatementKind::Select => output.records.len() as u64,
            _ => output.affected,
        };

        let records = if plan.returns_rows {
            output.records
        } else {
            Vec::new()
        };

        let data = if plan.single {
            records.into_iter().next().map(Data::One)
        } else {
            Some(Data::Many(records))
        };

        Self::ok(data, Some(count))
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Returned rows as a slice; empty on failure or null data.
    pub fn rows(&self) -> &[Record] {
        match &self.data {
            Some(Data::Many(rows)) => rows,
            Some(Data::One(row)) => std::slice::from_ref(row),
            None => &[],
        }
    }

    /// First returned row, if any.
    pub fn row(&self) -> Option<&Record> {
        self.rows().first()
    }

    pub fn into_result(self) -> DbResult<Option<Data>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.data),
        }
    }

    /// Rows as an owned list, or the error.
    pub fn into_rows(self) -> DbResult<Vec<Record>> {
        Ok(match self.into_result()? {
            Some(Data::Many(rows)) => rows,
            Some(Data::One(row)) => vec![row],
            None => Vec::new(),
        })
    }
}

impl From<DbError> for Envelope {
    fn from(err: DbError) -> Self {
        Self::failure(err)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.count.is_some() { 3 } else { 2 };
        let mut state = serializer.serialize_struct("Envelope", len)?;
        state.serialize_field("data", &self.data)?;
        state.serialize_field("error", &self.error.as_ref().map(ToString::to_string))?;
        if let Some(count) = self.count {
            state.serialize_field("count", &count)?;
        } else {
            state.skip_field("count")?;
        }
        state.end()
    }
}
