//! Native handle capability: the contract every connection backend fulfils.
//!
//! A [`RawHandle`] is one stateful, non-reentrant database session. It offers
//! a blocking connect plus three asynchronous primitives that report back
//! through a [`Completion`] callback. The handle tolerates exactly one
//! asynchronous operation in flight; serializing access is the job of
//! [`SerialQueue`](crate::queue::SerialQueue), not of the handle.
//!
//! Backends that only offer blocking calls can implement [`Driver`] and be
//! lifted into a `RawHandle` with [`Blocking`].

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub mod blocking;
pub mod params;

pub use blocking::{Blocking, Driver};
pub use params::{ConnectFlags, ConnectParams};

/// Errors reported by a native handle.
///
/// These are data, not control flow: they reach the caller through the
/// completion of the operation that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("not connected")]
    NotConnected,

    #[error("native error {code}: {message}")]
    Native { code: u32, message: String },

    #[error("driver worker failed: {0}")]
    Worker(String),

    #[error("operation dropped before completion")]
    Dropped,
}

impl HandleError {
    /// Shorthand for a [`HandleError::Native`] error.
    pub fn native(code: u32, message: impl Into<String>) -> Self {
        Self::Native {
            code,
            message: message.into(),
        }
    }
}

/// One-shot callback receiving the outcome of an asynchronous operation.
///
/// A handle must invoke it exactly once, from any thread.
pub type Completion<T> = Box<dyn FnOnce(Result<T, HandleError>) + Send + 'static>;

/// Outcome of a successful query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    /// The statement produced a result set.
    Rows(ResultSet),
    /// The statement modified data.
    Affected { rows: u64, insert_id: u64 },
}

impl QueryResult {
    /// Returns the result set, if the statement produced one.
    pub fn rows(&self) -> Option<&ResultSet> {
        match self {
            Self::Rows(set) => Some(set),
            Self::Affected { .. } => None,
        }
    }

    /// Number of rows returned or affected.
    pub fn row_count(&self) -> u64 {
        match self {
            Self::Rows(set) => set.len() as u64,
            Self::Affected { rows, .. } => *rows,
        }
    }
}

/// A fully materialized text-protocol result set.
///
/// Cells are `None` for SQL `NULL`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Appends a row. Missing trailing cells are padded with `NULL`, extra
    /// cells are dropped.
    pub fn push_row(&mut self, mut row: Vec<Option<String>>) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the cell at `row` for the named column.
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }

    /// Renders the rows as a JSON array of `{column: value}` objects.
    pub fn to_json(&self) -> Value {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let object: Map<String, Value> = self
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(col, cell)| {
                        let value = match cell {
                            Some(text) => Value::String(text.clone()),
                            None => Value::Null,
                        };
                        (col.clone(), value)
                    })
                    .collect();
                Value::Object(object)
            })
            .collect();
        Value::Array(rows)
    }
}

/// The native session primitive.
///
/// Implementations are not required to be reentrant: issuing a second
/// asynchronous call before the first one's completion has fired is
/// undefined behaviour at this layer.
///
/// A completion may fire from any thread, or inside the primitive call
/// itself. [`Connection`](crate::connection::Connection) defers inline
/// completions until the call has returned.
pub trait RawHandle: Send + 'static {
    /// Connects inline, blocking the calling thread.
    fn connect_sync(&mut self, params: &ConnectParams) -> Result<(), HandleError>;

    /// Starts a connection attempt; `completion` fires once it settles.
    fn connect(&mut self, params: ConnectParams, flags: ConnectFlags, completion: Completion<()>);

    /// Runs `sql` and buffers the whole result before completing.
    fn query(&mut self, sql: String, completion: Completion<QueryResult>);

    /// Sends `sql` and completes once the server's reply has been read.
    fn query_send(&mut self, sql: String, completion: Completion<QueryResult>);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> ResultSet {
        let mut set = ResultSet::new(vec!["id".into(), "name".into()]);
        set.push_row(vec![Some("1".into()), Some("ada".into())]);
        set.push_row(vec![Some("2".into())]);
        set
    }

    #[test]
    fn result_set_lookup() {
        let set = users();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(0, "name"), Some("ada"));
        assert_eq!(set.get(1, "name"), None);
        assert_eq!(set.get(0, "missing"), None);
    }

    #[test]
    fn result_set_to_json() {
        let json = users().to_json();
        assert_eq!(json[0]["id"], "1");
        assert_eq!(json[0]["name"], "ada");
        assert!(json[1]["name"].is_null());
    }

    #[test]
    fn row_count() {
        assert_eq!(QueryResult::Rows(users()).row_count(), 2);
        let affected = QueryResult::Affected {
            rows: 7,
            insert_id: 0,
        };
        assert_eq!(affected.row_count(), 7);
        assert!(affected.rows().is_none());
    }

    #[test]
    fn native_error_display() {
        let err = HandleError::native(1064, "You have an error in your SQL syntax");
        assert_eq!(
            err.to_string(),
            "native error 1064: You have an error in your SQL syntax"
        );
    }
}
