//! Queued operation records.

use std::fmt;

use crate::handle::{Completion, ConnectFlags, ConnectParams, QueryResult};

/// Which native primitive an [`Operation`] dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Connect,
    Query,
    QuerySend,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Query => "query",
            Self::QuerySend => "query_send",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending call: its arguments plus the caller's optional completion.
pub(crate) enum Operation {
    Connect {
        params: ConnectParams,
        flags: ConnectFlags,
        completion: Option<Completion<()>>,
    },
    Query {
        sql: String,
        completion: Option<Completion<QueryResult>>,
    },
    QuerySend {
        sql: String,
        completion: Option<Completion<QueryResult>>,
    },
}

impl Operation {
    pub(crate) fn kind(&self) -> OperationKind {
        match self {
            Self::Connect { .. } => OperationKind::Connect,
            Self::Query { .. } => OperationKind::Query,
            Self::QuerySend { .. } => OperationKind::QuerySend,
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect {
                params, completion, ..
            } => f
                .debug_struct("Connect")
                .field("params", params)
                .field("completion", &completion.is_some())
                .finish(),
            Self::Query { sql, completion } | Self::QuerySend { sql, completion } => f
                .debug_struct(self.kind().as_str())
                .field("sql", sql)
                .field("completion", &completion.is_some())
                .finish(),
        }
    }
}
