//! Policy facade: one `query` entry point over a [`SerialQueue`].
//!
//! Callers issue queries without choosing, per call, between buffered
//! (`query`) and streamed (`query_send`) dispatch; the stored [`QueryMode`]
//! decides. Connection establishment is the queue's, unchanged.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::connection::CreateError;
use crate::handle::{Completion, ConnectFlags, ConnectParams, HandleError, QueryResult, RawHandle};
use crate::queue::{self, SerialQueue};

/// Invalid-argument errors from the policy facade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeError {
    #[error("invalid query mode `{0}`: expected `buffered` or `streamed`")]
    Invalid(String),
}

/// How [`Highlevel::query`] dispatches.
///
/// # Examples
///
/// ```
/// use connq::highlevel::QueryMode;
///
/// let mode: QueryMode = "streamed".parse().unwrap();
/// assert_eq!(mode, QueryMode::Streamed);
/// assert_eq!(mode.as_str(), "streamed");
/// assert!("bogus".parse::<QueryMode>().is_err());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// Fetch and buffer the whole result before completing.
    #[default]
    Buffered,
    /// Send the statement, then read the reply.
    Streamed,
}

impl QueryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buffered => "buffered",
            Self::Streamed => "streamed",
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = ModeError;

    /// Accepts the mode names and the names of the primitives they select.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buffered" | "query" => Ok(Self::Buffered),
            "streamed" | "query_send" | "querysend" => Ok(Self::Streamed),
            _ => Err(ModeError::Invalid(s.to_owned())),
        }
    }
}

/// Queue-backed connection with a mode-selected `query`.
///
/// Clones share the queue and the stored mode.
pub struct Highlevel<H> {
    queue: SerialQueue<H>,
    mode: Arc<Mutex<QueryMode>>,
}

impl<H> Clone for Highlevel<H> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            mode: Arc::clone(&self.mode),
        }
    }
}

impl<H> fmt::Debug for Highlevel<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = *self.mode.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Highlevel")
            .field("mode", &mode)
            .field("queue", &self.queue)
            .finish()
    }
}

impl<H: RawHandle> Highlevel<H> {
    /// Wraps `queue` in [`QueryMode::Buffered`].
    pub fn new(queue: SerialQueue<H>) -> Self {
        Self::with_mode(queue, QueryMode::default())
    }

    pub fn with_mode(queue: SerialQueue<H>, mode: QueryMode) -> Self {
        Self {
            queue,
            mode: Arc::new(Mutex::new(mode)),
        }
    }

    pub fn mode(&self) -> QueryMode {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores the mode used by subsequent queries.
    pub fn set_mode(&self, mode: QueryMode) {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
        debug!(%mode, "query mode set");
    }

    /// Parses and stores a mode by name.
    ///
    /// # Errors
    ///
    /// Returns [`ModeError::Invalid`] for an unknown name; the stored mode is
    /// left unchanged.
    pub fn set_mode_named(&self, name: &str) -> Result<QueryMode, ModeError> {
        let mode = name.parse()?;
        self.set_mode(mode);
        Ok(mode)
    }

    /// Queues `sql` through the primitive selected by the current mode.
    pub fn query(&self, sql: impl Into<String>, completion: Option<Completion<QueryResult>>) {
        match self.mode() {
            QueryMode::Buffered => self.queue.submit_query(sql, completion),
            QueryMode::Streamed => self.queue.submit_query_send(sql, completion),
        }
    }

    /// Future-returning counterpart of [`query`](Self::query); queued at call
    /// time with the mode current at that moment.
    pub fn query_async(
        &self,
        sql: impl Into<String>,
    ) -> impl Future<Output = Result<QueryResult, HandleError>> + Send + 'static {
        let (completion, rx) = queue::oneshot_completion();
        self.query(sql, Some(completion));
        queue::recv(rx)
    }

    pub fn submit_connect(
        &self,
        params: ConnectParams,
        flags: ConnectFlags,
        completion: Option<Completion<()>>,
    ) {
        self.queue.submit_connect(params, flags, completion);
    }

    pub fn connect(
        &self,
        params: ConnectParams,
    ) -> impl Future<Output = Result<(), HandleError>> + Send + 'static {
        self.queue.connect(params)
    }

    /// The queue underneath, for explicit `query`/`query_send` dispatch.
    pub fn queue(&self) -> &SerialQueue<H> {
        &self.queue
    }
}

/// Creates a high-level connection, connecting inline when `params` is
/// non-empty. The mode starts as [`QueryMode::Buffered`].
///
/// # Errors
///
/// - [`CreateError::Scheduler`] outside a Tokio runtime.
/// - [`CreateError::Connect`] if the native connect fails.
pub fn create_highlevel_sync<H: RawHandle>(
    handle: H,
    params: &ConnectParams,
) -> Result<Highlevel<H>, CreateError> {
    queue::create_queued_sync(handle, params).map(Highlevel::new)
}

/// Creates a high-level connection and returns it immediately.
///
/// Same contract as [`queue::create_queued_async`].
///
/// # Errors
///
/// Returns [`CreateError::Scheduler`] outside a Tokio runtime.
pub fn create_highlevel_async<H, F>(
    handle: H,
    params: ConnectParams,
    flags: ConnectFlags,
    completion: F,
) -> Result<Highlevel<H>, CreateError>
where
    H: RawHandle,
    F: FnOnce(Result<Highlevel<H>, HandleError>) + Send + 'static,
{
    start(handle, params, flags, QueryMode::default(), completion)
}

fn start<H, F>(
    handle: H,
    params: ConnectParams,
    flags: ConnectFlags,
    mode: QueryMode,
    completion: F,
) -> Result<Highlevel<H>, CreateError>
where
    H: RawHandle,
    F: FnOnce(Result<Highlevel<H>, HandleError>) + Send + 'static,
{
    let conn = Highlevel::with_mode(SerialQueue::from_handle(handle)?, mode);
    queue::start_connect(&conn.queue, conn.clone(), params, flags, completion).release();
    Ok(conn)
}

/// Opens a high-level connection described by `config`.
///
/// # Errors
///
/// Returns [`CreateError::Scheduler`] outside a Tokio runtime.
///
/// # Examples
///
/// ```rust,no_run
/// use connq::config::ConnectionConfig;
/// use connq::handle::{Blocking, Driver};
/// use connq::highlevel;
///
/// # fn demo<D: Driver>(driver: D) -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConnectionConfig::from_json(
///     r#"{"host": "localhost", "user": "app", "database": "shop", "mode": "streamed"}"#,
/// )?;
/// let conn = highlevel::open(Blocking::current(driver)?, &config, |result| {
///     if let Err(e) = result {
///         eprintln!("connect failed: {e}");
///     }
/// })?;
/// conn.query("SELECT 1", None);
/// # Ok(())
/// # }
/// ```
pub fn open<H, F>(
    handle: H,
    config: &ConnectionConfig,
    completion: F,
) -> Result<Highlevel<H>, CreateError>
where
    H: RawHandle,
    F: FnOnce(Result<Highlevel<H>, HandleError>) + Send + 'static,
{
    start(
        handle,
        config.params.clone(),
        config.flags,
        config.mode,
        completion,
    )
}
