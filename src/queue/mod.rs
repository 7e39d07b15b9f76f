//! Serializing queue: one-at-a-time, in-order dispatch over a raw handle.
//!
//! A native handle tolerates a single operation in flight. [`SerialQueue`]
//! accepts `connect`/`query`/`query_send` requests at any time, appends them
//! to a FIFO, and dispatches them strictly one after another:
//!
//! 1. `drain` pops the head only when no operation is in flight, marks the
//!    queue busy and hands the operation to the handle.
//! 2. The handle's completion schedules a resumption step for the next
//!    scheduling turn, then forwards the outcome to the caller's completion.
//!    The step stays held until that completion returns or unwinds.
//! 3. The resumption step clears the busy flag and drains again.
//!
//! Resuming on a fresh turn keeps stack depth constant no matter how many
//! operations run back to back, and lets other tasks interleave between them.
//!
//! There is no cancellation: once submitted, an operation will run.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::connection::{self, Connection, CreateError};
use crate::handle::{
    Completion, ConnectFlags, ConnectParams, HandleError, QueryResult, RawHandle,
};
use crate::scheduler::{Hold, Scheduler, SchedulerError};

pub mod operation;

pub(crate) use operation::Operation;
pub use operation::OperationKind;

#[derive(Debug, Default)]
struct QueueState {
    // Set while an operation is dispatched and its resumption has not run yet.
    busy: bool,
    queue: VecDeque<Operation>,
}

struct Shared<H> {
    conn: Connection<H>,
    scheduler: Scheduler,
    state: Mutex<QueueState>,
}

/// FIFO of pending operations in front of a single [`Connection`].
///
/// Cloning is cheap; all clones feed the same queue and handle.
///
/// # Examples
///
/// ```rust,no_run
/// use connq::handle::{Blocking, ConnectParams, Driver};
/// use connq::queue::SerialQueue;
///
/// # async fn demo<D: Driver>(driver: D) -> Result<(), Box<dyn std::error::Error>> {
/// let queue = SerialQueue::from_handle(Blocking::current(driver)?)?;
///
/// // Submitted back to back; the handle still sees them one at a time.
/// let connect = queue.connect(ConnectParams::new().user("app"));
/// let rows = queue.query("SELECT id FROM users");
/// connect.await?;
/// let rows = rows.await?;
/// println!("{} rows", rows.row_count());
/// # Ok(())
/// # }
/// ```
pub struct SerialQueue<H> {
    shared: Arc<Shared<H>>,
}

impl<H> Clone for SerialQueue<H> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<H> fmt::Debug for SerialQueue<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SerialQueue")
            .field("busy", &state.busy)
            .field("pending", &state.queue.len())
            .finish_non_exhaustive()
    }
}

impl<H: RawHandle> SerialQueue<H> {
    /// Takes ownership of `conn`. Using another clone of the same connection
    /// directly while the queue is draining is undefined behaviour.
    pub fn new(conn: Connection<H>, scheduler: Scheduler) -> Self {
        Self {
            shared: Arc::new(Shared {
                conn,
                scheduler,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Wraps `handle`, scheduling on the caller's runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NoRuntime`] outside a Tokio runtime.
    pub fn from_handle(handle: H) -> Result<Self, SchedulerError> {
        Ok(Self::new(Connection::new(handle), Scheduler::current()?))
    }

    /// Queues a connect. Returns immediately.
    pub fn submit_connect(
        &self,
        params: ConnectParams,
        flags: ConnectFlags,
        completion: Option<Completion<()>>,
    ) {
        self.submit(Operation::Connect {
            params,
            flags,
            completion,
        });
    }

    /// Queues a buffered query. Returns immediately.
    pub fn submit_query(&self, sql: impl Into<String>, completion: Option<Completion<QueryResult>>) {
        self.submit(Operation::Query {
            sql: sql.into(),
            completion,
        });
    }

    /// Queues a send-then-read query. Returns immediately.
    pub fn submit_query_send(
        &self,
        sql: impl Into<String>,
        completion: Option<Completion<QueryResult>>,
    ) {
        self.submit(Operation::QuerySend {
            sql: sql.into(),
            completion,
        });
    }

    /// Queues a connect and returns a future for its outcome.
    ///
    /// The operation is queued when this method is called, not when the
    /// future is first polled. Dropping the future does not withdraw it.
    pub fn connect(
        &self,
        params: ConnectParams,
    ) -> impl Future<Output = Result<(), HandleError>> + Send + 'static {
        let (completion, rx) = oneshot_completion();
        self.submit_connect(params, ConnectFlags::EMPTY, Some(completion));
        recv(rx)
    }

    /// Queues a buffered query and returns a future for its result.
    ///
    /// Queued at call time, like [`connect`](Self::connect).
    pub fn query(
        &self,
        sql: impl Into<String>,
    ) -> impl Future<Output = Result<QueryResult, HandleError>> + Send + 'static {
        let (completion, rx) = oneshot_completion();
        self.submit_query(sql, Some(completion));
        recv(rx)
    }

    /// Queues a send-then-read query and returns a future for its result.
    pub fn query_send(
        &self,
        sql: impl Into<String>,
    ) -> impl Future<Output = Result<QueryResult, HandleError>> + Send + 'static {
        let (completion, rx) = oneshot_completion();
        self.submit_query_send(sql, Some(completion));
        recv(rx)
    }

    /// Number of operations waiting to be dispatched.
    pub fn pending(&self) -> usize {
        self.state().queue.len()
    }

    /// Returns `true` while an operation is in flight.
    pub fn is_busy(&self) -> bool {
        self.state().busy
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.shared.scheduler
    }

    fn submit(&self, op: Operation) {
        {
            let mut state = self.state();
            debug!(kind = %op.kind(), pending = state.queue.len() + 1, "operation queued");
            state.queue.push_back(op);
        }
        self.drain();
    }

    /// Dispatches the head of the queue unless an operation is in flight or
    /// the queue is empty. Redundant calls are harmless.
    pub(crate) fn drain(&self) {
        let op = {
            let mut state = self.state();
            if state.busy {
                trace!(pending = state.queue.len(), "drain skipped: operation in flight");
                return;
            }
            let Some(op) = state.queue.pop_front() else {
                trace!("drain skipped: queue empty");
                return;
            };
            state.busy = true;
            debug!(kind = %op.kind(), remaining = state.queue.len(), "dispatching operation");
            op
        };

        // The state lock is released before calling into the handle: a
        // handle may complete inline and the caller's completion may submit.
        let conn = &self.shared.conn;
        match op {
            Operation::Connect {
                params,
                flags,
                completion,
            } => conn.connect(params, flags, self.resume_then(completion)),
            Operation::Query { sql, completion } => conn.query(sql, self.resume_then(completion)),
            Operation::QuerySend { sql, completion } => {
                conn.query_send(sql, self.resume_then(completion))
            }
        }
    }

    /// Wraps a caller completion so that the queue resumes on the next turn.
    ///
    /// The resumption is scheduled before the caller's completion runs and
    /// held until it returns. A panicking completion drops the hold while
    /// unwinding, so it cannot stall the queue, and the next operation never
    /// starts while the previous completion is still running on another
    /// worker.
    fn resume_then<T: Send + 'static>(&self, completion: Option<Completion<T>>) -> Completion<T> {
        let queue = self.clone();
        Box::new(move |result: Result<T, HandleError>| {
            let scheduler = queue.shared.scheduler.clone();
            let _resume = scheduler.defer_held(move || queue.resume());
            if let Some(completion) = completion {
                completion(result);
            }
        })
    }

    fn resume(&self) {
        self.state().busy = false;
        trace!("operation settled, resuming queue");
        self.drain();
    }

    // Never held across a handle call or a caller completion, so a poisoned
    // lock can only come from a panic inside our own bookkeeping.
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn oneshot_completion<T: Send + 'static>() -> (Completion<T>, oneshot::Receiver<Result<T, HandleError>>) {
    let (tx, rx) = oneshot::channel();
    let completion: Completion<T> = Box::new(move |result| {
        // The caller may have dropped the future; the result is then discarded.
        let _ = tx.send(result);
    });
    (completion, rx)
}

pub(crate) async fn recv<T>(rx: oneshot::Receiver<Result<T, HandleError>>) -> Result<T, HandleError> {
    rx.await.unwrap_or(Err(HandleError::Dropped))
}

/// Queues the connect of an asynchronous constructor, or settles straight
/// away when there is nothing to connect with.
///
/// The constructor releases the returned hold just before it returns.
pub(crate) fn start_connect<H, T, F>(
    queue: &SerialQueue<H>,
    object: T,
    params: ConnectParams,
    flags: ConnectFlags,
    completion: F,
) -> Hold
where
    H: RawHandle,
    T: Send + 'static,
    F: FnOnce(Result<T, HandleError>) + Send + 'static,
{
    let (done, hold) = connection::settle(queue.scheduler(), object, completion);
    if params.is_empty() {
        done(Ok(()));
    } else {
        queue.submit_connect(params, flags, Some(done));
    }
    hold
}

/// Creates a queued connection, connecting inline when `params` is non-empty.
///
/// Blocks the calling thread for the duration of the connect; call it from
/// a context where blocking is acceptable (e.g. before the first `.await`, or
/// inside `tokio::task::spawn_blocking`).
///
/// # Errors
///
/// - [`CreateError::Scheduler`] outside a Tokio runtime.
/// - [`CreateError::Connect`] if the native connect fails.
pub fn create_queued_sync<H: RawHandle>(
    handle: H,
    params: &ConnectParams,
) -> Result<SerialQueue<H>, CreateError> {
    let scheduler = Scheduler::current()?;
    let conn = connection::create_sync(handle, params)?;
    Ok(SerialQueue::new(conn, scheduler))
}

/// Creates a queued connection and returns it immediately.
///
/// The connect is the first queued operation, so anything submitted on the
/// returned queue runs after it. `completion` fires exactly once on a later
/// scheduling turn, never before this function has returned.
///
/// # Errors
///
/// Returns [`CreateError::Scheduler`] outside a Tokio runtime.
pub fn create_queued_async<H, F>(
    handle: H,
    params: ConnectParams,
    flags: ConnectFlags,
    completion: F,
) -> Result<SerialQueue<H>, CreateError>
where
    H: RawHandle,
    F: FnOnce(Result<SerialQueue<H>, HandleError>) + Send + 'static,
{
    let queue = SerialQueue::from_handle(handle)?;
    start_connect(&queue, queue.clone(), params, flags, completion).release();
    Ok(queue)
}
