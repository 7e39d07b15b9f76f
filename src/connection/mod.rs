//! Raw handle facade: direct, unserialized access to a [`RawHandle`].
//!
//! A [`Connection`] forwards every call straight to the handle. It offers no
//! ordering guarantee: issuing an asynchronous operation while another one is
//! still in flight is undefined behaviour at this layer. Wrap the connection
//! in a [`SerialQueue`](crate::queue::SerialQueue) to get one-at-a-time,
//! in-order dispatch.

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, info};

use crate::handle::{
    Completion, ConnectFlags, ConnectParams, HandleError, QueryResult, RawHandle,
};
use crate::scheduler::{self, Hold, Scheduler, SchedulerError};

/// Errors returned synchronously by the `create_*` constructors.
#[derive(Debug, Error)]
pub enum CreateError {
    #[error("connect failed: {0}")]
    Connect(#[from] HandleError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Shared, lockable wrapper around one native handle.
///
/// Cloning is cheap and yields another reference to the same session.
///
/// A completion the handle fires from inside the primitive call is delivered
/// after the handle lock is released, before the call returns. It may
/// therefore issue the next operation on the same connection.
pub struct Connection<H> {
    handle: Arc<Mutex<H>>,
}

impl<H> Clone for Connection<H> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
        }
    }
}

impl<H> fmt::Debug for Connection<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl<H: RawHandle> Connection<H> {
    /// Wraps an unconnected handle.
    pub fn new(handle: H) -> Self {
        Self {
            handle: Arc::new(Mutex::new(handle)),
        }
    }

    /// Connects inline, blocking the current thread.
    pub fn connect_sync(&self, params: &ConnectParams) -> Result<(), HandleError> {
        self.with_handle(|handle| handle.connect_sync(params))
    }

    pub fn connect(&self, params: ConnectParams, flags: ConnectFlags, completion: Completion<()>) {
        self.dispatch(completion, |handle, done| handle.connect(params, flags, done));
    }

    pub fn query(&self, sql: impl Into<String>, completion: Completion<QueryResult>) {
        let sql = sql.into();
        self.dispatch(completion, |handle, done| handle.query(sql, done));
    }

    pub fn query_send(&self, sql: impl Into<String>, completion: Completion<QueryResult>) {
        let sql = sql.into();
        self.dispatch(completion, |handle, done| handle.query_send(sql, done));
    }

    fn dispatch<T: Send + 'static>(
        &self,
        completion: Completion<T>,
        call: impl FnOnce(&mut H, Completion<T>),
    ) {
        let relay = Relay::new(completion);
        let done = relay.completion();
        self.with_handle(|handle| call(handle, done));
        relay.returned();
    }

    // Only a panicking handle can poison the lock; completions never run
    // under it. The session is still the caller's to use, so keep going.
    fn with_handle<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut handle)
    }
}

enum RelayState<T> {
    // The primitive call is still running.
    Calling(Completion<T>),
    // Fired inside the call; delivered once it returns.
    Fired(Completion<T>, Result<T, HandleError>),
    // The call returned first; the handle fires whenever it is done.
    Returned(Completion<T>),
    Delivered,
}

/// Hands a completion to the handle without letting it run under the handle
/// lock.
struct Relay<T> {
    state: Arc<Mutex<RelayState<T>>>,
}

impl<T: Send + 'static> Relay<T> {
    fn new(completion: Completion<T>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RelayState::Calling(completion))),
        }
    }

    fn completion(&self) -> Completion<T> {
        let state = Arc::clone(&self.state);
        Box::new(move |result: Result<T, HandleError>| {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            match mem::replace(&mut *state, RelayState::Delivered) {
                RelayState::Calling(completion) => {
                    *state = RelayState::Fired(completion, result);
                }
                RelayState::Returned(completion) => {
                    drop(state);
                    completion(result);
                }
                other => *state = other,
            }
        })
    }

    fn returned(self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match mem::replace(&mut *state, RelayState::Delivered) {
            RelayState::Calling(completion) => *state = RelayState::Returned(completion),
            RelayState::Fired(completion, result) => {
                drop(state);
                completion(result);
            }
            other => *state = other,
        }
    }
}

/// Builds the completion handed to an asynchronous connect on behalf of an
/// asynchronous constructor.
///
/// Whatever thread the native connect reports on, `completion` runs on a
/// later scheduling turn, receives `object` on success, and stays parked
/// until the returned [`Hold`] is released. Constructors release it as their
/// last step before returning.
pub(crate) fn settle<T, F>(scheduler: &Scheduler, object: T, completion: F) -> (Completion<()>, Hold)
where
    T: Send + 'static,
    F: FnOnce(Result<T, HandleError>) + Send + 'static,
{
    let (hold, released) = scheduler::hold();
    let scheduler = scheduler.clone();
    let done: Completion<()> = Box::new(move |result: Result<(), HandleError>| {
        match &result {
            Ok(()) => info!("connection ready"),
            Err(e) => debug!(error = %e, "connection attempt failed"),
        }
        scheduler.spawn(async move {
            released.wait().await;
            completion(result.map(|()| object));
        });
    });
    (done, hold)
}

/// Creates a connection, connecting inline when `params` is non-empty.
///
/// # Errors
///
/// Returns [`CreateError::Connect`] if the native connect fails.
pub fn create_sync<H: RawHandle>(
    handle: H,
    params: &ConnectParams,
) -> Result<Connection<H>, CreateError> {
    let conn = Connection::new(handle);
    if !params.is_empty() {
        conn.connect_sync(params)?;
        info!(host = ?params.host, database = ?params.database, "connected");
    }
    Ok(conn)
}

/// Creates a connection and returns it immediately.
///
/// `completion` fires exactly once on a later scheduling turn: with the
/// connection once the native connect succeeds, or with its error. With empty
/// `params` no connect is attempted and `completion` receives the connection.
/// It never starts before this function has returned, even when the handle
/// reports from another worker thread.
///
/// # Errors
///
/// Returns [`CreateError::Scheduler`] when called outside a Tokio runtime.
///
/// # Examples
///
/// ```rust,no_run
/// use connq::connection::create_async;
/// use connq::handle::{Blocking, ConnectFlags, ConnectParams, Driver};
///
/// # fn demo<D: Driver>(driver: D) -> Result<(), Box<dyn std::error::Error>> {
/// let params = ConnectParams::new().host("localhost").user("app");
/// let _conn = create_async(Blocking::current(driver)?, params, ConnectFlags::EMPTY, |result| {
///     match result {
///         Ok(_conn) => println!("connected"),
///         Err(e) => eprintln!("connect failed: {e}"),
///     }
/// })?;
/// # Ok(())
/// # }
/// ```
pub fn create_async<H, F>(
    handle: H,
    params: ConnectParams,
    flags: ConnectFlags,
    completion: F,
) -> Result<Connection<H>, CreateError>
where
    H: RawHandle,
    F: FnOnce(Result<Connection<H>, HandleError>) + Send + 'static,
{
    let scheduler = Scheduler::current()?;
    let conn = Connection::new(handle);
    let (done, hold) = settle(&scheduler, conn.clone(), completion);

    if params.is_empty() {
        done(Ok(()));
    } else {
        conn.connect(params, flags, done);
    }
    hold.release();
    Ok(conn)
}
