//! Adapter lifting a blocking client into a [`RawHandle`].
//!
//! Each asynchronous primitive runs the matching [`Driver`] call on the
//! runtime's blocking pool and reports back through its completion from a
//! regular task. The completion fires exactly once, even when the driver
//! panics.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use super::{Completion, ConnectFlags, ConnectParams, HandleError, QueryResult, RawHandle};
use crate::scheduler::{Scheduler, SchedulerError};

/// A synchronous database client.
///
/// `real_query` fetches and buffers the complete result. `send_query` only
/// writes the statement; `read_query_result` then reads the server's reply.
pub trait Driver: Send + 'static {
    fn connect(&mut self, params: &ConnectParams, flags: ConnectFlags) -> Result<(), HandleError>;

    fn real_query(&mut self, sql: &str) -> Result<QueryResult, HandleError>;

    fn send_query(&mut self, sql: &str) -> Result<(), HandleError>;

    fn read_query_result(&mut self) -> Result<QueryResult, HandleError>;
}

/// [`RawHandle`] over a blocking [`Driver`].
pub struct Blocking<D> {
    driver: Arc<Mutex<D>>,
    scheduler: Scheduler,
}

impl<D: Driver> Blocking<D> {
    pub fn new(driver: D, scheduler: Scheduler) -> Self {
        Self {
            driver: Arc::new(Mutex::new(driver)),
            scheduler,
        }
    }

    /// Builds the adapter on the runtime the caller is running on.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NoRuntime`] outside a Tokio runtime.
    pub fn current(driver: D) -> Result<Self, SchedulerError> {
        Ok(Self::new(driver, Scheduler::current()?))
    }

    fn run<T, F>(&self, op: &'static str, work: F, completion: Completion<T>)
    where
        T: Send + 'static,
        F: FnOnce(&mut D) -> Result<T, HandleError> + Send + 'static,
    {
        let driver = Arc::clone(&self.driver);
        let worker = self
            .scheduler
            .spawn_blocking(move || work(&mut *lock(&*driver, op)?));

        self.scheduler.spawn(async move {
            let result = match worker.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(op, error = %e, "driver worker failed");
                    Err(HandleError::Worker(e.to_string()))
                }
            };
            completion(result);
        });
    }
}

fn lock<'a, D>(driver: &'a Mutex<D>, op: &'static str) -> Result<MutexGuard<'a, D>, HandleError> {
    driver.lock().map_err(|_| {
        warn!(op, "driver lock poisoned by an earlier panic");
        HandleError::Worker("driver lock poisoned".to_owned())
    })
}

impl<D: Driver> RawHandle for Blocking<D> {
    fn connect_sync(&mut self, params: &ConnectParams) -> Result<(), HandleError> {
        lock(&*self.driver, "connect_sync")?.connect(params, ConnectFlags::EMPTY)
    }

    fn connect(&mut self, params: ConnectParams, flags: ConnectFlags, completion: Completion<()>) {
        self.run(
            "connect",
            move |driver| driver.connect(&params, flags),
            completion,
        );
    }

    fn query(&mut self, sql: String, completion: Completion<QueryResult>) {
        self.run("query", move |driver| driver.real_query(&sql), completion);
    }

    fn query_send(&mut self, sql: String, completion: Completion<QueryResult>) {
        self.run(
            "query_send",
            move |driver| {
                driver.send_query(&sql)?;
                driver.read_query_result()
            },
            completion,
        );
    }
}
