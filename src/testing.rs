//! Test doubles shared by the unit tests.
//!
//! [`MockHandle`] is an instrumented [`RawHandle`]: every dispatched
//! operation records an `Enter` event, and an `Exit` event once its native
//! work is done (just before its completion runs). An in-flight counter flags
//! any overlap between two operations.
//!
//! [`EchoDriver`] is a blocking [`Driver`] for exercising
//! [`Blocking`](crate::handle::Blocking).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use secrecy::ExposeSecret;
use tracing_subscriber::EnvFilter;

use crate::handle::{
    Completion, ConnectFlags, ConnectParams, Driver, HandleError, QueryResult, RawHandle,
    ResultSet,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Enter(&'static str, String),
    Exit(&'static str, String),
}

/// When the double reports completion.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Timing {
    /// Inside the primitive call itself.
    Immediate,
    /// Inside the primitive call, which then blocks its thread for the given
    /// time before returning.
    Stall(Duration),
    /// After a fixed delay, from a spawned task.
    Delay(Duration),
    /// After a random delay of up to the given number of milliseconds.
    Random(u64),
    /// Only when the test calls [`Monitor::complete_next`].
    Manual,
}

type Parked = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct MonitorState {
    events: Mutex<Vec<Event>>,
    in_flight: AtomicUsize,
    overlapped: AtomicBool,
    returned: AtomicUsize,
    parked: Mutex<VecDeque<Parked>>,
}

/// Test-side view of a [`MockHandle`].
#[derive(Clone, Default)]
pub(crate) struct Monitor {
    state: Arc<MonitorState>,
}

impl Monitor {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.state.events.lock().unwrap().clone()
    }

    /// `(primitive, argument)` pairs in dispatch order.
    pub(crate) fn dispatched(&self) -> Vec<(&'static str, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Enter(kind, arg) => Some((kind, arg)),
                Event::Exit(..) => None,
            })
            .collect()
    }

    pub(crate) fn count(&self, primitive: &str) -> usize {
        self.dispatched()
            .iter()
            .filter(|(kind, _)| *kind == primitive)
            .count()
    }

    pub(crate) fn overlapped(&self) -> bool {
        self.state.overlapped.load(Ordering::SeqCst)
    }

    /// Number of primitive calls that have returned to their caller.
    pub(crate) fn returned(&self) -> usize {
        self.state.returned.load(Ordering::SeqCst)
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Number of operations waiting for [`complete_next`](Self::complete_next).
    pub(crate) fn parked(&self) -> usize {
        self.state.parked.lock().unwrap().len()
    }

    /// Completes the oldest parked operation. Returns `false` if none is parked.
    pub(crate) fn complete_next(&self) -> bool {
        let next = self.state.parked.lock().unwrap().pop_front();
        match next {
            Some(finish) => {
                finish();
                true
            }
            None => false,
        }
    }

    /// Drops every parked operation without running its completion.
    pub(crate) fn discard_parked(&self) {
        self.state.parked.lock().unwrap().clear();
    }

    fn push(&self, event: Event) {
        self.state.events.lock().unwrap().push(event);
    }
}

/// Scripted handle.
///
/// Connecting as user `nobody` fails with error 1045. Queries whose text
/// starts with `FAIL` fail with error 1064. Any other query yields a single
/// row echoing the statement in column `sql`.
pub(crate) struct MockHandle {
    monitor: Monitor,
    timing: Timing,
}

impl MockHandle {
    pub(crate) fn new(timing: Timing) -> (Self, Monitor) {
        init_tracing();
        let monitor = Monitor::default();
        (
            Self {
                monitor: monitor.clone(),
                timing,
            },
            monitor,
        )
    }

    fn finish<T: Send + 'static>(
        &self,
        primitive: &'static str,
        arg: String,
        result: Result<T, HandleError>,
        completion: Completion<T>,
    ) {
        if self.monitor.state.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.monitor.state.overlapped.store(true, Ordering::SeqCst);
        }
        self.monitor.push(Event::Enter(primitive, arg.clone()));

        let monitor = self.monitor.clone();
        let finish = move || {
            monitor.state.in_flight.fetch_sub(1, Ordering::SeqCst);
            monitor.push(Event::Exit(primitive, arg));
            completion(result);
        };

        match self.timing {
            Timing::Immediate => finish(),
            Timing::Stall(stall) => {
                finish();
                std::thread::sleep(stall);
            }
            Timing::Delay(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    finish();
                });
            }
            Timing::Random(max_ms) => {
                let delay = Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms));
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    finish();
                });
            }
            Timing::Manual => self.monitor.state.parked.lock().unwrap().push_back(Box::new(finish)),
        }
        self.monitor.state.returned.fetch_add(1, Ordering::SeqCst);
    }
}

/// Routes queue logs to the test harness; set `RUST_LOG=connq=trace` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn connect_result(params: &ConnectParams) -> Result<(), HandleError> {
    match params.user.as_deref() {
        Some("nobody") => Err(HandleError::native(1045, "Access denied for user 'nobody'")),
        _ => Ok(()),
    }
}

fn query_result(sql: &str) -> Result<QueryResult, HandleError> {
    if sql.starts_with("FAIL") {
        return Err(HandleError::native(1064, format!("syntax error near '{sql}'")));
    }
    let mut set = ResultSet::new(vec!["sql".to_owned()]);
    set.push_row(vec![Some(sql.to_owned())]);
    Ok(QueryResult::Rows(set))
}

/// Text of the single `sql` cell a successful mock query returns.
pub(crate) fn echoed(result: &QueryResult) -> Option<&str> {
    result.rows()?.get(0, "sql")
}

impl RawHandle for MockHandle {
    fn connect_sync(&mut self, params: &ConnectParams) -> Result<(), HandleError> {
        let user = params.user.clone().unwrap_or_default();
        self.monitor.push(Event::Enter("connect_sync", user.clone()));
        self.monitor.push(Event::Exit("connect_sync", user));
        connect_result(params)
    }

    fn connect(&mut self, params: ConnectParams, _: ConnectFlags, completion: Completion<()>) {
        let result = connect_result(&params);
        self.finish("connect", params.user.unwrap_or_default(), result, completion);
    }

    fn query(&mut self, sql: String, completion: Completion<QueryResult>) {
        let result = query_result(&sql);
        self.finish("query", sql, result, completion);
    }

    fn query_send(&mut self, sql: String, completion: Completion<QueryResult>) {
        let result = query_result(&sql);
        self.finish("query_send", sql, result, completion);
    }
}

/// Blocking client that echoes statements back.
///
/// Connecting as `nobody` or with password `wrong` fails with error 1045.
/// `real_query` returns one row echoing the statement in column `echo`, and
/// `PANIC` makes it panic. `send_query` + `read_query_result` report the
/// statement length as affected rows. Every statement that reaches the
/// driver is appended to a shared log, after an optional random pause.
#[derive(Default)]
pub(crate) struct EchoDriver {
    connected: bool,
    sent: Option<String>,
    jitter_ms: u64,
    log: Arc<Mutex<Vec<String>>>,
}

impl EchoDriver {
    /// Pauses up to `max_ms` milliseconds before each call.
    pub(crate) fn with_jitter(max_ms: u64) -> (Self, Arc<Mutex<Vec<String>>>) {
        init_tracing();
        let driver = Self {
            jitter_ms: max_ms,
            ..Self::default()
        };
        let log = Arc::clone(&driver.log);
        (driver, log)
    }

    fn record(&self, entry: String) {
        if self.jitter_ms > 0 {
            let pause = rand::thread_rng().gen_range(0..=self.jitter_ms);
            std::thread::sleep(Duration::from_millis(pause));
        }
        self.log.lock().unwrap().push(entry);
    }
}

impl Driver for EchoDriver {
    fn connect(&mut self, params: &ConnectParams, _: ConnectFlags) -> Result<(), HandleError> {
        let user = params.user.as_deref().unwrap_or_default();
        self.record(format!("connect {user}"));
        let wrong_password = params
            .password
            .as_ref()
            .is_some_and(|password| password.expose_secret() == "wrong");
        if user == "nobody" || wrong_password {
            return Err(HandleError::native(1045, "Access denied"));
        }
        self.connected = true;
        Ok(())
    }

    fn real_query(&mut self, sql: &str) -> Result<QueryResult, HandleError> {
        if !self.connected {
            return Err(HandleError::NotConnected);
        }
        if sql == "PANIC" {
            panic!("driver crashed");
        }
        self.record(sql.to_owned());
        let mut set = ResultSet::new(vec!["echo".into()]);
        set.push_row(vec![Some(sql.to_owned())]);
        Ok(QueryResult::Rows(set))
    }

    fn send_query(&mut self, sql: &str) -> Result<(), HandleError> {
        if !self.connected {
            return Err(HandleError::NotConnected);
        }
        self.record(sql.to_owned());
        self.sent = Some(sql.to_owned());
        Ok(())
    }

    fn read_query_result(&mut self) -> Result<QueryResult, HandleError> {
        let sql = self.sent.take().ok_or(HandleError::NotConnected)?;
        Ok(QueryResult::Affected {
            rows: sql.len() as u64,
            insert_id: 0,
        })
    }
}
