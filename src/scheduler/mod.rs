//! Cooperative "next turn" scheduling on top of a Tokio runtime.
//!
//! Queue resumption and asynchronous-constructor completions must never run
//! inside the call that triggered them. [`Scheduler::defer`] hands the
//! callback to the runtime as a fresh task, so it never runs on the caller's
//! stack.
//!
//! On a multi-threaded runtime a fresh task may start on another worker
//! straight away. [`Scheduler::defer_held`] additionally keeps the callback
//! parked until the returned [`Hold`] is dropped, which lets the caller
//! decide where its own turn ends.

use std::future::Future;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Errors produced while capturing a scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no Tokio runtime is running on this thread")]
    NoRuntime,
}

/// A cloneable handle onto the runtime that drives deferred work.
///
/// # Examples
///
/// ```
/// use connq::scheduler::Scheduler;
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let scheduler = Scheduler::current().unwrap();
///     let (tx, rx) = tokio::sync::oneshot::channel();
///     scheduler.defer(move || {
///         let _ = tx.send("later");
///     });
///     assert_eq!(rx.await.unwrap(), "later");
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Scheduler {
    runtime: Handle,
}

impl Scheduler {
    /// Wraps an explicit runtime handle.
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Captures the runtime the caller is currently running on.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NoRuntime`] when called outside a Tokio
    /// runtime context.
    pub fn current() -> Result<Self, SchedulerError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| SchedulerError::NoRuntime)
    }

    /// Schedules `f` for a later scheduling turn.
    ///
    /// `f` never runs on the caller's stack. On a current-thread runtime it
    /// runs once the calling task yields; on a multi-threaded runtime another
    /// worker may pick it up immediately. A panic inside `f` is contained in
    /// its own task.
    pub fn defer<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.runtime.spawn(async move { f() });
    }

    /// Schedules `f` for a later scheduling turn that starts no earlier than
    /// the drop of the returned [`Hold`].
    ///
    /// Dropping the hold during unwinding releases `f` too.
    pub fn defer_held<F>(&self, f: F) -> Hold
    where
        F: FnOnce() + Send + 'static,
    {
        let (hold, released) = hold();
        self.runtime.spawn(async move {
            released.wait().await;
            f();
        });
        hold
    }

    /// Spawns a future onto the runtime.
    pub fn spawn<Fut>(&self, fut: Fut) -> JoinHandle<Fut::Output>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        self.runtime.spawn(fut)
    }

    /// Runs a blocking closure on the runtime's blocking pool.
    pub fn spawn_blocking<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.runtime.spawn_blocking(f)
    }
}

/// Keeps deferred work parked. Dropping it, or calling
/// [`release`](Hold::release), lets that work run.
#[derive(Debug)]
#[must_use = "deferred work is released as soon as the hold is dropped"]
pub struct Hold {
    _gate: oneshot::Sender<()>,
}

impl Hold {
    /// Releases the parked work.
    pub fn release(self) {}
}

/// Waiting side of a [`Hold`].
#[derive(Debug)]
pub(crate) struct Released(oneshot::Receiver<()>);

impl Released {
    /// Resolves once the matching [`Hold`] is gone.
    pub(crate) async fn wait(self) {
        // The gate never sends; the receiver resolves when the sender drops.
        let _ = self.0.await;
    }
}

pub(crate) fn hold() -> (Hold, Released) {
    let (gate, released) = oneshot::channel();
    (Hold { _gate: gate }, Released(released))
}
