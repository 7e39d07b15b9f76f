//! # connq
//!
//! Serialized, queue-backed async access to a single non-reentrant database
//! connection handle.
//!
//! A native client session tolerates exactly one operation in flight.
//! `connq` layers three facades over it:
//!
//! - [`Connection`]: the raw handle, unserialized.
//! - [`SerialQueue`]: FIFO dispatch, one operation at a time, resuming on
//!   the next scheduling turn after each completion.
//! - [`Highlevel`]: a single `query` entry point whose dispatch strategy
//!   (buffered or streamed) is a stored [`QueryMode`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use connq::handle::{Blocking, ConnectParams, Driver};
//! use connq::queue::SerialQueue;
//!
//! # async fn demo<D: Driver>(driver: D) -> Result<(), Box<dyn std::error::Error>> {
//! let queue = SerialQueue::from_handle(Blocking::current(driver)?)?;
//!
//! let connected = queue.connect(ConnectParams::new().host("localhost").user("app"));
//! let a = queue.query("SELECT 1");
//! let b = queue.query("SELECT 2");
//!
//! connected.await?;
//! println!("{:?} {:?}", a.await?, b.await?);
//! # Ok(())
//! # }
//! ```

// ── Layers ────────────────────────────────────────────────────────────────────
pub mod connection;
pub mod highlevel;
pub mod queue;

// ── Native handle contract and runtime plumbing ──────────────────────────────
pub mod config;
pub mod handle;
pub mod scheduler;

#[cfg(test)]
mod testing;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::ConnectionConfig;
pub use connection::{Connection, CreateError};
pub use handle::{ConnectFlags, ConnectParams, HandleError, QueryResult, RawHandle, ResultSet};
pub use highlevel::{Highlevel, ModeError, QueryMode};
pub use queue::SerialQueue;
pub use scheduler::{Hold, Scheduler, SchedulerError};
