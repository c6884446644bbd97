//! A simple crate providing a background persistence worker.
//!
//! A robust and dependable crate moving side effects, typically file I/O, off a latency sensitive thread (eg. the UI thread of an
//! experiment client), dedicated to:
//! - handing deferred jobs over from any number of producer threads to a single consumer thread, through a blocking FIFO
//!   [`queue`](queue::WorkQueue),
//! - executing them one at a time on a dedicated [`task`] worker thread, containing any fault a job may raise,
//! - managing the worker lifecycle with an ordered, graceful shutdown protocol, from a [`Saver`],
//! - persisting experiment [`data`] (tables as CSV, JSON, text and raw bytes) in the background.
//!
//! It makes use of a _multi-producer single-consumer_ `mpsc` channel, consumed in a blocking fashion by a plain OS thread, so that
//! jobs never depend on an asynchronous runtime. The only shared mutable state besides the queue is the quitting flag of a [`Saver`],
//! guarded by a `RwLock`: producers check it under a read guard while enqueuing, whereas the shutdown sets it and enqueues its
//! sentinel under a write guard. Hence any accepted job comes before the sentinel and is guaranteed to run before the shutdown
//! completes.
//!
//! Here is the lifecycle of a [`Saver`]:
//!
//! ```text
//!             start()           shutdown() / cancel()            worker joined
//!     Stopped ---------> Running -----------------------> Quitting ---------------> Stopped
//!                           |
//!                           | cancellation fault, pending jobs kept for the next start()
//!                           v
//!                        Stopped
//! ```
//!
//! Numbers formatted by jobs follow the [`locale`] installed on the worker thread at startup, whatever thread submitted them.

mod config;
pub use config::Config;

pub mod data;
pub mod locale;
pub mod queue;

mod saver;
pub use saver::*;

pub mod task;
