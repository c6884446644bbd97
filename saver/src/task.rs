//! This module provides the background worker executing jobs and the faults they may raise.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::{fmt, io, thread};

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::locale::{self, Locale};
use crate::queue::WorkQueue;

/// A deferred unit of work, consumed exactly once by the worker.
pub type Job = Box<dyn FnOnce() -> Result<(), Fault> + Send + 'static>;

/// A fault raised while executing a job.
///
/// Faults are contained within the worker: they are logged and the worker moves on to the next job, except for
/// [`Fault::Cancelled`] which makes the worker exit right away.
#[derive(Debug, Error)]
pub enum Fault {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("job panicked: {0}")]
    Panicked(String),
    #[error("job cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl Fault {
    /// Wrap any error into a `Fault`.
    #[inline]
    pub fn other(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(error.into())
    }

    /// Return `true` if this is a cancellation fault.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<Cancelled> for Fault {
    #[inline]
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Cancellation marker.
///
/// Unwinding with this payload from within a job (see [`cancel()`]) is treated as a [`Fault::Cancelled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cancelled;

/// Abort the current job and terminate the worker running it.
///
/// Pending jobs are left unprocessed. Unlike a regular panic, this does not trigger the panic hook.
pub fn cancel() -> ! {
    panic::resume_unwind(Box::new(Cancelled))
}

/// Execute `f`, turning any panic into a [`Fault`].
pub(crate) fn guarded<T>(f: impl FnOnce() -> Result<T, Fault>) -> Result<T, Fault> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(panic_fault(payload)))
}

fn panic_fault(payload: Box<dyn Any + Send>) -> Fault {
    if payload.is::<Cancelled>() {
        return Fault::Cancelled;
    }

    let message = match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_owned(),
            Err(_) => "Box<dyn Any>".to_owned(),
        },
    };

    Fault::Panicked(message)
}

/// Message going through the worker queue.
pub(crate) enum Message {
    /// A job to execute.
    Job(Job),
    /// The shutdown sentinel: every message queued before it has been handled.
    Stop,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job(_) => f.write_str("Job(..)"),
            Self::Stop => f.write_str("Stop"),
        }
    }
}

/// A handle on the result of a job sent with [`Saver::execute()`](crate::Saver::execute).
///
/// The result can either be waited for synchronously with [`Completion::wait()`] or awaited, `Completion` being a [`Future`].
/// If the job is dropped without being executed (eg. the worker has been cancelled), the result is [`Fault::Cancelled`].
#[derive(Debug)]
pub struct Completion<T> {
    receiver: oneshot::Receiver<Result<T, Fault>>,
}

impl<T> Completion<T> {
    pub(crate) fn new(receiver: oneshot::Receiver<Result<T, Fault>>) -> Self {
        Self { receiver }
    }

    /// Block the current thread until the job has been handled and return its result.
    ///
    /// # Panics
    /// This method panics if called within an asynchronous execution context, just `.await` the completion instead.
    pub fn wait(self) -> Result<T, Fault> {
        self.receiver.blocking_recv().unwrap_or(Err(Fault::Cancelled))
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, Fault>;

    #[inline]
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.receiver.poll_unpin(cx).map(|result| result.unwrap_or(Err(Fault::Cancelled)))
    }
}

/// Settings of a worker thread.
#[derive(Debug, Clone)]
pub(crate) struct WorkerOptions {
    pub name: String,
    pub locale: Locale,
    pub verbose: bool,
}

/// A dedicated thread draining a [`WorkQueue`].
#[derive(Debug)]
pub(crate) struct Worker {
    id: usize,
    handle: thread::JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
}

impl Worker {
    pub(crate) fn spawn(id: usize, queue: Arc<WorkQueue<Message>>, options: WorkerOptions) -> io::Result<Worker> {
        tracing::debug!("Starting worker {id}...");

        let cancelled = Arc::new(AtomicBool::new(false));
        let parent = tracing::Span::current();

        let handle = thread::Builder::new().name(options.name).spawn({
            let cancelled = Arc::clone(&cancelled);

            move || {
                locale::set_current(options.locale);

                tracing::debug_span!(parent: &parent, "worker", id).in_scope(|| run(id, &queue, &cancelled, options.verbose));
            }
        })?;

        Ok(Worker { id, handle, cancelled })
    }

    #[inline]
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Return `true` while the worker thread is running.
    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Make the worker exit before handling its next message, leaving any pending job unprocessed.
    ///
    /// The job in progress, if any, still runs to completion.
    #[inline]
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Wait for the worker thread to exit, returning `false` if it panicked.
    pub(crate) fn join(self) -> bool {
        tracing::debug!("Stopping worker {}...", self.id);

        self.handle.join().is_ok()
    }
}

fn run(id: usize, queue: &WorkQueue<Message>, cancelled: &AtomicBool, verbose: bool) {
    for message in queue.iter() {
        if cancelled.load(Ordering::Acquire) {
            tracing::debug!("Worker {id} cancelled, leaving {} pending message(s).", queue.len() + 1);
            break;
        }

        let job = match message {
            Message::Job(job) => job,
            Message::Stop => {
                tracing::debug!("All jobs exhausted, shutting down worker {id}.");
                break;
            }
        };

        if verbose {
            tracing::debug!("Executing job on worker {id}...");
        } else {
            tracing::trace!("Executing job on worker {id}...");
        }

        match guarded(job) {
            Ok(()) => {}
            Err(Fault::Cancelled) => {
                tracing::debug!("Job cancelled worker {id}, leaving {} pending message(s).", queue.len());
                break;
            }
            Err(fault) => report(&fault),
        }
    }
}

/// Log a job fault.
pub(crate) fn report(fault: &Fault) {
    tracing::error!("Job failed: {fault}");
}
