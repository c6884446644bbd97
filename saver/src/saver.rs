use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::locale;
use crate::queue::WorkQueue;
use crate::task::{self, Completion, Fault, Message, Worker, WorkerOptions};
use crate::Config;

#[derive(Debug, Error)]
pub enum Error {
    /// A job was submitted after a shutdown request, the saver not being started again since.
    #[error("cannot submit job, saver is shut down or quitting")]
    SubmitRejected,
    /// The saver was started while a shutdown is still in progress.
    #[error("cannot start worker, saver is currently quitting")]
    Quitting,
    /// The worker thread terminated abnormally.
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Lifecycle state of a [`Saver`] worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// No worker is running, jobs are rejected if a shutdown has been requested since the last start.
    Stopped,
    /// A worker is running and jobs are accepted.
    Running,
    /// A shutdown is waiting for the worker to exit.
    Quitting,
}

#[derive(Debug, Default)]
struct Inner {
    /// The queue of the current worker lifetime.
    queue: Arc<WorkQueue<Message>>,
    /// The current worker, if started.
    worker: Option<Worker>,
    /// Whether jobs are rejected, from a shutdown request until the next start.
    quitting: bool,
    /// Whether a shutdown is waiting for the worker to exit.
    stopping: bool,
}

/// Background persistence worker.
///
/// A `Saver` moves side effects, typically file I/O, off the calling thread: jobs are submitted from any number of threads and executed
/// one at a time, in submission order, on a single dedicated worker thread.
///
/// # Fault isolation
/// A job returning an error or panicking is logged, and the worker moves on to the next job. Callers are never notified, unless they
/// kept a handle on the job result with [`Saver::execute()`].
///
/// # Shutdown
/// [`Saver::shutdown()`] blocks until every job submitted before it has been handled. Submitting once a shutdown has been requested,
/// and until the saver is started again, is rejected with [`Error::SubmitRejected`]. Dropping a running `Saver` shuts it down.
///
/// # Example
/// ```
/// # use std::sync::{Arc, Mutex};
/// # use saver::Saver;
/// let saver = Saver::default();
/// saver.start()?;
///
/// let log = Arc::new(Mutex::new(vec![]));
///
/// for entry in ["a", "b"] {
///     let log = Arc::clone(&log);
///     saver.forget(move || log.lock().unwrap().push(entry))?;
/// }
///
/// saver.shutdown()?;
///
/// assert_eq!(*log.lock().unwrap(), ["a", "b"]);
/// assert!(!saver.is_active());
/// # Ok::<_, saver::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct Saver {
    config: Config,
    inner: RwLock<Inner>,
    /// Held for the whole duration of a shutdown, so that concurrent shutdowns all return once the worker has exited.
    stop_lock: Mutex<()>,
}

impl Saver {
    /// Create a new stopped `Saver`.
    ///
    /// Jobs submitted before [`Saver::start()`] are queued and executed once started.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            inner: Default::default(),
            stop_lock: Default::default(),
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start the worker thread, accepting jobs again after a shutdown.
    ///
    /// When the locale is forced by the configuration, it is installed on the current thread as well as on the worker thread.
    /// Starting a saver whose worker is still running is a no-op, only reported as a warning.
    ///
    /// # Errors
    /// This method fails if a shutdown is in progress or if the worker thread cannot be spawned.
    pub fn start(&self) -> Result<(), Error> {
        let mut inner = self.write();

        if inner.stopping {
            return Err(Error::Quitting);
        }

        inner.quitting = false;

        if self.config.force_locale() {
            locale::set_current(self.config.locale());
        }

        match inner.worker.take() {
            Some(worker) if worker.is_alive() => {
                tracing::warn!("Worker {} is still running!", worker.id());

                inner.worker = Some(worker);
                return Ok(());
            }
            Some(worker) => {
                // the worker exited on its own after a cancellation fault, its queue still holds pending jobs
                if !worker.join() {
                    tracing::error!("Worker thread panicked");
                }
            }
            None => {}
        }

        static WORKER_ID: AtomicUsize = AtomicUsize::new(0);
        let id = WORKER_ID.fetch_add(1, Ordering::Relaxed);

        let options = WorkerOptions {
            name: self.config.thread_name().to_owned(),
            locale: locale::current(),
            verbose: self.config.verbose(),
        };

        inner.worker = Some(Worker::spawn(id, Arc::clone(&inner.queue), options)?);

        Ok(())
    }

    /// Send a job to the worker.
    ///
    /// The job is executed in the background, after every job previously submitted. If it fails, the fault is just logged.
    /// To keep a handle on its result, use [`Saver::execute()`] instead.
    ///
    /// Jobs submitted before the first start are queued and executed once started.
    ///
    /// # Errors
    /// This method fails with [`Error::SubmitRejected`] once a shutdown has been requested and until the saver is started again,
    /// in which case the job is dropped unexecuted.
    pub fn submit(&self, job: impl FnOnce() -> Result<(), Fault> + Send + 'static) -> Result<(), Error> {
        // a read guard is held while enqueuing, so that an accepted job always comes before the shutdown sentinel
        let inner = self.read();

        if inner.quitting {
            return Err(Error::SubmitRejected);
        }

        inner.queue.enqueue(Message::Job(Box::new(job)));

        Ok(())
    }

    /// Send an infallible job to the worker and forget it.
    ///
    /// See [`Saver::submit()`].
    #[inline]
    pub fn forget(&self, f: impl FnOnce() + Send + 'static) -> Result<(), Error> {
        self.submit(move || {
            f();
            Ok(())
        })
    }

    /// Send a job to the worker and keep a handle on its result.
    ///
    /// A fault is both logged and delivered to the returned [`Completion`]. A job dropped unexecuted, because the worker
    /// was cancelled, completes with [`Fault::Cancelled`].
    ///
    /// ```
    /// # use saver::Saver;
    /// let saver = Saver::default();
    /// saver.start()?;
    ///
    /// let completion = saver.execute(|| Ok(6 * 7))?;
    ///
    /// assert_eq!(completion.wait().unwrap(), 42);
    /// # Ok::<_, saver::Error>(())
    /// ```
    ///
    /// # Errors
    /// See [`Saver::submit()`].
    pub fn execute<T: Send + 'static>(
        &self,
        f: impl FnOnce() -> Result<T, Fault> + Send + 'static,
    ) -> Result<Completion<T>, Error> {
        let (sender, receiver) = oneshot::channel();

        self.submit(move || match task::guarded(f) {
            Err(Fault::Cancelled) => Err(Fault::Cancelled),
            result => {
                if let Err(ref fault) = result {
                    task::report(fault);
                }

                let _ = sender.send(result);

                Ok(())
            }
        })?;

        Ok(Completion::new(receiver))
    }

    /// Stop the worker gracefully, blocking until every job submitted before this call has been handled.
    ///
    /// Jobs submitted from now on are rejected, until the saver is started again. Concurrent calls all block until the worker has
    /// exited. If the worker already exited after a cancellation fault, the jobs it left pending are dropped.
    ///
    /// _Note: there is no timeout, a job that never completes blocks this method forever._
    ///
    /// # Errors
    /// This method fails if the worker thread panicked.
    pub fn shutdown(&self) -> Result<(), Error> {
        self.stop(false)
    }

    /// Stop the worker forcefully, blocking until the job in progress, if any, completes.
    ///
    /// Pending jobs are dropped without being executed.
    ///
    /// # Errors
    /// This method fails if the worker thread panicked.
    pub fn cancel(&self) -> Result<(), Error> {
        self.stop(true)
    }

    fn stop(&self, cancel: bool) -> Result<(), Error> {
        let _stop_guard = self.stop_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut inner = self.write();
        inner.quitting = true;

        let Some(worker) = inner.worker.take() else {
            match inner.queue.len() {
                0 => tracing::debug!("No worker to stop."),
                pending => tracing::warn!("No worker to stop, {pending} job(s) left pending until the next start."),
            }
            return Ok(());
        };

        if cancel {
            worker.cancel();
        }

        inner.stopping = true;
        inner.queue.enqueue(Message::Stop); // ensures the worker is woken up even if the queue is empty
        let queue = Arc::clone(&inner.queue);

        drop(inner);

        let id = worker.id();
        let joined = worker.join();

        let mut inner = self.write();

        // a fresh queue per worker lifetime, dropping whatever a cancellation left behind
        let dropped = queue.clear();
        if dropped > 0 {
            tracing::debug!("Dropped {dropped} pending message(s) of worker {id}.");
        }
        inner.queue = Default::default();
        inner.stopping = false;

        if joined {
            Ok(())
        } else {
            Err(Error::WorkerPanicked(id))
        }
    }

    /// Return `true` if the worker thread exists and is alive.
    pub fn is_active(&self) -> bool {
        self.read().worker.as_ref().is_some_and(Worker::is_alive)
    }

    /// Return the current lifecycle state.
    pub fn state(&self) -> WorkerState {
        let inner = self.read();

        if inner.stopping {
            WorkerState::Quitting
        } else if inner.worker.as_ref().is_some_and(Worker::is_alive) {
            WorkerState::Running
        } else {
            WorkerState::Stopped
        }
    }

    /// Return the number of jobs waiting to be executed (see [`WorkQueue::len()`]).
    pub fn pending(&self) -> usize {
        self.read().queue.len()
    }

    #[inline]
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Saver {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::error!("Failed to shut saver down: {err}");
        }
    }
}
