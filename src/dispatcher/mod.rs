//! Core dispatcher implementation split into focused submodules.
//!
//! The `Dispatcher` struct and its methods are organized by concern:
//! - [`queue`] - Pending queue with skip-queue insertion and in-flight tracking
//! - [`handle`] - Per-task control block and the caller-facing handle
//! - [`job`] - Type-erased queued work
//! - [`worker`] - Worker loop
//! - [`exchange`] - Execution of one HTTP exchange
//! - [`lifecycle`] - Stop, cancel and termination
//! - [`cookies`] - Cookie store and policy configuration

mod cookies;
mod exchange;
mod handle;
mod job;
mod lifecycle;
mod queue;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use handle::TaskHandle;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::parser::Parser;
use crate::request::RequestTask;
use crate::transport::{ReqwestTransport, Transport};
use crate::types::Event;
use cookies::CookieSettings;
use handle::TaskControl;
use job::TaskJob;
use queue::{QueuedJob, RequestQueue};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use worker::WorkerContext;

/// Queue and worker state
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Pending tasks and in-flight bookkeeping
    pub(crate) queue: Arc<RequestQueue>,
    /// Fired by `cancel()` to unblock idle workers
    pub(crate) shutdown: CancellationToken,
    /// Fired when the last worker leaves its loop
    pub(crate) terminated: CancellationToken,
    /// Workers that have not exited yet
    pub(crate) live_workers: Arc<AtomicUsize>,
}

/// Concurrent HTTP dispatcher (cloneable - all fields are Arc-wrapped)
///
/// A fixed number of workers take request tasks from a FIFO queue and execute
/// them one at a time each. Clones share the same queue and workers.
#[derive(Clone)]
pub struct Dispatcher {
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across workers)
    pub(crate) config: Arc<Config>,
    /// HTTP transport used by every worker
    pub(crate) transport: Arc<dyn Transport>,
    /// Queue and worker state
    pub(crate) queue_state: QueueState,
    /// Cookie store and acceptance policy, swapped as a whole
    pub(crate) cookies: Arc<std::sync::RwLock<CookieSettings>>,
}

impl Dispatcher {
    /// Create a dispatcher with `connections` workers and default settings
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `connections` is zero or no
    /// Tokio runtime is running.
    pub fn new(connections: usize) -> Result<Self> {
        Self::with_config(Config::with_connections(connections))
    }

    /// Create a dispatcher from a full configuration, using [`ReqwestTransport`]
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;
        Self::with_transport(config, Arc::new(ReqwestTransport::new()))
    }

    /// Create a dispatcher that performs its exchanges through `transport`
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            Error::config(
                "runtime",
                "a Tokio runtime must be running to start dispatcher workers",
            )
        })?;

        // Create broadcast channel; subscribers each receive every event
        let (event_tx, _rx) = broadcast::channel(config.event_buffer);
        let connections = config.connections;

        let dispatcher = Self {
            event_tx,
            config: Arc::new(config),
            transport,
            queue_state: QueueState {
                queue: Arc::new(RequestQueue::new()),
                shutdown: CancellationToken::new(),
                terminated: CancellationToken::new(),
                live_workers: Arc::new(AtomicUsize::new(connections)),
            },
            cookies: Arc::new(std::sync::RwLock::new(CookieSettings::default())),
        };

        for worker in 0..connections {
            runtime.spawn(worker::run_worker(WorkerContext {
                worker,
                dispatcher: dispatcher.clone(),
            }));
        }

        tracing::info!(
            connections,
            chunk_size = dispatcher.config.chunk_size,
            "Dispatcher started"
        );
        Ok(dispatcher)
    }

    /// Queue a task for execution
    ///
    /// With `skip_queue` the task is inserted at the head of the queue instead
    /// of the tail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RejectedSubmission`] once [`stop`](Self::stop) or
    /// [`cancel`](Self::cancel) has been called.
    pub fn submit<P: Parser>(&self, task: RequestTask<P>, skip_queue: bool) -> Result<TaskHandle> {
        if self.is_closed() {
            return Err(Error::RejectedSubmission);
        }

        let id = task.id;
        let control = Arc::new(TaskControl::new(id, task.cancel_token.clone()));
        let job = QueuedJob {
            control: control.clone(),
            job: Box::new(TaskJob {
                task,
                control: control.clone(),
            }),
        };

        self.queue_state.queue.enqueue(job, skip_queue)?;
        tracing::debug!(task_id = %id, skip_queue, "Task queued");
        self.emit_event(Event::Queued { id, skip_queue });

        Ok(TaskHandle { control })
    }

    /// Queue a task at the tail of the queue
    pub fn request<P: Parser>(&self, task: RequestTask<P>) -> Result<TaskHandle> {
        self.submit(task, false)
    }

    /// Subscribe to dispatcher events
    ///
    /// Each subscriber receives every event emitted after it subscribed. A
    /// subscriber that falls more than `event_buffer` events behind receives
    /// `RecvError::Lagged` and skips ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Emit an event; having no subscribers is not an error
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Configuration the dispatcher was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of workers
    pub fn connections(&self) -> usize {
        self.config.connections
    }

    /// Workers that have not left their loop yet
    pub fn live_workers(&self) -> usize {
        self.queue_state
            .live_workers
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Tasks waiting for a worker
    pub fn pending_count(&self) -> usize {
        self.queue_state.queue.pending_len()
    }

    /// Tasks currently executing
    pub fn in_flight_count(&self) -> usize {
        self.queue_state.queue.in_flight_len()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("connections", &self.connections())
            .field("live_workers", &self.live_workers())
            .field("pending", &self.pending_count())
            .field("in_flight", &self.in_flight_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
