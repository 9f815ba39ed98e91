//! Pending queue plus in-flight set
//!
//! Both live behind one lock so "move from pending to in-flight" is a single
//! step and a snapshot never misses a task that is between the two.

use super::handle::TaskControl;
use super::job::Job;
use crate::error::{Error, Result};
use crate::types::TaskId;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// A submitted task waiting in, or taken from, the queue
pub(crate) struct QueuedJob {
    pub(crate) control: Arc<TaskControl>,
    pub(crate) job: Box<dyn Job>,
}

impl std::fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedJob")
            .field("id", &self.control.id)
            .field("state", &self.control.state())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<QueuedJob>,
    in_flight: HashMap<TaskId, Arc<TaskControl>>,
    closed: bool,
}

/// FIFO of pending tasks with head insertion, and the set of running tasks
#[derive(Default)]
pub(crate) struct RequestQueue {
    inner: Mutex<QueueInner>,
    available: Notify,
}

impl RequestQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a task, or insert it at the head when `at_front` is set
    ///
    /// Fails with [`Error::RejectedSubmission`] once the queue is closed.
    pub(crate) fn enqueue(&self, job: QueuedJob, at_front: bool) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(Error::RejectedSubmission);
            }
            if at_front {
                inner.pending.push_front(job);
            } else {
                inner.pending.push_back(job);
            }
        }
        self.available.notify_one();
        Ok(())
    }

    /// Wait for the next pending task and move it to the in-flight set
    ///
    /// Returns None once the queue is closed and empty, or when `shutdown`
    /// fires while waiting.
    pub(crate) async fn promote(&self, shutdown: &CancellationToken) -> Option<QueuedJob> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking so an enqueue between the check and
            // the await is not lost.
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(job) = inner.pending.pop_front() {
                    inner.in_flight.insert(job.control.id, job.control.clone());
                    return Some(job);
                }
                if inner.closed {
                    return None;
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    /// Remove a task from the in-flight set; returns whether it was there
    pub(crate) fn demote(&self, id: TaskId) -> bool {
        self.lock().in_flight.remove(&id).is_some()
    }

    /// Remove and return every pending task, leaving in-flight tasks alone
    pub(crate) fn drain_pending(&self) -> Vec<QueuedJob> {
        self.lock().pending.drain(..).collect()
    }

    /// Every task the queue knows about: pending in queue order, then in-flight
    pub(crate) fn snapshot_all(&self) -> Vec<Arc<TaskControl>> {
        let inner = self.lock();
        inner
            .pending
            .iter()
            .map(|job| job.control.clone())
            .chain(inner.in_flight.values().cloned())
            .collect()
    }

    /// Refuse further submissions, drain pending tasks and wake idle workers
    ///
    /// Returns None if the queue was already closed.
    pub(crate) fn close(&self) -> Option<Vec<QueuedJob>> {
        let drained = {
            let mut inner = self.lock();
            if inner.closed {
                return None;
            }
            inner.closed = true;
            inner.pending.drain(..).collect()
        };
        self.available.notify_waiters();
        Some(drained)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn pending_ids(&self) -> Vec<TaskId> {
        self.lock().pending.iter().map(|job| job.control.id).collect()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub(crate) fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }
}
