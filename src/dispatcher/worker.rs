//! Worker loop: promote, execute, demote

use super::Dispatcher;
use super::queue::{QueuedJob, RequestQueue};
use crate::types::{Event, TaskId};
use std::sync::atomic::Ordering;

/// What a worker carries into each task it executes
pub(crate) struct WorkerContext {
    /// Worker index (0-based)
    pub(crate) worker: usize,
    pub(crate) dispatcher: Dispatcher,
}

/// Removes the task from the in-flight set however its execution ends
struct InFlight<'a> {
    queue: &'a RequestQueue,
    id: TaskId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.queue.demote(self.id);
    }
}

pub(crate) async fn run_worker(ctx: WorkerContext) {
    let worker = ctx.worker;
    let state = ctx.dispatcher.queue_state.clone();
    tracing::debug!(worker, "Worker started");

    while let Some(QueuedJob { control, job }) = state.queue.promote(&state.shutdown).await {
        let _in_flight = InFlight {
            queue: &state.queue,
            id: control.id,
        };
        if state.shutdown.is_cancelled() {
            control.cancel();
        }
        tracing::trace!(worker, task_id = %control.id, "Task promoted");

        job.run(&ctx).await;
    }

    tracing::debug!(worker, "Worker exited");
    ctx.dispatcher.emit_event(Event::WorkerExited { worker });
    if state.live_workers.fetch_sub(1, Ordering::SeqCst) == 1 {
        tracing::info!("All dispatcher workers exited");
        state.terminated.cancel();
    }
}
