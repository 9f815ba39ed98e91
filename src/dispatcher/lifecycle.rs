//! Stop, cancel and termination.

use crate::types::Event;

use super::Dispatcher;

impl Dispatcher {
    /// Stop accepting submissions and cancel tasks that have not started
    ///
    /// Tasks already executing run to their natural end. Pending tasks reach
    /// `Cancelled` without ever starting. Idle workers exit; busy workers exit
    /// after their current task. Calling it again has no effect.
    pub fn stop(&self) {
        let Some(drained) = self.queue_state.queue.close() else {
            return;
        };

        let abandoned = drained.len();
        for pending in drained {
            pending.control.cancel();
            pending.job.abandon(&self.event_tx);
        }

        tracing::info!(
            abandoned,
            in_flight = self.in_flight_count(),
            "Dispatcher stopped; running requests will finish"
        );
        self.emit_event(Event::Stopped);
    }

    /// Stop the dispatcher and abort every running task
    ///
    /// Performs [`stop`](Self::stop), then sets the cancellation flag of every
    /// in-flight task and unblocks its worker, so those tasks reach
    /// `Cancelled` rather than `Success` or `Failure`.
    pub fn cancel(&self) {
        self.stop();
        self.emit_event(Event::CancelRequested);

        let tasks = self.queue_state.queue.snapshot_all();
        for control in &tasks {
            control.cancel();
        }

        // Anything that slipped in before the close is drained here too.
        for pending in self.queue_state.queue.drain_pending() {
            pending.control.cancel();
            pending.job.abandon(&self.event_tx);
        }

        self.queue_state.shutdown.cancel();
        tracing::info!(cancelled = tasks.len(), "Dispatcher cancelled");
    }

    /// Whether submissions are being rejected
    pub fn is_closed(&self) -> bool {
        self.queue_state.queue.is_closed()
    }

    /// Whether every worker has left its loop
    pub fn is_terminated(&self) -> bool {
        self.queue_state.terminated.is_cancelled()
    }

    /// Wait until every worker has left its loop
    ///
    /// Never resolves unless [`stop`](Self::stop) or [`cancel`](Self::cancel)
    /// is called.
    pub async fn wait_terminated(&self) {
        self.queue_state.terminated.cancelled().await;
    }
}
