//! Per-task lifecycle: state transitions, sink callbacks and broadcast events

use crate::dispatcher::handle::TaskControl;
use crate::error::Error;
use crate::event::EventSink;
use crate::request::Response;
use crate::types::{Event, LifecycleState, TaskId};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Drives one task through its state machine
///
/// Every method is a no-op when the transition is illegal, which is what
/// keeps callbacks from firing after a terminal state.
pub(crate) struct Lifecycle<T> {
    control: Arc<TaskControl>,
    sink: Option<Arc<dyn EventSink<T>>>,
    event_tx: broadcast::Sender<Event>,
}

impl<T> Lifecycle<T> {
    pub(crate) fn new(
        control: Arc<TaskControl>,
        sink: Option<Arc<dyn EventSink<T>>>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            control,
            sink,
            event_tx,
        }
    }

    fn id(&self) -> TaskId {
        self.control.id
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.control.state()
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    fn advance(&self, next: LifecycleState) -> bool {
        let from = self.state();
        let moved = self.control.advance(next);
        if moved {
            tracing::trace!(task_id = %self.id(), ?from, to = ?next, "Task state changed");
        } else {
            tracing::debug!(
                task_id = %self.id(),
                ?from,
                to = ?next,
                "Ignoring illegal state transition"
            );
        }
        moved
    }

    /// Terminal transitions run the callback and emit the event before the
    /// state changes, so anyone waiting on the state sees both.
    fn finish(&self, terminal: LifecycleState, event: Event, callback: impl FnOnce()) {
        let from = self.state();
        if !from.can_transition_to(terminal) {
            tracing::debug!(task_id = %self.id(), ?from, to = ?terminal, "Task already finished");
            return;
        }
        self.control.begin_terminal();
        callback();
        self.emit(event);
        self.advance(terminal);
    }

    /// Broadcast `event` and force `terminal` without calling the sink
    fn settle(&self, terminal: LifecycleState, event: Event) {
        if self.state().is_terminal() {
            return;
        }
        self.emit(event);
        self.control.force_terminal(terminal);
    }

    pub(crate) fn start(&self) {
        if self.advance(LifecycleState::Started) {
            if let Some(sink) = &self.sink {
                sink.on_start();
            }
            self.emit(Event::Started { id: self.id() });
        }
    }

    pub(crate) fn sending(&self) -> bool {
        self.advance(LifecycleState::Sending)
    }

    pub(crate) fn sent(&self, transferred: u64, total: Option<u64>) {
        if self.state() != LifecycleState::Sending {
            return;
        }
        if let Some(sink) = &self.sink {
            sink.on_send(transferred, total);
        }
        self.emit(Event::Sending {
            id: self.id(),
            transferred,
            total,
        });
    }

    pub(crate) fn receiving(&self) -> bool {
        self.advance(LifecycleState::Receiving)
    }

    pub(crate) fn received(&self, transferred: u64, total: Option<u64>) {
        if self.state() != LifecycleState::Receiving {
            return;
        }
        if let Some(sink) = &self.sink {
            sink.on_receive(transferred, total);
        }
        self.emit(Event::Receiving {
            id: self.id(),
            transferred,
            total,
        });
    }

    pub(crate) fn success(&self, response: Response<T>) {
        let event = Event::Succeeded {
            id: self.id(),
            status: response.code(),
        };
        self.finish(LifecycleState::Success, event, || {
            if let Some(sink) = &self.sink {
                sink.on_success(response);
            }
        });
    }

    pub(crate) fn failure(&self, error: &Error) {
        let event = Event::Failed {
            id: self.id(),
            error: error.to_string(),
        };
        self.finish(LifecycleState::Failure, event, || {
            if let Some(sink) = &self.sink {
                sink.on_failure(error);
            }
        });
    }

    pub(crate) fn cancel(&self) {
        let event = Event::Cancelled { id: self.id() };
        self.finish(LifecycleState::Cancelled, event, || {
            if let Some(sink) = &self.sink {
                sink.on_cancel();
            }
        });
    }

    /// [`cancel`](Self::cancel) for a task that never reached a worker
    ///
    /// The task ends `Cancelled` and the event is broadcast even when the
    /// sink's `on_cancel` panics.
    pub(crate) fn abandon(&self) {
        if catch_unwind(AssertUnwindSafe(|| self.cancel())).is_err() {
            tracing::error!(task_id = %self.id(), "Cancel callback panicked");
            self.settle(LifecycleState::Cancelled, Event::Cancelled { id: self.id() });
        }
    }

    /// Deliver `Failure` after the task's execution unwound
    ///
    /// The sink hears `on_failure` unless a terminal callback had already
    /// been entered; in every case the task ends terminal and `Failed` is
    /// broadcast.
    pub(crate) fn fail_after_panic(&self, error: &Error) {
        if self.state().is_terminal() {
            return;
        }
        let event = Event::Failed {
            id: self.id(),
            error: error.to_string(),
        };
        if !self.control.terminal_begun()
            && catch_unwind(AssertUnwindSafe(|| self.failure(error))).is_err()
        {
            tracing::error!(task_id = %self.id(), "Failure callback panicked");
        }
        self.settle(LifecycleState::Failure, event);
    }
}
