//! Task control block shared between the queue, the worker and the caller.

use crate::types::{LifecycleState, TaskId};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Cancellation flag and lifecycle state of one submitted task
pub(crate) struct TaskControl {
    pub(crate) id: TaskId,
    pub(crate) cancel_token: CancellationToken,
    state: watch::Sender<LifecycleState>,
    terminal_begun: AtomicBool,
}

impl TaskControl {
    pub(crate) fn new(id: TaskId, cancel_token: CancellationToken) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            id,
            cancel_token,
            state,
            terminal_begun: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Move to `next` if that is a legal transition; returns whether it moved
    pub(crate) fn advance(&self, next: LifecycleState) -> bool {
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Force a terminal state without checking the transition table
    ///
    /// Only used when a task's execution unwound without reaching one.
    pub(crate) fn force_terminal(&self, terminal: LifecycleState) {
        debug_assert!(terminal.is_terminal());
        self.state.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = terminal;
                true
            }
        });
    }

    /// Record that a terminal callback is about to run
    pub(crate) fn begin_terminal(&self) {
        self.terminal_begun.store(true, Ordering::SeqCst);
    }

    /// Whether a terminal callback was entered, even if it never returned
    pub(crate) fn terminal_begun(&self) -> bool {
        self.terminal_begun.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }
}

/// Handle to a submitted task
///
/// Cheap to clone. Dropping it has no effect on the task.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) control: std::sync::Arc<TaskControl>,
}

impl TaskHandle {
    /// Task ID
    pub fn id(&self) -> TaskId {
        self.control.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.control.state()
    }

    /// Set the task's cancellation flag
    ///
    /// A pending task will reach `Cancelled` instead of starting; a running
    /// task is interrupted at its next suspension point.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Whether the cancellation flag is set
    pub fn is_cancelled(&self) -> bool {
        self.control.cancel_token.is_cancelled()
    }

    /// Wait for the task to reach a terminal state and return it
    pub async fn finished(&self) -> LifecycleState {
        let mut rx = self.control.subscribe();
        match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Receiver that observes every state change of this task
    pub fn watch(&self) -> watch::Receiver<LifecycleState> {
        self.control.subscribe()
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
