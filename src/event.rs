//! Per-task event callbacks
//!
//! Callbacks run synchronously on the worker executing the task. Nothing is
//! marshalled to another thread; wrappers that need thread affinity (UI
//! loops, channels) do that themselves.

use crate::error::Error;
use crate::request::Response;

/// Callbacks for the lifecycle of a single request task
///
/// Every method has a no-op default so sinks only implement what they need.
/// After one of `on_success`, `on_failure` or `on_cancel` has been called, no
/// further method is called for that task.
pub trait EventSink<T>: Send + Sync {
    /// A worker picked up the task
    fn on_start(&self) {}

    /// Request body progress; `total` is None for bodies of unknown length
    fn on_send(&self, _transferred: u64, _total: Option<u64>) {}

    /// Response body progress; `total` is None when no content length was announced
    fn on_receive(&self, _transferred: u64, _total: Option<u64>) {}

    /// The response was fully received and parsed
    fn on_success(&self, _response: Response<T>) {}

    /// The exchange failed for a reason other than cancellation
    fn on_failure(&self, _error: &Error) {}

    /// The task was cancelled before or during execution
    fn on_cancel(&self) {}
}

/// Sink that ignores every callback
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl<T> EventSink<T> for NoopSink {}

/// Adapts a closure receiving the final outcome into an [`EventSink`]
///
/// The closure is called exactly once with the terminal outcome.
pub struct OnComplete<F> {
    callback: std::sync::Mutex<Option<F>>,
}

impl<F> OnComplete<F> {
    /// Wrap a completion closure
    pub fn new(callback: F) -> Self {
        Self {
            callback: std::sync::Mutex::new(Some(callback)),
        }
    }

    fn take(&self) -> Option<F> {
        self.callback
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }
}

impl<T, F> EventSink<T> for OnComplete<F>
where
    F: FnOnce(std::result::Result<Response<T>, Outcome>) + Send,
{
    fn on_success(&self, response: Response<T>) {
        if let Some(callback) = self.take() {
            callback(Ok(response));
        }
    }

    fn on_failure(&self, error: &Error) {
        if let Some(callback) = self.take() {
            callback(Err(Outcome::Failed(error.to_string())));
        }
    }

    fn on_cancel(&self) {
        if let Some(callback) = self.take() {
            callback(Err(Outcome::Cancelled));
        }
    }
}

/// Non-success outcome delivered to an [`OnComplete`] closure
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The task failed with the given error message
    Failed(String),
    /// The task was cancelled
    Cancelled,
}
