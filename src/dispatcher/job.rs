//! Type-erased unit of work held by the queue

use super::exchange::{self, Lifecycle};
use super::handle::TaskControl;
use super::worker::WorkerContext;
use crate::error::Error;
use crate::parser::Parser;
use crate::request::RequestTask;
use crate::types::Event;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A queued task, independent of its parser's output type
#[async_trait]
pub(crate) trait Job: Send {
    /// Execute the task on a worker; never unwinds
    async fn run(self: Box<Self>, ctx: &WorkerContext);

    /// Deliver `Cancelled` to a task that will never reach a worker; never
    /// unwinds
    fn abandon(self: Box<Self>, event_tx: &broadcast::Sender<Event>);
}

pub(crate) struct TaskJob<P: Parser> {
    pub(crate) task: RequestTask<P>,
    pub(crate) control: Arc<TaskControl>,
}

#[async_trait]
impl<P: Parser> Job for TaskJob<P> {
    async fn run(self: Box<Self>, ctx: &WorkerContext) {
        let TaskJob { task, control } = *self;
        let sink = task.events.clone();
        let execution = exchange::run_exchange(task, control.clone(), ctx);

        if let Err(payload) = AssertUnwindSafe(execution).catch_unwind().await {
            let error = Error::Panicked(panic_message(payload.as_ref()));
            tracing::error!(
                worker = ctx.worker,
                task_id = %control.id,
                error = %error,
                "Task panicked; marking it failed"
            );
            Lifecycle::new(control, sink, ctx.dispatcher.event_tx.clone())
                .fail_after_panic(&error);
        }
    }

    fn abandon(self: Box<Self>, event_tx: &broadcast::Sender<Event>) {
        let TaskJob { task, control } = *self;
        tracing::debug!(task_id = %control.id, "Abandoning pending task");
        Lifecycle::new(control, task.events, event_tx.clone()).abandon();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
