//! One HTTP exchange from start to terminal state

use super::state::Lifecycle;
use super::stream::{ProgressReporter, StreamError, with_read_timeout};
use crate::config::Config;
use crate::dispatcher::cookies::{self, CookieSettings};
use crate::dispatcher::handle::TaskControl;
use crate::dispatcher::worker::WorkerContext;
use crate::error::{Error, Result, TransportError};
use crate::parser::Parser;
use crate::request::{
    RequestBody, RequestHeaders, RequestOptions, RequestTask, Response, StreamingMode,
};
use crate::transport::{IncomingResponse, TransportRequest};
use crate::types::{Event, Method, TaskId};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Execute `task` on the calling worker and drive it to a terminal state
pub(crate) async fn run_exchange<P: Parser>(
    task: RequestTask<P>,
    control: Arc<TaskControl>,
    ctx: &WorkerContext,
) {
    let RequestTask {
        id,
        method,
        url,
        headers,
        body,
        options,
        parser,
        events,
        cancel_token,
    } = task;
    let lifecycle = Lifecycle::new(control, events, ctx.dispatcher.event_tx.clone());

    if cancel_token.is_cancelled() {
        tracing::debug!(task_id = %id, "Task cancelled before it started");
        lifecycle.cancel();
        return;
    }

    lifecycle.start();
    tracing::debug!(task_id = %id, worker = ctx.worker, %method, url = %url, "Starting request");

    let cookie_settings = ctx.dispatcher.cookie_settings();
    let request = prepare_request(
        method,
        url,
        headers,
        options,
        body.as_ref(),
        &ctx.dispatcher.config,
        &cookie_settings,
    );

    let attempt = Attempt {
        id,
        cancel: &cancel_token,
        lifecycle: &lifecycle,
        ctx,
    };

    match attempt.perform(request, body, &parser).await {
        Ok(_) if cancel_token.is_cancelled() => {
            tracing::debug!(task_id = %id, "Response arrived after cancellation; discarding");
            lifecycle.cancel();
        }
        Ok(response) => {
            let stored = cookies::store_response_cookies(&cookie_settings, id, &response);
            if stored > 0 {
                ctx.dispatcher
                    .event_tx
                    .send(Event::CookiesStored { id, count: stored })
                    .ok();
            }
            tracing::debug!(task_id = %id, status = response.code(), "Request completed");
            lifecycle.success(response);
        }
        Err(Error::Cancelled) => {
            tracing::debug!(task_id = %id, "Request cancelled");
            lifecycle.cancel();
        }
        Err(e) if cancel_token.is_cancelled() => {
            tracing::debug!(task_id = %id, error = %e, "Request failed after cancellation");
            lifecycle.cancel();
        }
        Err(e) => {
            tracing::warn!(task_id = %id, error = %e, "Request failed");
            lifecycle.failure(&e);
        }
    }
}

/// Apply dispatcher defaults and derived headers to a task's request
pub(crate) fn prepare_request(
    method: Method,
    url: Url,
    mut headers: RequestHeaders,
    mut options: RequestOptions,
    body: Option<&RequestBody>,
    config: &Config,
    cookie_settings: &CookieSettings,
) -> TransportRequest {
    options.connect_timeout = options.connect_timeout.or(config.default_connect_timeout);
    options.read_timeout = options.read_timeout.or(config.default_read_timeout);

    if let Some(agent) = &config.user_agent
        && !headers.contains("user-agent")
    {
        headers.insert("User-Agent", agent.as_str());
    }
    if let Some(content_type) = body.and_then(RequestBody::content_type)
        && !headers.contains("content-type")
    {
        headers.insert("Content-Type", content_type);
    }
    if !headers.contains("cookie")
        && let Some(cookie) = cookies::request_cookie_header(cookie_settings, &url)
    {
        headers.insert("Cookie", cookie);
    }

    let content_length = match options.streaming {
        StreamingMode::FixedLength { length } => Some(length),
        StreamingMode::Chunked { .. } => None,
        StreamingMode::Default => body.and_then(RequestBody::length),
    };

    TransportRequest {
        method,
        url,
        headers,
        has_body: body.is_some(),
        content_length,
        options,
    }
}

struct Attempt<'a, T> {
    id: TaskId,
    cancel: &'a CancellationToken,
    lifecycle: &'a Lifecycle<T>,
    ctx: &'a WorkerContext,
}

impl<T> Attempt<'_, T> {
    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn perform<P>(
        &self,
        request: TransportRequest,
        body: Option<RequestBody>,
        parser: &P,
    ) -> Result<Response<T>>
    where
        P: Parser<Output = T>,
    {
        let read_timeout = request.options.read_timeout;
        let declared = match request.options.streaming {
            StreamingMode::FixedLength { length } => Some(length),
            _ => None,
        };
        let upload_chunk = match request.options.streaming {
            StreamingMode::Chunked { chunk_size } => chunk_size,
            _ => self.ctx.dispatcher.config.chunk_size,
        };
        let upload_total = request.content_length;

        let mut exchange = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            opened = self.ctx.dispatcher.transport.open(request) => opened?,
        };

        if let Some(body) = body {
            self.lifecycle.sending();
            let sink = exchange.upload.take().ok_or(TransportError::Closed)?;
            let mut source = body.into_reader();
            let mut reporter = ProgressReporter::new(self.cancel, upload_chunk, None, upload_total);
            let sent = reporter
                .upload(&mut source, &sink, |t, total| self.lifecycle.sent(t, total))
                .await;
            // Dropping the sink ends the request body.
            drop(sink);
            match sent {
                Ok(actual) => {
                    if let Some(declared) = declared
                        && actual != declared
                    {
                        return Err(TransportError::BodyLength { declared, actual }.into());
                    }
                }
                Err(StreamError::Transport(TransportError::Closed)) => {
                    tracing::debug!(
                        task_id = %self.id,
                        sent = reporter.transferred(),
                        "Transport stopped reading the request body early"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.check_cancelled()?;
        self.lifecycle.receiving();

        let IncomingResponse { head, mut body } = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            incoming = with_read_timeout(read_timeout, exchange.response) => incoming?,
        };
        tracing::trace!(
            task_id = %self.id,
            status = head.status,
            length = ?head.content_length,
            "Response head received"
        );

        let mut reporter = ProgressReporter::new(
            self.cancel,
            self.ctx.dispatcher.config.chunk_size,
            read_timeout,
            head.content_length,
        );
        let bytes = reporter
            .download(&mut body, |t, total| self.lifecycle.received(t, total))
            .await?;

        self.check_cancelled()?;
        let payload = parser.parse(&head.url, bytes)?;
        Ok(Response::new(head, payload))
    }
}
