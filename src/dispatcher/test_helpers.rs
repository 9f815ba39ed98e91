//! Shared test helpers: a scripted in-memory transport, a recording event
//! sink and dispatcher constructors.

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::dispatcher::handle::TaskControl;
use crate::dispatcher::job::Job;
use crate::dispatcher::queue::QueuedJob;
use crate::dispatcher::worker::WorkerContext;
use crate::error::{Error, TransportError};
use crate::event::EventSink;
use crate::request::{HeaderMap, Response, ResponseHead};
use crate::transport::{
    BodyStream, Exchange, IncomingResponse, Transport, TransportRequest, UploadSink,
};
use crate::types::{Event, TaskId};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{FutureExt, StreamExt, stream};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Queue entry whose job does nothing
pub(crate) fn noop_job(id: TaskId) -> QueuedJob {
    struct NoopJob;

    #[async_trait]
    impl Job for NoopJob {
        async fn run(self: Box<Self>, _ctx: &WorkerContext) {}
        fn abandon(self: Box<Self>, _event_tx: &broadcast::Sender<Event>) {}
    }

    QueuedJob {
        control: Arc::new(TaskControl::new(id, CancellationToken::new())),
        job: Box::new(NoopJob),
    }
}

/// Canned response of the scripted transport
#[derive(Clone, Debug)]
pub(crate) struct Reply {
    pub(crate) status: u16,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
    /// Size of the chunks the body stream yields
    pub(crate) chunk: usize,
    /// Whether Content-Length is announced
    pub(crate) announce_length: bool,
    /// Delay before the response head arrives
    pub(crate) head_delay: Duration,
    /// Response head never arrives
    pub(crate) stall_head: bool,
    /// Body stream never yields after the head
    pub(crate) stall_body: bool,
    /// URL reported in the response head instead of the request URL
    pub(crate) url: Option<Url>,
    /// Connection attempt fails
    pub(crate) fail_connect: bool,
}

impl Reply {
    pub(crate) fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
            chunk: 1024,
            announce_length: true,
            head_delay: Duration::ZERO,
            stall_head: false,
            stall_body: false,
            url: None,
            fail_connect: false,
        }
    }

    pub(crate) fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub(crate) fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub(crate) fn chunked(mut self, chunk: usize) -> Self {
        self.chunk = chunk;
        self
    }

    pub(crate) fn unknown_length(mut self) -> Self {
        self.announce_length = false;
        self
    }

    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.head_delay = delay;
        self
    }

    pub(crate) fn stalled_head(mut self) -> Self {
        self.stall_head = true;
        self
    }

    pub(crate) fn stalled_body(mut self) -> Self {
        self.stall_body = true;
        self
    }

    pub(crate) fn at_url(mut self, url: &str) -> Self {
        self.url = Some(Url::parse(url).unwrap());
        self
    }

    pub(crate) fn connect_failure() -> Self {
        let mut reply = Self::ok(Vec::new());
        reply.fail_connect = true;
        reply
    }
}

/// A request as seen by the scripted transport
#[derive(Clone, Debug)]
pub(crate) struct RecordedRequest {
    pub(crate) request: TransportRequest,
    pub(crate) uploaded: Arc<Mutex<Vec<u8>>>,
}

impl RecordedRequest {
    pub(crate) fn uploaded(&self) -> Vec<u8> {
        self.uploaded.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct Counters {
    active: AtomicUsize,
    max_active: AtomicUsize,
    opened: AtomicUsize,
}

/// Decrements the active count when an exchange is finished or dropped
struct Active(Arc<Counters>);

impl Active {
    fn enter(counters: Arc<Counters>) -> Self {
        let now = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_active.fetch_max(now, Ordering::SeqCst);
        Active(counters)
    }
}

impl Drop for Active {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory [`Transport`] answering by URL path
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<String, Reply>>,
    fallback: Reply,
    requests: Mutex<Vec<RecordedRequest>>,
    counters: Arc<Counters>,
}

impl ScriptedTransport {
    /// Transport answering every path with `fallback`
    pub(crate) fn new(fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            fallback,
            requests: Mutex::new(Vec::new()),
            counters: Arc::new(Counters::default()),
        })
    }

    pub(crate) fn route(&self, path: &str, reply: Reply) {
        self.routes.lock().unwrap().insert(path.to_string(), reply);
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn request_paths(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|r| r.request.url.path().to_string())
            .collect()
    }

    /// Highest number of exchanges that were open at the same time
    pub(crate) fn max_concurrency(&self) -> usize {
        self.counters.max_active.load(Ordering::SeqCst)
    }

    pub(crate) fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub(crate) fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, request: TransportRequest) -> Result<Exchange, TransportError> {
        let reply = self
            .routes
            .lock()
            .unwrap()
            .get(request.url.path())
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());

        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        let uploaded = Arc::new(Mutex::new(Vec::new()));
        self.requests.lock().unwrap().push(RecordedRequest {
            request: request.clone(),
            uploaded: uploaded.clone(),
        });

        if reply.fail_connect {
            return Err(TransportError::Connect {
                url: request.url.to_string(),
                reason: "connection refused".into(),
            });
        }

        let active = Active::enter(self.counters.clone());

        let (upload, upload_done) = if request.has_body {
            let (sink, mut body) = UploadSink::channel(1);
            let reader = tokio::spawn(async move {
                while let Some(Ok(chunk)) = body.next().await {
                    uploaded.lock().unwrap().extend_from_slice(&chunk);
                }
            });
            (Some(sink), Some(reader))
        } else {
            (None, None)
        };

        let url = reply.url.clone().unwrap_or_else(|| request.url.clone());
        let response = async move {
            if let Some(reader) = upload_done {
                reader.await.ok();
            }
            if reply.stall_head {
                futures::future::pending::<()>().await;
            }
            tokio::time::sleep(reply.head_delay).await;

            let mut headers = HeaderMap::new();
            for (name, value) in &reply.headers {
                headers.entry(name.clone()).or_default().push(value.clone());
            }
            let head = ResponseHead {
                url,
                status: reply.status,
                message: "Scripted".into(),
                headers,
                content_length: reply.announce_length.then_some(reply.body.len() as u64),
            };

            let chunks: BodyStream = if reply.stall_body {
                stream::pending().boxed()
            } else {
                let chunks: Vec<std::io::Result<Bytes>> = reply
                    .body
                    .chunks(reply.chunk.max(1))
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect();
                stream::iter(chunks).boxed()
            };
            let body = chunks
                .map(move |chunk| {
                    let _active = &active;
                    chunk
                })
                .boxed();

            Ok::<_, TransportError>(IncomingResponse { head, body })
        }
        .boxed();

        Ok(Exchange { upload, response })
    }
}

/// Callback recorded by [`RecordingSink`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    Start,
    Send(u64, Option<u64>),
    Receive(u64, Option<u64>),
    Success(u16),
    Failure,
    Cancel,
}

/// Event sink recording every callback in order
#[derive(Default)]
pub(crate) struct RecordingSink {
    calls: Mutex<Vec<Call>>,
    errors: Mutex<Vec<String>>,
    cancellation_errors: AtomicUsize,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    /// Failure callbacks that carried a cancellation error
    pub(crate) fn cancellation_errors(&self) -> usize {
        self.cancellation_errors.load(Ordering::SeqCst)
    }

    pub(crate) fn terminal(&self) -> Option<Call> {
        self.calls()
            .into_iter()
            .rev()
            .find(|c| matches!(c, Call::Success(_) | Call::Failure | Call::Cancel))
    }

    pub(crate) fn sent(&self) -> Vec<(u64, Option<u64>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send(t, total) => Some((t, total)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn received(&self) -> Vec<(u64, Option<u64>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Receive(t, total) => Some((t, total)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl<T> EventSink<T> for RecordingSink {
    fn on_start(&self) {
        self.push(Call::Start);
    }

    fn on_send(&self, transferred: u64, total: Option<u64>) {
        self.push(Call::Send(transferred, total));
    }

    fn on_receive(&self, transferred: u64, total: Option<u64>) {
        self.push(Call::Receive(transferred, total));
    }

    fn on_success(&self, response: Response<T>) {
        self.push(Call::Success(response.code()));
    }

    fn on_failure(&self, error: &Error) {
        if error.is_cancellation() {
            self.cancellation_errors.fetch_add(1, Ordering::SeqCst);
        }
        self.errors.lock().unwrap().push(error.to_string());
        self.push(Call::Failure);
    }

    fn on_cancel(&self) {
        self.push(Call::Cancel);
    }
}

/// Dispatcher with `connections` workers backed by `transport`
pub(crate) fn scripted_dispatcher(
    connections: usize,
    transport: &Arc<ScriptedTransport>,
) -> Dispatcher {
    let transport: Arc<dyn Transport> = transport.clone();
    Dispatcher::with_transport(Config::with_connections(connections), transport).unwrap()
}

/// Wait until `condition` holds, polling every few milliseconds
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}
