//! HTTP transport abstraction
//!
//! The dispatcher drives every exchange through a [`Transport`]: it opens an
//! [`Exchange`], pushes the request body into its [`UploadSink`] chunk by
//! chunk, then awaits the response head and reads the body stream. Keeping
//! chunking on the worker side is what lets progress callbacks and
//! cancellation checks run on the worker between chunks.

use crate::error::TransportError;
use crate::request::{HeaderMap, RequestHeaders, RequestOptions, ResponseHead};
use crate::types::Method;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

/// Response body as a stream of chunks
pub type BodyStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Request body chunks as received by the transport
pub type UploadStream = ReceiverStream<std::io::Result<Bytes>>;

/// Future resolving once the response head has arrived
pub type ResponseFuture = BoxFuture<'static, Result<IncomingResponse, TransportError>>;

/// Everything the transport needs to open a connection
#[derive(Clone, Debug)]
pub struct TransportRequest {
    /// HTTP method
    pub method: Method,
    /// Target URL
    pub url: Url,
    /// Headers to send, including derived ones (cookies, user agent, content type)
    pub headers: RequestHeaders,
    /// Transport options with dispatcher defaults applied
    pub options: RequestOptions,
    /// Whether a request body will be written to the upload sink
    pub has_body: bool,
    /// Content-Length to declare; None means chunked transfer
    pub content_length: Option<u64>,
}

/// Response head plus the body stream
pub struct IncomingResponse {
    /// Status line and headers
    pub head: ResponseHead,
    /// Body chunks
    pub body: BodyStream,
}

/// Writer half of a streaming request body
///
/// Dropping the sink ends the body.
#[derive(Debug)]
pub struct UploadSink {
    tx: mpsc::Sender<std::io::Result<Bytes>>,
}

impl UploadSink {
    /// Create a sink and the stream the transport reads the body from
    ///
    /// A small capacity keeps progress close to what the transport actually consumed.
    pub fn channel(capacity: usize) -> (UploadSink, UploadStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (UploadSink { tx }, ReceiverStream::new(rx))
    }

    /// Hand one chunk to the transport, waiting while it is busy
    pub async fn send(&self, chunk: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// An opened exchange
pub struct Exchange {
    /// Request body sink; present when the request has a body
    pub upload: Option<UploadSink>,
    /// Resolves with the response head once the server answered
    pub response: ResponseFuture,
}

/// Capability to perform HTTP exchanges
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection for `request`
    ///
    /// Connect timeouts and redirect handling are the transport's job; read
    /// timeouts and cancellation are enforced by the dispatcher.
    async fn open(&self, request: TransportRequest) -> Result<Exchange, TransportError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ClientKey {
    follow_redirects: bool,
    connect_timeout: Option<Duration>,
}

/// Maximum redirects followed when a task enables redirects
const MAX_REDIRECTS: usize = 10;

/// Production [`Transport`] backed by `reqwest`
///
/// Redirect policy and connect timeout are client-level settings in reqwest,
/// so one client is kept per combination in use.
#[derive(Default)]
pub struct ReqwestTransport {
    clients: Mutex<HashMap<ClientKey, reqwest::Client>>,
}

impl ReqwestTransport {
    /// Create a transport with no clients built yet
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self, key: ClientKey) -> Result<reqwest::Client, TransportError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let policy = if key.follow_redirects {
            reqwest::redirect::Policy::limited(MAX_REDIRECTS)
        } else {
            reqwest::redirect::Policy::none()
        };
        let mut builder = reqwest::Client::builder().redirect(policy);
        if let Some(timeout) = key.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {}", e)))?;

        tracing::debug!(
            follow_redirects = key.follow_redirects,
            connect_timeout_ms = key.connect_timeout.map(|d| d.as_millis() as u64),
            "Built HTTP client"
        );
        clients.insert(key, client.clone());
        Ok(client)
    }
}

/// RFC 7231 IMF-fixdate, as used by `If-Modified-Since`
pub fn http_date(time: &chrono::DateTime<chrono::Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn response_head(response: &reqwest::Response) -> ResponseHead {
    let mut headers = HeaderMap::new();
    for (name, value) in response.headers() {
        headers
            .entry(name.as_str().to_ascii_lowercase())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }

    ResponseHead {
        url: response.url().clone(),
        status: response.status().as_u16(),
        message: response
            .status()
            .canonical_reason()
            .unwrap_or_default()
            .to_string(),
        headers,
        content_length: response.content_length(),
    }
}

struct AbortOnDrop<T>(tokio::task::JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn open(&self, request: TransportRequest) -> Result<Exchange, TransportError> {
        let key = ClientKey {
            follow_redirects: request.options.follow_redirects,
            connect_timeout: request.options.connect_timeout,
        };
        let client = self.client(key)?;

        let mut builder = client.request(request.method.into(), request.url.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(since) = &request.options.if_modified_since
            && !request.headers.contains("if-modified-since")
        {
            builder = builder.header(reqwest::header::IF_MODIFIED_SINCE, http_date(since));
        }
        if !request.options.use_cache && !request.headers.contains("cache-control") {
            builder = builder.header(reqwest::header::CACHE_CONTROL, "no-cache");
        }
        if request.options.allow_user_interaction {
            tracing::trace!(url = %request.url, "User interaction has no effect on this transport");
        }

        let upload = if request.has_body {
            let (sink, stream) = UploadSink::channel(1);
            if let Some(length) = request.content_length {
                builder = builder.header(reqwest::header::CONTENT_LENGTH, length);
            }
            builder = builder.body(reqwest::Body::wrap_stream(stream));
            Some(sink)
        } else {
            None
        };

        let connect_timeout = request.options.connect_timeout;
        let url = request.url;

        // The send future has to make progress while the worker writes the body,
        // so it runs on its own task; dropping the exchange aborts it.
        let handle = tokio::spawn(async move {
            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() && e.is_connect() {
                    TransportError::TimedOut {
                        phase: "connect",
                        millis: connect_timeout.map(|d| d.as_millis()).unwrap_or_default(),
                    }
                } else if e.is_connect() {
                    TransportError::Connect {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }
                } else {
                    TransportError::from(e)
                }
            })?;

            let head = response_head(&response);
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(std::io::Error::other))
                .boxed();
            Ok(IncomingResponse { head, body })
        });

        let mut guard = AbortOnDrop(handle);
        let response: ResponseFuture = Box::pin(async move {
            match (&mut guard.0).await {
                Ok(result) => result,
                Err(e) => Err(TransportError::Request(format!("exchange task failed: {}", e))),
            }
        });

        Ok(Exchange { upload, response })
    }
}
