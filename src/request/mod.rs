//! Request task descriptors
//!
//! A [`RequestTask`] describes one HTTP exchange: method, URL, headers, an
//! optional body, transport options, the parser that turns the response body
//! into a payload, and the event sink that observes it. Tasks are built with
//! fluent setters and handed to [`Dispatcher::submit`](crate::Dispatcher::submit).

mod body;
mod response;

pub use body::RequestBody;
pub use response::{HeaderMap, Response, ResponseHead};

use crate::error::{Error, Result};
use crate::event::EventSink;
use crate::parser::{Ignore, Parser};
use crate::types::{Method, TaskId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// How the request body is framed on the wire
///
/// Chunked and fixed-length streaming are mutually exclusive; setting one
/// replaces the other.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StreamingMode {
    /// Let the transport decide (Content-Length when the body length is known)
    #[default]
    Default,
    /// Chunked transfer encoding, uploading `chunk_size` bytes at a time
    Chunked {
        /// Upload chunk size in bytes
        chunk_size: usize,
    },
    /// Fixed `Content-Length`; the body must produce exactly `length` bytes
    FixedLength {
        /// Declared content length
        length: u64,
    },
}

/// Transport options of a request task
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Connect timeout (None = dispatcher default)
    pub connect_timeout: Option<Duration>,
    /// Read timeout for the response head and every body chunk (None = dispatcher default)
    pub read_timeout: Option<Duration>,
    /// Follow redirects (default: false)
    pub follow_redirects: bool,
    /// Allow cached responses (default: false)
    pub use_cache: bool,
    /// Send `If-Modified-Since` with this timestamp
    pub if_modified_since: Option<DateTime<Utc>>,
    /// Allow user interaction such as authentication prompts (default: false)
    pub allow_user_interaction: bool,
    /// Request body framing
    pub streaming: StreamingMode,
}

/// Request headers with case-insensitive, last-write-wins semantics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestHeaders(Vec<(String, String)>);

impl RequestHeaders {
    /// Set a header, replacing any value with the same (case-insensitive) name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Value of a header, looked up case-insensitively
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether a header is present
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate headers in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of headers
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no header is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = RequestHeaders::default();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// Parse a URL string for use in a request
pub fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| Error::config("url", format!("invalid URL '{}': {}", url, e)))
}

/// Descriptor of one HTTP exchange
///
/// Immutable once submitted; the only thing that changes afterwards is its
/// cancellation flag (see [`RequestTask::cancel`]) and the lifecycle state
/// tracked by the dispatcher.
pub struct RequestTask<P: Parser> {
    pub(crate) id: TaskId,
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: RequestHeaders,
    pub(crate) body: Option<RequestBody>,
    pub(crate) options: RequestOptions,
    pub(crate) parser: P,
    pub(crate) events: Option<Arc<dyn EventSink<P::Output>>>,
    pub(crate) cancel_token: CancellationToken,
}

impl<P: Parser> RequestTask<P> {
    /// Create a task for any method
    pub fn new(method: Method, url: Url, parser: P) -> Self {
        Self {
            id: TaskId::next(),
            method,
            url,
            headers: RequestHeaders::default(),
            body: None,
            options: RequestOptions::default(),
            parser,
            events: None,
            cancel_token: CancellationToken::new(),
        }
    }

    /// HTTP GET
    pub fn get(url: Url, parser: P) -> Self {
        Self::new(Method::Get, url, parser)
    }

    /// HTTP POST with a body
    pub fn post(url: Url, parser: P, body: RequestBody) -> Self {
        Self::new(Method::Post, url, parser).with_body(body)
    }

    /// HTTP PUT with a body
    pub fn put(url: Url, parser: P, body: RequestBody) -> Self {
        Self::new(Method::Put, url, parser).with_body(body)
    }

    /// HTTP DELETE (add a body with [`with_body`](Self::with_body) if needed)
    pub fn delete(url: Url, parser: P) -> Self {
        Self::new(Method::Delete, url, parser)
    }

    /// Attach a request body
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach the event sink that observes this task
    pub fn events<S>(mut self, sink: S) -> Self
    where
        S: EventSink<P::Output> + 'static,
    {
        self.events = Some(Arc::new(sink));
        self
    }

    /// Attach a shared event sink
    pub fn shared_events(mut self, sink: Arc<dyn EventSink<P::Output>>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Set one header (last write wins)
    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set several headers (last write wins)
    pub fn add_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in headers {
            self.headers.insert(k, v);
        }
        self
    }

    /// Replace all headers
    pub fn set_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers = headers.into_iter().collect();
        self
    }

    /// Allow user interaction with the transport (default: false)
    pub fn allow_user_interaction(mut self, allow: bool) -> Self {
        self.options.allow_user_interaction = allow;
        self
    }

    /// Send `If-Modified-Since`
    pub fn if_modified_since(mut self, since: DateTime<Utc>) -> Self {
        self.options.if_modified_since = Some(since);
        self
    }

    /// Follow redirects (default: false)
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.options.follow_redirects = follow;
        self
    }

    /// Stream the body with chunked transfer encoding
    pub fn stream_chunks(mut self, chunk_size: usize) -> Self {
        self.options.streaming = StreamingMode::Chunked {
            chunk_size: chunk_size.max(1),
        };
        self
    }

    /// Stream the body with a fixed, declared content length
    pub fn stream_fixed_length(mut self, length: u64) -> Self {
        self.options.streaming = StreamingMode::FixedLength { length };
        self
    }

    /// Connect timeout
    pub fn timeout_connect(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = Some(timeout);
        self
    }

    /// Read timeout, applied to the response head and every body chunk
    pub fn timeout_read(mut self, timeout: Duration) -> Self {
        self.options.read_timeout = Some(timeout);
        self
    }

    /// Allow cached responses (default: false)
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.options.use_cache = use_cache;
        self
    }

    /// Set the cancellation flag; it is never reset
    ///
    /// A task cancelled before a worker picks it up never starts.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Whether the cancellation flag is set
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Task ID (assigned on creation)
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// HTTP method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Target URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request headers
    pub fn headers(&self) -> &RequestHeaders {
        &self.headers
    }

    /// Transport options
    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Request body, if any
    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }
}

impl RequestTask<Ignore> {
    /// HTTP HEAD; the response carries no payload
    pub fn head(url: Url) -> Self {
        Self::new(Method::Head, url, Ignore)
    }
}

impl<P: Parser> std::fmt::Debug for RequestTask<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTask")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("options", &self.options)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Text;

    fn url() -> Url {
        parse_url("http://example.com/items").unwrap()
    }

    #[test]
    fn defaults_match_documented_values() {
        let task = RequestTask::get(url(), Text);
        let options = task.options();
        assert!(!options.follow_redirects);
        assert!(!options.use_cache);
        assert!(!options.allow_user_interaction);
        assert!(options.if_modified_since.is_none());
        assert_eq!(options.streaming, StreamingMode::Default);
        assert!(task.body().is_none());
        assert!(!task.is_cancelled());
    }

    #[test]
    fn headers_are_last_write_wins_case_insensitively() {
        let task = RequestTask::get(url(), Text)
            .add_header("Accept", "text/plain")
            .add_headers([("accept", "application/json"), ("X-Trace", "1")]);
        assert_eq!(task.headers().len(), 2);
        assert_eq!(task.headers().get("ACCEPT"), Some("application/json"));

        let task = task.set_headers([("Authorization", "Bearer t")]);
        assert_eq!(task.headers().len(), 1);
        assert!(!task.headers().contains("x-trace"));
    }

    #[test]
    fn streaming_modes_are_mutually_exclusive() {
        let task = RequestTask::post(url(), Text, RequestBody::text("x"))
            .stream_chunks(512)
            .stream_fixed_length(1);
        assert_eq!(
            task.options().streaming,
            StreamingMode::FixedLength { length: 1 }
        );

        let task = task.stream_chunks(0);
        assert_eq!(
            task.options().streaming,
            StreamingMode::Chunked { chunk_size: 1 }
        );
    }

    #[test]
    fn cancellation_flag_is_monotonic() {
        let task = RequestTask::head(url());
        task.cancel();
        task.cancel();
        assert!(task.is_cancelled());
        assert_eq!(task.method(), Method::Head);
    }

    #[test]
    fn invalid_url_is_a_configuration_error() {
        assert!(matches!(
            parse_url("not a url"),
            Err(Error::InvalidConfiguration { key: Some(k), .. }) if k == "url"
        ));
    }

    #[test]
    fn each_task_gets_its_own_id() {
        let a = RequestTask::get(url(), Text);
        let b = RequestTask::get(url(), Text);
        assert_ne!(a.id(), b.id());
    }
}
