//! # http-courier
//!
//! Client-side concurrent HTTP dispatcher.
//!
//! ## Design Philosophy
//!
//! http-courier is designed to be:
//! - **Bounded** - A fixed number of workers, each running one exchange at a time
//! - **Observable** - Per-task callbacks with chunked progress, plus a dispatcher-wide event stream
//! - **Cancellable** - Any task can be cancelled while queued or mid-transfer
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use http_courier::{Dispatcher, RequestTask, Text, parse_url};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = Dispatcher::new(4)?;
//!
//!     // Subscribe to events
//!     let mut events = dispatcher.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let task = RequestTask::get(parse_url("https://example.com/")?, Text);
//!     let handle = dispatcher.submit(task, false)?;
//!     println!("finished as {:?}", handle.finished().await);
//!
//!     dispatcher.stop();
//!     dispatcher.wait_terminated().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Cookies, cookie stores and acceptance policies
pub mod cookie;
/// Core dispatcher implementation (decomposed into focused submodules)
pub mod dispatcher;
/// Error types
pub mod error;
/// Per-task event callbacks
pub mod event;
/// Response body parsers
pub mod parser;
/// Request task descriptors and responses
pub mod request;
/// HTTP transport abstraction and the reqwest-backed implementation
pub mod transport;
/// Core types (task IDs, methods, lifecycle states, events)
pub mod types;

pub use config::Config;
pub use cookie::{
    AcceptAll, AcceptNone, AcceptOriginalServer, Cookie, CookiePolicy, CookieStore,
    InMemoryCookieStore,
};
pub use dispatcher::{Dispatcher, TaskHandle};
pub use error::{Error, ParseError, Result, TransportError};
pub use event::{EventSink, NoopSink, OnComplete, Outcome};
pub use parser::{FnParser, Ignore, Json, Parser, Raw, Text};
pub use request::{
    HeaderMap, RequestBody, RequestHeaders, RequestOptions, RequestTask, Response, ResponseHead,
    StreamingMode, parse_url,
};
pub use transport::{ReqwestTransport, Transport};
pub use types::{Event, LifecycleState, Method, TaskId};

/// Cancel a dispatcher when the process receives a termination signal
///
/// Waits for SIGTERM or SIGINT (Ctrl+C on non-unix platforms), then calls
/// [`Dispatcher::cancel`] and waits until every worker has exited.
///
/// # Example
///
/// ```no_run
/// use http_courier::{Dispatcher, cancel_on_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let dispatcher = Dispatcher::new(4)?;
///     tokio::spawn(cancel_on_signal(dispatcher.clone()));
///     // ... submit work ...
///     Ok(())
/// }
/// ```
pub async fn cancel_on_signal(dispatcher: Dispatcher) {
    wait_for_signal().await;
    tracing::info!("Cancelling dispatcher after termination signal");
    dispatcher.cancel();
    dispatcher.wait_terminated().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGTERM handler, waiting for SIGINT only"
            );
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGINT handler, waiting for SIGTERM only"
            );
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(
                error = %e,
                "Could not register any signal handlers, using ctrl_c fallback"
            );
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
