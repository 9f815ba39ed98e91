//! Core types for http-courier

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a submitted request task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Allocate the next process-unique task id
    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for u64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// The supported HTTP methods
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP HEAD
    Head,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP DELETE
    Delete,
}

impl Method {
    /// Request-line token for this method
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Lifecycle state of a request task
///
/// Transitions are strictly `Idle -> Started -> (Sending)? -> Receiving ->
/// {Success | Failure | Cancelled}`; `Cancelled` is reachable from any
/// non-terminal state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Submitted but not yet picked up by a worker
    #[default]
    Idle,
    /// Picked up by a worker; connection being opened
    Started,
    /// Streaming the request body
    Sending,
    /// Streaming the response body
    Receiving,
    /// Completed with a parsed response
    Success,
    /// Failed with a transport or parse error
    Failure,
    /// Cancelled before or during execution
    Cancelled,
}

impl LifecycleState {
    /// Whether no further transitions can happen from this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Success | LifecycleState::Failure | LifecycleState::Cancelled
        )
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (_, Cancelled) => true,
            (Idle, Started) => true,
            (Started, Sending) | (Started, Receiving) | (Started, Failure) => true,
            (Sending, Receiving) | (Sending, Failure) => true,
            (Receiving, Success) | (Receiving, Failure) => true,
            _ => false,
        }
    }
}

/// Dispatcher-wide event emitted to subscribers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task accepted into the queue
    Queued {
        /// Task ID
        id: TaskId,
        /// Whether the task was inserted at the head of the queue
        skip_queue: bool,
    },

    /// A worker picked up the task
    Started {
        /// Task ID
        id: TaskId,
    },

    /// Request body upload progress
    Sending {
        /// Task ID
        id: TaskId,
        /// Bytes handed to the transport so far
        transferred: u64,
        /// Declared body length (None = unknown / chunked)
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },

    /// Response body download progress
    Receiving {
        /// Task ID
        id: TaskId,
        /// Bytes received so far
        transferred: u64,
        /// Content length announced by the server (None = unknown)
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },

    /// Task completed successfully
    Succeeded {
        /// Task ID
        id: TaskId,
        /// HTTP status code
        status: u16,
    },

    /// Task failed
    Failed {
        /// Task ID
        id: TaskId,
        /// Error message
        error: String,
    },

    /// Task cancelled
    Cancelled {
        /// Task ID
        id: TaskId,
    },

    /// Cookies from a response were accepted into the store
    CookiesStored {
        /// Task ID
        id: TaskId,
        /// Number of cookies accepted
        count: usize,
    },

    /// A worker left its loop
    WorkerExited {
        /// Worker index
        worker: usize,
    },

    /// The dispatcher stopped accepting submissions
    Stopped,

    /// Hard cancellation of all pending and running tasks was requested
    CancelRequested,
}
