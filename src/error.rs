use crate::transport::TransportError;
use thiserror::Error;

/// Unified error type for the admission/caching layer.
///
/// The taxonomy is deliberately flat: callers at the outer boundary need to
/// tell congestion-by-admission (`AdmissionTimeout`) apart from
/// congestion-by-memory (`ResourceExhausted`), and an upstream 429
/// (`RateLimited`) apart from a retried-out 5xx (`UpstreamServer`).
#[derive(Debug, Error)]
pub enum Error {
    /// The waiter did not reach the active set before its deadline.
    ///
    /// Expected under load; recoverable by caller retry at a higher level.
    #[error("admission timeout after {waited_ms}ms (priority {priority}, limiter {limiter})")]
    AdmissionTimeout {
        limiter: String,
        priority: crate::admission::Priority,
        waited_ms: u64,
    },

    /// The process memory ceiling was breached; no slot was taken.
    #[error("resource exhausted: {current_mb:.1}MB resident exceeds {max_mb}MB limit (governor {governor})")]
    ResourceExhausted {
        governor: String,
        current_mb: f64,
        max_mb: u64,
    },

    /// The guarded operation exceeded its allotted time.
    #[error("operation timed out after {timeout_ms}ms (governor {governor})")]
    OperationTimeout { governor: String, timeout_ms: u64 },

    /// Upstream signaled HTTP 429. Never retried internally.
    #[error("rate limited by upstream{}", retry_after_ms.map(|ms| format!(" (retry after {}ms)", ms)).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },

    /// 5xx from upstream after exhausting bounded retries.
    #[error("upstream server error: HTTP {status}: {message}")]
    UpstreamServer { status: u16, message: String },

    /// Non-retryable 4xx (other than 429). Surfaced immediately.
    #[error("upstream client error: HTTP {status}: {message}")]
    UpstreamClient { status: u16, message: String },

    /// A token or lease was released more than once.
    ///
    /// Reported loudly because it indicates a caller bug, but the shared
    /// counters stay intact.
    #[error("double release of token {id} on {limiter}")]
    DoubleRelease { limiter: String, id: uuid::Uuid },

    #[error("network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration { message: msg.into() }
    }

    /// Whether this error class is safe to retry locally.
    ///
    /// Only transient transport failures and upstream 5xx qualify; a 429 is
    /// explicitly non-retryable here because admission already governs
    /// concurrency and an internal retry would double up backoff policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::UpstreamServer { .. } => true,
            Error::Transport(t) => t.is_transient(),
            _ => false,
        }
    }

    /// Whether this is a congestion signal the caller should back off from
    /// rather than treat as a failure.
    pub fn is_congestion(&self) -> bool {
        matches!(
            self,
            Error::AdmissionTimeout { .. } | Error::ResourceExhausted { .. } | Error::RateLimited { .. }
        )
    }
}
