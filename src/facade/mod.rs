//! 弹性客户端门面：缓存、准入、资源租约与重试的组合。
//!
//! # Resilient Client Facade
//!
//! Composes the admission controller, resource governor and response cache
//! around calls to the protected remote API.
//!
//! ## Protocol per call
//!
//! 1. Cache lookup; return immediately on hit.
//! 2. Admission acquire with the caller's priority; timeout propagates
//!    unchanged.
//! 3. Resource governor acquire; on exhaustion the admission token is handed
//!    back before the error surfaces.
//! 4. Remote call with bounded, jittered exponential retry. Only transient
//!    classes retry; a 429 surfaces as a distinct rate-limit error instead.
//! 5. Release resource lease, then admission token (LIFO of acquisition),
//!    on every exit path including cancellation.
//! 6. On success, populate the cache when the call carried a cache intent.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResilientClient`] | The facade itself |
//! | [`CallOptions`] / [`CacheIntent`] | Per-call priority, timeouts, caching |
//! | [`CallStats`] | Retry count, cache hit, admission wait, duration |
//! | [`RetryPolicy`] | Bounded exponential backoff with jitter |

mod client;
mod retry;

pub use client::{CacheIntent, CallOptions, CallStats, ResilientClient};
pub use retry::RetryPolicy;
