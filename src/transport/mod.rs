//! HTTP boundary to the video-generation API.
//!
//! The remote service is specified only at this boundary: an authenticated
//! POST submits a generation job and returns JSON with `id`/`status`/
//! `result_url`; a polling GET reads asynchronous job status. The service
//! may answer 429 under rate limiting and 5xx on transient server errors.

mod http;

pub use http::{HttpVideoApi, JobStatus, TransportError, VideoBackend, VideoJob, VideoJobRequest};
