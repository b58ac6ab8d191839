//! Resilient client composing admission, governance, caching and retry.

use crate::admission::{AdmissionControl, Metadata, Priority};
use crate::cache::ResponseCache;
use crate::facade::retry::{Decision, RetryPolicy};
use crate::governor::ResourceGovernor;
use crate::transport::{VideoBackend, VideoJob, VideoJobRequest};
use crate::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Phases of a single protected call, for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallPhase {
    CacheChecked,
    Admitted,
    ResourceGranted,
    InFlight,
    Retrying,
}

impl CallPhase {
    fn as_str(self) -> &'static str {
        match self {
            CallPhase::CacheChecked => "cache_checked",
            CallPhase::Admitted => "admitted",
            CallPhase::ResourceGranted => "resource_granted",
            CallPhase::InFlight => "in_flight",
            CallPhase::Retrying => "retrying",
        }
    }
}

/// Caching instructions for one call.
///
/// The key covers the primary input's content hash plus every parameter that
/// affects the output; calls without an intent are never cached.
#[derive(Debug, Clone)]
pub struct CacheIntent {
    pub primary_input: bytes::Bytes,
    pub params: BTreeMap<String, String>,
}

/// Per-call options.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub priority: Priority,
    pub admission_timeout: Duration,
    pub resource_timeout: Duration,
    pub metadata: Metadata,
    pub cache: Option<CacheIntent>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            admission_timeout: Duration::from_secs(30),
            resource_timeout: Duration::from_secs(60),
            metadata: Metadata::new(),
            cache: None,
        }
    }
}

/// Outcome statistics for one call.
#[derive(Debug, Clone, Serialize)]
pub struct CallStats {
    pub operation: String,
    pub cache_hit: bool,
    pub retries: u32,
    pub admission_wait_ms: u64,
    pub duration_ms: u64,
}

/// Releases the admission slot if the call future is dropped mid-flight, so
/// cancellation never leaks a slot until expiry cleanup.
struct AdmissionGuard {
    admission: Arc<dyn AdmissionControl>,
    token_id: Uuid,
    armed: bool,
}

impl AdmissionGuard {
    fn new(admission: Arc<dyn AdmissionControl>, token_id: Uuid) -> Self {
        Self { admission, token_id, armed: true }
    }

    async fn release(mut self) {
        self.armed = false;
        if let Err(e) = self.admission.release(self.token_id).await {
            warn!(token = %self.token_id, error = %e, "admission release failed");
        }
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let admission = Arc::clone(&self.admission);
        let token_id = self.token_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = admission.release(token_id).await;
            });
        }
    }
}

/// Facade over one externally rate-limited, occasionally failing remote call.
///
/// Per call: cache lookup → admission acquire → resource acquire → remote
/// call with bounded retry → release resource, then admission (LIFO) →
/// cache store. Releases run on every exit path, including cancellation.
pub struct ResilientClient {
    backend: Arc<dyn VideoBackend>,
    admission: Arc<dyn AdmissionControl>,
    governor: Arc<ResourceGovernor>,
    cache: Arc<ResponseCache>,
    retry: RetryPolicy,
}

impl ResilientClient {
    pub fn new(
        backend: Arc<dyn VideoBackend>,
        admission: Arc<dyn AdmissionControl>,
        governor: Arc<ResourceGovernor>,
        cache: Arc<ResponseCache>,
        retry: RetryPolicy,
    ) -> Self {
        Self { backend, admission, governor, cache, retry }
    }

    /// Submit a generation request through the full protection chain.
    pub async fn generate(
        &self,
        request: VideoJobRequest,
        opts: CallOptions,
    ) -> Result<(VideoJob, CallStats)> {
        let start = Instant::now();
        let operation = request.operation.clone();

        self.trace_phase(&operation, CallPhase::CacheChecked);
        if let Some(intent) = &opts.cache {
            if let Some(job) = self
                .cache
                .get::<VideoJob>(&operation, &intent.primary_input, &intent.params)
                .await
            {
                return Ok((
                    job,
                    CallStats {
                        operation,
                        cache_hit: true,
                        retries: 0,
                        admission_wait_ms: 0,
                        duration_ms: start.elapsed().as_millis() as u64,
                    },
                ));
            }
        }

        // Admission timeout propagates unchanged: "try again later".
        let token = self
            .admission
            .acquire(opts.priority, opts.admission_timeout, opts.metadata.clone())
            .await?;
        let admission_wait_ms = start.elapsed().as_millis() as u64;
        self.trace_phase(&operation, CallPhase::Admitted);
        let guard = AdmissionGuard::new(Arc::clone(&self.admission), token.id);

        // Resource exhaustion hands the admission slot back before surfacing.
        let lease = match self.governor.acquire(opts.resource_timeout).await {
            Ok(lease) => lease,
            Err(e) => {
                guard.release().await;
                return Err(e);
            }
        };
        self.trace_phase(&operation, CallPhase::ResourceGranted);

        let (outcome, retries) = self.submit_with_retry(&request).await;
        self.governor.record_outcome(outcome.is_ok());

        // LIFO of acquisition: resource lease first, admission token second.
        drop(lease);
        guard.release().await;

        let job = outcome?;
        if let Some(intent) = &opts.cache {
            self.cache.set(&operation, &intent.primary_input, &intent.params, &job).await;
        }

        Ok((
            job,
            CallStats {
                operation,
                cache_hit: false,
                retries,
                admission_wait_ms,
                duration_ms: start.elapsed().as_millis() as u64,
            },
        ))
    }

    /// Poll asynchronous job status.
    ///
    /// Cheap read, governed by the retry discipline but not by admission.
    pub async fn poll_status(&self, job_id: &str) -> Result<VideoJob> {
        let mut attempt = 0u32;
        loop {
            match self.backend.status(job_id).await {
                Ok(job) => return Ok(job),
                Err(e) => match self.retry.decide(&e, attempt) {
                    Decision::Retry { delay } => {
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                    }
                    Decision::Fail => return Err(e),
                },
            }
        }
    }

    async fn submit_with_retry(&self, request: &VideoJobRequest) -> (Result<VideoJob>, u32) {
        let mut retries = 0u32;
        self.trace_phase(&request.operation, CallPhase::InFlight);
        loop {
            match self.backend.submit(request).await {
                Ok(job) => return (Ok(job), retries),
                Err(e) => match self.retry.decide(&e, retries) {
                    Decision::Retry { delay } => {
                        retries += 1;
                        self.trace_phase(&request.operation, CallPhase::Retrying);
                        debug!(
                            operation = request.operation.as_str(),
                            attempt = retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying transient upstream failure"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Decision::Fail => return (Err(e), retries),
                },
            }
        }
    }

    fn trace_phase(&self, operation: &str, phase: CallPhase) {
        debug!(operation, phase = phase.as_str(), backend = self.backend.name(), "call phase");
    }
}
