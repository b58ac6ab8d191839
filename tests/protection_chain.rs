//! End-to-end behavior of the protection chain through the public API.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vidgate::admin::GateHandle;
use vidgate::admission::{AdmissionControl, AdmissionController, Priority};
use vidgate::cache::{CacheSettings, MemoryCache, ResponseCache};
use vidgate::config::{GovernorConfig, RetryConfig};
use vidgate::facade::{CacheIntent, CallOptions, ResilientClient, RetryPolicy};
use vidgate::governor::{ResourceGovernor, StaticProbe};
use vidgate::transport::{JobStatus, VideoBackend, VideoJob, VideoJobRequest};
use vidgate::Result;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[tokio::test]
async fn test_burst_over_capacity_two_proceed_third_waits() {
    init_tracing();
    let controller = Arc::new(AdmissionController::new("video", 2));

    // 1. Issue three concurrent acquires against a ceiling of two.
    let mut tasks = Vec::new();
    for _ in 0..3 {
        let ctl = Arc::clone(&controller);
        tasks.push(tokio::spawn(async move {
            ctl.acquire(Priority::Normal, Duration::from_secs(5), Default::default()).await
        }));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    // 2. Exactly two are admitted immediately; the third is queued.
    let stats = controller.stats();
    assert_eq!(stats.active_count, 2);
    assert_eq!(stats.queue_depths.normal, 1);

    // 3. Releasing one slot admits the queued waiter within its timeout.
    let first = tasks.remove(0).await.unwrap().unwrap();
    controller.release(first.id).await.unwrap();

    for task in tasks {
        let token = task.await.unwrap().unwrap();
        controller.release(token.id).await.unwrap();
    }
    assert_eq!(controller.stats().active_count, 0);
}

#[tokio::test]
async fn test_critical_jumps_queue_without_preempting_running_work() {
    let controller = Arc::new(AdmissionController::new("video", 1));
    let held = controller
        .acquire(Priority::Normal, Duration::from_secs(5), Default::default())
        .await
        .unwrap();

    // LOW arrives first, CRITICAL second.
    let ctl = Arc::clone(&controller);
    let low = tokio::spawn(async move {
        ctl.acquire(Priority::Low, Duration::from_secs(5), Default::default()).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let ctl = Arc::clone(&controller);
    let critical = tokio::spawn(async move {
        ctl.acquire(Priority::Critical, Duration::from_secs(5), Default::default()).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The running NORMAL holder is never interrupted; it releases on its own.
    controller.release(held.id).await.unwrap();

    let crit_token = critical.await.unwrap().unwrap();
    assert_eq!(crit_token.priority, Priority::Critical);
    assert_eq!(controller.stats().queue_depths.low, 1);

    controller.release(crit_token.id).await.unwrap();
    let low_token = low.await.unwrap().unwrap();
    controller.release(low_token.id).await.unwrap();
}

/// Backend that records the peak number of concurrent submissions.
struct ConcurrencyProbeBackend {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbeBackend {
    fn new() -> Self {
        Self { current: AtomicUsize::new(0), peak: AtomicUsize::new(0) }
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoBackend for ConcurrencyProbeBackend {
    async fn submit(&self, request: &VideoJobRequest) -> Result<VideoJob> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(VideoJob {
            id: format!("job-{}", request.payload["seed"]),
            status: JobStatus::Succeeded,
            result_url: None,
        })
    }

    async fn status(&self, job_id: &str) -> Result<VideoJob> {
        Ok(VideoJob { id: job_id.into(), status: JobStatus::Succeeded, result_url: None })
    }

    fn name(&self) -> &'static str {
        "concurrency-probe"
    }
}

fn assemble(
    backend: Arc<dyn VideoBackend>,
    max_concurrent: usize,
) -> (ResilientClient, Arc<AdmissionController>, Arc<ResourceGovernor>, Arc<ResponseCache>) {
    let admission = Arc::new(AdmissionController::new("video", max_concurrent));
    let governor = Arc::new(ResourceGovernor::with_probe(
        "video",
        GovernorConfig { max_concurrent, ..GovernorConfig::default() },
        Arc::new(StaticProbe::new(Some(100.0), None)),
    ));
    let cache =
        Arc::new(ResponseCache::new(CacheSettings::default(), Box::new(MemoryCache::new(64))));
    let client = ResilientClient::new(
        backend,
        Arc::clone(&admission) as Arc<dyn AdmissionControl>,
        Arc::clone(&governor),
        Arc::clone(&cache),
        RetryPolicy::new(RetryConfig { max_retries: 2, min_delay_ms: 1, max_delay_ms: 5, jitter: false })
            .unwrap(),
    );
    (client, admission, governor, cache)
}

#[tokio::test]
async fn test_full_chain_bounds_backend_concurrency() {
    init_tracing();
    let backend = Arc::new(ConcurrencyProbeBackend::new());
    let (client, admission, governor, _cache) =
        assemble(Arc::clone(&backend) as Arc<dyn VideoBackend>, 2);
    let client = Arc::new(client);

    let mut tasks = Vec::new();
    for seed in 0..6 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let request = VideoJobRequest {
                operation: "generate".into(),
                payload: serde_json::json!({ "seed": seed }),
            };
            client.generate(request, CallOptions::default()).await
        }));
    }

    for task in tasks {
        let (job, stats) = task.await.unwrap().unwrap();
        assert!(job.id.starts_with("job-"));
        assert_eq!(stats.retries, 0);
    }

    // The backend never saw more in-flight work than the ceiling allows, and
    // every slot was handed back.
    assert!(backend.peak() <= 2, "peak concurrency {} exceeded ceiling", backend.peak());
    assert_eq!(admission.stats().active_count, 0);
    assert_eq!(governor.metrics().active_tasks, 0);
}

#[tokio::test]
async fn test_cached_result_skips_admission_entirely() {
    let backend = Arc::new(ConcurrencyProbeBackend::new());
    let (client, admission, _governor, _cache) =
        assemble(Arc::clone(&backend) as Arc<dyn VideoBackend>, 1);

    let opts = CallOptions {
        cache: Some(CacheIntent {
            primary_input: bytes::Bytes::from_static(b"clip.mp4"),
            params: BTreeMap::from([("style".to_string(), "noir".to_string())]),
        }),
        ..Default::default()
    };
    let request = VideoJobRequest {
        operation: "generate".into(),
        payload: serde_json::json!({ "seed": 1 }),
    };

    let (_, first) = client.generate(request.clone(), opts.clone()).await.unwrap();
    assert!(!first.cache_hit);

    // Saturate the only slot; a cached call must still return immediately.
    let blocker = admission
        .acquire(Priority::Critical, Duration::from_secs(5), Default::default())
        .await
        .unwrap();
    let (job, second) = client.generate(request, opts).await.unwrap();
    assert!(second.cache_hit);
    assert_eq!(job.id, "job-1");
    admission.release(blocker.id).await.unwrap();
}

#[tokio::test]
async fn test_admin_report_covers_all_components() {
    let backend = Arc::new(ConcurrencyProbeBackend::new());
    let (client, admission, governor, cache) =
        assemble(Arc::clone(&backend) as Arc<dyn VideoBackend>, 2);
    let handle = GateHandle::new(
        Arc::clone(&admission) as Arc<dyn AdmissionControl>,
        governor,
        cache,
    );

    let request = VideoJobRequest {
        operation: "generate".into(),
        payload: serde_json::json!({ "seed": 9 }),
    };
    client.generate(request, CallOptions::default()).await.unwrap();

    let report = handle.stats_report().await;
    assert_eq!(report.admission.active_count, 0);
    assert_eq!(report.governor.executed, 1);
    assert!(report.governor.avg_execution_ms.is_some());
    assert!(report.cache.healthy);
    assert_eq!(handle.cleanup(3600).await.unwrap(), 0);
}
