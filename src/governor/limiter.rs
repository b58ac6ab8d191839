//! Resource-gated concurrency limiter.

use crate::config::GovernorConfig;
use crate::governor::metrics::{GovernorMetrics, MetricsInner};
use crate::governor::probe::{ProcProbe, ResourceProbe};
use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// One in-flight protected operation.
///
/// Dropping the lease returns the slot and records the execution time, so a
/// lease is released exactly once regardless of how the guarded block
/// terminates (success, error, cancellation).
pub struct ResourceLease {
    pub started_at: Instant,
    pub limiter_name: String,
    _permit: OwnedSemaphorePermit,
    metrics: Arc<MetricsInner>,
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        self.metrics.record_execution(self.started_at.elapsed());
    }
}

impl std::fmt::Debug for ResourceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLease")
            .field("limiter_name", &self.limiter_name)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

/// Second, orthogonal concurrency ceiling per operation class, additionally
/// gated by live host resource pressure.
///
/// Memory over `max_memory_mb` fails acquisition fast, before any slot is
/// taken: queueing against a ceiling the host cannot satisfy only converts
/// overload into latency. CPU over `max_cpu_percent` is logged but does not
/// block; CPU spikes are transient and self-correcting, whereas memory
/// exhaustion risks the process.
pub struct ResourceGovernor {
    name: String,
    cfg: GovernorConfig,
    semaphore: Arc<Semaphore>,
    probe: Arc<dyn ResourceProbe>,
    metrics: Arc<MetricsInner>,
}

impl ResourceGovernor {
    pub fn new(name: impl Into<String>, cfg: GovernorConfig) -> Self {
        Self::with_probe(name, cfg, Arc::new(ProcProbe::new()))
    }

    pub fn with_probe(
        name: impl Into<String>,
        cfg: GovernorConfig,
        probe: Arc<dyn ResourceProbe>,
    ) -> Self {
        let max_concurrent = cfg.max_concurrent.max(1);
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            metrics: Arc::new(MetricsInner::new(cfg.execution_window)),
            cfg: GovernorConfig { max_concurrent, ..cfg },
            probe,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire a scoped lease, waiting up to `timeout` for a free slot.
    pub async fn acquire(&self, timeout: Duration) -> Result<ResourceLease> {
        self.check_pressure()?;

        let permit = tokio::time::timeout(timeout, Arc::clone(&self.semaphore).acquire_owned())
            .await
            .map_err(|_| {
                self.metrics.timed_out.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Error::OperationTimeout {
                    governor: self.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }
            })?
            .map_err(|_| Error::configuration("governor semaphore closed"))?;

        debug!(
            governor = self.name.as_str(),
            available = self.semaphore.available_permits(),
            "resource lease granted"
        );

        Ok(ResourceLease {
            started_at: Instant::now(),
            limiter_name: self.name.clone(),
            _permit: permit,
            metrics: Arc::clone(&self.metrics),
        })
    }

    /// Acquire a lease and run `operation` with a bounded execution time.
    ///
    /// A timeout surfaces as [`Error::OperationTimeout`], distinct from a
    /// generic failure, and bumps its own counter.
    pub async fn execute_with_timeout<F, T>(&self, operation: F, timeout: Duration) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let lease = self.acquire(self.cfg.default_timeout()).await?;

        let outcome = tokio::time::timeout(timeout, operation).await;
        drop(lease);

        match outcome {
            Ok(Ok(value)) => {
                self.metrics.executed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.metrics.failed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Err(e)
            }
            Err(_) => {
                self.metrics.timed_out.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Err(Error::OperationTimeout {
                    governor: self.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Poll for a free slot without claiming one.
    ///
    /// Lets callers pre-flight before doing expensive setup. Returns false if
    /// no slot became available within `timeout`.
    pub async fn wait_for_availability(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.semaphore.available_permits() > 0 && self.check_pressure().is_ok() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            tokio::time::sleep(remaining.min(Duration::from_millis(10))).await;
        }
    }

    /// Count one guarded-call outcome against this governor. Used by callers
    /// that drive the remote call themselves instead of going through
    /// [`ResourceGovernor::execute_with_timeout`].
    pub fn record_outcome(&self, success: bool) {
        let counter = if success { &self.metrics.executed } else { &self.metrics.failed };
        counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn metrics(&self) -> GovernorMetrics {
        self.metrics.snapshot(
            &self.name,
            self.cfg.max_concurrent,
            self.semaphore.available_permits(),
        )
    }

    /// Sample host pressure. Memory over the ceiling is a hard failure; CPU
    /// over threshold is warn-only.
    fn check_pressure(&self) -> Result<()> {
        if let Some(current_mb) = self.probe.memory_mb() {
            if current_mb > self.cfg.max_memory_mb as f64 {
                warn!(
                    governor = self.name.as_str(),
                    current_mb,
                    max_mb = self.cfg.max_memory_mb,
                    "memory ceiling breached, rejecting acquisition"
                );
                return Err(Error::ResourceExhausted {
                    governor: self.name.clone(),
                    current_mb,
                    max_mb: self.cfg.max_memory_mb,
                });
            }
        }
        if let Some(cpu) = self.probe.cpu_percent() {
            if cpu > self.cfg.max_cpu_percent {
                warn!(
                    governor = self.name.as_str(),
                    cpu_percent = cpu,
                    max_cpu_percent = self.cfg.max_cpu_percent,
                    "cpu over threshold, proceeding anyway"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::probe::StaticProbe;

    fn test_config(max_concurrent: usize) -> GovernorConfig {
        GovernorConfig {
            max_concurrent,
            max_memory_mb: 1024,
            max_cpu_percent: 85.0,
            default_timeout_ms: 1000,
            execution_window: 16,
        }
    }

    fn quiet_probe() -> Arc<StaticProbe> {
        Arc::new(StaticProbe::new(Some(100.0), Some(10.0)))
    }

    #[tokio::test]
    async fn test_lease_ceiling() {
        let gov = ResourceGovernor::with_probe("video", test_config(2), quiet_probe());
        let a = gov.acquire(Duration::from_millis(50)).await.unwrap();
        let _b = gov.acquire(Duration::from_millis(50)).await.unwrap();
        assert_eq!(gov.metrics().active_tasks, 2);

        let err = gov.acquire(Duration::from_millis(30)).await.unwrap_err();
        assert!(matches!(err, Error::OperationTimeout { .. }));

        drop(a);
        let _c = gov.acquire(Duration::from_millis(100)).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_pressure_fails_fast_without_taking_slot() {
        let probe = Arc::new(StaticProbe::new(Some(2048.0), None));
        let gov = ResourceGovernor::with_probe("video", test_config(2), probe.clone());

        let err = gov.acquire(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted { .. }));
        assert_eq!(gov.metrics().active_tasks, 0);

        // Pressure subsides, acquisition works again.
        probe.set_memory_mb(Some(100.0));
        let lease = gov.acquire(Duration::from_millis(50)).await.unwrap();
        assert_eq!(lease.limiter_name, "video");
        assert!(format!("{lease:?}").contains("video"));
    }

    #[tokio::test]
    async fn test_record_outcome_counts_externally_driven_calls() {
        let gov = ResourceGovernor::with_probe("video", test_config(1), quiet_probe());
        gov.record_outcome(true);
        gov.record_outcome(true);
        gov.record_outcome(false);

        let metrics = gov.metrics();
        assert_eq!(metrics.executed, 2);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.timed_out, 0);
    }

    #[tokio::test]
    async fn test_cpu_pressure_is_non_fatal() {
        let probe = Arc::new(StaticProbe::new(Some(100.0), Some(99.0)));
        let gov = ResourceGovernor::with_probe("video", test_config(1), probe);
        assert!(gov.acquire(Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_execute_with_timeout_counts_outcomes() {
        let gov = ResourceGovernor::with_probe("video", test_config(2), quiet_probe());

        let ok: Result<u32> = gov
            .execute_with_timeout(async { Ok(7) }, Duration::from_millis(100))
            .await;
        assert_eq!(ok.unwrap(), 7);

        let failed: Result<u32> = gov
            .execute_with_timeout(
                async { Err(Error::configuration("boom")) },
                Duration::from_millis(100),
            )
            .await;
        assert!(failed.is_err());

        let timed: Result<u32> = gov
            .execute_with_timeout(
                async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(1)
                },
                Duration::from_millis(20),
            )
            .await;
        assert!(matches!(timed.unwrap_err(), Error::OperationTimeout { .. }));

        let metrics = gov.metrics();
        assert_eq!(metrics.executed, 1);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.timed_out, 1);
        assert_eq!(metrics.active_tasks, 0);
        assert!(metrics.avg_execution_ms.is_some());
    }

    #[tokio::test]
    async fn test_wait_for_availability() {
        let gov = Arc::new(ResourceGovernor::with_probe("video", test_config(1), quiet_probe()));
        assert!(gov.wait_for_availability(Duration::from_millis(10)).await);

        let lease = gov.acquire(Duration::from_millis(50)).await.unwrap();
        assert!(!gov.wait_for_availability(Duration::from_millis(30)).await);

        let gov2 = Arc::clone(&gov);
        let waiter =
            tokio::spawn(async move { gov2.wait_for_availability(Duration::from_secs(2)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(lease);
        assert!(waiter.await.unwrap());
    }
}
