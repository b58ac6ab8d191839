//! Operator-facing surface: combined stats and cleanup.
//!
//! This layer has no wire protocol of its own; admin endpoints out of scope
//! of this crate call into [`GateHandle`] and serialize the result.

use crate::admission::{AdmissionControl, AdmissionStats};
use crate::cache::{CacheStats, ResponseCache};
use crate::governor::{GovernorMetrics, ResourceGovernor};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Single JSON document covering all three components.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub admission: AdmissionStats,
    pub governor: GovernorMetrics,
    pub cache: CacheStats,
}

/// Operator handle over the shared component instances.
///
/// Holds the same `Arc`s the request path uses, so reports reflect live
/// state. Counters reset only with the process, never implicitly.
pub struct GateHandle {
    admission: Arc<dyn AdmissionControl>,
    governor: Arc<ResourceGovernor>,
    cache: Arc<ResponseCache>,
}

impl GateHandle {
    pub fn new(
        admission: Arc<dyn AdmissionControl>,
        governor: Arc<ResourceGovernor>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self { admission, governor, cache }
    }

    pub async fn stats_report(&self) -> StatsReport {
        StatsReport {
            admission: self.admission.stats().await,
            governor: self.governor.metrics(),
            cache: self.cache.stats().await,
        }
    }

    /// Force-release admission tokens held longer than `max_age_seconds`.
    pub async fn cleanup(&self, max_age_seconds: u64) -> Result<u64> {
        self.admission.cleanup_expired(Duration::from_secs(max_age_seconds)).await
    }

    /// Operator-driven cache busting.
    pub async fn invalidate_cache(&self, pattern: &str) -> Result<u64> {
        self.cache.invalidate_pattern(pattern).await
    }

    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.clear_all().await
    }
}
