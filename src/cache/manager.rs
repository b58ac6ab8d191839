//! Cache manager.

use super::backend::CacheBackend;
use super::key::{CacheKey, CacheKeyGenerator};
use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

/// Cache behavior, read once at construction.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    /// TTL for operations without an entry in `ttl_by_operation`.
    pub default_ttl: Duration,
    /// Per-operation TTL table: long TTLs for immutable-content operations,
    /// short TTLs for parameterized transforms. Policy input, never derived.
    pub ttl_by_operation: HashMap<String, Duration>,
    /// Payloads above this size are not cached.
    pub max_entry_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(3600),
            ttl_by_operation: HashMap::new(),
            max_entry_size: 10 * 1024 * 1024,
        }
    }
}

impl CacheSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_operation_ttl(mut self, operation: impl Into<String>, ttl: Duration) -> Self {
        self.ttl_by_operation.insert(operation.into(), ttl);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Hit/miss counters plus backend occupancy.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub sets: u64,
    pub errors: u64,
    pub entry_count: usize,
    pub size_bytes: u64,
    pub backend: String,
    pub healthy: bool,
}

struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

/// Response cache over a pluggable backend.
///
/// A backend failure degrades to always-miss rather than surfacing to the
/// caller: caching is a pure performance optimization, never a correctness
/// dependency.
pub struct ResponseCache {
    settings: CacheSettings,
    backend: Box<dyn CacheBackend>,
    keygen: CacheKeyGenerator,
    stats: AtomicStats,
}

impl ResponseCache {
    pub fn new(settings: CacheSettings, backend: Box<dyn CacheBackend>) -> Self {
        Self { settings, backend, keygen: CacheKeyGenerator::new(), stats: AtomicStats::new() }
    }

    pub fn with_keygen(mut self, keygen: CacheKeyGenerator) -> Self {
        self.keygen = keygen;
        self
    }

    pub fn key_for(
        &self,
        operation: &str,
        input: &[u8],
        params: &BTreeMap<String, String>,
    ) -> CacheKey {
        self.keygen.generate(operation, input, params)
    }

    /// TTL for an operation class, falling back to the default.
    pub fn ttl_for(&self, operation: &str) -> Duration {
        self.settings.ttl_by_operation.get(operation).copied().unwrap_or(self.settings.default_ttl)
    }

    /// Look up a previously computed result.
    ///
    /// A miss is recorded regardless of reason: absent key, expired key, or
    /// unreachable backend.
    pub async fn get<T: DeserializeOwned>(
        &self,
        operation: &str,
        input: &[u8],
        params: &BTreeMap<String, String>,
    ) -> Option<T> {
        if !self.settings.enabled {
            return None;
        }
        let key = self.key_for(operation, input, params);
        match self.backend.get(&key).await {
            Ok(Some(data)) => match serde_json::from_slice(&data) {
                Ok(value) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    Some(value)
                }
                Err(e) => {
                    // Corrupt entry; count as error and miss, drop it.
                    warn!(key = %key, error = %e, "dropping undecodable cache entry");
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    let _ = self.backend.delete(&key).await;
                    None
                }
            },
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "cache backend unreachable, treating as miss");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a computed result with the operation's configured TTL.
    pub async fn set<T: Serialize>(
        &self,
        operation: &str,
        input: &[u8],
        params: &BTreeMap<String, String>,
        value: &T,
    ) {
        let ttl = self.ttl_for(operation);
        self.set_with_ttl(operation, input, params, value, ttl).await
    }

    /// Store with an explicit TTL. Failures are logged, never raised.
    pub async fn set_with_ttl<T: Serialize>(
        &self,
        operation: &str,
        input: &[u8],
        params: &BTreeMap<String, String>,
        value: &T,
        ttl: Duration,
    ) {
        if !self.settings.enabled {
            return;
        }
        let data = match serde_json::to_vec(value) {
            Ok(d) => d,
            Err(e) => {
                warn!(operation, error = %e, "failed to serialize cache value");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        if data.len() > self.settings.max_entry_size {
            return;
        }
        let key = self.key_for(operation, input, params);
        match self.backend.set(&key, &data, ttl).await {
            Ok(()) => {
                self.stats.sets.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "cache store failed");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Operator-driven cache busting by key pattern (full regex on
    /// `{operation}:{digest}` keys).
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<u64> {
        let regex = regex::Regex::new(pattern)
            .map_err(|e| Error::configuration(format!("invalid cache pattern: {}", e)))?;
        self.backend.invalidate_pattern(&regex).await
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.backend.clear().await
    }

    /// Whether the backing store is reachable.
    pub async fn health_check(&self) -> bool {
        self.backend.ping().await.is_ok()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            sets: self.stats.sets.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
            entry_count: self.backend.len().await.unwrap_or(0),
            size_bytes: self.backend.size_bytes().await.unwrap_or(0),
            backend: self.backend.name().to_string(),
            healthy: self.health_check().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryCache;
    use async_trait::async_trait;
    use regex::Regex;

    fn cache_with(settings: CacheSettings) -> ResponseCache {
        ResponseCache::new(settings, Box::new(MemoryCache::new(100)))
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn test_round_trip() {
        let cache = cache_with(CacheSettings::default());
        let p = params(&[("threshold", "0.5")]);

        assert_eq!(cache.get::<String>("face_detect", b"img", &p).await, None);
        cache.set("face_detect", b"img", &p, &"two faces".to_string()).await;
        assert_eq!(
            cache.get::<String>("face_detect", b"img", &p).await,
            Some("two faces".to_string())
        );

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = cache_with(CacheSettings::default());
        let p = BTreeMap::new();
        cache
            .set_with_ttl("op", b"in", &p, &1u32, Duration::from_millis(20))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get::<u32>("op", b"in", &p).await, None);
    }

    #[tokio::test]
    async fn test_param_sensitivity() {
        let cache = cache_with(CacheSettings::default());
        cache.set("audio_transform", b"pcm", &params(&[("speed", "1.0")]), &"slow".to_string()).await;

        // Different params never return a value stored under other params.
        assert_eq!(
            cache.get::<String>("audio_transform", b"pcm", &params(&[("speed", "1.2")])).await,
            None
        );
    }

    #[tokio::test]
    async fn test_per_operation_ttl_table() {
        let settings = CacheSettings::new()
            .with_default_ttl(Duration::from_secs(60))
            .with_operation_ttl("face_detect", Duration::from_secs(86400));
        let cache = cache_with(settings);
        assert_eq!(cache.ttl_for("face_detect"), Duration::from_secs(86400));
        assert_eq!(cache.ttl_for("audio_transform"), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let cache = cache_with(CacheSettings::new().with_enabled(false));
        let p = BTreeMap::new();
        cache.set("op", b"x", &p, &1u32).await;
        assert_eq!(cache.get::<u32>("op", b"x", &p).await, None);
        assert_eq!(cache.stats().await.sets, 0);
    }

    #[tokio::test]
    async fn test_invalidate_pattern() {
        let cache = cache_with(CacheSettings::default());
        let p = BTreeMap::new();
        cache.set("face_detect", b"a", &p, &1u32).await;
        cache.set("audio_transform", b"a", &p, &2u32).await;

        let removed = cache.invalidate_pattern("^face_detect:").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.get::<u32>("face_detect", b"a", &p).await, None);
        assert_eq!(cache.get::<u32>("audio_transform", b"a", &p).await, Some(2));
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_configuration_error() {
        let cache = cache_with(CacheSettings::default());
        assert!(cache.invalidate_pattern("[unclosed").await.is_err());
    }

    /// Backend that fails every call, to verify degrade-to-miss.
    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _: &CacheKey) -> crate::Result<Option<Vec<u8>>> {
            Err(Error::configuration("backend down"))
        }
        async fn set(&self, _: &CacheKey, _: &[u8], _: Duration) -> crate::Result<()> {
            Err(Error::configuration("backend down"))
        }
        async fn delete(&self, _: &CacheKey) -> crate::Result<bool> {
            Err(Error::configuration("backend down"))
        }
        async fn invalidate_pattern(&self, _: &Regex) -> crate::Result<u64> {
            Err(Error::configuration("backend down"))
        }
        async fn clear(&self) -> crate::Result<()> {
            Err(Error::configuration("backend down"))
        }
        async fn len(&self) -> crate::Result<usize> {
            Err(Error::configuration("backend down"))
        }
        async fn size_bytes(&self) -> crate::Result<u64> {
            Err(Error::configuration("backend down"))
        }
        async fn ping(&self) -> crate::Result<()> {
            Err(Error::configuration("backend down"))
        }
        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_unreachable_backend_degrades_to_miss() {
        let cache = ResponseCache::new(CacheSettings::default(), Box::new(BrokenBackend));
        let p = BTreeMap::new();

        cache.set("op", b"x", &p, &1u32).await;
        assert_eq!(cache.get::<u32>("op", b"x", &p).await, None);

        let stats = cache.stats().await;
        assert!(!stats.healthy);
        assert!(stats.errors >= 2);
        assert_eq!(stats.misses, 1);
    }
}
