//! 响应缓存模块：内容寻址键与按操作类别的 TTL 策略。
//!
//! # Response Caching Module
//!
//! Avoids recomputation for operations that are pure functions of
//! (operation identity, input content, parameters): face detections on an
//! immutable image, parameterized audio transforms, and similar expensive,
//! deterministic sub-results.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResponseCache`] | High-level cache with TTL table and hit/miss statistics |
//! | [`CacheSettings`] | Configuration for cache behavior and limits |
//! | [`CacheBackend`] | Trait for implementing custom cache backends |
//! | [`MemoryCache`] | In-memory backend with TTL expiry and LRA eviction |
//! | [`NullCache`] | No-op backend for disabling caching |
//! | [`CacheKey`] | Content-addressed key: operation + SHA-256(input) + params |
//!
//! ## Degradation
//!
//! An unreachable backend reads as a miss and never raises to the caller;
//! caching is a performance optimization, not a correctness dependency.

mod backend;
mod key;
mod manager;

pub use backend::{CacheBackend, MemoryCache, NullCache};
pub use key::{CacheKey, CacheKeyGenerator};
pub use manager::{CacheSettings, CacheStats, ResponseCache};
