//! # vidgate
//!
//! Admission control, resource governance and response caching for slow,
//! externally rate-limited video-generation APIs.
//!
//! ## Overview
//!
//! A video-generation backend is a scarce resource: calls take tens of
//! seconds, the provider enforces its own rate limits, and recomputing
//! deterministic sub-results (detections, audio transforms) is pure waste.
//! This crate puts a composable protection layer in front of such a backend:
//!
//! - **Admission control**: a global concurrency ceiling with strict priority
//!   ordering across tiers and FIFO fairness inside a tier.
//! - **Resource governance**: a second, orthogonal ceiling gated by live
//!   memory/CPU pressure, with execution telemetry.
//! - **Response caching**: content-addressed keys with per-operation TTLs, so
//!   caching is a pure performance optimization, never a correctness
//!   dependency.
//! - **Resilient execution**: bounded retry with jittered exponential backoff
//!   around the remote call, with a precise error taxonomy.
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`admission`] | Priority-aware concurrency limiter with fair queueing |
//! | [`governor`] | Resource-pressure-gated concurrency ceiling |
//! | [`cache`] | Content-addressed response cache with pluggable backends |
//! | [`facade`] | Resilient client composing the three around a remote call |
//! | [`transport`] | HTTP boundary to the video-generation API |
//! | [`config`] | Construction-time configuration (env-overridable) |
//! | [`admin`] | Combined stats snapshot and cleanup entry points |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vidgate::admission::{AdmissionController, Priority};
//!
//! #[tokio::main]
//! async fn main() -> vidgate::Result<()> {
//!     let controller = Arc::new(AdmissionController::new("video", 2));
//!
//!     let token = controller
//!         .acquire(Priority::Normal, Duration::from_secs(5), Default::default())
//!         .await?;
//!     // ... call the protected resource ...
//!     controller.release(token.id).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Shared instances
//!
//! All callers in a process must share one admission ceiling and one cache.
//! Construct the components once at process start and pass them by `Arc`
//! through the call graph; every test constructs its own instances instead of
//! relying on ambient globals.

pub mod admin;
pub mod admission;
pub mod cache;
pub mod config;
pub mod facade;
pub mod governor;
pub mod transport;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::Error;

// Re-export main types for convenience
pub use admission::{AdmissionController, Priority, RequestToken};
pub use cache::{CacheKey, ResponseCache};
pub use config::GateConfig;
pub use facade::{CallOptions, CallStats, ResilientClient};
pub use governor::ResourceGovernor;
