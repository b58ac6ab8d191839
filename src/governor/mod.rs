//! 资源治理模块：基于实时内存/CPU 压力的第二道并发闸门。
//!
//! # Resource Governor Module
//!
//! A second, orthogonal concurrency ceiling per operation class, gated by
//! live host resource pressure and instrumented with execution telemetry.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResourceGovernor`] | Semaphore-bounded limiter with pressure checks |
//! | [`ResourceLease`] | Scoped lease, released exactly once on drop |
//! | [`ResourceProbe`] | Trait for host memory/CPU sampling |
//! | [`ProcProbe`] | `/proc`-backed probe (Linux) |
//! | [`StaticProbe`] | Fixed-value probe for tests |
//! | [`GovernorMetrics`] | Counters plus rolling latency over a bounded window |
//!
//! Memory over the configured ceiling rejects acquisition immediately (fail
//! fast, no slot taken). CPU over threshold is logged but non-fatal.

mod limiter;
mod metrics;
mod probe;

pub use limiter::{ResourceGovernor, ResourceLease};
pub use metrics::GovernorMetrics;
pub use probe::{ProcProbe, ResourceProbe, StaticProbe};
