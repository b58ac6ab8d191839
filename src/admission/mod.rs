//! 准入控制模块：在并发上限下按优先级公平排队。
//!
//! # Admission Control Module
//!
//! This module bounds the number of concurrently in-flight calls to a scarce
//! protected resource, ordering waiters by priority tier and then by arrival
//! time within a tier.
//!
//! ## Overview
//!
//! Admission control decides whether a new unit of work may proceed *before*
//! any resources are committed to it:
//! - Strict priority ordering across tiers for the next free slot
//! - FIFO fairness inside a tier (no reordering)
//! - No preemption of already-active work
//! - Timed-out waiters leave no residue in internal queues
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`AdmissionController`] | In-process limiter (semaphore-style active set plus per-tier queues) |
//! | [`SharedAdmissionController`] | Store-backed limiter coordinating admission across processes |
//! | [`CoordinationStore`] | Trait for the shared backing store (conditional, atomic mutations) |
//! | [`RequestToken`] | One waiter's claim, carrying priority and an opaque metadata bag |
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use vidgate::admission::{AdmissionController, Priority};
//!
//! # async fn demo() -> vidgate::Result<()> {
//! let controller = AdmissionController::new("video", 2);
//! let token = controller
//!     .acquire(Priority::High, Duration::from_secs(5), Default::default())
//!     .await?;
//! // ... perform the protected call ...
//! controller.release(token.id).await?;
//! # Ok(())
//! # }
//! ```

mod controller;
mod store;
mod token;

pub use controller::AdmissionController;
pub use store::{CoordinationStore, MemoryStore, SharedAdmissionController, StoreDepths, WaiterRecord};
pub use token::{Metadata, Priority, RequestToken};

use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Queue depth per priority tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl QueueDepths {
    pub fn total(&self) -> usize {
        self.critical + self.high + self.normal + self.low
    }
}

/// Point-in-time view of a limiter instance.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStats {
    pub max_concurrent: usize,
    pub active_count: usize,
    pub available_slots: usize,
    pub queue_depths: QueueDepths,
}

/// Common contract of the in-process and store-backed controllers.
///
/// Switching backing stores never changes this public contract.
#[async_trait]
pub trait AdmissionControl: Send + Sync {
    async fn acquire(
        &self,
        priority: Priority,
        timeout: Duration,
        metadata: Metadata,
    ) -> Result<RequestToken>;

    async fn release(&self, token_id: Uuid) -> Result<()>;

    /// Force-release active tokens older than `max_age`, returning the count.
    async fn cleanup_expired(&self, max_age: Duration) -> Result<u64>;

    async fn stats(&self) -> AdmissionStats;
}
