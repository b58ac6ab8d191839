//! Request tokens and priority tiers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

/// Opaque caller-supplied context attached to a request.
///
/// Never interpreted by the limiter's own logic.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Ordered priority tiers. Higher tiers always win the next free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// All tiers from highest to lowest, the order queues are drained in.
    pub const DESCENDING: [Priority; 4] =
        [Priority::Critical, Priority::High, Priority::Normal, Priority::Low];

    /// Queue index, 0 = highest priority.
    pub(crate) fn index(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// One waiter's claim on the admission controller.
///
/// Created on `acquire`, lives in the queued set until promoted to active,
/// destroyed on `release` or expiry cleanup.
#[derive(Debug, Clone)]
pub struct RequestToken {
    pub id: Uuid,
    pub priority: Priority,
    /// Monotonic timestamp used for FIFO ordering within a tier.
    pub enqueued_at: Instant,
    pub metadata: Metadata,
}

impl RequestToken {
    pub(crate) fn new(priority: Priority, metadata: Metadata) -> Self {
        Self { id: Uuid::new_v4(), priority, enqueued_at: Instant::now(), metadata }
    }
}
