//! Shared-store admission for multi-process deployments.
//!
//! The store-backed controller applies the same two-part eligibility rule as
//! the in-process one, implemented by polling the store with a short backoff
//! interval. A waiter is admitted only when the store atomically confirms it
//! is the head of the highest-priority non-empty queue while a slot is free.
//!
//! When the store is unreachable the controller degrades to per-process
//! enforcement through a local [`AdmissionController`]: it never fails open
//! (unbounded concurrency) and never fails closed (deadlock).

use crate::admission::{
    AdmissionControl, AdmissionController, AdmissionStats, Metadata, Priority, QueueDepths,
    RequestToken,
};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

fn unix_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Serializable waiter entry as persisted in the shared store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaiterRecord {
    pub id: Uuid,
    pub priority: Priority,
    pub enqueued_at_ms: u64,
}

/// Depths reported by the backing store.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StoreDepths {
    pub active: usize,
    pub queues: QueueDepths,
}

/// Shared coordination store for cross-process admission.
///
/// All mutations must be atomic with respect to other processes (conditional
/// set semantics); implementations typically map onto a Redis-style store.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Append a waiter to its priority queue.
    async fn enqueue(&self, limiter: &str, waiter: WaiterRecord) -> Result<()>;

    /// Atomically admit `id` iff it is the head of the highest-priority
    /// non-empty queue and fewer than `max_concurrent` claims are active.
    async fn try_admit(&self, limiter: &str, id: Uuid, max_concurrent: usize) -> Result<bool>;

    /// Drop a waiter that gave up. A no-op for unknown ids.
    async fn forget(&self, limiter: &str, id: Uuid) -> Result<()>;

    /// Remove an active claim. Returns false for unknown ids.
    async fn release(&self, limiter: &str, id: Uuid) -> Result<bool>;

    /// Force-release active claims older than `max_age`, returning the count.
    async fn cleanup(&self, limiter: &str, max_age: Duration) -> Result<u64>;

    async fn depths(&self, limiter: &str) -> Result<StoreDepths>;

    fn name(&self) -> &'static str;
}

#[derive(Default)]
struct LimiterRecord {
    queues: [VecDeque<WaiterRecord>; 4],
    active: HashMap<Uuid, u64>,
}

/// In-memory [`CoordinationStore`].
///
/// Single-process only; exists as the reference semantics for external store
/// implementations and for tests.
#[derive(Default)]
pub struct MemoryStore {
    limiters: Mutex<HashMap<String, LimiterRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn enqueue(&self, limiter: &str, waiter: WaiterRecord) -> Result<()> {
        let mut limiters = self.limiters.lock().unwrap();
        let rec = limiters.entry(limiter.to_string()).or_default();
        rec.queues[waiter.priority.index()].push_back(waiter);
        Ok(())
    }

    async fn try_admit(&self, limiter: &str, id: Uuid, max_concurrent: usize) -> Result<bool> {
        let mut limiters = self.limiters.lock().unwrap();
        let rec = limiters.entry(limiter.to_string()).or_default();
        if rec.active.len() >= max_concurrent {
            return Ok(false);
        }
        let Some(queue) = rec.queues.iter_mut().find(|q| !q.is_empty()) else {
            return Ok(false);
        };
        if queue.front().map(|w| w.id != id).unwrap_or(true) {
            return Ok(false);
        }
        if let Some(waiter) = queue.pop_front() {
            rec.active.insert(waiter.id, unix_ms());
        }
        Ok(true)
    }

    async fn forget(&self, limiter: &str, id: Uuid) -> Result<()> {
        let mut limiters = self.limiters.lock().unwrap();
        if let Some(rec) = limiters.get_mut(limiter) {
            for queue in rec.queues.iter_mut() {
                queue.retain(|w| w.id != id);
            }
        }
        Ok(())
    }

    async fn release(&self, limiter: &str, id: Uuid) -> Result<bool> {
        let mut limiters = self.limiters.lock().unwrap();
        Ok(limiters.get_mut(limiter).map(|rec| rec.active.remove(&id).is_some()).unwrap_or(false))
    }

    async fn cleanup(&self, limiter: &str, max_age: Duration) -> Result<u64> {
        let cutoff = unix_ms().saturating_sub(max_age.as_millis() as u64);
        let mut limiters = self.limiters.lock().unwrap();
        let Some(rec) = limiters.get_mut(limiter) else { return Ok(0) };
        let before = rec.active.len();
        rec.active.retain(|_, admitted_ms| *admitted_ms >= cutoff);
        Ok((before - rec.active.len()) as u64)
    }

    async fn depths(&self, limiter: &str) -> Result<StoreDepths> {
        let limiters = self.limiters.lock().unwrap();
        let Some(rec) = limiters.get(limiter) else { return Ok(StoreDepths::default()) };
        Ok(StoreDepths {
            active: rec.active.len(),
            queues: QueueDepths {
                critical: rec.queues[Priority::Critical.index()].len(),
                high: rec.queues[Priority::High.index()].len(),
                normal: rec.queues[Priority::Normal.index()].len(),
                low: rec.queues[Priority::Low.index()].len(),
            },
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Removes a queued waiter from the store when the owning future is dropped
/// before admission. Without it an abandoned wait would sit at the head of
/// its queue forever and block every waiter behind it, since `try_admit`
/// only ever admits queue heads and `cleanup` scans active claims, not
/// queues.
struct QueueGuard {
    store: Arc<dyn CoordinationStore>,
    limiter: String,
    id: Uuid,
    armed: bool,
}

impl QueueGuard {
    fn new(store: Arc<dyn CoordinationStore>, limiter: &str, id: Uuid) -> Self {
        Self { store, limiter: limiter.to_string(), id, armed: true }
    }

    /// The waiter left the queue through a normal path (admission, timeout,
    /// store failure); nothing remains to clean up.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = Arc::clone(&self.store);
        let limiter = std::mem::take(&mut self.limiter);
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = store.forget(&limiter, id).await;
            });
        }
    }
}

/// Store-backed admission controller with in-process fallback.
///
/// Polling interval is an explicit latency/throughput trade-off: shorter
/// intervals admit faster at the cost of store load.
pub struct SharedAdmissionController {
    name: String,
    max_concurrent: usize,
    poll_interval: Duration,
    store: Arc<dyn CoordinationStore>,
    fallback: AdmissionController,
    degraded: AtomicBool,
}

impl SharedAdmissionController {
    pub fn new(
        name: impl Into<String>,
        max_concurrent: usize,
        poll_interval: Duration,
        store: Arc<dyn CoordinationStore>,
    ) -> Self {
        let name = name.into();
        Self {
            fallback: AdmissionController::new(name.clone(), max_concurrent),
            name,
            max_concurrent: max_concurrent.max(1),
            poll_interval,
            store,
            degraded: AtomicBool::new(false),
        }
    }

    /// Whether the last store interaction failed and local-only enforcement
    /// is in effect.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn degrade(&self, err: &Error) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(
                limiter = self.name.as_str(),
                store = self.store.name(),
                error = %err,
                "coordination store unreachable, degrading to in-process admission"
            );
        }
    }

    fn recover(&self) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            debug!(
                limiter = self.name.as_str(),
                store = self.store.name(),
                "coordination store reachable again"
            );
        }
    }
}

#[async_trait]
impl AdmissionControl for SharedAdmissionController {
    async fn acquire(
        &self,
        priority: Priority,
        timeout: Duration,
        metadata: Metadata,
    ) -> Result<RequestToken> {
        let token = RequestToken::new(priority, metadata);
        let deadline = Instant::now() + timeout;

        let record = WaiterRecord { id: token.id, priority, enqueued_at_ms: unix_ms() };
        if let Err(e) = self.store.enqueue(&self.name, record).await {
            self.degrade(&e);
            return self.fallback.acquire(priority, timeout, token.metadata).await;
        }
        // Covers cancellation: dropping this future mid-poll must still
        // remove the queued record.
        let mut guard = QueueGuard::new(Arc::clone(&self.store), &self.name, token.id);

        loop {
            match self.store.try_admit(&self.name, token.id, self.max_concurrent).await {
                Ok(true) => {
                    guard.disarm();
                    self.recover();
                    return Ok(token);
                }
                Ok(false) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        guard.disarm();
                        let _ = self.store.forget(&self.name, token.id).await;
                        return Err(Error::AdmissionTimeout {
                            limiter: self.name.clone(),
                            priority,
                            waited_ms: timeout.as_millis() as u64,
                        });
                    }
                    tokio::time::sleep(self.poll_interval.min(remaining)).await;
                }
                Err(e) => {
                    guard.disarm();
                    let _ = self.store.forget(&self.name, token.id).await;
                    self.degrade(&e);
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    return self.fallback.acquire(priority, remaining, token.metadata).await;
                }
            }
        }
    }

    async fn release(&self, token_id: Uuid) -> Result<()> {
        match self.store.release(&self.name, token_id).await {
            Ok(true) => {
                self.recover();
                Ok(())
            }
            // Not in the store: either it was admitted locally while degraded
            // or this is a genuine double release; the fallback decides.
            Ok(false) => self.fallback.release(token_id).await,
            Err(e) => {
                self.degrade(&e);
                self.fallback.release(token_id).await
            }
        }
    }

    async fn cleanup_expired(&self, max_age: Duration) -> Result<u64> {
        let local = self.fallback.cleanup_expired(max_age).await?;
        match self.store.cleanup(&self.name, max_age).await {
            Ok(shared) => {
                self.recover();
                Ok(local + shared)
            }
            Err(e) => {
                self.degrade(&e);
                Ok(local)
            }
        }
    }

    async fn stats(&self) -> AdmissionStats {
        match self.store.depths(&self.name).await {
            Ok(depths) => AdmissionStats {
                max_concurrent: self.max_concurrent,
                active_count: depths.active,
                available_slots: self.max_concurrent.saturating_sub(depths.active),
                queue_depths: depths.queues,
            },
            Err(e) => {
                self.degrade(&e);
                self.fallback.stats()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Store that fails every call, to exercise the degradation path.
    struct UnreachableStore;

    #[async_trait]
    impl CoordinationStore for UnreachableStore {
        async fn enqueue(&self, _: &str, _: WaiterRecord) -> Result<()> {
            Err(Error::configuration("store down"))
        }
        async fn try_admit(&self, _: &str, _: Uuid, _: usize) -> Result<bool> {
            Err(Error::configuration("store down"))
        }
        async fn forget(&self, _: &str, _: Uuid) -> Result<()> {
            Err(Error::configuration("store down"))
        }
        async fn release(&self, _: &str, _: Uuid) -> Result<bool> {
            Err(Error::configuration("store down"))
        }
        async fn cleanup(&self, _: &str, _: Duration) -> Result<u64> {
            Err(Error::configuration("store down"))
        }
        async fn depths(&self, _: &str) -> Result<StoreDepths> {
            Err(Error::configuration("store down"))
        }
        fn name(&self) -> &'static str {
            "unreachable"
        }
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store
            .enqueue("video", WaiterRecord { id, priority: Priority::Normal, enqueued_at_ms: unix_ms() })
            .await
            .unwrap();

        assert!(store.try_admit("video", id, 1).await.unwrap());
        assert_eq!(store.depths("video").await.unwrap().active, 1);
        assert!(store.release("video", id).await.unwrap());
        assert!(!store.release("video", id).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_respects_priority_and_ceiling() {
        let store = MemoryStore::new();
        let low = Uuid::new_v4();
        let crit = Uuid::new_v4();
        store
            .enqueue("video", WaiterRecord { id: low, priority: Priority::Low, enqueued_at_ms: 1 })
            .await
            .unwrap();
        store
            .enqueue("video", WaiterRecord { id: crit, priority: Priority::Critical, enqueued_at_ms: 2 })
            .await
            .unwrap();

        // LOW is not head of the highest non-empty queue.
        assert!(!store.try_admit("video", low, 2).await.unwrap());
        assert!(store.try_admit("video", crit, 2).await.unwrap());
        assert!(store.try_admit("video", low, 2).await.unwrap());

        // Ceiling reached.
        let third = Uuid::new_v4();
        store
            .enqueue("video", WaiterRecord { id: third, priority: Priority::Critical, enqueued_at_ms: 3 })
            .await
            .unwrap();
        assert!(!store.try_admit("video", third, 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_shared_controller_admits_via_store() {
        let store = Arc::new(MemoryStore::new());
        let ctl = SharedAdmissionController::new("video", 1, Duration::from_millis(5), store);

        let token = ctl
            .acquire(Priority::Normal, Duration::from_millis(200), Metadata::new())
            .await
            .unwrap();
        assert!(!ctl.is_degraded());
        assert_eq!(ctl.stats().await.active_count, 1);

        let err = ctl
            .acquire(Priority::Normal, Duration::from_millis(30), Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AdmissionTimeout { .. }));

        ctl.release(token.id).await.unwrap();
        assert_eq!(ctl.stats().await.active_count, 0);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_leaves_no_queue_residue() {
        let store = Arc::new(MemoryStore::new());
        let ctl = Arc::new(SharedAdmissionController::new(
            "video",
            1,
            Duration::from_millis(5),
            Arc::clone(&store) as Arc<dyn CoordinationStore>,
        ));
        let holder = ctl
            .acquire(Priority::Normal, Duration::from_millis(500), Metadata::new())
            .await
            .unwrap();

        // A second waiter parks at the head of its queue, then its task is
        // aborted mid-poll.
        let ctl2 = Arc::clone(&ctl);
        let waiter = tokio::spawn(async move {
            ctl2.acquire(Priority::Normal, Duration::from_secs(30), Metadata::new()).await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        waiter.abort();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // No record survives the abort, so the queue head cannot wedge.
        assert_eq!(store.depths("video").await.unwrap().queues.total(), 0);

        ctl.release(holder.id).await.unwrap();
        let token = ctl
            .acquire(Priority::Normal, Duration::from_millis(300), Metadata::new())
            .await
            .unwrap();
        ctl.release(token.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_shared_controller_degrades_to_local() {
        let ctl = SharedAdmissionController::new(
            "video",
            1,
            Duration::from_millis(5),
            Arc::new(UnreachableStore),
        );

        // The ceiling is still enforced while degraded.
        let token = ctl
            .acquire(Priority::Normal, Duration::from_millis(100), Metadata::new())
            .await
            .unwrap();
        assert!(ctl.is_degraded());

        let err = ctl
            .acquire(Priority::Normal, Duration::from_millis(30), Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AdmissionTimeout { .. }));

        ctl.release(token.id).await.unwrap();
    }
}
