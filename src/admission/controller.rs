//! In-process admission controller.

use crate::admission::token::{Metadata, Priority, RequestToken};
use crate::admission::{AdmissionControl, AdmissionStats, QueueDepths};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

struct Waiter {
    token: RequestToken,
    tx: oneshot::Sender<RequestToken>,
}

struct ActiveEntry {
    priority: Priority,
    admitted_at: Instant,
}

struct State {
    /// One FIFO queue per tier, index 0 = critical.
    queues: [VecDeque<Waiter>; 4],
    active: HashMap<Uuid, ActiveEntry>,
}

impl State {
    /// Pop the head of the highest-priority non-empty queue.
    fn pop_next(&mut self) -> Option<Waiter> {
        self.queues.iter_mut().find_map(VecDeque::pop_front)
    }
}

/// Bounds the number of concurrently in-flight calls to a protected resource.
///
/// A waiter becomes active only when the active set has a free slot *and* it
/// is the head of the highest-priority non-empty queue. This gives strict
/// priority ordering across tiers with FIFO fairness inside a tier, and is
/// re-evaluated from the highest tier down on every release. Already-active
/// work is never preempted.
///
/// The shared mutex is never held across an await point; waiters park on a
/// oneshot channel instead.
pub struct AdmissionController {
    name: String,
    max_concurrent: usize,
    state: Mutex<State>,
}

impl AdmissionController {
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            name: name.into(),
            max_concurrent: max_concurrent.max(1),
            state: Mutex::new(State {
                queues: std::array::from_fn(|_| VecDeque::new()),
                active: HashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue and wait for a slot, up to `timeout`.
    ///
    /// A timeout is a normal, expected outcome under load, not a bug. On
    /// timeout the waiter is fully removed from its queue; no side effects on
    /// the active set remain.
    pub async fn acquire(
        &self,
        priority: Priority,
        timeout: Duration,
        metadata: Metadata,
    ) -> Result<RequestToken> {
        let token = RequestToken::new(priority, metadata);
        let start = Instant::now();
        let token_id = token.id;

        let rx = {
            let mut st = self.state.lock().unwrap();
            let (tx, rx) = oneshot::channel();
            st.queues[priority.index()].push_back(Waiter { token, tx });
            self.promote_locked(&mut st);
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(token)) => {
                debug!(
                    limiter = self.name.as_str(),
                    token = %token.id,
                    priority = %token.priority,
                    waited_ms = start.elapsed().as_millis() as u64,
                    "admission granted"
                );
                Ok(token)
            }
            // Sender dropped without sending: the waiter was discarded while
            // queued, which only happens on promotion races. Treat as timeout.
            Ok(Err(_)) | Err(_) => {
                self.abandon(priority, token_id);
                Err(Error::AdmissionTimeout {
                    limiter: self.name.clone(),
                    priority,
                    waited_ms: start.elapsed().as_millis() as u64,
                })
            }
        }
    }

    /// Remove a timed-out waiter, covering the race where promotion landed
    /// after the deadline fired but before we re-took the lock.
    fn abandon(&self, priority: Priority, token_id: Uuid) {
        let mut st = self.state.lock().unwrap();
        let queue = &mut st.queues[priority.index()];
        if let Some(pos) = queue.iter().position(|w| w.token.id == token_id) {
            queue.remove(pos);
        } else if st.active.remove(&token_id).is_some() {
            // Promoted concurrently; the slot is ours to hand back.
            self.promote_locked(&mut st);
        }
    }

    /// Return a slot to the pool, promoting the next eligible waiter.
    ///
    /// A second release of an already-released id is reported as
    /// [`Error::DoubleRelease`] and leaves the active count untouched.
    pub async fn release(&self, token_id: Uuid) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        match st.active.remove(&token_id) {
            Some(entry) => {
                debug!(
                    limiter = self.name.as_str(),
                    token = %token_id,
                    held_ms = entry.admitted_at.elapsed().as_millis() as u64,
                    "admission released"
                );
                self.promote_locked(&mut st);
                Ok(())
            }
            None => {
                warn!(
                    limiter = self.name.as_str(),
                    token = %token_id,
                    "release of unknown token"
                );
                Err(Error::DoubleRelease { limiter: self.name.clone(), id: token_id })
            }
        }
    }

    /// Force-release active tokens older than `max_age`.
    ///
    /// Self-healing against callers that crashed or forgot to release.
    /// Returns the number of slots reclaimed.
    pub async fn cleanup_expired(&self, max_age: Duration) -> Result<u64> {
        let mut st = self.state.lock().unwrap();
        let expired: Vec<Uuid> = st
            .active
            .iter()
            .filter(|(_, e)| e.admitted_at.elapsed() > max_age)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            let entry = st.active.remove(id);
            warn!(
                limiter = self.name.as_str(),
                token = %id,
                held_ms = entry.map(|e| e.admitted_at.elapsed().as_millis() as u64),
                "force-releasing expired admission token"
            );
        }
        if !expired.is_empty() {
            self.promote_locked(&mut st);
        }
        Ok(expired.len() as u64)
    }

    pub fn stats(&self) -> AdmissionStats {
        let st = self.state.lock().unwrap();
        AdmissionStats {
            max_concurrent: self.max_concurrent,
            active_count: st.active.len(),
            available_slots: self.max_concurrent.saturating_sub(st.active.len()),
            queue_depths: QueueDepths {
                critical: st.queues[Priority::Critical.index()].len(),
                high: st.queues[Priority::High.index()].len(),
                normal: st.queues[Priority::Normal.index()].len(),
                low: st.queues[Priority::Low.index()].len(),
            },
        }
    }

    /// Drain eligible waiters into the active set. Caller holds the lock.
    fn promote_locked(&self, st: &mut State) {
        while st.active.len() < self.max_concurrent {
            let Some(Waiter { token, tx }) = st.pop_next() else { break };
            let id = token.id;
            st.active
                .insert(id, ActiveEntry { priority: token.priority, admitted_at: Instant::now() });
            if tx.send(token).is_err() {
                // Waiter gave up between enqueue and promotion; reclaim the
                // slot and keep draining.
                st.active.remove(&id);
            }
        }
    }
}

#[async_trait]
impl AdmissionControl for AdmissionController {
    async fn acquire(
        &self,
        priority: Priority,
        timeout: Duration,
        metadata: Metadata,
    ) -> Result<RequestToken> {
        AdmissionController::acquire(self, priority, timeout, metadata).await
    }

    async fn release(&self, token_id: Uuid) -> Result<()> {
        AdmissionController::release(self, token_id).await
    }

    async fn cleanup_expired(&self, max_age: Duration) -> Result<u64> {
        AdmissionController::cleanup_expired(self, max_age).await
    }

    async fn stats(&self) -> AdmissionStats {
        AdmissionController::stats(self)
    }
}
