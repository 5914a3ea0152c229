//! Per-policy evaluation slots.
//!
//! At most one evaluation pipeline runs per policy at a time. Distinct
//! policies never contend. The slot is released on every exit path,
//! including a panic inside the pipeline.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use crate::config::{GuardConfig, GuardMode};
use crate::error::{EngineError, Result};
use crate::types::{PolicyId, TriggeringEventId};

#[derive(Default)]
struct Slot {
    /// Key of the evaluation currently holding the slot.
    holder: Mutex<Option<TriggeringEventId>>,
    released: Condvar,
}

pub struct EvaluationGuard {
    /// One slot per policy with an evaluation running or waiting. Idle slots
    /// are pruned.
    slots: DashMap<PolicyId, Arc<Slot>>,
    mode: GuardMode,
    lock_wait: Duration,
}

/// Held for the duration of one pipeline run; frees the slot on drop.
struct SlotLease<'g> {
    guard: &'g EvaluationGuard,
    policy_id: PolicyId,
    slot: Arc<Slot>,
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        let mut holder = self.slot.holder.lock().unwrap_or_else(PoisonError::into_inner);
        *holder = None;
        self.slot.released.notify_all();
        drop(holder);
        // The map and this lease hold the only references.
        self.guard.prune(self.policy_id, 2);
    }
}

impl EvaluationGuard {
    pub fn new(config: &GuardConfig) -> Self {
        EvaluationGuard {
            slots: DashMap::new(),
            mode: config.mode,
            lock_wait: config.lock_wait(),
        }
    }

    /// Run `pipeline` while holding the slot for `policy_id`.
    ///
    /// In `Wait` mode a busy slot is awaited for at most the configured lock
    /// wait; the pipeline then runs and is expected to replay the recorded
    /// result if `key` was already evaluated. In `Strict` mode a busy slot is
    /// rejected at once. Either way a caller that cannot get the slot receives
    /// `AlreadyInProgress`.
    pub fn evaluate_once<T>(
        &self,
        policy_id: PolicyId,
        key: &TriggeringEventId,
        pipeline: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let _lease = self.acquire(policy_id, key)?;
        pipeline()
    }

    fn acquire(&self, policy_id: PolicyId, key: &TriggeringEventId) -> Result<SlotLease<'_>> {
        let slot = Arc::clone(self.slots.entry(policy_id).or_default().value());
        if self.claim(&slot, policy_id, key) {
            return Ok(SlotLease { guard: self, policy_id, slot });
        }
        drop(slot);
        self.prune(policy_id, 1);
        Err(EngineError::AlreadyInProgress(policy_id))
    }

    /// Take the slot for `key`, waiting in `Wait` mode. False when it stays busy.
    fn claim(&self, slot: &Slot, policy_id: PolicyId, key: &TriggeringEventId) -> bool {
        let mut holder = slot.holder.lock().unwrap_or_else(PoisonError::into_inner);
        if holder.is_some() {
            debug!(policy = ?policy_id, key = %key, in_flight = ?holder.as_ref(), "policy slot busy");
            if self.mode == GuardMode::Strict {
                return false;
            }
            let (waited, _) = slot
                .released
                .wait_timeout_while(holder, self.lock_wait, |h| h.is_some())
                .unwrap_or_else(PoisonError::into_inner);
            holder = waited;
            if holder.is_some() {
                return false;
            }
        }
        *holder = Some(key.clone());
        true
    }

    /// Drop the slot for `policy_id` when at most `refs` references remain,
    /// the map's own included. New references are only taken under the map's
    /// shard lock, which `remove_if` also holds.
    fn prune(&self, policy_id: PolicyId, refs: usize) {
        self.slots.remove_if(&policy_id, |_, slot| Arc::strong_count(slot) <= refs);
    }

    /// Key of the evaluation currently running for `policy_id`, if any.
    pub fn in_flight(&self, policy_id: PolicyId) -> Option<TriggeringEventId> {
        let slot = self.slots.get(&policy_id)?;
        let holder = slot.holder.lock().unwrap_or_else(PoisonError::into_inner);
        holder.clone()
    }
}
