//! Persistence boundary and coverage ledger.
//!
//! `PolicyStore` is the seam to whatever database backs the platform. Its one
//! hard requirement is `commit_evaluation`: read the coverage aggregate and
//! conditionally insert the assessment and payout as a single atomic unit,
//! keyed uniquely on (policy, triggering event). `MemoryStore` satisfies it
//! with one mutex around the whole state.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::events::{AuditEntry, AuditEvent, AuditLog};
use crate::payout::PayoutDecision;
use crate::policy::{Payout, PayoutDetails, PayoutStatus, Policy, PolicyStatus};
use crate::trigger::TriggerKind;
use crate::types::{Amount, AssessmentId, PayoutId, PolicyId, TriggeringEventId};

/// Immutable record of one evaluation. Never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageAssessment {
    pub id: AssessmentId,
    pub policy_id: PolicyId,
    pub triggering_event_id: TriggeringEventId,
    pub weather_stress_index: f64,
    pub vegetation_stress_index: f64,
    pub damage_index: f64,
    pub trigger: TriggerKind,
    pub trigger_date: NaiveDate,
    /// Opaque content hash of the evidence.
    pub proof_reference: String,
    pub params_version: u32,
    pub created_at: DateTime<Utc>,
}

/// Everything computed before the transaction opens.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentDraft {
    pub policy_id: PolicyId,
    pub triggering_event_id: TriggeringEventId,
    pub weather_stress_index: f64,
    pub vegetation_stress_index: f64,
    pub damage_index: f64,
    pub trigger: TriggerKind,
    pub trigger_date: NaiveDate,
    pub proof_reference: String,
    pub params_version: u32,
}

/// What the caller of `evaluate` gets back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    NoPayout,
    Payout { payout_id: PayoutId, amount: Amount, capped: bool },
    CoverageExhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub assessment: DamageAssessment,
    pub decision: PayoutDecision,
    pub payout_id: Option<PayoutId>,
    /// Policy status right after this evaluation committed.
    pub policy_status: PolicyStatus,
    /// True when this record was returned for an already-seen key.
    #[serde(default)]
    pub replayed: bool,
}

impl EvaluationRecord {
    pub fn outcome(&self) -> Outcome {
        match (&self.decision, self.payout_id) {
            (PayoutDecision::Payout { amount, capped, .. }, Some(payout_id)) => {
                Outcome::Payout { payout_id, amount: *amount, capped: *capped }
            }
            (PayoutDecision::CoverageExhausted { .. }, _) => Outcome::CoverageExhausted,
            _ => Outcome::NoPayout,
        }
    }
}

/// Coverage aggregate for one policy, read inside the commit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    pub sum_insured: Amount,
    /// Σ Completed payouts.
    pub completed: Amount,
    /// Σ Pending + Processing payouts.
    pub in_flight: Amount,
}

impl CoverageSnapshot {
    /// Sum insured minus completed payouts.
    pub fn remaining(&self) -> Amount {
        self.sum_insured.saturating_sub(self.completed)
    }

    /// Remaining coverage net of payouts still in flight. New payouts are
    /// capped against this so that completing every open payout can never
    /// drive `remaining` below zero.
    pub fn available(&self) -> Amount {
        self.remaining().saturating_sub(self.in_flight)
    }
}

/// Decision step run inside the commit transaction.
pub type DecideFn<'a> = dyn Fn(&Policy, &CoverageSnapshot) -> Result<PayoutDecision> + 'a;

/// Next-status step run inside a payout update.
pub type NextStatusFn<'a> = dyn Fn(&Payout) -> Result<PayoutStatus> + 'a;

pub trait PolicyStore: Send + Sync {
    fn register_policy(&self, policy: Policy) -> Result<()>;

    fn policy(&self, policy_id: PolicyId) -> Result<Policy>;

    fn find_evaluation(
        &self,
        policy_id: PolicyId,
        key: &TriggeringEventId,
    ) -> Option<EvaluationRecord>;

    fn coverage(&self, policy_id: PolicyId) -> Result<CoverageSnapshot>;

    /// Atomically: return the existing record if the key was already
    /// evaluated; otherwise read coverage, run `decide`, insert the
    /// assessment and any payout, and apply the Claimed flag.
    fn commit_evaluation(&self, draft: AssessmentDraft, decide: &DecideFn<'_>)
    -> Result<EvaluationRecord>;

    fn update_payout(
        &self,
        payout_id: PayoutId,
        next: PayoutStatus,
        details: PayoutDetails,
        manual: bool,
    ) -> Result<Payout> {
        self.resolve_payout(payout_id, &|_| Ok(next), details, manual)
    }

    /// Atomically: pick the next status from the payout as currently stored,
    /// then apply it.
    fn resolve_payout(
        &self,
        payout_id: PayoutId,
        next: &NextStatusFn<'_>,
        details: PayoutDetails,
        manual: bool,
    ) -> Result<Payout>;

    fn payout(&self, payout_id: PayoutId) -> Result<Payout>;

    fn payouts_for(&self, policy_id: PolicyId) -> Vec<Payout>;

    fn assessments_for(&self, policy_id: PolicyId) -> Vec<DamageAssessment>;

    /// Forward transition, or any transition when `override_reason` is set.
    fn set_policy_status(
        &self,
        policy_id: PolicyId,
        next: PolicyStatus,
        override_reason: Option<String>,
    ) -> Result<Policy>;

    fn audit_log(&self) -> AuditLog;
}

#[derive(Default)]
struct StoreState {
    policies: HashMap<PolicyId, Policy>,
    assessments: Vec<DamageAssessment>,
    /// Unique (policy, triggering event) index.
    evaluations: HashMap<(PolicyId, TriggeringEventId), EvaluationRecord>,
    payouts: HashMap<PayoutId, Payout>,
    next_assessment_id: u64,
    next_payout_id: u64,
    log: AuditLog,
}

impl StoreState {
    fn record(&mut self, event: AuditEvent) {
        let seq = self.log.len() as u64;
        self.log.push(AuditEntry { seq, at: Utc::now(), event });
    }

    fn coverage(&self, policy: &Policy) -> CoverageSnapshot {
        let mut completed: Amount = 0;
        let mut in_flight: Amount = 0;
        for p in self.payouts.values().filter(|p| p.policy_id == policy.id) {
            if p.status == PayoutStatus::Completed {
                completed += p.amount;
            } else if p.status.is_in_flight() {
                in_flight += p.amount;
            }
        }
        CoverageSnapshot { sum_insured: policy.sum_insured, completed, in_flight }
    }
}

/// In-process store. Each method holds the state lock for its whole body,
/// which makes every method one serializable transaction.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A panic mid-transaction cannot leave partial writes: every write
        // path validates before mutating.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PolicyStore for MemoryStore {
    fn register_policy(&self, policy: Policy) -> Result<()> {
        policy.validate()?;
        let mut st = self.lock();
        if st.policies.contains_key(&policy.id) {
            return Err(EngineError::InvalidInput(format!(
                "policy {:?} already registered",
                policy.id
            )));
        }
        st.record(AuditEvent::PolicyRegistered {
            policy_id: policy.id,
            sum_insured: policy.sum_insured,
            status: policy.status,
        });
        st.policies.insert(policy.id, policy);
        Ok(())
    }

    fn policy(&self, policy_id: PolicyId) -> Result<Policy> {
        self.lock()
            .policies
            .get(&policy_id)
            .cloned()
            .ok_or(EngineError::PolicyNotFound(policy_id))
    }

    fn find_evaluation(
        &self,
        policy_id: PolicyId,
        key: &TriggeringEventId,
    ) -> Option<EvaluationRecord> {
        self.lock().evaluations.get(&(policy_id, key.clone())).map(|r| EvaluationRecord {
            replayed: true,
            ..r.clone()
        })
    }

    fn coverage(&self, policy_id: PolicyId) -> Result<CoverageSnapshot> {
        let st = self.lock();
        let policy = st.policies.get(&policy_id).ok_or(EngineError::PolicyNotFound(policy_id))?;
        Ok(st.coverage(policy))
    }

    fn commit_evaluation(
        &self,
        draft: AssessmentDraft,
        decide: &DecideFn<'_>,
    ) -> Result<EvaluationRecord> {
        let mut st = self.lock();

        let key = (draft.policy_id, draft.triggering_event_id.clone());
        if let Some(existing) = st.evaluations.get(&key) {
            debug!(policy = ?draft.policy_id, key = %draft.triggering_event_id, "evaluation key already committed");
            return Ok(EvaluationRecord { replayed: true, ..existing.clone() });
        }

        let policy = st
            .policies
            .get(&draft.policy_id)
            .cloned()
            .ok_or(EngineError::PolicyNotFound(draft.policy_id))?;
        let coverage = st.coverage(&policy);
        let decision = decide(&policy, &coverage)?;

        // Nothing has been written yet; from here on every step succeeds.
        let now = Utc::now();
        let assessment_id = AssessmentId(st.next_assessment_id);
        st.next_assessment_id += 1;
        let assessment = DamageAssessment {
            id: assessment_id,
            policy_id: policy.id,
            triggering_event_id: draft.triggering_event_id.clone(),
            weather_stress_index: draft.weather_stress_index,
            vegetation_stress_index: draft.vegetation_stress_index,
            damage_index: draft.damage_index,
            trigger: draft.trigger,
            trigger_date: draft.trigger_date,
            proof_reference: draft.proof_reference,
            params_version: draft.params_version,
            created_at: now,
        };
        st.assessments.push(assessment.clone());
        st.record(AuditEvent::AssessmentRecorded {
            assessment_id,
            policy_id: policy.id,
            triggering_event_id: draft.triggering_event_id,
            trigger: draft.trigger,
            decision: decision.clone(),
        });

        let payout_id = match &decision {
            PayoutDecision::Payout { amount, .. } => {
                let payout_id = PayoutId(st.next_payout_id);
                st.next_payout_id += 1;
                st.payouts.insert(
                    payout_id,
                    Payout {
                        id: payout_id,
                        policy_id: policy.id,
                        farmer_id: policy.farmer_id,
                        assessment_id,
                        amount: *amount,
                        status: PayoutStatus::Pending,
                        transaction_reference: None,
                        failure_reason: None,
                        initiated_at: now,
                        completed_at: None,
                    },
                );
                st.record(AuditEvent::PayoutCreated {
                    payout_id,
                    policy_id: policy.id,
                    assessment_id,
                    amount: *amount,
                });
                info!(policy = ?policy.id, payout = ?payout_id, amount, "payout created");
                Some(payout_id)
            }
            PayoutDecision::NoPayout { .. } | PayoutDecision::CoverageExhausted { .. } => None,
        };

        let mut policy_status = policy.status;
        if policy.should_flag_claimed(assessment.damage_index, decision.amount()) {
            policy_status = PolicyStatus::Claimed;
            if let Some(p) = st.policies.get_mut(&policy.id) {
                p.status = PolicyStatus::Claimed;
            }
            st.record(AuditEvent::PolicyStatusChanged {
                policy_id: policy.id,
                from: policy.status,
                to: PolicyStatus::Claimed,
                reason: None,
            });
            info!(policy = ?policy.id, di = assessment.damage_index, "policy flagged claimed");
        }

        let record = EvaluationRecord {
            assessment,
            decision,
            payout_id,
            policy_status,
            replayed: false,
        };
        st.evaluations.insert(key, record.clone());
        Ok(record)
    }

    fn resolve_payout(
        &self,
        payout_id: PayoutId,
        next: &NextStatusFn<'_>,
        details: PayoutDetails,
        manual: bool,
    ) -> Result<Payout> {
        let mut st = self.lock();
        let payout = st.payouts.get_mut(&payout_id).ok_or(EngineError::PayoutNotFound(payout_id))?;
        let from = payout.status;
        let next = next(payout)?;
        payout.apply(next, details, Utc::now())?;
        let updated = payout.clone();
        st.record(AuditEvent::PayoutStatusChanged { payout_id, from, to: next, manual });
        Ok(updated)
    }

    fn payout(&self, payout_id: PayoutId) -> Result<Payout> {
        self.lock()
            .payouts
            .get(&payout_id)
            .cloned()
            .ok_or(EngineError::PayoutNotFound(payout_id))
    }

    fn payouts_for(&self, policy_id: PolicyId) -> Vec<Payout> {
        let mut out: Vec<Payout> = self
            .lock()
            .payouts
            .values()
            .filter(|p| p.policy_id == policy_id)
            .cloned()
            .collect();
        out.sort_by_key(|p| p.id);
        out
    }

    fn assessments_for(&self, policy_id: PolicyId) -> Vec<DamageAssessment> {
        self.lock()
            .assessments
            .iter()
            .filter(|a| a.policy_id == policy_id)
            .cloned()
            .collect()
    }

    fn set_policy_status(
        &self,
        policy_id: PolicyId,
        next: PolicyStatus,
        override_reason: Option<String>,
    ) -> Result<Policy> {
        let mut st = self.lock();
        let policy = st.policies.get_mut(&policy_id).ok_or(EngineError::PolicyNotFound(policy_id))?;
        let from = policy.status;
        match &override_reason {
            Some(_) => policy.status = next,
            None => policy.transition_to(next)?,
        }
        let updated = policy.clone();
        st.record(AuditEvent::PolicyStatusChanged {
            policy_id,
            from,
            to: next,
            reason: override_reason,
        });
        Ok(updated)
    }

    fn audit_log(&self) -> AuditLog {
        self.lock().log.clone()
    }
}
