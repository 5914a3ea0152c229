use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::damage::calculate_damage_index;
use crate::error::{EngineError, Result};
use crate::guard::EvaluationGuard;
use crate::ledger::{AssessmentDraft, EvaluationRecord, MemoryStore, PolicyStore};
use crate::params::PARAMS_VERSION;
use crate::payout::decide;
use crate::policy::{Payout, PayoutDetails, PayoutStatus, Policy, PolicyStatus};
use crate::signals::{
    VegetationWindow, WeatherObservation, WeatherWindow, normalize_vegetation, normalize_weather,
};
use crate::trigger::{self, TriggerKind, TriggerThresholds};
use crate::types::{Amount, PayoutId, PolicyId, TriggeringEventId};

/// Who asked for the evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    ScheduledScan,
    Webhook,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    /// Idempotency key for this real-world trigger.
    pub triggering_event_id: TriggeringEventId,
    pub source: TriggerSource,
    pub trigger_date: NaiveDate,
    pub weather: WeatherWindow,
    pub vegetation: VegetationWindow,
    /// Content hash of externally stored evidence. Derived from the windows
    /// when absent.
    #[serde(default)]
    pub proof_reference: Option<String>,
}

pub struct Engine<S: PolicyStore = MemoryStore> {
    store: S,
    guard: EvaluationGuard,
    config: EngineConfig,
}

impl Engine<MemoryStore> {
    pub fn in_memory(config: EngineConfig) -> Self {
        Engine::new(MemoryStore::new(), config)
    }
}

impl<S: PolicyStore> Engine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        let guard = EvaluationGuard::new(&config.guard);
        Engine { store, guard, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn register_policy(&self, policy: Policy) -> Result<()> {
        info!(policy = ?policy.id, sum_insured = policy.sum_insured, status = ?policy.status, "policy registered");
        self.store.register_policy(policy)
    }

    /// Normalize, fuse, decide and persist, at most once per
    /// (policy, triggering event).
    ///
    /// InsufficientData and InvalidInput abort before anything is written.
    /// Every other outcome, NoPayout and CoverageExhausted included, is
    /// recorded before it is returned.
    pub fn evaluate(&self, policy_id: PolicyId, request: &EvaluationRequest) -> Result<EvaluationRecord> {
        let key = &request.triggering_event_id;
        self.guard.evaluate_once(policy_id, key, || {
            if let Some(record) = self.store.find_evaluation(policy_id, key) {
                info!(policy = ?policy_id, key = %key, "replaying recorded evaluation");
                return Ok(record);
            }
            self.run_pipeline(policy_id, request).inspect_err(|e| {
                debug!(policy = ?policy_id, key = %key, error = %e, "evaluation aborted");
            })
        })
    }

    fn run_pipeline(&self, policy_id: PolicyId, request: &EvaluationRequest) -> Result<EvaluationRecord> {
        let policy = self.store.policy(policy_id)?;
        policy.check_eligible(request.trigger_date)?;

        let norm = &self.config.normalization;
        let wsi = normalize_weather(&request.weather, norm)?;
        let vsi = normalize_vegetation(&request.vegetation, norm)?;
        let damage_index = calculate_damage_index(wsi, vsi)?;

        let thresholds = TriggerThresholds::for_policy(policy.custom_thresholds.as_ref());
        let trigger = trigger::detect(&request.weather.observations, &thresholds, policy.coverage_type);

        let proof_reference = match &request.proof_reference {
            Some(r) => r.clone(),
            None => evidence_digest(&request.weather, &request.vegetation)?,
        };

        let draft = AssessmentDraft {
            policy_id,
            triggering_event_id: request.triggering_event_id.clone(),
            weather_stress_index: wsi,
            vegetation_stress_index: vsi,
            damage_index,
            trigger,
            trigger_date: request.trigger_date,
            proof_reference,
            params_version: PARAMS_VERSION,
        };

        let trigger_date = request.trigger_date;
        let record = self.store.commit_evaluation(draft, &|policy, coverage| {
            // Status may have moved since the read above.
            policy.check_eligible(trigger_date)?;
            decide(damage_index, policy.sum_insured, coverage.available())
        })?;

        let rationale = record.decision.rationale();
        info!(
            policy = ?policy_id,
            key = %request.triggering_event_id,
            source = ?request.source,
            wsi,
            vsi,
            di = damage_index,
            trigger = ?trigger,
            outcome = ?record.outcome(),
            raw_amount = rationale.raw_amount,
            capped = rationale.capped,
            replayed = record.replayed,
            "evaluation recorded"
        );
        Ok(record)
    }

    /// Payment-executor callback. Terminal payouts reject every update.
    pub fn update_payout_status(
        &self,
        payout_id: PayoutId,
        status: PayoutStatus,
        details: PayoutDetails,
    ) -> Result<Payout> {
        self.store
            .update_payout(payout_id, status, details, false)
            .inspect(|p| info!(payout = ?payout_id, status = ?p.status, "payout status updated"))
            .inspect_err(|e| log_payout_rejection(payout_id, e))
    }

    /// Operator decision on a payout. Approving a Pending payout releases it
    /// for processing; approving a Processing payout confirms completion
    /// (a transaction reference is required). Rejecting fails it.
    pub fn approve_payout(
        &self,
        payout_id: PayoutId,
        approved: bool,
        details: PayoutDetails,
    ) -> Result<Payout> {
        // Terminal payouts fall through to `apply`, which rejects them.
        let next = |p: &Payout| -> Result<PayoutStatus> {
            Ok(match (approved, p.status) {
                (true, PayoutStatus::Pending) => PayoutStatus::Processing,
                (true, _) => PayoutStatus::Completed,
                (false, _) => PayoutStatus::Failed,
            })
        };
        self.store
            .resolve_payout(payout_id, &next, details, true)
            .inspect(|p| info!(payout = ?payout_id, approved, status = ?p.status, "payout manually updated"))
            .inspect_err(|e| log_payout_rejection(payout_id, e))
    }

    pub fn remaining_coverage(&self, policy_id: PolicyId) -> Result<Amount> {
        Ok(self.store.coverage(policy_id)?.remaining())
    }

    /// Is a drought or flood occurring for this policy right now?
    pub fn detect_trigger(
        &self,
        policy_id: PolicyId,
        observations: &[WeatherObservation],
    ) -> Result<TriggerKind> {
        let policy = self.store.policy(policy_id)?;
        let thresholds = TriggerThresholds::for_policy(policy.custom_thresholds.as_ref());
        Ok(trigger::detect(observations, &thresholds, policy.coverage_type))
    }

    /// Trigger state plus how long to wait before the next scan.
    pub fn scan_plan(
        &self,
        policy_id: PolicyId,
        observations: &[WeatherObservation],
    ) -> Result<(TriggerKind, Duration)> {
        let kind = self.detect_trigger(policy_id, observations)?;
        Ok((kind, trigger::next_scan_interval(kind, &self.config.scan)))
    }

    pub fn transition_policy(&self, policy_id: PolicyId, next: PolicyStatus) -> Result<Policy> {
        let policy = self.store.set_policy_status(policy_id, next, None)?;
        info!(policy = ?policy_id, status = ?next, "policy status changed");
        Ok(policy)
    }

    /// Admin override: any status, recorded with the operator's reason.
    pub fn override_policy_status(
        &self,
        policy_id: PolicyId,
        next: PolicyStatus,
        reason: impl Into<String>,
    ) -> Result<Policy> {
        let reason = reason.into();
        warn!(policy = ?policy_id, status = ?next, reason = %reason, "policy status overridden");
        self.store.set_policy_status(policy_id, next, Some(reason))
    }
}

fn log_payout_rejection(payout_id: PayoutId, err: &EngineError) {
    if let EngineError::TerminalStateViolation { status, .. } = err {
        warn!(payout = ?payout_id, status = ?status, "update to terminal payout rejected");
    } else {
        debug!(payout = ?payout_id, error = %err, "payout update rejected");
    }
}

/// blake3 over the canonical JSON of both evidence windows.
pub fn evidence_digest(weather: &WeatherWindow, vegetation: &VegetationWindow) -> Result<String> {
    let bytes = serde_json::to_vec(&(weather, vegetation))
        .map_err(|e| EngineError::InvalidInput(format!("evidence not serializable: {e}")))?;
    Ok(hex::encode(blake3::hash(&bytes).as_bytes()))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Barrier;
    use std::thread;

    use super::*;
    use crate::config::{GuardConfig, GuardMode};
    use crate::ledger::Outcome;
    use crate::policy::tests::active_policy;
    use crate::signals::tests::{daily_weather, vegetation};

    const SUM: Amount = 5_000_000;

    /// Weather with full rainfall deficit and `hot_days` hot days over 30
    /// days, vegetation at `1 - vsi` of a unit baseline.
    pub(crate) fn request(key: &str, hot_days: usize, vsi: f64) -> EvaluationRequest {
        let mut weather = daily_weather(30, 0.0, 20.0);
        for obs in weather.observations.iter_mut().take(hot_days) {
            obs.temperature_c = 40.0;
        }
        EvaluationRequest {
            triggering_event_id: TriggeringEventId::new(key),
            source: TriggerSource::Webhook,
            trigger_date: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            weather,
            vegetation: vegetation(1.0, &[1.0 - vsi, 1.0 - vsi, 1.0 - vsi]),
            proof_reference: None,
        }
    }

    /// No rainfall deficit, no heat: DI = 0.4 · vsi.
    fn mild_request(key: &str, vsi: f64) -> EvaluationRequest {
        let mut r = request(key, 0, vsi);
        r.weather = daily_weather(30, 5.0, 20.0);
        r
    }

    fn engine() -> Engine {
        let e = Engine::in_memory(EngineConfig::canonical());
        e.register_policy(active_policy(1, SUM)).unwrap();
        e
    }

    fn complete(e: &Engine, payout_id: PayoutId) {
        e.update_payout_status(payout_id, PayoutStatus::Processing, PayoutDetails::default()).unwrap();
        e.update_payout_status(
            payout_id,
            PayoutStatus::Completed,
            PayoutDetails { transaction_reference: Some("mm-1".into()), failure_reason: None },
        )
        .unwrap();
    }

    // ── scenarios ─────────────────────────────────────────────────────────────

    #[test]
    fn scenario_a_end_to_end() {
        let e = engine();
        // WSI = 0.7 + 0.3 · 10/30 = 0.8; VSI = 0.7 → DI 0.76
        let rec = e.evaluate(PolicyId(1), &request("a", 10, 0.7)).unwrap();
        assert!((rec.assessment.weather_stress_index - 0.8).abs() < 1e-9);
        assert!((rec.assessment.vegetation_stress_index - 0.7).abs() < 1e-9);
        assert!((rec.assessment.damage_index - 0.76).abs() < 1e-9);
        assert!(
            matches!(rec.outcome(), Outcome::Payout { amount: 3_800_000, capped: false, .. }),
            "got {:?}",
            rec.outcome()
        );
        assert_eq!(rec.policy_status, PolicyStatus::Claimed, "DI ≥ 0.7 flags the policy");
        assert_eq!(rec.assessment.trigger, TriggerKind::Drought);
    }

    #[test]
    fn scenario_b_capped_against_completed_payouts() {
        let e = engine();
        // DI = 0.42 + 0.4 · 0.45 = 0.6 → 3_000_000
        let first = e.evaluate(PolicyId(1), &request("b1", 0, 0.45)).unwrap();
        assert_eq!(first.decision.amount(), 3_000_000);
        complete(&e, first.payout_id.unwrap());
        assert_eq!(e.remaining_coverage(PolicyId(1)).unwrap(), 2_000_000);

        // DI = 0.42 + 0.4 · 0.2 = 0.5 → raw 2_500_000, capped to 2_000_000
        let second = e.evaluate(PolicyId(1), &request("b2", 0, 0.2)).unwrap();
        assert!((second.assessment.damage_index - 0.5).abs() < 1e-9);
        assert_eq!(second.decision.rationale().raw_amount, 2_500_000);
        assert!(matches!(second.outcome(), Outcome::Payout { amount: 2_000_000, capped: true, .. }));
    }

    #[test]
    fn in_flight_payout_reduces_available_not_remaining() {
        let e = engine();
        let first = e.evaluate(PolicyId(1), &request("b1", 0, 0.45)).unwrap();
        assert_eq!(first.decision.amount(), 3_000_000);
        assert_eq!(e.remaining_coverage(PolicyId(1)).unwrap(), SUM);

        let second = e.evaluate(PolicyId(1), &request("b2", 0, 0.2)).unwrap();
        assert_eq!(second.decision.rationale().available_coverage, 2_000_000);
        assert!(matches!(second.outcome(), Outcome::Payout { amount: 2_000_000, capped: true, .. }));
    }

    #[test]
    fn scenario_c_no_payout_recorded() {
        let e = engine();
        let rec = e.evaluate(PolicyId(1), &mild_request("c", 0.625)).unwrap();
        assert!((rec.assessment.damage_index - 0.25).abs() < 1e-12);
        assert_eq!(rec.outcome(), Outcome::NoPayout);
        assert_eq!(e.store().assessments_for(PolicyId(1)).len(), 1);
        assert!(e.store().payouts_for(PolicyId(1)).is_empty());
    }

    #[test]
    fn scenario_d_concurrent_same_key() {
        let e = engine();
        let req = request("wh-42", 10, 0.7);
        let start = Barrier::new(2);
        let (a, b) = thread::scope(|s| {
            let h1 = s.spawn(|| {
                start.wait();
                e.evaluate(PolicyId(1), &req).unwrap()
            });
            let h2 = s.spawn(|| {
                start.wait();
                e.evaluate(PolicyId(1), &req).unwrap()
            });
            (h1.join().unwrap(), h2.join().unwrap())
        });
        assert_eq!(a.assessment, b.assessment);
        assert_eq!(a.payout_id, b.payout_id);
        assert_eq!(u8::from(a.replayed) + u8::from(b.replayed), 1);
        assert_eq!(e.store().assessments_for(PolicyId(1)).len(), 1);
        assert_eq!(e.store().payouts_for(PolicyId(1)).len(), 1);
    }

    // ── idempotency and failure semantics ─────────────────────────────────────

    #[test]
    fn repeated_delivery_is_idempotent() {
        let e = engine();
        let first = e.evaluate(PolicyId(1), &request("k", 0, 0.5)).unwrap();
        // Redelivery with a fuller window still replays the first decision.
        let second = e.evaluate(PolicyId(1), &request("k", 30, 1.0)).unwrap();
        assert!(second.replayed);
        assert_eq!(second.assessment.id, first.assessment.id);
        assert_eq!(e.store().assessments_for(PolicyId(1)).len(), 1);
        assert_eq!(e.store().payouts_for(PolicyId(1)).len(), 1);
    }

    #[test]
    fn insufficient_data_persists_nothing_and_can_retry() {
        let e = engine();
        let mut sparse = request("k", 0, 0.5);
        sparse.weather.observations.truncate(5);
        let err = e.evaluate(PolicyId(1), &sparse).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData(_)));
        assert!(e.store().assessments_for(PolicyId(1)).is_empty());

        let rec = e.evaluate(PolicyId(1), &request("k", 0, 0.5)).unwrap();
        assert!(!rec.replayed);
    }

    #[test]
    fn invalid_window_persists_nothing() {
        let e = engine();
        let mut bad = request("k", 0, 0.5);
        bad.vegetation.baseline = -1.0;
        assert!(matches!(e.evaluate(PolicyId(1), &bad), Err(EngineError::InvalidInput(_))));
        assert_eq!(e.store().audit_log().len(), 1, "only the registration entry");
    }

    #[test]
    fn coverage_exhausted_is_recorded_without_payout() {
        let e = engine();
        let first = e.evaluate(PolicyId(1), &request("x1", 30, 1.0)).unwrap();
        assert_eq!(first.decision.amount(), SUM);
        complete(&e, first.payout_id.unwrap());

        let rec = e.evaluate(PolicyId(1), &request("x2", 30, 1.0)).unwrap();
        assert_eq!(rec.outcome(), Outcome::CoverageExhausted);
        assert_eq!(e.store().assessments_for(PolicyId(1)).len(), 2);
        assert_eq!(e.store().payouts_for(PolicyId(1)).len(), 1);
    }

    #[test]
    fn inactive_policy_is_not_eligible() {
        let e = engine();
        e.override_policy_status(PolicyId(1), PolicyStatus::Cancelled, "fraud review").unwrap();
        let err = e.evaluate(PolicyId(1), &request("k", 0, 0.5)).unwrap_err();
        assert!(matches!(err, EngineError::PolicyNotEligible { .. }));
    }

    #[test]
    fn unknown_policy_is_not_found() {
        let e = engine();
        let err = e.evaluate(PolicyId(99), &request("k", 0, 0.5)).unwrap_err();
        assert_eq!(err, EngineError::PolicyNotFound(PolicyId(99)));
    }

    #[test]
    fn proof_reference_is_content_hash_unless_supplied() {
        let e = engine();
        let r1 = request("p1", 0, 0.5);
        let rec = e.evaluate(PolicyId(1), &r1).unwrap();
        assert_eq!(rec.assessment.proof_reference.len(), 64);
        assert_eq!(
            rec.assessment.proof_reference,
            evidence_digest(&r1.weather, &r1.vegetation).unwrap()
        );

        let mut r2 = request("p2", 0, 0.5);
        r2.proof_reference = Some("bafy-upload".into());
        let rec = e.evaluate(PolicyId(1), &r2).unwrap();
        assert_eq!(rec.assessment.proof_reference, "bafy-upload");
    }

    #[test]
    fn strict_mode_engine_still_replays_sequential_duplicates() {
        let mut cfg = EngineConfig::canonical();
        cfg.guard = GuardConfig { mode: GuardMode::Strict, lock_wait_ms: 0 };
        let e = Engine::in_memory(cfg);
        e.register_policy(active_policy(1, SUM)).unwrap();
        e.evaluate(PolicyId(1), &request("k", 0, 0.5)).unwrap();
        assert!(e.evaluate(PolicyId(1), &request("k", 0, 0.5)).unwrap().replayed);
    }

    // ── payout callbacks and overrides ────────────────────────────────────────

    #[test]
    fn terminal_payout_rejects_callback() {
        let e = engine();
        let pid = e.evaluate(PolicyId(1), &request("k", 0, 0.5)).unwrap().payout_id.unwrap();
        complete(&e, pid);
        let err = e
            .update_payout_status(pid, PayoutStatus::Failed, PayoutDetails::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::TerminalStateViolation { .. }));
    }

    #[test]
    fn manual_approval_walks_lifecycle() {
        let e = engine();
        let pid = e.evaluate(PolicyId(1), &request("k", 0, 0.5)).unwrap().payout_id.unwrap();
        let p = e.approve_payout(pid, true, PayoutDetails::default()).unwrap();
        assert_eq!(p.status, PayoutStatus::Processing);
        let p = e
            .approve_payout(
                pid,
                true,
                PayoutDetails { transaction_reference: Some("manual-77".into()), failure_reason: None },
            )
            .unwrap();
        assert_eq!(p.status, PayoutStatus::Completed);
        let err = e.approve_payout(pid, false, PayoutDetails::default()).unwrap_err();
        assert!(matches!(err, EngineError::TerminalStateViolation { .. }));
    }

    #[test]
    fn manual_rejection_fails_pending_payout() {
        let e = engine();
        let pid = e.evaluate(PolicyId(1), &request("k", 0, 0.5)).unwrap().payout_id.unwrap();
        let p = e
            .approve_payout(
                pid,
                false,
                PayoutDetails { transaction_reference: None, failure_reason: Some("duplicate plot".into()) },
            )
            .unwrap();
        assert_eq!(p.status, PayoutStatus::Failed);
        assert_eq!(p.failure_reason.as_deref(), Some("duplicate plot"));
    }

    #[test]
    fn unknown_payout_is_not_found() {
        let e = engine();
        let err = e.approve_payout(PayoutId(5), true, PayoutDetails::default()).unwrap_err();
        assert_eq!(err, EngineError::PayoutNotFound(PayoutId(5)));
    }

    #[test]
    fn approval_racing_callback_never_fails() {
        for _ in 0..50 {
            let e = engine();
            let pid = e.evaluate(PolicyId(1), &request("k", 0, 0.5)).unwrap().payout_id.unwrap();
            let start = Barrier::new(2);
            let approved = thread::scope(|s| {
                s.spawn(|| {
                    start.wait();
                    let _ = e.update_payout_status(pid, PayoutStatus::Processing, PayoutDetails::default());
                });
                let h = s.spawn(|| {
                    start.wait();
                    e.approve_payout(
                        pid,
                        true,
                        PayoutDetails { transaction_reference: Some("manual-1".into()), failure_reason: None },
                    )
                });
                h.join().unwrap()
            });
            let p = approved.unwrap();
            assert!(matches!(p.status, PayoutStatus::Processing | PayoutStatus::Completed));
            let stored = e.store().payout(pid).unwrap().status;
            assert!(matches!(stored, PayoutStatus::Processing | PayoutStatus::Completed));
        }
    }

    // ── trigger gating ────────────────────────────────────────────────────────

    #[test]
    fn scan_plan_tightens_during_drought() {
        let e = engine();
        let dry = daily_weather(30, 0.0, 25.0);
        let (kind, wait) = e.scan_plan(PolicyId(1), &dry.observations).unwrap();
        assert_eq!(kind, TriggerKind::Drought);
        assert_eq!(wait, Duration::hours(i64::from(e.config().scan.event_interval_hours)));

        let wet = daily_weather(30, 3.0, 25.0);
        let (kind, wait) = e.scan_plan(PolicyId(1), &wet.observations).unwrap();
        assert_eq!(kind, TriggerKind::None);
        assert_eq!(wait, Duration::hours(i64::from(e.config().scan.quiet_interval_hours)));
    }

    #[test]
    fn transition_policy_enforces_forward_moves() {
        let e = engine();
        e.transition_policy(PolicyId(1), PolicyStatus::Expired).unwrap();
        assert!(e.transition_policy(PolicyId(1), PolicyStatus::Active).is_err());
    }
}
