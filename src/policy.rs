use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::params::{CLAIM_FLAG_PAYOUT_RATIO, SEVERE_DAMAGE_INDEX};
use crate::types::{Amount, AssessmentId, FarmerId, PayoutId, PlotId, PolicyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoverageType {
    Drought,
    Flood,
    Both,
}

impl CoverageType {
    pub fn covers_drought(self) -> bool {
        matches!(self, CoverageType::Drought | CoverageType::Both)
    }

    pub fn covers_flood(self) -> bool {
        matches!(self, CoverageType::Flood | CoverageType::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyStatus {
    Pending,
    Active,
    Claimed,
    Expired,
    Cancelled,
}

impl PolicyStatus {
    /// Forward transitions. Anything else needs an admin override.
    pub fn can_transition_to(self, next: PolicyStatus) -> bool {
        use PolicyStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Cancelled)
                | (Active, Claimed)
                | (Active, Expired)
                | (Active, Cancelled)
                | (Claimed, Expired)
        )
    }

    /// Claimed is a review flag; the policy still pays out within coverage.
    pub fn is_in_force(self) -> bool {
        matches!(self, PolicyStatus::Active | PolicyStatus::Claimed)
    }
}

/// Per-policy overrides of the trigger defaults. Unset fields fall back to
/// the constants in `params`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomThresholds {
    pub drought_rainfall_mm: Option<f64>,
    pub drought_period_days: Option<u32>,
    pub flood_rainfall_mm: Option<f64>,
    pub flood_period_hours: Option<u32>,
}

impl CustomThresholds {
    /// Periods must be positive; rainfall thresholds finite and non-negative.
    pub fn validate(&self) -> Result<()> {
        for (name, mm) in [
            ("drought_rainfall_mm", self.drought_rainfall_mm),
            ("flood_rainfall_mm", self.flood_rainfall_mm),
        ] {
            if let Some(mm) = mm.filter(|mm| !mm.is_finite() || *mm < 0.0) {
                return Err(EngineError::InvalidInput(format!("{name} {mm} must be finite and >= 0")));
            }
        }
        for (name, period) in [
            ("drought_period_days", self.drought_period_days),
            ("flood_period_hours", self.flood_period_hours),
        ] {
            if period == Some(0) {
                return Err(EngineError::InvalidInput(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub farmer_id: FarmerId,
    pub plot_id: PlotId,
    pub coverage_type: CoverageType,
    /// Maximum total payout obligation, minor currency units.
    pub sum_insured: Amount,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: PolicyStatus,
    #[serde(default)]
    pub custom_thresholds: Option<CustomThresholds>,
}

impl Policy {
    pub fn validate(&self) -> Result<()> {
        if self.sum_insured == 0 {
            return Err(EngineError::InvalidInput(format!(
                "policy {:?} sum insured must be > 0",
                self.id
            )));
        }
        if self.end_date < self.start_date {
            return Err(EngineError::InvalidInput(format!(
                "policy {:?} ends before it starts",
                self.id
            )));
        }
        if let Some(custom) = &self.custom_thresholds {
            custom.validate()?;
        }
        Ok(())
    }

    /// Policy must be in force and the trigger date inside the cover period.
    pub fn check_eligible(&self, trigger_date: NaiveDate) -> Result<()> {
        if !self.status.is_in_force() {
            return Err(EngineError::PolicyNotEligible {
                policy_id: self.id,
                reason: format!("status is {:?}", self.status),
            });
        }
        if trigger_date < self.start_date || trigger_date > self.end_date {
            return Err(EngineError::PolicyNotEligible {
                policy_id: self.id,
                reason: format!(
                    "trigger date {trigger_date} outside cover {}..={}",
                    self.start_date, self.end_date
                ),
            });
        }
        Ok(())
    }

    pub fn transition_to(&mut self, next: PolicyStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidPolicyTransition {
                policy_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// The Active → Claimed flag: severe damage, or a payout of at least 80%
    /// of the sum insured. Informational only.
    pub fn should_flag_claimed(&self, damage_index: f64, payout_amount: Amount) -> bool {
        if self.status != PolicyStatus::Active {
            return false;
        }
        let ratio = payout_amount as f64 / self.sum_insured as f64;
        damage_index >= SEVERE_DAMAGE_INDEX || ratio >= CLAIM_FLAG_PAYOUT_RATIO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PayoutStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PayoutStatus::Completed | PayoutStatus::Failed)
    }

    /// Non-terminal payouts still hold a claim on coverage.
    pub fn is_in_flight(self) -> bool {
        matches!(self, PayoutStatus::Pending | PayoutStatus::Processing)
    }

    pub fn can_transition_to(self, next: PayoutStatus) -> bool {
        use PayoutStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

/// Details supplied alongside a payout status change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayoutDetails {
    pub transaction_reference: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub id: PayoutId,
    pub policy_id: PolicyId,
    pub farmer_id: FarmerId,
    pub assessment_id: AssessmentId,
    pub amount: Amount,
    pub status: PayoutStatus,
    pub transaction_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payout {
    /// Apply a confirmed status change. Terminal payouts reject every update.
    pub fn apply(
        &mut self,
        next: PayoutStatus,
        details: PayoutDetails,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if self.status.is_terminal() {
            return Err(EngineError::TerminalStateViolation {
                payout_id: self.id,
                status: self.status,
            });
        }
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidPayoutTransition {
                payout_id: self.id,
                from: self.status,
                to: next,
            });
        }
        match next {
            PayoutStatus::Completed => {
                let Some(reference) = details.transaction_reference else {
                    return Err(EngineError::InvalidInput(format!(
                        "completing payout {:?} requires a transaction reference",
                        self.id
                    )));
                };
                self.transaction_reference = Some(reference);
                self.completed_at = Some(at);
            }
            PayoutStatus::Failed => {
                self.failure_reason =
                    Some(details.failure_reason.unwrap_or_else(|| "unspecified".to_string()));
                self.completed_at = Some(at);
            }
            PayoutStatus::Processing => {
                if details.transaction_reference.is_some() {
                    self.transaction_reference = details.transaction_reference;
                }
            }
            PayoutStatus::Pending => {}
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn active_policy(id: u64, sum_insured: Amount) -> Policy {
        Policy {
            id: PolicyId(id),
            farmer_id: FarmerId(100 + id),
            plot_id: PlotId(200 + id),
            coverage_type: CoverageType::Both,
            sum_insured,
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            status: PolicyStatus::Active,
            custom_thresholds: None,
        }
    }

    fn pending_payout() -> Payout {
        Payout {
            id: PayoutId(1),
            policy_id: PolicyId(1),
            farmer_id: FarmerId(1),
            assessment_id: AssessmentId(1),
            amount: 1_000,
            status: PayoutStatus::Pending,
            transaction_reference: None,
            failure_reason: None,
            initiated_at: Utc::now(),
            completed_at: None,
        }
    }

    fn with_ref(r: &str) -> PayoutDetails {
        PayoutDetails { transaction_reference: Some(r.to_string()), failure_reason: None }
    }

    // ── validation ────────────────────────────────────────────────────────────

    #[test]
    fn custom_thresholds_must_be_usable() {
        let bad = [
            CustomThresholds { drought_period_days: Some(0), ..Default::default() },
            CustomThresholds { flood_period_hours: Some(0), ..Default::default() },
            CustomThresholds { drought_rainfall_mm: Some(-5.0), ..Default::default() },
            CustomThresholds { flood_rainfall_mm: Some(f64::NAN), ..Default::default() },
            CustomThresholds { drought_rainfall_mm: Some(f64::INFINITY), ..Default::default() },
        ];
        for custom in bad {
            let mut p = active_policy(1, 1_000);
            p.custom_thresholds = Some(custom.clone());
            assert!(
                matches!(p.validate(), Err(EngineError::InvalidInput(_))),
                "{custom:?} should be rejected"
            );
        }

        let mut p = active_policy(1, 1_000);
        p.custom_thresholds = Some(CustomThresholds {
            drought_rainfall_mm: Some(0.0),
            drought_period_days: Some(14),
            ..Default::default()
        });
        assert!(p.validate().is_ok());
    }

    // ── policy status ─────────────────────────────────────────────────────────

    #[test]
    fn policy_forward_transitions() {
        let mut p = active_policy(1, 1_000);
        p.status = PolicyStatus::Pending;
        p.transition_to(PolicyStatus::Active).unwrap();
        p.transition_to(PolicyStatus::Claimed).unwrap();
        p.transition_to(PolicyStatus::Expired).unwrap();
        assert_eq!(p.status, PolicyStatus::Expired);
    }

    #[test]
    fn policy_cannot_move_backwards() {
        let mut p = active_policy(1, 1_000);
        p.status = PolicyStatus::Claimed;
        let err = p.transition_to(PolicyStatus::Active).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPolicyTransition { .. }));
        assert_eq!(p.status, PolicyStatus::Claimed);
    }

    #[test]
    fn claimed_policy_stays_in_force() {
        assert!(PolicyStatus::Claimed.is_in_force());
        assert!(!PolicyStatus::Expired.is_in_force());
        assert!(!PolicyStatus::Pending.is_in_force());
    }

    #[test]
    fn eligibility_checks_cover_period() {
        let p = active_policy(1, 1_000);
        assert!(p.check_eligible(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()).is_ok());
        assert!(p.check_eligible(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()).is_err());
    }

    #[test]
    fn claim_flag_on_severe_index_or_large_payout() {
        let p = active_policy(1, 50_000);
        assert!(p.should_flag_claimed(0.7, 0));
        assert!(p.should_flag_claimed(0.5, 40_000));
        assert!(!p.should_flag_claimed(0.69, 39_999));
    }

    #[test]
    fn claim_flag_only_from_active() {
        let mut p = active_policy(1, 50_000);
        p.status = PolicyStatus::Claimed;
        assert!(!p.should_flag_claimed(0.95, 50_000));
    }

    #[test]
    fn zero_sum_insured_fails_validation() {
        let p = active_policy(1, 0);
        assert!(matches!(p.validate(), Err(EngineError::InvalidInput(_))));
    }

    // ── payout lifecycle ──────────────────────────────────────────────────────

    #[test]
    fn payout_happy_path() {
        let mut p = pending_payout();
        p.apply(PayoutStatus::Processing, PayoutDetails::default(), Utc::now()).unwrap();
        p.apply(PayoutStatus::Completed, with_ref("mpesa-123"), Utc::now()).unwrap();
        assert_eq!(p.status, PayoutStatus::Completed);
        assert_eq!(p.transaction_reference.as_deref(), Some("mpesa-123"));
        assert!(p.completed_at.is_some());
    }

    #[test]
    fn completion_requires_reference() {
        let mut p = pending_payout();
        p.apply(PayoutStatus::Processing, PayoutDetails::default(), Utc::now()).unwrap();
        let err = p.apply(PayoutStatus::Completed, PayoutDetails::default(), Utc::now());
        assert!(matches!(err, Err(EngineError::InvalidInput(_))));
        assert_eq!(p.status, PayoutStatus::Processing);
    }

    #[test]
    fn pending_cannot_skip_to_completed() {
        let mut p = pending_payout();
        let err = p.apply(PayoutStatus::Completed, with_ref("x"), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPayoutTransition { .. }));
    }

    #[test]
    fn terminal_payout_never_reverts() {
        let mut p = pending_payout();
        p.apply(PayoutStatus::Failed, PayoutDetails::default(), Utc::now()).unwrap();
        assert_eq!(p.failure_reason.as_deref(), Some("unspecified"));
        for next in [PayoutStatus::Pending, PayoutStatus::Processing, PayoutStatus::Completed] {
            let err = p.apply(next, with_ref("late"), Utc::now()).unwrap_err();
            assert!(matches!(err, EngineError::TerminalStateViolation { .. }));
        }
        assert_eq!(p.status, PayoutStatus::Failed);
    }
}
