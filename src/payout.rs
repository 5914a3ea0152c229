//! Damage index → payout decision.
//!
//! `decide` is pure: the same (DI, sum insured, remaining coverage) always
//! yields the same decision, so any recorded assessment can be replayed.

use serde::{Deserialize, Serialize};

use crate::damage::check_unit;
use crate::error::{EngineError, Result};
use crate::params::{PARAMS_VERSION, PAYOUT_CEILING_PCT, PAYOUT_FLOOR_PCT, PAYOUT_THRESHOLD};
use crate::types::Amount;

/// Everything needed to explain a decision to a farmer or a dispute reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRationale {
    pub damage_index: f64,
    pub threshold: f64,
    /// Payout percentage of sum insured; 0 below the threshold.
    pub percentage: f64,
    pub sum_insured: Amount,
    /// Uncapped amount; 0 below the threshold.
    pub raw_amount: Amount,
    /// Sum insured minus completed and in-flight payouts: the figure the
    /// amount was capped against. Not the same as remaining coverage, which
    /// ignores in-flight payouts.
    pub available_coverage: Amount,
    pub capped: bool,
    pub params_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PayoutDecision {
    NoPayout { rationale: DecisionRationale },
    Payout { amount: Amount, capped: bool, rationale: DecisionRationale },
    CoverageExhausted { rationale: DecisionRationale },
}

impl PayoutDecision {
    pub fn rationale(&self) -> &DecisionRationale {
        match self {
            PayoutDecision::NoPayout { rationale }
            | PayoutDecision::Payout { rationale, .. }
            | PayoutDecision::CoverageExhausted { rationale } => rationale,
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            PayoutDecision::Payout { amount, .. } => *amount,
            _ => 0,
        }
    }
}

/// Linear ramp from 30% at the threshold to 100% at DI = 1.0.
/// Zero below the threshold.
pub fn payout_percentage(damage_index: f64) -> f64 {
    if damage_index < PAYOUT_THRESHOLD {
        return 0.0;
    }
    if damage_index >= 1.0 {
        return PAYOUT_CEILING_PCT;
    }
    let span = 1.0 - PAYOUT_THRESHOLD;
    let pct = PAYOUT_FLOOR_PCT
        + ((damage_index - PAYOUT_THRESHOLD) / span) * (PAYOUT_CEILING_PCT - PAYOUT_FLOOR_PCT);
    pct.clamp(PAYOUT_FLOOR_PCT, PAYOUT_CEILING_PCT)
}

pub fn decide(
    damage_index: f64,
    sum_insured: Amount,
    available_coverage: Amount,
) -> Result<PayoutDecision> {
    check_unit("damage index", damage_index)?;
    if sum_insured == 0 {
        return Err(EngineError::InvalidInput("sum insured must be > 0".into()));
    }

    let percentage = payout_percentage(damage_index);
    // Nearest minor unit, and at least one once the threshold is crossed.
    let raw_amount = if percentage > 0.0 {
        (((sum_insured as f64) * percentage).round() as Amount).clamp(1, sum_insured)
    } else {
        0
    };

    let mut rationale = DecisionRationale {
        damage_index,
        threshold: PAYOUT_THRESHOLD,
        percentage,
        sum_insured,
        raw_amount,
        available_coverage,
        capped: false,
        params_version: PARAMS_VERSION,
    };

    if available_coverage == 0 {
        return Ok(PayoutDecision::CoverageExhausted { rationale });
    }
    if damage_index < PAYOUT_THRESHOLD {
        return Ok(PayoutDecision::NoPayout { rationale });
    }

    let amount = raw_amount.min(available_coverage);
    let capped = amount < raw_amount;
    rationale.capped = capped;
    Ok(PayoutDecision::Payout { amount, capped, rationale })
}
