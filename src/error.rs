use thiserror::Error;

use crate::policy::{PayoutStatus, PolicyStatus};
use crate::types::{PayoutId, PolicyId};

/// Failures surfaced by the assessment core.
///
/// Coverage exhaustion is not here: it is a recorded outcome
/// (`payout::PayoutDecision::CoverageExhausted`).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Upstream window is empty or too sparse. Nothing was persisted; retry
    /// with a fuller window.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// A value is outside its domain bounds. Nothing was persisted.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Another evaluation holds the policy slot.
    #[error("evaluation already in progress for policy {0:?}")]
    AlreadyInProgress(PolicyId),

    /// Attempt to mutate a Completed or Failed payout.
    #[error("payout {payout_id:?} is already {status:?}")]
    TerminalStateViolation { payout_id: PayoutId, status: PayoutStatus },

    #[error("payout {payout_id:?} cannot move from {from:?} to {to:?}")]
    InvalidPayoutTransition { payout_id: PayoutId, from: PayoutStatus, to: PayoutStatus },

    #[error("policy {policy_id:?} cannot move from {from:?} to {to:?}")]
    InvalidPolicyTransition { policy_id: PolicyId, from: PolicyStatus, to: PolicyStatus },

    #[error("policy {0:?} not found")]
    PolicyNotFound(PolicyId),

    #[error("payout {0:?} not found")]
    PayoutNotFound(PayoutId),

    /// Policy is not in force for the requested evaluation.
    #[error("policy {policy_id:?} not eligible for evaluation: {reason}")]
    PolicyNotEligible { policy_id: PolicyId, reason: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Errors the caller should retry later with the same idempotency key.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::InsufficientData(_) | EngineError::AlreadyInProgress(_))
    }
}
