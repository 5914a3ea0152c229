//! Many evaluations against one engine, in parallel.
//!
//! Requests for distinct policies run concurrently; requests for the same
//! policy go through the engine's per-policy guard like any other caller.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::{Engine, EvaluationRequest};
use crate::ledger::{EvaluationRecord, Outcome, PolicyStore};
use crate::policy::Policy;
use crate::types::{Amount, PolicyId, TriggeringEventId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub policy_id: PolicyId,
    #[serde(flatten)]
    pub request: EvaluationRequest,
}

/// Input file for the `evaluate` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchInput {
    #[serde(default)]
    pub policies: Vec<Policy>,
    pub requests: Vec<BatchRequest>,
}

impl BatchInput {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Recorded { record: Box<EvaluationRecord> },
    Rejected { error: String, retryable: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub policy_id: PolicyId,
    pub triggering_event_id: TriggeringEventId,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub evaluated: usize,
    pub payouts: usize,
    pub no_payout: usize,
    pub coverage_exhausted: usize,
    pub replayed: usize,
    pub rejected: usize,
    pub retryable: usize,
    pub total_paid: Amount,
}

/// Results come back in request order.
pub fn run_batch<S: PolicyStore>(engine: &Engine<S>, requests: &[BatchRequest]) -> Vec<BatchResult> {
    let results: Vec<BatchResult> = requests
        .par_iter()
        .map(|r| {
            let outcome = match engine.evaluate(r.policy_id, &r.request) {
                Ok(record) => BatchOutcome::Recorded { record: Box::new(record) },
                Err(e) => BatchOutcome::Rejected { error: e.to_string(), retryable: e.is_retryable() },
            };
            BatchResult {
                policy_id: r.policy_id,
                triggering_event_id: r.request.triggering_event_id.clone(),
                outcome,
            }
        })
        .collect();
    let summary = summarize(&results);
    info!(
        evaluated = summary.evaluated,
        payouts = summary.payouts,
        rejected = summary.rejected,
        total_paid = summary.total_paid,
        "batch complete"
    );
    results
}

pub fn summarize(results: &[BatchResult]) -> BatchSummary {
    let mut s = BatchSummary { evaluated: results.len(), ..BatchSummary::default() };
    for r in results {
        match &r.outcome {
            BatchOutcome::Recorded { record } => {
                if record.replayed {
                    s.replayed += 1;
                }
                match record.outcome() {
                    Outcome::Payout { amount, .. } => {
                        s.payouts += 1;
                        if !record.replayed {
                            s.total_paid += amount;
                        }
                    }
                    Outcome::NoPayout => s.no_payout += 1,
                    Outcome::CoverageExhausted => s.coverage_exhausted += 1,
                }
            }
            BatchOutcome::Rejected { retryable, .. } => {
                s.rejected += 1;
                if *retryable {
                    s.retryable += 1;
                }
            }
        }
    }
    s
}
