use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::payout::PayoutDecision;
use crate::policy::{PayoutStatus, PolicyStatus};
use crate::trigger::TriggerKind;
use crate::types::{Amount, AssessmentId, PayoutId, PolicyId, TriggeringEventId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AuditEvent {
    PolicyRegistered {
        policy_id: PolicyId,
        sum_insured: Amount,
        status: PolicyStatus,
    },
    /// Every evaluation that reached a decision, including NoPayout and
    /// CoverageExhausted.
    AssessmentRecorded {
        assessment_id: AssessmentId,
        policy_id: PolicyId,
        triggering_event_id: TriggeringEventId,
        trigger: TriggerKind,
        decision: PayoutDecision,
    },
    PayoutCreated {
        payout_id: PayoutId,
        policy_id: PolicyId,
        assessment_id: AssessmentId,
        amount: Amount,
    },
    PayoutStatusChanged {
        payout_id: PayoutId,
        from: PayoutStatus,
        to: PayoutStatus,
        /// True when a human operator drove the change.
        manual: bool,
    },
    PolicyStatusChanged {
        policy_id: PolicyId,
        from: PolicyStatus,
        to: PolicyStatus,
        /// Set for admin overrides.
        reason: Option<String>,
    },
}

/// One append-only audit record. Serialized one per line (NDJSON).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub event: AuditEvent,
}

pub type AuditLog = Vec<AuditEntry>;

/// Write entries as NDJSON.
pub fn write_ndjson<W: std::io::Write>(entries: &[AuditEntry], mut writer: W) -> std::io::Result<()> {
    for entry in entries {
        serde_json::to_writer(&mut writer, entry)?;
        writeln!(writer)?;
    }
    writer.flush()
}
