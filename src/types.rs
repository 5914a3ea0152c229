use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FarmerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlotId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssessmentId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PayoutId(pub u64);

/// Idempotency key for one real-world evaluation trigger: a webhook delivery
/// id, a scheduled-scan time bucket, or an operator ticket. Upstream delivery
/// is at-least-once, so the same key may arrive many times.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TriggeringEventId(pub String);

impl TriggeringEventId {
    pub fn new(key: impl Into<String>) -> Self {
        TriggeringEventId(key.into())
    }

    /// Key for a periodic scan: one per policy per `bucket_hours` window, so
    /// overlapping schedulers collapse onto the same evaluation.
    pub fn scan_bucket(at: chrono::DateTime<chrono::Utc>, bucket_hours: u32) -> Self {
        let bucket_secs = i64::from(bucket_hours.max(1)) * 3600;
        let bucket = at.timestamp().div_euclid(bucket_secs);
        TriggeringEventId(format!("scan:{bucket_hours}h:{bucket}"))
    }
}

impl fmt::Display for TriggeringEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monetary amount in minor currency units (e.g. cents).
pub type Amount = u64;
