use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a concurrent evaluation of a busy policy is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardMode {
    /// Wait for the in-flight evaluation, then run (or replay its record).
    Wait,
    /// Reject immediately with `AlreadyInProgress`.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Climatological expectation used to scale the rainfall deficit.
    pub expected_rainfall_mm_per_day: f64,
    /// A day is "hot" when any reading exceeds this.
    pub heat_threshold_c: f64,
    /// Minimum fraction of window days that must carry at least one reading.
    pub min_weather_coverage: f64,
    /// Minimum vegetation readings (satellite passes) per window.
    pub min_vegetation_observations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub mode: GuardMode,
    /// Upper bound on how long a caller waits for a busy policy.
    pub lock_wait_ms: u64,
}

/// Re-evaluation cadence driven by the trigger detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// While a drought or flood is occurring.
    pub event_interval_hours: u32,
    /// Otherwise.
    pub quiet_interval_hours: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub normalization: NormalizationConfig,
    pub guard: GuardConfig,
    pub scan: ScanConfig,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        // Semi-arid smallholder baseline: ~100 mm per 30 days in season.
        NormalizationConfig {
            expected_rainfall_mm_per_day: 100.0 / 30.0,
            heat_threshold_c: 35.0,
            min_weather_coverage: 0.8,
            min_vegetation_observations: 3,
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        GuardConfig { mode: GuardMode::Wait, lock_wait_ms: 5_000 }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig { event_interval_hours: 6, quiet_interval_hours: 72 }
    }
}

impl GuardConfig {
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}

impl EngineConfig {
    pub fn canonical() -> Self {
        EngineConfig::default()
    }

    /// Parse a JSON config. Missing sections and fields fall back to canonical values.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
