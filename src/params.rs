//! Business-rule parameters for damage assessment and payout.
//!
//! These values set risk pricing. They are deliberately not part of
//! `EngineConfig`: changing any of them is a new parameter version, and
//! `PARAMS_VERSION` is stamped on every recorded assessment so a historical
//! decision can be replayed against the rules that produced it.

/// Bump whenever any constant below changes.
pub const PARAMS_VERSION: u32 = 1;

// ── Weather stress index ─────────────────────────────────────────────────────

/// Share of WSI attributed to rainfall deficit.
pub const WSI_RAINFALL_WEIGHT: f64 = 0.7;
/// Share of WSI attributed to heat stress.
pub const WSI_HEAT_WEIGHT: f64 = 0.3;

// ── Damage index fusion ──────────────────────────────────────────────────────

/// Weather signal is immediate; weighted higher.
pub const DI_WEATHER_WEIGHT: f64 = 0.6;
/// Vegetation signal lags but confirms ground impact.
pub const DI_VEGETATION_WEIGHT: f64 = 0.4;

// ── Payout ramp ──────────────────────────────────────────────────────────────

/// DI at or above which a payout is due (inclusive).
pub const PAYOUT_THRESHOLD: f64 = 0.3;
/// Payout percentage at exactly `PAYOUT_THRESHOLD`.
pub const PAYOUT_FLOOR_PCT: f64 = 0.30;
/// Payout percentage at DI = 1.0.
pub const PAYOUT_CEILING_PCT: f64 = 1.00;

// ── Claim flagging ───────────────────────────────────────────────────────────

/// DI at or above which an Active policy is flagged Claimed.
pub const SEVERE_DAMAGE_INDEX: f64 = 0.7;
/// Payout / sum insured ratio at or above which an Active policy is flagged Claimed.
pub const CLAIM_FLAG_PAYOUT_RATIO: f64 = 0.8;

// ── Trigger defaults (overridable per policy) ────────────────────────────────

pub const DEFAULT_DROUGHT_RAINFALL_MM: f64 = 30.0;
pub const DEFAULT_DROUGHT_PERIOD_DAYS: u32 = 30;
pub const DEFAULT_FLOOD_RAINFALL_MM: f64 = 150.0;
pub const DEFAULT_FLOOD_PERIOD_HOURS: u32 = 48;
