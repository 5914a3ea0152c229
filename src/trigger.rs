//! Drought / flood event detection.
//!
//! Answers "is an event occurring" from raw rainfall totals, independent of
//! how large the damage index is. The result gates how often a policy is
//! re-evaluated; it does not feed the payout formula.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ScanConfig;
use crate::params::{
    DEFAULT_DROUGHT_PERIOD_DAYS, DEFAULT_DROUGHT_RAINFALL_MM, DEFAULT_FLOOD_PERIOD_HOURS,
    DEFAULT_FLOOD_RAINFALL_MM,
};
use crate::policy::{CoverageType, CustomThresholds};
use crate::signals::WeatherObservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerKind {
    Drought,
    Flood,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerThresholds {
    pub drought_rainfall_mm: f64,
    pub drought_period_days: u32,
    pub flood_rainfall_mm: f64,
    pub flood_period_hours: u32,
}

impl Default for TriggerThresholds {
    fn default() -> Self {
        TriggerThresholds {
            drought_rainfall_mm: DEFAULT_DROUGHT_RAINFALL_MM,
            drought_period_days: DEFAULT_DROUGHT_PERIOD_DAYS,
            flood_rainfall_mm: DEFAULT_FLOOD_RAINFALL_MM,
            flood_period_hours: DEFAULT_FLOOD_PERIOD_HOURS,
        }
    }
}

impl TriggerThresholds {
    /// Defaults with any per-policy overrides applied field by field.
    pub fn for_policy(custom: Option<&CustomThresholds>) -> Self {
        let d = TriggerThresholds::default();
        let Some(c) = custom else {
            return d;
        };
        TriggerThresholds {
            drought_rainfall_mm: c.drought_rainfall_mm.unwrap_or(d.drought_rainfall_mm),
            drought_period_days: c.drought_period_days.unwrap_or(d.drought_period_days),
            flood_rainfall_mm: c.flood_rainfall_mm.unwrap_or(d.flood_rainfall_mm),
            flood_period_hours: c.flood_period_hours.unwrap_or(d.flood_period_hours),
        }
    }
}

/// Classify the trailing window ending at the latest observation.
///
/// Flood wins when both fire: it is the acute event. Drought is only asserted
/// when the observations reach back across the whole drought period, so a
/// short window never reads as a dry spell.
pub fn detect(
    observations: &[WeatherObservation],
    thresholds: &TriggerThresholds,
    coverage: CoverageType,
) -> TriggerKind {
    let Some(latest) = observations.iter().map(|o| o.timestamp).max() else {
        return TriggerKind::None;
    };
    let earliest = observations.iter().map(|o| o.timestamp).min().unwrap_or(latest);

    if coverage.covers_flood() {
        let since = latest - Duration::hours(i64::from(thresholds.flood_period_hours));
        let rain = rainfall_after(observations, since);
        if rain > thresholds.flood_rainfall_mm {
            return TriggerKind::Flood;
        }
    }

    if coverage.covers_drought() {
        let period = Duration::days(i64::from(thresholds.drought_period_days));
        // Daily readings stamp one instant per day; allow a day of slack at the start.
        let spans_period = latest - earliest >= period - Duration::days(1);
        if spans_period {
            let rain = rainfall_after(observations, latest - period);
            if rain < thresholds.drought_rainfall_mm {
                return TriggerKind::Drought;
            }
        }
    }

    TriggerKind::None
}

fn rainfall_after(observations: &[WeatherObservation], since: DateTime<Utc>) -> f64 {
    observations
        .iter()
        .filter(|o| o.timestamp > since)
        .map(|o| o.rainfall_mm.max(0.0))
        .sum()
}

/// How long until the policy should be scanned again.
pub fn next_scan_interval(trigger: TriggerKind, scan: &ScanConfig) -> Duration {
    let hours = match trigger {
        TriggerKind::Drought | TriggerKind::Flood => scan.event_interval_hours,
        TriggerKind::None => scan.quiet_interval_hours,
    };
    Duration::hours(i64::from(hours))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::tests::{daily_weather, day};

    fn hourly_rain(hours: i64, mm_per_hour: f64) -> Vec<WeatherObservation> {
        (0..hours)
            .map(|h| WeatherObservation {
                timestamp: day(0) + Duration::hours(h),
                rainfall_mm: mm_per_hour,
                temperature_c: 22.0,
            })
            .collect()
    }

    #[test]
    fn dry_month_is_drought() {
        let w = daily_weather(30, 0.5, 30.0); // 15 mm < 30 mm
        let t = detect(&w.observations, &TriggerThresholds::default(), CoverageType::Both);
        assert_eq!(t, TriggerKind::Drought);
    }

    #[test]
    fn normal_month_is_none() {
        let w = daily_weather(30, 3.0, 25.0);
        let t = detect(&w.observations, &TriggerThresholds::default(), CoverageType::Both);
        assert_eq!(t, TriggerKind::None);
    }

    #[test]
    fn short_dry_window_is_not_drought() {
        let w = daily_weather(10, 0.0, 30.0);
        let t = detect(&w.observations, &TriggerThresholds::default(), CoverageType::Drought);
        assert_eq!(t, TriggerKind::None);
    }

    #[test]
    fn heavy_rain_in_48h_is_flood() {
        let obs = hourly_rain(48, 4.0); // 192 mm
        let t = detect(&obs, &TriggerThresholds::default(), CoverageType::Both);
        assert_eq!(t, TriggerKind::Flood);
    }

    #[test]
    fn flood_ignored_for_drought_only_cover() {
        let obs = hourly_rain(48, 4.0);
        let t = detect(&obs, &TriggerThresholds::default(), CoverageType::Drought);
        assert_eq!(t, TriggerKind::None);
    }

    #[test]
    fn custom_thresholds_override_defaults() {
        let custom = CustomThresholds {
            drought_rainfall_mm: Some(10.0),
            drought_period_days: Some(14),
            ..Default::default()
        };
        let th = TriggerThresholds::for_policy(Some(&custom));
        assert_eq!(th.drought_period_days, 14);
        assert_eq!(th.flood_period_hours, DEFAULT_FLOOD_PERIOD_HOURS);

        // 14 × 0.5 = 7 mm < 10 mm over 14 days
        let w = daily_weather(14, 0.5, 25.0);
        assert_eq!(detect(&w.observations, &th, CoverageType::Drought), TriggerKind::Drought);
        // 14 × 1.0 = 14 mm ≥ 10 mm
        let w = daily_weather(14, 1.0, 25.0);
        assert_eq!(detect(&w.observations, &th, CoverageType::Drought), TriggerKind::None);
    }

    #[test]
    fn empty_window_is_none() {
        assert_eq!(
            detect(&[], &TriggerThresholds::default(), CoverageType::Both),
            TriggerKind::None
        );
    }

    #[test]
    fn cadence_tightens_during_event() {
        let scan = ScanConfig { event_interval_hours: 6, quiet_interval_hours: 72 };
        assert_eq!(next_scan_interval(TriggerKind::Flood, &scan), Duration::hours(6));
        assert_eq!(next_scan_interval(TriggerKind::None, &scan), Duration::hours(72));
    }
}
