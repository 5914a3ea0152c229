//! Weather and vegetation stress indices.
//!
//! Both normalizers are pure functions of the window they are handed and
//! fail closed: a window too sparse to judge is `InsufficientData`, never a
//! silent 0 or 1.

use std::collections::BTreeSet;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::NormalizationConfig;
use crate::error::{EngineError, Result};
use crate::params::{WSI_HEAT_WEIGHT, WSI_RAINFALL_WEIGHT};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub timestamp: DateTime<Utc>,
    pub rainfall_mm: f64,
    pub temperature_c: f64,
}

/// Ordered weather readings covering `window_days` days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherWindow {
    pub window_days: u32,
    pub observations: Vec<WeatherObservation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VegetationObservation {
    pub timestamp: DateTime<Utc>,
    /// Vegetation/biomass proxy, e.g. NDVI.
    pub index: f64,
}

/// Vegetation readings with the plot's historical baseline for the same season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VegetationWindow {
    pub baseline: f64,
    pub observations: Vec<VegetationObservation>,
}

/// Weather stress index in [0, 1].
///
/// WSI = 0.7 · rainfall stress + 0.3 · heat stress, where rainfall stress is
/// the fractional deficit against the expected total for the window and heat
/// stress is the fraction of window days with a reading above the heat
/// threshold.
pub fn normalize_weather(window: &WeatherWindow, config: &NormalizationConfig) -> Result<f64> {
    if window.window_days == 0 {
        return Err(EngineError::InvalidInput("weather window_days must be > 0".into()));
    }
    if window.observations.is_empty() {
        return Err(EngineError::InsufficientData("weather window is empty".into()));
    }
    check_ordered(window.observations.iter().map(|o| o.timestamp), "weather")?;

    // Only the trailing `window_days` calendar days ending at the latest
    // reading count; anything older is outside the window.
    let first_day = window
        .observations
        .last()
        .map(|o| o.timestamp.date_naive())
        .and_then(|latest| latest.checked_sub_days(Days::new(u64::from(window.window_days - 1))))
        .unwrap_or(NaiveDate::MIN);

    let mut total_rain = 0.0;
    let mut observed_days: BTreeSet<NaiveDate> = BTreeSet::new();
    let mut hot_days: BTreeSet<NaiveDate> = BTreeSet::new();
    for obs in window.observations.iter().filter(|o| o.timestamp.date_naive() >= first_day) {
        if !obs.rainfall_mm.is_finite() || obs.rainfall_mm < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "rainfall {} mm at {}",
                obs.rainfall_mm, obs.timestamp
            )));
        }
        if !obs.temperature_c.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "temperature {} at {}",
                obs.temperature_c, obs.timestamp
            )));
        }
        let day = obs.timestamp.date_naive();
        observed_days.insert(day);
        if obs.temperature_c > config.heat_threshold_c {
            hot_days.insert(day);
        }
        total_rain += obs.rainfall_mm;
    }

    let window_days = f64::from(window.window_days);
    let coverage = observed_days.len() as f64 / window_days;
    if coverage < config.min_weather_coverage {
        return Err(EngineError::InsufficientData(format!(
            "{} of {} days observed (need {:.0}%)",
            observed_days.len(),
            window.window_days,
            config.min_weather_coverage * 100.0
        )));
    }

    let expected = config.expected_rainfall_mm_per_day * window_days;
    if !expected.is_finite() || expected <= 0.0 {
        return Err(EngineError::InvalidInput("expected rainfall must be > 0".into()));
    }
    let deficit = (expected - total_rain).max(0.0);
    let rainfall_stress = (deficit / expected).min(1.0);
    let heat_stress = (hot_days.len() as f64 / window_days).min(1.0);

    Ok(clip_unit(WSI_RAINFALL_WEIGHT * rainfall_stress + WSI_HEAT_WEIGHT * heat_stress))
}

/// Vegetation stress index in [0, 1]: fractional deficit of the mean proxy
/// reading below the historical baseline.
pub fn normalize_vegetation(
    window: &VegetationWindow,
    config: &NormalizationConfig,
) -> Result<f64> {
    if !window.baseline.is_finite() || window.baseline <= 0.0 {
        return Err(EngineError::InvalidInput(format!(
            "vegetation baseline {} must be positive",
            window.baseline
        )));
    }
    if window.observations.len() < config.min_vegetation_observations.max(1) {
        return Err(EngineError::InsufficientData(format!(
            "{} vegetation readings (need {})",
            window.observations.len(),
            config.min_vegetation_observations.max(1)
        )));
    }
    check_ordered(window.observations.iter().map(|o| o.timestamp), "vegetation")?;

    let mut sum = 0.0;
    for obs in &window.observations {
        if !obs.index.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "vegetation index {} at {}",
                obs.index, obs.timestamp
            )));
        }
        sum += obs.index;
    }
    let mean = sum / window.observations.len() as f64;
    Ok(clip_unit((window.baseline - mean) / window.baseline))
}

fn check_ordered(mut stamps: impl Iterator<Item = DateTime<Utc>>, what: &str) -> Result<()> {
    let Some(mut prev) = stamps.next() else {
        return Ok(());
    };
    for ts in stamps {
        if ts < prev {
            return Err(EngineError::InvalidInput(format!(
                "{what} observations out of order at {ts}"
            )));
        }
        prev = ts;
    }
    Ok(())
}

fn clip_unit(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}
