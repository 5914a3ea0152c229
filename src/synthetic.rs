//! Seeded synthetic evidence for back-testing and benchmarks.
//!
//! Rainfall is a wet/dry Bernoulli day followed by a Gamma depth; temperature
//! and the vegetation deficit are Normal. The regime shifts all three.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Gamma, Normal};
use serde::{Deserialize, Serialize};

use crate::engine::{EvaluationRequest, TriggerSource};
use crate::error::{EngineError, Result};
use crate::policy::{CoverageType, Policy, PolicyStatus};
use crate::signals::{VegetationObservation, VegetationWindow, WeatherObservation, WeatherWindow};
use crate::types::{Amount, FarmerId, PlotId, PolicyId, TriggeringEventId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Drought,
    Normal,
    Flood,
}

/// Distribution parameters for one regime. PLACEHOLDER calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeProfile {
    pub wet_day_probability: f64,
    /// Gamma shape and scale (mm) of rainfall on a wet day.
    pub rain_shape: f64,
    pub rain_scale: f64,
    pub temperature_mean_c: f64,
    pub temperature_sd_c: f64,
    /// Fraction of the seasonal baseline lost by the crop.
    pub vegetation_deficit_mean: f64,
    pub vegetation_deficit_sd: f64,
}

impl Regime {
    pub fn profile(self) -> RegimeProfile {
        match self {
            Regime::Drought => RegimeProfile {
                wet_day_probability: 0.08,
                rain_shape: 0.8,
                rain_scale: 3.0,
                temperature_mean_c: 34.0,
                temperature_sd_c: 3.0,
                vegetation_deficit_mean: 0.45,
                vegetation_deficit_sd: 0.08,
            },
            Regime::Normal => RegimeProfile {
                wet_day_probability: 0.35,
                rain_shape: 0.9,
                rain_scale: 11.0,
                temperature_mean_c: 27.0,
                temperature_sd_c: 3.0,
                vegetation_deficit_mean: 0.05,
                vegetation_deficit_sd: 0.05,
            },
            Regime::Flood => RegimeProfile {
                wet_day_probability: 0.6,
                rain_shape: 1.5,
                rain_scale: 30.0,
                temperature_mean_c: 24.0,
                temperature_sd_c: 2.0,
                vegetation_deficit_mean: 0.30,
                vegetation_deficit_sd: 0.10,
            },
        }
    }
}

pub struct WindowGenerator {
    rng: ChaCha20Rng,
    profile: RegimeProfile,
    rain: Gamma<f64>,
    temperature: Normal<f64>,
    deficit: Normal<f64>,
}

fn bad_params(what: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::InvalidInput(format!("{what} distribution: {e}"))
}

impl WindowGenerator {
    pub fn new(seed: u64, regime: Regime) -> Result<Self> {
        Self::with_profile(seed, regime.profile())
    }

    pub fn with_profile(seed: u64, profile: RegimeProfile) -> Result<Self> {
        if !(0.0..=1.0).contains(&profile.wet_day_probability) {
            return Err(EngineError::InvalidInput(format!(
                "wet day probability {} outside [0, 1]",
                profile.wet_day_probability
            )));
        }
        for (name, sd) in [
            ("temperature", profile.temperature_sd_c),
            ("vegetation deficit", profile.vegetation_deficit_sd),
        ] {
            if !sd.is_finite() || sd < 0.0 {
                return Err(EngineError::InvalidInput(format!("{name} standard deviation {sd} must be finite and >= 0")));
            }
        }
        let rain = Gamma::new(profile.rain_shape, profile.rain_scale).map_err(|e| bad_params("rainfall", e))?;
        let temperature = Normal::new(profile.temperature_mean_c, profile.temperature_sd_c)
            .map_err(|e| bad_params("temperature", e))?;
        let deficit = Normal::new(profile.vegetation_deficit_mean, profile.vegetation_deficit_sd)
            .map_err(|e| bad_params("vegetation", e))?;
        Ok(WindowGenerator {
            rng: ChaCha20Rng::seed_from_u64(seed),
            profile,
            rain,
            temperature,
            deficit,
        })
    }

    /// One reading per day for `days` days, the last stamped at `end`.
    pub fn weather(&mut self, end: DateTime<Utc>, days: u32) -> WeatherWindow {
        let observations = (0..days)
            .map(|d| {
                let rainfall_mm = if self.rng.random_bool(self.profile.wet_day_probability) {
                    self.rain.sample(&mut self.rng)
                } else {
                    0.0
                };
                WeatherObservation {
                    timestamp: end - Duration::days(i64::from(days - 1 - d)),
                    rainfall_mm,
                    temperature_c: self.temperature.sample(&mut self.rng),
                }
            })
            .collect();
        WeatherWindow { window_days: days, observations }
    }

    /// `passes` satellite readings `interval_days` apart, the last at `end`.
    pub fn vegetation(
        &mut self,
        end: DateTime<Utc>,
        baseline: f64,
        passes: u32,
        interval_days: u32,
    ) -> VegetationWindow {
        let observations = (0..passes)
            .map(|p| {
                let back = i64::from((passes - 1 - p) * interval_days);
                let deficit = self.deficit.sample(&mut self.rng).clamp(0.0, 1.0);
                VegetationObservation {
                    timestamp: end - Duration::days(back),
                    index: baseline * (1.0 - deficit),
                }
            })
            .collect();
        VegetationWindow { baseline, observations }
    }

    /// 30-day weather window and six 5-day vegetation passes ending at noon on
    /// `trigger_date`.
    pub fn request(&mut self, key: impl Into<String>, trigger_date: NaiveDate) -> EvaluationRequest {
        let end = trigger_date.and_hms_opt(12, 0, 0).unwrap_or_default().and_utc();
        EvaluationRequest {
            triggering_event_id: TriggeringEventId::new(key),
            source: TriggerSource::ScheduledScan,
            trigger_date,
            weather: self.weather(end, 30),
            vegetation: self.vegetation(end, 0.6, 6, 5),
            proof_reference: None,
        }
    }
}

/// `n` active policies covering both perils for the whole `season`.
pub fn portfolio(n: u64, sum_insured: Amount, season: (NaiveDate, NaiveDate)) -> Vec<Policy> {
    (1..=n)
        .map(|i| Policy {
            id: PolicyId(i),
            farmer_id: FarmerId(i),
            plot_id: PlotId(i),
            coverage_type: CoverageType::Both,
            sum_insured,
            start_date: season.0,
            end_date: season.1,
            status: PolicyStatus::Active,
            custom_thresholds: None,
        })
        .collect()
}
