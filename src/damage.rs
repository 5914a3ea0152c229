use crate::error::{EngineError, Result};
use crate::params::{DI_VEGETATION_WEIGHT, DI_WEATHER_WEIGHT};

/// Fuse the two stress indices: DI = 0.6 · WSI + 0.4 · VSI.
pub fn calculate_damage_index(wsi: f64, vsi: f64) -> Result<f64> {
    check_unit("weather stress index", wsi)?;
    check_unit("vegetation stress index", vsi)?;
    Ok((DI_WEATHER_WEIGHT * wsi + DI_VEGETATION_WEIGHT * vsi).clamp(0.0, 1.0))
}

pub(crate) fn check_unit(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(EngineError::InvalidInput(format!("{name} {value} outside [0, 1]")));
    }
    Ok(())
}
