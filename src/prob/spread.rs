//! Spread model: uncertainty from the empirical spread of the hourly series.
//!
//! mu = max(hourly °F), sigma = population std of the hourly series scaled
//! by sqrt(2) -- the daily high carries more variance than a typical hourly
//! reading -- floored at sigma_default/2 and clamped to the configured
//! bounds. A single-point series gets sigma_default.

use super::{DailyHigh, SigmaBounds};
use crate::types::Forecast;

pub fn daily_high(forecast: &Forecast, bounds: SigmaBounds) -> DailyHigh {
    let temps_f = forecast.temps_f();
    let mu = temps_f.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let sigma = if temps_f.len() > 1 {
        let empirical = super::population_std(&temps_f);
        let scaled = (empirical * std::f64::consts::SQRT_2).max(bounds.sigma_default * 0.5);
        scaled.clamp(bounds.sigma_min, bounds.sigma_max)
    } else {
        bounds.sigma_default
    };

    DailyHigh { mu_f: mu, sigma_f: sigma }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prob::forecast_from_temps_f;

    #[test]
    fn test_mu_is_series_max() {
        let forecast = forecast_from_temps_f(&[50.0, 55.0, 61.5, 58.0]);
        let high = daily_high(&forecast, SigmaBounds::default());
        assert!((high.mu_f - 61.5).abs() < 1e-9);
    }

    #[test]
    fn test_sigma_scales_spread_by_sqrt2() {
        // Pop std of [58, 62] = 2.0, scaled by sqrt(2) ~ 2.828.
        let forecast = forecast_from_temps_f(&[58.0, 62.0]);
        let high = daily_high(&forecast, SigmaBounds::default());
        assert!((high.sigma_f - 2.0 * std::f64::consts::SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn test_sigma_floor_for_flat_series() {
        let forecast = forecast_from_temps_f(&[60.0; 24]);
        let high = daily_high(&forecast, SigmaBounds::default());
        // Flat series: empirical std 0, floored at sigma_default/2 = 1.0.
        assert!((high.sigma_f - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sigma_clamped_to_max() {
        let forecast = forecast_from_temps_f(&[20.0, 90.0]);
        let bounds = SigmaBounds::default();
        let high = daily_high(&forecast, bounds);
        assert!((high.sigma_f - bounds.sigma_max).abs() < 1e-12);
    }

    #[test]
    fn test_single_point_uses_default() {
        let forecast = forecast_from_temps_f(&[60.0]);
        let bounds = SigmaBounds::default();
        let high = daily_high(&forecast, bounds);
        assert!((high.sigma_f - bounds.sigma_default).abs() < 1e-12);
    }
}
