//! Bands model: uncertainty from the forecast's one-sided confidence bounds.
//!
//! When the forecast carries 80% ("likely") and 95% ("possible") upper
//! bounds on the daily high, sigma is derived from each band's z-score and
//! averaged. Without bands this falls back to the spread formula -- the
//! configured confidence levels do not reshape the fallback.

use super::{spread, DailyHigh, SigmaBounds};
use crate::types::Forecast;

/// One-sided z-scores for the band confidence levels.
const Z_80: f64 = 0.8416;
const Z_95: f64 = 1.6449;

pub fn daily_high(forecast: &Forecast, bounds: SigmaBounds) -> DailyHigh {
    let (Some(likely_upper), Some(possible_upper)) =
        (forecast.likely_upper_f, forecast.possible_upper_f)
    else {
        tracing::debug!("confidence bands absent, falling back to spread model");
        return spread::daily_high(forecast, bounds);
    };

    let temps_f = forecast.temps_f();
    let mu = temps_f.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let sigma_1 = (likely_upper - mu).abs() / Z_80;
    let sigma_2 = (possible_upper - mu).abs() / Z_95;
    let sigma = ((sigma_1 + sigma_2) / 2.0).clamp(bounds.sigma_min, bounds.sigma_max);

    tracing::debug!(
        sigma_likely = sigma_1,
        sigma_possible = sigma_2,
        sigma = sigma,
        "band-derived sigma"
    );

    DailyHigh { mu_f: mu, sigma_f: sigma }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prob::forecast_from_temps_f;

    #[test]
    fn test_sigma_from_bands() {
        let mut forecast = forecast_from_temps_f(&[58.0, 60.0, 59.0]);
        forecast.likely_upper_f = Some(61.6832); // mu + 2*Z_80 -> sigma_1 = 2.0
        forecast.possible_upper_f = Some(63.2898); // mu + 2*Z_95 -> sigma_2 = 2.0
        let high = daily_high(&forecast, SigmaBounds::default());
        assert!((high.mu_f - 60.0).abs() < 1e-9);
        assert!((high.sigma_f - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_sigma_averages_disagreeing_bands() {
        let mut forecast = forecast_from_temps_f(&[60.0, 60.0]);
        forecast.likely_upper_f = Some(60.0 + Z_80); // sigma_1 = 1.0
        forecast.possible_upper_f = Some(60.0 + 3.0 * Z_95); // sigma_2 = 3.0
        let high = daily_high(&forecast, SigmaBounds::default());
        assert!((high.sigma_f - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_sigma_clamped() {
        let mut forecast = forecast_from_temps_f(&[60.0, 60.0]);
        forecast.likely_upper_f = Some(60.05);
        forecast.possible_upper_f = Some(60.05);
        let bounds = SigmaBounds::default();
        let high = daily_high(&forecast, bounds);
        assert!((high.sigma_f - bounds.sigma_min).abs() < 1e-12);
    }

    #[test]
    fn test_fallback_matches_spread() {
        let forecast = forecast_from_temps_f(&[55.0, 58.0, 62.0, 60.0]);
        let bounds = SigmaBounds::default();
        let from_bands = daily_high(&forecast, bounds);
        let from_spread = spread::daily_high(&forecast, bounds);
        assert_eq!(from_bands.mu_f, from_spread.mu_f);
        assert_eq!(from_bands.sigma_f, from_spread.sigma_f);
    }
}
