//! Probability mapper: converts an hourly forecast into a probability
//! distribution over the event's temperature brackets.
//!
//! Pipeline: optional station calibration, then a daily-high distribution
//! N(mu, sigma^2) from one of two models, then CDF differencing per bracket
//! and renormalization. Both models are pure given their inputs.

pub mod bands;
pub mod spread;

use crate::calibration::CalibrationStore;
use crate::config::ModelMode;
use crate::errors::{EngineError, EngineResult};
use crate::toggles::FeatureToggles;
use crate::types::{Bracket, BracketProb, Forecast};
use statrs::distribution::{ContinuousCDF, Normal};

/// Bounds on the daily-high uncertainty estimate, in °F.
#[derive(Debug, Clone, Copy)]
pub struct SigmaBounds {
    pub sigma_default: f64,
    pub sigma_min: f64,
    pub sigma_max: f64,
}

impl Default for SigmaBounds {
    fn default() -> Self {
        Self {
            sigma_default: 2.0,
            sigma_min: 0.5,
            sigma_max: 10.0,
        }
    }
}

/// The daily-high distribution parameters derived from a forecast.
#[derive(Debug, Clone, Copy)]
pub struct DailyHigh {
    pub mu_f: f64,
    pub sigma_f: f64,
}

/// Map a forecast onto bracket probabilities.
///
/// Calibration is applied first when the toggle is on and a model exists for
/// the station; the calibrated series is a copy, the input is not mutated.
/// Post-condition: probabilities sum to 1 within 1e-6 and each lies in [0,1].
pub fn map_daily_high(
    forecast: &Forecast,
    brackets: &[Bracket],
    mode: ModelMode,
    bounds: SigmaBounds,
    toggles: &FeatureToggles,
    calibration: &CalibrationStore,
) -> EngineResult<Vec<BracketProb>> {
    if forecast.points.is_empty() {
        return Err(EngineError::Precondition(
            "forecast has no timeseries data".into(),
        ));
    }
    if brackets.is_empty() {
        return Err(EngineError::Precondition("no brackets provided".into()));
    }

    let calibrated;
    let effective = if toggles.station_calibration && calibration.has(&forecast.station_code) {
        calibrated = calibration.apply_to_forecast(forecast, &forecast.station_code);
        tracing::info!(station = %forecast.station_code, "station calibration applied");
        &calibrated
    } else {
        forecast
    };

    let high = match mode {
        ModelMode::Spread => spread::daily_high(effective, bounds),
        ModelMode::Bands => bands::daily_high(effective, bounds),
    };

    tracing::debug!(
        station = %forecast.station_code,
        mu = high.mu_f,
        sigma = high.sigma_f,
        brackets = brackets.len(),
        "daily-high distribution"
    );

    Ok(distribute(&high, brackets))
}

/// CDF-difference each bracket, clamp floating-point negatives to zero, and
/// normalize to a proper distribution. A degenerate all-zero mass (every
/// bracket far into a tail) is spread uniformly.
fn distribute(high: &DailyHigh, brackets: &[Bracket]) -> Vec<BracketProb> {
    let normal = Normal::standard();

    let mut probs: Vec<BracketProb> = brackets
        .iter()
        .map(|bracket| {
            let z_lower = (bracket.lower_f as f64 - high.mu_f) / high.sigma_f;
            let z_upper = (bracket.upper_f as f64 - high.mu_f) / high.sigma_f;
            let p = (normal.cdf(z_upper) - normal.cdf(z_lower)).max(0.0);
            BracketProb {
                bracket: bracket.clone(),
                p_zeus: p,
                p_mkt: None,
                sigma_z: Some(high.sigma_f),
            }
        })
        .collect();

    let total: f64 = probs.iter().map(|bp| bp.p_zeus).sum();
    if total == 0.0 {
        tracing::warn!("all bracket probabilities zero, distributing evenly");
        let uniform = 1.0 / probs.len() as f64;
        for bp in &mut probs {
            bp.p_zeus = uniform;
        }
    } else {
        for bp in &mut probs {
            bp.p_zeus /= total;
        }
    }

    probs
}

/// Population standard deviation (biased, divisor n).
pub(crate) fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    var.sqrt()
}

#[cfg(test)]
pub(crate) fn forecast_from_temps_f(temps_f: &[f64]) -> Forecast {
    use chrono::{Duration, TimeZone, Utc};
    let start = Utc.with_ymd_and_hms(2025, 11, 12, 0, 0, 0).unwrap();
    Forecast {
        points: temps_f
            .iter()
            .enumerate()
            .map(|(i, &t)| crate::types::ForecastPoint {
                time_utc: start + Duration::hours(i as i64),
                temp_k: crate::units::fahrenheit_to_kelvin(t),
            })
            .collect(),
        station_code: "KLGA".into(),
        lat: 40.78,
        lon: -73.87,
        fetch_time: start,
        likely_upper_f: None,
        possible_upper_f: None,
    }
}
