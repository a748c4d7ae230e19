//! Per-station bias calibration.
//!
//! Each station may carry a model file `station_calibration_<CODE>.json`
//! holding a smoothed 12x24 (month x hour) bias matrix in °C plus an
//! elevation offset. The total correction for a reading at UTC timestamp `t`
//! is `bias[month(t)-1][hour(t)] + elevation_offset_c`, applied K -> C ->
//! corrected C -> K. Stations without a model pass through unchanged.

use crate::errors::{EngineError, EngineResult};
use crate::types::Forecast;
use crate::units;
use chrono::{Datelike, Timelike};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const MONTHS: usize = 12;
const HOURS: usize = 24;

#[derive(Debug, Clone, Deserialize)]
struct CalibrationFile {
    station: String,
    #[serde(default)]
    version: Option<String>,
    bias_model: BiasModel,
    elevation: Elevation,
}

#[derive(Debug, Clone, Deserialize)]
struct BiasModel {
    bias_matrix_smoothed: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
struct Elevation {
    elevation_offset_c: f64,
}

/// Validated calibration model for one station.
#[derive(Debug, Clone)]
pub struct CalibrationModel {
    pub station: String,
    pub elevation_offset_c: f64,
    bias_matrix: [[f64; HOURS]; MONTHS],
}

impl CalibrationModel {
    fn from_file(file: CalibrationFile) -> EngineResult<Self> {
        if file.bias_model.bias_matrix_smoothed.len() != MONTHS {
            return Err(EngineError::Precondition(format!(
                "bias matrix for {} has {} rows, expected {MONTHS}",
                file.station,
                file.bias_model.bias_matrix_smoothed.len()
            )));
        }
        let mut matrix = [[0.0; HOURS]; MONTHS];
        for (m, row) in file.bias_model.bias_matrix_smoothed.iter().enumerate() {
            if row.len() != HOURS {
                return Err(EngineError::Precondition(format!(
                    "bias matrix for {} month {} has {} columns, expected {HOURS}",
                    file.station,
                    m + 1,
                    row.len()
                )));
            }
            matrix[m].copy_from_slice(row);
        }
        Ok(Self {
            station: file.station.to_uppercase(),
            elevation_offset_c: file.elevation.elevation_offset_c,
            bias_matrix: matrix,
        })
    }

    /// Total correction in °C. `month` is 1-12 externally; the matrix is
    /// 0-indexed internally. Out-of-range indices are programmer errors.
    pub fn correction(&self, month: u32, hour: u32) -> f64 {
        assert!((1..=12).contains(&month), "month out of range: {month}");
        assert!(hour < 24, "hour out of range: {hour}");
        self.bias_matrix[(month - 1) as usize][hour as usize] + self.elevation_offset_c
    }
}

/// All calibration models found on disk, keyed by station code.
#[derive(Debug, Default)]
pub struct CalibrationStore {
    models: HashMap<String, CalibrationModel>,
}

impl CalibrationStore {
    /// Scan `data/calibration/` for `station_calibration_*.json`. Missing
    /// directory or malformed files are logged and skipped.
    pub fn load(dir: &Path) -> Self {
        let mut store = Self::default();

        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => {
                tracing::warn!(dir = %dir.display(), "calibration directory not found, no calibrations applied");
                return store;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with("station_calibration_") || !name.ends_with(".json") {
                continue;
            }
            match Self::load_one(&path) {
                Ok(model) => {
                    tracing::info!(station = %model.station, "loaded calibration model");
                    store.models.insert(model.station.clone(), model);
                }
                Err(e) => {
                    tracing::error!(path = %name, error = %e, "skipping calibration file");
                }
            }
        }

        tracing::info!(count = store.models.len(), "calibration models loaded");
        store
    }

    fn load_one(path: &Path) -> EngineResult<CalibrationModel> {
        let raw = std::fs::read_to_string(path)?;
        let file: CalibrationFile = serde_json::from_str(&raw)?;
        if file.station.is_empty() {
            return Err(EngineError::Precondition(
                "calibration file missing station code".into(),
            ));
        }
        if let Some(v) = &file.version {
            tracing::debug!(station = %file.station, version = %v, "calibration version");
        }
        CalibrationModel::from_file(file)
    }

    pub fn has(&self, station_code: &str) -> bool {
        self.models.contains_key(&station_code.to_uppercase())
    }

    pub fn get(&self, station_code: &str) -> Option<&CalibrationModel> {
        self.models.get(&station_code.to_uppercase())
    }

    pub fn loaded_stations(&self) -> Vec<&str> {
        self.models.keys().map(|s| s.as_str()).collect()
    }

    /// Apply the station's correction to every point of a forecast,
    /// producing a new series. Returns the input unchanged when no model
    /// exists for the station.
    pub fn apply_to_forecast(&self, forecast: &Forecast, station_code: &str) -> Forecast {
        let Some(model) = self.get(station_code) else {
            return forecast.clone();
        };

        let mut corrected = forecast.clone();
        for point in &mut corrected.points {
            let month = point.time_utc.month();
            let hour = point.time_utc.hour();
            let temp_c = units::kelvin_to_celsius(point.temp_k);
            let adjusted = temp_c + model.correction(month, hour);
            point.temp_k = units::celsius_to_kelvin(adjusted);
        }

        tracing::debug!(
            station = station_code,
            points = corrected.points.len(),
            "applied station calibration"
        );
        corrected
    }
}
