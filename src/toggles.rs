//! Persisted feature toggles.
//!
//! A small JSON record of booleans read by the probability mapper and the
//! snapshotter. Defaults are written on first run; unknown keys in the file
//! are ignored so old builds can read newer files.

use crate::errors::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    pub station_calibration: bool,
}

impl FeatureToggles {
    /// Load from `data/config/feature_toggles.json`, writing defaults on
    /// first run. A corrupt file falls back to defaults with a logged error.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            let toggles = Self::default();
            if let Err(e) = toggles.save(path) {
                tracing::error!(error = %e, "failed to write default feature toggles");
            } else {
                tracing::info!(path = %path.display(), "created default feature toggles");
            }
            return toggles;
        }

        match std::fs::read_to_string(path)
            .map_err(EngineError::from)
            .and_then(|raw| serde_json::from_str(&raw).map_err(EngineError::from))
        {
            Ok(toggles) => toggles,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to load feature toggles, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body)?;
        tracing::debug!(path = %path.display(), "saved feature toggles");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_run_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/feature_toggles.json");
        let toggles = FeatureToggles::load(&path);
        assert!(!toggles.station_calibration);
        assert!(path.exists());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feature_toggles.json");
        let toggles = FeatureToggles {
            station_calibration: true,
        };
        toggles.save(&path).unwrap();
        assert!(FeatureToggles::load(&path).station_calibration);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feature_toggles.json");
        std::fs::write(
            &path,
            r#"{"station_calibration": true, "some_future_flag": 42}"#,
        )
        .unwrap();
        assert!(FeatureToggles::load(&path).station_calibration);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feature_toggles.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(!FeatureToggles::load(&path).station_calibration);
    }
}
