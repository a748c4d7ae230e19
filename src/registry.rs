//! Station registry: read-only metadata for the weather stations the engine
//! trades, loaded once from `data/registry/stations.csv`.

use crate::errors::EngineResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub city: String,
    pub station_name: String,
    pub station_code: String,
    pub lat: f64,
    pub lon: f64,
    pub noaa_station: String,
    pub venue_hint: String,
    pub time_zone: String,
}

/// Keyed lookup over the station CSV. A missing or unreadable file yields an
/// empty registry with a logged warning; the engine then simply finds no
/// stations to evaluate.
#[derive(Debug, Default)]
pub struct StationRegistry {
    stations: HashMap<String, Station>,
}

impl StationRegistry {
    pub fn load(path: &Path) -> Self {
        let mut registry = Self::default();

        if !path.exists() {
            tracing::warn!(path = %path.display(), "station registry not found, registry will be empty");
            return registry;
        }

        let mut reader = match csv::Reader::from_path(path) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to open station registry");
                return registry;
            }
        };

        for record in reader.deserialize::<Station>() {
            match record {
                Ok(station) => {
                    registry
                        .stations
                        .insert(station.station_code.clone(), station);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed registry row");
                }
            }
        }

        tracing::info!(count = registry.stations.len(), "loaded station registry");
        registry
    }

    pub fn get(&self, station_code: &str) -> Option<&Station> {
        self.stations.get(station_code)
    }

    /// Case-insensitive exact match on city name.
    pub fn get_by_city(&self, city: &str) -> Option<&Station> {
        let city_lower = city.to_lowercase();
        self.stations
            .values()
            .find(|s| s.city.to_lowercase() == city_lower)
    }

    pub fn list_all(&self) -> Vec<&Station> {
        self.stations.values().collect()
    }

    pub fn list_by_timezone(&self, timezone: &str) -> Vec<&Station> {
        self.stations
            .values()
            .filter(|s| s.time_zone == timezone)
            .collect()
    }

    pub fn contains(&self, station_code: &str) -> bool {
        self.stations.contains_key(station_code)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

/// Parsed timezone for a station, surfaced as a precondition error when the
/// registry carries a bad zone name.
pub fn station_timezone(station: &Station) -> EngineResult<chrono_tz::Tz> {
    crate::timeutil::parse_timezone(&station.time_zone)
}
