//! Timestamped snapshots for replay backtesting.
//!
//! Four independent streams under one root: forecast, market, decision, and
//! observation. The first three share the cycle timestamp as filename key so
//! a consumer can join them; observations are keyed by observation time and
//! written at most once, surviving process restarts (the on-disk filename is
//! the dedup key).

use crate::errors::{EngineError, EngineResult};
use crate::metar::MetarObservation;
use crate::registry::Station;
use crate::timeutil;
use crate::types::{Bracket, BracketProb, EdgeDecision, Forecast};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Snapshotter {
    base_dir: PathBuf,
    /// (station_code, observation time RFC3339) pairs already written.
    saved_observations: HashSet<(String, String)>,
}

// ── Snapshot payloads ──

#[derive(Debug, Serialize)]
struct ForecastSnapshot<'a> {
    fetch_time_utc: String,
    forecast_for_local_day: String,
    station_code: &'a str,
    city: &'a str,
    timezone: &'a str,
    timeseries_count: usize,
    timeseries: Vec<ForecastPointSnapshot>,
}

#[derive(Debug, Serialize)]
struct ForecastPointSnapshot {
    time_utc: String,
    temp_k: f64,
}

#[derive(Debug, Serialize)]
struct MarketSnapshot<'a> {
    fetch_time_utc: String,
    event_day: String,
    city: &'a str,
    markets: Vec<MarketEntry>,
}

#[derive(Debug, Serialize)]
struct MarketEntry {
    market_id: Option<String>,
    bracket: String,
    lower_f: i32,
    upper_f: i32,
    mid_price: Option<f64>,
    closed: Option<bool>,
}

#[derive(Debug, Serialize)]
struct DecisionSnapshot<'a> {
    decision_time_utc: String,
    event_day: String,
    station_code: &'a str,
    city: &'a str,
    trade_count: usize,
    decisions: Vec<DecisionEntry>,
}

#[derive(Debug, Serialize)]
struct DecisionEntry {
    bracket: String,
    lower_f: i32,
    upper_f: i32,
    market_id: Option<String>,
    edge: f64,
    edge_pct: f64,
    f_kelly: f64,
    size_usd: f64,
    reason: String,
    p_zeus: Option<f64>,
    p_mkt: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ObservationSnapshot<'a> {
    observation_time_utc: String,
    fetch_time_utc: String,
    station_code: &'a str,
    event_day: String,
    temp_c: f64,
    temp_f: f64,
    dewpoint_c: Option<f64>,
    wind_dir: Option<i64>,
    wind_speed: Option<i64>,
    raw: Option<&'a str>,
}

impl Snapshotter {
    /// Open the snapshot root, creating it. Failure here is fatal: without a
    /// snapshot root there is no replay substrate.
    pub fn new(base_dir: &Path) -> EngineResult<Self> {
        std::fs::create_dir_all(base_dir)
            .map_err(|e| EngineError::Snapshot(format!("create {}: {e}", base_dir.display())))?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            saved_observations: HashSet::new(),
        })
    }

    /// Write the full snapshot set for one (station, day) evaluation.
    /// Decisions are written even when empty: the absence of trades is data.
    #[allow(clippy::too_many_arguments)]
    pub fn save_cycle(
        &mut self,
        station: &Station,
        event_day: NaiveDate,
        cycle_time: DateTime<Utc>,
        forecast: &Forecast,
        brackets: &[Bracket],
        prices: &[Option<f64>],
        decisions: &[EdgeDecision],
        probs: &[BracketProb],
        observations: &[MetarObservation],
    ) -> EngineResult<()> {
        let ts = timeutil::filename_timestamp(cycle_time);

        self.save_forecast(station, event_day, &ts, cycle_time, forecast)?;
        self.save_market(station, event_day, &ts, cycle_time, brackets, prices)?;
        self.save_decisions(station, event_day, &ts, cycle_time, decisions, probs)?;
        self.save_observations(station, event_day, observations)?;

        tracing::debug!(
            station = %station.station_code,
            day = %event_day,
            cycle = %ts,
            "snapshots saved"
        );
        Ok(())
    }

    fn save_forecast(
        &self,
        station: &Station,
        event_day: NaiveDate,
        ts: &str,
        cycle_time: DateTime<Utc>,
        forecast: &Forecast,
    ) -> EngineResult<()> {
        let payload = ForecastSnapshot {
            fetch_time_utc: cycle_time.to_rfc3339(),
            forecast_for_local_day: event_day.to_string(),
            station_code: &station.station_code,
            city: &station.city,
            timezone: &station.time_zone,
            timeseries_count: forecast.points.len(),
            timeseries: forecast
                .points
                .iter()
                .map(|p| ForecastPointSnapshot {
                    time_utc: p.time_utc.to_rfc3339(),
                    temp_k: p.temp_k,
                })
                .collect(),
        };
        let dir = self
            .base_dir
            .join("zeus")
            .join(&station.station_code)
            .join(event_day.to_string());
        write_json(&dir, &format!("{ts}.json"), &payload)
    }

    fn save_market(
        &self,
        station: &Station,
        event_day: NaiveDate,
        ts: &str,
        cycle_time: DateTime<Utc>,
        brackets: &[Bracket],
        prices: &[Option<f64>],
    ) -> EngineResult<()> {
        let payload = MarketSnapshot {
            fetch_time_utc: cycle_time.to_rfc3339(),
            event_day: event_day.to_string(),
            city: &station.city,
            markets: brackets
                .iter()
                .zip(prices.iter())
                .map(|(bracket, price)| MarketEntry {
                    market_id: bracket.market_id.clone(),
                    bracket: bracket.name.clone(),
                    lower_f: bracket.lower_f,
                    upper_f: bracket.upper_f,
                    mid_price: *price,
                    closed: bracket.closed,
                })
                .collect(),
        };
        let dir = self
            .base_dir
            .join("polymarket")
            .join(station.city.replace(' ', "_"))
            .join(event_day.to_string());
        write_json(&dir, &format!("{ts}.json"), &payload)
    }

    fn save_decisions(
        &self,
        station: &Station,
        event_day: NaiveDate,
        ts: &str,
        cycle_time: DateTime<Utc>,
        decisions: &[EdgeDecision],
        probs: &[BracketProb],
    ) -> EngineResult<()> {
        let prob_map: HashMap<&str, &BracketProb> = probs
            .iter()
            .filter_map(|p| p.bracket.market_id.as_deref().map(|id| (id, p)))
            .collect();

        let payload = DecisionSnapshot {
            decision_time_utc: cycle_time.to_rfc3339(),
            event_day: event_day.to_string(),
            station_code: &station.station_code,
            city: &station.city,
            trade_count: decisions.len(),
            decisions: decisions
                .iter()
                .map(|d| {
                    let prob = d
                        .bracket
                        .market_id
                        .as_deref()
                        .and_then(|id| prob_map.get(id));
                    DecisionEntry {
                        bracket: d.bracket.name.clone(),
                        lower_f: d.bracket.lower_f,
                        upper_f: d.bracket.upper_f,
                        market_id: d.bracket.market_id.clone(),
                        edge: d.edge,
                        edge_pct: d.edge * 100.0,
                        f_kelly: d.f_kelly,
                        size_usd: d.size_usd,
                        reason: d.reason.clone(),
                        p_zeus: prob.map(|p| p.p_zeus),
                        p_mkt: prob.and_then(|p| p.p_mkt),
                    }
                })
                .collect(),
        };
        let dir = self
            .base_dir
            .join("decisions")
            .join(&station.station_code)
            .join(event_day.to_string());
        write_json(&dir, &format!("{ts}.json"), &payload)
    }

    /// Write each observation at most once, keyed by observation time.
    /// Dedup consults the in-memory set first, then the on-disk filename.
    pub fn save_observations(
        &mut self,
        station: &Station,
        event_day: NaiveDate,
        observations: &[MetarObservation],
    ) -> EngineResult<usize> {
        if observations.is_empty() {
            return Ok(0);
        }

        let dir = self
            .base_dir
            .join("metar")
            .join(&station.station_code)
            .join(event_day.to_string());

        let mut written = 0;
        for obs in observations {
            let key = (station.station_code.clone(), obs.time.to_rfc3339());
            if self.saved_observations.contains(&key) {
                continue;
            }

            let filename = format!("{}.json", timeutil::filename_timestamp(obs.time));
            let path = dir.join(&filename);
            if path.exists() {
                self.saved_observations.insert(key);
                continue;
            }

            let payload = ObservationSnapshot {
                observation_time_utc: obs.time.to_rfc3339(),
                fetch_time_utc: Utc::now().to_rfc3339(),
                station_code: &obs.station_code,
                event_day: event_day.to_string(),
                temp_c: obs.temp_c,
                temp_f: obs.temp_f,
                dewpoint_c: obs.dewpoint_c,
                wind_dir: obs.wind_dir,
                wind_speed: obs.wind_speed,
                raw: obs.raw.as_deref(),
            };
            write_json(&dir, &filename, &payload)?;
            self.saved_observations.insert(key);
            written += 1;
        }

        if written > 0 {
            tracing::info!(
                station = %station.station_code,
                count = written,
                "saved new observations"
            );
        }
        Ok(written)
    }
}

fn write_json<T: Serialize>(dir: &Path, filename: &str, payload: &T) -> EngineResult<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| EngineError::Snapshot(format!("create {}: {e}", dir.display())))?;
    let path = dir.join(filename);
    let body = serde_json::to_string_pretty(payload)?;
    std::fs::write(&path, body)
        .map_err(|e| EngineError::Snapshot(format!("write {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn station() -> Station {
        Station {
            city: "New York".into(),
            station_name: "LaGuardia Airport".into(),
            station_code: "KLGA".into(),
            lat: 40.78,
            lon: -73.87,
            noaa_station: "KLGA".into(),
            venue_hint: "polymarket".into(),
            time_zone: "America/New_York".into(),
        }
    }

    fn observation(hour: u32) -> MetarObservation {
        MetarObservation {
            station_code: "KLGA".into(),
            time: Utc.with_ymd_and_hms(2025, 11, 12, hour, 51, 0).unwrap(),
            temp_c: 15.0,
            temp_f: 59.0,
            dewpoint_c: Some(9.0),
            wind_dir: Some(270),
            wind_speed: Some(12),
            raw: Some("KLGA 121251Z 27012KT 10SM FEW250 15/09".into()),
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 12).unwrap()
    }

    #[test]
    fn test_cycle_writes_all_four_streams() {
        let dir = tempfile::tempdir().unwrap();
        let mut snap = Snapshotter::new(dir.path()).unwrap();
        let cycle = Utc.with_ymd_and_hms(2025, 11, 12, 14, 0, 0).unwrap();
        let forecast = crate::prob::forecast_from_temps_f(&[58.0, 60.0]);
        let bracket = Bracket::new(59, 60);

        snap.save_cycle(
            &station(),
            day(),
            cycle,
            &forecast,
            &[bracket],
            &[Some(0.45)],
            &[],
            &[],
            &[observation(12)],
        )
        .unwrap();

        let ts = "2025-11-12_14-00-00.json";
        assert!(dir.path().join("zeus/KLGA/2025-11-12").join(ts).exists());
        assert!(dir
            .path()
            .join("polymarket/New_York/2025-11-12")
            .join(ts)
            .exists());
        assert!(dir
            .path()
            .join("decisions/KLGA/2025-11-12")
            .join(ts)
            .exists());
        assert!(dir
            .path()
            .join("metar/KLGA/2025-11-12/2025-11-12_12-51-00.json")
            .exists());
    }

    #[test]
    fn test_empty_decision_list_still_snapshotted() {
        let dir = tempfile::tempdir().unwrap();
        let mut snap = Snapshotter::new(dir.path()).unwrap();
        let cycle = Utc.with_ymd_and_hms(2025, 11, 12, 14, 0, 0).unwrap();
        let forecast = crate::prob::forecast_from_temps_f(&[58.0]);
        snap.save_cycle(
            &station(),
            day(),
            cycle,
            &forecast,
            &[],
            &[],
            &[],
            &[],
            &[],
        )
        .unwrap();

        let path = dir
            .path()
            .join("decisions/KLGA/2025-11-12/2025-11-12_14-00-00.json");
        let body: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(body["trade_count"], 0);
        assert!(body["decisions"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_observation_dedup_in_memory_and_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let obs = observation(12);

        // Same observation written N times in one process: one file.
        let mut snap = Snapshotter::new(dir.path()).unwrap();
        assert_eq!(
            snap.save_observations(&station(), day(), &[obs.clone()]).unwrap(),
            1
        );
        for _ in 0..4 {
            assert_eq!(
                snap.save_observations(&station(), day(), &[obs.clone()]).unwrap(),
                0
            );
        }

        // Fresh process (empty in-memory set): the disk listing still dedups.
        let mut snap2 = Snapshotter::new(dir.path()).unwrap();
        assert_eq!(
            snap2.save_observations(&station(), day(), &[obs]).unwrap(),
            0
        );

        let files: Vec<_> = std::fs::read_dir(dir.path().join("metar/KLGA/2025-11-12"))
            .unwrap()
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_distinct_observation_times_all_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut snap = Snapshotter::new(dir.path()).unwrap();
        let written = snap
            .save_observations(&station(), day(), &[observation(12), observation(13)])
            .unwrap();
        assert_eq!(written, 2);
    }
}
