//! METAR observation client (Aviation Weather Center).
//!
//! Observations are the ground truth the venue ultimately resolves against,
//! so they are fetched during the event day and snapshotted. The API is
//! lenient territory: 204 means "no data", field names vary between
//! deployments (`station`/`icaoId`, `time`/`obsTime`), timestamps may be
//! ISO strings or Unix seconds, and wind fields are occasionally strings.

use crate::errors::{EngineError, EngineResult};
use crate::timeutil;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct MetarObservation {
    pub station_code: String,
    pub time: DateTime<Utc>,
    pub temp_c: f64,
    pub temp_f: f64,
    pub dewpoint_c: Option<f64>,
    pub wind_dir: Option<i64>,
    pub wind_speed: Option<i64>,
    pub raw: Option<String>,
}

pub struct MetarClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl MetarClient {
    pub fn new(base_url: &str, user_agent: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
        }
    }

    /// Fetch observations for a station over a UTC window. Retries with
    /// backoff; an empty window (204 or no rows) is not an error.
    pub async fn fetch(
        &self,
        station_code: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Vec<MetarObservation>> {
        let mut last_err = EngineError::Upstream("no attempt made".into());
        for attempt in 1..=3u32 {
            match self.request(station_code, start, end).await {
                Ok(rows) => {
                    let observations: Vec<MetarObservation> = rows
                        .iter()
                        .filter_map(parse_observation)
                        .collect();
                    tracing::debug!(
                        station = station_code,
                        count = observations.len(),
                        "observations fetched"
                    );
                    return Ok(observations);
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt, error = %e, "observation fetch failed");
                    last_err = e;
                    if attempt < 3 {
                        let backoff = (2u64 << (attempt - 1)).min(10);
                        tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
                    }
                }
            }
        }
        Err(last_err)
    }

    async fn request(
        &self,
        station_code: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Vec<Value>> {
        let resp = self
            .client
            .get(&self.base_url)
            .header("User-Agent", &self.user_agent)
            .query(&[
                ("ids", station_code.to_string()),
                ("start", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("end", end.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("format", "json".to_string()),
            ])
            .send()
            .await?;

        // 204: the window has no data; valid and empty.
        if resp.status().as_u16() == 204 {
            return Ok(Vec::new());
        }

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Api {
                api: "metar",
                status: status.as_u16(),
                body,
            });
        }

        let data: Value = resp
            .json()
            .await
            .map_err(|e| EngineError::Malformed(format!("metar response: {e}")))?;

        match data {
            Value::Array(rows) => Ok(rows),
            Value::Object(_) => Ok(vec![data]),
            other => Err(EngineError::Malformed(format!(
                "unexpected metar response type: {other}"
            ))),
        }
    }
}

/// Parse one observation from the wire, tolerating both field-name
/// conventions. Rows without station, time, or temperature are dropped.
fn parse_observation(row: &Value) -> Option<MetarObservation> {
    let station = str_field(row, &["station", "icaoId"])?;
    let time = time_field(row, &["time", "obsTime"])?;
    let temp_c = num_field(row, &["temp"])?;
    let temp_f = round1(temp_c * 9.0 / 5.0 + 32.0);

    Some(MetarObservation {
        station_code: station,
        time,
        temp_c: round1(temp_c),
        temp_f,
        dewpoint_c: num_field(row, &["dewpoint", "dewp"]).map(round1),
        wind_dir: int_field(row, &["windDir", "wdir"]),
        wind_speed: int_field(row, &["windSpeed", "wspd"]),
        raw: str_field(row, &["rawOb"]),
    })
}

fn str_field(row: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| row.get(k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn num_field(row: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| row.get(k).and_then(Value::as_f64))
}

fn int_field(row: &Value, keys: &[&str]) -> Option<i64> {
    // Wind direction is sometimes the string "VRB"; treat non-numeric as absent.
    keys.iter().find_map(|k| row.get(k).and_then(Value::as_i64))
}

fn time_field(row: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter().find_map(|k| match row.get(k) {
        Some(Value::String(s)) => timeutil::parse_datetime_lenient(s),
        Some(Value::Number(n)) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        _ => None,
    })
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_standard_fields() {
        let row: Value = serde_json::from_str(
            r#"{
                "station": "KLGA",
                "time": "2025-11-12T12:51:00Z",
                "temp": 15.0,
                "dewpoint": 9.2,
                "windDir": 270,
                "windSpeed": 12,
                "rawOb": "KLGA 121251Z 27012KT 10SM FEW250 15/09"
            }"#,
        )
        .unwrap();
        let obs = parse_observation(&row).unwrap();
        assert_eq!(obs.station_code, "KLGA");
        assert!((obs.temp_f - 59.0).abs() < 1e-9);
        assert_eq!(obs.dewpoint_c, Some(9.2));
        assert_eq!(obs.wind_dir, Some(270));
        assert!(obs.raw.is_some());
    }

    #[test]
    fn test_parse_alternate_field_names_and_unix_time() {
        let row: Value = serde_json::from_str(
            r#"{"icaoId": "EGLC", "obsTime": 1762905600, "temp": 10.0, "wdir": 180, "wspd": 8}"#,
        )
        .unwrap();
        let obs = parse_observation(&row).unwrap();
        assert_eq!(obs.station_code, "EGLC");
        assert!((obs.temp_f - 50.0).abs() < 1e-9);
        assert_eq!(obs.wind_dir, Some(180));
    }

    #[test]
    fn test_temp_f_rounds_to_tenth() {
        let row: Value =
            serde_json::from_str(r#"{"station": "KLGA", "time": "2025-11-12T12:00:00Z", "temp": 15.6}"#)
                .unwrap();
        let obs = parse_observation(&row).unwrap();
        // 15.6°C = 60.08°F -> 60.1
        assert!((obs.temp_f - 60.1).abs() < 1e-9);
    }

    #[test]
    fn test_variable_wind_direction_dropped() {
        let row: Value = serde_json::from_str(
            r#"{"station": "KLGA", "time": "2025-11-12T12:00:00Z", "temp": 15.0, "windDir": "VRB"}"#,
        )
        .unwrap();
        let obs = parse_observation(&row).unwrap();
        assert_eq!(obs.wind_dir, None);
    }

    #[test]
    fn test_missing_temperature_drops_row() {
        let row: Value =
            serde_json::from_str(r#"{"station": "KLGA", "time": "2025-11-12T12:00:00Z"}"#).unwrap();
        assert!(parse_observation(&row).is_none());
    }
}
