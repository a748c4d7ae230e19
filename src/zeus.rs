//! Zeus forecast client.
//!
//! Fetches hourly 2m-temperature forecasts. The API accepts `start_time`
//! as an absolute instant: the timezone offset MUST be preserved when
//! formatting (sending the naive UTC wall time instead shifts the whole
//! request by a day for non-UTC stations).
//!
//! Two response shapes exist in the wild and both are accepted:
//! parallel arrays (`2m_temperature.data` + `time.data`) and the legacy
//! object list (`forecast: [{time, temperature_k}]`). Timestamps may be
//! ISO8601 strings or Unix seconds.

use crate::errors::{EngineError, EngineResult};
use crate::timeutil;
use crate::types::{Forecast, ForecastPoint};
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::Deserialize;

pub struct ZeusClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

// ── Wire shapes ──

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ZeusResponse {
    Arrays {
        #[serde(rename = "2m_temperature")]
        temperature: SeriesField<f64>,
        time: SeriesField<TimeValue>,
    },
    Legacy {
        forecast: Vec<LegacyPoint>,
    },
}

#[derive(Debug, Deserialize)]
struct SeriesField<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimeValue {
    Iso(String),
    Unix(f64),
}

#[derive(Debug, Deserialize)]
struct LegacyPoint {
    #[serde(alias = "timestamp")]
    time: Option<String>,
    #[serde(alias = "temp_k", alias = "temperature")]
    temperature_k: Option<f64>,
}

impl TimeValue {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            TimeValue::Iso(s) => timeutil::parse_datetime_lenient(s),
            TimeValue::Unix(secs) => DateTime::from_timestamp(*secs as i64, 0),
        }
    }
}

impl ZeusClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Fetch `hours` hourly points starting at `start_local` (an absolute
    /// instant carrying its local offset). Retries transient failures with
    /// 2s/4s backoff before surfacing.
    pub async fn fetch(
        &self,
        lat: f64,
        lon: f64,
        start_local: DateTime<FixedOffset>,
        hours: u32,
        station_code: &str,
    ) -> EngineResult<Forecast> {
        let url = format!("{}/forecast", self.base_url);
        let start_time = start_local.to_rfc3339_opts(SecondsFormat::Secs, false);

        tracing::info!(
            station = station_code,
            lat = lat,
            lon = lon,
            start = %start_time,
            hours = hours,
            "fetching forecast"
        );

        let mut last_err = EngineError::Upstream("no attempt made".into());
        for attempt in 1..=3u32 {
            match self.request(&url, lat, lon, &start_time, hours).await {
                Ok(raw) => return self.parse(raw, lat, lon, station_code),
                Err(e) => {
                    tracing::warn!(attempt = attempt, error = %e, "forecast fetch failed");
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
        url: &str,
        lat: f64,
        lon: f64,
        start_time: &str,
        hours: u32,
    ) -> EngineResult<ZeusResponse> {
        let resp = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                ("variable", "2m_temperature".to_string()),
                ("start_time", start_time.to_string()),
                ("predict_hours", hours.to_string()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Api {
                api: "zeus",
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<ZeusResponse>()
            .await
            .map_err(|e| EngineError::Malformed(format!("zeus response: {e}")))
    }

    fn parse(
        &self,
        raw: ZeusResponse,
        lat: f64,
        lon: f64,
        station_code: &str,
    ) -> EngineResult<Forecast> {
        let points = match raw {
            ZeusResponse::Arrays { temperature, time } => {
                if temperature.data.len() != time.data.len() {
                    return Err(EngineError::Malformed(format!(
                        "length mismatch: {} temps vs {} times",
                        temperature.data.len(),
                        time.data.len()
                    )));
                }
                temperature
                    .data
                    .iter()
                    .zip(time.data.iter())
                    .filter_map(|(&temp_k, t)| {
                        t.to_utc().map(|time_utc| ForecastPoint { time_utc, temp_k })
                    })
                    .collect::<Vec<_>>()
            }
            ZeusResponse::Legacy { forecast } => forecast
                .iter()
                .filter_map(|p| {
                    let time_utc = p.time.as_deref().and_then(timeutil::parse_datetime_lenient)?;
                    let temp_k = p.temperature_k?;
                    Some(ForecastPoint { time_utc, temp_k })
                })
                .collect(),
        };

        if points.is_empty() {
            return Err(EngineError::Malformed(
                "no valid forecast points in response".into(),
            ));
        }

        tracing::info!(
            station = station_code,
            points = points.len(),
            "forecast parsed"
        );

        Ok(Forecast {
            points,
            station_code: station_code.to_string(),
            lat,
            lon,
            fetch_time: Utc::now(),
            likely_upper_f: None,
            possible_upper_f: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ZeusClient {
        ZeusClient::new("http://localhost:0", "test-key")
    }

    #[test]
    fn test_parse_array_shape() {
        let raw: ZeusResponse = serde_json::from_str(
            r#"{
                "2m_temperature": {"data": [288.15, 289.0]},
                "time": {"data": ["2025-11-12T00:00:00Z", "2025-11-12T01:00:00Z"]}
            }"#,
        )
        .unwrap();
        let forecast = client().parse(raw, 51.5, 0.05, "EGLC").unwrap();
        assert_eq!(forecast.points.len(), 2);
        assert!((forecast.points[0].temp_k - 288.15).abs() < 1e-9);
    }

    #[test]
    fn test_parse_array_shape_unix_times() {
        let raw: ZeusResponse = serde_json::from_str(
            r#"{
                "2m_temperature": {"data": [288.15]},
                "time": {"data": [1762905600]}
            }"#,
        )
        .unwrap();
        let forecast = client().parse(raw, 51.5, 0.05, "EGLC").unwrap();
        assert_eq!(forecast.points.len(), 1);
    }

    #[test]
    fn test_parse_legacy_shape() {
        let raw: ZeusResponse = serde_json::from_str(
            r#"{"forecast": [
                {"time": "2025-11-12T00:00:00Z", "temperature_k": 288.15},
                {"time": "2025-11-12T01:00:00Z", "temp_k": 287.0}
            ]}"#,
        )
        .unwrap();
        let forecast = client().parse(raw, 51.5, 0.05, "EGLC").unwrap();
        assert_eq!(forecast.points.len(), 2);
        assert!((forecast.points[1].temp_k - 287.0).abs() < 1e-9);
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        let raw: ZeusResponse = serde_json::from_str(
            r#"{
                "2m_temperature": {"data": [288.15, 289.0]},
                "time": {"data": ["2025-11-12T00:00:00Z"]}
            }"#,
        )
        .unwrap();
        assert!(matches!(
            client().parse(raw, 51.5, 0.05, "EGLC"),
            Err(EngineError::Malformed(_))
        ));
    }

    #[test]
    fn test_empty_forecast_is_malformed() {
        let raw: ZeusResponse = serde_json::from_str(r#"{"forecast": []}"#).unwrap();
        assert!(matches!(
            client().parse(raw, 51.5, 0.05, "EGLC"),
            Err(EngineError::Malformed(_))
        ));
    }

    #[test]
    fn test_start_time_preserves_offset() {
        // The NYC local-midnight instant must format with its -05:00 offset,
        // not as naive UTC.
        let tz: chrono_tz::Tz = "America/New_York".parse().unwrap();
        let day = chrono::NaiveDate::from_ymd_opt(2025, 11, 12).unwrap();
        let midnight = crate::timeutil::local_midnight(day, tz).fixed_offset();
        let formatted = midnight.to_rfc3339_opts(SecondsFormat::Secs, false);
        assert_eq!(formatted, "2025-11-12T00:00:00-05:00");
    }
}
