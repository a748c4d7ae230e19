//! Shared data types flowing through the pipeline:
//! `Forecast` -> `BracketProb` -> `EdgeDecision` -> `TradeRow`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Brackets ──

/// A tradable temperature bracket: the half-open interval [lower_f, upper_f).
/// `market_id` identifies the bracket for resolution lookups; `token_id`
/// identifies it for price lookups. The two may differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bracket {
    pub name: String,
    pub lower_f: i32,
    pub upper_f: i32,
    pub market_id: Option<String>,
    pub token_id: Option<String>,
    pub closed: Option<bool>,
}

impl Bracket {
    pub fn new(lower_f: i32, upper_f: i32) -> Self {
        Self {
            name: format!("{lower_f}-{upper_f}°F"),
            lower_f,
            upper_f,
            market_id: None,
            token_id: None,
            closed: None,
        }
    }

    /// Whether a whole-°F reading falls inside this bracket.
    #[inline]
    pub fn contains(&self, temp_f: i32) -> bool {
        temp_f >= self.lower_f && temp_f < self.upper_f
    }
}

// ── Forecasts ──

/// Single point in an hourly temperature forecast.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub time_utc: DateTime<Utc>,
    pub temp_k: f64,
}

/// Hourly temperature forecast for one station, covering a contiguous window
/// (typically 24 points from local midnight of the target day). Immutable
/// once constructed; calibration produces a new series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forecast {
    pub points: Vec<ForecastPoint>,
    pub station_code: String,
    pub lat: f64,
    pub lon: f64,
    pub fetch_time: DateTime<Utc>,
    /// 80% one-sided confidence upper bound on the daily high, in °F.
    pub likely_upper_f: Option<f64>,
    /// 95% one-sided confidence upper bound on the daily high, in °F.
    pub possible_upper_f: Option<f64>,
}

impl Forecast {
    pub fn temps_f(&self) -> Vec<f64> {
        self.points
            .iter()
            .map(|p| crate::units::kelvin_to_fahrenheit(p.temp_k))
            .collect()
    }
}

// ── Probabilities and decisions ──

/// Probability assessment for one bracket: the forecast-derived probability,
/// the market-implied probability when a price is available, and the sigma
/// used for the distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketProb {
    pub bracket: Bracket,
    pub p_zeus: f64,
    pub p_mkt: Option<f64>,
    pub sigma_z: Option<f64>,
}

/// A sized trading decision. `size_usd` is post-cap; `reason` names the caps
/// that bound it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDecision {
    pub bracket: Bracket,
    pub edge: f64,
    pub f_kelly: f64,
    pub size_usd: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

// ── Ledger rows ──

pub const OUTCOME_PENDING: &str = "pending";
pub const OUTCOME_WIN: &str = "win";
pub const OUTCOME_LOSS: &str = "loss";

/// One paper-trade ledger row. Column order matches the on-disk CSV header
/// and is stable: readers join across days by it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRow {
    pub timestamp: String,
    pub station_code: String,
    pub bracket_name: String,
    pub bracket_lower_f: i32,
    pub bracket_upper_f: i32,
    pub market_id: String,
    pub edge: f64,
    pub edge_pct: f64,
    pub f_kelly: f64,
    pub size_usd: f64,
    pub p_zeus: Option<f64>,
    pub p_mkt: Option<f64>,
    pub sigma_z: Option<f64>,
    pub reason: String,
    pub outcome: Option<String>,
    pub realized_pnl: Option<f64>,
    pub venue: Option<String>,
    pub resolved_at: Option<String>,
    pub winner_bracket: Option<String>,
}

impl TradeRow {
    /// Build a ledger row from a decision plus its probability provenance.
    pub fn from_decision(
        decision: &EdgeDecision,
        station_code: &str,
        prob: Option<&BracketProb>,
    ) -> Self {
        Self {
            timestamp: decision.timestamp.to_rfc3339(),
            station_code: station_code.to_string(),
            bracket_name: decision.bracket.name.clone(),
            bracket_lower_f: decision.bracket.lower_f,
            bracket_upper_f: decision.bracket.upper_f,
            market_id: decision.bracket.market_id.clone().unwrap_or_default(),
            edge: decision.edge,
            edge_pct: decision.edge * 100.0,
            f_kelly: decision.f_kelly,
            size_usd: decision.size_usd,
            p_zeus: prob.map(|p| p.p_zeus),
            p_mkt: prob.and_then(|p| p.p_mkt),
            sigma_z: prob.and_then(|p| p.sigma_z),
            reason: decision.reason.clone(),
            outcome: None,
            realized_pnl: None,
            venue: None,
            resolved_at: None,
            winner_bracket: None,
        }
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        matches!(self.outcome.as_deref(), Some(OUTCOME_WIN) | Some(OUTCOME_LOSS))
    }

    /// Calendar day of the trade (from the RFC3339 timestamp).
    pub fn trade_date(&self) -> Option<chrono::NaiveDate> {
        crate::timeutil::parse_datetime_lenient(&self.timestamp).map(|dt| dt.date_naive())
    }
}
