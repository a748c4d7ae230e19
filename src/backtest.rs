//! Backtester: replay the decision loop day-by-day over historical data.
//!
//! Per (day, station): forecast from a stored snapshot when one exists
//! (otherwise a live fetch with the historical instant), brackets from
//! discovery, and opening prices in priority order -- saved price snapshot,
//! then the price-history endpoint for closed markets, then the current
//! midpoint, then nothing. With no prices at all the day degrades to
//! resolution-only mode: one zero-size pending record per bracket, kept
//! solely so the resolution pass can score the forecast's top pick against
//! the actual winner.

use crate::errors::{EngineError, EngineResult};
use crate::polymarket::resolution::winner_from_event;
use crate::prob::{self, SigmaBounds};
use crate::registry::Station;
use crate::resolve::{bracket_matches_winner, loss_pnl, win_pnl};
use crate::services::Services;
use crate::sizing::Sizer;
use crate::timeutil;
use crate::types::{
    BracketProb, Forecast, ForecastPoint, OUTCOME_LOSS, OUTCOME_PENDING, OUTCOME_WIN,
};
use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct BacktestTrade {
    pub date: NaiveDate,
    pub station_code: String,
    pub city: String,
    pub bracket_name: String,
    pub lower_f: i32,
    pub upper_f: i32,
    pub zeus_prob: f64,
    pub market_prob_open: Option<f64>,
    pub market_prob_close: Option<f64>,
    pub edge: f64,
    pub size_usd: f64,
    pub outcome: String,
    pub realized_pnl: f64,
    pub market_id: Option<String>,
    pub winner_bracket: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BacktestSummary {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub pending: usize,
    pub hit_rate_pct: f64,
    pub total_risk: f64,
    pub total_pnl: f64,
    pub roi_pct: f64,
    pub avg_edge_pct: f64,
    pub avg_winning_pnl: f64,
    pub avg_losing_pnl: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

pub struct Backtester<'a> {
    services: &'a Services,
    sizer: Sizer,
}

/// Stored forecast snapshot shape (what the snapshotter writes).
#[derive(Debug, Deserialize)]
struct StoredForecast {
    station_code: String,
    timeseries: Vec<StoredPoint>,
}

#[derive(Debug, Deserialize)]
struct StoredPoint {
    time_utc: String,
    temp_k: f64,
}

impl<'a> Backtester<'a> {
    pub fn new(services: &'a Services) -> Self {
        Self {
            sizer: Sizer::from_config(&services.config),
            services,
        }
    }

    /// Run over the inclusive date range, writing one results CSV (plus a
    /// summary CSV when any day ran resolution-only) and logging aggregate
    /// metrics. Per-item failures are logged and skipped.
    pub async fn run(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        stations: &[String],
    ) -> EngineResult<PathBuf> {
        if start_date > end_date {
            return Err(EngineError::Precondition(format!(
                "start {start_date} after end {end_date}"
            )));
        }

        tracing::info!(
            start = %start_date,
            end = %end_date,
            stations = ?stations,
            "backtest starting"
        );

        let mut all_trades: Vec<BacktestTrade> = Vec::new();
        let mut day = start_date;
        while day <= end_date {
            for station_code in stations {
                let Some(station) = self.services.registry.get(station_code) else {
                    tracing::warn!(station = %station_code, "station not in registry, skipping");
                    continue;
                };
                let station = station.clone();
                match self.backtest_single_day(day, &station).await {
                    Ok(trades) => all_trades.extend(trades),
                    Err(e) => {
                        tracing::error!(
                            station = %station_code,
                            day = %day,
                            error = %e,
                            "backtest day failed"
                        );
                    }
                }
            }
            day += Duration::days(1);
        }

        let output_path = self.save_results(start_date, end_date, &all_trades)?;

        if all_trades.iter().any(|t| t.market_prob_open.is_none()) {
            let summary_path = self.save_resolution_summary(start_date, end_date, &all_trades)?;
            tracing::info!(path = %summary_path.display(), "resolution-only summary saved");
        }

        let summary = summarize(start_date, end_date, &all_trades);
        log_summary(&summary);

        tracing::info!(path = %output_path.display(), "backtest complete");
        Ok(output_path)
    }

    async fn backtest_single_day(
        &self,
        day: NaiveDate,
        station: &Station,
    ) -> EngineResult<Vec<BacktestTrade>> {
        tracing::debug!(city = %station.city, day = %day, "backtesting day");

        // 1. Forecast: stored snapshot first, live fetch with the
        //    historical instant otherwise.
        let forecast = match self.load_forecast_snapshot(&station.station_code, day) {
            Some(forecast) => {
                tracing::debug!(day = %day, "using stored forecast snapshot");
                forecast
            }
            None => self.services.fetcher.fetch_forecast(station, day).await?,
        };

        // 2. Brackets for the day.
        let brackets = self
            .services
            .fetcher
            .discovery
            .list_temp_brackets(&station.city, day)
            .await?;
        if brackets.is_empty() {
            tracing::debug!(city = %station.city, day = %day, "no brackets found");
            return Ok(Vec::new());
        }

        // 3. Forecast distribution.
        let probs = prob::map_daily_high(
            &forecast,
            &brackets,
            self.services.config.model_mode,
            SigmaBounds::default(),
            &self.services.toggles,
            &self.services.calibration,
        )?;

        // 4. Opening prices, by priority.
        let saved_prices = self.load_saved_prices(day, &station.station_code);
        let mut open_prices: Vec<Option<f64>> = Vec::with_capacity(brackets.len());
        for bracket in &brackets {
            let saved = saved_prices
                .as_ref()
                .zip(bracket.market_id.as_ref())
                .and_then(|(prices, id)| prices.get(id).copied());

            let price = if let Some(p) = saved {
                Some(p)
            } else if bracket.closed.unwrap_or(false) {
                self.services
                    .fetcher
                    .pricing
                    .opening_price(bracket)
                    .await
                    .unwrap_or_default()
            } else {
                self.services.fetcher.pricing.midprob(bracket).await.ok()
            };
            open_prices.push(price);
        }
        let prices_found = open_prices.iter().filter(|p| p.is_some()).count();
        tracing::info!(
            city = %station.city,
            day = %day,
            priced = prices_found,
            total = brackets.len(),
            "opening prices"
        );

        let mut trades = if prices_found == 0 {
            tracing::info!(city = %station.city, day = %day, "no prices, resolution-only mode");
            resolution_only_trades(day, station, &probs)
        } else {
            // Normal mode: size against opening prices.
            let priced: Vec<BracketProb> = probs
                .iter()
                .zip(open_prices.iter())
                .filter_map(|(bp, price)| {
                    price.map(|p| BracketProb {
                        bracket: bp.bracket.clone(),
                        p_zeus: bp.p_zeus,
                        p_mkt: Some(p),
                        sigma_z: bp.sigma_z,
                    })
                })
                .collect();

            let decisions = self
                .sizer
                .decide(&priced, self.services.config.daily_bankroll_cap, None)?;

            let mut day_trades = Vec::new();
            for decision in decisions.iter().filter(|d| d.edge > 0.0) {
                let bp = priced
                    .iter()
                    .find(|p| p.bracket.market_id == decision.bracket.market_id);
                let Some(bp) = bp else { continue };

                let close = self
                    .services
                    .fetcher
                    .pricing
                    .midprob(&decision.bracket)
                    .await
                    .ok();

                day_trades.push(BacktestTrade {
                    date: day,
                    station_code: station.station_code.clone(),
                    city: station.city.clone(),
                    bracket_name: decision.bracket.name.clone(),
                    lower_f: decision.bracket.lower_f,
                    upper_f: decision.bracket.upper_f,
                    zeus_prob: bp.p_zeus,
                    market_prob_open: bp.p_mkt,
                    market_prob_close: close,
                    edge: decision.edge,
                    size_usd: decision.size_usd,
                    outcome: OUTCOME_PENDING.to_string(),
                    realized_pnl: 0.0,
                    market_id: decision.bracket.market_id.clone(),
                    winner_bracket: None,
                });
            }
            day_trades
        };

        // 5. Resolve against the venue outcome.
        self.resolve_day_trades(day, &station.city, &mut trades)
            .await;

        Ok(trades)
    }

    async fn resolve_day_trades(&self, day: NaiveDate, city: &str, trades: &mut [BacktestTrade]) {
        if trades.is_empty() {
            return;
        }

        let winner = match self.services.fetcher.discovery.find_event(city, day).await {
            Ok(Some(event)) => winner_from_event(&event),
            Ok(None) => None,
            Err(e) => {
                tracing::error!(city = city, day = %day, error = %e, "resolution fetch failed");
                None
            }
        };

        let Some(winner) = winner else {
            tracing::debug!(city = city, day = %day, "event not resolved, trades stay pending");
            return;
        };

        tracing::info!(city = city, day = %day, winner = %winner, "event winner");

        for trade in trades {
            trade.winner_bracket = Some(winner.clone());
            if bracket_matches_winner(&trade.bracket_name, &winner) {
                trade.outcome = OUTCOME_WIN.to_string();
                trade.realized_pnl = win_pnl(trade.market_prob_open, trade.size_usd);
            } else {
                trade.outcome = OUTCOME_LOSS.to_string();
                trade.realized_pnl = loss_pnl(trade.size_usd);
            }
        }
    }

    /// Saved prices from earlier paper runs:
    /// `price_snapshots/<day>/<STATION>_prices.json`, a list of
    /// `{market_id, p_mkt}` objects.
    fn load_saved_prices(&self, day: NaiveDate, station_code: &str) -> Option<HashMap<String, f64>> {
        #[derive(Deserialize)]
        struct SavedPrice {
            market_id: String,
            p_mkt: f64,
        }

        let path = self
            .services
            .price_snapshots_dir()
            .join(day.to_string())
            .join(format!("{station_code}_prices.json"));
        let raw = std::fs::read_to_string(path).ok()?;
        let prices: Vec<SavedPrice> = serde_json::from_str(&raw).ok()?;

        tracing::info!(
            station = station_code,
            day = %day,
            count = prices.len(),
            "loaded saved prices"
        );
        Some(
            prices
                .into_iter()
                .map(|p| (p.market_id, p.p_mkt))
                .collect(),
        )
    }

    /// Latest stored forecast snapshot for (station, day), if any.
    fn load_forecast_snapshot(&self, station_code: &str, day: NaiveDate) -> Option<Forecast> {
        let dir = self
            .services
            .snapshots_dir()
            .join("zeus")
            .join(station_code)
            .join(day.to_string());

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
            .ok()?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        let latest = files.pop()?;

        let raw = std::fs::read_to_string(&latest).ok()?;
        let stored: StoredForecast = serde_json::from_str(&raw).ok()?;

        let points: Vec<ForecastPoint> = stored
            .timeseries
            .iter()
            .filter_map(|p| {
                timeutil::parse_datetime_lenient(&p.time_utc).map(|time_utc| ForecastPoint {
                    time_utc,
                    temp_k: p.temp_k,
                })
            })
            .collect();
        if points.is_empty() {
            return None;
        }

        let station = self.services.registry.get(station_code);
        Some(Forecast {
            points,
            station_code: stored.station_code,
            lat: station.map(|s| s.lat).unwrap_or_default(),
            lon: station.map(|s| s.lon).unwrap_or_default(),
            fetch_time: chrono::Utc::now(),
            likely_upper_f: None,
            possible_upper_f: None,
        })
    }

    fn save_results(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        trades: &[BacktestTrade],
    ) -> EngineResult<PathBuf> {
        let runs_dir = self.services.runs_dir();
        std::fs::create_dir_all(&runs_dir)?;
        let path = runs_dir.join(format!("{start_date}_to_{end_date}.csv"));

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record([
            "date",
            "station_code",
            "city",
            "bracket_name",
            "lower",
            "upper",
            "zeus_prob",
            "market_prob_open",
            "market_prob_close",
            "edge",
            "size_usd",
            "outcome",
            "realized_pnl",
            "winner_bracket",
        ])?;
        for t in trades {
            writer.write_record([
                t.date.to_string(),
                t.station_code.clone(),
                t.city.clone(),
                t.bracket_name.clone(),
                t.lower_f.to_string(),
                t.upper_f.to_string(),
                format!("{:.4}", t.zeus_prob),
                t.market_prob_open
                    .map(|p| format!("{p:.4}"))
                    .unwrap_or_default(),
                t.market_prob_close
                    .map(|p| format!("{p:.4}"))
                    .unwrap_or_default(),
                format!("{:.4}", t.edge),
                format!("{:.2}", t.size_usd),
                t.outcome.clone(),
                format!("{:.2}", t.realized_pnl),
                t.winner_bracket.clone().unwrap_or_default(),
            ])?;
        }
        writer.flush().map_err(EngineError::from)?;
        Ok(path)
    }

    /// One row per (day, station): the forecast's argmax bracket vs. the
    /// actual winner, with a YES/NO/PENDING correctness flag.
    fn save_resolution_summary(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        trades: &[BacktestTrade],
    ) -> EngineResult<PathBuf> {
        let runs_dir = self.services.runs_dir();
        std::fs::create_dir_all(&runs_dir)?;
        let path = runs_dir.join(format!("{start_date}_to_{end_date}_SUMMARY.csv"));

        let mut daily: HashMap<(NaiveDate, String, String), Vec<&BacktestTrade>> = HashMap::new();
        for trade in trades {
            daily
                .entry((trade.date, trade.station_code.clone(), trade.city.clone()))
                .or_default()
                .push(trade);
        }
        let mut keys: Vec<_> = daily.keys().cloned().collect();
        keys.sort();

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record([
            "date",
            "station_code",
            "city",
            "zeus_prediction",
            "zeus_probability",
            "actual_outcome",
            "zeus_correct",
        ])?;

        for key in keys {
            let day_trades = &daily[&key];
            let pick = day_trades
                .iter()
                .max_by(|a, b| a.zeus_prob.partial_cmp(&b.zeus_prob).expect("finite probs"))
                .expect("group is non-empty");

            let actual = day_trades.iter().find_map(|t| t.winner_bracket.clone());

            let (actual_outcome, zeus_correct) = match actual {
                Some(winner) => {
                    let correct = bracket_matches_winner(&pick.bracket_name, &winner);
                    (winner, if correct { "YES" } else { "NO" })
                }
                None if day_trades.iter().any(|t| t.outcome == OUTCOME_LOSS) => (
                    "resolved (outside tracked brackets)".to_string(),
                    "NO",
                ),
                None => ("not yet resolved".to_string(), "PENDING"),
            };

            writer.write_record([
                key.0.to_string(),
                key.1.clone(),
                key.2.clone(),
                pick.bracket_name.clone(),
                format!("{:.1}%", pick.zeus_prob * 100.0),
                actual_outcome,
                zeus_correct.to_string(),
            ])?;
        }
        writer.flush().map_err(EngineError::from)?;
        Ok(path)
    }
}

/// Resolution-only records: one zero-size pending row per bracket, carrying
/// the forecast probability so the summary can score the top pick.
fn resolution_only_trades(
    day: NaiveDate,
    station: &Station,
    probs: &[BracketProb],
) -> Vec<BacktestTrade> {
    probs
        .iter()
        .map(|bp| BacktestTrade {
            date: day,
            station_code: station.station_code.clone(),
            city: station.city.clone(),
            bracket_name: bp.bracket.name.clone(),
            lower_f: bp.bracket.lower_f,
            upper_f: bp.bracket.upper_f,
            zeus_prob: bp.p_zeus,
            market_prob_open: None,
            market_prob_close: None,
            edge: 0.0,
            size_usd: 0.0,
            outcome: OUTCOME_PENDING.to_string(),
            realized_pnl: 0.0,
            market_id: bp.bracket.market_id.clone(),
            winner_bracket: None,
        })
        .collect()
}

pub fn summarize(
    start_date: NaiveDate,
    end_date: NaiveDate,
    trades: &[BacktestTrade],
) -> BacktestSummary {
    let wins = trades.iter().filter(|t| t.outcome == OUTCOME_WIN).count();
    let losses = trades.iter().filter(|t| t.outcome == OUTCOME_LOSS).count();
    let pending = trades
        .iter()
        .filter(|t| t.outcome == OUTCOME_PENDING)
        .count();

    let total_risk: f64 = trades.iter().map(|t| t.size_usd).sum();
    let total_pnl: f64 = trades.iter().map(|t| t.realized_pnl).sum();

    let winning: Vec<f64> = trades
        .iter()
        .map(|t| t.realized_pnl)
        .filter(|&p| p > 0.0)
        .collect();
    let losing: Vec<f64> = trades
        .iter()
        .map(|t| t.realized_pnl)
        .filter(|&p| p < 0.0)
        .collect();

    let avg = |v: &[f64]| {
        if v.is_empty() {
            0.0
        } else {
            v.iter().sum::<f64>() / v.len() as f64
        }
    };

    BacktestSummary {
        start_date,
        end_date,
        total_trades: trades.len(),
        wins,
        losses,
        pending,
        hit_rate_pct: if wins + losses > 0 {
            wins as f64 / (wins + losses) as f64 * 100.0
        } else {
            0.0
        },
        total_risk,
        total_pnl,
        roi_pct: if total_risk > 0.0 {
            total_pnl / total_risk * 100.0
        } else {
            0.0
        },
        avg_edge_pct: if trades.is_empty() {
            0.0
        } else {
            trades.iter().map(|t| t.edge).sum::<f64>() / trades.len() as f64 * 100.0
        },
        avg_winning_pnl: avg(&winning),
        avg_losing_pnl: avg(&losing),
        largest_win: trades.iter().map(|t| t.realized_pnl).fold(0.0, f64::max),
        largest_loss: trades.iter().map(|t| t.realized_pnl).fold(0.0, f64::min),
    }
}

fn log_summary(summary: &BacktestSummary) {
    tracing::info!(
        start = %summary.start_date,
        end = %summary.end_date,
        trades = summary.total_trades,
        wins = summary.wins,
        losses = summary.losses,
        pending = summary.pending,
        hit_rate_pct = summary.hit_rate_pct,
        total_risk = summary.total_risk,
        total_pnl = summary.total_pnl,
        roi_pct = summary.roi_pct,
        avg_edge_pct = summary.avg_edge_pct,
        avg_win = summary.avg_winning_pnl,
        avg_loss = summary.avg_losing_pnl,
        largest_win = summary.largest_win,
        largest_loss = summary.largest_loss,
        "backtest summary"
    );
}
