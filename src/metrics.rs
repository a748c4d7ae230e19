//! P&L and performance aggregation over the paper ledger.
//!
//! Pure computation over ledger rows: counts, hit rate, ROI, a simplified
//! Sharpe (mean over sample stdev of resolved P&L), extremes and averages,
//! per-station and per-venue breakdowns, and fixed period bands.

use crate::resolve::VENUE;
use crate::types::{TradeRow, OUTCOME_LOSS, OUTCOME_WIN};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct MetricsQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub station: Option<String>,
    pub venue: Option<String>,
    /// Only the paper ledger exists; a non-paper mode matches nothing.
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PeriodStats {
    pub pnl: f64,
    pub risk: f64,
    pub roi: f64,
    pub trades: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodBands {
    pub today: PeriodStats,
    pub last_7d: PeriodStats,
    pub last_30d: PeriodStats,
    pub last_365d: PeriodStats,
    pub all_time: PeriodStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub total_trades: usize,
    pub resolved_trades: usize,
    pub pending_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub hit_rate: f64,
    pub total_risk: f64,
    pub total_pnl: f64,
    pub roi: f64,
    pub avg_edge_pct: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_winning_pnl: f64,
    pub avg_losing_pnl: f64,
    pub sharpe_ratio: f64,
    pub by_station: HashMap<String, PeriodStats>,
    pub by_venue: HashMap<String, PeriodStats>,
    pub by_period: PeriodBands,
}

/// Filter rows by the query, then aggregate. `today` anchors the period
/// bands (passed in so tests are deterministic).
pub fn report(rows: &[TradeRow], query: &MetricsQuery, today: NaiveDate) -> PerformanceReport {
    let filtered: Vec<&TradeRow> = rows
        .iter()
        .filter(|row| {
            if let Some(mode) = &query.mode {
                if mode != "paper" {
                    return false;
                }
            }
            if let Some(station) = &query.station {
                if &row.station_code != station {
                    return false;
                }
            }
            if let Some(venue) = &query.venue {
                if row.venue.as_deref().unwrap_or(VENUE) != venue {
                    return false;
                }
            }
            let Some(date) = row.trade_date() else {
                return false;
            };
            if query.start.is_some_and(|s| date < s) {
                return false;
            }
            if query.end.is_some_and(|e| date > e) {
                return false;
            }
            true
        })
        .collect();

    let resolved: Vec<&TradeRow> = filtered
        .iter()
        .filter(|r| r.is_resolved())
        .copied()
        .collect();
    let wins = resolved
        .iter()
        .filter(|r| r.outcome.as_deref() == Some(OUTCOME_WIN))
        .count();
    let losses = resolved
        .iter()
        .filter(|r| r.outcome.as_deref() == Some(OUTCOME_LOSS))
        .count();

    let total_risk: f64 = filtered.iter().map(|r| r.size_usd).sum();
    let total_pnl: f64 = resolved.iter().filter_map(|r| r.realized_pnl).sum();

    let pnl_values: Vec<f64> = resolved.iter().filter_map(|r| r.realized_pnl).collect();
    let winning: Vec<f64> = pnl_values.iter().copied().filter(|&p| p > 0.0).collect();
    let losing: Vec<f64> = pnl_values.iter().copied().filter(|&p| p < 0.0).collect();

    let sharpe_ratio = if pnl_values.len() > 1 {
        let mean = mean(&pnl_values);
        let std = sample_std(&pnl_values);
        if std > 0.0 {
            mean / std
        } else {
            0.0
        }
    } else {
        0.0
    };

    let by_station = breakdown(&filtered, |r| r.station_code.clone());
    let by_venue = breakdown(&filtered, |r| {
        r.venue.clone().unwrap_or_else(|| VENUE.to_string())
    });

    let band = |days: Option<i64>| -> PeriodStats {
        let start = days.map(|d| today - Duration::days(d));
        let rows: Vec<&TradeRow> = filtered
            .iter()
            .filter(|r| match (start, r.trade_date()) {
                (None, Some(d)) => d <= today,
                (Some(s), Some(d)) => d >= s && d <= today,
                _ => false,
            })
            .copied()
            .collect();
        period_stats(&rows)
    };

    PerformanceReport {
        total_trades: filtered.len(),
        resolved_trades: resolved.len(),
        pending_trades: filtered.len() - resolved.len(),
        wins,
        losses,
        hit_rate: ratio(wins as f64, (wins + losses) as f64) * 100.0,
        total_risk: round2(total_risk),
        total_pnl: round2(total_pnl),
        roi: round2(ratio(total_pnl, total_risk) * 100.0),
        avg_edge_pct: round2(mean(
            &filtered.iter().map(|r| r.edge_pct).collect::<Vec<_>>(),
        )),
        largest_win: pnl_values.iter().copied().fold(0.0, f64::max),
        largest_loss: pnl_values.iter().copied().fold(0.0, f64::min),
        avg_winning_pnl: round2(mean(&winning)),
        avg_losing_pnl: round2(mean(&losing)),
        sharpe_ratio: round2(sharpe_ratio),
        by_station,
        by_venue,
        by_period: PeriodBands {
            today: band(Some(0)),
            last_7d: band(Some(7)),
            last_30d: band(Some(30)),
            last_365d: band(Some(365)),
            all_time: band(None),
        },
    }
}

fn breakdown(
    rows: &[&TradeRow],
    key: impl Fn(&TradeRow) -> String,
) -> HashMap<String, PeriodStats> {
    let mut groups: HashMap<String, Vec<&TradeRow>> = HashMap::new();
    for &row in rows {
        groups.entry(key(row)).or_default().push(row);
    }
    groups
        .into_iter()
        .map(|(k, rows)| (k, period_stats(&rows)))
        .collect()
}

fn period_stats(rows: &[&TradeRow]) -> PeriodStats {
    let mut pnl = 0.0;
    let mut risk = 0.0;
    let mut trades = 0;
    for row in rows {
        pnl += row.realized_pnl.unwrap_or(0.0);
        risk += row.size_usd;
        trades += 1;
    }
    PeriodStats {
        pnl: round2(pnl),
        risk: round2(risk),
        roi: round2(ratio(pnl, risk) * 100.0),
        trades,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
