//! Resolution engine: classify pending paper trades as win/loss once the
//! venue settles, and compute realized P&L.
//!
//! Trades are grouped by (event day, city) so each event is fetched once.
//! Already-resolved rows are never touched, so re-running is a no-op. A
//! failure on one event leaves that group pending and moves on.

use crate::errors::EngineResult;
use crate::ledger::PaperLedger;
use crate::polymarket::discovery::PolyDiscovery;
use crate::polymarket::resolution::{normalize_bracket_name, winner_from_event};
use crate::registry::StationRegistry;
use crate::types::{TradeRow, OUTCOME_LOSS, OUTCOME_PENDING, OUTCOME_WIN};
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;

pub const VENUE: &str = "polymarket";

/// Realized P&L for a winning binary trade entered at `p_mkt`:
/// (1/p - 1) * size, rounded to cents. Zero-size or priceless rows (the
/// backtester's resolution-only records) realize nothing.
pub fn win_pnl(p_mkt: Option<f64>, size_usd: f64) -> f64 {
    match p_mkt {
        Some(p) if p > 0.0 && size_usd > 0.0 => round2((1.0 / p - 1.0) * size_usd),
        _ => 0.0,
    }
}

/// Realized P&L for a losing trade: the full stake.
pub fn loss_pnl(size_usd: f64) -> f64 {
    if size_usd > 0.0 {
        round2(-size_usd)
    } else {
        0.0
    }
}

/// Exact equality after stripping venue decoration from both names.
pub fn bracket_matches_winner(bracket_name: &str, winner: &str) -> bool {
    normalize_bracket_name(bracket_name) == normalize_bracket_name(winner)
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Apply a resolution outcome to one group of rows. `winner` of `None`
/// marks unresolved rows pending; a winner classifies them and stamps the
/// winning bracket on every row in the group for auditability.
pub fn apply_outcome(rows: &mut [TradeRow], winner: Option<&str>, resolved_at: &str) {
    for row in rows {
        if row.is_resolved() {
            continue;
        }

        let Some(winner) = winner else {
            row.outcome = Some(OUTCOME_PENDING.to_string());
            row.realized_pnl = Some(0.0);
            continue;
        };

        row.winner_bracket = Some(winner.to_string());
        row.venue = Some(VENUE.to_string());
        row.resolved_at = Some(resolved_at.to_string());

        if bracket_matches_winner(&row.bracket_name, winner) {
            row.outcome = Some(OUTCOME_WIN.to_string());
            row.realized_pnl = Some(win_pnl(row.p_mkt, row.size_usd));
        } else {
            row.outcome = Some(OUTCOME_LOSS.to_string());
            row.realized_pnl = Some(loss_pnl(row.size_usd));
        }
    }
}

pub struct ResolutionEngine<'a> {
    pub discovery: &'a PolyDiscovery,
    pub registry: &'a StationRegistry,
    pub ledger: &'a PaperLedger,
}

impl<'a> ResolutionEngine<'a> {
    /// Resolve every trade recorded on `day`, rewriting the day's ledger
    /// file with the updated outcome columns. Returns the updated rows.
    pub async fn resolve_day(&self, day: NaiveDate) -> EngineResult<Vec<TradeRow>> {
        let rows = self.ledger.read_day(day)?;
        if rows.is_empty() {
            tracing::info!(day = %day, "no trades to resolve");
            return Ok(rows);
        }

        // Group row indices by city; the venue keys events by city, not
        // station code.
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, row) in rows.iter().enumerate() {
            let city = self
                .registry
                .get(&row.station_code)
                .map(|s| s.city.clone())
                .unwrap_or_else(|| row.station_code.clone());
            groups.entry(city).or_default().push(idx);
        }

        let mut rows = rows;
        let resolved_at = Utc::now().to_rfc3339();

        for (city, indices) in groups {
            if indices.iter().all(|&i| rows[i].is_resolved()) {
                continue;
            }

            let winner = match self.discovery.find_event(&city, day).await {
                Ok(Some(event)) => winner_from_event(&event),
                Ok(None) => {
                    tracing::debug!(city = %city, day = %day, "no event found, leaving pending");
                    None
                }
                Err(e) => {
                    tracing::error!(city = %city, day = %day, error = %e, "resolution fetch failed");
                    None
                }
            };

            if let Some(w) = &winner {
                tracing::info!(city = %city, day = %day, winner = %w, "event resolved");
            }

            // Borrow-split: pull the group out, update, put back.
            let mut group: Vec<TradeRow> =
                indices.iter().map(|&i| rows[i].clone()).collect();
            apply_outcome(&mut group, winner.as_deref(), &resolved_at);
            for (slot, updated) in indices.into_iter().zip(group) {
                rows[slot] = updated;
            }
        }

        self.ledger.rewrite_day(day, &rows)?;

        let wins = rows
            .iter()
            .filter(|r| r.outcome.as_deref() == Some(OUTCOME_WIN))
            .count();
        let losses = rows
            .iter()
            .filter(|r| r.outcome.as_deref() == Some(OUTCOME_LOSS))
            .count();
        tracing::info!(
            day = %day,
            trades = rows.len(),
            wins = wins,
            losses = losses,
            "resolution pass complete"
        );

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(bracket_name: &str, p_mkt: Option<f64>, size: f64) -> TradeRow {
        TradeRow {
            timestamp: "2025-11-12T14:00:00+00:00".into(),
            station_code: "EGLC".into(),
            bracket_name: bracket_name.into(),
            bracket_lower_f: 58,
            bracket_upper_f: 59,
            market_id: "mkt-1".into(),
            edge: 0.06,
            edge_pct: 6.0,
            f_kelly: 0.1,
            size_usd: size,
            p_zeus: Some(0.5),
            p_mkt,
            sigma_z: Some(1.0),
            reason: "standard".into(),
            outcome: None,
            realized_pnl: None,
            venue: None,
            resolved_at: None,
            winner_bracket: None,
        }
    }

    #[test]
    fn test_win_pnl_formula() {
        // (1/0.40 - 1) * 200 = 300.00
        assert_eq!(win_pnl(Some(0.40), 200.0), 300.0);
        assert_eq!(win_pnl(Some(0.0), 200.0), 0.0);
        assert_eq!(win_pnl(None, 200.0), 0.0);
        assert_eq!(win_pnl(Some(0.40), 0.0), 0.0);
    }

    #[test]
    fn test_loss_pnl_formula() {
        assert_eq!(loss_pnl(150.0), -150.0);
        assert_eq!(loss_pnl(0.0), 0.0);
    }

    #[test]
    fn test_win_classification() {
        let mut rows = vec![row("58-59°F", Some(0.40), 200.0)];
        apply_outcome(&mut rows, Some("58-59"), "2025-11-13T00:00:00Z");
        assert_eq!(rows[0].outcome.as_deref(), Some(OUTCOME_WIN));
        assert_eq!(rows[0].realized_pnl, Some(300.0));
        assert_eq!(rows[0].winner_bracket.as_deref(), Some("58-59"));
        assert_eq!(rows[0].venue.as_deref(), Some(VENUE));
    }

    #[test]
    fn test_loss_records_winner_too() {
        let mut rows = vec![row("60-61°F", Some(0.20), 150.0)];
        apply_outcome(&mut rows, Some("58-59"), "2025-11-13T00:00:00Z");
        assert_eq!(rows[0].outcome.as_deref(), Some(OUTCOME_LOSS));
        assert_eq!(rows[0].realized_pnl, Some(-150.0));
        assert_eq!(rows[0].winner_bracket.as_deref(), Some("58-59"));
    }

    #[test]
    fn test_unresolved_marks_pending() {
        let mut rows = vec![row("58-59°F", Some(0.40), 200.0)];
        apply_outcome(&mut rows, None, "2025-11-13T00:00:00Z");
        assert_eq!(rows[0].outcome.as_deref(), Some(OUTCOME_PENDING));
        assert_eq!(rows[0].realized_pnl, Some(0.0));
        assert!(rows[0].winner_bracket.is_none());
    }

    #[test]
    fn test_rerun_is_noop() {
        let mut rows = vec![row("58-59°F", Some(0.40), 200.0)];
        apply_outcome(&mut rows, Some("58-59"), "2025-11-13T00:00:00Z");
        let snapshot = rows.clone();

        // Second pass with a different (bogus) winner must change nothing.
        apply_outcome(&mut rows, Some("60-61"), "2025-11-14T00:00:00Z");
        assert_eq!(rows[0].outcome, snapshot[0].outcome);
        assert_eq!(rows[0].realized_pnl, snapshot[0].realized_pnl);
        assert_eq!(rows[0].winner_bracket, snapshot[0].winner_bracket);
        assert_eq!(rows[0].resolved_at, snapshot[0].resolved_at);
    }

    #[test]
    fn test_pending_rows_resolve_on_later_pass() {
        let mut rows = vec![row("58-59°F", Some(0.40), 200.0)];
        apply_outcome(&mut rows, None, "2025-11-13T00:00:00Z");
        assert_eq!(rows[0].outcome.as_deref(), Some(OUTCOME_PENDING));

        apply_outcome(&mut rows, Some("58-59"), "2025-11-14T00:00:00Z");
        assert_eq!(rows[0].outcome.as_deref(), Some(OUTCOME_WIN));
    }

    #[test]
    fn test_normalized_match() {
        assert!(bracket_matches_winner("58-59°F", "58-59"));
        assert!(bracket_matches_winner("58-59°F", " 58-59 "));
        assert!(!bracket_matches_winner("58-59°F", "59-60"));
    }
}
