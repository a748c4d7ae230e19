//! Paper-trade ledger: one append-only CSV per calendar day.
//!
//! The first write for a day creates the directory and header; later writes
//! append whole rows. Rows are never modified in place -- the resolution
//! engine is the one caller allowed to rewrite a day's file wholesale after
//! filling outcome columns, and it does so via a temp-file swap so readers
//! never observe a partial file.

use crate::errors::{EngineError, EngineResult};
use crate::types::TradeRow;
use chrono::NaiveDate;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

pub const LEDGER_FILENAME: &str = "paper_trades.csv";

#[derive(Debug, Clone)]
pub struct PaperLedger {
    trades_dir: PathBuf,
}

impl PaperLedger {
    pub fn new(trades_dir: &Path) -> Self {
        Self {
            trades_dir: trades_dir.to_path_buf(),
        }
    }

    fn day_path(&self, day: NaiveDate) -> PathBuf {
        self.trades_dir
            .join(day.format("%Y-%m-%d").to_string())
            .join(LEDGER_FILENAME)
    }

    /// Append rows to today's ledger file.
    pub fn append(&self, rows: &[TradeRow]) -> EngineResult<PathBuf> {
        self.append_for_date(chrono::Utc::now().date_naive(), rows)
    }

    /// Append rows to the ledger file for `day`, creating it (with header)
    /// on first write.
    pub fn append_for_date(&self, day: NaiveDate, rows: &[TradeRow]) -> EngineResult<PathBuf> {
        let path = self.day_path(day);
        if rows.is_empty() {
            tracing::warn!("no trades to record");
            return Ok(path);
        }

        let dir = path.parent().expect("ledger path has parent");
        std::fs::create_dir_all(dir)
            .map_err(|e| EngineError::Ledger(format!("create {}: {e}", dir.display())))?;

        let is_new = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| EngineError::Ledger(format!("open {}: {e}", path.display())))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush().map_err(EngineError::from)?;

        tracing::info!(count = rows.len(), path = %path.display(), "recorded paper trades");
        Ok(path)
    }

    /// All rows for one day; a missing file reads as empty.
    pub fn read_day(&self, day: NaiveDate) -> EngineResult<Vec<TradeRow>> {
        let path = self.day_path(day);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let mut rows = Vec::new();
        for record in reader.deserialize::<TradeRow>() {
            rows.push(record?);
        }
        Ok(rows)
    }

    /// Every row across all ledger days, in day order.
    pub fn read_all(&self) -> EngineResult<Vec<TradeRow>> {
        let mut days: Vec<PathBuf> = match std::fs::read_dir(&self.trades_dir) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect(),
            Err(_) => return Ok(Vec::new()),
        };
        days.sort();

        let mut rows = Vec::new();
        for day_dir in days {
            let path = day_dir.join(LEDGER_FILENAME);
            if !path.exists() {
                continue;
            }
            let mut reader = csv::Reader::from_path(&path)?;
            for record in reader.deserialize::<TradeRow>() {
                match record {
                    Ok(row) => rows.push(row),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping malformed ledger row"),
                }
            }
        }
        Ok(rows)
    }

    /// Replace a day's file with the given rows. Reserved for the resolution
    /// engine; written to a temp file and renamed into place.
    pub fn rewrite_day(&self, day: NaiveDate, rows: &[TradeRow]) -> EngineResult<PathBuf> {
        let path = self.day_path(day);
        let dir = path.parent().expect("ledger path has parent");
        std::fs::create_dir_all(dir)
            .map_err(|e| EngineError::Ledger(format!("create {}: {e}", dir.display())))?;

        let tmp = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush().map_err(EngineError::from)?;
        }
        std::fs::rename(&tmp, &path)
            .map_err(|e| EngineError::Ledger(format!("swap {}: {e}", path.display())))?;

        tracing::info!(count = rows.len(), path = %path.display(), "rewrote ledger day");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bracket, BracketProb, EdgeDecision};
    use chrono::Utc;

    fn sample_row(lower: i32, size: f64) -> TradeRow {
        let mut bracket = Bracket::new(lower, lower + 1);
        bracket.market_id = Some(format!("mkt-{lower}"));
        let decision = EdgeDecision {
            bracket: bracket.clone(),
            edge: 0.06,
            f_kelly: 0.12,
            size_usd: size,
            reason: "standard".into(),
            timestamp: Utc::now(),
        };
        let prob = BracketProb {
            bracket,
            p_zeus: 0.55,
            p_mkt: Some(0.45),
            sigma_z: Some(1.2),
        };
        TradeRow::from_decision(&decision, "EGLC", Some(&prob))
    }

    #[test]
    fn test_first_write_creates_header_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PaperLedger::new(dir.path());
        let day = NaiveDate::from_ymd_opt(2025, 11, 12).unwrap();

        ledger.append_for_date(day, &[sample_row(59, 50.0)]).unwrap();
        ledger.append_for_date(day, &[sample_row(60, 75.0)]).unwrap();

        let rows = ledger.read_day(day).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].bracket_name, "59-60°F");
        assert_eq!(rows[1].bracket_name, "60-61°F");

        // Exactly one header line.
        let path = dir.path().join("2025-11-12").join(LEDGER_FILENAME);
        let raw = std::fs::read_to_string(path).unwrap();
        let headers: Vec<&str> = raw.lines().filter(|l| l.starts_with("timestamp,")).collect();
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_header_column_order_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PaperLedger::new(dir.path());
        let day = NaiveDate::from_ymd_opt(2025, 11, 12).unwrap();
        ledger.append_for_date(day, &[sample_row(59, 50.0)]).unwrap();

        let path = dir.path().join("2025-11-12").join(LEDGER_FILENAME);
        let raw = std::fs::read_to_string(path).unwrap();
        let header = raw.lines().next().unwrap();
        assert_eq!(
            header,
            "timestamp,station_code,bracket_name,bracket_lower_f,bracket_upper_f,\
             market_id,edge,edge_pct,f_kelly,size_usd,p_zeus,p_mkt,sigma_z,reason,\
             outcome,realized_pnl,venue,resolved_at,winner_bracket"
        );
    }

    #[test]
    fn test_resolution_fields_roundtrip_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PaperLedger::new(dir.path());
        let day = NaiveDate::from_ymd_opt(2025, 11, 12).unwrap();
        ledger.append_for_date(day, &[sample_row(59, 50.0)]).unwrap();
        let rows = ledger.read_day(day).unwrap();
        assert!(rows[0].outcome.is_none());
        assert!(rows[0].realized_pnl.is_none());
        assert!(rows[0].winner_bracket.is_none());
    }

    #[test]
    fn test_rewrite_day_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PaperLedger::new(dir.path());
        let day = NaiveDate::from_ymd_opt(2025, 11, 12).unwrap();
        ledger
            .append_for_date(day, &[sample_row(59, 50.0), sample_row(60, 75.0)])
            .unwrap();

        let mut rows = ledger.read_day(day).unwrap();
        rows[0].outcome = Some(crate::types::OUTCOME_WIN.into());
        rows[0].realized_pnl = Some(61.11);
        ledger.rewrite_day(day, &rows).unwrap();

        let reread = ledger.read_day(day).unwrap();
        assert_eq!(reread.len(), 2);
        assert_eq!(reread[0].outcome.as_deref(), Some("win"));
        assert_eq!(reread[0].realized_pnl, Some(61.11));
        assert!(reread[1].outcome.is_none());
    }

    #[test]
    fn test_read_all_spans_days() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PaperLedger::new(dir.path());
        let d1 = NaiveDate::from_ymd_opt(2025, 11, 12).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 11, 13).unwrap();
        ledger.append_for_date(d1, &[sample_row(59, 50.0)]).unwrap();
        ledger.append_for_date(d2, &[sample_row(60, 75.0)]).unwrap();
        assert_eq!(ledger.read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_day_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PaperLedger::new(dir.path());
        let day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert!(ledger.read_day(day).unwrap().is_empty());
    }
}
