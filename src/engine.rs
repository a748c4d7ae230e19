//! Dynamic trading engine: the fixed-cadence evaluation loop.
//!
//! One cycle walks every active station across `[today, today+lookahead)`
//! strictly sequentially, fetching fresh inputs just-in-time, sizing
//! positions against the daily bankroll, recording paper trades, and
//! snapshotting every input and decision under the cycle timestamp. A
//! failure on one (station, day) never aborts the rest of the cycle.
//!
//! The loop is cooperative: the shutdown flag is polled between items, so
//! an interrupt finishes the in-flight evaluation (leaving a complete
//! snapshot set on disk) before exiting.

use crate::errors::{EngineError, EngineResult};
use crate::ledger::PaperLedger;
use crate::prob::{self, SigmaBounds};
use crate::registry::Station;
use crate::services::Services;
use crate::sizing::Sizer;
use crate::snapshot::Snapshotter;
use crate::types::{BracketProb, EdgeDecision, TradeRow};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use portable_atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct DynamicEngine<'a> {
    services: &'a Services,
    sizer: Sizer,
    ledger: PaperLedger,
    snapshotter: Snapshotter,
    shutdown: Arc<AtomicBool>,
}

impl<'a> DynamicEngine<'a> {
    pub fn new(services: &'a Services, shutdown: Arc<AtomicBool>) -> EngineResult<Self> {
        Ok(Self {
            sizer: Sizer::from_config(&services.config),
            ledger: PaperLedger::new(&services.trades_dir()),
            snapshotter: Snapshotter::new(&services.snapshots_dir())?,
            services,
            shutdown,
        })
    }

    /// Run cycles until interrupted. The next cycle starts at
    /// `cycle_start + interval`; a slow cycle rolls straight into the next
    /// one with no catch-up burst.
    pub async fn run(&mut self) -> EngineResult<()> {
        let cfg = &self.services.config;
        tracing::info!(
            stations = ?cfg.active_stations,
            interval_s = cfg.dynamic_interval_seconds,
            lookahead_days = cfg.dynamic_lookahead_days,
            model = ?cfg.model_mode,
            "dynamic engine starting"
        );

        let mut cycle_count: u64 = 0;
        let mut total_trades: u64 = 0;

        while !self.shutdown.load(Ordering::SeqCst) {
            cycle_count += 1;
            let cycle_start = Utc::now();
            tracing::info!(cycle = cycle_count, "cycle starting");

            let mut cycle_trades: u64 = 0;
            let today = cycle_start.date_naive();

            'cycle: for station_code in &cfg.active_stations {
                let Some(station) = self.services.registry.get(station_code) else {
                    tracing::warn!(station = %station_code, "station not in registry");
                    continue;
                };
                let station = station.clone();

                for offset in 0..cfg.dynamic_lookahead_days {
                    if self.shutdown.load(Ordering::SeqCst) {
                        tracing::info!("interrupt received, stopping after in-flight item");
                        break 'cycle;
                    }

                    let event_day = today + Duration::days(offset as i64);
                    match self.evaluate(&station, event_day, cycle_start).await {
                        Ok(trades) => cycle_trades += trades as u64,
                        // Losing the ledger or snapshot substrate is not
                        // survivable; everything else skips the item.
                        Err(e @ (EngineError::Ledger(_) | EngineError::Snapshot(_))) => {
                            tracing::error!(error = %e, "unrecoverable storage failure");
                            return Err(e);
                        }
                        Err(e) => {
                            tracing::error!(
                                station = %station.station_code,
                                day = %event_day,
                                error = %e,
                                "evaluation failed, continuing"
                            );
                        }
                    }
                }
            }

            total_trades += cycle_trades;
            let elapsed = (Utc::now() - cycle_start).num_milliseconds() as f64 / 1000.0;
            tracing::info!(
                cycle = cycle_count,
                duration_s = elapsed,
                trades = cycle_trades,
                total_trades = total_trades,
                "cycle complete"
            );

            self.sleep_until(cycle_start + Duration::seconds(cfg.dynamic_interval_seconds as i64))
                .await;
        }

        tracing::info!(
            cycles = cycle_count,
            total_trades = total_trades,
            "dynamic engine stopped"
        );
        Ok(())
    }

    /// Evaluate one (station, day): fetch, map, size, record, snapshot.
    /// Snapshots are written whether or not any trade was emitted.
    async fn evaluate(
        &mut self,
        station: &Station,
        event_day: NaiveDate,
        cycle_time: DateTime<Utc>,
    ) -> EngineResult<usize> {
        let cfg = &self.services.config;
        let fetcher = &self.services.fetcher;

        if !fetcher.have_open_markets(&station.city, event_day).await {
            tracing::debug!(city = %station.city, day = %event_day, "no open markets");
            return Ok(0);
        }

        let forecast = fetcher.fetch_forecast(station, event_day).await?;
        let (brackets, prices) = fetcher.fetch_market(&station.city, event_day).await?;
        if brackets.is_empty() {
            tracing::debug!(city = %station.city, day = %event_day, "no brackets");
            return Ok(0);
        }
        let observations = fetcher.fetch_observations(station, event_day).await;

        let probs = prob::map_daily_high(
            &forecast,
            &brackets,
            cfg.model_mode,
            SigmaBounds::default(),
            &self.services.toggles,
            &self.services.calibration,
        )?;

        // Merge in market prices; brackets without a price drop out of the
        // sizing input (they stay in the market snapshot).
        let priced: Vec<BracketProb> = probs
            .iter()
            .zip(prices.iter())
            .filter_map(|(prob, price)| {
                price.map(|p| BracketProb {
                    bracket: prob.bracket.clone(),
                    p_zeus: prob.p_zeus,
                    p_mkt: Some(p),
                    sigma_z: prob.sigma_z,
                })
            })
            .collect();

        let trades: Vec<EdgeDecision> = if priced.is_empty() {
            Vec::new()
        } else {
            let depth = fetcher.fetch_depth(&brackets).await;
            self.sizer
                .decide(&priced, cfg.daily_bankroll_cap, Some(&depth))?
                .into_iter()
                .filter(|d| d.edge > 0.0)
                .collect()
        };

        if !trades.is_empty() {
            tracing::info!(
                city = %station.city,
                day = %event_day,
                count = trades.len(),
                "positive edges found"
            );
            let rows: Vec<TradeRow> = trades
                .iter()
                .map(|decision| {
                    let prob = priced.iter().find(|p| {
                        p.bracket.market_id == decision.bracket.market_id
                    });
                    TradeRow::from_decision(decision, &station.station_code, prob)
                })
                .collect();
            self.ledger.append(&rows)?;
        }

        self.snapshotter.save_cycle(
            station,
            event_day,
            cycle_time,
            &forecast,
            &brackets,
            &prices,
            &trades,
            &priced,
            &observations,
        )?;

        Ok(trades.len())
    }

    /// Sleep until `deadline`, polling the shutdown flag every second. A
    /// deadline already in the past returns immediately.
    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            let remaining = deadline - Utc::now();
            if remaining <= Duration::zero() {
                return;
            }
            let step = remaining
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(1))
                .min(std::time::Duration::from_secs(1));
            tokio::time::sleep(step).await;
        }
    }
}
