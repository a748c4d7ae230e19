//! Edge calculation and Kelly position sizing.
//!
//! For each bracket with a market price: cost-adjusted edge, binary-outcome
//! Kelly fraction, then a cap chain that only ever tightens --
//! kelly_cap * bankroll, the per-market USD ceiling, and available bid
//! depth. Deterministic given inputs; no side effects beyond logging.

use crate::errors::{EngineError, EngineResult};
use crate::polymarket::pricing::MarketDepth;
use crate::types::{BracketProb, EdgeDecision};
use smallvec::SmallVec;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Sizer {
    pub edge_min: f64,
    pub fee_bp: u32,
    pub slippage_bp: u32,
    pub kelly_cap: f64,
    pub per_market_cap: f64,
    pub liquidity_min_usd: f64,
}

impl Sizer {
    pub fn from_config(cfg: &crate::config::AppConfig) -> Self {
        Self {
            edge_min: cfg.edge_min,
            fee_bp: cfg.fee_bp,
            slippage_bp: cfg.slippage_bp,
            kelly_cap: cfg.kelly_cap,
            per_market_cap: cfg.per_market_cap,
            liquidity_min_usd: cfg.liquidity_min_usd,
        }
    }

    /// Expected edge after costs: (p_zeus - p_mkt) - fees - slippage.
    #[inline]
    pub fn compute_edge(&self, p_zeus: f64, p_mkt: f64) -> f64 {
        let fee = self.fee_bp as f64 / 10_000.0;
        let slip = self.slippage_bp as f64 / 10_000.0;
        (p_zeus - p_mkt) - fee - slip
    }

    /// Kelly fraction for a binary bet at `price` with true probability
    /// `p_zeus`: f* = (b*p - q) / b with payoff multiplier b = 1/price - 1.
    /// Negative edge or a degenerate price yields 0.
    #[inline]
    pub fn kelly_fraction(&self, p_zeus: f64, price: f64) -> f64 {
        if price <= 0.0 || price >= 1.0 {
            tracing::warn!(price = price, "invalid price, kelly fraction forced to 0");
            return 0.0;
        }
        let b = 1.0 / price - 1.0;
        if b <= 0.0 {
            return 0.0;
        }
        let f = (b * p_zeus - (1.0 - p_zeus)) / b;
        f.max(0.0)
    }

    /// Size every bracket with a market price. Brackets are skipped (never
    /// errored) when the edge is below threshold, Kelly is non-positive, or
    /// bid depth is under the liquidity floor.
    pub fn decide(
        &self,
        probs: &[BracketProb],
        bankroll_usd: f64,
        depth: Option<&HashMap<String, MarketDepth>>,
    ) -> EngineResult<SmallVec<[EdgeDecision; 8]>> {
        if probs.is_empty() {
            return Err(EngineError::Precondition(
                "no bracket probabilities provided".into(),
            ));
        }

        tracing::debug!(
            brackets = probs.len(),
            bankroll = bankroll_usd,
            "sizing positions"
        );

        let mut decisions: SmallVec<[EdgeDecision; 8]> = SmallVec::new();

        for bp in probs {
            let Some(p_mkt) = bp.p_mkt else {
                tracing::debug!(bracket = %bp.bracket.name, "skip: no market probability");
                continue;
            };

            let edge = self.compute_edge(bp.p_zeus, p_mkt);
            if edge < self.edge_min {
                tracing::debug!(
                    bracket = %bp.bracket.name,
                    edge = edge,
                    "skip: edge below threshold"
                );
                continue;
            }

            let f_kelly = self.kelly_fraction(bp.p_zeus, p_mkt);
            if f_kelly <= 0.0 {
                tracing::debug!(bracket = %bp.bracket.name, "skip: non-positive kelly");
                continue;
            }

            let kelly_size = f_kelly * bankroll_usd;

            // Liquidity gate, only when depth data was supplied for the market.
            let bid_depth = depth
                .zip(bp.bracket.market_id.as_ref())
                .and_then(|(d, id)| d.get(id))
                .map(|d| d.bid_depth_usd);

            if let Some(available) = bid_depth {
                if available < self.liquidity_min_usd {
                    tracing::debug!(
                        bracket = %bp.bracket.name,
                        depth = available,
                        "skip: bid depth below liquidity floor"
                    );
                    continue;
                }
            }

            // Cap chain: each step only tightens.
            let mut size = kelly_size.min(self.kelly_cap * bankroll_usd);
            size = size.min(self.per_market_cap);
            if let Some(available) = bid_depth {
                size = size.min(available);
            }

            let mut reason_parts: SmallVec<[&str; 3]> = SmallVec::new();
            if edge >= self.edge_min * 2.0 {
                reason_parts.push("strong_edge");
            }
            if f_kelly >= self.kelly_cap {
                reason_parts.push("kelly_capped");
            }
            if bid_depth.is_some_and(|d| d < kelly_size) {
                reason_parts.push("liquidity_limited");
            }
            let reason = if reason_parts.is_empty() {
                "standard".to_string()
            } else {
                reason_parts.join(", ")
            };

            tracing::info!(
                bracket = %bp.bracket.name,
                edge = edge,
                f_kelly = f_kelly,
                size_usd = size,
                reason = %reason,
                "edge decision"
            );

            decisions.push(EdgeDecision {
                bracket: bp.bracket.clone(),
                edge,
                f_kelly,
                size_usd: size,
                reason,
                timestamp: chrono::Utc::now(),
            });
        }

        tracing::debug!(
            decisions = decisions.len(),
            from = probs.len(),
            "sizing complete"
        );

        Ok(decisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bracket;

    fn sizer() -> Sizer {
        Sizer {
            edge_min: 0.05,
            fee_bp: 50,
            slippage_bp: 30,
            kelly_cap: 0.10,
            per_market_cap: 500.0,
            liquidity_min_usd: 1000.0,
        }
    }

    fn prob(lower: i32, p_zeus: f64, p_mkt: Option<f64>) -> BracketProb {
        let mut bracket = Bracket::new(lower, lower + 1);
        bracket.market_id = Some(format!("mkt-{lower}"));
        BracketProb {
            bracket,
            p_zeus,
            p_mkt,
            sigma_z: Some(1.0),
        }
    }

    #[test]
    fn test_equal_probabilities_never_trade() {
        // p_zeus == p_mkt: edge is exactly -(fees + slippage), strictly
        // negative, so nothing is emitted.
        let s = sizer();
        let edge = s.compute_edge(0.5, 0.5);
        assert!((edge - (-0.008)).abs() < 1e-12);
        let decisions = s.decide(&[prob(60, 0.5, Some(0.5))], 1000.0, None).unwrap();
        assert!(decisions.is_empty());
    }

    #[test]
    fn test_edge_below_threshold_skipped() {
        // Edge = 0.02 - 0.008 = 0.012 < 0.05.
        let s = sizer();
        let decisions = s
            .decide(&[prob(60, 0.52, Some(0.50))], 1000.0, None)
            .unwrap();
        assert!(decisions.is_empty());
    }

    #[test]
    fn test_kelly_cap_bites() {
        let s = Sizer {
            edge_min: 0.01,
            fee_bp: 0,
            slippage_bp: 0,
            kelly_cap: 0.10,
            per_market_cap: 1_000_000.0,
            liquidity_min_usd: 0.0,
        };
        // b = 1, f* = (0.80 - 0.20) / 1 = 0.60; cap at 10% of 1000.
        let decisions = s.decide(&[prob(60, 0.80, Some(0.50))], 1000.0, None).unwrap();
        assert_eq!(decisions.len(), 1);
        let d = &decisions[0];
        assert!((d.f_kelly - 0.60).abs() < 1e-9);
        assert!((d.size_usd - 100.0).abs() < 1e-9);
        assert!(d.reason.contains("kelly_capped"));
    }

    #[test]
    fn test_size_never_exceeds_caps() {
        let s = sizer();
        let decisions = s
            .decide(&[prob(60, 0.90, Some(0.40))], 100_000.0, None)
            .unwrap();
        assert_eq!(decisions.len(), 1);
        let d = &decisions[0];
        assert!(d.size_usd <= s.kelly_cap * 100_000.0);
        assert!(d.size_usd <= s.per_market_cap);
    }

    #[test]
    fn test_liquidity_floor_skips() {
        let s = sizer();
        let mut depth = HashMap::new();
        depth.insert(
            "mkt-60".to_string(),
            MarketDepth {
                token_id: "mkt-60".into(),
                bid_depth_usd: 500.0,
                ask_depth_usd: 800.0,
                spread_bps: None,
                mid_price: None,
            },
        );
        let decisions = s
            .decide(&[prob(60, 0.80, Some(0.50))], 10_000.0, Some(&depth))
            .unwrap();
        assert!(decisions.is_empty(), "below liquidity_min_usd must skip");
    }

    #[test]
    fn test_depth_caps_size() {
        let s = Sizer {
            liquidity_min_usd: 1000.0,
            per_market_cap: 10_000.0,
            ..sizer()
        };
        let mut depth = HashMap::new();
        depth.insert(
            "mkt-60".to_string(),
            MarketDepth {
                token_id: "mkt-60".into(),
                bid_depth_usd: 1200.0,
                ask_depth_usd: 2000.0,
                spread_bps: Some(40.0),
                mid_price: Some(0.5),
            },
        );
        // Kelly size: 0.6 * 100k capped to 10% = 10k, then per-market 10k,
        // then depth 1200.
        let decisions = s
            .decide(&[prob(60, 0.80, Some(0.50))], 100_000.0, Some(&depth))
            .unwrap();
        assert_eq!(decisions.len(), 1);
        assert!((decisions[0].size_usd - 1200.0).abs() < 1e-9);
        assert!(decisions[0].reason.contains("liquidity_limited"));
    }

    #[test]
    fn test_missing_price_skipped_not_errored() {
        let s = sizer();
        let decisions = s
            .decide(
                &[prob(60, 0.80, None), prob(61, 0.80, Some(0.50))],
                1000.0,
                None,
            )
            .unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].bracket.lower_f, 61);
    }

    #[test]
    fn test_invalid_price_yields_no_decision() {
        let s = sizer();
        assert_eq!(s.kelly_fraction(0.8, 0.0), 0.0);
        assert_eq!(s.kelly_fraction(0.8, 1.0), 0.0);
        let decisions = s.decide(&[prob(60, 0.95, Some(1.0))], 1000.0, None);
        // Price 1.0: edge 0.95-1.0 < edge_min, skipped upstream anyway.
        assert!(decisions.unwrap().is_empty());
    }

    #[test]
    fn test_empty_probs_is_precondition_error() {
        let s = sizer();
        assert!(matches!(
            s.decide(&[], 1000.0, None),
            Err(EngineError::Precondition(_))
        ));
    }

    #[test]
    fn test_decisions_preserve_input_order() {
        let s = Sizer {
            edge_min: 0.01,
            fee_bp: 0,
            slippage_bp: 0,
            ..sizer()
        };
        let probs = vec![
            prob(62, 0.60, Some(0.40)),
            prob(60, 0.70, Some(0.40)),
            prob(61, 0.65, Some(0.40)),
        ];
        let decisions = s.decide(&probs, 1000.0, None).unwrap();
        let lowers: Vec<i32> = decisions.iter().map(|d| d.bracket.lower_f).collect();
        assert_eq!(lowers, vec![62, 60, 61]);
    }
}
