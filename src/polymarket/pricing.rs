//! CLOB pricing: midpoints, order-book depth, and historical opening prices.

use crate::errors::{EngineError, EngineResult};
use crate::types::Bracket;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Aggregated order-book liquidity for one market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDepth {
    pub token_id: String,
    /// Total USD resting on the bid side (sum of price * size).
    pub bid_depth_usd: f64,
    pub ask_depth_usd: f64,
    /// (best_ask - best_bid) / mid in basis points, when both sides exist.
    pub spread_bps: Option<f64>,
    pub mid_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BookLevel {
    price: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct OrderBook {
    #[serde(default)]
    bids: Vec<BookLevel>,
    #[serde(default)]
    asks: Vec<BookLevel>,
}

pub struct PolyPricing {
    client: reqwest::Client,
    clob_base: String,
    gamma_base: String,
}

impl PolyPricing {
    pub fn new(clob_base: &str, gamma_base: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            clob_base: clob_base.trim_end_matches('/').to_string(),
            gamma_base: gamma_base.trim_end_matches('/').to_string(),
        }
    }

    /// The bracket's pricing key: the CLOB token id, falling back to the
    /// market id for older snapshots that predate the split.
    fn price_token(bracket: &Bracket) -> EngineResult<&str> {
        bracket
            .token_id
            .as_deref()
            .or(bracket.market_id.as_deref())
            .ok_or_else(|| {
                EngineError::Precondition(format!("bracket {} has no market_id", bracket.name))
            })
    }

    /// Market-implied probability from the midpoint, clamped to [0, 1].
    pub async fn midprob(&self, bracket: &Bracket) -> EngineResult<f64> {
        let token = Self::price_token(bracket)?;
        let url = format!("{}/midpoint", self.clob_base);
        let data = self
            .get_with_retries(&url, &[("token_id", token)], "clob")
            .await?;

        let mid = data
            .get("mid")
            .and_then(value_as_f64)
            .ok_or_else(|| EngineError::Malformed(format!("no midprice for {}", bracket.name)))?;

        if !(0.0..=1.0).contains(&mid) {
            tracing::warn!(bracket = %bracket.name, mid = mid, "midprice out of range, clamping");
        }
        Ok(mid.clamp(0.0, 1.0))
    }

    /// Order-book depth for the liquidity gate.
    pub async fn depth(&self, bracket: &Bracket) -> EngineResult<MarketDepth> {
        let token = Self::price_token(bracket)?;
        let url = format!("{}/book", self.clob_base);
        let data = self
            .get_with_retries(&url, &[("token_id", token)], "clob")
            .await?;

        let book: OrderBook = serde_json::from_value(data)
            .map_err(|e| EngineError::Malformed(format!("order book for {}: {e}", bracket.name)))?;

        let side_depth = |levels: &[BookLevel]| -> f64 {
            levels
                .iter()
                .filter_map(|l| Some(l.price.parse::<f64>().ok()? * l.size.parse::<f64>().ok()?))
                .sum()
        };
        let bid_depth_usd = side_depth(&book.bids);
        let ask_depth_usd = side_depth(&book.asks);

        let best_bid = book
            .bids
            .iter()
            .filter_map(|l| l.price.parse::<f64>().ok())
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))));
        let best_ask = book
            .asks
            .iter()
            .filter_map(|l| l.price.parse::<f64>().ok())
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.min(p))));

        let (mid_price, spread_bps) = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => {
                let mid = (bid + ask) / 2.0;
                let spread = if mid > 0.0 {
                    Some((ask - bid) / mid * 10_000.0)
                } else {
                    None
                };
                (Some(mid), spread)
            }
            _ => (None, None),
        };

        Ok(MarketDepth {
            token_id: token.to_string(),
            bid_depth_usd,
            ask_depth_usd,
            spread_bps,
            mid_price,
        })
    }

    /// Historical opening price for a (typically closed) market: the first
    /// point of the hourly price history. `None` when the venue has nothing.
    pub async fn opening_price(&self, bracket: &Bracket) -> EngineResult<Option<f64>> {
        let Some(market_id) = bracket.market_id.as_deref() else {
            tracing::warn!(bracket = %bracket.name, "no market_id for price history");
            return Ok(None);
        };

        let url = format!("{}/prices-history", self.gamma_base);
        let data = self
            .get_with_retries(
                &url,
                &[
                    ("market", market_id),
                    ("interval", "1h"),
                    ("fidelity", "24"),
                ],
                "gamma",
            )
            .await?;

        // Either a bare array of points or {"history": [...]}.
        let points = match &data {
            Value::Array(points) => points.as_slice(),
            Value::Object(_) => data
                .get("history")
                .and_then(Value::as_array)
                .map(|v| v.as_slice())
                .unwrap_or(&[]),
            _ => &[],
        };

        let open = points
            .first()
            .and_then(|p| p.get("p").or_else(|| p.get("price")))
            .and_then(value_as_f64);

        if open.is_none() {
            tracing::debug!(bracket = %bracket.name, "no price history available");
        }
        Ok(open)
    }

    async fn get_with_retries(
        &self,
        url: &str,
        query: &[(&str, &str)],
        api: &'static str,
    ) -> EngineResult<Value> {
        let mut last_err = EngineError::Upstream("no attempt made".into());
        for attempt in 1..=3u32 {
            let result = async {
                let resp = self.client.get(url).query(query).send().await?;
                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(EngineError::Api {
                        api,
                        status: status.as_u16(),
                        body,
                    });
                }
                resp.json::<Value>()
                    .await
                    .map_err(|e| EngineError::Malformed(format!("{api} response: {e}")))
            }
            .await;

            match result {
                Ok(v) => return Ok(v),
                Err(e) => {
                    tracing::warn!(url = url, attempt = attempt, error = %e, "price fetch failed");
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
}

/// Accept numbers that arrive as JSON numbers or as decimal strings.
fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_as_f64_accepts_both_forms() {
        assert_eq!(value_as_f64(&serde_json::json!(0.45)), Some(0.45));
        assert_eq!(value_as_f64(&serde_json::json!("0.45")), Some(0.45));
        assert_eq!(value_as_f64(&serde_json::json!(null)), None);
    }

    #[test]
    fn test_order_book_depth_math() {
        let book: OrderBook = serde_json::from_str(
            r#"{
                "bids": [{"price": "0.40", "size": "100"}, {"price": "0.38", "size": "50"}],
                "asks": [{"price": "0.44", "size": "200"}]
            }"#,
        )
        .unwrap();
        let bid_depth: f64 = book
            .bids
            .iter()
            .filter_map(|l| Some(l.price.parse::<f64>().ok()? * l.size.parse::<f64>().ok()?))
            .sum();
        assert!((bid_depth - 59.0).abs() < 1e-9);
    }

    #[test]
    fn test_price_token_prefers_clob_token() {
        let mut bracket = Bracket::new(59, 60);
        bracket.market_id = Some("market".into());
        bracket.token_id = Some("token".into());
        assert_eq!(PolyPricing::price_token(&bracket).unwrap(), "token");

        bracket.token_id = None;
        assert_eq!(PolyPricing::price_token(&bracket).unwrap(), "market");

        bracket.market_id = None;
        assert!(PolyPricing::price_token(&bracket).is_err());
    }
}
