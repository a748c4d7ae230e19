//! Just-in-time fetching façade over the three upstream clients.
//!
//! Each method is side-effect-free beyond HTTP; snapshots are written by the
//! snapshotter, never here. Failures stay scoped: a dead price feed for one
//! bracket yields `None` at that index instead of aborting the batch.

use crate::config::AppConfig;
use crate::errors::EngineResult;
use crate::metar::{MetarClient, MetarObservation};
use crate::polymarket::discovery::PolyDiscovery;
use crate::polymarket::pricing::{MarketDepth, PolyPricing};
use crate::registry::Station;
use crate::timeutil;
use crate::types::{Bracket, Forecast};
use crate::zeus::ZeusClient;
use chrono::{Duration, NaiveDate, Utc};
use serde_json::Value;
use std::collections::HashMap;

pub struct JitFetcher {
    pub zeus: ZeusClient,
    pub discovery: PolyDiscovery,
    pub pricing: PolyPricing,
    pub metar: MetarClient,
}

impl JitFetcher {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            zeus: ZeusClient::new(&cfg.zeus_api_base, &cfg.zeus_api_key),
            discovery: PolyDiscovery::new(&cfg.gamma_base),
            pricing: PolyPricing::new(&cfg.clob_base, &cfg.gamma_base),
            metar: MetarClient::new(&cfg.metar_api_base, &cfg.metar_user_agent),
        }
    }

    /// Cheap pre-check: does an event with at least one open market exist
    /// for (city, day)? Errors degrade to `false` -- the cycle just skips.
    pub async fn have_open_markets(&self, city: &str, day: NaiveDate) -> bool {
        match self.discovery.find_event(city, day).await {
            Ok(Some(event)) => {
                let open = event
                    .get("markets")
                    .and_then(Value::as_array)
                    .map(|markets| {
                        markets
                            .iter()
                            .filter(|m| !m.get("closed").and_then(Value::as_bool).unwrap_or(false))
                            .count()
                    })
                    .unwrap_or(0);
                open > 0
            }
            Ok(None) => false,
            Err(e) => {
                tracing::debug!(city = city, day = %day, error = %e, "open-market check failed");
                false
            }
        }
    }

    /// Fetch 24 hourly points starting at local midnight of the event day.
    /// The start instant keeps its local offset on the wire.
    pub async fn fetch_forecast(
        &self,
        station: &Station,
        event_day: NaiveDate,
    ) -> EngineResult<Forecast> {
        let tz = crate::registry::station_timezone(station)?;
        let start_local = timeutil::local_midnight(event_day, tz).fixed_offset();
        self.zeus
            .fetch(
                station.lat,
                station.lon,
                start_local,
                24,
                &station.station_code,
            )
            .await
    }

    /// Discover brackets and fetch a midpoint for each, aligned by index.
    /// A failed price fetch maps to `None` at that index.
    pub async fn fetch_market(
        &self,
        city: &str,
        event_day: NaiveDate,
    ) -> EngineResult<(Vec<Bracket>, Vec<Option<f64>>)> {
        let brackets = self.discovery.list_temp_brackets(city, event_day).await?;
        if brackets.is_empty() {
            return Ok((brackets, Vec::new()));
        }

        let mut prices = Vec::with_capacity(brackets.len());
        for bracket in &brackets {
            match self.pricing.midprob(bracket).await {
                Ok(p) => prices.push(Some(p)),
                Err(e) => {
                    tracing::warn!(bracket = %bracket.name, error = %e, "price fetch failed");
                    prices.push(None);
                }
            }
        }

        let valid = prices.iter().filter(|p| p.is_some()).count();
        tracing::info!(
            city = city,
            priced = valid,
            total = brackets.len(),
            "market fetched"
        );
        Ok((brackets, prices))
    }

    /// Order-book depth per market id, for the sizer's liquidity gate.
    /// Brackets whose book cannot be read are simply absent from the map.
    pub async fn fetch_depth(&self, brackets: &[Bracket]) -> HashMap<String, MarketDepth> {
        let mut depth = HashMap::new();
        for bracket in brackets {
            let Some(market_id) = bracket.market_id.clone() else {
                continue;
            };
            match self.pricing.depth(bracket).await {
                Ok(d) => {
                    depth.insert(market_id, d);
                }
                Err(e) => {
                    tracing::debug!(bracket = %bracket.name, error = %e, "depth fetch failed");
                }
            }
        }
        depth
    }

    /// Latest observations for the station. The upstream holds no history,
    /// so non-today event days return empty without touching the network.
    pub async fn fetch_observations(
        &self,
        station: &Station,
        event_day: NaiveDate,
    ) -> Vec<MetarObservation> {
        if event_day != Utc::now().date_naive() {
            tracing::debug!(day = %event_day, "skipping observations for non-today event");
            return Vec::new();
        }

        let end = Utc::now();
        let start = end - Duration::hours(24);
        match self.metar.fetch(&station.station_code, start, end).await {
            Ok(observations) => observations,
            Err(e) => {
                tracing::warn!(station = %station.station_code, error = %e, "observation fetch failed");
                Vec::new()
            }
        }
    }
}
