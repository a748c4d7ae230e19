//! Market discovery: find the temperature-bracket event for a city/day and
//! parse its markets into `Bracket`s.
//!
//! Events are addressed by slug; slugs are generated from the city name and
//! date and tried in priority order (the venue has used several shapes, and
//! New York events sometimes live under "nyc"). Bracket bounds are parsed
//! out of each market's question text.

use crate::errors::{EngineError, EngineResult};
use crate::types::Bracket;
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

pub struct PolyDiscovery {
    client: reqwest::Client,
    gamma_base: String,
}

impl PolyDiscovery {
    pub fn new(gamma_base: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            gamma_base: gamma_base.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch an event by slug. 404 / empty responses are `None`, not errors.
    pub async fn get_event_by_slug(&self, slug: &str) -> EngineResult<Option<Value>> {
        let url = format!("{}/events/slug/{}", self.gamma_base, slug);

        let mut last_err = EngineError::Upstream("no attempt made".into());
        for attempt in 1..=3u32 {
            let result = async {
                let resp = self.client.get(&url).send().await?;
                let status = resp.status();
                if status.as_u16() == 404 {
                    return Ok(None);
                }
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(EngineError::Api {
                        api: "gamma",
                        status: status.as_u16(),
                        body,
                    });
                }
                let data: Value = resp
                    .json()
                    .await
                    .map_err(|e| EngineError::Malformed(format!("event response: {e}")))?;
                Ok(Some(data))
            }
            .await;

            match result {
                // The API answers with either a bare event object or an array.
                Ok(Some(Value::Array(events))) => {
                    return Ok(events.into_iter().next());
                }
                Ok(other) => return Ok(other),
                Err(e) => {
                    tracing::warn!(slug = slug, attempt = attempt, error = %e, "event fetch failed");
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

    /// Try every slug pattern for (city, day) until an event answers.
    pub async fn find_event(&self, city: &str, day: NaiveDate) -> EngineResult<Option<Value>> {
        for slug in generate_event_slugs(city, day) {
            tracing::debug!(slug = %slug, "trying event slug");
            if let Some(event) = self.get_event_by_slug(&slug).await? {
                tracing::info!(slug = %slug, "found event");
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Discover the bracket set for a city/day, sorted by lower bound.
    /// No event or no parseable markets yields an empty list.
    pub async fn list_temp_brackets(
        &self,
        city: &str,
        day: NaiveDate,
    ) -> EngineResult<Vec<Bracket>> {
        tracing::info!(city = city, day = %day, "discovering temperature brackets");

        let Some(event) = self.find_event(city, day).await? else {
            tracing::warn!(city = city, day = %day, "no event found");
            return Ok(Vec::new());
        };

        let mut brackets: Vec<Bracket> = event
            .get("markets")
            .and_then(Value::as_array)
            .map(|markets| {
                markets
                    .iter()
                    .filter_map(parse_bracket_from_market)
                    .collect()
            })
            .unwrap_or_default();

        brackets.sort_by_key(|b| b.lower_f);

        if brackets.is_empty() {
            tracing::warn!(city = city, day = %day, "event has no parseable brackets");
        } else {
            tracing::info!(
                city = city,
                count = brackets.len(),
                range = format!(
                    "[{}-{}°F)",
                    brackets[0].lower_f,
                    brackets[brackets.len() - 1].upper_f
                ),
                "parsed brackets"
            );
        }

        Ok(brackets)
    }
}

/// Candidate event slugs for a city/date, in priority order.
pub fn generate_event_slugs(city: &str, day: NaiveDate) -> Vec<String> {
    let city_clean = city
        .to_lowercase()
        .replace(" (airport)", "")
        .replace(" (city)", "");
    let city_slug = city_clean.replace(' ', "-");

    let month = month_name(day.month());
    let day_num = day.day();

    let mut patterns = vec![
        format!("highest-temperature-in-{city_slug}-on-{month}-{day_num}"),
        format!("temperature-in-{city_slug}-on-{month}-{day_num}"),
        format!("high-temperature-in-{city_slug}-on-{month}-{day_num}"),
        format!("{city_slug}-temperature-on-{month}-{day_num}"),
    ];

    if city_clean.contains("new york") || city_clean.contains("nyc") {
        patterns.push(format!("highest-temperature-in-nyc-on-{month}-{day_num}"));
        patterns.push(format!("temperature-in-nyc-on-{month}-{day_num}"));
        patterns.push(format!("high-temperature-in-nyc-on-{month}-{day_num}"));
    }

    patterns
}

fn month_name(month: u32) -> &'static str {
    match month {
        1 => "january",
        2 => "february",
        3 => "march",
        4 => "april",
        5 => "may",
        6 => "june",
        7 => "july",
        8 => "august",
        9 => "september",
        10 => "october",
        11 => "november",
        12 => "december",
        _ => unreachable!("chrono months are 1-12"),
    }
}

/// Parse "(N)-(M)°F"-style bounds from a market question.
/// Accepts hyphen/en-dash/em-dash, "N to M°F", and "N - M degrees";
/// bounds must satisfy 0 < N < M < 150.
pub fn parse_bracket_from_question(question: &str) -> Option<(i32, i32)> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)(\d+)\s*[-–—]\s*(\d+)\s*°?F").expect("valid regex"),
            Regex::new(r"(?i)(\d+)\s+to\s+(\d+)\s*°?F").expect("valid regex"),
            Regex::new(r"(?i)(\d+)\s*-\s*(\d+)\s*degrees").expect("valid regex"),
        ]
    });

    for pattern in patterns {
        if let Some(caps) = pattern.captures(question) {
            let lower: i32 = caps.get(1)?.as_str().parse().ok()?;
            let upper: i32 = caps.get(2)?.as_str().parse().ok()?;
            if lower < upper && 0 < lower && upper < 150 {
                return Some((lower, upper));
            }
        }
    }
    None
}

/// Build a `Bracket` from a Gamma market object. Needs a question that
/// parses and a market id; the CLOB token id (first of `clobTokenIds`,
/// which arrives as an array or as a JSON-encoded string) is optional.
pub fn parse_bracket_from_market(market: &Value) -> Option<Bracket> {
    let question = market.get("question").and_then(Value::as_str)?;
    let market_id = match market.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return None,
    };

    let (lower_f, upper_f) = parse_bracket_from_question(question)?;

    let token_id = match market.get("clobTokenIds") {
        Some(Value::Array(ids)) => ids.first().and_then(Value::as_str).map(str::to_string),
        Some(Value::String(s)) => {
            // Either a JSON-encoded array ("[\"123\", ...]") or a comma list.
            serde_json::from_str::<Vec<String>>(s)
                .ok()
                .and_then(|ids| ids.into_iter().next())
                .or_else(|| {
                    s.split(',')
                        .next()
                        .map(|t| {
                            t.trim()
                                .trim_matches(|c| c == '"' || c == '[' || c == ']')
                                .to_string()
                        })
                        .filter(|t| !t.is_empty())
                })
        }
        _ => None,
    };

    Some(Bracket {
        name: format!("{lower_f}-{upper_f}°F"),
        lower_f,
        upper_f,
        market_id: Some(market_id),
        token_id,
        closed: market.get("closed").and_then(Value::as_bool),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_patterns() {
        assert_eq!(
            parse_bracket_from_question("Will the highest temperature be 59-60°F?"),
            Some((59, 60))
        );
        assert_eq!(
            parse_bracket_from_question("59\u{2013}60°F on November 12?"),
            Some((59, 60))
        );
        assert_eq!(parse_bracket_from_question("59 - 60°F"), Some((59, 60)));
        assert_eq!(parse_bracket_from_question("59 to 60°F"), Some((59, 60)));
        assert_eq!(
            parse_bracket_from_question("between 59 - 60 degrees"),
            Some((59, 60))
        );
    }

    #[test]
    fn test_question_bounds_validated() {
        assert_eq!(parse_bracket_from_question("60-59°F"), None);
        assert_eq!(parse_bracket_from_question("0-10°F"), None);
        assert_eq!(parse_bracket_from_question("100-200°F"), None);
        assert_eq!(parse_bracket_from_question("no numbers here"), None);
    }

    #[test]
    fn test_bracket_name_roundtrips_through_parser() {
        // Names the mapper produces must re-parse to the same bounds.
        let bracket = Bracket::new(58, 59);
        assert_eq!(parse_bracket_from_question(&bracket.name), Some((58, 59)));
    }

    #[test]
    fn test_parse_market_with_string_token_ids() {
        let market: Value = serde_json::from_str(
            r#"{
                "id": "514504",
                "question": "Will the highest temperature in London be 59-60°F on November 12?",
                "clobTokenIds": "[\"7131990\", \"7131991\"]",
                "closed": false
            }"#,
        )
        .unwrap();
        let bracket = parse_bracket_from_market(&market).unwrap();
        assert_eq!(bracket.name, "59-60°F");
        assert_eq!(bracket.market_id.as_deref(), Some("514504"));
        assert_eq!(bracket.token_id.as_deref(), Some("7131990"));
        assert_eq!(bracket.closed, Some(false));
    }

    #[test]
    fn test_parse_market_with_array_token_ids() {
        let market: Value = serde_json::from_str(
            r#"{"id": 99, "question": "60-61°F", "clobTokenIds": ["abc", "def"]}"#,
        )
        .unwrap();
        let bracket = parse_bracket_from_market(&market).unwrap();
        assert_eq!(bracket.market_id.as_deref(), Some("99"));
        assert_eq!(bracket.token_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_unparseable_market_dropped() {
        let market: Value =
            serde_json::from_str(r#"{"id": "1", "question": "Will it rain tomorrow?"}"#).unwrap();
        assert!(parse_bracket_from_market(&market).is_none());
    }

    #[test]
    fn test_slug_generation_basic() {
        let day = NaiveDate::from_ymd_opt(2025, 11, 11).unwrap();
        let slugs = generate_event_slugs("London", day);
        assert_eq!(slugs[0], "highest-temperature-in-london-on-november-11");
        assert!(slugs.iter().all(|s| !s.contains(' ')));
    }

    #[test]
    fn test_slug_generation_nyc_aliases() {
        let day = NaiveDate::from_ymd_opt(2025, 11, 5).unwrap();
        let slugs = generate_event_slugs("New York (Airport)", day);
        assert!(slugs.contains(&"highest-temperature-in-new-york-on-november-5".to_string()));
        assert!(slugs.contains(&"highest-temperature-in-nyc-on-november-5".to_string()));
    }
}
