//! Winner extraction for resolved events.
//!
//! The venue reports a per-outcome current-price array on each market; the
//! single market whose YES outcome price reads exactly `"1"` is the winner.
//! That string is the reliable resolution signal -- the `resolved`/`closed`
//! flags lag it and are not consulted for winner identity.

use serde_json::Value;

use super::discovery::parse_bracket_from_question;

/// Normalize a bracket name for comparison: strip the venue's decoration
/// (`°F`, `≤`, `≥`) and surrounding whitespace. Comparison is then exact.
pub fn normalize_bracket_name(name: &str) -> String {
    name.replace("°F", "")
        .replace('°', "")
        .replace('≤', "")
        .replace('≥', "")
        .trim()
        .to_string()
}

/// Scan an event's markets for the outcome priced at `"1"` and return the
/// winning bracket in normalized form ("58-59"). `None` while unresolved.
pub fn winner_from_event(event: &Value) -> Option<String> {
    let markets = event.get("markets")?.as_array()?;

    for market in markets {
        if !yes_outcome_won(market) {
            continue;
        }

        let question = market.get("question").and_then(Value::as_str)?;
        if let Some((lower, upper)) = parse_bracket_from_question(question) {
            return Some(format!("{lower}-{upper}"));
        }
        // Tail brackets ("≤55°F") do not match the range parser; fall back
        // to the normalized question-derived outcome name.
        if let Some(name) = market.get("groupItemTitle").and_then(Value::as_str) {
            return Some(normalize_bracket_name(name));
        }
    }

    None
}

/// Whether the market's YES outcome carries the literal resolution price.
/// `outcomePrices` arrives either as an array or as a JSON-encoded string.
fn yes_outcome_won(market: &Value) -> bool {
    let first = match market.get("outcomePrices") {
        Some(Value::Array(prices)) => prices.first().cloned(),
        Some(Value::String(s)) => serde_json::from_str::<Vec<Value>>(s)
            .ok()
            .and_then(|prices| prices.first().cloned()),
        _ => None,
    };

    match first {
        Some(Value::String(s)) => s == "1",
        Some(Value::Number(n)) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(markets: Value) -> Value {
        serde_json::json!({ "slug": "highest-temperature-in-london-on-november-12", "markets": markets })
    }

    #[test]
    fn test_winner_found_by_price_string() {
        let ev = event(serde_json::json!([
            {"question": "57-58°F?", "outcomePrices": "[\"0\", \"1\"]"},
            {"question": "58-59°F?", "outcomePrices": "[\"1\", \"0\"]"},
            {"question": "59-60°F?", "outcomePrices": "[\"0\", \"1\"]"}
        ]));
        assert_eq!(winner_from_event(&ev).as_deref(), Some("58-59"));
    }

    #[test]
    fn test_no_winner_while_unresolved() {
        let ev = event(serde_json::json!([
            {"question": "58-59°F?", "outcomePrices": "[\"0.62\", \"0.38\"]"},
            {"question": "59-60°F?", "outcomePrices": "[\"0.41\", \"0.59\"]"}
        ]));
        assert_eq!(winner_from_event(&ev), None);
    }

    #[test]
    fn test_winner_with_array_prices() {
        let ev = event(serde_json::json!([
            {"question": "60-61°F?", "outcomePrices": ["1", "0"]}
        ]));
        assert_eq!(winner_from_event(&ev).as_deref(), Some("60-61"));
    }

    #[test]
    fn test_normalize_strips_decoration() {
        assert_eq!(normalize_bracket_name("58-59°F"), "58-59");
        assert_eq!(normalize_bracket_name(" 58-59 "), "58-59");
        assert_eq!(normalize_bracket_name("≤55°F"), "55");
        assert_eq!(normalize_bracket_name("≥80°F"), "80");
    }

    #[test]
    fn test_mapper_names_survive_normalization() {
        // Every "{lo}-{hi}°F" name the pipeline produces must normalize to
        // the winner format the venue scan returns.
        let bracket = crate::types::Bracket::new(58, 59);
        assert_eq!(normalize_bracket_name(&bracket.name), "58-59");
    }
}
