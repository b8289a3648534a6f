use chrono::{Datelike, TimeZone, Timelike, Utc};
use tracing::{debug, info, warn};

use crate::types::MarketWindow;

const FIFTEEN_MIN: i64 = 900;

/// Finds active up/down market windows via the Gamma API.
///
/// The /markets listing does not reliably include the fast 15-minute series,
/// so discovery generates the candidate slugs directly from the clock and
/// queries /events per slug.
pub struct MarketFinder {
    client: reqwest::Client,
    gamma_url: String,
}

impl MarketFinder {
    pub fn new(gamma_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            gamma_url: gamma_url.trim_end_matches('/').to_string(),
        }
    }

    /// Return all currently active candidate windows.
    ///
    /// Per-slug failures are swallowed; the aggregate list always comes back.
    pub async fn find_active_windows(&self) -> Vec<MarketWindow> {
        let candidates = candidate_slugs(Utc::now().timestamp());
        debug!("Checking {} candidate slugs", candidates.len());

        let mut windows = Vec::new();
        for slug in &candidates {
            match self.fetch_window_by_slug(slug).await {
                Ok(Some(window)) => windows.push(window),
                Ok(None) => {}
                Err(e) => debug!("Failed to fetch {}: {}", slug, e),
            }
        }

        info!("Found {} active crypto price windows", windows.len());
        windows
    }

    /// Fetch a single event by exact slug match and parse it into a window.
    async fn fetch_window_by_slug(&self, slug: &str) -> Result<Option<MarketWindow>, String> {
        let url = format!("{}/events?slug={}", self.gamma_url, slug);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("HTTP error: {}", e))?;

        let text = resp.text().await.map_err(|e| format!("Body error: {}", e))?;

        let events: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| format!("JSON error: {}", e))?;

        let events_arr = match events.as_array() {
            Some(arr) if !arr.is_empty() => arr,
            _ => return Ok(None),
        };

        Ok(parse_event_to_window(&events_arr[0], slug))
    }
}

/// Parse a Gamma event into a MarketWindow, applying the eligibility gates:
/// open, accepting orders, two outcome tokens.
fn parse_event_to_window(event: &serde_json::Value, slug: &str) -> Option<MarketWindow> {
    if event.get("closed").and_then(|c| c.as_bool()).unwrap_or(false) {
        return None;
    }

    let markets = event.get("markets").and_then(|m| m.as_array())?;
    let market = markets.first()?;

    if !market
        .get("acceptingOrders")
        .and_then(|a| a.as_bool())
        .unwrap_or(false)
    {
        return None;
    }

    let token_ids = parse_token_ids(market.get("clobTokenIds"));
    if token_ids.len() < 2 {
        debug!("Market {} has fewer than 2 tokens", slug);
        return None;
    }

    let question = market
        .get("question")
        .and_then(|q| q.as_str())
        .unwrap_or("")
        .to_string();

    // condition_id is the 32-byte CTF settlement key from the market object;
    // event id is the Gamma integer. Keep them apart — only the former can
    // drive payoutDenominator / redeemPositions.
    let condition_id = market
        .get("conditionId")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();
    let event_id = json_to_string(event.get("id"));

    if condition_id.is_empty() {
        warn!("Event {} has no conditionId — set would be unredeemable", slug);
    }

    let end_time = event
        .get("endDate")
        .and_then(|s| s.as_str())
        .unwrap_or("")
        .to_string();
    let end_time_epoch = parse_iso_to_epoch(&end_time);

    Some(MarketWindow {
        condition_id,
        event_id,
        question,
        up_token_id: token_ids[0].clone(),
        down_token_id: token_ids[1].clone(),
        end_time,
        end_time_epoch,
        slug: Some(slug.to_string()),
    })
}

/// Candidate slugs for current and upcoming windows.
///
/// 15-minute btc/eth windows from 30 minutes back to 15 minutes ahead,
/// aligned to 900s boundaries, plus the hourly bitcoin/ethereum series.
pub fn candidate_slugs(now_s: i64) -> Vec<String> {
    let mut slugs = Vec::new();

    for asset in ["btc", "eth"] {
        slugs.extend(candidate_15m_slugs(asset, now_s));
    }
    for asset in ["bitcoin", "ethereum"] {
        slugs.extend(candidate_1h_slugs(asset, now_s));
    }

    slugs
}

fn candidate_15m_slugs(asset: &str, now_s: i64) -> Vec<String> {
    let start_from = ((now_s - 1800) / FIFTEEN_MIN) * FIFTEEN_MIN;
    let start_to = ((now_s + 900) / FIFTEEN_MIN) * FIFTEEN_MIN;

    let mut slugs = Vec::new();
    let mut start = start_from;
    while start <= start_to {
        slugs.push(format!("{}-updown-15m-{}", asset, start));
        start += FIFTEEN_MIN;
    }
    slugs
}

fn candidate_1h_slugs(asset: &str, now_s: i64) -> Vec<String> {
    let hour_start = (now_s / 3600) * 3600;
    [-2i64, -1, 0, 1]
        .iter()
        .map(|offset| build_1h_slug(asset, hour_start + offset * 3600))
        .collect()
}

/// Hourly slug like "bitcoin-up-or-down-february-9-10am-et".
fn build_1h_slug(asset: &str, epoch_s: i64) -> String {
    let dt = Utc.timestamp_opt(epoch_s, 0).single().unwrap_or_else(Utc::now);
    let month = month_name(dt.month());
    let day = dt.day();
    let hour24 = dt.hour();
    let hour12 = match hour24 % 12 {
        0 => 12,
        h => h,
    };
    let ampm = if hour24 < 12 { "am" } else { "pm" };

    format!("{}-up-or-down-{}-{}-{}{}-et", asset, month, day, hour12, ampm)
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
        _ => "december",
    }
}

/// clobTokenIds arrives as a JSON-encoded string containing an array.
fn parse_token_ids(raw: Option<&serde_json::Value>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    if let Some(arr) = raw.as_array() {
        return arr
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
    }
    if let Some(s) = raw.as_str() {
        if let Ok(parsed) = serde_json::from_str::<Vec<String>>(s) {
            return parsed;
        }
    }
    Vec::new()
}

fn json_to_string(v: Option<&serde_json::Value>) -> String {
    match v {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Parse an ISO 8601 end date to epoch seconds. Returns 0.0 on failure —
/// tolerated, the engine has a fallback for unknown end times.
pub fn parse_iso_to_epoch(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return dt.timestamp_millis() as f64 / 1000.0;
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ") {
        return dt.and_utc().timestamp_millis() as f64 / 1000.0;
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ") {
        return dt.and_utc().timestamp_millis() as f64 / 1000.0;
    }
    debug!("Could not parse end_time: {}", s);
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: clock at an exact 15-minute boundary.
    /// Expected: four slugs per asset covering -30min .. +15min, all aligned.
    #[test]
    fn test_15m_slugs_aligned() {
        let now = 1_700_000_100; // 1_700_000_100 / 900 != exact boundary
        let slugs = candidate_15m_slugs("btc", now);
        assert_eq!(slugs.len(), 4);
        for slug in &slugs {
            let ts: i64 = slug.rsplit('-').next().unwrap().parse().unwrap();
            assert_eq!(ts % 900, 0, "unaligned window start in {}", slug);
        }
        assert!(slugs[0].starts_with("btc-updown-15m-"));
    }

    /// Scenario: full candidate generation.
    /// Expected: both 15m assets and both hourly assets are covered.
    #[test]
    fn test_candidate_slugs_cover_all_cadences() {
        let slugs = candidate_slugs(1_700_000_000);
        assert!(slugs.iter().any(|s| s.starts_with("btc-updown-15m-")));
        assert!(slugs.iter().any(|s| s.starts_with("eth-updown-15m-")));
        assert!(slugs.iter().any(|s| s.starts_with("bitcoin-up-or-down-")));
        assert!(slugs.iter().any(|s| s.starts_with("ethereum-up-or-down-")));
    }

    /// Scenario: 2024-02-09 10:00 UTC.
    /// Expected: human-readable hourly slug with 12-hour clock and am/pm.
    #[test]
    fn test_1h_slug_format() {
        // 2024-02-09T10:00:00Z
        let slug = build_1h_slug("bitcoin", 1_707_472_800);
        assert_eq!(slug, "bitcoin-up-or-down-february-9-10am-et");
        // 2024-02-09T00:00:00Z → midnight is 12am
        let slug = build_1h_slug("bitcoin", 1_707_436_800);
        assert_eq!(slug, "bitcoin-up-or-down-february-9-12am-et");
        // 2024-02-09T15:00:00Z → 3pm
        let slug = build_1h_slug("ethereum", 1_707_490_800);
        assert_eq!(slug, "ethereum-up-or-down-february-9-3pm-et");
    }

    /// Scenario: eligible event with JSON-string token ids.
    /// Expected: parsed window with both tokens and a condition id distinct
    /// from the event id.
    #[test]
    fn test_parse_event_happy_path() {
        let event = serde_json::json!({
            "id": 98765,
            "closed": false,
            "endDate": "2026-01-01T00:15:00Z",
            "markets": [{
                "acceptingOrders": true,
                "question": "Bitcoin Up or Down - Jan 1, 12:00AM ET",
                "conditionId": "0x571a3c90918ed50c6df079e880f40f73f4877b1b0636996e8bd2508b4d8e7ca3",
                "clobTokenIds": "[\"111\", \"222\"]"
            }]
        });
        let window = parse_event_to_window(&event, "btc-updown-15m-0").unwrap();
        assert_eq!(window.up_token_id, "111");
        assert_eq!(window.down_token_id, "222");
        assert_eq!(window.event_id, "98765");
        assert!(window.condition_id.starts_with("0x571a"));
        assert!(window.end_time_epoch > 0.0);
    }

    /// Scenario: closed event / not accepting orders / single-token market.
    /// Expected: all three rejected.
    #[test]
    fn test_parse_event_rejections() {
        let closed = serde_json::json!({"closed": true, "markets": []});
        assert!(parse_event_to_window(&closed, "s").is_none());

        let not_accepting = serde_json::json!({
            "closed": false,
            "markets": [{"acceptingOrders": false, "clobTokenIds": "[\"1\",\"2\"]"}]
        });
        assert!(parse_event_to_window(&not_accepting, "s").is_none());

        let one_token = serde_json::json!({
            "closed": false,
            "markets": [{"acceptingOrders": true, "clobTokenIds": "[\"1\"]"}]
        });
        assert!(parse_event_to_window(&one_token, "s").is_none());
    }

    /// Scenario: unparseable endDate string.
    /// Expected: epoch 0 — tolerated, not an error.
    #[test]
    fn test_bad_end_date_tolerated() {
        assert_eq!(parse_iso_to_epoch("not-a-date"), 0.0);
        assert_eq!(parse_iso_to_epoch(""), 0.0);
        assert!(parse_iso_to_epoch("2026-01-01T00:15:00Z") > 0.0);
        assert!(parse_iso_to_epoch("2026-01-01T00:15:00.123Z") > 0.0);
    }
}
