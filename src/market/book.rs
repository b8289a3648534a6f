use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

use crate::types::{now_ts, TopOfBook};

/// Top-of-book snapshots via CLOB REST polling.
///
/// Keeps a per-token cache of the last good snapshot, used as a transient
/// fallback when the transport hiccups. A 404 is different: it means the
/// market expired or closed, and the cache must NOT paper over that.
pub struct BookFetcher {
    client: reqwest::Client,
    clob_url: String,
    cache: Mutex<HashMap<String, TopOfBook>>,
}

impl BookFetcher {
    pub fn new(clob_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            clob_url: clob_url.trim_end_matches('/').to_string(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the current best bid/ask for a token.
    ///
    /// Returns None when the book is empty, one-sided, or the market is gone.
    pub async fn top_of_book(&self, token_id: &str) -> Option<TopOfBook> {
        let url = format!("{}/book?token_id={}", self.clob_url, token_id);

        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Book fetch failed for {}: {}", short(token_id), e);
                return self.cached(token_id);
            }
        };

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            // Expired/closed market — expected, not an error
            debug!("Book 404 for {} (expired market)", short(token_id));
            return None;
        }
        if !resp.status().is_success() {
            warn!("Book fetch {} for {}", resp.status(), short(token_id));
            return self.cached(token_id);
        }

        let data: serde_json::Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!("Book body error for {}: {}", short(token_id), e);
                return self.cached(token_id);
            }
        };

        let tob = parse_book(token_id, &data)?;
        self.cache
            .lock()
            .expect("book cache poisoned")
            .insert(token_id.to_string(), tob.clone());
        Some(tob)
    }

    /// Last known snapshot without a network call.
    pub fn cached(&self, token_id: &str) -> Option<TopOfBook> {
        self.cache
            .lock()
            .expect("book cache poisoned")
            .get(token_id)
            .cloned()
    }
}

/// Extract best bid/ask from a CLOB book response.
///
/// The venue returns bids ASCENDING (lowest first) and asks DESCENDING
/// (highest first), so the best level on each side is the LAST entry.
/// Reading index 0 instead gives the bottom of the book and produces quotes
/// far off-market.
fn parse_book(token_id: &str, data: &serde_json::Value) -> Option<TopOfBook> {
    let bids = data.get("bids")?.as_array()?;
    let asks = data.get("asks")?.as_array()?;

    let best_bid_entry = bids.last()?;
    let best_ask_entry = asks.last()?;

    let best_bid = level_f64(best_bid_entry, "price")?;
    let bid_size = level_f64(best_bid_entry, "size")?;
    let best_ask = level_f64(best_ask_entry, "price")?;
    let ask_size = level_f64(best_ask_entry, "size")?;

    if best_bid <= 0.0 || best_ask <= 0.0 {
        return None;
    }

    Some(TopOfBook {
        token_id: token_id.to_string(),
        best_bid,
        best_ask,
        bid_size,
        ask_size,
        timestamp: now_ts(),
    })
}

/// Book levels arrive as {"price": "0.45", "size": "100"} string fields.
fn level_f64(entry: &serde_json::Value, key: &str) -> Option<f64> {
    let v = entry.get(key)?;
    if let Some(s) = v.as_str() {
        return s.parse().ok();
    }
    v.as_f64()
}

fn short(token_id: &str) -> &str {
    &token_id[..8.min(token_id.len())]
}
