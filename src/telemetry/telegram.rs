use tracing::{info, warn};

use crate::config::Config;

/// Fire-and-forget Telegram alerts. Persistent connection pool via reqwest.
///
/// Unconfigured (no token/chat id) means every send is a silent no-op —
/// the bot runs fine without notifications.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    url: Option<String>,
    chat_id: Option<String>,
}

impl TelegramNotifier {
    pub fn new(config: &Config) -> Self {
        let enabled = config.tg_bot_token.is_some() && config.tg_chat_id.is_some();
        if !enabled {
            info!("Telegram not configured — notifications disabled");
        }

        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            url: config
                .tg_bot_token
                .as_ref()
                .map(|token| format!("https://api.telegram.org/bot{}/sendMessage", token)),
            chat_id: config.tg_chat_id.clone(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.url.is_some() && self.chat_id.is_some()
    }

    /// Send a Markdown message. Never raises — delivery failures are logged
    /// and swallowed.
    pub async fn send(&self, text: &str) {
        let (Some(url), Some(chat_id)) = (self.url.as_ref(), self.chat_id.as_ref()) else {
            return;
        };

        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        match self.client.post(url).json(&body).send().await {
            Ok(resp) => {
                if !resp.status().is_success() {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!("Telegram send failed: {} — {}", status, truncate(&body, 200));
                }
            }
            Err(e) => warn!("Telegram request error: {}", e),
        }
    }

    // ── Convenience methods for common events ─────────────────────────────

    pub async fn notify_quote(&self, question: &str, up_bid: f64, down_bid: f64, edge: f64, size: f64) {
        self.send(&format!(
            "*NEW QUOTE*\n`{}`\nUP ${:.2} + DOWN ${:.2} = ${:.4}\nEdge: ${:.4} | Size: {:.0} shares",
            truncate(question, 60),
            up_bid,
            down_bid,
            up_bid + down_bid,
            edge,
            size,
        ))
        .await;
    }

    pub async fn notify_complete_set(&self, set_id: &str, question: &str, combined_cost: f64, edge: f64) {
        self.send(&format!(
            "*COMPLETE SET* `{}`\n`{}`\nCost: ${:.4} | Edge: ${:.4}\nHolding for resolution...",
            set_id,
            truncate(question, 60),
            combined_cost,
            edge,
        ))
        .await;
    }

    pub async fn notify_redeemed(&self, set_id: &str, pnl: f64) {
        self.send(&format!("*REDEEMED* `{}`\nPnL: *+${:.4}*", set_id, pnl))
            .await;
    }

    pub async fn notify_abandoned(&self, set_id: &str, loss: f64) {
        self.send(&format!("*ABANDONED* `{}`\nLoss: -${:.4}", set_id, loss.abs()))
            .await;
    }

    pub async fn notify_error(&self, context: &str, error: &str) {
        self.send(&format!("*ERROR*\n{}\n`{}`", context, truncate(error, 200)))
            .await;
    }

    pub async fn notify_status(&self, open_sets: usize, total_pnl: f64, redeemed: usize, abandoned: usize) {
        self.send(&format!(
            "*STATUS*\nOpen: {} | PnL: ${:.4}\nRedeemed: {} | Abandoned: {}",
            open_sets, total_pnl, redeemed, abandoned,
        ))
        .await;
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_config() -> Config {
        let mut config = Config::from_env();
        config.tg_bot_token = None;
        config.tg_chat_id = None;
        config
    }

    /// Scenario: no Telegram credentials configured.
    /// Expected: notifier disabled; sends are silent no-ops.
    #[tokio::test]
    async fn test_disabled_without_credentials() {
        let tg = TelegramNotifier::new(&bare_config());
        assert!(!tg.enabled());
        tg.send("should go nowhere").await;
    }

    /// Scenario: only one of the two credentials present.
    /// Expected: still disabled — both are required.
    #[test]
    fn test_partial_credentials_disabled() {
        let mut config = bare_config();
        config.tg_bot_token = Some("token".into());
        assert!(!TelegramNotifier::new(&config).enabled());

        let mut config = bare_config();
        config.tg_chat_id = Some("chat".into());
        assert!(!TelegramNotifier::new(&config).enabled());
    }

    /// Scenario: multi-byte text at the truncation boundary.
    /// Expected: truncation lands on a char boundary, no panic.
    #[test]
    fn test_truncate_char_safe() {
        assert_eq!(truncate("hello", 60), "hello");
        assert_eq!(truncate("héllo wörld", 5), "héllo");
        let long = "¢".repeat(100);
        assert_eq!(truncate(&long, 60).chars().count(), 60);
    }
}
