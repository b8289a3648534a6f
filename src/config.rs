/// Configuration loaded from environment variables.
///
/// Single source of truth for every tuneable. Defaults are chosen so paper
/// trading works out of the box with no .env at all.
#[derive(Clone, Debug)]
pub struct Config {
    // Polymarket credentials
    pub private_key: String,
    pub funder_address: String,
    pub signature_type: u8,

    // API endpoints
    pub clob_url: String,
    pub gamma_url: String,
    /// Optional user RPC, appended after the built-in Polygon fallbacks.
    pub polygon_rpc_url: String,

    // Strategy
    pub min_edge_cents: f64,
    pub tick_size: f64,
    pub bid_improve_cents: f64,
    pub default_size: f64,
    pub max_size: f64,

    // Book quality
    pub min_combined_bids: f64,
    pub max_spread: f64,
    pub min_bid_size: f64,

    // Risk
    pub max_open_sets: usize,
    pub max_daily_loss: f64,
    pub max_total_exposure: f64,
    pub max_position_pct: f64,
    pub one_leg_timeout_seconds: f64,
    pub loss_streak_threshold: u32,
    pub loss_streak_scale: f64,
    pub min_risk_multiplier: f64,

    // Redemption
    pub redemption_check_interval: f64,
    pub redemption_grace_seconds: f64,
    pub redemption_deadline_seconds: f64,
    pub max_redemption_failures: u32,

    // Loop timing
    pub market_scan_interval: f64,
    pub fill_check_interval: f64,
    pub status_report_interval: f64,

    // Persistence
    pub trade_log_file: String,

    // Telegram (absent = notifications silently disabled)
    pub tg_bot_token: Option<String>,
    pub tg_chat_id: Option<String>,

    // Mode
    pub live: bool,
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            private_key: std::env::var("POLYMARKET_PRIVATE_KEY").unwrap_or_default(),
            funder_address: std::env::var("POLYMARKET_FUNDER_ADDRESS").unwrap_or_default(),
            signature_type: env_parse("POLYMARKET_SIGNATURE_TYPE", 0u8),

            clob_url: std::env::var("POLYMARKET_CLOB_URL")
                .unwrap_or_else(|_| "https://clob.polymarket.com".into()),
            gamma_url: std::env::var("POLYMARKET_GAMMA_URL")
                .unwrap_or_else(|_| "https://gamma-api.polymarket.com".into()),
            polygon_rpc_url: std::env::var("POLYGON_RPC_URL").unwrap_or_default(),

            min_edge_cents: env_f64("BOT_MIN_EDGE_CENTS", 2.0),
            tick_size: env_f64("BOT_TICK_SIZE", 0.01),
            bid_improve_cents: env_f64("BOT_BID_IMPROVE_CENTS", 1.0),
            default_size: env_f64("BOT_DEFAULT_SIZE", 5.0),
            max_size: env_f64("BOT_MAX_SIZE", 20.0),

            min_combined_bids: env_f64("BOT_MIN_COMBINED_BIDS", 0.80),
            max_spread: env_f64("BOT_MAX_SPREAD", 0.10),
            min_bid_size: env_f64("BOT_MIN_BID_SIZE", 10.0),

            max_open_sets: env_parse("BOT_MAX_OPEN_SETS", 10usize),
            max_daily_loss: env_f64("BOT_MAX_DAILY_LOSS", 50.0),
            max_total_exposure: env_f64("BOT_MAX_TOTAL_EXPOSURE", 200.0),
            max_position_pct: env_f64("BOT_MAX_POSITION_PCT", 0.10),
            one_leg_timeout_seconds: env_f64("BOT_ONE_LEG_TIMEOUT", 180.0),
            loss_streak_threshold: env_parse("BOT_LOSS_STREAK_THRESHOLD", 3u32),
            loss_streak_scale: env_f64("BOT_LOSS_STREAK_SCALE", 0.5),
            min_risk_multiplier: env_f64("BOT_MIN_RISK_MULTIPLIER", 0.25),

            redemption_check_interval: env_f64("BOT_REDEMPTION_CHECK_INTERVAL", 1.0),
            redemption_grace_seconds: env_f64("BOT_REDEMPTION_GRACE", 0.0),
            redemption_deadline_seconds: env_f64("BOT_REDEMPTION_DEADLINE", 600.0),
            max_redemption_failures: env_parse("BOT_MAX_REDEMPTION_FAILURES", 3u32),

            market_scan_interval: env_f64("BOT_MARKET_SCAN_INTERVAL", 2.0),
            fill_check_interval: env_f64("BOT_FILL_CHECK_INTERVAL", 1.0),
            status_report_interval: env_f64("BOT_STATUS_REPORT_INTERVAL", 30.0),

            trade_log_file: std::env::var("BOT_TRADE_LOG")
                .unwrap_or_else(|_| "logs/trades.json".into()),

            tg_bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|s| !s.is_empty()),
            tg_chat_id: std::env::var("TELEGRAM_CHAT_ID").ok().filter(|s| !s.is_empty()),

            live: false,
        }
    }

    /// Minimum edge expressed in dollars rather than cents.
    pub fn min_edge(&self) -> f64 {
        self.min_edge_cents / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: no BOT_* variables set in the environment.
    /// Expected: the documented defaults come back.
    #[test]
    fn test_defaults() {
        let config = Config::from_env();
        assert_eq!(config.min_edge_cents, 2.0);
        assert_eq!(config.tick_size, 0.01);
        assert_eq!(config.default_size, 5.0);
        assert_eq!(config.max_size, 20.0);
        assert_eq!(config.min_combined_bids, 0.80);
        assert_eq!(config.max_open_sets, 10);
        assert_eq!(config.max_total_exposure, 200.0);
        assert_eq!(config.one_leg_timeout_seconds, 180.0);
        assert_eq!(config.min_risk_multiplier, 0.25);
        assert!(!config.live);
    }

    /// Scenario: min_edge_cents of 2.0.
    /// Expected: min_edge is $0.02.
    #[test]
    fn test_min_edge_dollars() {
        let config = Config::from_env();
        assert!((config.min_edge() - 0.02).abs() < 1e-12);
    }
}
