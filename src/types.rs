use serde::{Deserialize, Serialize};

/// Current wall-clock time as fractional unix seconds.
///
/// The trade log stores timestamps in this format, so everything that can be
/// persisted uses f64 seconds rather than Instant.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

// ─── Sides & State Machines ───────────────────────────────────────────────

/// Which side of a binary market.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Up,
    Down,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Up => write!(f, "UP"),
            Side::Down => write!(f, "DOWN"),
        }
    }
}

/// Lifecycle of a single leg order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Pending,
    Live,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderState {
    /// Terminal states never transition back to Live.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected | OrderState::Expired
        )
    }
}

/// Lifecycle of a complete-set pair (UP + DOWN).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SetState {
    /// Both legs posted, waiting for fills.
    Quoting,
    /// One leg filled, aggressively re-quoting the other.
    OneLegFilled,
    /// Both legs filled — hold to resolution.
    Complete,
    /// Market window ended, waiting for on-chain resolution.
    AwaitingResolution,
    /// Gave up; loss booked.
    Abandoned,
    /// Resolved at $1.00, profit booked.
    Redeemed,
    /// Redeem call failed for good (possible blacklist).
    RedemptionFailed,
}

impl SetState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SetState::Abandoned | SetState::Redeemed | SetState::RedemptionFailed
        )
    }
}

// ─── Market Data ──────────────────────────────────────────────────────────

/// A single up/down market window with both outcome tokens.
///
/// Two distinct identifiers: `condition_id` is the 32-byte CTF key used for
/// on-chain resolution checks and redemption; `event_id` is the Gamma API
/// integer. They are never interchangeable — a set without a condition_id
/// cannot be redeemed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarketWindow {
    pub condition_id: String,
    pub event_id: String,
    pub question: String,
    pub up_token_id: String,
    pub down_token_id: String,
    pub end_time: String,
    /// Parsed epoch seconds for deadline comparisons; 0 = parse failed.
    pub end_time_epoch: f64,
    pub slug: Option<String>,
}

impl MarketWindow {
    /// Dedupe key for the scan loop.
    pub fn window_id(&self) -> &str {
        if !self.condition_id.is_empty() {
            &self.condition_id
        } else {
            &self.event_id
        }
    }

    pub fn is_past_end_time(&self) -> bool {
        self.end_time_epoch > 0.0 && now_ts() > self.end_time_epoch
    }

    pub fn seconds_since_end(&self) -> f64 {
        if self.end_time_epoch <= 0.0 {
            return 0.0;
        }
        (now_ts() - self.end_time_epoch).max(0.0)
    }
}

/// Best bid/ask snapshot for a single token.
///
/// Only constructed when both sides of the book are present with positive
/// prices; an empty or one-sided book is an absent snapshot, not zeros.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TopOfBook {
    pub token_id: String,
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub timestamp: f64,
}

impl TopOfBook {
    pub fn spread(&self) -> f64 {
        self.best_ask - self.best_bid
    }

    pub fn mid(&self) -> f64 {
        (self.best_bid + self.best_ask) / 2.0
    }
}

// ─── Orders & Sets ────────────────────────────────────────────────────────

/// One leg of a complete-set pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LegOrder {
    pub order_id: String,
    pub token_id: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub state: OrderState,
    pub placed_at: f64,
    pub filled_at: Option<f64>,
}

impl LegOrder {
    pub fn new(order_id: String, token_id: String, side: Side, price: f64, size: f64, state: OrderState) -> Self {
        Self {
            order_id,
            token_id,
            side,
            price,
            size,
            state,
            placed_at: now_ts(),
            filled_at: None,
        }
    }

    pub fn age_seconds(&self) -> f64 {
        (now_ts() - self.placed_at).max(0.0)
    }
}

/// A paired bid on UP + DOWN tokens for the same market window.
///
/// The position tracker is the sole owner of these; everything else reads
/// clones and refers back by `set_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompleteSet {
    pub set_id: String,
    pub window: MarketWindow,
    pub up_leg: LegOrder,
    pub down_leg: LegOrder,
    pub state: SetState,
    pub created_at: f64,
    pub completed_at: Option<f64>,
    pub pnl: Option<f64>,
    pub redemption_attempts: u32,
    pub last_redemption_error: Option<String>,
}

impl CompleteSet {
    pub fn new(window: MarketWindow, up_leg: LegOrder, down_leg: LegOrder) -> Self {
        let set_id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        Self {
            set_id,
            window,
            up_leg,
            down_leg,
            state: SetState::Quoting,
            created_at: now_ts(),
            completed_at: None,
            pnl: None,
            redemption_attempts: 0,
            last_redemption_error: None,
        }
    }

    /// Capital committed across both legs.
    pub fn combined_cost(&self) -> f64 {
        self.up_leg.price * self.up_leg.size + self.down_leg.price * self.down_leg.size
    }

    /// Guaranteed profit per share if both legs fill and the set redeems.
    pub fn edge_per_share(&self) -> f64 {
        1.0 - (self.up_leg.price + self.down_leg.price)
    }

    pub fn both_filled(&self) -> bool {
        self.up_leg.state == OrderState::Filled && self.down_leg.state == OrderState::Filled
    }

    /// The filled leg, if exactly one is filled.
    pub fn filled_leg(&self) -> Option<&LegOrder> {
        match (
            self.up_leg.state == OrderState::Filled,
            self.down_leg.state == OrderState::Filled,
        ) {
            (true, false) => Some(&self.up_leg),
            (false, true) => Some(&self.down_leg),
            _ => None,
        }
    }

    /// The unfilled leg, if exactly one is filled.
    pub fn unfilled_leg(&self) -> Option<&LegOrder> {
        match (
            self.up_leg.state == OrderState::Filled,
            self.down_leg.state == OrderState::Filled,
        ) {
            (true, false) => Some(&self.down_leg),
            (false, true) => Some(&self.up_leg),
            _ => None,
        }
    }

    pub fn leg(&self, side: Side) -> &LegOrder {
        match side {
            Side::Up => &self.up_leg,
            Side::Down => &self.down_leg,
        }
    }
}

// ─── Strategy Output ──────────────────────────────────────────────────────

/// Whether and how to quote a window.
#[derive(Clone, Debug, Default)]
pub struct QuoteDecision {
    pub should_quote: bool,
    pub up_bid_price: f64,
    pub down_bid_price: f64,
    pub size: f64,
    pub edge: f64,
    pub reason: String,
}

impl QuoteDecision {
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            should_quote: false,
            reason: reason.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn make_window() -> MarketWindow {
        MarketWindow {
            condition_id: "0xabc".into(),
            event_id: "12345".into(),
            question: "Bitcoin Up or Down?".into(),
            up_token_id: "tok-up".into(),
            down_token_id: "tok-down".into(),
            end_time: "2026-01-01T00:15:00Z".into(),
            end_time_epoch: 0.0,
            slug: Some("btc-updown-15m-0".into()),
        }
    }

    fn make_leg(side: Side, price: f64, state: OrderState) -> LegOrder {
        let token = match side {
            Side::Up => "tok-up",
            Side::Down => "tok-down",
        };
        LegOrder::new(format!("o-{}", side), token.into(), side, price, 5.0, state)
    }

    /// Scenario: UP filled at 0.44, DOWN still live.
    /// Expected: filled_leg is UP, unfilled_leg is DOWN, not both_filled.
    #[test]
    fn test_one_leg_filled_accessors() {
        let set = CompleteSet::new(
            make_window(),
            make_leg(Side::Up, 0.44, OrderState::Filled),
            make_leg(Side::Down, 0.52, OrderState::Live),
        );
        assert!(!set.both_filled());
        assert_eq!(set.filled_leg().unwrap().side, Side::Up);
        assert_eq!(set.unfilled_leg().unwrap().side, Side::Down);
    }

    /// Scenario: both legs filled.
    /// Expected: both_filled true; one-leg accessors return None.
    #[test]
    fn test_both_filled_accessors() {
        let set = CompleteSet::new(
            make_window(),
            make_leg(Side::Up, 0.44, OrderState::Filled),
            make_leg(Side::Down, 0.52, OrderState::Filled),
        );
        assert!(set.both_filled());
        assert!(set.filled_leg().is_none());
        assert!(set.unfilled_leg().is_none());
    }

    /// Scenario: UP 0.44 x 5 + DOWN 0.52 x 5.
    /// Expected: combined cost $4.80, edge per share $0.04.
    #[test]
    fn test_cost_and_edge() {
        let set = CompleteSet::new(
            make_window(),
            make_leg(Side::Up, 0.44, OrderState::Live),
            make_leg(Side::Down, 0.52, OrderState::Live),
        );
        assert!((set.combined_cost() - 4.80).abs() < 1e-9);
        assert!((set.edge_per_share() - 0.04).abs() < 1e-9);
    }

    /// Scenario: serialize a set to JSON and read it back.
    /// Expected: identical ids, states and prices (round-trip law).
    #[test]
    fn test_set_serde_round_trip() {
        let set = CompleteSet::new(
            make_window(),
            make_leg(Side::Up, 0.44, OrderState::Filled),
            make_leg(Side::Down, 0.52, OrderState::Live),
        );
        let json = serde_json::to_string(&set).unwrap();
        let back: CompleteSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.set_id, set.set_id);
        assert_eq!(back.state, set.state);
        assert_eq!(back.up_leg.state, OrderState::Filled);
        assert_eq!(back.down_leg.state, OrderState::Live);
        assert!((back.combined_cost() - set.combined_cost()).abs() < 1e-9);
    }

    /// Scenario: window with a condition_id vs one with only an event_id.
    /// Expected: window_id prefers the condition_id, falls back to event_id.
    #[test]
    fn test_window_id_fallback() {
        let mut w = make_window();
        assert_eq!(w.window_id(), "0xabc");
        w.condition_id.clear();
        assert_eq!(w.window_id(), "12345");
    }

    /// Scenario: end_time_epoch of 0 (unparseable end date).
    /// Expected: never considered past end time; seconds_since_end is 0.
    #[test]
    fn test_unknown_end_time() {
        let w = make_window();
        assert!(!w.is_past_end_time());
        assert_eq!(w.seconds_since_end(), 0.0);
    }

    /// Scenario: end_time one hour in the past.
    /// Expected: past end time, with a positive seconds_since_end.
    #[test]
    fn test_past_end_time() {
        let mut w = make_window();
        w.end_time_epoch = now_ts() - 3600.0;
        assert!(w.is_past_end_time());
        assert!(w.seconds_since_end() > 3599.0);
    }

    /// Scenario: order states LIVE vs FILLED vs CANCELLED.
    /// Expected: only fills and cancels are terminal.
    #[test]
    fn test_terminal_states() {
        assert!(!OrderState::Live.is_terminal());
        assert!(!OrderState::Pending.is_terminal());
        assert!(OrderState::Filled.is_terminal());
        assert!(OrderState::Cancelled.is_terminal());
        assert!(SetState::Redeemed.is_terminal());
        assert!(SetState::Abandoned.is_terminal());
        assert!(SetState::RedemptionFailed.is_terminal());
        assert!(!SetState::AwaitingResolution.is_terminal());
    }
}
