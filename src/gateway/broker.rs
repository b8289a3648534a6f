use tracing::{info, warn};

use crate::config::Config;
use crate::gateway::chain::{ChainClient, RedeemError};
use crate::gateway::clob::ClobClient;
use crate::types::{LegOrder, OrderState, Side};

/// Places and monitors maker bids, and bridges to the settlement chain.
///
/// Paper mode needs no credentials: order ids are synthesized and fills are
/// simulated. Live mode talks to the CLOB REST API and Polygon.
pub struct OrderBroker {
    live: bool,
    clob: Option<ClobClient>,
    chain: ChainClient,
}

impl OrderBroker {
    pub async fn connect(config: &Config) -> Result<Self, String> {
        if !config.live {
            info!("Paper mode — no CLOB client needed");
            return Ok(Self {
                live: false,
                clob: None,
                chain: ChainClient::new(&config.polygon_rpc_url, None),
            });
        }

        let clob = ClobClient::connect(&config.clob_url, &config.private_key)
            .await
            .map_err(|e| format!("CLOB authentication failed: {}", e))?;

        Ok(Self {
            live: true,
            clob: Some(clob),
            chain: ChainClient::new(&config.polygon_rpc_url, Some(&config.private_key)),
        })
    }

    /// Post a GTC limit bid. Returns a leg in state Live, or Rejected on any
    /// failure — rejection is never retried at this layer.
    pub async fn place_maker_bid(&self, token_id: &str, side: Side, price: f64, size: f64) -> LegOrder {
        if !self.live {
            return self.place_paper_order(token_id, side, price, size);
        }

        let clob = self.clob.as_ref().expect("live broker without CLOB client");
        match clob.create_and_post_order(token_id, price, size).await {
            Ok(order_id) => {
                info!(
                    "Live bid: {} {} @ ${:.2} x {:.1} [{}]",
                    side,
                    short(token_id),
                    price,
                    size,
                    order_id
                );
                LegOrder::new(order_id, token_id.into(), side, price, size, OrderState::Live)
            }
            Err(e) => {
                warn!("Failed to place live order: {}", e);
                let order_id = format!("failed-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
                LegOrder::new(order_id, token_id.into(), side, price, size, OrderState::Rejected)
            }
        }
    }

    /// Cancel a resting order. Idempotent: cancelling an already-terminal
    /// order reports success.
    pub async fn cancel_order(&self, order_id: &str) -> bool {
        if !self.live {
            info!("Paper cancel: {}", order_id);
            return true;
        }

        let clob = self.clob.as_ref().expect("live broker without CLOB client");
        match clob.cancel(order_id).await {
            Ok(()) => {
                info!("Live cancel: {}", order_id);
                true
            }
            Err(e) => {
                warn!("Failed to cancel order {}: {}", order_id, e);
                false
            }
        }
    }

    /// Poll the venue for an order's lifecycle state.
    ///
    /// Transport failures and unknown status strings keep the previous state.
    pub async fn check_order_status(&self, leg: &LegOrder) -> OrderState {
        if !self.live {
            return paper_fill_status(leg);
        }

        let clob = self.clob.as_ref().expect("live broker without CLOB client");
        match clob.get_order_status(&leg.order_id).await {
            Ok(status) => {
                let mapped = map_clob_status(&status);
                if mapped == OrderState::Pending && !status.is_empty() {
                    warn!("Unknown order status '{}' for {} — keeping {:?}", status, leg.order_id, leg.state);
                    return leg.state;
                }
                mapped
            }
            Err(e) => {
                warn!("Status check failed for {}: {}", leg.order_id, e);
                leg.state
            }
        }
    }

    /// On-chain resolution gate. Paper mode resolves instantly.
    pub async fn check_market_resolved(&self, condition_id: &str) -> bool {
        if !self.live {
            return true;
        }

        match self.chain.is_resolved(condition_id).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("Resolution check failed for {}: {}", short(condition_id), e);
                false
            }
        }
    }

    /// Attempt to redeem a complete set at $1.00.
    pub async fn redeem_complete_set(&self, condition_id: &str) -> Result<(), RedeemError> {
        if !self.live {
            info!("Paper redeem: condition {}", short(condition_id));
            return Ok(());
        }
        self.chain.redeem(condition_id).await
    }

    // ── Paper trading ─────────────────────────────────────────────────────

    fn place_paper_order(&self, token_id: &str, side: Side, price: f64, size: f64) -> LegOrder {
        let order_id = format!("paper-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        info!(
            "Paper bid: {} {} @ ${:.2} x {:.1} [{}]",
            side,
            short(token_id),
            price,
            size,
            order_id
        );
        LegOrder::new(order_id, token_id.into(), side, price, size, OrderState::Live)
    }
}

/// Simulated fills: 15% chance per check once the order is > 2s old.
fn paper_fill_status(leg: &LegOrder) -> OrderState {
    if leg.state != OrderState::Live {
        return leg.state;
    }
    if leg.age_seconds() < 2.0 {
        return OrderState::Live;
    }
    if rand::random::<f64>() < 0.15 {
        return OrderState::Filled;
    }
    OrderState::Live
}

/// Map a venue lifecycle string to our OrderState. This table is
/// authoritative; anything unrecognized maps to Pending.
pub fn map_clob_status(status: &str) -> OrderState {
    match status.to_uppercase().as_str() {
        "LIVE" | "OPEN" | "ACTIVE" => OrderState::Live,
        "MATCHED" | "FILLED" | "CLOSED" => OrderState::Filled,
        "CANCELLED" | "CANCELED" => OrderState::Cancelled,
        "EXPIRED" => OrderState::Expired,
        _ => OrderState::Pending,
    }
}

fn short(id: &str) -> &str {
    &id[..8.min(id.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_ts;

    fn paper_broker() -> OrderBroker {
        OrderBroker {
            live: false,
            clob: None,
            chain: ChainClient::new("", None),
        }
    }

    /// Scenario: the full venue status vocabulary, both spellings of
    /// cancelled, and an unknown string.
    /// Expected: mapping per the authoritative table; unknown → Pending.
    #[test]
    fn test_status_mapping() {
        assert_eq!(map_clob_status("LIVE"), OrderState::Live);
        assert_eq!(map_clob_status("OPEN"), OrderState::Live);
        assert_eq!(map_clob_status("ACTIVE"), OrderState::Live);
        assert_eq!(map_clob_status("MATCHED"), OrderState::Filled);
        assert_eq!(map_clob_status("FILLED"), OrderState::Filled);
        assert_eq!(map_clob_status("CLOSED"), OrderState::Filled);
        assert_eq!(map_clob_status("CANCELLED"), OrderState::Cancelled);
        assert_eq!(map_clob_status("CANCELED"), OrderState::Cancelled);
        assert_eq!(map_clob_status("EXPIRED"), OrderState::Expired);
        assert_eq!(map_clob_status("matched"), OrderState::Filled);
        assert_eq!(map_clob_status("SOMETHING_NEW"), OrderState::Pending);
    }

    /// Scenario: paper order placed and immediately polled.
    /// Expected: Live leg with a paper- id; no fill inside the 2s warmup.
    #[tokio::test]
    async fn test_paper_place_and_early_poll() {
        let broker = paper_broker();
        let leg = broker.place_maker_bid("tok-up", Side::Up, 0.44, 5.0).await;
        assert!(leg.order_id.starts_with("paper-"));
        assert_eq!(leg.state, OrderState::Live);

        // Fresh order: always still Live regardless of RNG
        assert_eq!(broker.check_order_status(&leg).await, OrderState::Live);
    }

    /// Scenario: paper cancel, including a second cancel of the same order.
    /// Expected: both report true (idempotent).
    #[tokio::test]
    async fn test_paper_cancel_idempotent() {
        let broker = paper_broker();
        assert!(broker.cancel_order("paper-abc").await);
        assert!(broker.cancel_order("paper-abc").await);
    }

    /// Scenario: paper resolution and redemption.
    /// Expected: always resolved, redemption always succeeds.
    #[tokio::test]
    async fn test_paper_resolution_and_redeem() {
        let broker = paper_broker();
        assert!(broker.check_market_resolved("0xabc").await);
        assert!(broker.redeem_complete_set("0xabc").await.is_ok());
    }

    /// Scenario: a terminal paper leg polled again.
    /// Expected: stays terminal — fills never regress.
    #[test]
    fn test_paper_fill_terminal_is_sticky() {
        let mut leg = LegOrder::new(
            "paper-x".into(),
            "tok".into(),
            Side::Up,
            0.44,
            5.0,
            OrderState::Filled,
        );
        leg.placed_at = now_ts() - 10.0;
        assert_eq!(paper_fill_status(&leg), OrderState::Filled);

        leg.state = OrderState::Cancelled;
        assert_eq!(paper_fill_status(&leg), OrderState::Cancelled);
    }
}
