use crate::config::Config;
use crate::types::{MarketWindow, QuoteDecision, TopOfBook};

/// Complete-set quoting strategy.
///
/// The trade: buy 1 share each of UP and DOWN for < $1.00 combined, hold to
/// resolution, redeem at $1.00. Profit = $1.00 - combined_cost. Everything
/// here is about only quoting windows where that edge is real: two-sided
/// books, tight spreads, enough depth, and a combined bid below the edge
/// threshold after we improve the best bids.
pub struct Strategy {
    config: Config,
}

impl Strategy {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Decide whether to quote this window and at what prices.
    pub fn evaluate_window(
        &self,
        _window: &MarketWindow,
        up_tob: &TopOfBook,
        down_tob: &TopOfBook,
        risk_multiplier: f64,
    ) -> QuoteDecision {
        if let Some(rejection) = self.check_book_quality(up_tob, down_tob) {
            return QuoteDecision::reject(rejection);
        }

        let up_bid = self.bid_price(up_tob);
        let down_bid = self.bid_price(down_tob);

        let combined = up_bid + down_bid;
        let edge_cents = (1.0 - combined) * 100.0;

        if edge_cents < self.config.min_edge_cents {
            return QuoteDecision::reject(format!(
                "Edge too thin: {:.1}¢ < {}¢",
                edge_cents, self.config.min_edge_cents
            ));
        }

        if up_bid <= 0.0 || down_bid <= 0.0 {
            return QuoteDecision::reject("Invalid bid price (zero or negative)");
        }

        if up_bid >= 1.0 || down_bid >= 1.0 {
            return QuoteDecision::reject(format!(
                "Bid exceeds $1: up={}, down={}",
                up_bid, down_bid
            ));
        }

        let base_size = self.size_for_edge(edge_cents);
        let mut size = (base_size * risk_multiplier * 10.0).round() / 10.0;
        size = size.max(1.0);

        // Cap a single set at max_position_pct of the exposure limit
        let avg_price = (up_bid + down_bid) / 2.0;
        if avg_price > 0.0 {
            let max_position_value = self.config.max_total_exposure * self.config.max_position_pct;
            size = size.min(max_position_value / avg_price);
        }

        QuoteDecision {
            should_quote: true,
            up_bid_price: up_bid,
            down_bid_price: down_bid,
            size,
            edge: (edge_cents / 100.0 * 10_000.0).round() / 10_000.0,
            reason: format!(
                "Edge {:.1}¢, combined ${:.4}, risk_mult={:.2}",
                edge_cents, combined, risk_multiplier
            ),
        }
    }

    /// Validate that both orderbooks show real two-sided activity.
    /// First failing gate wins.
    fn check_book_quality(&self, up_tob: &TopOfBook, down_tob: &TopOfBook) -> Option<String> {
        let combined_bids = up_tob.best_bid + down_tob.best_bid;
        if combined_bids < self.config.min_combined_bids {
            return Some(format!(
                "Thin books: Σbids=${:.2} < ${:.2} (UP bid=${:.2}, DOWN bid=${:.2})",
                combined_bids, self.config.min_combined_bids, up_tob.best_bid, down_tob.best_bid
            ));
        }

        if up_tob.spread() > self.config.max_spread {
            return Some(format!(
                "UP spread too wide: ${:.2} > ${:.2}",
                up_tob.spread(),
                self.config.max_spread
            ));
        }

        if down_tob.spread() > self.config.max_spread {
            return Some(format!(
                "DOWN spread too wide: ${:.2} > ${:.2}",
                down_tob.spread(),
                self.config.max_spread
            ));
        }

        let min_size = self.config.min_bid_size;
        if up_tob.bid_size < min_size {
            return Some(format!(
                "UP bid depth too thin: {:.0} < {:.0}",
                up_tob.bid_size, min_size
            ));
        }
        if down_tob.bid_size < min_size {
            return Some(format!(
                "DOWN bid depth too thin: {:.0} < {:.0}",
                down_tob.bid_size, min_size
            ));
        }

        None
    }

    /// Our bid: best_bid + improvement, capped below the ask, rounded down
    /// to the tick grid.
    fn bid_price(&self, tob: &TopOfBook) -> f64 {
        if tob.best_bid <= 0.0 {
            return 0.0;
        }

        let tick = self.config.tick_size;
        let improve = self.config.bid_improve_cents / 100.0;
        let our_bid = (tob.best_bid + improve).min(tob.best_ask - tick);

        round_down_to_tick(our_bid, tick)
    }

    /// Position size scales linearly with edge: default_size at min_edge up
    /// to max_size at 3x min_edge.
    fn size_for_edge(&self, edge_cents: f64) -> f64 {
        let min_edge = self.config.min_edge_cents;
        if edge_cents <= min_edge {
            return self.config.default_size;
        }

        let scale = (edge_cents / (min_edge * 3.0)).min(1.0);
        let size = self.config.default_size + scale * (self.config.max_size - self.config.default_size);
        (size * 10.0).round() / 10.0
    }
}

/// Round a price down to the nearest tick.
pub fn round_down_to_tick(price: f64, tick: f64) -> f64 {
    // Float-safe floor: 0.44 / 0.01 can land at 43.999..; nudge before floor
    let ticks = (price / tick + 1e-9).floor();
    (ticks * tick * 10_000.0).round() / 10_000.0
}
