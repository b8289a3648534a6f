use std::collections::{HashMap, HashSet};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::risk::RiskGovernor;
use crate::engine::tracker::PositionTracker;
use crate::gateway::broker::OrderBroker;
use crate::gateway::chain::RedeemError;
use crate::market::book::BookFetcher;
use crate::market::discovery::MarketFinder;
use crate::strategy::{round_down_to_tick, Strategy};
use crate::telemetry::telegram::TelegramNotifier;
use crate::types::{now_ts, CompleteSet, MarketWindow, OrderState, QuoteDecision, SetState, Side};

/// Oracle resolution lags market close by minutes; polling payoutDenominator
/// every second per set wastes RPC quota. One check per condition per 30s.
const REDEMPTION_RECHECK_SECONDS: f64 = 30.0;

/// Sets whose end_time never parsed are forced to AWAITING_RESOLUTION after
/// this long in COMPLETE (longest window + buffer).
const UNKNOWN_END_FALLBACK_SECONDS: f64 = 1200.0;

/// How long a reposted leg may rest before being chased again.
const REPOST_AFTER_SECONDS: f64 = 10.0;

/// Idle scan summaries at most this often.
const SCAN_LOG_INTERVAL: Duration = Duration::from_secs(300);

/// Per-condition rate limiter for resolution checks.
///
/// Kept in memory only; entries are dropped when a set goes terminal and the
/// map starts empty after a restart.
struct RecheckGate {
    interval: f64,
    last: StdMutex<HashMap<String, Instant>>,
}

impl RecheckGate {
    fn new(interval: f64) -> Self {
        Self {
            interval,
            last: StdMutex::new(HashMap::new()),
        }
    }

    /// True if this key has not been checked within the interval; records
    /// the check time when it fires.
    fn should_check(&self, key: &str) -> bool {
        let mut last = self.last.lock().expect("recheck gate poisoned");
        if let Some(at) = last.get(key) {
            if at.elapsed().as_secs_f64() < self.interval {
                return false;
            }
        }
        last.insert(key.to_string(), Instant::now());
        true
    }

    fn clear(&self, key: &str) {
        self.last.lock().expect("recheck gate poisoned").remove(key);
    }
}

/// Main orchestrator: five concurrent loops over a shared tracker and risk
/// governor.
///
/// The scan loop creates sets; fill, one-leg and redemption loops move them
/// through their lifecycle via tracker methods; the status loop only reads.
/// Locks are never held across an external call — each loop works on cloned
/// snapshots and funnels mutations back through the tracker by set_id.
pub struct Engine {
    config: Config,
    strategy: Strategy,
    finder: MarketFinder,
    books: BookFetcher,
    broker: OrderBroker,
    tracker: Mutex<PositionTracker>,
    risk: Mutex<RiskGovernor>,
    telegram: TelegramNotifier,
    quoted_windows: StdMutex<HashSet<String>>,
    recheck_gate: RecheckGate,
    last_scan_log: StdMutex<Option<Instant>>,
    shutdown: watch::Receiver<bool>,
}

impl Engine {
    pub async fn new(config: Config, shutdown: watch::Receiver<bool>) -> Result<Self, String> {
        let broker = OrderBroker::connect(&config).await?;

        Ok(Self {
            strategy: Strategy::new(config.clone()),
            finder: MarketFinder::new(&config.gamma_url),
            books: BookFetcher::new(&config.clob_url),
            broker,
            tracker: Mutex::new(PositionTracker::new(&config.trade_log_file)),
            risk: Mutex::new(RiskGovernor::new(config.clone())),
            telegram: TelegramNotifier::new(&config),
            quoted_windows: StdMutex::new(HashSet::new()),
            recheck_gate: RecheckGate::new(REDEMPTION_RECHECK_SECONDS),
            last_scan_log: StdMutex::new(None),
            shutdown,
            config,
        })
    }

    /// Run all loops until shutdown, then cancel resting orders and persist.
    pub async fn run(&self) {
        let mode = if self.config.live { "LIVE" } else { "PAPER" };
        info!("Starting bot engine in {} mode", mode);

        self.risk.lock().await.deactivate_kill_switch();
        self.telegram.send(&format!("*BOT STARTED* ({} mode)", mode)).await;

        tokio::join!(
            self.market_scan_loop(),
            self.fill_monitor_loop(),
            self.one_leg_manager_loop(),
            self.redemption_monitor_loop(),
            self.status_report_loop(),
        );

        info!("Bot engine shutting down");
        self.cancel_all_active_orders().await;
        self.tracker.lock().await.persist();
        self.telegram.send("*BOT STOPPED*").await;
        info!("Bot engine stopped");
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep for the loop period, waking early on shutdown.
    async fn pause(&self, seconds: f64) {
        let mut rx = self.shutdown.clone();
        let _ = tokio::time::timeout(Duration::from_secs_f64(seconds), rx.wait_for(|stop| *stop)).await;
    }

    // ── Main loops ────────────────────────────────────────────────────────

    /// Discover windows, evaluate edge, post bids.
    async fn market_scan_loop(&self) {
        while !self.stopping() {
            self.scan_and_quote().await;
            self.pause(self.config.market_scan_interval).await;
        }
    }

    /// Check order fill status for all active sets.
    async fn fill_monitor_loop(&self) {
        while !self.stopping() {
            self.check_fills().await;
            self.pause(self.config.fill_check_interval).await;
        }
    }

    /// Handle sets where only one leg has filled.
    async fn one_leg_manager_loop(&self) {
        while !self.stopping() {
            self.manage_one_leg_sets().await;
            self.pause(self.config.fill_check_interval).await;
        }
    }

    /// Monitor COMPLETE / AWAITING_RESOLUTION sets for redemption.
    async fn redemption_monitor_loop(&self) {
        while !self.stopping() {
            self.process_redemptions().await;
            self.pause(self.config.redemption_check_interval).await;
        }
    }

    /// Periodic risk + PnL summary.
    async fn status_report_loop(&self) {
        while !self.stopping() {
            self.pause(self.config.status_report_interval).await;
            if self.stopping() {
                break;
            }
            self.log_status().await;
        }
    }

    // ── Scan and quote ────────────────────────────────────────────────────

    async fn scan_and_quote(&self) {
        let windows = self.finder.find_active_windows().await;

        let mut skipped_no_book = 0u32;
        let mut skipped_quality = 0u32;
        let mut skipped_edge = 0u32;

        for window in &windows {
            let window_id = window.window_id().to_string();
            if self
                .quoted_windows
                .lock()
                .expect("quoted windows poisoned")
                .contains(&window_id)
            {
                continue;
            }

            let can_open = {
                let active = self.tracker.lock().await.active_sets();
                self.risk.lock().await.can_open_new_set(&active)
            };
            if !can_open {
                break;
            }

            let Some(up_tob) = self.books.top_of_book(&window.up_token_id).await else {
                skipped_no_book += 1;
                continue;
            };
            let Some(down_tob) = self.books.top_of_book(&window.down_token_id).await else {
                skipped_no_book += 1;
                continue;
            };

            let risk_mult = {
                let active = self.tracker.lock().await.active_sets();
                self.risk.lock().await.risk_multiplier(&active)
            };

            let decision = self
                .strategy
                .evaluate_window(window, &up_tob, &down_tob, risk_mult);

            if !decision.should_quote {
                if decision.reason.contains("Thin books") || decision.reason.contains("spread") {
                    skipped_quality += 1;
                } else {
                    skipped_edge += 1;
                }
                debug!("Skip {}: {}", window.question, decision.reason);
                continue;
            }

            self.post_complete_set(window, &decision).await;
        }

        self.maybe_log_scan_summary(windows.len(), skipped_no_book, skipped_quality, skipped_edge)
            .await;
    }

    /// Post bids on both tokens and register the pair.
    ///
    /// A rejected leg is never retried; if exactly one leg rejects, the other
    /// is cancelled so no orphan order rests on the book.
    async fn post_complete_set(&self, window: &MarketWindow, decision: &QuoteDecision) {
        let up_leg = self
            .broker
            .place_maker_bid(&window.up_token_id, Side::Up, decision.up_bid_price, decision.size)
            .await;
        let down_leg = self
            .broker
            .place_maker_bid(&window.down_token_id, Side::Down, decision.down_bid_price, decision.size)
            .await;

        if up_leg.state == OrderState::Rejected || down_leg.state == OrderState::Rejected {
            warn!("Order rejected for window {}", short(window.window_id()));
            if up_leg.state != OrderState::Rejected {
                self.broker.cancel_order(&up_leg.order_id).await;
            }
            if down_leg.state != OrderState::Rejected {
                self.broker.cancel_order(&down_leg.order_id).await;
            }
            return;
        }

        let set = CompleteSet::new(window.clone(), up_leg, down_leg);

        info!(
            "Quoted {}: UP ${:.2} + DOWN ${:.2} = ${:.4} (edge ${:.4})",
            window.question,
            decision.up_bid_price,
            decision.down_bid_price,
            decision.up_bid_price + decision.down_bid_price,
            decision.edge,
        );

        self.tracker.lock().await.add_set(set);
        self.quoted_windows
            .lock()
            .expect("quoted windows poisoned")
            .insert(window.window_id().to_string());

        self.telegram
            .notify_quote(
                &window.question,
                decision.up_bid_price,
                decision.down_bid_price,
                decision.edge,
                decision.size,
            )
            .await;
    }

    /// Idle scan summary, at most once per SCAN_LOG_INTERVAL.
    async fn maybe_log_scan_summary(&self, found: usize, no_book: u32, quality: u32, edge: u32) {
        let idle = self.tracker.lock().await.active_sets().is_empty();
        if !idle {
            return;
        }
        let mut last = self.last_scan_log.lock().expect("scan log poisoned");
        let due = last.map_or(true, |at| at.elapsed() >= SCAN_LOG_INTERVAL);
        if due {
            *last = Some(Instant::now());
            info!(
                "Scan: {} crypto windows | Rejected: {} no-book, {} thin/wide, {} no-edge | Waiting for tight spreads...",
                found, no_book, quality, edge,
            );
        }
    }

    // ── Fill monitoring ───────────────────────────────────────────────────

    async fn check_fills(&self) {
        let snapshots = self.tracker.lock().await.active_sets();

        for cs in snapshots {
            if !matches!(cs.state, SetState::Quoting | SetState::OneLegFilled) {
                continue;
            }

            for leg in [&cs.up_leg, &cs.down_leg] {
                if leg.state != OrderState::Live {
                    continue;
                }

                let new_state = self.broker.check_order_status(leg).await;
                if new_state == leg.state {
                    continue;
                }

                let set_state = self
                    .tracker
                    .lock()
                    .await
                    .update_leg_state(&cs.set_id, &leg.token_id, new_state);

                // Both legs filled: hold for resolution — never redeem here,
                // the window hasn't ended and payouts are not posted yet
                if set_state == Some(SetState::Complete) {
                    info!(
                        "Both legs filled for set {} — holding for resolution",
                        cs.set_id
                    );
                    let details = self
                        .tracker
                        .lock()
                        .await
                        .get_active(&cs.set_id)
                        .map(|s| (s.combined_cost(), s.edge_per_share()));
                    if let Some((cost, edge)) = details {
                        self.telegram
                            .notify_complete_set(&cs.set_id, &cs.window.question, cost, edge)
                            .await;
                    }
                }
            }
        }
    }

    // ── One-leg management ────────────────────────────────────────────────

    /// For sets with one leg filled: keep re-quoting the other, then hold.
    ///
    /// A single filled leg is never abandoned at timeout — a token bought at
    /// $0.44 pays $1.00 if the market resolves its way, so the set is held
    /// through resolution instead. Only the unfilled leg gets cancelled.
    async fn manage_one_leg_sets(&self) {
        let snapshots = self.tracker.lock().await.active_sets();

        for cs in snapshots {
            if cs.state != SetState::OneLegFilled {
                continue;
            }
            let Some(filled) = cs.filled_leg() else { continue };
            let Some(unfilled) = cs.unfilled_leg() else { continue };

            let elapsed = now_ts() - filled.filled_at.unwrap_or(cs.created_at);
            if elapsed > self.config.one_leg_timeout_seconds {
                self.hold_filled_leg(&cs).await;
                continue;
            }

            if unfilled.state == OrderState::Live && unfilled.age_seconds() > REPOST_AFTER_SECONDS {
                self.repost_unfilled_leg(&cs).await;
            }
        }
    }

    /// Cancel and repost the unfilled leg at a more aggressive price.
    async fn repost_unfilled_leg(&self, cs: &CompleteSet) {
        let Some(filled) = cs.filled_leg() else { return };
        let Some(unfilled) = cs.unfilled_leg() else { return };

        self.broker.cancel_order(&unfilled.order_id).await;

        let Some(tob) = self.books.top_of_book(&unfilled.token_id).await else {
            return;
        };

        let tick = self.config.tick_size;
        let mut price = round_down_to_tick(
            (tob.best_bid + 2.0 * tick).min(tob.best_ask - tick),
            tick,
        );

        // Hard ceiling: combined cost must stay below $1.00 - min_edge.
        // Chasing a rising unfilled leg past this turns a profitable set
        // into a guaranteed loss (e.g. UP@0.45 + DOWN@0.58 = $1.03).
        let max_price = round_down_to_tick(1.0 - filled.price - self.config.min_edge(), tick);
        if price > max_price {
            if max_price <= 0.0 {
                info!(
                    "Set {}: unfilled {} leg too expensive to repost profitably \
                     (filled={}@{:.2}, market={:.2}) — holding for resolution",
                    cs.set_id, unfilled.side, filled.side, filled.price, tob.best_bid,
                );
                self.hold_filled_leg(cs).await;
                return;
            }
            info!(
                "Set {}: capping {} repost at {:.2} (market {:.2} would make combined ${:.2})",
                cs.set_id,
                unfilled.side,
                max_price,
                price,
                filled.price + price,
            );
            price = max_price;
        }

        let new_leg = self
            .broker
            .place_maker_bid(&unfilled.token_id, unfilled.side, price, unfilled.size)
            .await;

        info!(
            "Reposted {} leg at ${:.2} for set {}",
            unfilled.side, price, cs.set_id
        );
        self.tracker
            .lock()
            .await
            .replace_leg(&cs.set_id, unfilled.side, new_leg);
    }

    /// Cancel the unfilled leg and hold the filled one through resolution.
    async fn hold_filled_leg(&self, cs: &CompleteSet) {
        if let Some(unfilled) = cs.unfilled_leg() {
            if unfilled.state == OrderState::Live {
                self.broker.cancel_order(&unfilled.order_id).await;
                self.tracker.lock().await.update_leg_state(
                    &cs.set_id,
                    &unfilled.token_id,
                    OrderState::Cancelled,
                );
            }
        }

        let cost = cs.filled_leg().map(|l| l.price * l.size).unwrap_or(0.0);
        let side = cs.filled_leg().map(|l| l.side.to_string()).unwrap_or_else(|| "?".into());

        self.tracker.lock().await.mark_awaiting_resolution(&cs.set_id);
        info!(
            "Holding filled {} leg for set {} (cost ${:.4}) — awaiting resolution",
            side, cs.set_id, cost,
        );
        self.telegram
            .send(&format!(
                "Holding filled leg for set {} — awaiting resolution",
                cs.set_id
            ))
            .await;
    }

    // ── Redemption monitoring ─────────────────────────────────────────────

    async fn process_redemptions(&self) {
        let snapshots = self.tracker.lock().await.active_sets();

        for cs in snapshots {
            match cs.state {
                SetState::Complete | SetState::OneLegFilled => {
                    self.check_transition_to_awaiting(&cs).await;
                }
                SetState::AwaitingResolution => {
                    self.attempt_redemption(&cs).await;
                }
                _ => {}
            }
        }
    }

    /// Move a set to AWAITING_RESOLUTION as soon as its window ends.
    async fn check_transition_to_awaiting(&self, cs: &CompleteSet) {
        let grace = self.config.redemption_grace_seconds;

        if cs.window.is_past_end_time() && cs.window.seconds_since_end() >= grace {
            // One-leg sets may still have a resting order on the dead market
            if let Some(unfilled) = cs.unfilled_leg() {
                if unfilled.state == OrderState::Live {
                    self.broker.cancel_order(&unfilled.order_id).await;
                    self.tracker.lock().await.update_leg_state(
                        &cs.set_id,
                        &unfilled.token_id,
                        OrderState::Cancelled,
                    );
                }
            }
            self.tracker.lock().await.mark_awaiting_resolution(&cs.set_id);
            info!(
                "Set {} past end_time ({:.0}s ago) — attempting redemption as soon as resolved",
                cs.set_id,
                cs.window.seconds_since_end(),
            );
            return;
        }

        // end_time never parsed: force the transition once the set has been
        // complete long enough that any window must have ended
        if cs.window.end_time_epoch <= 0.0 {
            if let Some(completed_at) = cs.completed_at {
                let age = now_ts() - completed_at;
                if age > UNKNOWN_END_FALLBACK_SECONDS {
                    self.tracker.lock().await.mark_awaiting_resolution(&cs.set_id);
                    warn!(
                        "Set {} has no parseable end_time but completed {:.0}s ago — \
                         forcing transition to AWAITING_RESOLUTION",
                        cs.set_id, age,
                    );
                }
            }
        }
    }

    /// Try to redeem a set that's awaiting resolution.
    async fn attempt_redemption(&self, cs: &CompleteSet) {
        // Resolution and redemption both need the CTF condition_id; the
        // Gamma event id cannot stand in for it
        let condition_id = cs.window.condition_id.clone();
        if condition_id.is_empty() {
            error!("Set {} has no CTF condition_id — cannot redeem!", cs.set_id);
            return;
        }

        if !self.recheck_gate.should_check(&condition_id) {
            return;
        }

        let deadline = self.config.redemption_deadline_seconds;
        if cs.window.seconds_since_end() > deadline {
            warn!(
                "Set {} has waited {:.0}s past end_time (deadline: {:.0}s)",
                cs.set_id,
                cs.window.seconds_since_end(),
                deadline,
            );
        }

        if !self.broker.check_market_resolved(&condition_id).await {
            return;
        }

        info!("Attempting redemption for set {}", cs.set_id);
        match self.broker.redeem_complete_set(&condition_id).await {
            Ok(()) => {
                self.risk.lock().await.record_redemption_success();
                let pnl = self.tracker.lock().await.mark_redeemed(&cs.set_id);
                if let Some(pnl) = pnl {
                    self.risk.lock().await.record_pnl(pnl);
                    info!("REDEEMED set {} — PnL ${:.4}", cs.set_id, pnl);
                    self.telegram.notify_redeemed(&cs.set_id, pnl).await;
                }
                self.recheck_gate.clear(&condition_id);
            }
            Err(RedeemError::PayoutsNotSet) => {
                // The on-chain recheck disagreed with the gate — payouts are
                // not actually posted, so no transaction was sent
                debug!("Set {} payouts not set yet — retrying later", cs.set_id);
            }
            Err(e) if e.is_no_tokens() => {
                // Non-fatal: nothing was paid out. For a one-leg hold that
                // means the held token lost; for a complete set the payout
                // already happened and this attempt was a no-op.
                if let Some(filled) = cs.filled_leg() {
                    let loss = -(filled.price * filled.size);
                    warn!(
                        "Set {} — no USDC returned for one-leg hold ({}). Recording loss ${:.4}.",
                        cs.set_id,
                        e,
                        loss.abs(),
                    );
                    self.tracker.lock().await.mark_abandoned(&cs.set_id, loss);
                    self.risk.lock().await.record_pnl(loss);
                    self.telegram.notify_abandoned(&cs.set_id, loss).await;
                } else {
                    warn!(
                        "Set {} — redeemPositions returned no tokens ({}). \
                         Marking redeemed to avoid re-attempting.",
                        cs.set_id, e,
                    );
                    self.tracker.lock().await.mark_redeemed(&cs.set_id);
                }
                self.recheck_gate.clear(&condition_id);
            }
            Err(e) => {
                let msg = e.to_string();
                self.tracker.lock().await.mark_redemption_failed(&cs.set_id, &msg);
                self.risk.lock().await.record_redemption_failure();
                self.telegram
                    .notify_error(&format!("Redemption failed for set {}", cs.set_id), &msg)
                    .await;

                if self.risk.lock().await.suspected_blacklist() {
                    error!(
                        "BLACKLIST SUSPECTED — marking set {} as permanently failed",
                        cs.set_id
                    );
                    let loss = self.tracker.lock().await.mark_permanently_failed(&cs.set_id);
                    self.risk.lock().await.record_pnl(loss);
                    self.recheck_gate.clear(&condition_id);
                }
            }
        }
    }

    // ── Status & shutdown ─────────────────────────────────────────────────

    async fn log_status(&self) {
        let (active, summary) = {
            let tracker = self.tracker.lock().await;
            (tracker.active_sets(), tracker.pnl_summary())
        };
        let snap = self.risk.lock().await.snapshot(&active);
        let quoted = self.quoted_windows.lock().expect("quoted windows poisoned").len();

        info!(
            "STATUS | Open: {} | PnL: ${:.4} | Exposure: ${:.2} | Risk×: {:.2} | Streak: {} | \
             Redeemed: {} | Abandoned: {} | Failed: {} | Awaiting: {} | Quoted: {} | Kill: {}",
            snap.open_sets,
            summary.total_pnl,
            snap.total_exposure,
            snap.risk_multiplier,
            snap.consecutive_losses,
            summary.sets_redeemed,
            summary.sets_abandoned,
            summary.sets_redemption_failed,
            summary.sets_awaiting_resolution,
            quoted,
            if snap.kill_switch_active { "ON" } else { "off" },
        );

        self.telegram
            .notify_status(
                snap.open_sets,
                summary.total_pnl,
                summary.sets_redeemed,
                summary.sets_abandoned,
            )
            .await;
    }

    /// Cancel every resting order on shutdown.
    async fn cancel_all_active_orders(&self) {
        let snapshots = self.tracker.lock().await.active_sets();
        for cs in snapshots {
            for leg in [&cs.up_leg, &cs.down_leg] {
                if leg.state == OrderState::Live {
                    self.broker.cancel_order(&leg.order_id).await;
                }
            }
        }
    }
}

fn short(id: &str) -> &str {
    &id[..8.min(id.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: repeated checks on one condition inside the 30s window.
    /// Expected: only the first fires; a different condition is independent.
    #[test]
    fn test_recheck_gate_limits_per_condition() {
        let gate = RecheckGate::new(30.0);
        assert!(gate.should_check("0xaaa"));
        assert!(!gate.should_check("0xaaa"));
        assert!(!gate.should_check("0xaaa"));
        assert!(gate.should_check("0xbbb"));
        assert!(!gate.should_check("0xbbb"));
    }

    /// Scenario: condition entry cleared after a terminal transition.
    /// Expected: the next check fires immediately again.
    #[test]
    fn test_recheck_gate_clear() {
        let gate = RecheckGate::new(30.0);
        assert!(gate.should_check("0xaaa"));
        gate.clear("0xaaa");
        assert!(gate.should_check("0xaaa"));
    }

    /// Scenario: a zero-interval gate (paper-style tight loop).
    /// Expected: every check fires.
    #[test]
    fn test_recheck_gate_zero_interval() {
        let gate = RecheckGate::new(0.0);
        assert!(gate.should_check("0xaaa"));
        assert!(gate.should_check("0xaaa"));
    }
}
