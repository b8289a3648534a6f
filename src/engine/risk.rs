use tracing::{error, info, warn};

use crate::config::Config;
use crate::types::{now_ts, CompleteSet, SetState};

/// Point-in-time risk state for logging / status display.
#[derive(Clone, Copy, Debug)]
pub struct RiskSnapshot {
    pub open_sets: usize,
    pub daily_pnl: f64,
    pub total_exposure: f64,
    pub kill_switch_active: bool,
    pub risk_multiplier: f64,
    pub consecutive_losses: u32,
    pub consecutive_redemption_failures: u32,
}

/// Gates every new quote and scales position sizing down under stress.
///
/// Tracks daily PnL (86400s wall-clock window), loss streaks, and
/// consecutive redemption failures — the last being the blacklist heuristic:
/// a wallet that suddenly cannot redeem anything has probably been flagged,
/// and pouring more capital in would only grow the trapped position.
pub struct RiskGovernor {
    config: Config,
    daily_pnl: f64,
    day_start: f64,
    kill_switch: bool,
    consecutive_losses: u32,
    consecutive_redemption_failures: u32,
}

impl RiskGovernor {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            daily_pnl: 0.0,
            day_start: now_ts(),
            kill_switch: false,
            consecutive_losses: 0,
            consecutive_redemption_failures: 0,
        }
    }

    // ── Gate checks ───────────────────────────────────────────────────────

    /// True if risk limits allow opening another complete set.
    pub fn can_open_new_set(&mut self, active_sets: &[CompleteSet]) -> bool {
        if self.kill_switch {
            warn!("Kill switch active — blocking new set");
            return false;
        }

        self.maybe_reset_daily();

        if self.daily_pnl <= -self.config.max_daily_loss {
            warn!(
                "Daily loss limit hit: ${:.2} (limit ${:.2})",
                self.daily_pnl, self.config.max_daily_loss
            );
            return false;
        }

        let open_count = count_open(active_sets);
        if open_count >= self.config.max_open_sets {
            info!("Max open sets reached: {}", open_count);
            return false;
        }

        let exposure = total_exposure(active_sets);
        if exposure >= self.config.max_total_exposure {
            info!("Max exposure reached: ${:.2}", exposure);
            return false;
        }

        true
    }

    // ── Sizing multiplier ─────────────────────────────────────────────────

    /// Multiplier in [min_risk_multiplier, 1.0]: the product of the streak
    /// and exposure scales, floored.
    pub fn risk_multiplier(&self, active_sets: &[CompleteSet]) -> f64 {
        let combined = self.streak_multiplier() * self.exposure_multiplier(active_sets);
        combined.max(self.config.min_risk_multiplier)
    }

    /// Scale down after consecutive losses beyond the threshold.
    fn streak_multiplier(&self) -> f64 {
        let threshold = self.config.loss_streak_threshold;
        if self.consecutive_losses <= threshold {
            return 1.0;
        }
        let overshoot = self.consecutive_losses - threshold;
        let scale = self.config.loss_streak_scale.powi(overshoot as i32);
        scale.max(self.config.min_risk_multiplier)
    }

    /// Linear scale-down as exposure approaches the limit: 1.0 below 50%
    /// utilization, down to 0.25 at 100%.
    fn exposure_multiplier(&self, active_sets: &[CompleteSet]) -> f64 {
        let limit = self.config.max_total_exposure;
        if limit <= 0.0 {
            return 1.0;
        }
        let ratio = total_exposure(active_sets) / limit;
        if ratio < 0.5 {
            return 1.0;
        }
        (1.0 - 1.5 * (ratio - 0.5)).max(self.config.min_risk_multiplier)
    }

    // ── PnL tracking ──────────────────────────────────────────────────────

    /// Record realized PnL and update streak counters.
    pub fn record_pnl(&mut self, amount: f64) {
        self.daily_pnl += amount;
        info!("PnL recorded: ${:.4}  (daily: ${:.4})", amount, self.daily_pnl);

        if amount >= 0.0 {
            self.consecutive_losses = 0;
        } else {
            self.consecutive_losses += 1;
            info!(
                "Consecutive losses: {} (threshold: {})",
                self.consecutive_losses, self.config.loss_streak_threshold
            );
        }

        if self.daily_pnl <= -self.config.max_daily_loss {
            warn!("Daily loss limit breached — activating kill switch");
            self.kill_switch = true;
        }
    }

    // ── Redemption failure / blacklist detection ──────────────────────────

    /// Count a failed redemption attempt. The "no tokens redeemed" outcomes
    /// never reach here — only real failures (reverts, dead RPCs) do.
    pub fn record_redemption_failure(&mut self) {
        self.consecutive_redemption_failures += 1;
        warn!(
            "Redemption failure #{} (max before kill: {})",
            self.consecutive_redemption_failures, self.config.max_redemption_failures
        );
        if self.consecutive_redemption_failures >= self.config.max_redemption_failures {
            error!(
                "SUSPECTED BLACKLIST — {} consecutive redemption failures. \
                 Kill switch activated. Check account status manually.",
                self.consecutive_redemption_failures
            );
            self.kill_switch = true;
        }
    }

    pub fn record_redemption_success(&mut self) {
        if self.consecutive_redemption_failures > 0 {
            info!(
                "Redemption succeeded — clearing {} failure(s)",
                self.consecutive_redemption_failures
            );
        }
        self.consecutive_redemption_failures = 0;
    }

    pub fn suspected_blacklist(&self) -> bool {
        self.consecutive_redemption_failures >= self.config.max_redemption_failures
    }

    // ── Kill switch ───────────────────────────────────────────────────────

    /// Emergency stop — no new quotes until manually reset.
    pub fn activate_kill_switch(&mut self) {
        self.kill_switch = true;
        error!("KILL SWITCH ACTIVATED");
    }

    pub fn deactivate_kill_switch(&mut self) {
        self.kill_switch = false;
        self.consecutive_redemption_failures = 0;
        info!("Kill switch deactivated");
    }

    // ── Snapshot ──────────────────────────────────────────────────────────

    pub fn snapshot(&mut self, active_sets: &[CompleteSet]) -> RiskSnapshot {
        self.maybe_reset_daily();
        RiskSnapshot {
            open_sets: count_open(active_sets),
            daily_pnl: self.daily_pnl,
            total_exposure: total_exposure(active_sets),
            kill_switch_active: self.kill_switch,
            risk_multiplier: self.risk_multiplier(active_sets),
            consecutive_losses: self.consecutive_losses,
            consecutive_redemption_failures: self.consecutive_redemption_failures,
        }
    }

    // ── Internal ──────────────────────────────────────────────────────────

    /// Reset daily PnL after 86400s of wall clock from the last reset.
    fn maybe_reset_daily(&mut self) {
        if now_ts() - self.day_start >= 86_400.0 {
            info!("Daily reset: PnL was ${:.4}, resetting", self.daily_pnl);
            self.daily_pnl = 0.0;
            self.day_start = now_ts();
            self.consecutive_losses = 0;
        }
    }
}

/// "Open" for the set-count limit means still working orders.
fn count_open(active_sets: &[CompleteSet]) -> usize {
    active_sets
        .iter()
        .filter(|s| matches!(s.state, SetState::Quoting | SetState::OneLegFilled))
        .count()
}

/// Capital at risk across all non-terminal sets.
fn total_exposure(active_sets: &[CompleteSet]) -> f64 {
    active_sets
        .iter()
        .filter(|s| {
            matches!(
                s.state,
                SetState::Quoting
                    | SetState::OneLegFilled
                    | SetState::Complete
                    | SetState::AwaitingResolution
            )
        })
        .map(|s| s.combined_cost())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LegOrder, MarketWindow, OrderState, Side};

    fn make_config() -> Config {
        Config::from_env()
    }

    fn make_set(price_each: f64, size: f64, state: SetState) -> CompleteSet {
        let window = MarketWindow {
            condition_id: "0xcond".into(),
            event_id: "1".into(),
            question: "q".into(),
            up_token_id: "u".into(),
            down_token_id: "d".into(),
            end_time: String::new(),
            end_time_epoch: 0.0,
            slug: None,
        };
        let up = LegOrder::new("u1".into(), "u".into(), Side::Up, price_each, size, OrderState::Live);
        let down = LegOrder::new("d1".into(), "d".into(), Side::Down, price_each, size, OrderState::Live);
        let mut set = CompleteSet::new(window, up, down);
        set.state = state;
        set
    }

    /// Scenario: fresh governor, no active sets.
    /// Expected: new sets allowed, multiplier 1.0.
    #[test]
    fn test_fresh_governor_allows() {
        let mut risk = RiskGovernor::new(make_config());
        assert!(risk.can_open_new_set(&[]));
        assert_eq!(risk.risk_multiplier(&[]), 1.0);
    }

    /// Scenario: kill switch tripped manually.
    /// Expected: can_open_new_set false until deactivated.
    #[test]
    fn test_kill_switch_blocks() {
        let mut risk = RiskGovernor::new(make_config());
        risk.activate_kill_switch();
        assert!(!risk.can_open_new_set(&[]));
        risk.deactivate_kill_switch();
        assert!(risk.can_open_new_set(&[]));
    }

    /// Scenario: daily PnL at -$50 (the default limit).
    /// Expected: blocked, and the kill switch trips on the recording.
    #[test]
    fn test_daily_loss_blocks_and_kills() {
        let mut risk = RiskGovernor::new(make_config());
        risk.record_pnl(-50.0);
        assert!(!risk.can_open_new_set(&[]));
        assert!(risk.snapshot(&[]).kill_switch_active);
    }

    /// Scenario: 10 open sets (the default max), all QUOTING.
    /// Expected: count gate blocks the 11th.
    #[test]
    fn test_max_open_sets_blocks() {
        let mut risk = RiskGovernor::new(make_config());
        let sets: Vec<CompleteSet> = (0..10).map(|_| make_set(0.10, 5.0, SetState::Quoting)).collect();
        assert!(!risk.can_open_new_set(&sets));
    }

    /// Scenario: AWAITING_RESOLUTION sets hold $200 of exposure but zero
    /// open (working) sets.
    /// Expected: exposure gate blocks even though the open count is fine.
    #[test]
    fn test_exposure_counts_non_terminal_only() {
        let mut risk = RiskGovernor::new(make_config());
        // 4 sets x (0.50*50 + 0.50*50) = 4 x $50 = $200
        let sets: Vec<CompleteSet> = (0..4)
            .map(|_| make_set(0.50, 50.0, SetState::AwaitingResolution))
            .collect();
        assert_eq!(count_open(&sets), 0);
        assert!(total_exposure(&sets) >= 200.0);
        assert!(!risk.can_open_new_set(&sets));

        // Terminal sets contribute nothing
        let done: Vec<CompleteSet> = (0..4).map(|_| make_set(0.50, 50.0, SetState::Redeemed)).collect();
        assert_eq!(total_exposure(&done), 0.0);
        assert!(risk.can_open_new_set(&done));
    }

    /// Scenario: loss streaks around the threshold of 3.
    /// Expected: 1.0 multiplier at the threshold; halves per loss beyond it;
    /// floored at 0.25; reset by a single win.
    #[test]
    fn test_streak_multiplier() {
        let mut risk = RiskGovernor::new(make_config());
        risk.record_pnl(-1.0);
        risk.record_pnl(-1.0);
        risk.record_pnl(-1.0);
        assert_eq!(risk.risk_multiplier(&[]), 1.0);

        risk.record_pnl(-1.0); // 4th consecutive loss
        assert!((risk.risk_multiplier(&[]) - 0.5).abs() < 1e-12);

        risk.record_pnl(-1.0); // 5th
        assert!((risk.risk_multiplier(&[]) - 0.25).abs() < 1e-12);

        risk.record_pnl(-1.0); // 6th — would be 0.125, floored
        assert!((risk.risk_multiplier(&[]) - 0.25).abs() < 1e-12);

        risk.record_pnl(2.0); // win resets the streak
        assert_eq!(risk.risk_multiplier(&[]), 1.0);
    }

    /// Scenario: exposure at 0%, 40%, 75% and 100% of the $200 limit.
    /// Expected: full size below half utilization, then a linear ramp down
    /// to 0.25 at the limit.
    #[test]
    fn test_exposure_multiplier_ramp() {
        let risk = RiskGovernor::new(make_config());

        assert_eq!(risk.risk_multiplier(&[]), 1.0);

        // 0.40*100 x2 legs = $80 → 40% → full size
        let forty = vec![make_set(0.40, 100.0, SetState::Quoting)];
        assert_eq!(risk.risk_multiplier(&forty), 1.0);

        // 0.50*150 x2 legs = $150 → 75% → 1.0 - 1.5*0.25 = 0.625
        let seventy_five = vec![make_set(0.50, 150.0, SetState::Quoting)];
        assert!((risk.risk_multiplier(&seventy_five) - 0.625).abs() < 1e-9);

        // $200 → 100% → 1.0 - 1.5*0.5 = 0.25
        let full = vec![make_set(0.50, 200.0, SetState::Quoting)];
        assert!((risk.risk_multiplier(&full) - 0.25).abs() < 1e-9);
    }

    /// Scenario: multiplier bounds across adversarial inputs.
    /// Expected: always within [min_risk_multiplier, 1.0].
    #[test]
    fn test_multiplier_bounds() {
        let mut risk = RiskGovernor::new(make_config());
        for _ in 0..20 {
            risk.record_pnl(-1.0);
        }
        let heavy = vec![make_set(0.50, 500.0, SetState::Quoting)];
        let m = risk.risk_multiplier(&heavy);
        assert!((0.25..=1.0).contains(&m), "multiplier {}", m);
    }

    /// Scenario: three consecutive redemption failures (default max).
    /// Expected: blacklist suspected, kill switch on; success resets.
    #[test]
    fn test_blacklist_detection() {
        let mut risk = RiskGovernor::new(make_config());
        risk.record_redemption_failure();
        risk.record_redemption_failure();
        assert!(!risk.suspected_blacklist());
        assert!(risk.can_open_new_set(&[]));

        risk.record_redemption_failure();
        assert!(risk.suspected_blacklist());
        assert!(!risk.can_open_new_set(&[]));

        risk.deactivate_kill_switch();
        risk.record_redemption_failure();
        risk.record_redemption_success();
        assert!(!risk.suspected_blacklist());
    }

    /// Scenario: wins and losses accumulate into the daily total.
    /// Expected: snapshot reflects the running PnL and streak.
    #[test]
    fn test_snapshot_totals() {
        let mut risk = RiskGovernor::new(make_config());
        risk.record_pnl(3.0);
        risk.record_pnl(-1.0);
        risk.record_pnl(-1.0);

        let snap = risk.snapshot(&[]);
        assert!((snap.daily_pnl - 1.0).abs() < 1e-9);
        assert_eq!(snap.consecutive_losses, 2);
        assert!(!snap.kill_switch_active);
    }

    /// Scenario: day_start pushed back 25 hours.
    /// Expected: daily PnL and streak reset on the next gate check.
    #[test]
    fn test_daily_reset_after_24h() {
        let mut risk = RiskGovernor::new(make_config());
        risk.record_pnl(-10.0);
        risk.day_start = now_ts() - 90_000.0;
        assert!(risk.can_open_new_set(&[]));
        let snap = risk.snapshot(&[]);
        assert_eq!(snap.daily_pnl, 0.0);
        assert_eq!(snap.consecutive_losses, 0);
    }
}
