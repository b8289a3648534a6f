use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use crate::types::{now_ts, CompleteSet, LegOrder, OrderState, SetState, Side};

/// Aggregate PnL across completed sets, for status reports.
#[derive(Clone, Copy, Debug, Default)]
pub struct PnlSummary {
    pub total_pnl: f64,
    pub sets_redeemed: usize,
    pub sets_abandoned: usize,
    pub sets_redemption_failed: usize,
    pub sets_awaiting_resolution: usize,
    pub active_sets: usize,
    pub avg_edge: f64,
}

/// Sole authority over the lifecycle of complete sets.
///
/// Every state mutation funnels through a method here; the loops hold only
/// cloned snapshots and refer back by set_id. Each terminal transition moves
/// the set from active to completed and rewrites the trade log.
pub struct PositionTracker {
    active: Vec<CompleteSet>,
    completed: Vec<CompleteSet>,
    log_path: PathBuf,
}

impl PositionTracker {
    /// Build a tracker backed by the given trade log, restoring any sets a
    /// previous run left behind. Unredeemed sets must survive restarts or
    /// the redemption loop silently orphans their capital.
    pub fn new(trade_log_file: &str) -> Self {
        let log_path = PathBuf::from(trade_log_file);
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }

        let mut tracker = Self {
            active: Vec::new(),
            completed: Vec::new(),
            log_path,
        };
        tracker.reload();
        tracker
    }

    pub fn active_sets(&self) -> Vec<CompleteSet> {
        self.active.clone()
    }

    pub fn completed_sets(&self) -> &[CompleteSet] {
        &self.completed
    }

    pub fn get_active(&self, set_id: &str) -> Option<&CompleteSet> {
        self.active.iter().find(|s| s.set_id == set_id)
    }

    /// Register a new complete set being quoted.
    pub fn add_set(&mut self, set: CompleteSet) {
        info!("Tracking new set {}: {}", set.set_id, set.window.question);
        self.active.push(set);
    }

    /// Update one leg's state and re-derive the set state. Returns the
    /// resulting set state so callers can react to transitions.
    ///
    /// Leg transitions are monotone: a terminal leg never changes again.
    pub fn update_leg_state(
        &mut self,
        set_id: &str,
        token_id: &str,
        new_state: OrderState,
    ) -> Option<SetState> {
        let target = self.active.iter_mut().find(|s| s.set_id == set_id)?;

        let leg = if target.up_leg.token_id == token_id {
            &mut target.up_leg
        } else if target.down_leg.token_id == token_id {
            &mut target.down_leg
        } else {
            return None;
        };

        if leg.state.is_terminal() && leg.state != new_state {
            debug!(
                "Ignoring leg regression for set {} ({:?} → {:?})",
                set_id, leg.state, new_state
            );
            return Some(target.state);
        }

        let old_state = leg.state;
        leg.state = new_state;
        if new_state == OrderState::Filled && leg.filled_at.is_none() {
            leg.filled_at = Some(now_ts());
        }

        info!(
            "Set {} leg {}: {:?} → {:?}",
            set_id,
            &token_id[..8.min(token_id.len())],
            old_state,
            new_state
        );

        let up_filled = target.up_leg.state == OrderState::Filled;
        let down_filled = target.down_leg.state == OrderState::Filled;

        if up_filled && down_filled {
            target.state = SetState::Complete;
            if target.completed_at.is_none() {
                target.completed_at = Some(now_ts());
            }
            info!("SET COMPLETE {} — edge ${:.4}", target.set_id, target.edge_per_share());
        } else if (up_filled || down_filled) && target.state != SetState::OneLegFilled {
            target.state = SetState::OneLegFilled;
            info!("One leg filled for set {}", target.set_id);
        }

        Some(target.state)
    }

    /// Swap in a reposted leg (one-leg recovery). The replacement keeps the
    /// same side and token; only price/order identity change.
    pub fn replace_leg(&mut self, set_id: &str, side: Side, new_leg: LegOrder) {
        let Some(target) = self.active.iter_mut().find(|s| s.set_id == set_id) else {
            return;
        };
        match side {
            Side::Up => target.up_leg = new_leg,
            Side::Down => target.down_leg = new_leg,
        }
        debug!("Replaced {} leg for set {}", side, set_id);
    }

    /// Transition into AWAITING_RESOLUTION, permitted from Complete (window
    /// ended) or OneLegFilled (holding the filled leg through resolution).
    pub fn mark_awaiting_resolution(&mut self, set_id: &str) {
        let Some(target) = self.active.iter_mut().find(|s| s.set_id == set_id) else {
            return;
        };
        if matches!(target.state, SetState::Complete | SetState::OneLegFilled) {
            target.state = SetState::AwaitingResolution;
            if target.completed_at.is_none() {
                target.completed_at = Some(now_ts());
            }
            info!("Set {} now awaiting resolution", set_id);
        }
    }

    /// Terminal: redeemed at $1.00. PnL follows the final leg composition —
    /// a full set nets 1 - (up + down) per share, a single-leg hold nets
    /// 1 - price on the filled leg only. Returns the realized PnL.
    pub fn mark_redeemed(&mut self, set_id: &str) -> Option<f64> {
        let target = self.active.iter_mut().find(|s| s.set_id == set_id)?;

        let pnl = if target.both_filled() {
            let cost_per_share = target.up_leg.price + target.down_leg.price;
            (1.0 - cost_per_share) * target.up_leg.size
        } else if let Some(filled) = target.filled_leg() {
            (1.0 - filled.price) * filled.size
        } else {
            0.0
        };

        target.state = SetState::Redeemed;
        if target.completed_at.is_none() {
            target.completed_at = Some(now_ts());
        }
        target.pnl = Some(round4(pnl));
        self.finalize(set_id);
        Some(round4(pnl))
    }

    /// Terminal: gave up, with the supplied realized PnL.
    pub fn mark_abandoned(&mut self, set_id: &str, realized: f64) {
        let Some(target) = self.active.iter_mut().find(|s| s.set_id == set_id) else {
            return;
        };
        target.state = SetState::Abandoned;
        if target.completed_at.is_none() {
            target.completed_at = Some(now_ts());
        }
        target.pnl = Some(round4(realized));
        self.finalize(set_id);
    }

    /// Record a failed redemption attempt. Deliberately not a state change —
    /// the set stays in AWAITING_RESOLUTION for the next try.
    pub fn mark_redemption_failed(&mut self, set_id: &str, error: &str) {
        let Some(target) = self.active.iter_mut().find(|s| s.set_id == set_id) else {
            return;
        };
        target.redemption_attempts += 1;
        target.last_redemption_error = Some(error.to_string());
        warn!(
            "Set {} redemption attempt #{} failed: {}",
            set_id, target.redemption_attempts, error
        );
    }

    /// Terminal: permanently unredeemable (suspected blacklist). The whole
    /// stake is written off. Returns the recorded loss.
    pub fn mark_permanently_failed(&mut self, set_id: &str) -> f64 {
        let Some(target) = self.active.iter_mut().find(|s| s.set_id == set_id) else {
            return 0.0;
        };
        let loss = -target.combined_cost();
        target.state = SetState::RedemptionFailed;
        if target.completed_at.is_none() {
            target.completed_at = Some(now_ts());
        }
        target.pnl = Some(round4(loss));
        self.finalize(set_id);
        error!(
            "Set {} marked REDEMPTION_FAILED — total loss ${:.4}",
            set_id,
            loss.abs()
        );
        round4(loss)
    }

    pub fn pnl_summary(&self) -> PnlSummary {
        let total: f64 = self.completed.iter().filter_map(|s| s.pnl).sum();
        let redeemed = self
            .completed
            .iter()
            .filter(|s| s.state == SetState::Redeemed)
            .count();
        let abandoned = self
            .completed
            .iter()
            .filter(|s| s.state == SetState::Abandoned)
            .count();
        let failed = self
            .completed
            .iter()
            .filter(|s| s.state == SetState::RedemptionFailed)
            .count();
        let awaiting = self
            .active
            .iter()
            .filter(|s| matches!(s.state, SetState::Complete | SetState::AwaitingResolution))
            .count();

        PnlSummary {
            total_pnl: round4(total),
            sets_redeemed: redeemed,
            sets_abandoned: abandoned,
            sets_redemption_failed: failed,
            sets_awaiting_resolution: awaiting,
            active_sets: self.active.len(),
            avg_edge: if redeemed > 0 {
                round4(total / redeemed as f64)
            } else {
                0.0
            },
        }
    }

    /// Rewrite the trade log: completed history first, then active sets.
    /// Whole-file atomic — write to a temp file, then rename over the target.
    pub fn persist(&self) {
        let records: Vec<&CompleteSet> = self.completed.iter().chain(self.active.iter()).collect();

        let json = match serde_json::to_string_pretty(&records) {
            Ok(j) => j,
            Err(e) => {
                error!("Failed to serialize trade log: {}", e);
                return;
            }
        };

        let tmp_path = self.log_path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp_path, &json) {
            error!("Failed to write trade log {}: {}", tmp_path.display(), e);
            return;
        }
        if let Err(e) = std::fs::rename(&tmp_path, &self.log_path) {
            error!("Failed to rename trade log into place: {}", e);
            return;
        }
        debug!("Persisted {} records to {}", records.len(), self.log_path.display());
    }

    /// Restore state from the trade log. Missing or malformed files are
    /// tolerated — the tracker just starts empty.
    fn reload(&mut self) {
        let Ok(raw) = std::fs::read_to_string(&self.log_path) else {
            return;
        };
        let records: Vec<CompleteSet> = match serde_json::from_str(&raw) {
            Ok(r) => r,
            Err(e) => {
                warn!("Trade log {} unreadable ({}) — starting fresh", self.log_path.display(), e);
                return;
            }
        };

        for set in records {
            match set.state {
                s if s.is_terminal() => self.completed.push(set),
                SetState::Complete | SetState::OneLegFilled | SetState::AwaitingResolution => {
                    info!(
                        "Restored set {} in state {:?} — redemption will resume",
                        set.set_id, set.state
                    );
                    self.active.push(set);
                }
                SetState::Quoting => {
                    // Resting orders from a dead session can't be trusted;
                    // their fate is unknowable without the venue ids resting
                    warn!("Dropping stale QUOTING set {} from previous run", set.set_id);
                }
                _ => {}
            }
        }

        if !self.active.is_empty() || !self.completed.is_empty() {
            info!(
                "Reloaded trade log: {} active, {} completed",
                self.active.len(),
                self.completed.len()
            );
        }
    }

    /// Move a terminal set from active to completed and persist.
    fn finalize(&mut self, set_id: &str) {
        let Some(pos) = self.active.iter().position(|s| s.set_id == set_id) else {
            return;
        };
        let set = self.active.remove(pos);
        info!(
            "Set {} finalized: {:?}, PnL=${:.4}",
            set.set_id,
            set.state,
            set.pnl.unwrap_or(0.0)
        );
        self.completed.push(set);
        self.persist();
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}
