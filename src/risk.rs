//! Risk Manager: the single source of truth for bankroll, open-position
//! accounting, and kill switches. All mutations go through its API; no
//! caller mutates bankroll or `open_positions` directly.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::now_ms;
use crate::types::{Direction, Signal};

/// Risk's own accounting record for an open position, linked to the
/// Executor's `Trade` by id. Deliberately thin: Risk only needs enough to
/// conserve bankroll and bound exposure, not execution-lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OpenPosition {
    pub side: Direction,
    pub size: f64,
    pub entry_price: f64,
}

/// Why the kill switch tripped, if it has.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KillReason {
    Drawdown,
    RejectionStorm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub cooldown_ms: i64,
    pub daily_loss_limit: f64,
    pub max_drawdown_pct: f64,
    pub max_open_positions: usize,
    pub slippage_bps: f64,
    pub fee_bps: f64,
    pub min_margin_edge: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 1_000,
            daily_loss_limit: 200.0,
            max_drawdown_pct: 0.25,
            max_open_positions: 10,
            slippage_bps: 50.0,
            fee_bps: 20.0,
            min_margin_edge: 0.01,
        }
    }
}

/// Decision returned by `can_trade`, with the accumulated list of reasons
/// any failing check contributed (useful for logs even when `allowed`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeDecision {
    pub allowed: bool,
    pub reasons: Vec<String>,
}

pub struct RiskManager {
    cfg: RiskConfig,
    bankroll: f64,
    /// Session-local; not restored from persisted state (see Design Notes).
    peak_bankroll: f64,
    daily_pnl: f64,
    open_positions: HashMap<String, OpenPosition>,
    killed: Option<KillReason>,
    last_trade_time: i64,
    /// Sliding 60s window of unhandled-rejection timestamps.
    rejection_window: VecDeque<i64>,
}

impl RiskManager {
    pub fn new(initial_bankroll: f64, cfg: RiskConfig) -> Self {
        Self {
            cfg,
            bankroll: initial_bankroll,
            peak_bankroll: initial_bankroll,
            daily_pnl: 0.0,
            open_positions: HashMap::new(),
            killed: None,
            last_trade_time: 0,
            rejection_window: VecDeque::new(),
        }
    }

    pub fn bankroll(&self) -> f64 {
        self.bankroll
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    pub fn is_killed(&self) -> bool {
        self.killed.is_some()
    }

    pub fn open_position_count(&self) -> usize {
        self.open_positions.len()
    }

    /// Runs the gating checks in spec order, accumulating reasons; short
    /// circuits immediately if already killed (I6). Stamps `last_trade_time`
    /// atomically, and only when the decision is `allowed` (I7/Q8).
    pub fn can_trade(&mut self, signal: &Signal) -> TradeDecision {
        if let Some(reason) = &self.killed {
            return TradeDecision {
                allowed: false,
                reasons: vec![format!("killed: {:?}", reason)],
            };
        }

        let mut reasons = Vec::new();
        let now = now_ms();

        if now - self.last_trade_time < self.cfg.cooldown_ms {
            reasons.push("cooldown".to_string());
        }

        if self.daily_pnl <= -self.cfg.daily_loss_limit {
            reasons.push("daily loss limit".to_string());
        }

        let drawdown = if self.peak_bankroll > 0.0 {
            (self.peak_bankroll - self.bankroll) / self.peak_bankroll
        } else {
            0.0
        };
        if drawdown > self.cfg.max_drawdown_pct {
            reasons.push("drawdown".to_string());
            warn!(drawdown, "risk kill switch: drawdown exceeded");
            self.killed = Some(KillReason::Drawdown);
        }

        if self.open_positions.len() >= self.cfg.max_open_positions {
            reasons.push("max open positions".to_string());
        }

        let liquidity_multiple = if signal.is_certainty { 1.0 } else { 2.0 };
        if signal.available_liquidity < liquidity_multiple * signal.size {
            reasons.push("insufficient liquidity".to_string());
        }

        let cost_floor =
            self.cfg.slippage_bps / 1e4 + self.cfg.fee_bps / 1e4 + self.cfg.min_margin_edge;
        if signal.edge <= cost_floor {
            reasons.push("edge below cost floor".to_string());
        }

        if reasons.is_empty() {
            self.last_trade_time = now;
            TradeDecision {
                allowed: true,
                reasons,
            }
        } else {
            TradeDecision {
                allowed: false,
                reasons,
            }
        }
    }

    pub fn open_position(&mut self, id: String, side: Direction, size: f64, entry_price: f64) {
        debug_assert!(self.bankroll >= size, "opening position beyond bankroll");
        self.bankroll -= size;
        self.open_positions.insert(
            id,
            OpenPosition {
                side,
                size,
                entry_price,
            },
        );
    }

    /// The sole channel through which partial exits touch risk state.
    pub fn apply_partial_close(&mut self, id: &str, realized_notional: f64, realized_pnl: f64) {
        if let Some(pos) = self.open_positions.get_mut(id) {
            pos.size = (pos.size - realized_notional).max(0.0);
        }
        self.bankroll += realized_notional + realized_pnl;
        self.daily_pnl += realized_pnl;
        self.peak_bankroll = self.peak_bankroll.max(self.bankroll);
    }

    /// No-op if `id` is not present (safe on restore-skip paths).
    pub fn close_position(&mut self, id: &str, pnl: f64) {
        if let Some(pos) = self.open_positions.remove(id) {
            self.bankroll += pos.size + pnl;
            self.daily_pnl += pnl;
            self.peak_bankroll = self.peak_bankroll.max(self.bankroll);
        }
    }

    /// Appends `now` to a sliding 60s deque; 5 rejections in that window
    /// trips a sticky kill.
    pub fn note_unhandled_rejection(&mut self) {
        let now = now_ms();
        self.rejection_window.push_back(now);
        while let Some(&front) = self.rejection_window.front() {
            if now - front > 60_000 {
                self.rejection_window.pop_front();
            } else {
                break;
            }
        }
        if self.rejection_window.len() >= 5 {
            warn!("risk kill switch: rejection storm");
            self.killed = Some(KillReason::RejectionStorm);
        }
    }

    pub fn reset_daily_pnl(&mut self) {
        self.daily_pnl = 0.0;
    }

    /// Snapshot view for state persistence; `peak_bankroll` is deliberately
    /// excluded (recomputed from `bankroll` on restore).
    pub fn snapshot(&self) -> RiskSnapshot {
        RiskSnapshot {
            bankroll: self.bankroll,
            daily_pnl: self.daily_pnl,
            open_positions: self.open_positions.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: RiskSnapshot) {
        self.bankroll = snapshot.bankroll;
        self.peak_bankroll = snapshot.bankroll;
        self.daily_pnl = snapshot.daily_pnl;
        self.open_positions = snapshot.open_positions;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub bankroll: f64,
    pub daily_pnl: f64,
    pub open_positions: HashMap<String, OpenPosition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(size: f64, edge: f64, liquidity: f64) -> Signal {
        Signal {
            token_id: "tok".into(),
            direction: Direction::BuyYes,
            entry_price: 0.5,
            size,
            edge,
            model_prob: 0.6,
            contract_price: 0.5,
            spot_price: 100.0,
            strike_price: 100.0,
            feed_lag_ms: 1500,
            available_liquidity: liquidity,
            hours_to_expiry: 1.0,
            label: "BTC/5m".into(),
            is_certainty: false,
            expires_at: None,
        }
    }

    #[test]
    fn canonical_trade_allowed_then_cooldown_blocks_immediate_retry() {
        let mut risk = RiskManager::new(1000.0, RiskConfig::default());
        let sig = signal(10.0, 0.10, 100.0);
        let first = risk.can_trade(&sig);
        assert!(first.allowed, "{:?}", first.reasons);

        // S5: second call within the cooldown window must be rejected and
        // must not perturb last_trade_time.
        let second = risk.can_trade(&sig);
        assert!(!second.allowed);
        assert!(second.reasons.contains(&"cooldown".to_string()));
    }

    #[test]
    fn drawdown_kill_switch_is_sticky() {
        // S4: bankroll 1000 -> 740 is a 26% drawdown, over the 25% default limit.
        let mut risk = RiskManager::new(1000.0, RiskConfig::default());
        risk.close_position("nonexistent", 0.0); // no-op, establishes baseline
        risk.bankroll = 740.0;
        let sig = signal(5.0, 0.10, 100.0);
        let decision = risk.can_trade(&sig);
        assert!(!decision.allowed);
        assert!(risk.is_killed());

        // Q7: once killed, always false.
        let decision2 = risk.can_trade(&sig);
        assert!(!decision2.allowed);
    }

    #[test]
    fn liquidity_gate_requires_double_for_non_certainty() {
        let mut risk = RiskManager::new(1000.0, RiskConfig::default());
        let sig = signal(10.0, 0.10, 15.0); // needs 20 for non-certainty
        let decision = risk.can_trade(&sig);
        assert!(!decision.allowed);
        assert!(decision.reasons.contains(&"insufficient liquidity".to_string()));
    }

    #[test]
    fn open_and_close_position_conserves_capital() {
        let mut risk = RiskManager::new(1000.0, RiskConfig::default());
        risk.open_position("t1".into(), Direction::BuyYes, 100.0, 0.5);
        assert_eq!(risk.bankroll(), 900.0);
        risk.close_position("t1", 20.0);
        assert_eq!(risk.bankroll(), 1020.0);
        assert_eq!(risk.open_position_count(), 0);
    }

    #[test]
    fn partial_close_then_close_matches_scenario_s2() {
        let mut risk = RiskManager::new(1000.0, RiskConfig::default());
        risk.open_position("t1".into(), Direction::BuyYes, 5.5, 0.55);
        // First exit: filledQty=4 avgPrice=0.62 -> realizedPnl=0.28, realizedNotional=4*0.55=2.2
        risk.apply_partial_close("t1", 2.2, 0.28);
        // Second exit: remaining pnl = 0.30
        risk.close_position("t1", 0.30);
        assert_eq!(risk.open_position_count(), 0);
        // bankroll: 1000 - 5.5 + 2.2 + 0.28 + (5.5-2.2) + 0.30
        let expected = 1000.0 - 5.5 + 2.2 + 0.28 + (5.5 - 2.2) + 0.30;
        assert!((risk.bankroll() - expected).abs() < 1e-9);
    }

    #[test]
    fn rejection_storm_trips_after_five_in_window() {
        let mut risk = RiskManager::new(1000.0, RiskConfig::default());
        for _ in 0..4 {
            risk.note_unhandled_rejection();
        }
        assert!(!risk.is_killed());
        risk.note_unhandled_rejection();
        assert!(risk.is_killed());
    }
}
