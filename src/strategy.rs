//! Per-market Strategy: consumes spot + contract book updates, maintains
//! rolling volatility and smoothed-edge state, captures the window-open
//! strike, and produces signals in latency-arb or certainty-arb mode.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::numeric::{calculate_edge, calculate_position_size, implied_probability, Ema, RunningStats, SizingConfig};
use crate::types::{Book, Direction, Signal, SpotUpdate};

/// Window-dependent thresholds and sizing knobs for one Strategy instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub window_duration_ms: i64,
    /// Minimum smoothed + instantaneous edge to emit a latency-arb signal.
    pub latency_arb_threshold: f64,
    pub certainty_threshold: f64,
    pub certainty_max_fraction: f64,
    pub certainty_expiry_buffer_ms: i64,
    pub vol_ema_half_life: f64,
    pub spot_ema_half_life: f64,
    pub edge_ema_half_life: f64,
    pub sizing: SizingConfig,
    /// Pre-first-tick daily-vol fallback (e.g. from `DAILY_VOL_SEEDS`), used
    /// only until the first real `onSpotUpdate` seeds `vol_ema`.
    pub vol_seed: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            window_duration_ms: 5 * 60 * 1000,
            latency_arb_threshold: 0.05,
            certainty_threshold: 0.15,
            certainty_max_fraction: 0.02,
            certainty_expiry_buffer_ms: 5_000,
            vol_ema_half_life: 20.0,
            spot_ema_half_life: 20.0,
            edge_ema_half_life: 10.0,
            sizing: SizingConfig {
                kelly_multiplier: 0.25,
                max_bet_fraction: 0.10,
                max_position_usd: 500.0,
                slippage_bps: 50.0,
                fee_bps: 20.0,
            },
            vol_seed: 0.3,
        }
    }
}

/// `() -> bankroll`, injected by the Engine so sizing always reads the live
/// Risk bankroll, never a stale snapshot.
pub type BankrollGetter = Arc<dyn Fn() -> f64 + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
struct SpotState {
    price: Option<f64>,
    delta: f64,
    last_update: i64,
}

#[derive(Debug, Clone, Copy, Default)]
struct ContractState {
    mid: Option<f64>,
    best_bid: f64,
    best_ask: f64,
    bid_depth: f64,
    ask_depth: f64,
    last_update: i64,
}

pub struct Strategy {
    cfg: StrategyConfig,
    label: String,
    bankroll: BankrollGetter,

    spot: SpotState,
    contract: ContractState,

    vol_ema: Ema,
    spot_ema: Ema,
    edge_ema: Ema,

    token_id_yes: String,
    token_id_no: String,
    market_end_date: i64,
    market_window_start: i64,
    market_open_strike: Option<f64>,
    market_set_count: u64,

    signal_count: u64,
    edge_stats: RunningStats,
    lag_stats: RunningStats,
}

impl Strategy {
    pub fn new(label: String, cfg: StrategyConfig, bankroll: BankrollGetter) -> Self {
        let mut vol_ema = Ema::new(cfg.vol_ema_half_life);
        vol_ema.update(cfg.vol_seed);
        Self {
            vol_ema,
            spot_ema: Ema::new(cfg.spot_ema_half_life),
            edge_ema: Ema::new(cfg.edge_ema_half_life),
            cfg,
            label,
            bankroll,
            spot: SpotState::default(),
            contract: ContractState::default(),
            token_id_yes: String::new(),
            token_id_no: String::new(),
            market_end_date: 0,
            market_window_start: 0,
            market_open_strike: None,
            market_set_count: 0,
            signal_count: 0,
            edge_stats: RunningStats::new(),
            lag_stats: RunningStats::new(),
        }
    }

    /// Rotation: reset the captured strike, recompute the window start, and
    /// bump `market_set_count` (the startup-suppression guard, P2).
    pub fn set_market(&mut self, token_id_yes: String, token_id_no: String, end_date: i64) {
        self.token_id_yes = token_id_yes;
        self.token_id_no = token_id_no;
        self.market_end_date = end_date;
        self.market_window_start = end_date - self.cfg.window_duration_ms;
        self.market_open_strike = None;
        self.market_set_count += 1;
    }

    pub fn token_id_yes(&self) -> &str {
        &self.token_id_yes
    }

    pub fn token_id_no(&self) -> &str {
        &self.token_id_no
    }

    pub fn on_spot_update(&mut self, update: SpotUpdate) -> Option<Signal> {
        self.spot.price = Some(update.mid);
        self.spot.delta = update.delta;
        self.spot.last_update = update.timestamp;

        if self.market_open_strike.is_none() && update.timestamp >= self.market_window_start {
            self.market_open_strike = Some(update.mid);
        }

        let vol_input = if update.realized_vol > 0.0 {
            update.realized_vol
        } else {
            // Fallback: derive a daily-vol proxy from the per-tick delta,
            // assuming ~1 tick/second (86400 ticks/day).
            update.delta.abs() * 86_400_f64.sqrt()
        };
        self.vol_ema.update(vol_input);
        self.spot_ema.update(update.mid);

        self.evaluate(update.timestamp)
    }

    pub fn on_contract_update(&mut self, book: Book) -> Option<Signal> {
        self.contract.mid = Some(book.mid);
        self.contract.best_bid = book.best_bid;
        self.contract.best_ask = book.best_ask;
        self.contract.bid_depth = book.bid_depth;
        self.contract.ask_depth = book.ask_depth;
        self.contract.last_update = book.timestamp;

        if let Some(spot_ts) = Some(self.spot.last_update).filter(|&ts| ts != 0) {
            self.lag_stats.push((spot_ts - book.timestamp).abs() as f64);
        }

        self.evaluate(book.timestamp)
    }

    fn evaluate(&mut self, now: i64) -> Option<Signal> {
        let spot_price = self.spot.price?;
        let contract_mid = self.contract.mid?;

        // P2: suppress signals during the startup window.
        if self.market_set_count <= 1 {
            return None;
        }
        // P3: suppress pre-window.
        if now < self.market_window_start {
            return None;
        }
        // P4: strike must be captured.
        let strike = self.market_open_strike?;

        let hours_to_expiry = (self.market_end_date - now) as f64 / 3_600_000.0;
        // P5: at least 5 seconds to expiry.
        if hours_to_expiry < 5.0 / 3600.0 {
            return None;
        }

        let vol = self.vol_ema.last().unwrap_or(0.3);
        let model_prob = implied_probability(spot_price, strike, vol, hours_to_expiry);
        let edge = calculate_edge(model_prob, contract_mid);
        let smoothed_edge = self.edge_ema.update(edge.absolute);
        self.edge_stats.push(edge.absolute);

        let feed_lag_ms = (self.spot.last_update - self.contract.last_update).abs();
        let seconds_to_expiry = hours_to_expiry * 3600.0;

        let (is_certainty, expires_at) = if seconds_to_expiry <= 90.0 && seconds_to_expiry > 0.0 {
            if !self.certainty_signal_eligible(&edge) {
                return None;
            }
            (true, Some(self.market_end_date - self.cfg.certainty_expiry_buffer_ms))
        } else if seconds_to_expiry > 90.0 {
            if !self.latency_arb_signal_eligible(smoothed_edge, &edge, feed_lag_ms, model_prob) {
                return None;
            }
            (false, None)
        } else {
            return None;
        };

        let bankroll = (self.bankroll)();
        let sizing_cfg = if is_certainty {
            SizingConfig {
                max_bet_fraction: self.cfg.certainty_max_fraction,
                ..self.cfg.sizing
            }
        } else {
            self.cfg.sizing
        };
        let sized = calculate_position_size(bankroll, &edge, contract_mid, &sizing_cfg)?;

        let (entry_price, available_liquidity) = match edge.direction {
            Direction::BuyYes => {
                let price = if self.contract.best_ask > 0.0 {
                    self.contract.best_ask
                } else {
                    contract_mid + (self.contract.best_ask - self.contract.best_bid).abs() / 2.0
                };
                (price, self.contract.ask_depth)
            }
            Direction::BuyNo => {
                let price = 1.0 - self.contract.best_bid;
                (price, self.contract.bid_depth)
            }
        };

        self.signal_count += 1;
        debug!(
            label = %self.label,
            edge = edge.absolute,
            model_prob,
            is_certainty,
            "strategy emitting signal"
        );

        Some(Signal {
            token_id: match edge.direction {
                Direction::BuyYes => self.token_id_yes.clone(),
                Direction::BuyNo => self.token_id_no.clone(),
            },
            direction: edge.direction,
            entry_price,
            size: sized.net_size,
            edge: edge.absolute,
            model_prob,
            contract_price: contract_mid,
            spot_price,
            strike_price: strike,
            feed_lag_ms,
            available_liquidity,
            hours_to_expiry,
            label: self.label.clone(),
            is_certainty,
            expires_at,
        })
    }

    fn latency_arb_signal_eligible(
        &self,
        smoothed_edge: f64,
        edge: &crate::types::Edge,
        feed_lag_ms: i64,
        model_prob: f64,
    ) -> bool {
        smoothed_edge >= self.cfg.latency_arb_threshold
            && edge.absolute >= self.cfg.latency_arb_threshold
            && feed_lag_ms > 1_000
            && feed_lag_ms <= 5_000
            && model_prob <= 0.90
    }

    fn certainty_signal_eligible(&self, edge: &crate::types::Edge) -> bool {
        if edge.absolute < self.cfg.certainty_threshold {
            return false;
        }
        let side_price = match edge.direction {
            Direction::BuyYes => self.contract.best_ask,
            Direction::BuyNo => 1.0 - self.contract.best_bid,
        };
        side_price >= 0.15
    }

    pub fn signal_count(&self) -> u64 {
        self.signal_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy_with_bankroll(bankroll: f64) -> Strategy {
        Strategy::new(
            "BTC/5m".to_string(),
            StrategyConfig::default(),
            Arc::new(move || bankroll),
        )
    }

    fn book(mid: f64, ts: i64) -> Book {
        let half_spread = 0.01;
        Book {
            token_id_hash: 0,
            best_bid: mid - half_spread,
            best_ask: mid + half_spread,
            bid_depth: 100.0,
            ask_depth: 100.0,
            mid,
            timestamp: ts,
        }
    }

    #[test]
    fn startup_suppression_blocks_first_market_set() {
        let mut s = strategy_with_bankroll(1000.0);
        s.set_market("yes".into(), "no".into(), 10_000_000);
        // market_set_count == 1 here: P2 must suppress any signal even
        // though spot, contract, and strike are all otherwise ready.
        s.market_window_start = -1; // already in-window
        s.on_spot_update(SpotUpdate {
            mid: 100.0,
            delta: 0.0,
            realized_vol: 2.0,
            timestamp: 0,
        });
        let sig = s.on_contract_update(book(0.5, 0));
        assert!(sig.is_none());
        assert_eq!(s.signal_count(), 0);
    }

    #[test]
    fn pre_window_ticks_do_not_capture_strike() {
        let mut s = strategy_with_bankroll(1000.0);
        s.set_market("yes".into(), "no".into(), 10_000_000);
        s.set_market("yes".into(), "no".into(), 10_000_000); // bump set count to 2
        let pre_window_ts = s.market_window_start - 1000;
        s.on_spot_update(SpotUpdate {
            mid: 100.0,
            delta: 0.0,
            realized_vol: 0.3,
            timestamp: pre_window_ts,
        });
        assert!(s.market_open_strike.is_none());
    }

    #[test]
    fn large_sustained_edge_with_stale_lag_emits_latency_arb_signal() {
        let mut s = strategy_with_bankroll(10_000.0);
        let end = 10_000_000_i64;
        s.set_market("yes".into(), "no".into(), end);
        s.set_market("yes".into(), "no".into(), end);
        let in_window_ts = s.market_window_start + 1;
        s.on_spot_update(SpotUpdate {
            mid: 100.0,
            delta: 0.0,
            realized_vol: 2.0,
            timestamp: in_window_ts,
        });
        // Push a spot move so modelProb diverges from the contract price,
        // with a high enough vol that the move doesn't saturate N(d2).
        s.on_spot_update(SpotUpdate {
            mid: 105.0,
            delta: 5.0,
            realized_vol: 2.0,
            timestamp: in_window_ts + 2000,
        });
        let sig = s.on_contract_update(book(0.5, in_window_ts));
        assert!(sig.is_some());
        let sig = sig.unwrap();
        assert!(!sig.is_certainty);
        assert!(sig.edge >= 0.05);
    }

    #[test]
    fn signal_count_increments_per_emitted_signal() {
        let mut s = strategy_with_bankroll(10_000.0);
        let end = 10_000_000_i64;
        s.set_market("yes".into(), "no".into(), end);
        s.set_market("yes".into(), "no".into(), end);
        let in_window_ts = s.market_window_start + 1;
        s.on_spot_update(SpotUpdate {
            mid: 100.0,
            delta: 0.0,
            realized_vol: 2.0,
            timestamp: in_window_ts,
        });
        s.on_spot_update(SpotUpdate {
            mid: 105.0,
            delta: 5.0,
            realized_vol: 2.0,
            timestamp: in_window_ts + 2000,
        });
        s.on_contract_update(book(0.5, in_window_ts));
        assert_eq!(s.signal_count(), 1);
    }
}
