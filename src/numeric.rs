//! Numeric utilities: implied probability, edge, Kelly sizing, running stats.
//!
//! Deterministic, stateless-or-small-state pure functions. `normal_cdf` is
//! private; everything else routes through `implied_probability`.

use crate::types::{Direction, Edge};
use serde::{Deserialize, Serialize};

/// Abramowitz & Stegun rational approximation to the standard normal CDF.
/// Max absolute error ~7.5e-8.
fn normal_cdf(x: f64) -> f64 {
    let b1 = 0.319_381_530;
    let b2 = -0.356_563_782;
    let b3 = 1.781_477_937;
    let b4 = -1.821_255_978;
    let b5 = 1.330_274_429;
    let p = 0.231_641_9;
    let c = 0.398_942_280_4; // 1/sqrt(2*pi)

    let z = x.abs();
    let t = 1.0 / (1.0 + p * z);
    let poly = t * (b1 + t * (b2 + t * (b3 + t * (b4 + t * b5))));
    let cdf = 1.0 - c * (-z * z / 2.0).exp() * poly;

    if x >= 0.0 {
        cdf
    } else {
        1.0 - cdf
    }
}

/// Smallest time-to-expiry, in days, before d2 would blow up: 30 seconds.
const MIN_T_DAYS: f64 = 30.0 / 86_400.0;

/// Binary-option implied probability that spot finishes above strike at
/// expiry, via the risk-neutral N(d2) calculation.
///
/// `sigma_daily` is the daily volatility (stdev of log returns, per day).
/// `hours_to_expiry` is clamped so T never collapses to exactly zero.
pub fn implied_probability(spot: f64, strike: f64, sigma_daily: f64, hours_to_expiry: f64) -> f64 {
    let t_days = (hours_to_expiry / 24.0).max(MIN_T_DAYS);
    let sigma = sigma_daily.max(1e-9);
    let sqrt_t = t_days.sqrt();
    let sigma_sqrt_t = sigma * sqrt_t;

    let d2 = ((spot / strike).ln() - 0.5 * sigma * sigma * t_days) / sigma_sqrt_t;
    normal_cdf(d2).clamp(0.0, 1.0)
}

/// Edge between the model's implied probability and the contract's quoted
/// price, expressed as the direction to trade plus its magnitude.
pub fn calculate_edge(model_prob: f64, contract_price: f64) -> Edge {
    if model_prob > contract_price {
        Edge {
            absolute: model_prob - contract_price,
            direction: Direction::BuyYes,
        }
    } else {
        Edge {
            absolute: contract_price - model_prob,
            direction: Direction::BuyNo,
        }
    }
}

/// Kelly fraction for a binary bet: f* = (p(b+1) - 1) / b, clamped to >= 0.
/// `odds` is decimal odds minus one (b in the classical formula).
pub fn kelly_fraction(prob: f64, odds: f64) -> f64 {
    if odds <= 0.0 {
        return 0.0;
    }
    ((prob * (odds + 1.0) - 1.0) / odds).max(0.0)
}

/// Cost and sizing parameters for `calculate_position_size`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SizingConfig {
    pub kelly_multiplier: f64,
    pub max_bet_fraction: f64,
    pub max_position_usd: f64,
    pub slippage_bps: f64,
    pub fee_bps: f64,
}

/// Result of `calculate_position_size`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionSize {
    pub net_size: f64,
    pub raw_size: f64,
    pub kelly: f64,
    pub odds: f64,
    pub slippage: f64,
    pub fee: f64,
}

/// Half-Kelly position size, capped by `maxBetFraction * bankroll` and
/// `maxPositionUsd`, net of slippage+fee (in bps of notional). Returns
/// `None` if the resulting net size is non-positive.
pub fn calculate_position_size(
    bankroll: f64,
    edge: &Edge,
    contract_price: f64,
    cfg: &SizingConfig,
) -> Option<PositionSize> {
    let price = match edge.direction {
        Direction::BuyYes => contract_price,
        Direction::BuyNo => 1.0 - contract_price,
    };
    if price <= 0.0 || price >= 1.0 {
        return None;
    }

    let odds = (1.0 / price) - 1.0;
    let prob = price + edge.absolute;
    let kelly = kelly_fraction(prob, odds);

    let fraction = (kelly * cfg.kelly_multiplier).min(cfg.max_bet_fraction);
    let raw_size = (bankroll * fraction).min(cfg.max_position_usd);

    let slippage = raw_size * (cfg.slippage_bps / 1e4);
    let fee = raw_size * (cfg.fee_bps / 1e4);
    let net_size = raw_size - slippage - fee;

    if net_size <= 0.0 {
        return None;
    }

    Some(PositionSize {
        net_size,
        raw_size,
        kelly,
        odds,
        slippage,
        fee,
    })
}

/// Welford's online algorithm for running mean/variance.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunningStats {
    n: u64,
    mean: f64,
    m2: f64,
    sum: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, x: f64) {
        self.n += 1;
        self.sum += x;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn variance(&self) -> f64 {
        if self.n < 2 {
            0.0
        } else {
            self.m2 / (self.n - 1) as f64
        }
    }

    pub fn stdev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Defined only when n >= 2 and stdev > 0.
    pub fn sharpe(&self) -> Option<f64> {
        if self.n >= 2 && self.stdev() > 0.0 {
            Some(self.mean / self.stdev())
        } else {
            None
        }
    }
}

/// Exponential moving average parameterized by a half-life in samples.
/// The first `update` call returns (and seeds with) the input value unchanged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(half_life_samples: f64) -> Self {
        let alpha = 1.0 - 0.5_f64.powf(1.0 / half_life_samples.max(1e-9));
        Self { alpha, value: None }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            Some(prev) => prev + self.alpha * (x - prev),
            None => x,
        };
        self.value = Some(next);
        next
    }

    pub fn last(&self) -> Option<f64> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implied_probability_is_half_at_the_money_low_vol() {
        // spot == strike, any vol -> ln(1) = 0, d2 = -0.5*sigma*sqrt(T) < 0 -> slightly < 0.5
        let p = implied_probability(100.0, 100.0, 0.01, 24.0);
        assert!((p - 0.5).abs() < 0.02);
    }

    #[test]
    fn implied_probability_rises_with_spot_above_strike() {
        let p_above = implied_probability(105.0, 100.0, 0.3, 24.0);
        let p_at = implied_probability(100.0, 100.0, 0.3, 24.0);
        assert!(p_above > p_at);
    }

    #[test]
    fn implied_probability_clamps_degenerate_time() {
        // hours_to_expiry near zero must not produce NaN/infinite.
        let p = implied_probability(101.0, 100.0, 0.3, 0.0001);
        assert!(p.is_finite());
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn calculate_edge_picks_buy_yes_when_model_richer() {
        let edge = calculate_edge(0.60, 0.50);
        assert_eq!(edge.direction, Direction::BuyYes);
        assert!((edge.absolute - 0.10).abs() < 1e-9);
    }

    #[test]
    fn calculate_edge_picks_buy_no_when_model_cheaper() {
        let edge = calculate_edge(0.40, 0.50);
        assert_eq!(edge.direction, Direction::BuyNo);
        assert!((edge.absolute - 0.10).abs() < 1e-9);
    }

    #[test]
    fn kelly_fraction_is_nonnegative() {
        assert_eq!(kelly_fraction(0.3, 1.0), 0.0);
        assert!(kelly_fraction(0.9, 1.0) > 0.0);
    }

    #[test]
    fn calculate_position_size_caps_at_max_position_usd() {
        let cfg = SizingConfig {
            kelly_multiplier: 1.0,
            max_bet_fraction: 1.0,
            max_position_usd: 50.0,
            slippage_bps: 0.0,
            fee_bps: 0.0,
        };
        let edge = Edge {
            absolute: 0.4,
            direction: Direction::BuyYes,
        };
        let size = calculate_position_size(1_000_000.0, &edge, 0.5, &cfg).unwrap();
        assert!(size.raw_size <= 50.0 + 1e-9);
    }

    #[test]
    fn calculate_position_size_none_when_fee_exceeds_raw() {
        let cfg = SizingConfig {
            kelly_multiplier: 0.001,
            max_bet_fraction: 1.0,
            max_position_usd: 1000.0,
            slippage_bps: 5000.0,
            fee_bps: 5000.0,
        };
        let edge = Edge {
            absolute: 0.01,
            direction: Direction::BuyYes,
        };
        assert!(calculate_position_size(1000.0, &edge, 0.5, &cfg).is_none());
    }

    #[test]
    fn running_stats_matches_known_values() {
        let mut s = RunningStats::new();
        for x in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            s.push(x);
        }
        assert_eq!(s.n(), 8);
        assert!((s.mean() - 5.0).abs() < 1e-9);
        assert!((s.variance() - 4.571_428_571_428_571).abs() < 1e-9);
    }

    #[test]
    fn sharpe_is_none_below_two_samples() {
        let mut s = RunningStats::new();
        assert!(s.sharpe().is_none());
        s.push(1.0);
        assert!(s.sharpe().is_none());
    }

    #[test]
    fn ema_first_update_returns_input_unchanged() {
        let mut ema = Ema::new(5.0);
        assert_eq!(ema.update(10.0), 10.0);
        let second = ema.update(20.0);
        assert!(second > 10.0 && second < 20.0);
    }
}
