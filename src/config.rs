//! Process configuration: environment-backed, with CLI-flag overrides via
//! `clap`'s `env` feature, mirroring this codebase's other `Config::from_env`
//! loaders. Validation runs once, before any feed is opened (§6).

use std::collections::HashMap;

use anyhow::{bail, Result};
use clap::Parser;

use crate::executor::ExecutorConfig;
use crate::numeric::SizingConfig;
use crate::risk::RiskConfig;
use crate::strategy::StrategyConfig;

/// Enumerated environment keys recognized by the process (§6's CLI surface).
#[derive(Parser, Debug, Clone)]
#[command(name = "latency-arb-core")]
#[command(about = "Signal-to-execution core for a spot / prediction-market latency-arbitrage engine")]
pub struct Config {
    /// Comma-separated list of assets to trade, e.g. "BTC,ETH".
    #[arg(long, env = "ASSETS", value_delimiter = ',', default_value = "BTC,ETH")]
    pub assets: Vec<String>,

    /// Comma-separated list of contract-window durations, e.g. "5m,15m".
    #[arg(long, env = "WINDOWS", value_delimiter = ',', default_value = "5m,15m")]
    pub windows: Vec<String>,

    #[arg(long, env = "BANKROLL", default_value_t = 1_000.0)]
    pub bankroll: f64,

    /// Latency-arb entry threshold for the shortest configured window; longer
    /// windows scale it down (see `strategy_config`).
    #[arg(long, env = "ENTRY_THRESHOLD", default_value_t = 0.05)]
    pub entry_threshold: f64,

    #[arg(long, env = "CERTAINTY_THRESHOLD", default_value_t = 0.15)]
    pub certainty_threshold: f64,

    #[arg(long, env = "CERTAINTY_MAX_FRACTION", default_value_t = 0.02)]
    pub certainty_max_fraction: f64,

    #[arg(long, env = "MAX_BET_FRACTION", default_value_t = 0.10)]
    pub max_bet_fraction: f64,

    #[arg(long, env = "MAX_POSITION_USD", default_value_t = 500.0)]
    pub max_position_usd: f64,

    #[arg(long, env = "MAX_OPEN_POSITIONS", default_value_t = 10)]
    pub max_open_positions: usize,

    #[arg(long, env = "COOLDOWN_MS", default_value_t = 1_000)]
    pub cooldown_ms: i64,

    #[arg(long, env = "SLIPPAGE_BPS", default_value_t = 50.0)]
    pub slippage_bps: f64,

    #[arg(long, env = "FEE_BPS", default_value_t = 20.0)]
    pub fee_bps: f64,

    #[arg(long, env = "MIN_MARGIN_EDGE", default_value_t = 0.01)]
    pub min_margin_edge: f64,

    #[arg(long, env = "PROFIT_TARGET_PCT", default_value_t = 0.5)]
    pub profit_target_pct: f64,

    #[arg(long, env = "STOP_LOSS_PCT", default_value_t = 0.3)]
    pub stop_loss_pct: f64,

    #[arg(long, env = "DAILY_LOSS_LIMIT", default_value_t = 200.0)]
    pub daily_loss_limit: f64,

    #[arg(long, env = "MAX_DRAWDOWN_PCT", default_value_t = 0.25)]
    pub max_drawdown_pct: f64,

    #[arg(long, env = "DRY_RUN", default_value_t = true)]
    pub dry_run: bool,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "STATE_PATH", default_value = "./data/state.json")]
    pub state_path: String,

    #[arg(long, env = "AUDIT_LOG_PATH", default_value = "./data/trades.ndjson")]
    pub audit_log_path: String,

    /// Per-asset daily-vol seed, "BTC=0.012,ETH=0.015" — used only as the
    /// pre-first-tick fallback before `Strategy` has a realized-vol sample.
    #[arg(long, env = "DAILY_VOL_SEEDS", default_value = "")]
    pub daily_vol_seeds: String,

    /// Live exchange credentials. Required only when `dry_run` is false.
    #[arg(long, env = "LIVE_API_KEY")]
    pub live_api_key: Option<String>,
}

impl Config {
    /// Loads `.env` (silently absent in prod, where env is injected
    /// directly) then parses from the process environment / argv.
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();
        Config::parse()
    }

    /// Live-mode config-validation checks from §6. Non-zero exit in `main`
    /// maps directly onto an `Err` here.
    pub fn validate(&self) -> Result<()> {
        if !self.dry_run && self.live_api_key.is_none() {
            bail!("live mode requires LIVE_API_KEY (dry_run is disabled)");
        }
        if self.max_bet_fraction > 0.10 {
            bail!("max_bet_fraction {} exceeds the 10% ceiling", self.max_bet_fraction);
        }
        let cost_floor = self.slippage_bps / 1e4 + self.fee_bps / 1e4;
        if self.entry_threshold <= cost_floor {
            bail!(
                "entry_threshold {} must exceed the slippage+fee floor {}",
                self.entry_threshold,
                cost_floor
            );
        }
        if !(0.0..1.0).contains(&self.profit_target_pct) {
            bail!("profit_target_pct {} must be in (0,1)", self.profit_target_pct);
        }
        if !(0.0..1.0).contains(&self.stop_loss_pct) {
            bail!("stop_loss_pct {} must be in (0,1)", self.stop_loss_pct);
        }
        Ok(())
    }

    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            cooldown_ms: self.cooldown_ms,
            daily_loss_limit: self.daily_loss_limit,
            max_drawdown_pct: self.max_drawdown_pct,
            max_open_positions: self.max_open_positions,
            slippage_bps: self.slippage_bps,
            fee_bps: self.fee_bps,
            min_margin_edge: self.min_margin_edge,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            dry_run: self.dry_run,
            profit_target_pct: self.profit_target_pct,
            stop_loss_pct: self.stop_loss_pct,
            ..ExecutorConfig::default()
        }
    }

    fn sizing_config(&self, max_bet_fraction: f64) -> SizingConfig {
        SizingConfig {
            kelly_multiplier: 0.25,
            max_bet_fraction,
            max_position_usd: self.max_position_usd,
            slippage_bps: self.slippage_bps,
            fee_bps: self.fee_bps,
        }
    }

    /// Per-market Strategy config for one configured window string (e.g.
    /// "5m") on the given asset. The latency-arb threshold scales down for
    /// longer windows, per §4.4's "5% for 5 min windows, 3% for 15 min
    /// windows" example; `vol_seed` comes from `DAILY_VOL_SEEDS` for `asset`
    /// (falling back to a 30%/day default) and only matters before the first
    /// real spot tick.
    pub fn strategy_config(&self, asset: &str, window: &str) -> StrategyConfig {
        let window_duration_ms = parse_window_ms(window).unwrap_or(5 * 60 * 1000);
        let latency_arb_threshold = window_threshold(window_duration_ms, self.entry_threshold);
        let vol_seed = self.daily_vol_seeds().get(asset).copied().unwrap_or(0.3);
        StrategyConfig {
            window_duration_ms,
            latency_arb_threshold,
            certainty_threshold: self.certainty_threshold,
            certainty_max_fraction: self.certainty_max_fraction,
            certainty_expiry_buffer_ms: 5_000,
            vol_ema_half_life: 20.0,
            spot_ema_half_life: 20.0,
            edge_ema_half_life: 10.0,
            sizing: self.sizing_config(self.max_bet_fraction),
            vol_seed,
        }
    }

    /// Parses `daily_vol_seeds` into an asset -> daily-vol map.
    pub fn daily_vol_seeds(&self) -> HashMap<String, f64> {
        self.daily_vol_seeds
            .split(',')
            .filter_map(|entry| {
                let (asset, vol) = entry.split_once('=')?;
                let vol: f64 = vol.trim().parse().ok()?;
                Some((asset.trim().to_string(), vol))
            })
            .collect()
    }
}

/// Parses a duration literal like "5m", "90s", "1h" into milliseconds.
/// A bare number is treated as seconds. Unparseable input returns `None`
/// (callers fall back to a 5-minute default).
pub fn parse_window_ms(window: &str) -> Option<i64> {
    let window = window.trim();
    if window.is_empty() {
        return None;
    }
    let (digits, unit_ms) = if let Some(prefix) = window.strip_suffix('h') {
        (prefix, 3_600_000i64)
    } else if let Some(prefix) = window.strip_suffix('m') {
        (prefix, 60_000i64)
    } else if let Some(prefix) = window.strip_suffix('s') {
        (prefix, 1_000i64)
    } else {
        (window, 1_000i64)
    };
    let value: f64 = digits.trim().parse().ok()?;
    Some((value * unit_ms as f64).round() as i64)
}

/// Linear-interpolated threshold between the 5-minute anchor (the
/// configured `entry_threshold`, default 5%) and a 3% floor at 15 minutes
/// and beyond, matching the spec's example anchors.
fn window_threshold(window_duration_ms: i64, five_minute_threshold: f64) -> f64 {
    const FIVE_MIN_MS: f64 = 5.0 * 60_000.0;
    const FIFTEEN_MIN_MS: f64 = 15.0 * 60_000.0;
    const FLOOR: f64 = 0.03;

    let window_ms = window_duration_ms as f64;
    if window_ms <= FIVE_MIN_MS {
        five_minute_threshold
    } else if window_ms >= FIFTEEN_MIN_MS {
        FLOOR.min(five_minute_threshold)
    } else {
        let t = (window_ms - FIVE_MIN_MS) / (FIFTEEN_MIN_MS - FIVE_MIN_MS);
        five_minute_threshold + t * (FLOOR.min(five_minute_threshold) - five_minute_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_window_ms_supports_suffixes() {
        assert_eq!(parse_window_ms("5m"), Some(300_000));
        assert_eq!(parse_window_ms("15m"), Some(900_000));
        assert_eq!(parse_window_ms("90s"), Some(90_000));
        assert_eq!(parse_window_ms("1h"), Some(3_600_000));
        assert_eq!(parse_window_ms("bogus"), None);
    }

    #[test]
    fn window_threshold_anchors_match_spec_examples() {
        assert_eq!(window_threshold(300_000, 0.05), 0.05);
        assert_eq!(window_threshold(900_000, 0.05), 0.03);
    }

    #[test]
    fn daily_vol_seeds_parses_key_value_pairs() {
        let cfg = Config {
            daily_vol_seeds: "BTC=0.012, ETH=0.015".to_string(),
            ..Config::parse_from(["latency-arb-core"])
        };
        let seeds = cfg.daily_vol_seeds();
        assert_eq!(seeds.get("BTC"), Some(&0.012));
        assert_eq!(seeds.get("ETH"), Some(&0.015));
    }

    #[test]
    fn validate_rejects_oversized_max_bet_fraction() {
        let cfg = Config {
            max_bet_fraction: 0.25,
            ..Config::parse_from(["latency-arb-core"])
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_entry_threshold_below_cost_floor() {
        let cfg = Config {
            entry_threshold: 0.001,
            slippage_bps: 50.0,
            fee_bps: 20.0,
            ..Config::parse_from(["latency-arb-core"])
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_requires_live_credentials_outside_dry_run() {
        let cfg = Config {
            dry_run: false,
            live_api_key: None,
            ..Config::parse_from(["latency-arb-core"])
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_config_validates() {
        let cfg = Config::parse_from(["latency-arb-core"]);
        assert!(cfg.validate().is_ok());
    }
}
