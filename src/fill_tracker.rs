//! Fill Tracker: historical fill-rate buckets keyed by (spread, depth),
//! exposed for observability and optional pre-trade gating.

use parking_lot::Mutex;
use serde::Serialize;

use crate::types::{FillStatus, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SpreadBucket {
    Narrow,
    Medium,
    Wide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DepthBucket {
    Thin,
    Ok,
    Deep,
}

fn spread_bucket(spread: f64) -> SpreadBucket {
    if spread < 0.02 {
        SpreadBucket::Narrow
    } else if spread <= 0.05 {
        SpreadBucket::Medium
    } else {
        SpreadBucket::Wide
    }
}

fn depth_bucket(depth: f64) -> DepthBucket {
    if depth < 20.0 {
        DepthBucket::Thin
    } else if depth <= 100.0 {
        DepthBucket::Ok
    } else {
        DepthBucket::Deep
    }
}

const SPREAD_BUCKETS: usize = 3;
const DEPTH_BUCKETS: usize = 3;

fn index(spread: SpreadBucket, depth: DepthBucket) -> usize {
    let s = spread as usize;
    let d = depth as usize;
    s * DEPTH_BUCKETS + d
}

#[derive(Debug, Clone, Copy, Default)]
struct Cell {
    total: u64,
    filled: u64,
}

pub struct FillTracker {
    cells: Mutex<[Cell; SPREAD_BUCKETS * DEPTH_BUCKETS]>,
}

impl Default for FillTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FillTracker {
    pub fn new() -> Self {
        Self {
            cells: Mutex::new([Cell::default(); SPREAD_BUCKETS * DEPTH_BUCKETS]),
        }
    }

    fn bucket_for(signal: &Signal) -> (SpreadBucket, DepthBucket) {
        // entryPrice sits a half-spread away from contractPrice (the mid) on
        // the side this signal trades; double that distance to approximate
        // the full bid-ask spread, in the same probability-cent units as the
        // narrow/medium/wide thresholds.
        let spread = 2.0 * (signal.entry_price - signal.contract_price).abs();
        // availableLiquidity is the relevant depth for the side this signal trades.
        (spread_bucket(spread), depth_bucket(signal.available_liquidity))
    }

    pub fn record(&self, signal: &Signal, status: FillStatus) {
        let (spread, depth) = Self::bucket_for(signal);
        let mut cells = self.cells.lock();
        let cell = &mut cells[index(spread, depth)];
        cell.total += 1;
        if matches!(status, FillStatus::Matched | FillStatus::Partial) {
            cell.filled += 1;
        }
    }

    /// 1.0 when there's insufficient history (total < 10); otherwise the
    /// observed fill rate for this signal's (spread, depth) bucket.
    pub fn fill_probability(&self, signal: &Signal) -> f64 {
        let (spread, depth) = Self::bucket_for(signal);
        let cells = self.cells.lock();
        let cell = cells[index(spread, depth)];
        if cell.total < 10 {
            1.0
        } else {
            cell.filled as f64 / cell.total as f64
        }
    }

    pub fn summary(&self) -> FillTrackerSummary {
        let cells = self.cells.lock();
        FillTrackerSummary {
            total: cells.iter().map(|c| c.total).sum(),
            filled: cells.iter().map(|c| c.filled).sum(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FillTrackerSummary {
    pub total: u64,
    pub filled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn signal(spread: f64, liquidity: f64) -> Signal {
        Signal {
            token_id: "tok".into(),
            direction: Direction::BuyYes,
            // entryPrice sits half the spread above contractPrice (the mid).
            entry_price: 0.50 + spread / 2.0,
            size: 10.0,
            edge: 0.1,
            model_prob: 0.6,
            contract_price: 0.5,
            spot_price: 100.0,
            strike_price: 100.0,
            feed_lag_ms: 1200,
            available_liquidity: liquidity,
            hours_to_expiry: 1.0,
            label: "BTC/5m".into(),
            is_certainty: false,
            expires_at: None,
        }
    }

    #[test]
    fn insufficient_history_returns_full_confidence() {
        let tracker = FillTracker::new();
        let sig = signal(0.01, 50.0);
        assert_eq!(tracker.fill_probability(&sig), 1.0);
    }

    #[test]
    fn fill_probability_reflects_observed_rate_once_seasoned() {
        let tracker = FillTracker::new();
        let sig = signal(0.01, 50.0);
        for _ in 0..8 {
            tracker.record(&sig, FillStatus::Matched);
        }
        for _ in 0..2 {
            tracker.record(&sig, FillStatus::Timeout);
        }
        assert_eq!(tracker.fill_probability(&sig), 0.8);
    }

    #[test]
    fn buckets_are_independent() {
        let tracker = FillTracker::new();
        let narrow_thin = signal(0.01, 10.0);
        let wide_deep = signal(0.10, 200.0);
        for _ in 0..10 {
            tracker.record(&narrow_thin, FillStatus::Timeout);
        }
        // wide/deep bucket has no history yet -> full confidence.
        assert_eq!(tracker.fill_probability(&wide_deep), 1.0);
        assert_eq!(tracker.fill_probability(&narrow_thin), 0.0);
    }
}
