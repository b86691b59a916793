//! Core value types shared across the signal-to-execution pipeline.
//!
//! Status strings from the source system ("OPEN", "MATCHED", "BUY_YES", ...)
//! are modeled here as tagged sum types. Normalization of raw exchange
//! strings into these tags happens only at the boundary (see `parsing`).

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Hashes a tokenId into the compact form carried on `Book` so the router
/// can key a `Copy` struct instead of cloning strings on every book tick.
/// Used consistently wherever a tokenId needs to be matched against a
/// `Book::token_id_hash` (see `engine`).
pub fn hash_token_id(token_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    token_id.hash(&mut hasher);
    hasher.finish()
}

/// Direction of a contract purchase, always expressed in YES-token space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    BuyYes,
    BuyNo,
}

/// Status of an order as reported (after normalization) by the contract book client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Simulated,
    Matched,
    Cancelled,
}

/// Side of an order placed with the contract book client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Outcome of a fill-confirmation poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillStatus {
    Matched,
    Partial,
    Cancelled,
    Timeout,
}

/// Result of `_waitForFill`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FillResult {
    pub status: FillStatus,
    pub avg_price: Option<f64>,
    pub filled_qty: f64,
}

/// Lifecycle status of a Trade. Once Closed, a trade never leaves this state (I3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closing,
    Closed,
}

/// Reason a position was exited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    MaxHoldTime,
    ProfitTarget,
    StopLoss,
    EdgeCollapsed,
    CertaintyExpiry,
    ForceExit,
    ForceExitUnconfirmed,
    Shutdown,
    RotationCancel,
    /// `<reason>_PARTIAL_EXHAUSTED`: a partial exit drained the remaining
    /// position down to (near) zero and was finalized without a further fill.
    PartialExhausted(Box<ExitReason>),
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::MaxHoldTime => write!(f, "MAX_HOLD_TIME"),
            ExitReason::ProfitTarget => write!(f, "PROFIT_TARGET"),
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::EdgeCollapsed => write!(f, "EDGE_COLLAPSED"),
            ExitReason::CertaintyExpiry => write!(f, "CERTAINTY_EXPIRY"),
            ExitReason::ForceExit => write!(f, "FORCE_EXIT"),
            ExitReason::ForceExitUnconfirmed => write!(f, "FORCE_EXIT_UNCONFIRMED"),
            ExitReason::Shutdown => write!(f, "SHUTDOWN"),
            ExitReason::RotationCancel => write!(f, "ROTATION_CANCEL"),
            ExitReason::PartialExhausted(inner) => write!(f, "{}_PARTIAL_EXHAUSTED", inner),
        }
    }
}

/// Edge direction + magnitude, as returned by `calculate_edge`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub absolute: f64,
    pub direction: Direction,
}

/// A trading signal produced by a per-market Strategy. Created, consumed, and
/// discarded within a single evaluation; never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub token_id: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub size: f64,
    pub edge: f64,
    pub model_prob: f64,
    pub contract_price: f64,
    pub spot_price: f64,
    pub strike_price: f64,
    pub feed_lag_ms: i64,
    pub available_liquidity: f64,
    pub hours_to_expiry: f64,
    pub label: String,
    pub is_certainty: bool,
    pub expires_at: Option<i64>,
}

/// Executor-owned lifecycle + market-derived state for an open position.
/// Risk's own accounting (`OpenPosition` in `risk.rs`) is a separate, linked
/// structure keyed by the same id, per the split recommended for the source's
/// single mutable Trade object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub signal: Signal,
    pub direction: Direction,
    pub status: TradeStatus,
    pub entry_price: f64,
    pub token_qty: f64,
    pub size: f64,
    pub initial_size: f64,
    pub open_time: i64,
    pub current_mid: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub exit_price: Option<f64>,
    pub exit_time: Option<i64>,
    pub exit_reason: Option<ExitReason>,
    pub hold_time_ms: Option<i64>,
    pub estimated_exit: bool,
    /// Adverse-selection checkpoints recorded at ages 5s/15s/30s, at most once each.
    #[serde(default)]
    pub checkpoints_recorded: Vec<AdverseSelectionCheckpoint>,
}

/// A `{currentMid, midMove, pnlPct}` snapshot taken the first time a trade's
/// age crosses one of the 5s/15s/30s adverse-selection checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdverseSelectionCheckpoint {
    pub age_s: i64,
    pub current_mid: f64,
    pub mid_move: f64,
    pub pnl_pct: f64,
}

impl Trade {
    pub fn pnl_pct(&self) -> f64 {
        if self.size.abs() < f64::EPSILON {
            0.0
        } else {
            self.unrealized_pnl / self.size
        }
    }
}

/// An order book snapshot for one tokenId, already normalized to YES-equivalent space.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Book {
    pub token_id_hash: u64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub mid: f64,
    pub timestamp: i64,
}

impl Book {
    /// An invalid/empty book: the degenerate bid=0 & ask=1 case the monitor must skip.
    pub fn is_valid(&self) -> bool {
        !(self.best_bid <= 0.0 && self.best_ask >= 1.0) && self.mid > 0.0 && self.mid < 1.0
    }
}

/// A spot price tick, as emitted by a SpotFeed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpotUpdate {
    pub mid: f64,
    pub delta: f64,
    pub realized_vol: f64,
    pub timestamp: i64,
}

/// A rotation event from MarketDiscovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationEvent {
    pub token_id_yes: String,
    pub token_id_no: String,
    pub end_date: i64,
    pub label: String,
}

/// Order handle returned by `ContractBookClient::place_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub status: OrderStatus,
}

/// Request passed to `ContractBookClient::place_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
}

/// Raw order status as reported by `getOrder`, pre-normalization. Numeric
/// fields are `Option<f64>` because the boundary parser is total: a garbled
/// or missing field collapses to `None` rather than erroring (see `parsing`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOrderStatus {
    pub status: String,
    pub size: Option<f64>,
    pub remaining_size: Option<f64>,
    pub maker_amount: Option<f64>,
    pub avg_price: Option<f64>,
}
