//! Order lifecycle state machine: entry with fill-confirmation polling,
//! partial-fill handling, a position monitor with two racing timers
//! (periodic exit checks and a safety timeout), and a single idempotent
//! close commit shared by both exit paths.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::clock::now_ms;
use crate::fill_tracker::FillTracker;
use crate::interfaces::{ContractBookClient, StateStore};
use crate::numeric::RunningStats;
use crate::parsing::{normalize_status, resolve_filled_qty, NormalizedStatus};
use crate::risk::RiskManager;
use crate::state::OpenSnapshot;
use crate::types::{
    AdverseSelectionCheckpoint, Direction, ExitReason, FillResult, FillStatus, OrderRequest,
    OrderSide, OrderStatus, Signal, Trade, TradeStatus,
};

pub const FILL_TIMEOUT_MS: u64 = 5_000;
pub const FILL_POLL_MS: u64 = 250;
pub const MONITOR_INTERVAL_MS: u64 = 2_000;
pub const MAX_HOLD_MS: i64 = 300_000;
pub const SAFETY_BUFFER_MS: i64 = 5_000;
/// "Edge collapsed" threshold against modelProb (or 1-modelProb for BUY_NO).
/// A design choice, not a derived quantity (see Design Notes).
const EDGE_COLLAPSE_THRESHOLD: f64 = 0.02;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub dry_run: bool,
    pub profit_target_pct: f64,
    pub stop_loss_pct: f64,
    pub trade_history_capacity: usize,
    pub execution_latency_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            profit_target_pct: 0.5,
            stop_loss_pct: 0.3,
            trade_history_capacity: 500,
            execution_latency_capacity: 100,
        }
    }
}

#[derive(Debug, Default)]
pub struct FillRateStats {
    pub attempted: AtomicU64,
    pub filled: AtomicU64,
    pub partial: AtomicU64,
    pub cancelled: AtomicU64,
    pub failed: AtomicU64,
}

impl FillRateStats {
    fn snapshot(&self) -> FillRateSnapshot {
        FillRateSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            filled: self.filled.load(Ordering::Relaxed),
            partial: self.partial.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FillRateSnapshot {
    pub attempted: u64,
    pub filled: u64,
    pub partial: u64,
    pub cancelled: u64,
    pub failed: u64,
}

/// A trade-lifecycle event, for audit logging / dashboards.
#[derive(Debug, Clone)]
pub enum TradeEvent {
    Open(Trade),
    PartialClose(Trade),
    Close(Trade),
    RotationCancel(Trade),
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub open_orders: usize,
    pub fill_rate: FillRateSnapshot,
    pub avg_execution_latency_ms: Option<f64>,
    pub pnl_mean: f64,
    pub pnl_n: u64,
    pub last_20_win_rate: Option<f64>,
}

/// Orchestrates the order lifecycle. `open_orders` and `trade_history` are
/// executor-owned; Risk's own accounting is a separate, linked structure
/// keyed by the same trade id.
pub struct Executor {
    cfg: ExecutorConfig,
    client: Arc<dyn ContractBookClient>,
    risk: Arc<SyncMutex<RiskManager>>,
    fill_tracker: Arc<FillTracker>,
    state_store: Arc<dyn StateStore>,
    open_orders: SyncMutex<HashMap<String, Trade>>,
    trade_history: SyncMutex<VecDeque<Trade>>,
    fill_rate: FillRateStats,
    pnl_stats: SyncMutex<RunningStats>,
    execution_latencies: SyncMutex<VecDeque<u64>>,
    events_tx: broadcast::Sender<TradeEvent>,
}

impl Executor {
    pub fn new(
        cfg: ExecutorConfig,
        client: Arc<dyn ContractBookClient>,
        risk: Arc<SyncMutex<RiskManager>>,
        fill_tracker: Arc<FillTracker>,
        state_store: Arc<dyn StateStore>,
    ) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            cfg,
            client,
            risk,
            fill_tracker,
            state_store,
            open_orders: SyncMutex::new(HashMap::new()),
            trade_history: SyncMutex::new(VecDeque::new()),
            fill_rate: FillRateStats::default(),
            pnl_stats: SyncMutex::new(RunningStats::default()),
            execution_latencies: SyncMutex::new(VecDeque::new()),
            events_tx,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TradeEvent> {
        self.events_tx.subscribe()
    }

    pub async fn open_order_count(&self) -> usize {
        self.open_orders.lock().len()
    }

    /// Per-market stacking prevention lives at the router (Engine), not
    /// here, because Risk and the Executor are both market-agnostic; this
    /// is the read the router's gate calls before it even reaches Risk.
    pub fn has_open_trade_for_label(&self, label: &str) -> bool {
        self.open_orders.lock().values().any(|t| t.signal.label == label)
    }

    fn record_latency(&self, ms: u64) {
        let mut latencies = self.execution_latencies.lock();
        latencies.push_back(ms);
        while latencies.len() > self.cfg.execution_latency_capacity {
            latencies.pop_front();
        }
    }

    fn push_history(&self, trade: Trade) {
        let mut history = self.trade_history.lock();
        history.push_back(trade);
        while history.len() > self.cfg.trade_history_capacity {
            history.pop_front();
        }
    }

    /// Poll `get_order` every FILL_POLL_MS until a terminal status, a
    /// detected partial fill on cancellation, or `timeout_ms` elapses.
    /// Dry-run short-circuits to MATCHED at the requested quantity.
    async fn wait_for_fill(&self, order_id: &str, requested_qty: f64, timeout_ms: u64) -> FillResult {
        if self.cfg.dry_run {
            return FillResult {
                status: FillStatus::Matched,
                avg_price: None,
                filled_qty: requested_qty,
            };
        }

        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_millis(timeout_ms);
        loop {
            match self.client.get_order(order_id).await {
                Ok(raw) => match normalize_status(&raw.status) {
                    NormalizedStatus::Matched => {
                        let filled_qty =
                            resolve_filled_qty(raw.size, raw.remaining_size, raw.maker_amount, requested_qty);
                        let filled_qty = if filled_qty > 0.0 { filled_qty } else { requested_qty };
                        return FillResult {
                            status: FillStatus::Matched,
                            avg_price: raw.avg_price,
                            filled_qty: filled_qty.clamp(0.0, requested_qty),
                        };
                    }
                    NormalizedStatus::Cancelled => {
                        let filled_qty =
                            resolve_filled_qty(raw.size, raw.remaining_size, raw.maker_amount, requested_qty);
                        return if filled_qty > 0.0 {
                            FillResult {
                                status: FillStatus::Partial,
                                avg_price: raw.avg_price,
                                filled_qty,
                            }
                        } else {
                            FillResult {
                                status: FillStatus::Cancelled,
                                avg_price: None,
                                filled_qty: 0.0,
                            }
                        };
                    }
                    NormalizedStatus::OpenOrUnknown => {}
                },
                Err(e) => {
                    // Transient network errors inside the poll are swallowed;
                    // the deadline remains authoritative.
                    warn!(order_id, error = %e, "get_order failed during fill poll");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(FILL_POLL_MS)).await;
        }

        match self.client.get_order(order_id).await {
            Ok(raw) => {
                let filled_qty = resolve_filled_qty(raw.size, raw.remaining_size, raw.maker_amount, requested_qty);
                if filled_qty > 0.0 {
                    FillResult {
                        status: FillStatus::Partial,
                        avg_price: raw.avg_price,
                        filled_qty,
                    }
                } else {
                    FillResult {
                        status: FillStatus::Timeout,
                        avg_price: None,
                        filled_qty: 0.0,
                    }
                }
            }
            Err(_) => FillResult {
                status: FillStatus::Timeout,
                avg_price: None,
                filled_qty: 0.0,
            },
        }
    }

    /// Entry. Places a GTC buy, waits for fill confirmation, and on any
    /// non-zero fill opens a Trade, stamps Risk, and starts the monitor.
    pub async fn execute(self: &Arc<Self>, signal: Signal) -> Option<Trade> {
        let requested_qty = signal.size / signal.entry_price;
        self.fill_rate.attempted.fetch_add(1, Ordering::Relaxed);

        let placed_at = now_ms();
        let order = match self
            .client
            .place_order(OrderRequest {
                token_id: signal.token_id.clone(),
                side: OrderSide::Buy,
                price: signal.entry_price,
                size: requested_qty,
            })
            .await
        {
            Ok(order) => order,
            Err(e) => {
                error!(token_id = %signal.token_id, label = %signal.label, error = %e, "entry placement failed");
                self.fill_rate.failed.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        self.record_latency((now_ms() - placed_at).max(0) as u64);

        let fill = if self.cfg.dry_run || order.status == OrderStatus::Simulated {
            FillResult {
                status: FillStatus::Matched,
                avg_price: None,
                filled_qty: requested_qty,
            }
        } else {
            self.wait_for_fill(&order.id, requested_qty, FILL_TIMEOUT_MS).await
        };
        self.fill_tracker.record(&signal, fill.status);

        let (actual_entry_price, actual_token_qty) = match fill.status {
            FillStatus::Matched => {
                self.fill_rate.filled.fetch_add(1, Ordering::Relaxed);
                (fill.avg_price.unwrap_or(signal.entry_price), fill.filled_qty)
            }
            FillStatus::Partial if fill.filled_qty > 0.0 => {
                let _ = self.client.cancel_order(&order.id).await;
                self.fill_rate.partial.fetch_add(1, Ordering::Relaxed);
                (fill.avg_price.unwrap_or(signal.entry_price), fill.filled_qty)
            }
            _ => {
                let _ = self.client.cancel_order(&order.id).await;
                self.fill_rate.cancelled.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let size = actual_token_qty * actual_entry_price;
        let trade_id = order.id.clone();
        let now = now_ms();
        let trade = Trade {
            id: trade_id.clone(),
            signal: signal.clone(),
            direction: signal.direction,
            status: TradeStatus::Open,
            entry_price: actual_entry_price,
            token_qty: actual_token_qty,
            size,
            initial_size: size,
            open_time: now,
            current_mid: actual_entry_price,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            hold_time_ms: None,
            estimated_exit: false,
            checkpoints_recorded: Vec::new(),
        };

        self.risk.lock().open_position(trade_id.clone(), signal.direction, size, actual_entry_price);
        self.open_orders.lock().insert(trade_id.clone(), trade.clone());
        let _ = self.events_tx.send(TradeEvent::Open(trade.clone()));
        self.persist_audit_open(&trade).await;

        let this = Arc::clone(self);
        tokio::spawn(async move { this.monitor_position(trade_id).await });

        Some(trade)
    }

    async fn persist_audit_open(&self, trade: &Trade) {
        let record = crate::state::AuditRecord {
            event: crate::state::AuditEvent::Open,
            id: trade.id.clone(),
            label: trade.signal.label.clone(),
            direction: trade.direction,
            entry_price: trade.entry_price,
            exit_price: None,
            token_qty: trade.token_qty,
            size: trade.size,
            pnl: None,
            pnl_pct: None,
            reason: None,
            open_time: trade.open_time,
            exit_time: None,
            estimated_exit: None,
            at: crate::state::audit_timestamp(),
        };
        if let Ok(line) = serde_json::to_string(&record) {
            let _ = self.state_store.append_audit(&line).await;
        }
    }

    async fn persist_audit_exit(&self, trade: &Trade, event: crate::state::AuditEvent, pnl: f64) {
        let record = crate::state::AuditRecord {
            event,
            id: trade.id.clone(),
            label: trade.signal.label.clone(),
            direction: trade.direction,
            entry_price: trade.entry_price,
            exit_price: trade.exit_price,
            token_qty: trade.token_qty,
            size: trade.size,
            pnl: Some(pnl),
            pnl_pct: Some(trade.pnl_pct()),
            reason: trade.exit_reason.clone().map(|r| r.to_string()),
            open_time: trade.open_time,
            exit_time: trade.exit_time,
            estimated_exit: Some(trade.estimated_exit),
            at: crate::state::audit_timestamp(),
        };
        if let Ok(line) = serde_json::to_string(&record) {
            let _ = self.state_store.append_audit(&line).await;
        }
    }

    /// Two concurrent timers, armed when the trade opens: a periodic exit
    /// check, and a safety timeout that force-exits (or estimates a close)
    /// if the position outlives MAX_HOLD_MS + SAFETY_BUFFER_MS.
    async fn monitor_position(self: Arc<Self>, trade_id: String) {
        let monitor_self = Arc::clone(&self);
        let monitor_id = trade_id.clone();
        let periodic = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(MONITOR_INTERVAL_MS));
            interval.tick().await;
            loop {
                interval.tick().await;
                let snapshot = monitor_self.open_orders.lock().get(&monitor_id).cloned();
                let trade = match snapshot {
                    Some(t) => t,
                    None => return,
                };
                if trade.status == TradeStatus::Closing {
                    continue;
                }

                let book = match monitor_self.client.fetch_orderbook(&trade.signal.token_id).await {
                    Some(b) if b.is_valid() => b,
                    _ => continue,
                };

                let (exit, mark) = monitor_self.evaluate_exit(&trade, book.mid).await;
                if let Some(reason) = exit {
                    let closed = monitor_self.exit_position(&monitor_id, reason, mark).await;
                    if closed {
                        return;
                    }
                }
            }
        });

        let safety_delay = (MAX_HOLD_MS + SAFETY_BUFFER_MS).max(0) as u64;
        tokio::time::sleep(tokio::time::Duration::from_millis(safety_delay)).await;
        periodic.abort();

        let snapshot = self.open_orders.lock().get(&trade_id).cloned();
        let trade = match snapshot {
            Some(t) if t.status != TradeStatus::Closed => t,
            _ => return,
        };

        let mark = self
            .client
            .fetch_orderbook(&trade.signal.token_id)
            .await
            .map(|b| b.mid)
            .unwrap_or(trade.current_mid);

        let closed = self.exit_position(&trade_id, ExitReason::ForceExit, mark).await;
        if closed {
            return;
        }

        // The first exit attempt did not commit. Per R2, the safety path
        // must unilaterally close risk state at mark so no trade outlives
        // this deadline.
        let still_open = self.open_orders.lock().get(&trade_id).cloned();
        if let Some(trade) = still_open {
            if trade.status != TradeStatus::Closed {
                let pnl = (mark - trade.entry_price) * trade.token_qty;
                error!(
                    trade_id = %trade_id,
                    label = %trade.signal.label,
                    "exchange position may still be open - verify manually"
                );
                self.finalize_close(&trade_id, ExitReason::ForceExitUnconfirmed, mark, pnl, true)
                    .await;
            }
        }
    }

    /// Recomputes mark-to-market, records adverse-selection checkpoints, and
    /// returns the first matching exit reason, if any.
    async fn evaluate_exit(&self, trade: &Trade, mid: f64) -> (Option<ExitReason>, f64) {
        let unrealized_pnl = (mid - trade.entry_price) * trade.token_qty;
        let pnl_pct = if trade.size.abs() > f64::EPSILON {
            unrealized_pnl / trade.size
        } else {
            0.0
        };
        let age_ms = now_ms() - trade.open_time;

        {
            let mut orders = self.open_orders.lock();
            if let Some(t) = orders.get_mut(&trade.id) {
                t.current_mid = mid;
                t.unrealized_pnl = unrealized_pnl;
                for age_s in [5i64, 15, 30] {
                    if age_ms >= age_s * 1000 && !t.checkpoints_recorded.iter().any(|c| c.age_s == age_s) {
                        t.checkpoints_recorded.push(AdverseSelectionCheckpoint {
                            age_s,
                            current_mid: mid,
                            mid_move: mid - trade.entry_price,
                            pnl_pct,
                        });
                    }
                }
            }
        }

        if age_ms >= MAX_HOLD_MS {
            return (Some(ExitReason::MaxHoldTime), mid);
        }
        if pnl_pct >= self.cfg.profit_target_pct {
            return (Some(ExitReason::ProfitTarget), mid);
        }
        if pnl_pct <= -self.cfg.stop_loss_pct {
            return (Some(ExitReason::StopLoss), mid);
        }

        let model_side_price = match trade.direction {
            Direction::BuyYes => trade.signal.model_prob,
            Direction::BuyNo => 1.0 - trade.signal.model_prob,
        };
        if (mid - model_side_price).abs() < EDGE_COLLAPSE_THRESHOLD {
            return (Some(ExitReason::EdgeCollapsed), mid);
        }

        if trade.signal.is_certainty {
            if let Some(expires_at) = trade.signal.expires_at {
                if now_ms() >= expires_at {
                    return (Some(ExitReason::CertaintyExpiry), mid);
                }
            }
        }

        (None, mid)
    }

    /// Idempotent: returns false without mutation if the trade is already
    /// CLOSING/CLOSED or no longer tracked.
    async fn exit_position(&self, trade_id: &str, reason: ExitReason, mark_price: f64) -> bool {
        {
            let mut orders = self.open_orders.lock();
            match orders.get_mut(trade_id) {
                Some(t) if t.status == TradeStatus::Open => {
                    t.status = TradeStatus::Closing;
                }
                _ => return false,
            }
        }

        let trade = match self.open_orders.lock().get(trade_id).cloned() {
            Some(t) => t,
            None => return false,
        };

        if self.cfg.dry_run {
            let pnl = (mark_price - trade.entry_price) * trade.token_qty;
            return self.finalize_close(trade_id, reason, mark_price, pnl, false).await;
        }

        let order = match self
            .client
            .place_order(OrderRequest {
                token_id: trade.signal.token_id.clone(),
                side: OrderSide::Sell,
                price: mark_price,
                size: trade.token_qty,
            })
            .await
        {
            Ok(o) => o,
            Err(e) => {
                error!(trade_id, error = %e, "exit placement failed, will retry");
                self.revert_to_open(trade_id).await;
                return false;
            }
        };

        let fill = self.wait_for_fill(&order.id, trade.token_qty, FILL_TIMEOUT_MS).await;

        match fill.status {
            FillStatus::Partial if fill.filled_qty > 0.0 => {
                let filled_qty = fill.filled_qty.min(trade.token_qty);
                let exit_px = fill.avg_price.unwrap_or(mark_price);
                let realized_pnl = (exit_px - trade.entry_price) * filled_qty;
                let realized_notional = filled_qty * trade.entry_price;

                let remaining = {
                    let mut orders = self.open_orders.lock();
                    match orders.get_mut(trade_id) {
                        Some(t) => {
                            t.realized_pnl += realized_pnl;
                            t.token_qty = (t.token_qty - filled_qty).max(0.0);
                            t.size = (t.size - realized_notional).max(0.0);
                            t.exit_price = Some(exit_px);
                            (t.token_qty, t.size)
                        }
                        None => {
                            warn!(trade_id, "trade vanished mid-exit (rotation/shutdown); abandoning partial-close commit");
                            return false;
                        }
                    }
                };

                self.risk.lock().apply_partial_close(trade_id, realized_notional, realized_pnl);
                let partial_trade = match self.open_orders.lock().get(trade_id).cloned() {
                    Some(t) => t,
                    None => {
                        warn!(trade_id, "trade vanished mid-exit before partial-close event could be emitted");
                        return false;
                    }
                };
                let _ = self.events_tx.send(TradeEvent::PartialClose(partial_trade.clone()));
                self.persist_audit_exit(&partial_trade, crate::state::AuditEvent::PartialClose, realized_pnl)
                    .await;

                if remaining.0 <= 1e-8 || remaining.1 <= 1e-8 {
                    self.finalize_close(trade_id, ExitReason::PartialExhausted(Box::new(reason)), exit_px, 0.0, false)
                        .await
                } else {
                    let _ = self.client.cancel_order(&order.id).await;
                    self.revert_to_open(trade_id).await;
                    false
                }
            }
            FillStatus::Matched => {
                let _ = self.client.cancel_order(&order.id).await;
                let actual_exit_price = fill.avg_price.unwrap_or(mark_price);
                let pnl = (actual_exit_price - trade.entry_price) * trade.token_qty;
                self.finalize_close(trade_id, reason, actual_exit_price, pnl, false).await
            }
            _ => {
                let _ = self.client.cancel_order(&order.id).await;
                self.revert_to_open(trade_id).await;
                false
            }
        }
    }

    async fn revert_to_open(&self, trade_id: &str) {
        let mut orders = self.open_orders.lock();
        if let Some(t) = orders.get_mut(trade_id) {
            if t.status == TradeStatus::Closing {
                t.status = TradeStatus::Open;
            }
        }
    }

    /// Single idempotent commit point. Returns false (no-op) if the trade
    /// has already been removed, which is how a second racing call is made
    /// safe (I4/Q5).
    async fn finalize_close(
        &self,
        trade_id: &str,
        reason: ExitReason,
        exit_price: f64,
        pnl: f64,
        estimated: bool,
    ) -> bool {
        let trade = {
            let mut orders = self.open_orders.lock();
            match orders.remove(trade_id) {
                Some(mut t) => {
                    let total_pnl = t.realized_pnl + pnl;
                    let now = now_ms();
                    t.status = TradeStatus::Closed;
                    t.realized_pnl = total_pnl;
                    t.exit_price = Some(exit_price);
                    t.exit_time = Some(now);
                    t.exit_reason = Some(reason);
                    t.hold_time_ms = Some(now - t.open_time);
                    t.estimated_exit = estimated;
                    t
                }
                None => return false,
            }
        };

        self.risk.lock().close_position(trade_id, pnl);
        self.pnl_stats.lock().push(trade.realized_pnl);
        self.persist_audit_exit(&trade, crate::state::AuditEvent::Close, pnl).await;
        info!(trade_id, reason = %trade.exit_reason.as_ref().unwrap(), "position closed");
        self.push_history(trade.clone());
        let _ = self.events_tx.send(TradeEvent::Close(trade));
        true
    }

    /// Cancel everything exchange-side, then finalize any still-open trade
    /// at current mark (SHUTDOWN), estimated=true.
    pub async fn cancel_all_orders(&self) {
        let _ = self.client.cancel_all().await;
        let ids: Vec<String> = self.open_orders.lock().keys().cloned().collect();
        for id in ids {
            self.shutdown_close(&id, ExitReason::Shutdown).await;
        }
    }

    /// Same pattern restricted to trades whose signal label matches, used on
    /// market rotation; other markets are untouched.
    pub async fn cancel_orders_for_label(&self, label: &str) {
        let ids: Vec<String> = {
            let orders = self.open_orders.lock();
            orders
                .iter()
                .filter(|(_, t)| t.signal.label == label)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in ids {
            self.shutdown_close(&id, ExitReason::RotationCancel).await;
        }
    }

    async fn shutdown_close(&self, trade_id: &str, reason: ExitReason) {
        let trade = match self.open_orders.lock().get(trade_id).cloned() {
            Some(t) => t,
            None => return,
        };
        let mark = self
            .client
            .fetch_orderbook(&trade.signal.token_id)
            .await
            .map(|b| b.mid)
            .unwrap_or(trade.entry_price);
        let pnl = (mark - trade.entry_price) * trade.token_qty;
        let is_rotation = reason == ExitReason::RotationCancel;
        let closed = self.finalize_close(trade_id, reason, mark, pnl, true).await;
        if closed && is_rotation {
            if let Some(history_trade) = self.trade_history.lock().back() {
                let _ = self.events_tx.send(TradeEvent::RotationCancel(history_trade.clone()));
            }
        }
    }

    pub async fn get_open_snapshot(&self) -> Vec<OpenSnapshot> {
        self.open_orders
            .lock()
            .values()
            .map(|t| OpenSnapshot {
                id: t.id.clone(),
                entry_price: t.entry_price,
                token_qty: Some(t.token_qty),
                size: t.size,
                open_time: t.open_time,
                trade: t.clone(),
                order_id: t.id.clone(),
                order_status: "OPEN".to_string(),
            })
            .collect()
    }

    /// Restores trades that are still within their lifetime; drops stale
    /// ones and reconciles any matching risk entry. Risk state is restored
    /// separately and is not re-opened here.
    pub async fn restore_positions(self: &Arc<Self>, snapshots: Vec<OpenSnapshot>) {
        let now = now_ms();
        for snap in snapshots {
            let age = now - snap.open_time;
            if age > MAX_HOLD_MS + 60_000 {
                warn!(trade_id = %snap.id, "dropping stale snapshot on restore");
                self.risk.lock().close_position(&snap.id, 0.0);
                self.persist_audit_exit(&snap.trade, crate::state::AuditEvent::ExpiredOnRestore, 0.0)
                    .await;
                continue;
            }
            let mut trade = snap.trade;
            if trade.token_qty <= 0.0 && trade.entry_price > 0.0 {
                trade.token_qty = snap.token_qty.unwrap_or(trade.size / trade.entry_price);
            }
            self.open_orders.lock().insert(trade.id.clone(), trade.clone());
            let this = Arc::clone(self);
            let id = trade.id.clone();
            tokio::spawn(async move { this.monitor_position(id).await });
        }
    }

    pub fn get_status(&self) -> StatusSnapshot {
        let pnl_stats = self.pnl_stats.lock();
        let latencies = self.execution_latencies.lock();
        let avg_latency = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<u64>() as f64 / latencies.len() as f64)
        };
        let history = self.trade_history.lock();
        let last_20_win_rate = if history.is_empty() {
            None
        } else {
            let recent: Vec<&Trade> = history.iter().rev().take(20).collect();
            let wins = recent.iter().filter(|t| t.realized_pnl > 0.0).count();
            Some(wins as f64 / recent.len() as f64)
        };
        StatusSnapshot {
            open_orders: self.open_orders.lock().len(),
            fill_rate: self.fill_rate.snapshot(),
            avg_execution_latency_ms: avg_latency,
            pnl_mean: pnl_stats.mean(),
            pnl_n: pnl_stats.n(),
            last_20_win_rate,
        }
    }
}
