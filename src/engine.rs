//! Engine / Router: wires spot and contract-book feeds to the correct
//! per-market Strategy instance, fans out market-discovery rotation events,
//! and bridges Strategy signals through the per-market stacking gate, Risk,
//! and the Executor.
//!
//! The engine owns one Strategy per (asset, window) market slot, fixed at
//! construction. Rotation never creates or destroys a Strategy instance; it
//! calls `Strategy::set_market` on the existing one and atomically replaces
//! the tokenId -> label binding (I5), which is the only state that actually
//! churns.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex as SyncMutex;
use tracing::{debug, error, info, warn};

use crate::executor::Executor;
use crate::interfaces::{ContractBookClient, MarketDiscovery, SpotFeed, StateStore};
use crate::risk::RiskManager;
use crate::state::PersistedState;
use crate::strategy::{BankrollGetter, Strategy, StrategyConfig};
use crate::types::{hash_token_id, RotationEvent};

/// One (asset x contract-window) market the engine should track. `label` is
/// the stable identifier carried on every Signal/Trade for this slot across
/// rotations (e.g. "BTC/5m"); `asset` groups slots that share a spot feed.
#[derive(Debug, Clone)]
pub struct MarketSlot {
    pub label: String,
    pub asset: String,
    pub strategy_cfg: StrategyConfig,
}

struct RegisteredMarket {
    asset: String,
    strategy: SyncMutex<Strategy>,
}

pub struct Engine {
    risk: Arc<SyncMutex<RiskManager>>,
    executor: Arc<Executor>,
    contract_client: Arc<dyn ContractBookClient>,
    market_discovery: Arc<dyn MarketDiscovery>,
    state_store: Arc<dyn StateStore>,

    /// By label; fixed at construction time (one instance per market slot).
    markets: HashMap<String, RegisteredMarket>,
    /// asset -> labels sharing that spot feed; fixed at construction.
    asset_labels: HashMap<String, Vec<String>>,
    /// tokenId hash -> label, replaced atomically on rotation (I5).
    token_routes: ArcSwap<HashMap<u64, String>>,
}

impl Engine {
    pub fn new(
        risk: Arc<SyncMutex<RiskManager>>,
        executor: Arc<Executor>,
        contract_client: Arc<dyn ContractBookClient>,
        market_discovery: Arc<dyn MarketDiscovery>,
        state_store: Arc<dyn StateStore>,
        slots: Vec<MarketSlot>,
    ) -> Arc<Self> {
        let mut markets = HashMap::new();
        let mut asset_labels: HashMap<String, Vec<String>> = HashMap::new();

        for slot in slots {
            let risk_for_getter = Arc::clone(&risk);
            let bankroll_getter: BankrollGetter = Arc::new(move || risk_for_getter.lock().bankroll());
            let strategy = Strategy::new(slot.label.clone(), slot.strategy_cfg, bankroll_getter);
            asset_labels.entry(slot.asset.clone()).or_default().push(slot.label.clone());
            markets.insert(
                slot.label.clone(),
                RegisteredMarket {
                    asset: slot.asset,
                    strategy: SyncMutex::new(strategy),
                },
            );
        }

        Arc::new(Self {
            risk,
            executor,
            contract_client,
            market_discovery,
            state_store,
            markets,
            asset_labels,
            token_routes: ArcSwap::from_pointee(HashMap::new()),
        })
    }

    /// Spawns one task per distinct spot feed, one for the contract-book
    /// feed, and one for market-discovery rotations. Returns immediately;
    /// the tasks run for the life of the process.
    pub fn start(self: &Arc<Self>, spot_feeds: HashMap<String, Arc<dyn SpotFeed>>) {
        for (asset, feed) in spot_feeds {
            if !self.asset_labels.contains_key(&asset) {
                continue;
            }
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_spot_feed(asset, feed).await });
        }

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_contract_feed().await });

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_rotation_feed().await });
    }

    async fn run_spot_feed(self: Arc<Self>, asset: String, feed: Arc<dyn SpotFeed>) {
        let mut rx = feed.subscribe();
        loop {
            match rx.recv().await {
                Ok(update) => {
                    let labels = match self.asset_labels.get(&asset) {
                        Some(labels) => labels.clone(),
                        None => continue,
                    };
                    for label in labels {
                        let signal = match self.markets.get(&label) {
                            Some(m) => m.strategy.lock().on_spot_update(update),
                            None => None,
                        };
                        if let Some(signal) = signal {
                            self.handle_signal(signal).await;
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(asset = %asset, skipped, "spot feed lagged, dropping skipped ticks");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    async fn run_contract_feed(self: Arc<Self>) {
        let mut rx = self.contract_client.subscribe();
        loop {
            match rx.recv().await {
                Ok(book) => {
                    let label = self.token_routes.load().get(&book.token_id_hash).cloned();
                    let label = match label {
                        Some(l) => l,
                        None => continue,
                    };
                    let signal = match self.markets.get(&label) {
                        Some(m) => m.strategy.lock().on_contract_update(book),
                        None => None,
                    };
                    if let Some(signal) = signal {
                        self.handle_signal(signal).await;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "contract book feed lagged, dropping skipped ticks");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    async fn run_rotation_feed(self: Arc<Self>) {
        let mut rx = self.market_discovery.subscribe();
        loop {
            match rx.recv().await {
                Ok(event) => self.handle_rotation(event).await,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "market discovery feed lagged, dropping skipped events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Per-market stacking prevention (enforced here, not in Risk, because
    /// Risk is market-agnostic) followed by Risk.canTrade and execution.
    async fn handle_signal(&self, signal: crate::types::Signal) {
        if self.executor.has_open_trade_for_label(&signal.label) {
            debug!(label = %signal.label, "signal rejected: already open for market");
            return;
        }

        let decision = self.risk.lock().can_trade(&signal);
        if !decision.allowed {
            debug!(label = %signal.label, reasons = ?decision.reasons, "signal rejected by risk gate");
            return;
        }

        info!(label = %signal.label, edge = signal.edge, size = signal.size, "executing signal");
        self.executor.execute(signal).await;
    }

    /// Updates the tokenId -> label binding atomically (I5), instructs the
    /// Strategy to rotate, and cancels any still-open order for the
    /// previous contract under this label.
    async fn handle_rotation(&self, event: RotationEvent) {
        let market = match self.markets.get(&event.label) {
            Some(m) => m,
            None => {
                warn!(label = %event.label, "rotation event for unregistered market, ignoring");
                return;
            }
        };

        let (old_yes, old_no) = {
            let strategy = market.strategy.lock();
            (strategy.token_id_yes().to_string(), strategy.token_id_no().to_string())
        };

        self.executor.cancel_orders_for_label(&event.label).await;

        {
            let mut strategy = market.strategy.lock();
            strategy.set_market(event.token_id_yes.clone(), event.token_id_no.clone(), event.end_date);
        }

        let new_yes_hash = hash_token_id(&event.token_id_yes);
        let new_no_hash = hash_token_id(&event.token_id_no);
        let old_yes_hash = hash_token_id(&old_yes);
        let old_no_hash = hash_token_id(&old_no);

        let mut routes = (**self.token_routes.load()).clone();
        routes.remove(&old_yes_hash);
        routes.remove(&old_no_hash);
        routes.insert(new_yes_hash, event.label.clone());
        routes.insert(new_no_hash, event.label.clone());
        self.token_routes.store(Arc::new(routes));

        info!(label = %event.label, "market rotated");
    }

    pub fn note_unhandled_error(&self) {
        self.risk.lock().note_unhandled_rejection();
    }

    /// Cancels everything exchange-side and persists a crash-recovery
    /// snapshot so a restart can pick the open positions back up.
    pub async fn shutdown(&self) {
        self.executor.cancel_all_orders().await;

        let risk_snapshot = self.risk.lock().snapshot();
        let open_snapshot = self.executor.get_open_snapshot().await;
        let state = PersistedState {
            bankroll: risk_snapshot.bankroll,
            daily_pnl: risk_snapshot.daily_pnl,
            daily_pnl_reset_at: crate::clock::now_ms(),
            open_positions: risk_snapshot.open_positions,
            open_snapshot,
            saved_at: crate::state::audit_timestamp(),
        };
        if let Err(e) = self.state_store.save_state(&state).await {
            error!(error = %e, "failed to persist shutdown snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use crate::fill_tracker::FillTracker;
    use crate::paper::{InMemorySpotFeed, NullStateStore, PaperClientConfig, PaperContractBookClient, StaticMarketDiscovery};
    use crate::risk::RiskConfig;
    use crate::types::{Book, SpotUpdate};

    fn build_engine() -> (
        Arc<Engine>,
        Arc<PaperContractBookClient>,
        Arc<InMemorySpotFeed>,
        Arc<StaticMarketDiscovery>,
    ) {
        let client = Arc::new(PaperContractBookClient::new(PaperClientConfig {
            base_latency_ms: 1,
            latency_jitter_ms: 0,
            reject_prob: 0.0,
            partial_fill_prob: 0.0,
            ..PaperClientConfig::default()
        }));
        let risk = Arc::new(SyncMutex::new(RiskManager::new(10_000.0, RiskConfig::default())));
        let fill_tracker = Arc::new(FillTracker::new());
        let state_store = Arc::new(NullStateStore);
        let executor = Executor::new(
            ExecutorConfig {
                dry_run: true,
                ..ExecutorConfig::default()
            },
            client.clone() as Arc<dyn ContractBookClient>,
            risk.clone(),
            fill_tracker,
            state_store.clone(),
        );
        let discovery = Arc::new(StaticMarketDiscovery::new());
        let spot_feed = Arc::new(InMemorySpotFeed::new());

        let slots = vec![MarketSlot {
            label: "BTC/5m".to_string(),
            asset: "BTC".to_string(),
            strategy_cfg: StrategyConfig::default(),
        }];

        let engine = Engine::new(
            risk,
            executor,
            client.clone() as Arc<dyn ContractBookClient>,
            discovery.clone() as Arc<dyn MarketDiscovery>,
            state_store,
            slots,
        );
        engine.start({
            let mut m: HashMap<String, Arc<dyn SpotFeed>> = HashMap::new();
            m.insert("BTC".to_string(), spot_feed.clone() as Arc<dyn SpotFeed>);
            m
        });

        (engine, client, spot_feed, discovery)
    }

    #[tokio::test]
    async fn rotation_for_unknown_label_is_ignored_without_panicking() {
        let (engine, _client, _spot, discovery) = build_engine();
        discovery.push(RotationEvent {
            token_id_yes: "y".into(),
            token_id_no: "n".into(),
            end_date: crate::clock::now_ms() + 1000,
            label: "ETH/15m".into(),
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(engine.token_routes.load().len(), 0);
    }

    #[tokio::test]
    async fn rotation_binds_tokens_atomically_and_only_once_per_token() {
        let (engine, _client, _spot, discovery) = build_engine();
        let end_date = crate::clock::now_ms() + 10 * 60 * 1000;
        discovery.push(RotationEvent {
            token_id_yes: "yes-1".into(),
            token_id_no: "no-1".into(),
            end_date,
            label: "BTC/5m".into(),
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let routes = engine.token_routes.load();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes.get(&hash_token_id("yes-1")), Some(&"BTC/5m".to_string()));
        assert_eq!(routes.get(&hash_token_id("no-1")), Some(&"BTC/5m".to_string()));

        // A second rotation must replace, not accumulate, the bindings (I5).
        discovery.push(RotationEvent {
            token_id_yes: "yes-2".into(),
            token_id_no: "no-2".into(),
            end_date: end_date + 10 * 60 * 1000,
            label: "BTC/5m".into(),
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let routes = engine.token_routes.load();
        assert_eq!(routes.len(), 2);
        assert!(routes.get(&hash_token_id("yes-1")).is_none());
        assert!(routes.get(&hash_token_id("yes-2")).is_some());
    }

    #[tokio::test]
    async fn signal_is_rejected_when_a_trade_is_already_open_for_the_label() {
        let (engine, client, spot, discovery) = build_engine();
        // Short window so the tick timestamps below already fall inside
        // market_window_start and land in certainty-arb range (<=90s to expiry).
        let end_date = crate::clock::now_ms() + 60_000;
        discovery.push(RotationEvent {
            token_id_yes: "yes-1".into(),
            token_id_no: "no-1".into(),
            end_date,
            label: "BTC/5m".into(),
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // Market set count must exceed 1 (P2) before a signal can fire, so
        // rotate a second time onto the same tokens before driving ticks.
        discovery.push(RotationEvent {
            token_id_yes: "yes-1".into(),
            token_id_no: "no-1".into(),
            end_date,
            label: "BTC/5m".into(),
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        client.push_book(
            "yes-1",
            Book {
                token_id_hash: 0,
                best_bid: 0.49,
                best_ask: 0.51,
                bid_depth: 500.0,
                ask_depth: 500.0,
                mid: 0.5,
                timestamp: crate::clock::now_ms(),
            },
        );
        spot.push(SpotUpdate {
            mid: 100.0,
            delta: 0.0,
            realized_vol: 2.0,
            timestamp: crate::clock::now_ms(),
        });
        spot.push(SpotUpdate {
            mid: 106.0,
            delta: 6.0,
            realized_vol: 2.0,
            timestamp: crate::clock::now_ms() + 1,
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(engine.executor.has_open_trade_for_label("BTC/5m"));

        // A fresh tick that would otherwise emit another signal must be
        // rejected by the stacking gate while a trade is still open.
        let open_count_before = engine.executor.open_order_count().await;
        client.push_book(
            "yes-1",
            Book {
                token_id_hash: 0,
                best_bid: 0.49,
                best_ask: 0.51,
                bid_depth: 500.0,
                ask_depth: 500.0,
                mid: 0.5,
                timestamp: crate::clock::now_ms(),
            },
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(engine.executor.open_order_count().await, open_count_before);
    }
}
