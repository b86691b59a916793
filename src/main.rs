use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use latency_arb_core::config::Config;
use latency_arb_core::demo::{self, DemoMarket};
use latency_arb_core::engine::{Engine, MarketSlot};
use latency_arb_core::executor::Executor;
use latency_arb_core::fill_tracker::FillTracker;
use latency_arb_core::interfaces::SpotFeed;
use latency_arb_core::paper::{InMemorySpotFeed, PaperClientConfig, PaperContractBookClient, StaticMarketDiscovery};
use latency_arb_core::risk::RiskManager;
use latency_arb_core::state::FileStateStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    if config.dry_run {
        info!("starting in dry-run mode: no live orders will be placed");
    } else {
        warn!("starting in LIVE mode");
    }

    let state_store = Arc::new(FileStateStore::new(
        config.state_path.clone(),
        config.audit_log_path.clone(),
    ));

    let mut risk = RiskManager::new(config.bankroll, config.risk_config());

    let restored_snapshots = match state_store.load_state().await {
        Ok(Some(state)) => {
            info!(bankroll = state.bankroll, "restoring persisted state");
            risk.restore(latency_arb_core::risk::RiskSnapshot {
                bankroll: state.bankroll,
                daily_pnl: state.daily_pnl,
                open_positions: state.open_positions,
            });
            state.open_snapshot
        }
        Ok(None) => Vec::new(),
        Err(e) => {
            error!(error = %e, "failed to load persisted state, starting fresh");
            Vec::new()
        }
    };

    let risk = Arc::new(SyncMutex::new(risk));
    let fill_tracker = Arc::new(FillTracker::new());
    let contract_client = Arc::new(PaperContractBookClient::new(PaperClientConfig::default()));
    let market_discovery = Arc::new(StaticMarketDiscovery::new());

    let executor = Executor::new(
        config.executor_config(),
        contract_client.clone(),
        Arc::clone(&risk),
        fill_tracker,
        state_store.clone(),
    );

    if !restored_snapshots.is_empty() {
        info!(count = restored_snapshots.len(), "restoring open positions");
        executor.restore_positions(restored_snapshots).await;
    }

    let mut slots = Vec::new();
    let mut demo_markets = Vec::new();
    let mut concrete_feeds: HashMap<String, Arc<InMemorySpotFeed>> = HashMap::new();

    for asset in &config.assets {
        concrete_feeds
            .entry(asset.clone())
            .or_insert_with(|| Arc::new(InMemorySpotFeed::new()));

        for window in &config.windows {
            let label = format!("{asset}/{window}");
            let window_ms = latency_arb_core::config::parse_window_ms(window).unwrap_or(5 * 60 * 1000);
            slots.push(MarketSlot {
                label: label.clone(),
                asset: asset.clone(),
                strategy_cfg: config.strategy_config(asset, window),
            });
            demo_markets.push(DemoMarket {
                label,
                asset: asset.clone(),
                window_ms,
            });
        }
    }

    let spot_feeds: HashMap<String, Arc<dyn SpotFeed>> = concrete_feeds
        .iter()
        .map(|(asset, feed)| (asset.clone(), Arc::clone(feed) as Arc<dyn SpotFeed>))
        .collect();

    let engine = Engine::new(
        Arc::clone(&risk),
        executor,
        contract_client.clone(),
        market_discovery.clone(),
        state_store,
        slots,
    );
    engine.start(spot_feeds);

    demo::spawn(demo_markets, &concrete_feeds, contract_client, market_discovery);

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, closing out");
    engine.shutdown().await;

    Ok(())
}
