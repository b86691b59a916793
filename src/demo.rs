//! Synthetic feed generator for dry-run observability: a random-walk spot
//! price per asset, a matching contract book derived from the model's own
//! implied probability (nudged off-model so edges actually appear), and
//! scheduled market rotations. Exists purely so the binary is visibly doing
//! something end to end without a real exchange connection; no part of this
//! module is exercised by the Engine's own logic.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{interval, Duration};
use tracing::info;

use crate::numeric::implied_probability;
use crate::paper::{InMemorySpotFeed, PaperContractBookClient, StaticMarketDiscovery};
use crate::types::{Book, RotationEvent, SpotUpdate};

/// One (asset, window) slot the demo generator should drive.
#[derive(Debug, Clone)]
pub struct DemoMarket {
    pub label: String,
    pub asset: String,
    pub window_ms: i64,
}

/// Spawns the background tasks. Returns immediately; tasks run for the
/// life of the process, same as `Engine::start`.
pub fn spawn(
    markets: Vec<DemoMarket>,
    spot_feeds: &HashMap<String, Arc<InMemorySpotFeed>>,
    contract_client: Arc<PaperContractBookClient>,
    market_discovery: Arc<StaticMarketDiscovery>,
) {
    let mut asset_spot: HashMap<String, Arc<Mutex<f64>>> = HashMap::new();
    for market in &markets {
        asset_spot
            .entry(market.asset.clone())
            .or_insert_with(|| Arc::new(Mutex::new(seed_price(&market.asset))));
    }

    for (asset, feed) in spot_feeds {
        let Some(price) = asset_spot.get(asset).cloned() else {
            continue;
        };
        let feed = Arc::clone(feed);
        tokio::spawn(spot_walk(asset.clone(), price, feed));
    }

    for market in markets {
        let Some(price) = asset_spot.get(&market.asset).cloned() else {
            continue;
        };
        let client = Arc::clone(&contract_client);
        let discovery = Arc::clone(&market_discovery);
        tokio::spawn(market_cycle(market, price, client, discovery));
    }
}

fn seed_price(asset: &str) -> f64 {
    match asset {
        "BTC" => 65_000.0,
        "ETH" => 3_400.0,
        _ => 100.0,
    }
}

async fn spot_walk(asset: String, price: Arc<Mutex<f64>>, feed: Arc<InMemorySpotFeed>) {
    let mut ticker = interval(Duration::from_millis(500));
    let mut rng = StdRng::from_entropy();
    loop {
        ticker.tick().await;
        let (mid, delta) = {
            let mut guard = price.lock();
            let prev = *guard;
            let pct = rng.gen_range(-0.0006..0.0006);
            *guard = (prev * (1.0 + pct)).max(0.01);
            (*guard, *guard - prev)
        };
        feed.push(SpotUpdate {
            mid,
            delta,
            realized_vol: 0.012,
            timestamp: crate::clock::now_ms(),
        });
        tracing::trace!(%asset, mid, "demo spot tick");
    }
}

/// Drives one market's contract book and rotation schedule. A single task
/// per market, since book pushes and rotation both depend on this market's
/// current strike and token ids.
async fn market_cycle(
    market: DemoMarket,
    spot: Arc<Mutex<f64>>,
    client: Arc<PaperContractBookClient>,
    discovery: Arc<StaticMarketDiscovery>,
) {
    let mut epoch = 0u64;
    loop {
        let strike = *spot.lock();
        let token_id_yes = format!("{}-{}-YES", market.label, epoch);
        let token_id_no = format!("{}-{}-NO", market.label, epoch);
        let end_date = crate::clock::now_ms() + market.window_ms;

        discovery.push(RotationEvent {
            token_id_yes: token_id_yes.clone(),
            token_id_no: token_id_no.clone(),
            end_date,
            label: market.label.clone(),
        });
        info!(label = %market.label, %token_id_yes, %token_id_no, "demo market opened");

        let mut ticker = interval(Duration::from_millis(750));
        let mut rng = StdRng::from_entropy();
        loop {
            ticker.tick().await;
            let now = crate::clock::now_ms();
            if now >= end_date {
                break;
            }
            let hours_to_expiry = (end_date - now) as f64 / 3_600_000.0;
            let current_spot = *spot.lock();
            let model_prob = implied_probability(current_spot, strike, 0.012, hours_to_expiry);
            // Quote the contract slightly off the model so latency-arb edges
            // appear and close on their own as the book "catches up".
            let noise = rng.gen_range(-0.03..0.03);
            let mid = (model_prob + noise).clamp(0.02, 0.98);
            let spread = 0.01;

            client.push_book(
                &token_id_yes,
                Book {
                    token_id_hash: 0,
                    best_bid: (mid - spread).max(0.01),
                    best_ask: (mid + spread).min(0.99),
                    bid_depth: 2_000.0,
                    ask_depth: 2_000.0,
                    mid,
                    timestamp: now,
                },
            );
            client.push_book(
                &token_id_no,
                Book {
                    token_id_hash: 0,
                    best_bid: (1.0 - mid - spread).max(0.01),
                    best_ask: (1.0 - mid + spread).min(0.99),
                    bid_depth: 2_000.0,
                    ask_depth: 2_000.0,
                    mid: 1.0 - mid,
                    timestamp: now,
                },
            );
        }

        epoch += 1;
    }
}
