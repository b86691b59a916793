//! In-process paper implementations of the four external interfaces.
//! These exist so the binary runs end to end in dry-run mode and so tests
//! can drive S1-S3 style fill scenarios without a network, following this
//! codebase's existing paper-execution adapter (simulated latency,
//! slippage, partial fills, rejection) and broadcast-fan-out feed style.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::interfaces::{ContractBookClient, MarketDiscovery, SpotFeed};
use crate::state::PersistedState;
use crate::types::{Book, Order, OrderRequest, OrderSide, OrderStatus, RawOrderStatus, RotationEvent, SpotUpdate};

/// A spot feed whose ticks are pushed in by a caller (or a synthetic
/// generator in demo mode) rather than sourced from a real exchange.
pub struct InMemorySpotFeed {
    tx: broadcast::Sender<SpotUpdate>,
}

impl Default for InMemorySpotFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySpotFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    pub fn push(&self, update: SpotUpdate) {
        let _ = self.tx.send(update);
    }
}

impl SpotFeed for InMemorySpotFeed {
    fn subscribe(&self) -> broadcast::Receiver<SpotUpdate> {
        self.tx.subscribe()
    }
}

/// Mirrors the source system's paper-execution simulation: random latency,
/// size-dependent slippage, occasional partial fills and rejections.
#[derive(Debug, Clone)]
pub struct PaperClientConfig {
    pub base_latency_ms: u64,
    pub latency_jitter_ms: u64,
    pub slippage_bps_per_1k: f64,
    pub base_slippage_bps: f64,
    pub partial_fill_prob: f64,
    pub min_fill_ratio: f64,
    pub reject_prob: f64,
}

impl Default for PaperClientConfig {
    fn default() -> Self {
        Self {
            base_latency_ms: 150,
            latency_jitter_ms: 200,
            slippage_bps_per_1k: 15.0,
            base_slippage_bps: 10.0,
            partial_fill_prob: 0.15,
            min_fill_ratio: 0.4,
            reject_prob: 0.02,
        }
    }
}

enum SimulatedOutcome {
    Matched { fill_price: f64 },
    Partial { fill_qty: f64, fill_price: f64 },
    Cancelled,
}

struct PendingOrder {
    ready_at: Instant,
    requested_qty: f64,
    outcome: SimulatedOutcome,
}

/// Paper implementation of the CLOB book/order interface. Book updates are
/// whatever the caller pushes via `push_book`; order placement simulates
/// fill behavior the way `PaperExecutionAdapter` does for the live
/// execution path.
pub struct PaperContractBookClient {
    config: PaperClientConfig,
    books: Mutex<HashMap<String, Book>>,
    book_tx: broadcast::Sender<Book>,
    pending: Mutex<HashMap<String, PendingOrder>>,
}

impl PaperContractBookClient {
    pub fn new(config: PaperClientConfig) -> Self {
        let (book_tx, _) = broadcast::channel(1024);
        Self {
            config,
            books: Mutex::new(HashMap::new()),
            book_tx,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn push_book(&self, token_id: &str, mut book: Book) {
        book.token_id_hash = crate::types::hash_token_id(token_id);
        self.books.lock().insert(token_id.to_string(), book);
        let _ = self.book_tx.send(book);
    }
}

impl Default for PaperContractBookClient {
    fn default() -> Self {
        Self::new(PaperClientConfig::default())
    }
}

#[async_trait]
impl ContractBookClient for PaperContractBookClient {
    fn subscribe(&self) -> broadcast::Receiver<Book> {
        self.book_tx.subscribe()
    }

    async fn fetch_orderbook(&self, token_id: &str) -> Option<Book> {
        self.books.lock().get(token_id).copied()
    }

    async fn place_order(&self, req: OrderRequest) -> Result<Order> {
        if !(req.price.is_finite() && req.price > 0.0 && req.price < 1.0) {
            return Err(anyhow!("invalid price"));
        }
        if !(req.size.is_finite() && req.size > 0.0) {
            return Err(anyhow!("invalid size"));
        }

        let mut rng = StdRng::from_entropy();
        let jitter = rng.gen_range(0..=self.config.latency_jitter_ms);
        let latency_ms = self.config.base_latency_ms + jitter;

        if rng.gen::<f64>() < self.config.reject_prob {
            return Err(anyhow!("order rejected (simulated)"));
        }

        let notional = req.price * req.size;
        let size_factor = notional / 1000.0;
        let slippage_bps = self.config.base_slippage_bps + self.config.slippage_bps_per_1k * size_factor;
        let slippage_mult = slippage_bps / 1e4;
        let fill_price = match req.side {
            OrderSide::Buy => (req.price * (1.0 + slippage_mult)).min(0.99),
            OrderSide::Sell => (req.price * (1.0 - slippage_mult)).max(0.01),
        };

        let outcome = if rng.gen::<f64>() < self.config.partial_fill_prob {
            let ratio = rng.gen_range(self.config.min_fill_ratio..1.0);
            SimulatedOutcome::Partial {
                fill_qty: req.size * ratio,
                fill_price,
            }
        } else {
            SimulatedOutcome::Matched { fill_price }
        };

        let id = Uuid::new_v4().to_string();
        self.pending.lock().insert(
            id.clone(),
            PendingOrder {
                ready_at: Instant::now() + Duration::from_millis(latency_ms),
                requested_qty: req.size,
                outcome,
            },
        );

        Ok(Order {
            id,
            status: OrderStatus::Open,
        })
    }

    async fn get_order(&self, id: &str) -> Result<RawOrderStatus> {
        let pending = self.pending.lock();
        let order = pending.get(id).ok_or_else(|| anyhow!("unknown order id"))?;

        if Instant::now() < order.ready_at {
            return Ok(RawOrderStatus {
                status: "OPEN".to_string(),
                size: None,
                remaining_size: None,
                maker_amount: None,
                avg_price: None,
            });
        }

        Ok(match &order.outcome {
            SimulatedOutcome::Matched { fill_price } => RawOrderStatus {
                status: "MATCHED".to_string(),
                size: Some(order.requested_qty),
                remaining_size: Some(0.0),
                maker_amount: None,
                avg_price: Some(*fill_price),
            },
            SimulatedOutcome::Partial { fill_qty, fill_price } => RawOrderStatus {
                status: "CANCELLED".to_string(),
                size: Some(order.requested_qty),
                remaining_size: Some(order.requested_qty - fill_qty),
                maker_amount: None,
                avg_price: Some(*fill_price),
            },
            SimulatedOutcome::Cancelled => RawOrderStatus {
                status: "CANCELLED".to_string(),
                size: Some(order.requested_qty),
                remaining_size: Some(order.requested_qty),
                maker_amount: None,
                avg_price: None,
            },
        })
    }

    async fn cancel_order(&self, id: &str) -> Result<()> {
        self.pending.lock().remove(id);
        Ok(())
    }

    async fn cancel_all(&self) -> Result<()> {
        self.pending.lock().clear();
        Ok(())
    }
}

/// A market-discovery stub whose rotation events are injected by a caller
/// (tests, or a scripted demo sequence) rather than discovered live.
pub struct StaticMarketDiscovery {
    tx: broadcast::Sender<RotationEvent>,
}

impl Default for StaticMarketDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticMarketDiscovery {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn push(&self, event: RotationEvent) {
        let _ = self.tx.send(event);
    }
}

impl MarketDiscovery for StaticMarketDiscovery {
    fn subscribe(&self) -> broadcast::Receiver<RotationEvent> {
        self.tx.subscribe()
    }
}

/// A no-op state store for tests/demos that don't care about persistence.
pub struct NullStateStore;

#[async_trait]
impl crate::interfaces::StateStore for NullStateStore {
    async fn save_state(&self, _state: &PersistedState) -> Result<()> {
        Ok(())
    }

    async fn load_state(&self) -> Result<Option<PersistedState>> {
        Ok(None)
    }

    async fn append_audit(&self, _line: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn place_order_eventually_resolves_to_matched_or_partial() {
        let client = PaperContractBookClient::new(PaperClientConfig {
            base_latency_ms: 1,
            latency_jitter_ms: 0,
            reject_prob: 0.0,
            partial_fill_prob: 0.0,
            ..PaperClientConfig::default()
        });

        let order = client
            .place_order(OrderRequest {
                token_id: "tok".into(),
                side: OrderSide::Buy,
                price: 0.5,
                size: 10.0,
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let status = client.get_order(&order.id).await.unwrap();
        assert_eq!(status.status, "MATCHED");
        assert_eq!(status.size, Some(10.0));
    }

    #[tokio::test]
    async fn spot_feed_delivers_pushed_updates() {
        let feed = InMemorySpotFeed::new();
        let mut rx = feed.subscribe();
        feed.push(SpotUpdate {
            mid: 100.0,
            delta: 0.1,
            realized_vol: 0.2,
            timestamp: 1,
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.mid, 100.0);
    }
}
