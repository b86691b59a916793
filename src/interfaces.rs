//! External interfaces this core consumes but does not own. Concrete
//! network clients (the real Binance-equivalent spot feed, the real CLOB
//! client, the real market-discovery service) are out of scope; `paper`
//! ships in-process implementations of each trait so the engine runs and
//! is testable end to end in dry-run mode.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::state::PersistedState;
use crate::types::{Book, Order, OrderRequest, RawOrderStatus, RotationEvent, SpotUpdate};

/// Per-asset stream of spot price ticks. Guarantees: monotonic-ish
/// timestamps; may gap on reconnect; never emits non-finite numbers.
pub trait SpotFeed: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<SpotUpdate>;
}

/// The prediction-market CLOB: book updates, order placement, and polling.
/// A NO-token book update MUST already be normalized to YES-equivalent mid
/// by the implementation before it reaches the router.
#[async_trait]
pub trait ContractBookClient: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<Book>;

    async fn fetch_orderbook(&self, token_id: &str) -> Option<Book>;

    async fn place_order(&self, req: OrderRequest) -> Result<Order>;

    async fn get_order(&self, id: &str) -> Result<RawOrderStatus>;

    /// Best-effort; errors are swallowed by callers.
    async fn cancel_order(&self, id: &str) -> Result<()>;

    /// Best-effort; errors are swallowed by callers.
    async fn cancel_all(&self) -> Result<()>;
}

/// Emits rotation events some seconds before the previous market in a
/// given (asset, window) pair expires.
pub trait MarketDiscovery: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<RotationEvent>;
}

/// Crash-recovery persistence: atomic state document plus an append-only
/// trade audit log. Non-fatal on write failure.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save_state(&self, state: &PersistedState) -> Result<()>;
    async fn load_state(&self) -> Result<Option<PersistedState>>;
    async fn append_audit(&self, line: &str) -> Result<()>;
}
