//! Signal-to-execution core for a spot / prediction-market latency-arbitrage
//! engine: per-market Strategy, Risk Manager, Executor order-lifecycle state
//! machine, and the Engine/Router wiring them to feeds.

pub mod clock;
pub mod config;
pub mod demo;
pub mod engine;
pub mod executor;
pub mod fill_tracker;
pub mod interfaces;
pub mod numeric;
pub mod paper;
pub mod parsing;
pub mod risk;
pub mod state;
pub mod strategy;
pub mod types;
