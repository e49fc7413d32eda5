//! ═══════════════════════════════════════════════════════════════════════
//! 🤖 BASE GRID BOT - Multi-Tenant Grid Trading Supervisor
//!
//! Persistent daemon that owns a fleet of independently configured grid
//! trading bots on EVM chains (Base first):
//! • Price-bucket grids with per-position round-trip accounting
//! • Chainlink + Uniswap V3 TWAP oracle with confidence scoring
//! • 0x aggregator execution with exact-amount approvals
//! • Portfolio-wide circuit breaker (daily / total loss limits)
//! • Cooperative heartbeat scheduler with per-bot tick isolation
//! • Crash-safe JSON persistence with receipt reconciliation on restart
//! • Encrypted signing keys at rest (PBKDF2 + AES-256-GCM)
//! ═══════════════════════════════════════════════════════════════════════

#![allow(missing_docs)]
#![warn(rust_2018_idioms, unreachable_pub)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

// ═══════════════════════════════════════════════════════════════════════
// Module Declarations
// ═══════════════════════════════════════════════════════════════════════

pub mod bots;
pub mod config;
pub mod dex;
pub mod errors;
pub mod metrics;
pub mod persistence;
pub mod risk;
pub mod rpc;
pub mod security;
pub mod trading;
pub mod utils;

// ═══════════════════════════════════════════════════════════════════════
// Public API Exports
// ═══════════════════════════════════════════════════════════════════════

pub use bots::{BotInstance, BotServices, HeartbeatSupervisor, TradingBot};
pub use config::Config;
pub use errors::{EngineError, EngineResult};
pub use persistence::BotStore;
pub use risk::CircuitBreaker;
pub use trading::price_oracle::{PriceData, PriceOracle, PriceSource};

// ═══════════════════════════════════════════════════════════════════════
// Library Metadata
// ═══════════════════════════════════════════════════════════════════════

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

pub fn version_string() -> String {
    format!("{} v{}", NAME, VERSION)
}

pub mod prelude {
    pub use crate::bots::{BotInstance, BotServices, HeartbeatSupervisor, TradingBot};
    pub use crate::config::Config;
    pub use crate::dex::{DexClient, QuoteRequest, SwapQuote, ZeroExClient};
    pub use crate::errors::{EngineError, EngineResult};
    pub use crate::metrics::{TradeLedger, TradeRecord};
    pub use crate::persistence::BotStore;
    pub use crate::risk::CircuitBreaker;
    pub use crate::rpc::{ChainClient, EvmChainClient};
    pub use crate::security::{SigningVault, WalletVault};
    pub use crate::trading::price_oracle::{PriceOracle, PriceSource};

    pub use anyhow::{Context, Result};
}
