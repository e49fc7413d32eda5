//! ═══════════════════════════════════════════════════════════════════════════
//! Grid Position State Machine
//!
//! One position is one cell of the price grid: a buy bucket
//! `[buy_min, buy_max]`, a sell target above it, and the accounting for a
//! single buy/sell round trip.
//!
//! Lifecycle: Empty → Buying → Holding → Selling → Sold. Buying and Selling
//! are transient while a transaction is pending; a failed transaction rolls
//! the position back to the state it came from. Sold is terminal for the
//! current grid version.
//! ═══════════════════════════════════════════════════════════════════════════

use chrono::{DateTime, Utc};
use ethers::types::{I256, U256};
use serde::{Deserialize, Serialize};

use crate::utils::format::{serde_wei, serde_wei_signed};

/// Position lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    /// No exposure; bucket is available for a buy
    Empty,
    /// Buy transaction submitted, receipt pending
    Buying,
    /// Tokens held, waiting for the sell target
    Holding,
    /// Sell transaction submitted, receipt pending
    Selling,
    /// Round trip complete
    Sold,
}

impl PositionStatus {
    /// Active positions count against `max_active_positions`.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Buying | Self::Holding | Self::Selling)
    }

    /// Transient states have a transaction in flight; the reconciler must
    /// resolve them after a crash.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Buying | Self::Selling)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sold)
    }
}

/// Single grid position with paired buy/sell accounting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Grid index, 0..N-1 from the floor up
    pub id: usize,

    /// Buy bucket bounds (prices, ETH per token)
    pub buy_min: f64,
    pub buy_max: f64,

    /// Sell target: `buy_max * (1 + take_profit / 100)`
    pub sell_price: f64,

    /// Stop trigger below the bucket; 0.0 when stop-loss is disabled
    pub stop_loss_price: f64,

    pub status: PositionStatus,

    // Buy side
    pub buy_tx_hash: Option<String>,
    pub buy_timestamp: Option<DateTime<Utc>>,
    #[serde(with = "serde_wei")]
    pub tokens_received: U256,
    #[serde(with = "serde_wei")]
    pub eth_cost: U256,

    // Sell side
    pub sell_tx_hash: Option<String>,
    pub sell_timestamp: Option<DateTime<Utc>>,
    #[serde(with = "serde_wei")]
    pub eth_received: U256,
    #[serde(with = "serde_wei_signed")]
    pub profit: I256,
    pub profit_percent: f64,

    // In-flight expectations from the quote, persisted before submission
    // so the reconciler can rebuild accounting after a crash. Zero outside
    // a transient state.
    #[serde(with = "serde_wei", default)]
    pub pending_spend: U256,
    #[serde(with = "serde_wei", default)]
    pub pending_receive: U256,
}

impl Position {
    pub fn new(id: usize, buy_min: f64, buy_max: f64, sell_price: f64, stop_loss_price: f64) -> Self {
        Self {
            id,
            buy_min,
            buy_max,
            sell_price,
            stop_loss_price,
            status: PositionStatus::Empty,
            buy_tx_hash: None,
            buy_timestamp: None,
            tokens_received: U256::zero(),
            eth_cost: U256::zero(),
            sell_tx_hash: None,
            sell_timestamp: None,
            eth_received: U256::zero(),
            profit: I256::zero(),
            profit_percent: 0.0,
            pending_spend: U256::zero(),
            pending_receive: U256::zero(),
        }
    }

    /// Commit the bucket to a buy. Persisted before submission; the tx
    /// hash arrives via [`Self::buy_submitted`].
    pub fn begin_buy(&mut self, eth_to_spend: U256, tokens_expected: U256) {
        debug_assert_eq!(self.status, PositionStatus::Empty);
        self.pending_spend = eth_to_spend;
        self.pending_receive = tokens_expected;
        self.status = PositionStatus::Buying;
    }

    pub fn buy_submitted(&mut self, tx_hash: String) {
        debug_assert_eq!(self.status, PositionStatus::Buying);
        self.buy_tx_hash = Some(tx_hash);
    }

    /// Buy receipt confirmed. `tokens_received` and `eth_cost` must both be
    /// non-zero before the position becomes visible to the sell phase.
    pub fn confirm_buy(&mut self, tokens_received: U256, eth_cost: U256, at: DateTime<Utc>) {
        debug_assert!(!tokens_received.is_zero() && !eth_cost.is_zero());
        self.tokens_received = tokens_received;
        self.eth_cost = eth_cost;
        self.buy_timestamp = Some(at);
        self.pending_spend = U256::zero();
        self.pending_receive = U256::zero();
        self.status = PositionStatus::Holding;
    }

    /// Buy failed or reverted; bucket returns to the pool.
    pub fn revert_buy(&mut self) {
        self.buy_tx_hash = None;
        self.tokens_received = U256::zero();
        self.eth_cost = U256::zero();
        self.pending_spend = U256::zero();
        self.pending_receive = U256::zero();
        self.status = PositionStatus::Empty;
    }

    /// Commit the held tokens to a sell. Persisted before submission.
    pub fn begin_sell(&mut self, tokens_to_sell: U256, eth_expected: U256) {
        debug_assert_eq!(self.status, PositionStatus::Holding);
        self.pending_spend = tokens_to_sell;
        self.pending_receive = eth_expected;
        self.status = PositionStatus::Selling;
    }

    pub fn sell_submitted(&mut self, tx_hash: String) {
        debug_assert_eq!(self.status, PositionStatus::Selling);
        self.sell_tx_hash = Some(tx_hash);
    }

    /// Sell receipt confirmed; profit is net ETH received minus cost basis.
    pub fn confirm_sell(&mut self, eth_received: U256, profit: I256, at: DateTime<Utc>) {
        self.eth_received = eth_received;
        self.profit = profit;
        self.profit_percent = if self.eth_cost.is_zero() {
            0.0
        } else {
            // Display-only ratio; f64 is acceptable here
            let cost = u256_to_f64(self.eth_cost);
            let p = i256_to_f64(profit);
            (p / cost) * 100.0
        };
        self.sell_timestamp = Some(at);
        self.pending_spend = U256::zero();
        self.pending_receive = U256::zero();
        self.status = PositionStatus::Sold;
    }

    /// Sell failed or reverted; tokens are still held.
    pub fn revert_sell(&mut self) {
        self.sell_tx_hash = None;
        self.eth_received = U256::zero();
        self.pending_spend = U256::zero();
        self.pending_receive = U256::zero();
        self.status = PositionStatus::Holding;
    }

    /// Whether `price` lies inside the buy bucket widened by `tolerance`
    /// (a fraction of the bucket width on each side).
    pub fn contains_price(&self, price: f64, tolerance: f64) -> bool {
        let width = self.buy_max - self.buy_min;
        let slack = width * tolerance;
        price >= self.buy_min - slack && price <= self.buy_max + slack
    }
}

/// Summary counts over a position array
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridStats {
    pub empty: usize,
    pub holding: usize,
    pub sold: usize,
    pub buying: usize,
    pub selling: usize,
    pub total: usize,
    /// Active share of the grid, 0.0..=1.0
    pub occupancy: f64,
}

pub(crate) fn u256_to_f64(v: U256) -> f64 {
    // Lossy by design: only used for display ratios, never accounting
    v.to_string().parse::<f64>().unwrap_or(f64::MAX)
}

pub(crate) fn i256_to_f64(v: I256) -> f64 {
    v.to_string().parse::<f64>().unwrap_or(0.0)
}
