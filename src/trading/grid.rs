//! ═══════════════════════════════════════════════════════════════════════════
//! Grid Calculator - Pure Price-Grid Math
//!
//! Stateless functions over a position array. No I/O, no clocks, no locks:
//! everything here is deterministic so the bot tick can reason about the
//! grid without holding anything but the positions themselves.
//!
//! Numeric rules:
//! - prices are f64 and are never compared for equality (bucket containment
//!   only)
//! - monetary amounts stay in integer wei (`U256`)
//! ═══════════════════════════════════════════════════════════════════════════

use ethers::types::U256;
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};
use crate::trading::position::{GridStats, Position, PositionStatus};
use crate::utils::format::serde_wei;

/// Shape and risk parameters of one grid version. Immutable once the grid
/// is generated; changing them produces a fresh grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSettings {
    pub num_positions: usize,
    pub floor_price: f64,
    pub ceiling_price: f64,
    pub take_profit_percent: f64,
    pub stop_loss_percent: f64,
    pub stop_loss_enabled: bool,
    pub moon_bag_enabled: bool,
    /// Share of tokens retained on each sell, 0..=100
    pub moon_bag_percent: f64,
    pub min_profit_percent: f64,
    pub max_active_positions: usize,
    pub use_fixed_buy_amount: bool,
    #[serde(with = "serde_wei")]
    pub buy_amount_wei: U256,
}

impl GridSettings {
    pub fn validate(&self) -> EngineResult<()> {
        if self.num_positions < 1 {
            return Err(EngineError::Configuration(
                "invalid grid: num_positions must be at least 1".into(),
            ));
        }
        if self.floor_price <= 0.0 {
            return Err(EngineError::Configuration(format!(
                "invalid grid: floor_price {} must be positive",
                self.floor_price
            )));
        }
        if self.ceiling_price <= self.floor_price {
            return Err(EngineError::Configuration(format!(
                "invalid grid: ceiling_price {} must exceed floor_price {}",
                self.ceiling_price, self.floor_price
            )));
        }
        if self.take_profit_percent <= 0.0 {
            return Err(EngineError::Configuration(
                "invalid grid: take_profit_percent must be positive".into(),
            ));
        }
        if self.stop_loss_enabled && self.stop_loss_percent <= 0.0 {
            return Err(EngineError::Configuration(
                "invalid grid: stop_loss_percent must be positive when enabled".into(),
            ));
        }
        if self.moon_bag_enabled && !(0.0..=100.0).contains(&self.moon_bag_percent) {
            return Err(EngineError::Configuration(format!(
                "invalid grid: moon_bag_percent {} out of range 0-100",
                self.moon_bag_percent
            )));
        }
        if self.max_active_positions == 0 {
            return Err(EngineError::Configuration(
                "invalid grid: max_active_positions must be at least 1".into(),
            ));
        }
        if self.use_fixed_buy_amount && self.buy_amount_wei.is_zero() {
            return Err(EngineError::Configuration(
                "invalid grid: buy_amount_wei must be non-zero with fixed sizing".into(),
            ));
        }
        Ok(())
    }
}

/// Divide `[floor, ceiling]` into contiguous buy buckets.
///
/// Buckets are chained so `positions[i].buy_max == positions[i+1].buy_min`
/// exactly; the last bucket closes on the ceiling with no float drift.
pub fn generate_grid(_current_price: f64, settings: &GridSettings) -> EngineResult<Vec<Position>> {
    settings.validate()?;

    let n = settings.num_positions;
    let step = (settings.ceiling_price - settings.floor_price) / n as f64;

    let mut positions = Vec::with_capacity(n);
    let mut lower = settings.floor_price;

    for i in 0..n {
        let upper = if i == n - 1 {
            settings.ceiling_price
        } else {
            settings.floor_price + (i + 1) as f64 * step
        };

        let sell_price = upper * (1.0 + settings.take_profit_percent / 100.0);
        let stop_loss_price = if settings.stop_loss_enabled {
            lower * (1.0 - settings.stop_loss_percent / 100.0)
        } else {
            0.0
        };

        positions.push(Position::new(i, lower, upper, sell_price, stop_loss_price));
        lower = upper;
    }

    Ok(positions)
}

/// Locate the unique EMPTY bucket containing `price`, widened by
/// `tolerance` (fraction of bucket width). Lowest index wins a tie.
pub fn find_buy_position(positions: &[Position], price: f64, tolerance: f64) -> Option<usize> {
    positions
        .iter()
        .find(|p| p.status == PositionStatus::Empty && p.contains_price(price, tolerance))
        .map(|p| p.id)
}

/// All HOLDING positions whose sell target has been reached, ordered by
/// ascending sell price so liquidation order is deterministic.
pub fn find_sell_positions(positions: &[Position], price: f64) -> Vec<usize> {
    let mut hits: Vec<&Position> = positions
        .iter()
        .filter(|p| p.status == PositionStatus::Holding && price >= p.sell_price)
        .collect();
    hits.sort_by(|a, b| a.sell_price.partial_cmp(&b.sell_price).unwrap_or(std::cmp::Ordering::Equal));
    hits.iter().map(|p| p.id).collect()
}

/// HOLDING positions whose stop trigger has been breached (price at or
/// below `stop_loss_price`). Empty when stop-loss is disabled, because the
/// stored trigger is 0.
pub fn find_stop_loss_positions(positions: &[Position], price: f64) -> Vec<usize> {
    positions
        .iter()
        .filter(|p| {
            p.status == PositionStatus::Holding && p.stop_loss_price > 0.0 && price <= p.stop_loss_price
        })
        .map(|p| p.id)
        .collect()
}

/// Count of positions in BUYING, HOLDING, or SELLING.
pub fn count_active_positions(positions: &[Position]) -> usize {
    positions.iter().filter(|p| p.status.is_active()).count()
}

pub fn grid_stats(positions: &[Position]) -> GridStats {
    let mut stats = GridStats {
        total: positions.len(),
        ..Default::default()
    };

    for p in positions {
        match p.status {
            PositionStatus::Empty => stats.empty += 1,
            PositionStatus::Buying => stats.buying += 1,
            PositionStatus::Holding => stats.holding += 1,
            PositionStatus::Selling => stats.selling += 1,
            PositionStatus::Sold => stats.sold += 1,
        }
    }

    stats.occupancy = if stats.total == 0 {
        0.0
    } else {
        (stats.buying + stats.holding + stats.selling) as f64 / stats.total as f64
    };

    stats
}

/// Per-bucket buy size from a total budget: integer division, with the
/// remainder wei retained by the caller on the first bucket.
pub fn calculate_position_size(total_wei: U256, num_positions: usize) -> U256 {
    if num_positions == 0 {
        return U256::zero();
    }
    total_wei / U256::from(num_positions)
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
