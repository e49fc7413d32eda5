//! ═══════════════════════════════════════════════════════════════════════════
//! BOT INSTANCE - Per-Bot Persistent State
//!
//! Everything a bot carries across restarts: identity, per-bot settings,
//! the grid positions, lifetime counters, and the VOLUME-mode accumulator.
//! Pure data; behavior lives in `trading_bot.rs`.
//!
//! Ownership: an instance is exclusively owned by the worker currently
//! ticking it. The supervisor's busy flag guarantees no two ticks of the
//! same bot ever overlap.
//! ═══════════════════════════════════════════════════════════════════════════

use chrono::{DateTime, Utc};
use ethers::types::{I256, U256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::EngineResult;
use crate::trading::grid::{self, GridSettings};
use crate::trading::position::Position;
use crate::utils::format::{serde_wei, serde_wei_signed};

/// VOLUME-mode parameters: repeated fixed-size buys into one accumulator,
/// flushed with a single sell each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSettings {
    pub volume_buys_per_cycle: u32,
    #[serde(with = "serde_wei")]
    pub volume_buy_amount_wei: U256,
}

/// Trading mode. Grid mode owns a position array; volume mode never
/// touches the grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "UPPERCASE")]
pub enum Mode {
    Grid(GridSettings),
    Volume(VolumeSettings),
}

impl Mode {
    pub fn as_grid(&self) -> Option<&GridSettings> {
        match self {
            Mode::Grid(s) => Some(s),
            Mode::Volume(_) => None,
        }
    }

    pub fn as_volume(&self) -> Option<&VolumeSettings> {
        match self {
            Mode::Volume(s) => Some(s),
            Mode::Grid(_) => None,
        }
    }
}

/// Mode-independent per-bot knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotSettings {
    pub heartbeat_ms: u64,
    /// Base ticks to skip between heartbeats (throttling slow bots)
    pub skip_heartbeats: u32,
    pub buys_enabled: bool,
    pub sells_enabled: bool,
    /// Minimum oracle confidence for this bot to act on a price
    pub min_confidence: f64,
    pub slippage_bps: u32,
    /// Replace submission with synthetic success (no chain writes)
    pub dry_run: bool,
    /// ETH kept aside for gas; a buy must leave this untouched
    #[serde(with = "serde_wei")]
    pub gas_reserve_wei: U256,
    #[serde(flatten)]
    pub mode: Mode,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            heartbeat_ms: 30_000,
            skip_heartbeats: 0,
            buys_enabled: true,
            sells_enabled: true,
            min_confidence: 0.5,
            slippage_bps: 100,
            dry_run: false,
            gas_reserve_wei: U256::exp10(15), // 0.001 ETH
            mode: Mode::Grid(GridSettings {
                num_positions: 10,
                floor_price: 0.0005,
                ceiling_price: 0.002,
                take_profit_percent: 10.0,
                stop_loss_percent: 0.0,
                stop_loss_enabled: false,
                moon_bag_enabled: false,
                moon_bag_percent: 0.0,
                min_profit_percent: 1.0,
                max_active_positions: 10,
                use_fixed_buy_amount: false,
                buy_amount_wei: U256::zero(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotInstance {
    pub id: Uuid,
    pub name: String,
    pub chain: String,
    pub token_address: String,
    pub token_symbol: String,
    pub wallet_address: String,
    pub use_main_wallet: bool,

    pub settings: BotSettings,
    /// Grid mode only; always empty in volume mode
    pub positions: Vec<Position>,

    pub total_buys: u64,
    pub total_sells: u64,
    #[serde(with = "serde_wei_signed")]
    pub total_profit_eth: I256,

    pub current_price: f64,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub enabled: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,

    // VOLUME-mode runtime state
    pub volume_buys_in_cycle: u32,
    #[serde(with = "serde_wei")]
    pub volume_accumulated_tokens: U256,
    pub volume_cycle_count: u64,
    /// ETH spent (incl. gas) on the current accumulation cycle
    #[serde(with = "serde_wei", default)]
    pub volume_cycle_cost: U256,

    pub consecutive_error_count: u32,
}

impl BotInstance {
    /// Create a bot; grid mode generates its position array immediately.
    pub fn new(
        name: String,
        chain: String,
        token_address: String,
        token_symbol: String,
        wallet_address: String,
        use_main_wallet: bool,
        settings: BotSettings,
        current_price: f64,
    ) -> EngineResult<Self> {
        let positions = match &settings.mode {
            Mode::Grid(grid_settings) => grid::generate_grid(current_price, grid_settings)?,
            Mode::Volume(_) => Vec::new(),
        };

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            chain,
            token_address,
            token_symbol,
            wallet_address,
            use_main_wallet,
            settings,
            positions,
            total_buys: 0,
            total_sells: 0,
            total_profit_eth: I256::zero(),
            current_price,
            last_trade_at: None,
            is_running: true,
            enabled: true,
            last_heartbeat: None,
            created_at: now,
            last_updated: now,
            volume_buys_in_cycle: 0,
            volume_accumulated_tokens: U256::zero(),
            volume_cycle_count: 0,
            volume_cycle_cost: U256::zero(),
            consecutive_error_count: 0,
        })
    }

    pub fn grid_settings(&self) -> Option<&GridSettings> {
        self.settings.mode.as_grid()
    }

    pub fn is_volume_mode(&self) -> bool {
        matches!(self.settings.mode, Mode::Volume(_))
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_bot() -> BotInstance {
        BotInstance::new(
            "grid-1".into(),
            "base".into(),
            "0xabc".into(),
            "TKN".into(),
            "0xwallet".into(),
            false,
            BotSettings::default(),
            0.001,
        )
        .unwrap()
    }

    #[test]
    fn test_grid_bot_gets_positions() {
        let bot = grid_bot();
        assert_eq!(bot.positions.len(), 10);
        assert!(bot.is_running);
        assert!(bot.enabled);
        assert!(bot.total_profit_eth.is_zero());
    }

    #[test]
    fn test_volume_bot_has_no_grid() {
        let settings = BotSettings {
            mode: Mode::Volume(VolumeSettings {
                volume_buys_per_cycle: 5,
                volume_buy_amount_wei: U256::exp10(15),
            }),
            ..Default::default()
        };
        let bot = BotInstance::new(
            "vol-1".into(),
            "base".into(),
            "0xabc".into(),
            "TKN".into(),
            "0xwallet".into(),
            false,
            settings,
            0.001,
        )
        .unwrap();

        assert!(bot.positions.is_empty());
        assert!(bot.is_volume_mode());
    }

    #[test]
    fn test_invalid_grid_rejected_at_creation() {
        let mut settings = BotSettings::default();
        if let Mode::Grid(ref mut g) = settings.mode {
            g.ceiling_price = g.floor_price; // degenerate range
        }
        let result = BotInstance::new(
            "bad".into(),
            "base".into(),
            "0xabc".into(),
            "TKN".into(),
            "0xwallet".into(),
            false,
            settings,
            0.001,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_serde_round_trip_preserves_mode() {
        let bot = grid_bot();
        let json = serde_json::to_string(&bot).unwrap();
        assert!(json.contains("\"mode\":\"GRID\""));

        let back: BotInstance = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, bot.id);
        assert_eq!(back.positions.len(), bot.positions.len());
        assert!(back.grid_settings().is_some());
    }
}
