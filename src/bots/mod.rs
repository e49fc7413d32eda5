//! Bot layer: per-bot instances, the tick state machine, and the
//! supervisor that schedules them all.

pub mod instance;
pub mod supervisor;
pub mod trading_bot;

pub use instance::{BotInstance, BotSettings, Mode, VolumeSettings};
pub use supervisor::{HeartbeatSupervisor, SupervisorStatus};
pub use trading_bot::{BotServices, LiquidationReport, TickOutcome, TradingBot};
