//! Trade accounting: the append-only ledger, P&L aggregates, and CSV export.

pub mod csv_export;
pub mod pnl;

pub use csv_export::export_csv;
pub use pnl::{
    BotPerformance, DailyTrend, LeaderboardEntry, TradeAction, TradeLedger, TradeRecord,
};
