//! Trade history CSV export
//!
//! One row per confirmed trade, ISO-8601 UTC timestamps, wei rendered as
//! fixed-point ETH decimals.

use anyhow::{Context, Result};
use log::info;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::metrics::pnl::{TradeAction, TradeRecord};
use crate::utils::format::{wei_to_eth_string, wei_to_eth_string_signed};

const CSV_HEADER: &str = "Date,Time,Bot Id,Bot Name,Token Symbol,Token Address,Action,Amount,Price,ETH Value,Gas Cost,Profit,Profit %,Position Id,Tx Hash";

/// Write the full trade history to `path`, overwriting any previous export.
pub fn export_csv(trades: &[TradeRecord], path: &Path) -> Result<usize> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to open export file {}", path.display()))?;

    writeln!(file, "{}", CSV_HEADER)?;

    for trade in trades {
        writeln!(file, "{}", render_row(trade))?;
    }

    info!("📊 Exported {} trade(s) to {}", trades.len(), path.display());
    Ok(trades.len())
}

fn render_row(trade: &TradeRecord) -> String {
    let action = match trade.action {
        TradeAction::Buy => "buy",
        TradeAction::Sell => "sell",
    };

    format!(
        "{},{},{},{},{},{},{},{},{},{},{},{},{:.4},{},{}",
        trade.timestamp.format("%Y-%m-%d"),
        trade.timestamp.format("%H:%M:%SZ"),
        trade.bot_id,
        escape(&trade.bot_name),
        escape(&trade.token_symbol),
        trade.token_address,
        action,
        trade.amount,
        trade.price,
        wei_to_eth_string(trade.eth_value),
        wei_to_eth_string(trade.gas_cost),
        wei_to_eth_string_signed(trade.profit),
        trade.profit_percent,
        trade
            .position_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
        trade.tx_hash,
    )
}

/// Commas and quotes in user-supplied names would break the row layout.
fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ethers::types::{I256, U256};
    use uuid::Uuid;

    fn sample() -> TradeRecord {
        TradeRecord {
            bot_id: Uuid::nil(),
            bot_name: "eth, grinder".into(),
            token_symbol: "TKN".into(),
            token_address: "0xabc".into(),
            action: TradeAction::Sell,
            amount: U256::from(5_000u64),
            price: 0.00135,
            eth_value: U256::from(1_500_000_000_000_000u64),
            gas_cost: U256::from(21_000_000_000_000u64),
            profit: I256::from(250_000_000_000_000i64),
            profit_percent: 20.0,
            position_id: Some(0),
            tx_hash: "0xfeed".into(),
            timestamp: chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 45).unwrap(),
        }
    }

    #[test]
    fn test_row_layout() {
        let row = render_row(&sample());
        assert!(row.starts_with("2026-03-01,12:30:45Z,"));
        assert!(row.contains(",sell,"));
        assert!(row.contains(",0.0015,"));
        assert!(row.contains(",0.000021,"));
        assert!(row.contains(",0.00025,"));
        assert!(row.ends_with(",0,0xfeed"));
        // Comma in the bot name is quoted, keeping the column count stable
        assert!(row.contains("\"eth, grinder\""));
        assert_eq!(row.matches(',').count(), CSV_HEADER.matches(',').count() + 1);
    }

    #[test]
    fn test_export_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.csv");

        let count = export_csv(&[sample(), sample()], &path).unwrap();
        assert_eq!(count, 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
    }
}
