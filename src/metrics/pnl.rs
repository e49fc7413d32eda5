//! ═══════════════════════════════════════════════════════════════════════════
//! 📊 TRADE LEDGER & P&L
//!
//! Append-only record of every confirmed transaction, shared by all bots.
//! Records are never mutated or deleted; the position state machine
//! guarantees at most one record per confirmed transaction.
//!
//! Aggregation works per bot (win rate, profit factor, expectancy, hold
//! time) and across the portfolio (leaderboard ranks, daily trend).
//! ═══════════════════════════════════════════════════════════════════════════

use chrono::{DateTime, Duration, Utc};
use ethers::types::{I256, U256};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::utils::format::{day_key, serde_wei, serde_wei_signed, wei_to_eth_string_signed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

/// One confirmed trade. `profit` is meaningful on sells only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub bot_id: Uuid,
    pub bot_name: String,
    pub token_symbol: String,
    pub token_address: String,
    pub action: TradeAction,
    /// Token base units
    #[serde(with = "serde_wei")]
    pub amount: U256,
    /// ETH per token at execution
    pub price: f64,
    #[serde(with = "serde_wei")]
    pub eth_value: U256,
    #[serde(with = "serde_wei")]
    pub gas_cost: U256,
    #[serde(with = "serde_wei_signed")]
    pub profit: I256,
    pub profit_percent: f64,
    pub position_id: Option<usize>,
    pub tx_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-bot aggregate over the ledger.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotPerformance {
    pub bot_id: Uuid,
    pub bot_name: String,
    pub total_trades: usize,
    pub buys: usize,
    pub sells: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Share of winning sells, 0.0..=1.0
    pub win_rate: f64,
    #[serde(with = "serde_wei_signed")]
    pub gross_profit: I256,
    /// Positive magnitude of the summed losses
    #[serde(with = "serde_wei_signed")]
    pub gross_loss: I256,
    #[serde(with = "serde_wei_signed")]
    pub net_profit: I256,
    pub profit_factor: f64,
    /// Expected ETH per closed trade
    pub expectancy_eth: f64,
    pub avg_hold_time_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub performance: BotPerformance,
    pub profit_rank: usize,
    pub win_rate_rank: usize,
    pub efficiency_rank: usize,
    /// round(mean of the three ranks); 1 is best
    pub overall_rank: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTrend {
    pub date: String,
    #[serde(with = "serde_wei_signed")]
    pub profit: I256,
    pub trades: usize,
}

fn eth_f64(v: I256) -> f64 {
    v.to_string().parse::<f64>().unwrap_or(0.0) / 1e18
}

pub struct TradeLedger {
    records: Mutex<Vec<TradeRecord>>,
}

impl TradeLedger {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn with_records(records: Vec<TradeRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    /// Append one confirmed trade. Duplicate tx hashes are the caller's
    /// responsibility; the state machine already guarantees one record per
    /// receipt.
    pub fn record(&self, trade: TradeRecord) {
        log::info!(
            "🧾 {} {:?} {} {} for {} ETH (profit {})",
            trade.bot_name,
            trade.action,
            trade.amount,
            trade.token_symbol,
            crate::utils::format::format_eth(trade.eth_value),
            wei_to_eth_string_signed(trade.profit),
        );
        self.records.lock().push(trade);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn all(&self) -> Vec<TradeRecord> {
        self.records.lock().clone()
    }

    pub fn get_by_bot(
        &self,
        bot_id: Uuid,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Vec<TradeRecord> {
        self.records
            .lock()
            .iter()
            .filter(|t| t.bot_id == bot_id)
            .filter(|t| since.map(|s| t.timestamp >= s).unwrap_or(true))
            .filter(|t| until.map(|u| t.timestamp <= u).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn get_by_token(&self, token_address: &str) -> Vec<TradeRecord> {
        self.records
            .lock()
            .iter()
            .filter(|t| t.token_address.eq_ignore_ascii_case(token_address))
            .cloned()
            .collect()
    }

    /// Aggregate one bot's trades into performance figures.
    pub fn aggregate(&self, bot_id: Uuid) -> Option<BotPerformance> {
        let trades = self.get_by_bot(bot_id, None, None);
        if trades.is_empty() {
            return None;
        }
        Some(Self::aggregate_trades(bot_id, &trades))
    }

    fn aggregate_trades(bot_id: Uuid, trades: &[TradeRecord]) -> BotPerformance {
        let bot_name = trades
            .last()
            .map(|t| t.bot_name.clone())
            .unwrap_or_default();
        let buys = trades.iter().filter(|t| t.action == TradeAction::Buy).count();
        let sells: Vec<&TradeRecord> = trades
            .iter()
            .filter(|t| t.action == TradeAction::Sell)
            .collect();

        let mut gross_profit = I256::zero();
        let mut gross_loss = I256::zero();
        let mut winning = 0usize;
        let mut losing = 0usize;
        for sell in &sells {
            if sell.profit > I256::zero() {
                winning += 1;
                gross_profit += sell.profit;
            } else if sell.profit < I256::zero() {
                losing += 1;
                gross_loss += -sell.profit;
            }
        }

        let win_rate = if sells.is_empty() {
            0.0
        } else {
            winning as f64 / sells.len() as f64
        };

        // profit_factor = gross_profit / max(gross_loss, 1 wei)
        let gl_floor = if gross_loss.is_zero() { I256::one() } else { gross_loss };
        let profit_factor = eth_f64(gross_profit) / eth_f64(gl_floor).max(1e-18);

        let avg_win = if winning > 0 {
            eth_f64(gross_profit) / winning as f64
        } else {
            0.0
        };
        let avg_loss = if losing > 0 {
            eth_f64(gross_loss) / losing as f64
        } else {
            0.0
        };
        let expectancy_eth = win_rate * avg_win - (1.0 - win_rate) * avg_loss;

        // Pair each sell with the buy of the same grid position
        let mut hold_times = Vec::new();
        for sell in &sells {
            let Some(pos) = sell.position_id else { continue };
            let matching_buy = trades
                .iter()
                .filter(|t| {
                    t.action == TradeAction::Buy
                        && t.position_id == Some(pos)
                        && t.timestamp <= sell.timestamp
                })
                .max_by_key(|t| t.timestamp);
            if let Some(buy) = matching_buy {
                let secs = (sell.timestamp - buy.timestamp).num_seconds().max(0) as u64;
                hold_times.push(secs);
            }
        }
        let avg_hold_time_secs = if hold_times.is_empty() {
            None
        } else {
            Some(hold_times.iter().sum::<u64>() / hold_times.len() as u64)
        };

        BotPerformance {
            bot_id,
            bot_name,
            total_trades: trades.len(),
            buys,
            sells: sells.len(),
            winning_trades: winning,
            losing_trades: losing,
            win_rate,
            gross_profit,
            gross_loss,
            net_profit: gross_profit - gross_loss,
            profit_factor,
            expectancy_eth,
            avg_hold_time_secs,
        }
    }

    /// Rank every bot by profit, win rate, and efficiency (profit per
    /// trade); overall rank is the rounded mean of the three.
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let records = self.records.lock();
        let mut by_bot: HashMap<Uuid, Vec<TradeRecord>> = HashMap::new();
        for t in records.iter() {
            by_bot.entry(t.bot_id).or_default().push(t.clone());
        }
        drop(records);

        let perfs: Vec<BotPerformance> = by_bot
            .into_iter()
            .map(|(id, trades)| Self::aggregate_trades(id, &trades))
            .collect();
        if perfs.is_empty() {
            return Vec::new();
        }

        let rank_of = |sorted: &[Uuid], id: Uuid| -> usize {
            sorted.iter().position(|x| *x == id).unwrap_or(0) + 1
        };

        let mut by_profit: Vec<&BotPerformance> = perfs.iter().collect();
        by_profit.sort_by(|a, b| b.net_profit.cmp(&a.net_profit));
        let profit_order: Vec<Uuid> = by_profit.iter().map(|p| p.bot_id).collect();

        let mut by_win: Vec<&BotPerformance> = perfs.iter().collect();
        by_win.sort_by(|a, b| {
            b.win_rate
                .partial_cmp(&a.win_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let win_order: Vec<Uuid> = by_win.iter().map(|p| p.bot_id).collect();

        let efficiency =
            |p: &BotPerformance| eth_f64(p.net_profit) / (p.total_trades.max(1) as f64);
        let mut by_eff: Vec<&BotPerformance> = perfs.iter().collect();
        by_eff.sort_by(|a, b| {
            efficiency(b)
                .partial_cmp(&efficiency(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let eff_order: Vec<Uuid> = by_eff.iter().map(|p| p.bot_id).collect();

        let mut entries: Vec<LeaderboardEntry> = perfs
            .into_iter()
            .map(|performance| {
                let profit_rank = rank_of(&profit_order, performance.bot_id);
                let win_rate_rank = rank_of(&win_order, performance.bot_id);
                let efficiency_rank = rank_of(&eff_order, performance.bot_id);
                let mean =
                    (profit_rank + win_rate_rank + efficiency_rank) as f64 / 3.0;
                LeaderboardEntry {
                    performance,
                    profit_rank,
                    win_rate_rank,
                    efficiency_rank,
                    overall_rank: mean.round() as usize,
                }
            })
            .collect();

        entries.sort_by_key(|e| e.overall_rank);
        entries
    }

    /// Daily profit/trade-count roll-up for the last `days` days, oldest
    /// first, zero-filled for quiet days.
    pub fn trend(&self, bot_id: Uuid, days: u32) -> Vec<DailyTrend> {
        let trades = self.get_by_bot(bot_id, None, None);
        let mut buckets: HashMap<String, (I256, usize)> = HashMap::new();
        for t in &trades {
            let entry = buckets.entry(day_key(t.timestamp)).or_insert((I256::zero(), 0));
            entry.0 += t.profit;
            entry.1 += 1;
        }

        let today = Utc::now();
        (0..days)
            .rev()
            .map(|offset| {
                let date = day_key(today - Duration::days(offset as i64));
                let (profit, trades) = buckets.get(&date).copied().unwrap_or((I256::zero(), 0));
                DailyTrend {
                    date,
                    profit,
                    trades,
                }
            })
            .collect()
    }
}

impl Default for TradeLedger {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(
        bot_id: Uuid,
        action: TradeAction,
        profit_eth_milli: i64,
        position_id: usize,
        at: DateTime<Utc>,
    ) -> TradeRecord {
        TradeRecord {
            bot_id,
            bot_name: "test-bot".into(),
            token_symbol: "TKN".into(),
            token_address: "0xabc".into(),
            action,
            amount: U256::from(1_000u64),
            price: 0.001,
            eth_value: U256::from(10u64).pow(U256::from(15u8)),
            gas_cost: U256::from(1_000u64),
            profit: I256::from(profit_eth_milli) * I256::exp10(15),
            profit_percent: 0.0,
            position_id: Some(position_id),
            tx_hash: format!("0x{:x}", at.timestamp_nanos_opt().unwrap_or(0)),
            timestamp: at,
        }
    }

    #[test]
    fn test_append_and_query() {
        let ledger = TradeLedger::new();
        let bot_a = Uuid::new_v4();
        let bot_b = Uuid::new_v4();
        let now = Utc::now();

        ledger.record(trade(bot_a, TradeAction::Buy, 0, 0, now - Duration::hours(2)));
        ledger.record(trade(bot_a, TradeAction::Sell, 10, 0, now - Duration::hours(1)));
        ledger.record(trade(bot_b, TradeAction::Buy, 0, 0, now));

        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.get_by_bot(bot_a, None, None).len(), 2);
        assert_eq!(
            ledger
                .get_by_bot(bot_a, Some(now - Duration::minutes(90)), None)
                .len(),
            1
        );
        assert_eq!(ledger.get_by_token("0xABC").len(), 3);
        assert_eq!(ledger.get_by_token("0xdead").len(), 0);
    }

    #[test]
    fn test_aggregate_win_rate_and_profit_factor() {
        let ledger = TradeLedger::new();
        let bot = Uuid::new_v4();
        let now = Utc::now();

        // 3 closed trades: +20, +10, -10 milli-ETH
        ledger.record(trade(bot, TradeAction::Buy, 0, 0, now - Duration::hours(4)));
        ledger.record(trade(bot, TradeAction::Sell, 20, 0, now - Duration::hours(3)));
        ledger.record(trade(bot, TradeAction::Buy, 0, 1, now - Duration::hours(3)));
        ledger.record(trade(bot, TradeAction::Sell, 10, 1, now - Duration::hours(2)));
        ledger.record(trade(bot, TradeAction::Buy, 0, 2, now - Duration::hours(2)));
        ledger.record(trade(bot, TradeAction::Sell, -10, 2, now - Duration::hours(1)));

        let perf = ledger.aggregate(bot).unwrap();
        assert_eq!(perf.total_trades, 6);
        assert_eq!(perf.buys, 3);
        assert_eq!(perf.sells, 3);
        assert_eq!(perf.winning_trades, 2);
        assert_eq!(perf.losing_trades, 1);
        assert!((perf.win_rate - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(perf.net_profit, I256::from(20) * I256::exp10(15));
        // 30 profit / 10 loss
        assert!((perf.profit_factor - 3.0).abs() < 1e-9);
        // expectancy = 2/3 * 0.015 - 1/3 * 0.01 = 0.006666...
        assert!((perf.expectancy_eth - (2.0 / 3.0 * 0.015 - 1.0 / 3.0 * 0.01)).abs() < 1e-12);
        assert_eq!(perf.avg_hold_time_secs, Some(3_600));
    }

    #[test]
    fn test_aggregate_empty_is_none() {
        let ledger = TradeLedger::new();
        assert!(ledger.aggregate(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_leaderboard_ranks() {
        let ledger = TradeLedger::new();
        let winner = Uuid::new_v4();
        let loser = Uuid::new_v4();
        let now = Utc::now();

        ledger.record(trade(winner, TradeAction::Buy, 0, 0, now - Duration::hours(2)));
        ledger.record(trade(winner, TradeAction::Sell, 50, 0, now - Duration::hours(1)));
        ledger.record(trade(loser, TradeAction::Buy, 0, 0, now - Duration::hours(2)));
        ledger.record(trade(loser, TradeAction::Sell, -50, 0, now - Duration::hours(1)));

        let board = ledger.leaderboard();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].performance.bot_id, winner);
        assert_eq!(board[0].profit_rank, 1);
        assert_eq!(board[0].overall_rank, 1);
        assert_eq!(board[1].profit_rank, 2);
    }

    #[test]
    fn test_trend_zero_fills() {
        let ledger = TradeLedger::new();
        let bot = Uuid::new_v4();
        let now = Utc::now();

        ledger.record(trade(bot, TradeAction::Sell, 10, 0, now));
        ledger.record(trade(bot, TradeAction::Sell, 5, 1, now));

        let trend = ledger.trend(bot, 3);
        assert_eq!(trend.len(), 3);
        assert_eq!(trend[2].date, day_key(now));
        assert_eq!(trend[2].trades, 2);
        assert_eq!(trend[2].profit, I256::from(15) * I256::exp10(15));
        assert_eq!(trend[0].trades, 0);
        assert!(trend[0].profit.is_zero());
    }
}
