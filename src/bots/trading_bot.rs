//! ═══════════════════════════════════════════════════════════════════════════
//! 🤖 TRADING BOT - Per-Bot Tick State Machine
//!
//! One tick walks the full control loop:
//!   gate → price fetch → receipt reconciliation → sell phase → buy phase
//!   → error gate
//!
//! Sells always run before buys so completed round trips free their
//! buckets in the same tick. Every state transition is persisted before
//! the next suspension point, so a crash anywhere leaves the store one
//! reconcile away from consistency.
//!
//! The tick never propagates an error: failures are classified, logged
//! once with bot id / tick id / step, counted where the taxonomy says so,
//! and the bot stops itself after five consecutive counted errors or any
//! fatal one.
//! ═══════════════════════════════════════════════════════════════════════════

use chrono::Utc;
use ethers::signers::LocalWallet;
use ethers::types::{Address, I256, U256};
use log::{debug, info, warn};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::bots::instance::{BotInstance, VolumeSettings};
use crate::dex::{DexClient, QuoteRequest, SwapQuote};
use crate::errors::{EngineError, EngineResult};
use crate::metrics::pnl::{TradeAction, TradeLedger, TradeRecord};
use crate::persistence::BotStore;
use crate::risk::circuit_breaker::CircuitBreaker;
use crate::rpc::ChainClient;
use crate::security::vault::SigningVault;
use crate::trading::grid;
use crate::trading::position::PositionStatus;
use crate::trading::price_oracle::{PriceData, PriceOracle};
use crate::utils::alerts::{AlertEvent, AlertHub};
use crate::utils::format::{format_eth, format_eth_signed, truncate_hash};

/// Consecutive counted errors before a bot stops itself
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Bounded receipt probe during reconciliation (the full wait already
/// happened in the tick that submitted the transaction)
const RECONCILE_RECEIPT_WAIT_SECS: u64 = 10;

/// Everything a bot needs from the outside world, injected once at
/// construction. All handles are capability interfaces so tests can swap
/// in fakes.
pub struct BotServices {
    pub oracle: Arc<PriceOracle>,
    pub dex: Arc<dyn DexClient>,
    pub chain: Arc<dyn ChainClient>,
    pub vault: Arc<dyn SigningVault>,
    pub store: Arc<BotStore>,
    pub breaker: Arc<CircuitBreaker>,
    pub ledger: Arc<TradeLedger>,
    pub alerts: Arc<AlertHub>,
    pub receipt_timeout: Duration,
}

/// What a tick did, for the supervisor's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Bot disabled or stopped
    Skipped,
    /// No usable price this tick
    NoPrice,
    /// Price observed, nothing to do
    Idle,
    Traded { buys: usize, sells: usize },
    /// The error gate or a fatal error stopped the bot
    Halted { reason: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LiquidationReport {
    pub success: usize,
    pub failed: usize,
}

pub struct TradingBot {
    bot: BotInstance,
    token: Address,
    taker: Address,
    services: Arc<BotServices>,
    tick_seq: u64,
    /// Whether the current tick hit any counted error; gates the
    /// consecutive-error reset at tick end
    tick_had_counted_error: bool,
}

// ═══════════════════════════════════════════════════════════════════════════
// PURE HELPERS
// ═══════════════════════════════════════════════════════════════════════════

/// Minimum-profit gate, computed against the ETH cost basis in integer
/// wei: `eth_out >= cost * (1 + min_profit_percent/100)`.
pub fn is_profitable(eth_out: U256, eth_cost_basis: U256, min_profit_percent: f64) -> bool {
    if eth_cost_basis.is_zero() {
        return !eth_out.is_zero();
    }
    let bps = (min_profit_percent * 100.0).round().max(0.0) as u64;
    eth_out * U256::from(10_000u64) >= eth_cost_basis * U256::from(10_000 + bps)
}

/// Tokens to sell after the moon bag is held back. The retained residue
/// stays in the wallet and never re-enters the grid.
pub fn sell_amount_after_moon_bag(tokens: U256, enabled: bool, moon_bag_percent: f64) -> U256 {
    if !enabled || moon_bag_percent <= 0.0 {
        return tokens;
    }
    let keep_bps = (moon_bag_percent * 100.0).round().min(10_000.0) as u64;
    tokens * U256::from(10_000 - keep_bps) / U256::from(10_000u64)
}

fn to_signed(v: U256) -> I256 {
    I256::try_from(v).unwrap_or(I256::MAX)
}

// ═══════════════════════════════════════════════════════════════════════════
// BOT
// ═══════════════════════════════════════════════════════════════════════════

impl TradingBot {
    pub fn new(bot: BotInstance, services: Arc<BotServices>) -> EngineResult<Self> {
        let token = Address::from_str(&bot.token_address).map_err(|e| {
            EngineError::Configuration(format!("bot {} token address: {}", bot.name, e))
        })?;
        let taker = Address::from_str(&bot.wallet_address).map_err(|e| {
            EngineError::Configuration(format!("bot {} wallet address: {}", bot.name, e))
        })?;

        Ok(Self {
            bot,
            token,
            taker,
            services,
            tick_seq: 0,
            tick_had_counted_error: false,
        })
    }

    pub fn instance(&self) -> &BotInstance {
        &self.bot
    }

    pub fn instance_mut(&mut self) -> &mut BotInstance {
        &mut self.bot
    }

    pub fn into_instance(self) -> BotInstance {
        self.bot
    }

    async fn signer(&self) -> EngineResult<LocalWallet> {
        self.services.vault.signer_for(&self.bot.wallet_address).await
    }

    async fn persist(&mut self) -> EngineResult<()> {
        self.bot.touch();
        self.services.store.save_bot(&self.bot).await
    }

    /// Log an error once (bot id, tick id, step) and apply the taxonomy:
    /// count it, and stop the bot if it is fatal.
    async fn note_error(&mut self, err: &EngineError, step: &str) {
        warn!(
            "Bot {} tick {} step {}: {}",
            self.bot.id, self.tick_seq, step, err
        );

        if err.counts_against_errors() {
            self.bot.consecutive_error_count += 1;
            self.tick_had_counted_error = true;
            self.services
                .alerts
                .send(AlertEvent::Error {
                    bot_name: self.bot.name.clone(),
                    step: step.to_string(),
                    message: err.to_string(),
                })
                .await;
        }

        if err.is_fatal() {
            self.stop_bot(format!("fatal {} error: {}", err.kind(), err))
                .await;
        }
    }

    async fn stop_bot(&mut self, reason: String) {
        warn!("🛑 Bot {} ({}) stopping: {}", self.bot.name, self.bot.id, reason);
        self.bot.is_running = false;
        if let Err(e) = self.persist().await {
            warn!("Bot {} could not persist its stop: {}", self.bot.id, e);
        }
        self.services
            .alerts
            .send(AlertEvent::StatusChange {
                bot_name: self.bot.name.clone(),
                running: false,
                reason,
            })
            .await;
    }

    /// Σ total_profit_eth over every persisted bot; this bot's in-memory
    /// copy is already durable at each mutation boundary.
    async fn portfolio_profit(&self) -> I256 {
        self.services
            .store
            .bots()
            .await
            .iter()
            .fold(I256::zero(), |acc, b| acc + b.total_profit_eth)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Tick
    // ───────────────────────────────────────────────────────────────────────

    pub async fn tick(&mut self) -> TickOutcome {
        self.tick_seq += 1;
        self.tick_had_counted_error = false;

        // 1. Gate
        if !self.bot.enabled || !self.bot.is_running {
            return TickOutcome::Skipped;
        }

        // 2. Price
        let price = match self.services.oracle.get_price(self.token).await {
            Some(p) => p,
            None => {
                let err = EngineError::PriceUnavailable("no source answered".into());
                self.note_error(&err, "price").await;
                return self.finish_tick(TickOutcome::NoPrice).await;
            }
        };
        if price.confidence < self.bot.settings.min_confidence {
            let err = EngineError::PriceUnavailable(format!(
                "confidence {:.2} below bot threshold {:.2} (source {})",
                price.confidence, self.bot.settings.min_confidence, price.source
            ));
            self.note_error(&err, "price").await;
            return self.finish_tick(TickOutcome::NoPrice).await;
        }

        // 3. Observation
        self.bot.current_price = price.price;
        debug!(
            "Bot {} tick {}: price {:.10} ({}, conf {:.2})",
            self.bot.name, self.tick_seq, price.price, price.source, price.confidence
        );

        // 3b. Resolve any transaction left pending by a previous tick or a
        // crash before trading on stale bucket states
        if let Err(e) = self.reconcile().await {
            self.note_error(&e, "reconcile").await;
            return self.finish_tick(TickOutcome::Idle).await;
        }

        if self.bot.is_volume_mode() {
            let outcome = self.volume_tick().await;
            return self.finish_tick(outcome).await;
        }

        let mut sells = 0usize;
        let mut buys = 0usize;

        // 4. Sell phase (frees buckets before the buy phase runs)
        if self.bot.settings.sells_enabled {
            for idx in grid::find_sell_positions(&self.bot.positions, price.price) {
                match self.execute_sell(idx, false).await {
                    Ok(true) => sells += 1,
                    Ok(false) => {}
                    Err(e) => self.note_error(&e, "sell").await,
                }
                if !self.bot.is_running {
                    return TickOutcome::Halted {
                        reason: "stopped during sell phase".into(),
                    };
                }
            }

            // Stop-loss exits: cut losers regardless of minimum profit
            for idx in grid::find_stop_loss_positions(&self.bot.positions, price.price) {
                match self.execute_sell(idx, true).await {
                    Ok(true) => sells += 1,
                    Ok(false) => {}
                    Err(e) => self.note_error(&e, "stop-loss").await,
                }
                if !self.bot.is_running {
                    return TickOutcome::Halted {
                        reason: "stopped during stop-loss phase".into(),
                    };
                }
            }
        }

        // 5. Buy phase. A tick that just sold stands down until the next
        // beat so freed capital and balances settle before re-entering.
        if sells == 0 {
            match self.try_buy_phase(&price).await {
                Ok(true) => buys += 1,
                Ok(false) => {}
                Err(e) => self.note_error(&e, "buy").await,
            }
        }

        let outcome = if buys + sells > 0 {
            TickOutcome::Traded { buys, sells }
        } else {
            TickOutcome::Idle
        };
        self.finish_tick(outcome).await
    }

    /// 6. Error gate, shared by every tick exit path. A fully clean tick
    /// (price observed, no counted error anywhere) clears the consecutive
    /// error streak.
    async fn finish_tick(&mut self, outcome: TickOutcome) -> TickOutcome {
        if self.bot.is_running && self.bot.consecutive_error_count >= MAX_CONSECUTIVE_ERRORS {
            let reason = format!(
                "{} consecutive errors",
                self.bot.consecutive_error_count
            );
            self.stop_bot(reason.clone()).await;
            return TickOutcome::Halted { reason };
        }
        if !self.tick_had_counted_error && outcome != TickOutcome::NoPrice {
            self.bot.consecutive_error_count = 0;
        }
        if let Err(e) = self.persist().await {
            let err = EngineError::Persistence(e.to_string());
            self.note_error(&err, "persist").await;
            return TickOutcome::Halted {
                reason: "persistence failure".into(),
            };
        }
        outcome
    }

    // ───────────────────────────────────────────────────────────────────────
    // Buy phase
    // ───────────────────────────────────────────────────────────────────────

    async fn try_buy_phase(&mut self, price: &PriceData) -> EngineResult<bool> {
        let Some(grid_settings) = self.bot.grid_settings().cloned() else {
            return Ok(false);
        };

        if !self.bot.settings.buys_enabled {
            return Ok(false);
        }

        // Portfolio-wide risk gate before every buy attempt
        let verdict = self
            .services
            .breaker
            .check(self.portfolio_profit().await, Utc::now())
            .await;
        if verdict.newly_triggered {
            let snapshot = self.services.breaker.snapshot().await;
            self.services.store.set_circuit_breaker(snapshot).await?;
            self.services
                .alerts
                .send(AlertEvent::CircuitBreaker {
                    reason: verdict.reason.clone().unwrap_or_default(),
                    daily_loss_percent: verdict.daily_loss_percent,
                    total_loss_percent: verdict.total_loss_percent,
                })
                .await;
        }
        if verdict.triggered {
            debug!("Bot {}: buy suppressed (circuit breaker)", self.bot.name);
            return Ok(false);
        }

        if grid::count_active_positions(&self.bot.positions) >= grid_settings.max_active_positions {
            debug!("Bot {}: buy suppressed (max active positions)", self.bot.name);
            return Ok(false);
        }

        let Some(idx) = grid::find_buy_position(&self.bot.positions, price.price, 0.0) else {
            return Ok(false);
        };

        // Sizing: fixed amount, or an equal split of the wallet with the
        // division remainder going to the first bucket
        let available = self.services.chain.eth_balance(self.taker).await?;
        let buy_amount = if grid_settings.use_fixed_buy_amount {
            grid_settings.buy_amount_wei
        } else {
            let per_bucket =
                grid::calculate_position_size(available, grid_settings.num_positions);
            if idx == 0 {
                per_bucket + available % U256::from(grid_settings.num_positions)
            } else {
                per_bucket
            }
        };
        if buy_amount.is_zero() {
            return Ok(false);
        }

        if available <= buy_amount + self.bot.settings.gas_reserve_wei {
            debug!(
                "Bot {}: buy skipped, balance {} cannot cover {} + gas reserve",
                self.bot.name,
                format_eth(available),
                format_eth(buy_amount)
            );
            return Ok(false);
        }

        self.execute_buy(idx, buy_amount).await
    }

    async fn execute_buy(&mut self, idx: usize, buy_amount: U256) -> EngineResult<bool> {
        let request = QuoteRequest::buy(
            self.token,
            buy_amount,
            self.taker,
            self.bot.settings.slippage_bps,
        );
        let quote = self
            .services
            .dex
            .quote(&request)
            .await?
            .ok_or_else(|| EngineError::QuoteFailure("aggregator returned no buy route".into()))?;

        if self.bot.settings.dry_run {
            info!(
                "🟢 BUY filled: bot={} position={} tokens={} cost={} ETH tx={} (dry-run)",
                self.bot.name,
                idx,
                quote.buy_amount,
                format_eth(quote.sell_amount),
                "0xdry"
            );
            return Ok(false);
        }

        // Commit the bucket before any chain write
        self.bot.positions[idx].begin_buy(quote.sell_amount, quote.buy_amount);
        self.persist().await?;

        let signer = match self.signer().await {
            Ok(s) => s,
            Err(e) => {
                self.bot.positions[idx].revert_buy();
                self.persist().await?;
                return Err(e);
            }
        };

        let envelope = quote.envelope()?;
        let tx_hash = match self.services.chain.submit(&signer, &envelope).await {
            Ok(hash) => hash,
            Err(e) => {
                self.bot.positions[idx].revert_buy();
                self.persist().await?;
                return Err(e);
            }
        };
        self.bot.positions[idx].buy_submitted(tx_hash.clone());
        self.persist().await?;

        let outcome = self
            .services
            .chain
            .await_receipt(&tx_hash, self.services.receipt_timeout)
            .await?;
        match outcome {
            None => {
                // Still pending: the position stays BUYING and the next
                // reconcile pass resolves it
                Err(EngineError::TransactionFailure(format!(
                    "buy {} not mined within the receipt window",
                    truncate_hash(&tx_hash)
                )))
            }
            Some(o) if o.success => {
                let gas_cost = o.gas_cost();
                let eth_cost = quote.sell_amount + gas_cost;
                self.settle_buy(idx, quote.buy_amount, eth_cost, gas_cost, &tx_hash)
                    .await?;
                Ok(true)
            }
            Some(_) => {
                self.bot.positions[idx].revert_buy();
                self.persist().await?;
                Err(EngineError::TransactionFailure(format!(
                    "buy {} reverted on-chain",
                    truncate_hash(&tx_hash)
                )))
            }
        }
    }

    async fn settle_buy(
        &mut self,
        idx: usize,
        tokens_received: U256,
        eth_cost: U256,
        gas_cost: U256,
        tx_hash: &str,
    ) -> EngineResult<()> {
        let now = Utc::now();
        self.bot.positions[idx].confirm_buy(tokens_received, eth_cost, now);
        self.bot.total_buys += 1;
        self.bot.last_trade_at = Some(now);
        self.persist().await?;

        info!(
            "🟢 BUY filled: bot={} position={} tokens={} cost={} ETH tx={}",
            self.bot.name,
            idx,
            tokens_received,
            format_eth(eth_cost),
            truncate_hash(tx_hash)
        );

        let trade = TradeRecord {
            bot_id: self.bot.id,
            bot_name: self.bot.name.clone(),
            token_symbol: self.bot.token_symbol.clone(),
            token_address: self.bot.token_address.clone(),
            action: TradeAction::Buy,
            amount: tokens_received,
            price: self.bot.current_price,
            eth_value: eth_cost - gas_cost,
            gas_cost,
            profit: I256::zero(),
            profit_percent: 0.0,
            position_id: Some(idx),
            tx_hash: tx_hash.to_string(),
            timestamp: now,
        };
        self.services.ledger.record(trade.clone());
        self.services.store.append_trade(&trade).await?;

        self.services
            .alerts
            .send(AlertEvent::Trade {
                bot_name: self.bot.name.clone(),
                action: "buy".into(),
                token_symbol: self.bot.token_symbol.clone(),
                amount: tokens_received.to_string(),
                eth_value: format_eth(eth_cost),
                tx_hash: tx_hash.to_string(),
            })
            .await;
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Sell phase
    // ───────────────────────────────────────────────────────────────────────

    /// Sell one HOLDING position. Returns Ok(false) on a soft skip (not
    /// profitable enough, dry-run).
    async fn execute_sell(&mut self, idx: usize, ignore_min_profit: bool) -> EngineResult<bool> {
        let (tokens_held, eth_cost, min_profit, moon_enabled, moon_pct) = {
            let settings = self.bot.grid_settings().ok_or_else(|| {
                EngineError::Configuration("sell phase requires grid mode".into())
            })?;
            let p = &self.bot.positions[idx];
            if p.status != PositionStatus::Holding {
                return Ok(false);
            }
            (
                p.tokens_received,
                p.eth_cost,
                settings.min_profit_percent,
                settings.moon_bag_enabled,
                settings.moon_bag_percent,
            )
        };

        let sell_tokens = if ignore_min_profit {
            // Liquidation and stop-loss exits flush the full position
            tokens_held
        } else {
            sell_amount_after_moon_bag(tokens_held, moon_enabled, moon_pct)
        };
        if sell_tokens.is_zero() {
            return Ok(false);
        }

        let request = QuoteRequest::sell(
            self.token,
            sell_tokens,
            self.taker,
            self.bot.settings.slippage_bps,
        );
        let quote = self
            .services
            .dex
            .quote(&request)
            .await?
            .ok_or_else(|| EngineError::QuoteFailure("aggregator returned no sell route".into()))?;

        if !ignore_min_profit && !is_profitable(quote.buy_amount, eth_cost, min_profit) {
            debug!(
                "Bot {} position {}: sell skipped, {} ETH under the {:.2}% minimum over cost {}",
                self.bot.name,
                idx,
                format_eth(quote.buy_amount),
                min_profit,
                format_eth(eth_cost)
            );
            return Ok(false);
        }

        if self.bot.settings.dry_run {
            info!(
                "🔴 SELL filled: bot={} position={} tokens={} received={} ETH profit={} tx={} (dry-run)",
                self.bot.name,
                idx,
                sell_tokens,
                format_eth(quote.buy_amount),
                format_eth_signed(to_signed(quote.buy_amount) - to_signed(eth_cost)),
                "0xdry"
            );
            return Ok(false);
        }

        self.bot.positions[idx].begin_sell(sell_tokens, quote.buy_amount);
        self.persist().await?;

        match self.submit_sell(idx, sell_tokens, &quote).await {
            Ok(executed) => Ok(executed),
            Err(e) => {
                // Roll back only when nothing can be in flight; a receipt
                // timeout keeps the position SELLING for the reconciler
                if self.bot.positions[idx].status == PositionStatus::Selling
                    && self.bot.positions[idx].sell_tx_hash.is_none()
                {
                    self.bot.positions[idx].revert_sell();
                    self.persist().await?;
                }
                Err(e)
            }
        }
    }

    async fn submit_sell(
        &mut self,
        idx: usize,
        sell_tokens: U256,
        quote: &SwapQuote,
    ) -> EngineResult<bool> {
        let signer = self.signer().await?;

        // Exact-amount approval for the aggregator's spender, confirmed
        // before the swap goes out
        if let Some(spender) = quote.allowance_target()? {
            let approval_hash = self
                .services
                .chain
                .approve(&signer, self.token, spender, sell_tokens)
                .await?;
            match self
                .services
                .chain
                .await_receipt(&approval_hash, self.services.receipt_timeout)
                .await?
            {
                Some(o) if o.success => {
                    debug!(
                        "Bot {}: approval {} confirmed",
                        self.bot.name,
                        truncate_hash(&approval_hash)
                    );
                }
                _ => {
                    return Err(EngineError::TransactionFailure(format!(
                        "approval {} failed or timed out",
                        truncate_hash(&approval_hash)
                    )));
                }
            }
        }

        let envelope = quote.envelope()?;
        let tx_hash = self.services.chain.submit(&signer, &envelope).await?;
        self.bot.positions[idx].sell_submitted(tx_hash.clone());
        self.persist().await?;

        let outcome = self
            .services
            .chain
            .await_receipt(&tx_hash, self.services.receipt_timeout)
            .await?;
        match outcome {
            None => Err(EngineError::TransactionFailure(format!(
                "sell {} not mined within the receipt window",
                truncate_hash(&tx_hash)
            ))),
            Some(o) if o.success => {
                let gas_cost = o.gas_cost();
                self.settle_sell(idx, sell_tokens, quote.buy_amount, gas_cost, &tx_hash)
                    .await?;
                Ok(true)
            }
            Some(_) => {
                self.bot.positions[idx].revert_sell();
                self.persist().await?;
                Err(EngineError::TransactionFailure(format!(
                    "sell {} reverted on-chain",
                    truncate_hash(&tx_hash)
                )))
            }
        }
    }

    async fn settle_sell(
        &mut self,
        idx: usize,
        sold_tokens: U256,
        eth_received: U256,
        gas_cost: U256,
        tx_hash: &str,
    ) -> EngineResult<()> {
        let now = Utc::now();
        let eth_cost = self.bot.positions[idx].eth_cost;

        let net_eth = eth_received.saturating_sub(gas_cost);
        let profit = to_signed(net_eth) - to_signed(eth_cost);

        self.bot.positions[idx].confirm_sell(eth_received, profit, now);
        let profit_percent = self.bot.positions[idx].profit_percent;
        self.bot.total_sells += 1;
        self.bot.total_profit_eth += profit;
        self.bot.last_trade_at = Some(now);
        self.persist().await?;

        info!(
            "🔴 SELL filled: bot={} position={} tokens={} received={} ETH profit={} tx={}",
            self.bot.name,
            idx,
            sold_tokens,
            format_eth(eth_received),
            format_eth_signed(profit),
            truncate_hash(tx_hash)
        );

        let trade = TradeRecord {
            bot_id: self.bot.id,
            bot_name: self.bot.name.clone(),
            token_symbol: self.bot.token_symbol.clone(),
            token_address: self.bot.token_address.clone(),
            action: TradeAction::Sell,
            amount: sold_tokens,
            price: self.bot.current_price,
            eth_value: eth_received,
            gas_cost,
            profit,
            profit_percent,
            position_id: Some(idx),
            tx_hash: tx_hash.to_string(),
            timestamp: now,
        };
        self.services.ledger.record(trade.clone());
        self.services.store.append_trade(&trade).await?;

        self.services
            .alerts
            .send(AlertEvent::Trade {
                bot_name: self.bot.name.clone(),
                action: "sell".into(),
                token_symbol: self.bot.token_symbol.clone(),
                amount: sold_tokens.to_string(),
                eth_value: format_eth(eth_received),
                tx_hash: tx_hash.to_string(),
            })
            .await;
        self.services
            .alerts
            .send(AlertEvent::Profit {
                bot_name: self.bot.name.clone(),
                token_symbol: self.bot.token_symbol.clone(),
                profit_eth: format_eth_signed(profit),
                profit_percent,
            })
            .await;
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────
    // VOLUME sub-mode
    // ───────────────────────────────────────────────────────────────────────

    /// Accumulate fixed-size buys, then flush the accumulator with one
    /// sell per cycle. The grid is untouched.
    async fn volume_tick(&mut self) -> TickOutcome {
        let Some(vs) = self.bot.settings.mode.as_volume().cloned() else {
            return TickOutcome::Idle;
        };

        let mut buys = 0usize;
        let mut sells = 0usize;

        if self.bot.volume_buys_in_cycle < vs.volume_buys_per_cycle
            && self.bot.settings.buys_enabled
        {
            let verdict = self
                .services
                .breaker
                .check(self.portfolio_profit().await, Utc::now())
                .await;
            if verdict.triggered {
                debug!("Bot {}: volume buy suppressed (circuit breaker)", self.bot.name);
            } else {
                match self.execute_volume_buy(&vs).await {
                    Ok(true) => buys += 1,
                    Ok(false) => {}
                    Err(e) => self.note_error(&e, "volume-buy").await,
                }
            }
        }

        if self.bot.volume_buys_in_cycle >= vs.volume_buys_per_cycle
            && !self.bot.volume_accumulated_tokens.is_zero()
            && self.bot.settings.sells_enabled
        {
            match self.execute_volume_sell().await {
                Ok(true) => sells += 1,
                Ok(false) => {}
                Err(e) => self.note_error(&e, "volume-sell").await,
            }
        }

        if buys + sells > 0 {
            TickOutcome::Traded { buys, sells }
        } else {
            TickOutcome::Idle
        }
    }

    async fn execute_volume_buy(&mut self, vs: &VolumeSettings) -> EngineResult<bool> {
        let request = QuoteRequest::buy(
            self.token,
            vs.volume_buy_amount_wei,
            self.taker,
            self.bot.settings.slippage_bps,
        );
        let quote = self
            .services
            .dex
            .quote(&request)
            .await?
            .ok_or_else(|| EngineError::QuoteFailure("aggregator returned no buy route".into()))?;

        if self.bot.settings.dry_run {
            info!(
                "🟢 BUY filled: bot={} cycle={}/{} tokens={} cost={} ETH tx={} (dry-run)",
                self.bot.name,
                self.bot.volume_buys_in_cycle + 1,
                vs.volume_buys_per_cycle,
                quote.buy_amount,
                format_eth(quote.sell_amount),
                "0xdry"
            );
            return Ok(false);
        }

        let signer = self.signer().await?;
        let tx_hash = self.services.chain.submit(&signer, &quote.envelope()?).await?;
        let outcome = self
            .services
            .chain
            .await_receipt(&tx_hash, self.services.receipt_timeout)
            .await?;

        let Some(o) = outcome else {
            return Err(EngineError::TransactionFailure(format!(
                "volume buy {} not mined within the receipt window",
                truncate_hash(&tx_hash)
            )));
        };
        if !o.success {
            return Err(EngineError::TransactionFailure(format!(
                "volume buy {} reverted on-chain",
                truncate_hash(&tx_hash)
            )));
        }

        let gas_cost = o.gas_cost();
        let now = Utc::now();
        self.bot.volume_accumulated_tokens += quote.buy_amount;
        self.bot.volume_buys_in_cycle += 1;
        self.bot.volume_cycle_cost += quote.sell_amount + gas_cost;
        self.bot.total_buys += 1;
        self.bot.last_trade_at = Some(now);
        self.persist().await?;

        info!(
            "🟢 BUY filled: bot={} cycle={}/{} tokens={} cost={} ETH tx={}",
            self.bot.name,
            self.bot.volume_buys_in_cycle,
            vs.volume_buys_per_cycle,
            quote.buy_amount,
            format_eth(quote.sell_amount + gas_cost),
            truncate_hash(&tx_hash)
        );

        let trade = TradeRecord {
            bot_id: self.bot.id,
            bot_name: self.bot.name.clone(),
            token_symbol: self.bot.token_symbol.clone(),
            token_address: self.bot.token_address.clone(),
            action: TradeAction::Buy,
            amount: quote.buy_amount,
            price: self.bot.current_price,
            eth_value: quote.sell_amount,
            gas_cost,
            profit: I256::zero(),
            profit_percent: 0.0,
            position_id: None,
            tx_hash: tx_hash.clone(),
            timestamp: now,
        };
        self.services.ledger.record(trade.clone());
        self.services.store.append_trade(&trade).await?;
        Ok(true)
    }

    async fn execute_volume_sell(&mut self) -> EngineResult<bool> {
        let sell_tokens = self.bot.volume_accumulated_tokens;
        let request = QuoteRequest::sell(
            self.token,
            sell_tokens,
            self.taker,
            self.bot.settings.slippage_bps,
        );
        let quote = self
            .services
            .dex
            .quote(&request)
            .await?
            .ok_or_else(|| EngineError::QuoteFailure("aggregator returned no sell route".into()))?;

        if self.bot.settings.dry_run {
            info!(
                "🔴 SELL filled: bot={} cycle-flush tokens={} received={} ETH tx={} (dry-run)",
                self.bot.name,
                sell_tokens,
                format_eth(quote.buy_amount),
                "0xdry"
            );
            return Ok(false);
        }

        let signer = self.signer().await?;
        if let Some(spender) = quote.allowance_target()? {
            let approval_hash = self
                .services
                .chain
                .approve(&signer, self.token, spender, sell_tokens)
                .await?;
            match self
                .services
                .chain
                .await_receipt(&approval_hash, self.services.receipt_timeout)
                .await?
            {
                Some(o) if o.success => {}
                _ => {
                    return Err(EngineError::TransactionFailure(
                        "volume sell approval failed or timed out".into(),
                    ));
                }
            }
        }

        let tx_hash = self.services.chain.submit(&signer, &quote.envelope()?).await?;
        let outcome = self
            .services
            .chain
            .await_receipt(&tx_hash, self.services.receipt_timeout)
            .await?;

        let Some(o) = outcome else {
            return Err(EngineError::TransactionFailure(format!(
                "volume sell {} not mined within the receipt window",
                truncate_hash(&tx_hash)
            )));
        };
        if !o.success {
            return Err(EngineError::TransactionFailure(format!(
                "volume sell {} reverted on-chain",
                truncate_hash(&tx_hash)
            )));
        }

        let gas_cost = o.gas_cost();
        let now = Utc::now();
        let cycle_cost = self.bot.volume_cycle_cost;
        let net_eth = quote.buy_amount.saturating_sub(gas_cost);
        let profit = to_signed(net_eth) - to_signed(cycle_cost);

        self.bot.total_sells += 1;
        self.bot.total_profit_eth += profit;
        self.bot.last_trade_at = Some(now);
        self.bot.volume_accumulated_tokens = U256::zero();
        self.bot.volume_buys_in_cycle = 0;
        self.bot.volume_cycle_cost = U256::zero();
        self.bot.volume_cycle_count += 1;
        self.persist().await?;

        info!(
            "🔴 SELL filled: bot={} cycle-flush #{} tokens={} received={} ETH profit={} tx={}",
            self.bot.name,
            self.bot.volume_cycle_count,
            sell_tokens,
            format_eth(quote.buy_amount),
            format_eth_signed(profit),
            truncate_hash(&tx_hash)
        );

        let trade = TradeRecord {
            bot_id: self.bot.id,
            bot_name: self.bot.name.clone(),
            token_symbol: self.bot.token_symbol.clone(),
            token_address: self.bot.token_address.clone(),
            action: TradeAction::Sell,
            amount: sell_tokens,
            price: self.bot.current_price,
            eth_value: quote.buy_amount,
            gas_cost,
            profit,
            profit_percent: 0.0,
            position_id: None,
            tx_hash,
            timestamp: now,
        };
        self.services.ledger.record(trade.clone());
        self.services.store.append_trade(&trade).await?;
        Ok(true)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Reconciliation & liquidation
    // ───────────────────────────────────────────────────────────────────────

    /// Resolve positions stuck in a transient state: replay the receipt
    /// lookup from the stored tx hash and promote or roll back. A position
    /// with no hash never had a transaction submitted and rolls back
    /// immediately; a still-pending receipt is left for the next pass.
    pub async fn reconcile(&mut self) -> EngineResult<()> {
        let transients: Vec<usize> = self
            .bot
            .positions
            .iter()
            .filter(|p| p.status.is_transient())
            .map(|p| p.id)
            .collect();

        for idx in transients {
            let status = self.bot.positions[idx].status;
            match status {
                PositionStatus::Buying => {
                    let hash = self.bot.positions[idx].buy_tx_hash.clone();
                    match hash {
                        None => {
                            info!(
                                "Bot {} position {}: unsubmitted buy rolled back",
                                self.bot.name, idx
                            );
                            self.bot.positions[idx].revert_buy();
                            self.persist().await?;
                        }
                        Some(hash) => {
                            let outcome = self
                                .services
                                .chain
                                .await_receipt(
                                    &hash,
                                    Duration::from_secs(RECONCILE_RECEIPT_WAIT_SECS),
                                )
                                .await?;
                            match outcome {
                                None => {
                                    debug!(
                                        "Bot {} position {}: buy {} still pending",
                                        self.bot.name,
                                        idx,
                                        truncate_hash(&hash)
                                    );
                                }
                                Some(o) if o.success => {
                                    let tokens = self.bot.positions[idx].pending_receive;
                                    let tokens = if tokens.is_zero() {
                                        self.services
                                            .chain
                                            .token_balance(self.token, self.taker)
                                            .await?
                                    } else {
                                        tokens
                                    };
                                    let cost = self.bot.positions[idx].pending_spend
                                        + o.gas_cost();
                                    info!(
                                        "Bot {} position {}: buy {} confirmed during reconcile",
                                        self.bot.name,
                                        idx,
                                        truncate_hash(&hash)
                                    );
                                    self.settle_buy(idx, tokens, cost, o.gas_cost(), &hash)
                                        .await?;
                                }
                                Some(_) => {
                                    info!(
                                        "Bot {} position {}: buy {} reverted, bucket freed",
                                        self.bot.name,
                                        idx,
                                        truncate_hash(&hash)
                                    );
                                    self.bot.positions[idx].revert_buy();
                                    self.persist().await?;
                                }
                            }
                        }
                    }
                }
                PositionStatus::Selling => {
                    let hash = self.bot.positions[idx].sell_tx_hash.clone();
                    match hash {
                        None => {
                            info!(
                                "Bot {} position {}: unsubmitted sell rolled back",
                                self.bot.name, idx
                            );
                            self.bot.positions[idx].revert_sell();
                            self.persist().await?;
                        }
                        Some(hash) => {
                            let outcome = self
                                .services
                                .chain
                                .await_receipt(
                                    &hash,
                                    Duration::from_secs(RECONCILE_RECEIPT_WAIT_SECS),
                                )
                                .await?;
                            match outcome {
                                None => {
                                    debug!(
                                        "Bot {} position {}: sell {} still pending",
                                        self.bot.name,
                                        idx,
                                        truncate_hash(&hash)
                                    );
                                }
                                Some(o) if o.success => {
                                    let sold = self.bot.positions[idx].pending_spend;
                                    let received = self.bot.positions[idx].pending_receive;
                                    info!(
                                        "Bot {} position {}: sell {} confirmed during reconcile",
                                        self.bot.name,
                                        idx,
                                        truncate_hash(&hash)
                                    );
                                    self.settle_sell(idx, sold, received, o.gas_cost(), &hash)
                                        .await?;
                                }
                                Some(_) => {
                                    info!(
                                        "Bot {} position {}: sell {} reverted, tokens kept",
                                        self.bot.name,
                                        idx,
                                        truncate_hash(&hash)
                                    );
                                    self.bot.positions[idx].revert_sell();
                                    self.persist().await?;
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Exit every HOLDING position (and any volume accumulator) at market,
    /// ignoring the minimum-profit gate.
    pub async fn liquidate_all(&mut self) -> LiquidationReport {
        let mut report = LiquidationReport::default();

        let holding: Vec<usize> = self
            .bot
            .positions
            .iter()
            .filter(|p| p.status == PositionStatus::Holding)
            .map(|p| p.id)
            .collect();

        info!(
            "🧹 Liquidating bot {}: {} holding position(s)",
            self.bot.name,
            holding.len()
        );

        for idx in holding {
            match self.execute_sell(idx, true).await {
                Ok(true) => report.success += 1,
                Ok(false) => {}
                Err(e) => {
                    self.note_error(&e, "liquidate").await;
                    report.failed += 1;
                }
            }
        }

        if !self.bot.volume_accumulated_tokens.is_zero() {
            match self.execute_volume_sell().await {
                Ok(true) => report.success += 1,
                Ok(false) => {}
                Err(e) => {
                    self.note_error(&e, "liquidate").await;
                    report.failed += 1;
                }
            }
        }

        report
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests (pure helpers; full tick scenarios live in tests/integration_tests.rs)
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn eth(v: u64) -> U256 {
        U256::from(v) * U256::exp10(15) // milli-ETH steps
    }

    #[test]
    fn test_is_profitable_against_cost_basis() {
        // 1% minimum over a 1.0 ETH basis: 1.01 passes, 1.009 does not
        assert!(is_profitable(eth(1_010), eth(1_000), 1.0));
        assert!(!is_profitable(eth(1_009), eth(1_000), 1.0));
        // Exactly on the threshold passes
        assert!(is_profitable(eth(1_010), eth(1_000), 1.0));
        // Zero minimum only requires breaking even
        assert!(is_profitable(eth(1_000), eth(1_000), 0.0));
        assert!(!is_profitable(eth(999), eth(1_000), 0.0));
    }

    #[test]
    fn test_is_profitable_zero_cost() {
        assert!(is_profitable(U256::one(), U256::zero(), 5.0));
        assert!(!is_profitable(U256::zero(), U256::zero(), 5.0));
    }

    #[test]
    fn test_moon_bag_retention() {
        let tokens = U256::from(10_000u64);
        assert_eq!(
            sell_amount_after_moon_bag(tokens, true, 10.0),
            U256::from(9_000u64)
        );
        assert_eq!(
            sell_amount_after_moon_bag(tokens, true, 0.0),
            tokens
        );
        assert_eq!(sell_amount_after_moon_bag(tokens, false, 50.0), tokens);
        assert_eq!(
            sell_amount_after_moon_bag(tokens, true, 100.0),
            U256::zero()
        );
    }

    #[test]
    fn test_moon_bag_fractional_percent() {
        let tokens = U256::from(10_000u64);
        // 2.5% → 250 bps retained
        assert_eq!(
            sell_amount_after_moon_bag(tokens, true, 2.5),
            U256::from(9_750u64)
        );
    }
}
