//! End-to-end tick scenarios against in-memory chain/aggregator fakes.
//!
//! The fakes model just enough of the world for the control loop: the
//! aggregator quotes at a settable spot price, the chain confirms (or
//! reverts, or never mines) every submission, and the oracle serves the
//! same settable price at fixed confidence.

use async_trait::async_trait;
use chrono::Utc;
use ethers::signers::LocalWallet;
use ethers::types::{Address, I256, U256};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base_grid_bot::bots::instance::{BotInstance, BotSettings, Mode, VolumeSettings};
use base_grid_bot::bots::trading_bot::{BotServices, TickOutcome, TradingBot};
use base_grid_bot::dex::{DexClient, QuoteRequest, SwapQuote, NATIVE_ETH};
use base_grid_bot::errors::EngineResult;
use base_grid_bot::metrics::pnl::{TradeAction, TradeLedger};
use base_grid_bot::persistence::BotStore;
use base_grid_bot::risk::circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitBreakerState};
use base_grid_bot::rpc::{ChainClient, TxEnvelope, TxOutcome};
use base_grid_bot::security::{SigningVault, WalletVault};
use base_grid_bot::trading::grid::GridSettings;
use base_grid_bot::trading::position::PositionStatus;
use base_grid_bot::trading::price_oracle::{
    FeedReading, OracleSettings, PriceFeed, PriceOracle, PriceSource,
};
use base_grid_bot::utils::alerts::AlertHub;

const ROUTER: &str = "0xdef1c0ded9bec7f1a1670819833240f027b25eff";

fn eth(v: f64) -> U256 {
    U256::from((v * 1e18) as u128)
}

fn u256_f64(v: U256) -> f64 {
    v.to_string().parse().unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
// FAKES
// ═══════════════════════════════════════════════════════════════════════════

struct StaticFeed {
    price: Arc<Mutex<f64>>,
    confidence: f64,
}

#[async_trait]
impl PriceFeed for StaticFeed {
    async fn fetch(&self, _token: Address) -> EngineResult<FeedReading> {
        Ok(FeedReading {
            price: *self.price.lock(),
            confidence: self.confidence,
            source: PriceSource::Chainlink,
            observed_at: Utc::now(),
        })
    }

    fn source(&self) -> PriceSource {
        PriceSource::Chainlink
    }
}

/// Quotes every request at the current spot with no spread.
struct FakeDex {
    price: Arc<Mutex<f64>>,
    route_available: Mutex<bool>,
    quotes_served: AtomicU64,
}

impl FakeDex {
    fn new(price: Arc<Mutex<f64>>) -> Self {
        Self {
            price,
            route_available: Mutex::new(true),
            quotes_served: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl DexClient for FakeDex {
    async fn quote(&self, request: &QuoteRequest) -> EngineResult<Option<SwapQuote>> {
        if !*self.route_available.lock() {
            return Ok(None);
        }
        self.quotes_served.fetch_add(1, Ordering::SeqCst);
        let price = *self.price.lock();

        let quote = if request.sell_token == NATIVE_ETH {
            // ETH → token
            let tokens = U256::from((u256_f64(request.sell_amount) / price) as u128);
            SwapQuote {
                buy_token_address: request.buy_token.clone(),
                sell_token_address: request.sell_token.clone(),
                buy_amount: tokens,
                sell_amount: request.sell_amount,
                price: price.to_string(),
                gas: Some(U256::from(200_000u64)),
                gas_price: Some(U256::from(1_000_000_000u64)),
                to: ROUTER.into(),
                data: "0x".into(),
                value: request.sell_amount,
                allowance_target: None,
            }
        } else {
            // token → ETH
            let eth_out = U256::from((u256_f64(request.sell_amount) * price) as u128);
            SwapQuote {
                buy_token_address: request.buy_token.clone(),
                sell_token_address: request.sell_token.clone(),
                buy_amount: eth_out,
                sell_amount: request.sell_amount,
                price: price.to_string(),
                gas: Some(U256::from(200_000u64)),
                gas_price: Some(U256::from(1_000_000_000u64)),
                to: ROUTER.into(),
                data: "0x".into(),
                value: U256::zero(),
                allowance_target: Some(ROUTER.into()),
            }
        };
        Ok(Some(quote))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum ReceiptMode {
    Success,
    Revert,
    Pending,
}

struct FakeChain {
    eth_balance: Mutex<U256>,
    token_balance: Mutex<U256>,
    receipt_mode: Mutex<ReceiptMode>,
    submissions: Mutex<Vec<String>>,
    seq: AtomicU64,
}

impl FakeChain {
    fn new(balance: U256) -> Self {
        Self {
            eth_balance: Mutex::new(balance),
            token_balance: Mutex::new(U256::zero()),
            receipt_mode: Mutex::new(ReceiptMode::Success),
            submissions: Mutex::new(Vec::new()),
            seq: AtomicU64::new(1),
        }
    }

    fn next_hash(&self) -> String {
        format!("0x{:064x}", self.seq.fetch_add(1, Ordering::SeqCst))
    }

    const GAS_USED: u64 = 21_000;
    const GAS_PRICE: u64 = 1_000_000_000;

    fn gas_cost() -> U256 {
        U256::from(Self::GAS_USED) * U256::from(Self::GAS_PRICE)
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn eth_balance(&self, _owner: Address) -> EngineResult<U256> {
        Ok(*self.eth_balance.lock())
    }

    async fn token_balance(&self, _token: Address, _owner: Address) -> EngineResult<U256> {
        Ok(*self.token_balance.lock())
    }

    async fn gas_price(&self) -> EngineResult<U256> {
        Ok(U256::from(Self::GAS_PRICE))
    }

    async fn approve(
        &self,
        _signer: &LocalWallet,
        _token: Address,
        _spender: Address,
        _amount: U256,
    ) -> EngineResult<String> {
        let hash = self.next_hash();
        self.submissions.lock().push(format!("approve:{}", hash));
        Ok(hash)
    }

    async fn submit(&self, _signer: &LocalWallet, tx: &TxEnvelope) -> EngineResult<String> {
        let hash = self.next_hash();
        self.submissions.lock().push(format!("swap:{}", hash));
        // Spending the envelope value models the wallet draining on buys
        let mut balance = self.eth_balance.lock();
        *balance = balance.saturating_sub(tx.value);
        Ok(hash)
    }

    async fn await_receipt(
        &self,
        tx_hash: &str,
        _timeout: Duration,
    ) -> EngineResult<Option<TxOutcome>> {
        match *self.receipt_mode.lock() {
            ReceiptMode::Pending => Ok(None),
            mode => Ok(Some(TxOutcome {
                tx_hash: tx_hash.to_string(),
                success: mode == ReceiptMode::Success,
                gas_used: U256::from(Self::GAS_USED),
                effective_gas_price: U256::from(Self::GAS_PRICE),
                block_number: 1,
            })),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HARNESS
// ═══════════════════════════════════════════════════════════════════════════

struct Harness {
    services: Arc<BotServices>,
    price: Arc<Mutex<f64>>,
    chain: Arc<FakeChain>,
    dex: Arc<FakeDex>,
    wallet_address: String,
    _dir: tempfile::TempDir,
}

async fn harness(spot: f64, balance_eth: f64) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        BotStore::open(dir.path().join("state.json"))
            .await
            .unwrap(),
    );

    let price = Arc::new(Mutex::new(spot));
    let chain = Arc::new(FakeChain::new(eth(balance_eth)));
    let dex = Arc::new(FakeDex::new(Arc::clone(&price)));

    let oracle = Arc::new(PriceOracle::new(
        Some(Arc::new(StaticFeed {
            price: Arc::clone(&price),
            confidence: 0.95,
        })),
        None,
        OracleSettings::default(),
    ));

    let vault = Arc::new(WalletVault::new("test-password".into()));
    let (_, record) = vault.create_wallet("it-wallet").await.unwrap();
    let wallet_address = record.address.clone();

    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerState::new(
        BreakerConfig::default(),
        I256::from(1_000_000_000_000_000_000i128),
        Utc::now(),
    )));

    let services = Arc::new(BotServices {
        oracle,
        dex: Arc::clone(&dex) as Arc<dyn DexClient>,
        chain: Arc::clone(&chain) as Arc<dyn ChainClient>,
        vault: vault as Arc<dyn SigningVault>,
        store,
        breaker,
        ledger: Arc::new(TradeLedger::new()),
        alerts: Arc::new(AlertHub::disabled()),
        receipt_timeout: Duration::from_secs(1),
    });

    Harness {
        services,
        price,
        chain,
        dex,
        wallet_address,
        _dir: dir,
    }
}

fn grid_settings() -> GridSettings {
    GridSettings {
        num_positions: 5,
        floor_price: 0.001,
        ceiling_price: 0.002,
        take_profit_percent: 10.0,
        stop_loss_percent: 0.0,
        stop_loss_enabled: false,
        moon_bag_enabled: false,
        moon_bag_percent: 0.0,
        min_profit_percent: 1.0,
        max_active_positions: 5,
        use_fixed_buy_amount: true,
        buy_amount_wei: eth(0.01),
    }
}

fn bot_settings(grid: GridSettings) -> BotSettings {
    BotSettings {
        heartbeat_ms: 1_000,
        skip_heartbeats: 0,
        buys_enabled: true,
        sells_enabled: true,
        min_confidence: 0.5,
        slippage_bps: 100,
        dry_run: false,
        gas_reserve_wei: eth(0.001),
        mode: Mode::Grid(grid),
    }
}

fn token_address() -> String {
    format!("{:#x}", Address::from_low_u64_be(0xbeef))
}

async fn grid_bot(h: &Harness, settings: BotSettings) -> TradingBot {
    let instance = BotInstance::new(
        "it-grid".into(),
        "base".into(),
        token_address(),
        "TKN".into(),
        h.wallet_address.clone(),
        false,
        settings,
        *h.price.lock(),
    )
    .unwrap();
    h.services.store.save_bot(&instance).await.unwrap();
    TradingBot::new(instance, Arc::clone(&h.services)).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
// SCENARIOS
// ═══════════════════════════════════════════════════════════════════════════

/// One buy at 0.00105, then a sell at 0.00135; the ledger
/// carries a buy then a sell and the position ends SOLD with profit.
#[tokio::test]
async fn test_buy_then_sell_happy_path() {
    let h = harness(0.00105, 1.0).await;
    let mut bot = grid_bot(&h, bot_settings(grid_settings())).await;

    let outcome = bot.tick().await;
    assert_eq!(outcome, TickOutcome::Traded { buys: 1, sells: 0 });
    {
        let p = &bot.instance().positions[0];
        assert_eq!(p.status, PositionStatus::Holding);
        assert!(!p.tokens_received.is_zero());
        assert!(!p.eth_cost.is_zero());
        assert!(p.buy_tx_hash.is_some());
    }
    assert_eq!(bot.instance().total_buys, 1);

    // Price crosses the bucket's 0.00132 sell target
    *h.price.lock() = 0.00135;
    let outcome = bot.tick().await;
    assert_eq!(outcome, TickOutcome::Traded { buys: 0, sells: 1 });

    let p = &bot.instance().positions[0];
    assert_eq!(p.status, PositionStatus::Sold);
    assert!(p.profit > I256::zero());
    assert_eq!(bot.instance().total_sells, 1);
    assert!(bot.instance().total_profit_eth > I256::zero());

    // Ledger ordering: exactly one buy then one sell
    let trades = h.services.ledger.all();
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].action, TradeAction::Buy);
    assert_eq!(trades[1].action, TradeAction::Sell);
    assert_eq!(trades[1].profit, p.profit);

    // Bot profit equals the sum of sold-position profits
    let sold_sum = bot
        .instance()
        .positions
        .iter()
        .filter(|p| p.status == PositionStatus::Sold)
        .fold(I256::zero(), |acc, p| acc + p.profit);
    assert_eq!(bot.instance().total_profit_eth, sold_sum);
}

/// With max_active_positions = 2, four ticks at four
/// distinct buckets execute only two buys.
#[tokio::test]
async fn test_max_active_positions_cap() {
    let h = harness(0.0019, 10.0).await;
    let mut settings = grid_settings();
    settings.max_active_positions = 2;
    let mut bot = grid_bot(&h, bot_settings(settings)).await;

    let prices = [0.0019, 0.0017, 0.0015, 0.0013];
    let mut buys = 0;
    for spot in prices {
        *h.price.lock() = spot;
        if let TickOutcome::Traded { buys: b, .. } = bot.tick().await {
            buys += b;
        }
    }

    assert_eq!(buys, 2);
    let active = bot
        .instance()
        .positions
        .iter()
        .filter(|p| p.status.is_active())
        .count();
    assert_eq!(active, 2);
    assert_eq!(bot.instance().total_buys, 2);
}

/// A tripped breaker refuses buys but still permits the
/// sell phase to run.
#[tokio::test]
async fn test_circuit_breaker_blocks_buys_not_sells() {
    let h = harness(0.00105, 1.0).await;
    let mut bot = grid_bot(&h, bot_settings(grid_settings())).await;

    // Fill position 0 first
    assert_eq!(bot.tick().await, TickOutcome::Traded { buys: 1, sells: 0 });

    // Portfolio drops 6% against the 1 ETH daily baseline
    bot.instance_mut().total_profit_eth = I256::from(-60_000_000_000_000_000i128);
    h.services.store.save_bot(bot.instance()).await.unwrap();
    let verdict = h
        .services
        .breaker
        .check(I256::from(-60_000_000_000_000_000i128), Utc::now())
        .await;
    assert!(verdict.triggered);

    // Price now sits in bucket 1 (a buy candidate) AND above bucket 0's
    // sell target: the sell must run, the buy must not
    *h.price.lock() = 0.00135;
    let outcome = bot.tick().await;
    assert_eq!(outcome, TickOutcome::Traded { buys: 0, sells: 1 });
    assert_eq!(bot.instance().positions[0].status, PositionStatus::Sold);
    assert_eq!(bot.instance().total_buys, 1);

    // With nothing left to sell, the buy phase itself must refuse while
    // the breaker stays tripped
    *h.price.lock() = 0.00125;
    assert_eq!(bot.tick().await, TickOutcome::Idle);
    assert_eq!(bot.instance().total_buys, 1);
}

/// Restart with a BUYING position and a known tx hash;
/// the reconciler promotes on success and rolls back on revert.
#[tokio::test]
async fn test_crash_recovery_reconciles_buying_position() {
    let h = harness(0.00105, 1.0).await;

    // Success path
    let mut bot = grid_bot(&h, bot_settings(grid_settings())).await;
    bot.instance_mut().positions[0].begin_buy(eth(0.01), U256::from(9_500_000_000_000_000_000u128));
    bot.instance_mut().positions[0].buy_submitted("0xabc1".into());
    bot.reconcile().await.unwrap();
    {
        let p = &bot.instance().positions[0];
        assert_eq!(p.status, PositionStatus::Holding);
        assert_eq!(p.tokens_received, U256::from(9_500_000_000_000_000_000u128));
        assert_eq!(p.eth_cost, eth(0.01) + FakeChain::gas_cost());
    }
    assert_eq!(bot.instance().total_buys, 1);
    assert_eq!(h.services.ledger.len(), 1);

    // Revert path frees the bucket
    *h.chain.receipt_mode.lock() = ReceiptMode::Revert;
    bot.instance_mut().positions[1].begin_buy(eth(0.01), U256::from(1u64));
    bot.instance_mut().positions[1].buy_submitted("0xabc2".into());
    bot.reconcile().await.unwrap();
    assert_eq!(bot.instance().positions[1].status, PositionStatus::Empty);

    // A transient position that never got a hash also rolls back
    bot.instance_mut().positions[2].begin_buy(eth(0.01), U256::from(1u64));
    bot.reconcile().await.unwrap();
    assert_eq!(bot.instance().positions[2].status, PositionStatus::Empty);
}

/// Dry-run idempotence: two identical dry-run ticks leave the state
/// untouched and identical.
#[tokio::test]
async fn test_dry_run_is_idempotent() {
    let h = harness(0.00105, 1.0).await;
    let mut settings = bot_settings(grid_settings());
    settings.dry_run = true;
    let mut bot = grid_bot(&h, settings).await;

    let before = serde_json::to_value(bot.instance().positions.clone()).unwrap();
    assert_eq!(bot.tick().await, TickOutcome::Idle);
    let after_one = serde_json::to_value(bot.instance().positions.clone()).unwrap();
    assert_eq!(bot.tick().await, TickOutcome::Idle);
    let after_two = serde_json::to_value(bot.instance().positions.clone()).unwrap();

    assert_eq!(before, after_one);
    assert_eq!(after_one, after_two);
    assert_eq!(bot.instance().total_buys, 0);
    assert!(h.services.ledger.is_empty());
    // The quote stage did run
    assert!(h.dex.quotes_served.load(Ordering::SeqCst) > 0);
}

/// Five consecutive quote failures stop the bot.
#[tokio::test]
async fn test_error_gate_stops_bot() {
    let h = harness(0.00105, 1.0).await;
    let mut bot = grid_bot(&h, bot_settings(grid_settings())).await;

    *h.dex.route_available.lock() = false;
    for _ in 0..4 {
        bot.tick().await;
        assert!(bot.instance().is_running);
    }
    let outcome = bot.tick().await;
    assert!(matches!(outcome, TickOutcome::Halted { .. }));
    assert!(!bot.instance().is_running);

    // Once stopped, further ticks are skipped
    assert_eq!(bot.tick().await, TickOutcome::Skipped);
}

/// A good price resets the consecutive error counter.
#[tokio::test]
async fn test_error_counter_resets_on_good_tick() {
    let h = harness(0.00105, 1.0).await;
    let mut bot = grid_bot(&h, bot_settings(grid_settings())).await;

    *h.dex.route_available.lock() = false;
    bot.tick().await;
    bot.tick().await;
    assert_eq!(bot.instance().consecutive_error_count, 2);

    *h.dex.route_available.lock() = true;
    bot.tick().await;
    // Counter cleared by the successful price observation, then the buy
    // executed without error
    assert_eq!(bot.instance().consecutive_error_count, 0);
    assert!(bot.instance().is_running);
}

/// A reverted buy rolls the position back to EMPTY.
#[tokio::test]
async fn test_reverted_buy_frees_bucket() {
    let h = harness(0.00105, 1.0).await;
    let mut bot = grid_bot(&h, bot_settings(grid_settings())).await;

    *h.chain.receipt_mode.lock() = ReceiptMode::Revert;
    bot.tick().await;

    assert_eq!(bot.instance().positions[0].status, PositionStatus::Empty);
    assert_eq!(bot.instance().total_buys, 0);
    assert_eq!(bot.instance().consecutive_error_count, 1);
    assert!(h.services.ledger.is_empty());
}

/// Sell below the minimum-profit threshold is skipped, not an error.
#[tokio::test]
async fn test_min_profit_gate_skips_sell() {
    let h = harness(0.00105, 1.0).await;
    let mut settings = grid_settings();
    settings.min_profit_percent = 50.0; // unreachable at +10% targets
    let mut bot = grid_bot(&h, bot_settings(settings)).await;

    bot.tick().await;
    assert_eq!(bot.instance().positions[0].status, PositionStatus::Holding);

    *h.price.lock() = 0.00135;
    let outcome = bot.tick().await;
    // The sell candidate was found but skipped; the tick stayed clean
    assert_eq!(bot.instance().positions[0].status, PositionStatus::Holding);
    assert_eq!(bot.instance().consecutive_error_count, 0);
    assert_ne!(outcome, TickOutcome::Traded { buys: 0, sells: 1 });
}

/// Moon bag: a sell keeps the configured share of tokens out of the swap.
#[tokio::test]
async fn test_moon_bag_retains_tokens() {
    let h = harness(0.00105, 1.0).await;
    let mut settings = grid_settings();
    settings.moon_bag_enabled = true;
    settings.moon_bag_percent = 10.0;
    settings.min_profit_percent = 0.0;
    let mut bot = grid_bot(&h, bot_settings(settings)).await;

    bot.tick().await;
    let bought = bot.instance().positions[0].tokens_received;

    *h.price.lock() = 0.00135;
    bot.tick().await;

    let trades = h.services.ledger.all();
    let sell = trades.iter().find(|t| t.action == TradeAction::Sell).unwrap();
    assert_eq!(sell.amount, bought * 9u64 / 10u64);
}

/// VOLUME mode: fixed buys accumulate, then the cycle flushes with one
/// sell and the counters reset.
#[tokio::test]
async fn test_volume_mode_cycle() {
    let h = harness(0.001, 10.0).await;
    let settings = BotSettings {
        mode: Mode::Volume(VolumeSettings {
            volume_buys_per_cycle: 2,
            volume_buy_amount_wei: eth(0.01),
        }),
        ..bot_settings(grid_settings())
    };
    let mut bot = grid_bot(&h, settings).await;
    assert!(bot.instance().positions.is_empty());

    assert_eq!(bot.tick().await, TickOutcome::Traded { buys: 1, sells: 0 });
    assert_eq!(bot.instance().volume_buys_in_cycle, 1);
    assert!(!bot.instance().volume_accumulated_tokens.is_zero());

    // Second buy completes the cycle and the flush sell runs on the same
    // tick
    assert_eq!(bot.tick().await, TickOutcome::Traded { buys: 1, sells: 1 });
    assert_eq!(bot.instance().volume_buys_in_cycle, 0);
    assert!(bot.instance().volume_accumulated_tokens.is_zero());
    assert_eq!(bot.instance().volume_cycle_count, 1);
    assert_eq!(bot.instance().total_buys, 2);
    assert_eq!(bot.instance().total_sells, 1);

    let trades = h.services.ledger.all();
    assert_eq!(trades.len(), 3);
    assert!(trades.iter().all(|t| t.position_id.is_none()));
}

/// Liquidation sells every holding position regardless of profit.
#[tokio::test]
async fn test_liquidate_all_ignores_min_profit() {
    let h = harness(0.00105, 1.0).await;
    let mut settings = grid_settings();
    settings.min_profit_percent = 50.0;
    let mut bot = grid_bot(&h, bot_settings(settings)).await;

    bot.tick().await;
    assert_eq!(bot.instance().positions[0].status, PositionStatus::Holding);

    // Price has not moved; a normal sell would never clear 50%
    let report = bot.liquidate_all().await;
    assert_eq!(report.success, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(bot.instance().positions[0].status, PositionStatus::Sold);
}

/// Persistence round-trip mid-lifecycle: reload lands in an equivalent
/// state and the tick continues from it.
#[tokio::test]
async fn test_restart_resumes_from_store() {
    let h = harness(0.00105, 1.0).await;
    let mut bot = grid_bot(&h, bot_settings(grid_settings())).await;
    bot.tick().await;
    let id = bot.instance().id;
    drop(bot);

    // Rehydrate from the same store
    let persisted = h
        .services
        .store
        .bots()
        .await
        .into_iter()
        .find(|b| b.id == id)
        .unwrap();
    assert_eq!(persisted.positions[0].status, PositionStatus::Holding);
    assert_eq!(persisted.total_buys, 1);

    let mut revived = TradingBot::new(persisted, Arc::clone(&h.services)).unwrap();
    *h.price.lock() = 0.00135;
    let outcome = revived.tick().await;
    assert_eq!(outcome, TickOutcome::Traded { buys: 0, sells: 1 });
    assert_eq!(revived.instance().positions[0].status, PositionStatus::Sold);
}

/// A receipt that never arrives leaves the position transient; a later
/// tick's reconcile pass settles it once the chain answers.
#[tokio::test]
async fn test_pending_receipt_settles_on_next_tick() {
    let h = harness(0.00105, 1.0).await;
    let mut bot = grid_bot(&h, bot_settings(grid_settings())).await;

    *h.chain.receipt_mode.lock() = ReceiptMode::Pending;
    bot.tick().await;
    assert_eq!(bot.instance().positions[0].status, PositionStatus::Buying);
    assert!(bot.instance().positions[0].buy_tx_hash.is_some());
    assert_eq!(bot.instance().consecutive_error_count, 1);

    // Chain catches up; the next tick reconciles before trading
    *h.chain.receipt_mode.lock() = ReceiptMode::Success;
    bot.tick().await;
    assert_eq!(bot.instance().positions[0].status, PositionStatus::Holding);
    assert_eq!(bot.instance().total_buys, 1);
}
