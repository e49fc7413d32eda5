//! ═══════════════════════════════════════════════════════════════════════════
//! 🚀 BASE GRID BOT - Daemon Entry Point & Operator CLI
//!
//! Subcommands:
//!   validate-setup   check config, environment, and state-file access
//!   start            run the supervisor daemon in the foreground
//!   stop             signal a running daemon via its pid file
//!   status           show bots, P&L, and breaker state from the store
//!   create-bot       register a new grid or volume bot
//!   delete-bot       remove a bot permanently
//!   liquidate-all    market-exit every holding position
//!   export-csv       dump the trade log as CSV
//!   tail-logs        follow the daemon log file
//!
//! Exit codes: 0 success, 1 validation failure, 2 runtime error.
//! ═══════════════════════════════════════════════════════════════════════════

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use ethers::types::{Address, I256, U256};
use log::{error, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use base_grid_bot::bots::instance::{BotInstance, BotSettings, Mode, VolumeSettings};
use base_grid_bot::bots::{BotServices, HeartbeatSupervisor};
use base_grid_bot::config::Config;
use base_grid_bot::dex::ZeroExClient;
use base_grid_bot::metrics::{export_csv, TradeLedger};
use base_grid_bot::persistence::BotStore;
use base_grid_bot::risk::circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitBreakerState};
use base_grid_bot::rpc::{chain_profile, EvmChainClient};
use base_grid_bot::security::{SigningVault, WalletVault};
use base_grid_bot::trading::chainlink_feed::ChainlinkFeed;
use base_grid_bot::trading::grid::GridSettings;
use base_grid_bot::trading::price_oracle::{OracleSettings, PriceFeed, PriceOracle};
use base_grid_bot::trading::uniswap_twap::UniswapTwapFeed;
use base_grid_bot::utils::alerts::{AlertConfig, AlertHub};
use base_grid_bot::utils::format::wei_to_eth_string_signed;

// ═══════════════════════════════════════════════════════════════════════════
// COMMAND LINE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Parser, Debug)]
#[clap(name = "base-grid-bot")]
#[clap(version, about = "Multi-tenant grid trading bot supervisor for Base", long_about = None)]
struct Args {
    /// Configuration file (TOML); defaults apply when absent
    #[clap(short, long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Log level override (also honors LOG_LEVEL / RUST_LOG)
    #[clap(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check configuration, environment, and state-file access
    ValidateSetup,
    /// Run the supervisor daemon in the foreground
    Start,
    /// Signal a running daemon to shut down
    Stop,
    /// Show bots, P&L, and circuit breaker state
    Status,
    /// Register a new bot
    CreateBot {
        #[clap(long)]
        name: String,
        /// ERC-20 token address to trade
        #[clap(long)]
        token: String,
        #[clap(long)]
        symbol: String,
        /// Grid floor price (ETH per token)
        #[clap(long)]
        floor: Option<f64>,
        /// Grid ceiling price (ETH per token)
        #[clap(long)]
        ceiling: Option<f64>,
        #[clap(long, default_value_t = 10)]
        positions: usize,
        #[clap(long, default_value_t = 10.0)]
        take_profit: f64,
        #[clap(long, default_value_t = 30_000)]
        heartbeat_ms: u64,
        /// Fixed per-buy size in ETH; balance-split sizing when omitted
        #[clap(long)]
        buy_amount_eth: Option<f64>,
        /// Reuse the primary wallet instead of generating a fresh one
        #[clap(long)]
        use_main_wallet: bool,
        /// VOLUME mode: buys per cycle (grid mode when omitted)
        #[clap(long)]
        volume_buys_per_cycle: Option<u32>,
        /// VOLUME mode: per-buy size in ETH
        #[clap(long)]
        volume_buy_amount_eth: Option<f64>,
        /// Validate against live quotes without submitting transactions
        #[clap(long)]
        dry_run: bool,
    },
    /// Remove a bot permanently
    DeleteBot {
        #[clap(long)]
        id: Uuid,
    },
    /// Market-exit every holding position (optionally one bot)
    LiquidateAll {
        #[clap(long)]
        id: Option<Uuid>,
    },
    /// Export the trade log as CSV
    ExportCsv {
        #[clap(short, long, default_value = "trades.csv")]
        output: PathBuf,
    },
    /// Follow the daemon log file
    TailLogs {
        #[clap(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
}

/// Console logging for one-shot commands; file logging for the daemon so
/// `tail-logs` has something to follow.
fn setup_logging(args: &Args, log_file: Option<PathBuf>) -> Result<()> {
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| "info".to_string());
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    builder.format_timestamp_millis();

    if let Some(path) = log_file {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        println!("Logging to {}", path.display());
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn print_banner(config: &Config) {
    let border = "═".repeat(70);
    println!("\n{}", border);
    println!("  🤖 {} - grid trading supervisor", base_grid_bot::version_string().bold());
    println!("{}\n", border);
    config.display_summary();
}

// ═══════════════════════════════════════════════════════════════════════════
// WIRING
// ═══════════════════════════════════════════════════════════════════════════

fn load_config(args: &Args) -> Result<Config> {
    dotenv::dotenv().ok();
    if args.config.exists() {
        Config::from_file(&args.config)
    } else {
        Config::from_env()
    }
}

fn wallet_password(required: bool) -> Result<Option<String>> {
    if let Ok(pw) = std::env::var("WALLET_PASSWORD") {
        if !pw.is_empty() {
            return Ok(Some(pw));
        }
    }
    if !required {
        return Ok(None);
    }
    let pw = dialoguer::Password::new()
        .with_prompt("Vault password")
        .interact()
        .context("WALLET_PASSWORD is unset and no interactive terminal is available")?;
    Ok(Some(pw))
}

fn parse_feed_table(config: &Config) -> Result<HashMap<Address, Address>> {
    let mut feeds = HashMap::new();
    for (token, aggregator) in &config.oracle.chainlink_feeds {
        let token = Address::from_str(token)
            .with_context(|| format!("bad token address in chainlink_feeds: {}", token))?;
        let aggregator = Address::from_str(aggregator)
            .with_context(|| format!("bad aggregator address in chainlink_feeds: {}", aggregator))?;
        feeds.insert(token, aggregator);
    }
    Ok(feeds)
}

/// Build the full service stack shared by the daemon and the one-shot
/// commands that need chain access.
async fn build_services(config: &Config, password: Option<String>) -> Result<Arc<BotServices>> {
    let profile = chain_profile(&config.network.chain)
        .context("unknown chain (validate-setup would have caught this)")?;

    let chain = EvmChainClient::new(&config.network.rpc_url, profile.chain_id)?;
    let provider = chain.provider();

    let chainlink: Option<Arc<dyn PriceFeed>> = {
        let feeds = parse_feed_table(config)?;
        if feeds.is_empty() {
            None
        } else {
            Some(Arc::new(ChainlinkFeed::new(
                Arc::clone(&provider),
                feeds,
                config.oracle.stale_threshold_secs,
            )))
        }
    };
    let uniswap: Option<Arc<dyn PriceFeed>> = Some(Arc::new(UniswapTwapFeed::new(
        provider,
        profile.uniswap_v3_factory,
        profile.weth,
        config.oracle.twap_window_secs,
    )));

    let oracle = Arc::new(PriceOracle::new(
        chainlink,
        uniswap,
        OracleSettings {
            preference: config.oracle.preference,
            allow_fallback: config.oracle.allow_fallback,
            price_timeout_secs: config.oracle.price_timeout_secs,
            cache_max_age_secs: config.oracle.cache_max_age_secs,
        },
    ));

    let dex = Arc::new(ZeroExClient::new(
        config.aggregator.base_url.clone(),
        config.aggregator.api_key.clone(),
        config.aggregator.quote_timeout_secs,
    ));

    let store = Arc::new(BotStore::open(config.state_file_path()).await?);
    let snapshot = store.snapshot().await;

    let vault = Arc::new(WalletVault::new(password.unwrap_or_default()));
    vault
        .load(snapshot.wallet_dictionary.clone(), snapshot.primary_wallet_id.clone())
        .await;

    let breaker_state = snapshot.circuit_breaker.clone().unwrap_or_else(|| {
        let cb = &config.circuit_breaker;
        CircuitBreakerState::new(
            BreakerConfig {
                enabled: cb.enabled,
                max_daily_loss_percent: cb.max_daily_loss_percent,
                max_total_loss_percent: cb.max_total_loss_percent,
                cooldown_minutes: cb.cooldown_minutes,
                auto_reset_at_midnight: cb.auto_reset_at_midnight,
            },
            I256::from((cb.initial_portfolio_eth * 1e18) as i128),
            chrono::Utc::now(),
        )
    });
    let breaker = Arc::new(CircuitBreaker::new(breaker_state));

    let ledger = Arc::new(TradeLedger::with_records(snapshot.trades.clone()));

    let alerts = Arc::new(AlertHub::new(AlertConfig {
        telegram_token: config.notifications.telegram_token.clone(),
        telegram_chat_id: config.notifications.telegram_chat_id.clone(),
        webhook_url: config.notifications.webhook_url.clone(),
    }));

    Ok(Arc::new(BotServices {
        oracle,
        dex,
        chain: Arc::new(chain),
        vault,
        store,
        breaker,
        ledger,
        alerts,
        receipt_timeout: Duration::from_secs(config.supervisor.receipt_timeout_secs),
    }))
}

// ═══════════════════════════════════════════════════════════════════════════
// COMMANDS
// ═══════════════════════════════════════════════════════════════════════════

async fn cmd_validate_setup(config: &Config) -> Result<()> {
    println!("🔍 Validating setup...\n");

    config.validate()?;
    println!("  {} configuration valid", "✓".green());

    parse_feed_table(config)?;
    println!("  {} chainlink feed table parses", "✓".green());

    let state_path = config.state_file_path();
    if let Some(dir) = state_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("state directory {} is not writable", dir.display()))?;
    }
    println!("  {} state directory writable", "✓".green());

    if std::env::var("ZEROX_API_KEY").is_err() {
        println!("  {} ZEROX_API_KEY not set (quotes may be rate-limited)", "!".yellow());
    } else {
        println!("  {} ZEROX_API_KEY set", "✓".green());
    }
    if std::env::var("WALLET_PASSWORD").is_err() {
        println!(
            "  {} WALLET_PASSWORD not set (daemon start will prompt)",
            "!".yellow()
        );
    } else {
        println!("  {} WALLET_PASSWORD set", "✓".green());
    }

    // Store must at least load (catches corrupt state early)
    let store = BotStore::open(&state_path).await?;
    println!(
        "  {} state file ok ({} bot(s), {} trade(s))",
        "✓".green(),
        store.bots().await.len(),
        store.trades().await.len()
    );

    println!("\n{}", "Setup looks good.".green().bold());
    Ok(())
}

async fn cmd_start(config: Config) -> Result<()> {
    print_banner(&config);

    let store_probe = BotStore::open(config.state_file_path()).await?;
    let needs_signing = !store_probe.bots().await.is_empty()
        || !store_probe.snapshot().await.wallet_dictionary.is_empty();
    drop(store_probe);

    let password = wallet_password(needs_signing)?;
    let services = build_services(&config, password).await?;

    let supervisor = Arc::new(HeartbeatSupervisor::new(
        Arc::clone(&services),
        config.supervisor.clone(),
        config.daemon.summary_interval_secs,
    ));
    supervisor.load_bots().await?;
    supervisor.start().await;

    // Pid file lets `stop` and `status` find the daemon
    let pid_file = config.pid_file_path();
    if let Some(dir) = pid_file.parent() {
        std::fs::create_dir_all(dir).ok();
    }
    std::fs::write(&pid_file, std::process::id().to_string())
        .with_context(|| format!("failed to write pid file {}", pid_file.display()))?;

    info!("Daemon running (pid {}). Ctrl-C or SIGTERM to stop.", std::process::id());
    wait_for_shutdown().await;

    warn!("🛑 Shutdown requested - draining supervisor");
    supervisor.stop().await;
    std::fs::remove_file(&pid_file).ok();

    info!("🌙 Daemon exited cleanly");
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("sigterm handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn cmd_stop(config: &Config) -> Result<()> {
    let pid_file = config.pid_file_path();
    let pid = std::fs::read_to_string(&pid_file)
        .with_context(|| format!("no pid file at {} - is the daemon running?", pid_file.display()))?;
    let pid = pid.trim();

    let status = std::process::Command::new("kill").arg(pid).status()?;
    if !status.success() {
        bail!("kill {} failed - stale pid file?", pid);
    }
    println!("Sent SIGTERM to daemon (pid {})", pid);
    Ok(())
}

async fn cmd_status(config: &Config) -> Result<()> {
    let store = BotStore::open(config.state_file_path()).await?;
    let snapshot = store.snapshot().await;

    let pid_alive = std::fs::read_to_string(config.pid_file_path())
        .ok()
        .map(|pid| PathBuf::from(format!("/proc/{}", pid.trim())).exists())
        .unwrap_or(false);

    println!("\n📊 {} status\n", base_grid_bot::NAME.bold());
    println!(
        "  Daemon:           {}",
        if pid_alive { "running".green() } else { "stopped".red() }
    );
    println!("  Bots:             {}", snapshot.bots.len());
    println!("  Trades:           {}", snapshot.trades.len());

    if let Some(cb) = &snapshot.circuit_breaker {
        println!(
            "  Circuit breaker:  {}",
            if cb.triggered {
                format!("TRIPPED ({})", cb.reason.clone().unwrap_or_default()).red()
            } else {
                "armed".green()
            }
        );
    }

    let mut total_profit = I256::zero();
    for bot in &snapshot.bots {
        total_profit += bot.total_profit_eth;
        let holding = bot
            .positions
            .iter()
            .filter(|p| p.status == base_grid_bot::trading::PositionStatus::Holding)
            .count();
        println!(
            "\n  • {} ({})\n    {} | {} buys / {} sells | holding {} | profit {} ETH",
            bot.name.bold(),
            bot.id,
            if bot.is_running && bot.enabled {
                "running".green()
            } else {
                "stopped".red()
            },
            bot.total_buys,
            bot.total_sells,
            holding,
            wei_to_eth_string_signed(bot.total_profit_eth)
        );
    }

    println!(
        "\n  Portfolio profit: {} ETH\n",
        wei_to_eth_string_signed(total_profit).bold()
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_create_bot(
    config: &Config,
    name: String,
    token: String,
    symbol: String,
    floor: Option<f64>,
    ceiling: Option<f64>,
    positions: usize,
    take_profit: f64,
    heartbeat_ms: u64,
    buy_amount_eth: Option<f64>,
    use_main_wallet: bool,
    volume_buys_per_cycle: Option<u32>,
    volume_buy_amount_eth: Option<f64>,
    dry_run: bool,
) -> Result<()> {
    Address::from_str(&token).context("--token is not a valid address")?;

    let password = wallet_password(true)?.unwrap_or_default();
    let store = BotStore::open(config.state_file_path()).await?;
    let snapshot = store.snapshot().await;

    let vault = WalletVault::new(password);
    vault
        .load(snapshot.wallet_dictionary, snapshot.primary_wallet_id.clone())
        .await;

    let (wallet_address, primary_id) = if use_main_wallet {
        let address = vault
            .primary_wallet_address()
            .await
            .context("--use-main-wallet set but the vault has no primary wallet")?;
        // Prove the password can actually unseal it before creating the bot
        vault.signer_for(&address).await?;
        (address, snapshot.primary_wallet_id)
    } else {
        let (id, record) = vault.create_wallet(&name).await?;
        let primary = snapshot.primary_wallet_id.or_else(|| Some(id.clone()));
        (record.address, primary)
    };
    store
        .set_wallets(vault.wallet_dictionary().await, primary_id)
        .await?;

    let mode = match (volume_buys_per_cycle, volume_buy_amount_eth) {
        (Some(buys), Some(amount)) => Mode::Volume(VolumeSettings {
            volume_buys_per_cycle: buys,
            volume_buy_amount_wei: eth_to_wei(amount)?,
        }),
        (None, None) => {
            let floor = floor.context("grid mode requires --floor")?;
            let ceiling = ceiling.context("grid mode requires --ceiling")?;
            Mode::Grid(GridSettings {
                num_positions: positions,
                floor_price: floor,
                ceiling_price: ceiling,
                take_profit_percent: take_profit,
                stop_loss_percent: 0.0,
                stop_loss_enabled: false,
                moon_bag_enabled: false,
                moon_bag_percent: 0.0,
                min_profit_percent: 1.0,
                max_active_positions: positions,
                use_fixed_buy_amount: buy_amount_eth.is_some(),
                buy_amount_wei: buy_amount_eth.map(eth_to_wei).transpose()?.unwrap_or_default(),
            })
        }
        _ => bail!("volume mode requires both --volume-buys-per-cycle and --volume-buy-amount-eth"),
    };

    let settings = BotSettings {
        heartbeat_ms,
        dry_run,
        mode,
        ..Default::default()
    };

    let bot = BotInstance::new(
        name.clone(),
        config.network.chain.clone(),
        token,
        symbol,
        wallet_address.clone(),
        use_main_wallet,
        settings,
        0.0,
    )?;
    let id = bot.id;
    store.save_bot(&bot).await?;

    println!("✅ Bot '{}' created", name.bold());
    println!("   id:     {}", id);
    println!("   wallet: {}", wallet_address);
    println!("   Fund the wallet and (re)start the daemon to begin trading.");
    Ok(())
}

fn eth_to_wei(amount: f64) -> Result<U256> {
    if !(amount > 0.0) {
        bail!("ETH amount must be positive");
    }
    Ok(U256::from((amount * 1e18) as u128))
}

async fn cmd_delete_bot(config: &Config, id: Uuid) -> Result<()> {
    let store = BotStore::open(config.state_file_path()).await?;
    if store.delete_bot(id).await? {
        println!("✅ Bot {} deleted", id);
        Ok(())
    } else {
        bail!("no bot with id {}", id);
    }
}

async fn cmd_liquidate_all(config: &Config, id: Option<Uuid>) -> Result<()> {
    let password = wallet_password(true)?;
    let services = build_services(config, password).await?;

    let supervisor = Arc::new(HeartbeatSupervisor::new(
        services,
        config.supervisor.clone(),
        0,
    ));
    supervisor.load_bots().await?;

    let report = supervisor.liquidate(id).await?;
    println!(
        "🧹 Liquidation finished: {} sold, {} failed",
        report.success, report.failed
    );
    if report.failed > 0 {
        bail!("{} position(s) could not be liquidated", report.failed);
    }
    Ok(())
}

async fn cmd_export_csv(config: &Config, output: PathBuf) -> Result<()> {
    let store = BotStore::open(config.state_file_path()).await?;
    let trades = store.trades().await;
    let count = export_csv(&trades, &output)?;
    println!("✅ Exported {} trade(s) to {}", count, output.display());
    Ok(())
}

async fn cmd_tail_logs(config: &Config, lines: usize) -> Result<()> {
    let path = config.log_file_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("no log file at {}", path.display()))?;

    let tail: Vec<&str> = contents.lines().rev().take(lines).collect();
    for line in tail.iter().rev() {
        println!("{}", line);
    }

    // Follow new output until interrupted
    let mut offset = contents.len() as u64;
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let metadata = std::fs::metadata(&path)?;
        if metadata.len() > offset {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = std::fs::File::open(&path)?;
            file.seek(SeekFrom::Start(offset))?;
            let mut fresh = String::new();
            file.read_to_string(&mut fresh)?;
            print!("{}", fresh);
            offset = metadata.len();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MAIN
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ Configuration error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    let log_file = matches!(&args.command, Command::Start).then(|| config.log_file_path());
    if let Err(e) = setup_logging(&args, log_file) {
        eprintln!("❌ Logging setup failed: {:#}", e);
        return ExitCode::from(2);
    }

    let result = match args.command {
        Command::ValidateSetup => match cmd_validate_setup(&config).await {
            Ok(()) => return ExitCode::SUCCESS,
            Err(e) => {
                error!("❌ Validation failed: {:#}", e);
                return ExitCode::from(1);
            }
        },
        Command::Start => cmd_start(config).await,
        Command::Stop => cmd_stop(&config),
        Command::Status => cmd_status(&config).await,
        Command::CreateBot {
            name,
            token,
            symbol,
            floor,
            ceiling,
            positions,
            take_profit,
            heartbeat_ms,
            buy_amount_eth,
            use_main_wallet,
            volume_buys_per_cycle,
            volume_buy_amount_eth,
            dry_run,
        } => {
            cmd_create_bot(
                &config,
                name,
                token,
                symbol,
                floor,
                ceiling,
                positions,
                take_profit,
                heartbeat_ms,
                buy_amount_eth,
                use_main_wallet,
                volume_buys_per_cycle,
                volume_buy_amount_eth,
                dry_run,
            )
            .await
        }
        Command::DeleteBot { id } => cmd_delete_bot(&config, id).await,
        Command::LiquidateAll { id } => cmd_liquidate_all(&config, id).await,
        Command::ExportCsv { output } => cmd_export_csv(&config, output).await,
        Command::TailLogs { lines } => cmd_tail_logs(&config, lines).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {:#}", e);
            ExitCode::from(2)
        }
    }
}
