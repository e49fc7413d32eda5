//! ═══════════════════════════════════════════════════════════════════════════
//! CONFIGURATION - Daemon Settings
//!
//! TOML file + environment overrides. Per-bot settings live with each bot
//! in the state file; this is only what the daemon itself needs: chain
//! endpoints, oracle tuning, aggregator access, scheduler cadence, the
//! circuit breaker, and notification channels.
//!
//! Secrets never live in the TOML: `WALLET_PASSWORD`, `ZEROX_API_KEY`, and
//! `TELEGRAM_BOT_TOKEN` come from the environment only.
//! ═══════════════════════════════════════════════════════════════════════════

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::trading::price_oracle::PreferredSource;

// ═══════════════════════════════════════════════════════════════════════════
// SECTIONS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub state_file: String,
    pub log_file: String,
    pub pid_file: String,
    /// Cadence of the portfolio summary notification; 0 disables it
    pub summary_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: "~/.base-grid-bot/state.json".into(),
            log_file: "~/.base-grid-bot/daemon.log".into(),
            pid_file: "~/.base-grid-bot/daemon.pid".into(),
            summary_interval_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Key into the static chain address table ("base", "ethereum")
    pub chain: String,
    pub rpc_url: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chain: "base".into(),
            rpc_url: "https://mainnet.base.org".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub preference: PreferredSource,
    pub allow_fallback: bool,
    pub stale_threshold_secs: u64,
    pub twap_window_secs: u32,
    pub price_timeout_secs: u64,
    pub cache_max_age_secs: u64,
    /// token address → Chainlink aggregator proxy address
    pub chainlink_feeds: HashMap<String, String>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            preference: PreferredSource::Chainlink,
            allow_fallback: true,
            stale_threshold_secs: 3_600,
            twap_window_secs: 1_800,
            price_timeout_secs: 10,
            cache_max_age_secs: 3_600,
            chainlink_feeds: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub base_url: String,
    pub quote_timeout_secs: u64,
    /// From `ZEROX_API_KEY`; never set in the TOML
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://base.api.0x.org".into(),
            quote_timeout_secs: 15,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Floor of the base scheduler cadence
    pub base_tick_ms: u64,
    pub shutdown_grace_secs: u64,
    pub receipt_timeout_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            base_tick_ms: 250,
            shutdown_grace_secs: 2,
            receipt_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub max_daily_loss_percent: f64,
    pub max_total_loss_percent: f64,
    pub cooldown_minutes: i64,
    pub auto_reset_at_midnight: bool,
    /// Baseline portfolio value for loss percentages, in ETH
    pub initial_portfolio_eth: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_daily_loss_percent: 5.0,
            max_total_loss_percent: 15.0,
            cooldown_minutes: 60,
            auto_reset_at_midnight: true,
            initial_portfolio_eth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub telegram_chat_id: Option<String>,
    pub webhook_url: Option<String>,
    /// From `TELEGRAM_BOT_TOKEN`; never set in the TOML
    #[serde(skip)]
    pub telegram_token: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// ROOT
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub network: NetworkConfig,
    pub oracle: OracleConfig,
    pub aggregator: AggregatorConfig,
    pub supervisor: SupervisorConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub notifications: NotificationConfig,
}

impl Config {
    /// Load from a TOML file, then apply environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults + environment only (no config file present).
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("BASE_RPC_URL") {
            if !url.is_empty() {
                self.network.rpc_url = url;
            }
        }
        if let Ok(key) = std::env::var("ZEROX_API_KEY") {
            if !key.is_empty() {
                self.aggregator.api_key = Some(key);
            }
        }
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !token.is_empty() {
                self.notifications.telegram_token = Some(token);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.rpc_url.is_empty() {
            bail!("network.rpc_url cannot be empty");
        }
        if crate::rpc::chain_profile(&self.network.chain).is_none() {
            bail!(
                "network.chain '{}' has no address table (known: base, ethereum)",
                self.network.chain
            );
        }
        if self.oracle.price_timeout_secs == 0 {
            bail!("oracle.price_timeout_secs must be positive");
        }
        if self.oracle.twap_window_secs == 0 {
            bail!("oracle.twap_window_secs must be positive");
        }
        if self.aggregator.base_url.is_empty() {
            bail!("aggregator.base_url cannot be empty");
        }
        if self.aggregator.quote_timeout_secs == 0 {
            bail!("aggregator.quote_timeout_secs must be positive");
        }
        if self.supervisor.base_tick_ms < 250 {
            bail!("supervisor.base_tick_ms must be at least 250");
        }
        if self.circuit_breaker.max_daily_loss_percent <= 0.0
            || self.circuit_breaker.max_total_loss_percent <= 0.0
        {
            bail!("circuit_breaker loss limits must be positive");
        }
        if self.circuit_breaker.cooldown_minutes < 0 {
            bail!("circuit_breaker.cooldown_minutes cannot be negative");
        }
        if self.circuit_breaker.initial_portfolio_eth <= 0.0 {
            bail!("circuit_breaker.initial_portfolio_eth must be positive");
        }
        for (token, feed) in &self.oracle.chainlink_feeds {
            if !token.starts_with("0x") || !feed.starts_with("0x") {
                bail!("oracle.chainlink_feeds entries must be 0x-prefixed addresses");
            }
        }
        Ok(())
    }

    /// Tilde-expanded state file path.
    pub fn state_file_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.daemon.state_file).into_owned())
    }

    pub fn log_file_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.daemon.log_file).into_owned())
    }

    pub fn pid_file_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.daemon.pid_file).into_owned())
    }

    pub fn display_summary(&self) {
        println!("  Chain:             {}", self.network.chain);
        println!("  RPC:               {}", self.network.rpc_url);
        println!("  State file:        {}", self.daemon.state_file);
        println!(
            "  Oracle:            prefer {:?}, fallback {}",
            self.oracle.preference,
            if self.oracle.allow_fallback { "on" } else { "off" }
        );
        println!(
            "  Aggregator:        {} (api key {})",
            self.aggregator.base_url,
            if self.aggregator.api_key.is_some() { "set" } else { "missing" }
        );
        println!(
            "  Circuit breaker:   daily {:.1}% / total {:.1}% / cooldown {}m",
            self.circuit_breaker.max_daily_loss_percent,
            self.circuit_breaker.max_total_loss_percent,
            self.circuit_breaker.cooldown_minutes
        );
        println!(
            "  Notifications:     telegram {}, webhook {}",
            if self.notifications.telegram_token.is_some() { "on" } else { "off" },
            if self.notifications.webhook_url.is_some() { "on" } else { "off" }
        );
        println!();
    }
}
