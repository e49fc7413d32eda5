//! ═══════════════════════════════════════════════════════════════════════════
//! ⚠️  CIRCUIT BREAKER - Portfolio Loss Guard
//!
//! Singleton across all bots. Trips when the portfolio's daily or total
//! loss exceeds its configured limits:
//! • daily loss measured against the start-of-day value snapshot
//! • total loss measured against the initial portfolio baseline
//!
//! While tripped, every bot refuses new buys; sells stay allowed so the
//! portfolio can still de-risk. A cooldown auto-reset re-arms the breaker,
//! and (optionally) the daily baseline re-snapshots at midnight UTC.
//! ═══════════════════════════════════════════════════════════════════════════

use chrono::{DateTime, Duration, Utc};
use ethers::types::I256;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::utils::format::{day_key, serde_wei_signed};

/// Epsilon (in ETH) guarding division by a zero-value baseline
const VALUE_EPSILON_ETH: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerConfig {
    pub enabled: bool,
    pub max_daily_loss_percent: f64,
    pub max_total_loss_percent: f64,
    pub cooldown_minutes: i64,
    pub auto_reset_at_midnight: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_daily_loss_percent: 5.0,
            max_total_loss_percent: 15.0,
            cooldown_minutes: 60,
            auto_reset_at_midnight: true,
        }
    }
}

/// Persisted breaker state (one per deployment).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub enabled: bool,
    pub triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    /// Portfolio value at the start of the current day, wei
    #[serde(with = "serde_wei_signed")]
    pub daily_start_value: I256,
    /// Cumulative profit at the start of the current day, wei
    #[serde(with = "serde_wei_signed")]
    pub daily_start_profit: I256,
    /// Portfolio value baseline at deployment, wei; never re-snapshotted
    #[serde(with = "serde_wei_signed")]
    pub total_start_value: I256,
    /// YYYY-MM-DD (UTC)
    pub daily_start_date: String,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub config: BreakerConfig,
}

impl CircuitBreakerState {
    pub fn new(config: BreakerConfig, initial_value_wei: I256, now: DateTime<Utc>) -> Self {
        Self {
            enabled: config.enabled,
            triggered: false,
            triggered_at: None,
            reason: None,
            daily_start_value: initial_value_wei,
            daily_start_profit: I256::zero(),
            total_start_value: initial_value_wei,
            daily_start_date: day_key(now),
            cooldown_until: None,
            config,
        }
    }
}

/// Outcome of a pre-buy check.
#[derive(Debug, Clone)]
pub struct BreakerVerdict {
    pub triggered: bool,
    /// True only on the transition tick; drives the one-shot alert
    pub newly_triggered: bool,
    pub reason: Option<String>,
    pub daily_loss_percent: f64,
    pub total_loss_percent: f64,
}

pub struct CircuitBreaker {
    state: Mutex<CircuitBreakerState>,
}

fn wei_to_eth_f64(v: I256) -> f64 {
    v.to_string().parse::<f64>().unwrap_or(0.0) / 1e18
}

impl CircuitBreaker {
    pub fn new(state: CircuitBreakerState) -> Self {
        info!("⚠️  Circuit breaker armed");
        info!("   Max daily loss:   {:.1}%", state.config.max_daily_loss_percent);
        info!("   Max total loss:   {:.1}%", state.config.max_total_loss_percent);
        info!("   Cooldown:         {} min", state.config.cooldown_minutes);
        Self {
            state: Mutex::new(state),
        }
    }

    /// Evaluate the portfolio before a buy. `portfolio_profit_wei` is the
    /// signed sum of every bot's `total_profit_eth`.
    pub async fn check(&self, portfolio_profit_wei: I256, now: DateTime<Utc>) -> BreakerVerdict {
        let mut state = self.state.lock().await;

        if !state.enabled {
            return BreakerVerdict {
                triggered: false,
                newly_triggered: false,
                reason: None,
                daily_loss_percent: 0.0,
                total_loss_percent: 0.0,
            };
        }

        // Day rollover re-baselines the daily snapshot
        let today = day_key(now);
        if state.config.auto_reset_at_midnight && today != state.daily_start_date {
            let current_value =
                state.daily_start_value + (portfolio_profit_wei - state.daily_start_profit);
            info!(
                "📅 New trading day {} - daily baseline re-snapshotted",
                today
            );
            state.daily_start_value = current_value;
            state.daily_start_profit = portfolio_profit_wei;
            state.daily_start_date = today;
        }

        // Cooldown expiry re-arms the breaker
        if state.triggered {
            if let Some(until) = state.cooldown_until {
                if now >= until {
                    info!("✅ Circuit breaker cooldown complete - trading re-enabled");
                    state.triggered = false;
                    state.triggered_at = None;
                    state.reason = None;
                    state.cooldown_until = None;
                }
            }
        }

        let daily_start_eth = wei_to_eth_f64(state.daily_start_value);
        let current_value_eth =
            daily_start_eth + wei_to_eth_f64(portfolio_profit_wei - state.daily_start_profit);
        let daily_loss_percent = (daily_start_eth - current_value_eth)
            / daily_start_eth.abs().max(VALUE_EPSILON_ETH)
            * 100.0;

        let total_start_eth = wei_to_eth_f64(state.total_start_value);
        let total_loss_percent = -wei_to_eth_f64(portfolio_profit_wei)
            / total_start_eth.abs().max(VALUE_EPSILON_ETH)
            * 100.0;

        let mut newly_triggered = false;
        if !state.triggered {
            let breach = if daily_loss_percent > state.config.max_daily_loss_percent {
                Some(format!(
                    "daily loss {:.2}% exceeds limit {:.1}%",
                    daily_loss_percent, state.config.max_daily_loss_percent
                ))
            } else if total_loss_percent > state.config.max_total_loss_percent {
                Some(format!(
                    "total loss {:.2}% exceeds limit {:.1}%",
                    total_loss_percent, state.config.max_total_loss_percent
                ))
            } else {
                None
            };

            if let Some(reason) = breach {
                error!("🚨 CIRCUIT BREAKER TRIPPED - {}", reason);
                error!("   All buys halted for {} min (sells still allowed)", state.config.cooldown_minutes);
                state.triggered = true;
                state.triggered_at = Some(now);
                state.cooldown_until = Some(now + Duration::minutes(state.config.cooldown_minutes));
                state.reason = Some(reason);
                newly_triggered = true;
            }
        }

        BreakerVerdict {
            triggered: state.triggered,
            newly_triggered,
            reason: state.reason.clone(),
            daily_loss_percent,
            total_loss_percent,
        }
    }

    pub async fn is_triggered(&self) -> bool {
        self.state.lock().await.triggered
    }

    /// Manual trip (operator command or fatal portfolio event).
    pub async fn trip(&self, reason: &str, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        warn!("🚨 Manual circuit breaker trip: {}", reason);
        state.triggered = true;
        state.triggered_at = Some(now);
        state.cooldown_until = Some(now + Duration::minutes(state.config.cooldown_minutes));
        state.reason = Some(reason.to_string());
    }

    /// Manual reset, clearing any pending cooldown.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        info!("🔄 Circuit breaker manually reset");
        state.triggered = false;
        state.triggered_at = None;
        state.reason = None;
        state.cooldown_until = None;
    }

    /// Snapshot for persistence.
    pub async fn snapshot(&self) -> CircuitBreakerState {
        self.state.lock().await.clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn eth(v: f64) -> I256 {
        I256::from((v * 1e18) as i128)
    }

    fn breaker(max_daily: f64, max_total: f64, cooldown_min: i64) -> CircuitBreaker {
        let config = BreakerConfig {
            enabled: true,
            max_daily_loss_percent: max_daily,
            max_total_loss_percent: max_total,
            cooldown_minutes: cooldown_min,
            auto_reset_at_midnight: true,
        };
        CircuitBreaker::new(CircuitBreakerState::new(config, eth(1.0), Utc::now()))
    }

    #[tokio::test]
    async fn test_no_trip_within_limits() {
        let b = breaker(5.0, 15.0, 60);
        let v = b.check(eth(-0.04), Utc::now()).await;
        assert!(!v.triggered);
        assert!((v.daily_loss_percent - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_daily_loss_trips_and_cooldown_resets() {
        // 1 ETH start, 5% daily limit, profit dips to -0.06 ETH
        let b = breaker(5.0, 50.0, 60);
        let now = Utc::now();

        let v = b.check(eth(-0.06), now).await;
        assert!(v.triggered);
        assert!(v.newly_triggered);
        assert!((v.daily_loss_percent - 6.0).abs() < 1e-9);
        assert!(v.reason.unwrap().contains("daily loss"));

        // Still tripped inside the cooldown window
        let v = b.check(eth(-0.06), now + Duration::minutes(30)).await;
        assert!(v.triggered);
        assert!(!v.newly_triggered);

        // Auto-reset once the cooldown elapses
        let v = b.check(eth(-0.06), now + Duration::minutes(61)).await;
        assert!(!v.triggered);
    }

    #[tokio::test]
    async fn test_total_loss_trips() {
        let b = breaker(50.0, 10.0, 60);
        let v = b.check(eth(-0.12), Utc::now()).await;
        assert!(v.triggered);
        assert!(v.reason.unwrap().contains("total loss"));
        assert!((v.total_loss_percent - 12.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_midnight_rebaseline() {
        let b = breaker(5.0, 90.0, 60);
        let day1 = Utc::now();

        // -4% today: no trip
        let v = b.check(eth(-0.04), day1).await;
        assert!(!v.triggered);

        // Next day the baseline re-snapshots at the lower value, so the
        // same cumulative profit is no longer a daily loss
        let day2 = day1 + Duration::days(1);
        let v = b.check(eth(-0.04), day2).await;
        assert!(!v.triggered);
        assert!(v.daily_loss_percent.abs() < 1e-9);

        // A further 4.9% drop measured against the new 0.96 baseline stays
        // under the daily limit; 5.3% trips
        let v = b.check(eth(-0.04 - 0.96 * 0.049), day2).await;
        assert!(!v.triggered);
        let v = b.check(eth(-0.04 - 0.96 * 0.053), day2).await;
        assert!(v.triggered);
    }

    #[tokio::test]
    async fn test_disabled_breaker_never_trips() {
        let config = BreakerConfig {
            enabled: false,
            ..Default::default()
        };
        let b = CircuitBreaker::new(CircuitBreakerState::new(config, eth(1.0), Utc::now()));
        let v = b.check(eth(-0.99), Utc::now()).await;
        assert!(!v.triggered);
    }

    #[tokio::test]
    async fn test_manual_trip_and_reset() {
        let b = breaker(5.0, 15.0, 60);
        b.trip("operator halt", Utc::now()).await;
        assert!(b.is_triggered().await);

        b.reset().await;
        assert!(!b.is_triggered().await);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let b = breaker(5.0, 15.0, 60);
        b.check(eth(-0.06), Utc::now()).await;

        let snap = b.snapshot().await;
        assert!(snap.triggered);

        let json = serde_json::to_string(&snap).unwrap();
        let restored: CircuitBreakerState = serde_json::from_str(&json).unwrap();
        assert!(restored.triggered);
        assert_eq!(restored.daily_start_value, snap.daily_start_value);

        let b2 = CircuitBreaker::new(restored);
        assert!(b2.is_triggered().await);
    }
}
