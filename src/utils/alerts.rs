//! Notification fan-out
//!
//! Pure consumer of engine events: renders each event as plain text with
//! its structured fields and pushes it to every configured channel
//! (Telegram bot API, generic webhook). Fire-and-forget with a short
//! timeout; a down channel never blocks a tick.

use log::warn;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

const SEND_TIMEOUT_SECS: u64 = 5;

/// Event taxonomy pushed to operators.
#[derive(Debug, Clone)]
pub enum AlertEvent {
    Trade {
        bot_name: String,
        action: String,
        token_symbol: String,
        amount: String,
        eth_value: String,
        tx_hash: String,
    },
    Profit {
        bot_name: String,
        token_symbol: String,
        profit_eth: String,
        profit_percent: f64,
    },
    Error {
        bot_name: String,
        step: String,
        message: String,
    },
    Warning {
        message: String,
    },
    Summary {
        total_bots: usize,
        running_bots: usize,
        total_trades: usize,
        total_profit_eth: String,
    },
    CircuitBreaker {
        reason: String,
        daily_loss_percent: f64,
        total_loss_percent: f64,
    },
    StatusChange {
        bot_name: String,
        running: bool,
        reason: String,
    },
}

impl AlertEvent {
    pub fn render(&self) -> String {
        match self {
            Self::Trade {
                bot_name,
                action,
                token_symbol,
                amount,
                eth_value,
                tx_hash,
            } => format!(
                "💱 Trade\nBot: {}\nAction: {} {} {}\nETH value: {}\nTx: {}",
                bot_name, action, amount, token_symbol, eth_value, tx_hash
            ),
            Self::Profit {
                bot_name,
                token_symbol,
                profit_eth,
                profit_percent,
            } => format!(
                "💰 Profit\nBot: {}\nToken: {}\nProfit: {} ETH ({:+.2}%)",
                bot_name, token_symbol, profit_eth, profit_percent
            ),
            Self::Error {
                bot_name,
                step,
                message,
            } => format!("🚨 Error\nBot: {}\nStep: {}\n{}", bot_name, step, message),
            Self::Warning { message } => format!("⚠️ Warning\n{}", message),
            Self::Summary {
                total_bots,
                running_bots,
                total_trades,
                total_profit_eth,
            } => format!(
                "📊 Portfolio Summary\nBots: {} ({} running)\nTrades: {}\nTotal profit: {} ETH",
                total_bots, running_bots, total_trades, total_profit_eth
            ),
            Self::CircuitBreaker {
                reason,
                daily_loss_percent,
                total_loss_percent,
            } => format!(
                "⛔ Circuit Breaker\n{}\nDaily loss: {:.2}%\nTotal loss: {:.2}%",
                reason, daily_loss_percent, total_loss_percent
            ),
            Self::StatusChange {
                bot_name,
                running,
                reason,
            } => format!(
                "{} Bot {}\n{} - {}",
                if *running { "▶️" } else { "⏹️" },
                if *running { "started" } else { "stopped" },
                bot_name,
                reason
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlertConfig {
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub webhook_url: Option<String>,
}

pub struct AlertHub {
    http: Client,
    telegram: Option<(String, String)>,
    webhook_url: Option<String>,
}

impl AlertHub {
    pub fn new(config: AlertConfig) -> Self {
        let telegram = match (config.telegram_token, config.telegram_chat_id) {
            (Some(token), Some(chat_id)) if !token.is_empty() && !chat_id.is_empty() => {
                Some((token, chat_id))
            }
            _ => None,
        };
        Self {
            http: Client::new(),
            telegram,
            webhook_url: config.webhook_url.filter(|u| !u.is_empty()),
        }
    }

    /// No channels configured: events only reach the log.
    pub fn disabled() -> Self {
        Self::new(AlertConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.telegram.is_some() || self.webhook_url.is_some()
    }

    /// Push an event to every channel. Failures are logged and swallowed.
    pub async fn send(&self, event: AlertEvent) {
        let text = event.render();
        log::debug!("alert: {}", text.replace('\n', " | "));

        if let Some((token, chat_id)) = &self.telegram {
            let url = format!("https://api.telegram.org/bot{}/sendMessage", token);
            let result = self
                .http
                .post(&url)
                .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
                .json(&json!({"chat_id": chat_id, "text": text}))
                .send()
                .await;
            if let Err(e) = result {
                warn!("Telegram send failed: {}", e);
            }
        }

        if let Some(url) = &self.webhook_url {
            let result = self
                .http
                .post(url)
                .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
                .json(&json!({"text": text}))
                .send()
                .await;
            if let Err(e) = result {
                warn!("Webhook send failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_rendering_carries_fields() {
        let text = AlertEvent::Profit {
            bot_name: "grid-1".into(),
            token_symbol: "TKN".into(),
            profit_eth: "0.0025".into(),
            profit_percent: 12.5,
        }
        .render();
        assert!(text.contains("grid-1"));
        assert!(text.contains("0.0025"));
        assert!(text.contains("+12.50%"));

        let text = AlertEvent::CircuitBreaker {
            reason: "daily loss 6.00% exceeds limit 5.0%".into(),
            daily_loss_percent: 6.0,
            total_loss_percent: 6.0,
        }
        .render();
        assert!(text.contains("Circuit Breaker"));
        assert!(text.contains("6.00%"));
    }

    #[test]
    fn test_hub_enablement() {
        assert!(!AlertHub::disabled().is_enabled());

        let hub = AlertHub::new(AlertConfig {
            telegram_token: Some("t".into()),
            telegram_chat_id: Some("c".into()),
            webhook_url: None,
        });
        assert!(hub.is_enabled());

        // Token without a chat id is not a usable channel
        let hub = AlertHub::new(AlertConfig {
            telegram_token: Some("t".into()),
            telegram_chat_id: None,
            webhook_url: None,
        });
        assert!(!hub.is_enabled());
    }

    #[test]
    fn test_disabled_hub_send_is_noop() {
        // Must not panic or hang without any configured channel
        tokio_test::block_on(AlertHub::disabled().send(AlertEvent::Warning {
            message: "test".into(),
        }));
    }
}
