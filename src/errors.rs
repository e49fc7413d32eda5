//! ═══════════════════════════════════════════════════════════════════════════
//! ERROR TAXONOMY - Classified failures surfaced at the engine boundary
//!
//! Every failure a bot tick can hit falls into one of these classes. The
//! class decides what happens next:
//! - local errors count against `consecutive_error_count` (5 strikes stops
//!   the bot)
//! - risk rejections are soft and never counted
//! - fatal errors halt the affected bot immediately
//! ═══════════════════════════════════════════════════════════════════════════

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad grid parameters, missing wallet, or an invalid price range.
    /// Fatal at bot creation; never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No price source answered, or confidence fell below the bot threshold.
    #[error("price unavailable: {0}")]
    PriceUnavailable(String),

    /// The aggregator returned null or the quote request failed.
    #[error("quote failure: {0}")]
    QuoteFailure(String),

    /// Receipt status != success, revert, or simulation failure. The
    /// position rolls back to its previous state.
    #[error("transaction failure: {0}")]
    TransactionFailure(String),

    /// Circuit breaker triggered or max active positions reached. Soft;
    /// no counter change.
    #[error("risk rejected: {0}")]
    RiskRejected(String),

    /// The durable store could not be written. Fatal to the bot loop.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The signing key for this bot could not be decrypted. Fatal to the
    /// affected bot only.
    #[error("vault error: {0}")]
    Vault(String),
}

impl EngineError {
    /// Fatal errors stop the bot (`is_running = false`) on first occurrence.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Vault(_) | Self::Configuration(_))
    }

    /// Whether this error increments the bot's consecutive-error counter.
    pub fn counts_against_errors(&self) -> bool {
        matches!(
            self,
            Self::PriceUnavailable(_) | Self::QuoteFailure(_) | Self::TransactionFailure(_)
        )
    }

    /// Short step label used in per-tick error logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::PriceUnavailable(_) => "price",
            Self::QuoteFailure(_) => "quote",
            Self::TransactionFailure(_) => "transaction",
            Self::RiskRejected(_) => "risk",
            Self::Persistence(_) => "persistence",
            Self::Vault(_) => "vault",
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
