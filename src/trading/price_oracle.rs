//! ═══════════════════════════════════════════════════════════════════════════
//! PRICE ORACLE - Source Aggregation & Confidence
//!
//! Composes the Chainlink reader and the Uniswap V3 TWAP reader into a
//! single `get_price(token)` with cross-validation:
//! - both agree within 5%      → combined mean, confidence mean + 0.1 (cap 1)
//! - both disagree             → higher-confidence source, -0.2 (floor 0.3)
//! - one source                → that source as-is
//! - none                     → last good reading as `fallback` (conf ≤ 0.3)
//!
//! The preference setting picks which source is tried first and whether the
//! other may be consulted at all. Every fetch is bounded by the configured
//! price timeout.
//! ═══════════════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethers::types::Address;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::EngineResult;

/// Maximum relative disagreement for the combined reading
const AGREEMENT_THRESHOLD: f64 = 0.05;

/// Penalty applied when the two sources disagree
const DISAGREEMENT_PENALTY: f64 = 0.2;

/// Confidence floor after the disagreement penalty
const DISAGREEMENT_FLOOR: f64 = 0.3;

/// Ceiling for any cached fallback reading
const FALLBACK_CONFIDENCE_CAP: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceSource {
    Chainlink,
    UniswapV3,
    Combined,
    Fallback,
}

impl std::fmt::Display for PriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chainlink => write!(f, "chainlink"),
            Self::UniswapV3 => write!(f, "uniswap-v3"),
            Self::Combined => write!(f, "combined"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// One reading from a single source, before aggregation.
#[derive(Debug, Clone, Copy)]
pub struct FeedReading {
    pub price: f64,
    pub confidence: f64,
    pub source: PriceSource,
    pub observed_at: DateTime<Utc>,
}

/// Aggregated observation handed to the bots. Recomputed per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceData {
    pub price: f64,
    pub source: PriceSource,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub token_address: String,
}

/// A single upstream price source (Chainlink reader, TWAP reader, or a test
/// stub).
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn fetch(&self, token: Address) -> EngineResult<FeedReading>;
    fn source(&self) -> PriceSource;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreferredSource {
    Chainlink,
    UniswapV3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleSettings {
    pub preference: PreferredSource,
    /// When false only the preferred source is consulted
    pub allow_fallback: bool,
    pub price_timeout_secs: u64,
    /// Maximum age of a cached reading served as `fallback`
    pub cache_max_age_secs: u64,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            preference: PreferredSource::Chainlink,
            allow_fallback: true,
            price_timeout_secs: 10,
            cache_max_age_secs: 3_600,
        }
    }
}

/// Validation result for a prospective trade price.
#[derive(Debug, Clone)]
pub struct PriceValidation {
    pub valid: bool,
    pub reason: Option<String>,
    pub data: Option<PriceData>,
}

pub struct PriceOracle {
    chainlink: Option<Arc<dyn PriceFeed>>,
    uniswap: Option<Arc<dyn PriceFeed>>,
    settings: OracleSettings,
    /// Last good aggregate per token, served as `fallback` when live
    /// sources fail
    cache: DashMap<Address, PriceData>,
}

impl PriceOracle {
    pub fn new(
        chainlink: Option<Arc<dyn PriceFeed>>,
        uniswap: Option<Arc<dyn PriceFeed>>,
        settings: OracleSettings,
    ) -> Self {
        Self {
            chainlink,
            uniswap,
            settings,
            cache: DashMap::new(),
        }
    }

    async fn fetch_bounded(
        &self,
        feed: &Arc<dyn PriceFeed>,
        token: Address,
    ) -> Option<FeedReading> {
        let timeout = Duration::from_secs(self.settings.price_timeout_secs);
        match tokio::time::timeout(timeout, feed.fetch(token)).await {
            Ok(Ok(reading)) if reading.price.is_finite() && reading.price > 0.0 => Some(reading),
            Ok(Ok(reading)) => {
                warn!("{} returned unusable price {}", feed.source(), reading.price);
                None
            }
            Ok(Err(e)) => {
                debug!("{} fetch failed for {:#x}: {}", feed.source(), token, e);
                None
            }
            Err(_) => {
                warn!("{} fetch timed out after {:?}", feed.source(), timeout);
                None
            }
        }
    }

    /// Aggregate the available sources for `token`. `None` means no source
    /// answered and no young-enough cached reading exists.
    pub async fn get_price(&self, token: Address) -> Option<PriceData> {
        let (primary, secondary) = match self.settings.preference {
            PreferredSource::Chainlink => (&self.chainlink, &self.uniswap),
            PreferredSource::UniswapV3 => (&self.uniswap, &self.chainlink),
        };

        let first = match primary {
            Some(feed) => self.fetch_bounded(feed, token).await,
            None => None,
        };
        let second = if self.settings.allow_fallback {
            match secondary {
                Some(feed) => self.fetch_bounded(feed, token).await,
                None => None,
            }
        } else {
            None
        };

        // Aggregation wants (chainlink, uniswap) orientation for the
        // deviation denominator regardless of preference order
        let (cl, uni) = match self.settings.preference {
            PreferredSource::Chainlink => (first, second),
            PreferredSource::UniswapV3 => (second, first),
        };

        let aggregated = match (cl, uni) {
            (Some(cl), Some(uni)) => Some(combine_readings(cl, uni)),
            (Some(one), None) | (None, Some(one)) => Some((one.price, one.confidence, one.source)),
            (None, None) => None,
        };

        let data = match aggregated {
            Some((price, confidence, source)) => PriceData {
                price,
                confidence,
                source,
                timestamp: Utc::now(),
                token_address: format!("{:#x}", token),
            },
            None => return self.cached_fallback(token),
        };

        self.cache.insert(token, data.clone());
        Some(data)
    }

    fn cached_fallback(&self, token: Address) -> Option<PriceData> {
        let cached = self.cache.get(&token)?;
        let age = Utc::now()
            .signed_duration_since(cached.timestamp)
            .num_seconds()
            .max(0) as u64;
        if age > self.settings.cache_max_age_secs {
            return None;
        }

        warn!(
            "⚠️ Serving cached price for {:#x} ({}s old) - all live sources down",
            token, age
        );
        let mut data = cached.clone();
        data.source = PriceSource::Fallback;
        data.confidence = data.confidence.min(FALLBACK_CONFIDENCE_CAP);
        Some(data)
    }

    /// Gate a prospective trade on price quality.
    pub async fn validate_price(&self, token: Address, min_confidence: f64) -> PriceValidation {
        match self.get_price(token).await {
            None => PriceValidation {
                valid: false,
                reason: Some("no price source available".into()),
                data: None,
            },
            Some(data) => {
                if !data.price.is_finite() || data.price <= 0.0 {
                    PriceValidation {
                        valid: false,
                        reason: Some(format!("non-positive price {}", data.price)),
                        data: Some(data),
                    }
                } else if data.confidence < min_confidence {
                    PriceValidation {
                        valid: false,
                        reason: Some(format!(
                            "confidence {:.2} below threshold {:.2}",
                            data.confidence, min_confidence
                        )),
                        data: Some(data),
                    }
                } else {
                    PriceValidation {
                        valid: true,
                        reason: None,
                        data: Some(data),
                    }
                }
            }
        }
    }
}

/// Cross-validate a Chainlink reading against a TWAP reading.
fn combine_readings(cl: FeedReading, uni: FeedReading) -> (f64, f64, PriceSource) {
    let deviation = (cl.price - uni.price).abs() / cl.price;

    if deviation < AGREEMENT_THRESHOLD {
        let price = (cl.price + uni.price) / 2.0;
        let confidence = ((cl.confidence + uni.confidence) / 2.0 + 0.1).min(1.0);
        debug!(
            "Sources agree (dev {:.2}%): combined price {:.10}",
            deviation * 100.0,
            price
        );
        (price, confidence, PriceSource::Combined)
    } else {
        let winner = if cl.confidence >= uni.confidence { cl } else { uni };
        let confidence = (winner.confidence - DISAGREEMENT_PENALTY).max(DISAGREEMENT_FLOOR);
        warn!(
            "⚠️ Price sources disagree ({:.1}%): keeping {} at confidence {:.2}",
            deviation * 100.0,
            winner.source,
            confidence
        );
        (winner.price, confidence, winner.source)
    }
}
