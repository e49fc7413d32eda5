//! ═══════════════════════════════════════════════════════════════════════════
//! CHAINLINK PRICE FEED
//!
//! Reads a Chainlink aggregator proxy (`latestRoundData`) and scores the
//! answer:
//! - 0.5x when the round is stale (updated_at at or past the threshold)
//! - 0.7x when `answered_in_round` lags `round_id`
//! - answers <= 0 are rejected outright
//!
//! Scoring is a pure function over the round metadata so it is testable
//! without a provider.
//! ═══════════════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use chrono::Utc;
use ethers::prelude::abigen;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, I256, U256};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::errors::{EngineError, EngineResult};
use crate::trading::price_oracle::{FeedReading, PriceFeed, PriceSource};

/// Default staleness threshold for a Chainlink round
pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 3_600;

abigen!(
    ChainlinkAggregator,
    r#"[
        function latestRoundData() external view returns (uint80 roundId, int256 answer, uint256 startedAt, uint256 updatedAt, uint80 answeredInRound)
        function decimals() external view returns (uint8)
    ]"#
);

/// One raw round observation, decoupled from the provider for testing.
#[derive(Debug, Clone, Copy)]
pub struct RoundData {
    pub round_id: U256,
    pub answer: I256,
    pub updated_at: u64,
    pub answered_in_round: U256,
    pub decimals: u8,
}

/// Score a round into `(price, confidence)` per the staleness and round
/// consistency rules. The staleness boundary is inclusive: a round exactly
/// `stale_threshold_secs` old is already stale.
pub fn score_round(
    round: &RoundData,
    now_unix: u64,
    stale_threshold_secs: u64,
) -> EngineResult<(f64, f64)> {
    if round.answer <= I256::zero() {
        return Err(EngineError::PriceUnavailable(format!(
            "chainlink answer {} is not positive",
            round.answer
        )));
    }

    let price = round
        .answer
        .to_string()
        .parse::<f64>()
        .unwrap_or(0.0)
        / 10f64.powi(round.decimals as i32);

    if !price.is_finite() || price <= 0.0 {
        return Err(EngineError::PriceUnavailable(
            "chainlink answer did not scale to a finite price".into(),
        ));
    }

    let mut confidence = 1.0;

    let age = now_unix.saturating_sub(round.updated_at);
    if age >= stale_threshold_secs {
        confidence *= 0.5;
    }

    if round.answered_in_round < round.round_id {
        confidence *= 0.7;
    }

    Ok((price, confidence))
}

/// Chainlink source for the oracle: a registry of aggregator proxies keyed
/// by token address, read through a shared provider.
pub struct ChainlinkFeed {
    provider: Arc<Provider<Http>>,
    feeds: HashMap<Address, Address>,
    stale_threshold_secs: u64,
    /// Aggregator decimals never change; cache after first read
    decimals_cache: RwLock<HashMap<Address, u8>>,
}

impl ChainlinkFeed {
    pub fn new(
        provider: Arc<Provider<Http>>,
        feeds: HashMap<Address, Address>,
        stale_threshold_secs: u64,
    ) -> Self {
        Self {
            provider,
            feeds,
            stale_threshold_secs,
            decimals_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn has_feed(&self, token: Address) -> bool {
        self.feeds.contains_key(&token)
    }

    async fn decimals_for(&self, aggregator: Address) -> EngineResult<u8> {
        if let Some(d) = self.decimals_cache.read().await.get(&aggregator) {
            return Ok(*d);
        }

        let contract = ChainlinkAggregator::new(aggregator, Arc::clone(&self.provider));
        let decimals = contract.decimals().call().await.map_err(|e| {
            EngineError::PriceUnavailable(format!("chainlink decimals read: {}", e))
        })?;

        self.decimals_cache.write().await.insert(aggregator, decimals);
        Ok(decimals)
    }
}

#[async_trait]
impl PriceFeed for ChainlinkFeed {
    async fn fetch(&self, token: Address) -> EngineResult<FeedReading> {
        let aggregator = *self.feeds.get(&token).ok_or_else(|| {
            EngineError::PriceUnavailable(format!("no chainlink feed configured for {:#x}", token))
        })?;

        let decimals = self.decimals_for(aggregator).await?;

        let contract = ChainlinkAggregator::new(aggregator, Arc::clone(&self.provider));
        let (round_id, answer, _started_at, updated_at, answered_in_round) = contract
            .latest_round_data()
            .call()
            .await
            .map_err(|e| EngineError::PriceUnavailable(format!("chainlink round read: {}", e)))?;

        let round = RoundData {
            round_id: U256::from(round_id),
            answer,
            updated_at: updated_at.as_u64(),
            answered_in_round: U256::from(answered_in_round),
            decimals,
        };

        let now = Utc::now();
        let (price, confidence) = score_round(&round, now.timestamp() as u64, self.stale_threshold_secs)?;

        debug!(
            "Chainlink {:#x}: price={:.8} confidence={:.2} round={} age={}s",
            token,
            price,
            confidence,
            round.round_id,
            (now.timestamp() as u64).saturating_sub(round.updated_at)
        );

        Ok(FeedReading {
            price,
            confidence,
            source: PriceSource::Chainlink,
            observed_at: now,
        })
    }

    fn source(&self) -> PriceSource {
        PriceSource::Chainlink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(answer: i64, updated_at: u64, round_id: u64, answered_in: u64) -> RoundData {
        RoundData {
            round_id: U256::from(round_id),
            answer: I256::from(answer),
            updated_at,
            answered_in_round: U256::from(answered_in),
            decimals: 8,
        }
    }

    const NOW: u64 = 1_700_000_000;

    #[test]
    fn test_fresh_round_full_confidence() {
        let r = round(100_000_000, NOW - 60, 10, 10);
        let (price, confidence) = score_round(&r, NOW, 3_600).unwrap();
        assert!((price - 1.0).abs() < 1e-12);
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn test_stale_round_halved() {
        let r = round(100_000_000, NOW - 7_200, 10, 10);
        let (_, confidence) = score_round(&r, NOW, 3_600).unwrap();
        assert_eq!(confidence, 0.5);
    }

    #[test]
    fn test_stale_boundary_is_inclusive() {
        // updated_at == now - threshold sits exactly on the boundary
        let r = round(100_000_000, NOW - 3_600, 10, 10);
        let (_, confidence) = score_round(&r, NOW, 3_600).unwrap();
        assert_eq!(confidence, 0.5);

        let r = round(100_000_000, NOW - 3_599, 10, 10);
        let (_, confidence) = score_round(&r, NOW, 3_600).unwrap();
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn test_lagging_round_penalty() {
        let r = round(100_000_000, NOW - 60, 10, 9);
        let (_, confidence) = score_round(&r, NOW, 3_600).unwrap();
        assert!((confidence - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_stale_and_lagging_compound() {
        let r = round(100_000_000, NOW - 7_200, 10, 9);
        let (_, confidence) = score_round(&r, NOW, 3_600).unwrap();
        assert!((confidence - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_non_positive_answer_rejected() {
        assert!(score_round(&round(0, NOW - 60, 10, 10), NOW, 3_600).is_err());
        assert!(score_round(&round(-5, NOW - 60, 10, 10), NOW, 3_600).is_err());
    }

    #[test]
    fn test_decimal_scaling() {
        let mut r = round(250_000_000, NOW - 60, 10, 10);
        r.decimals = 8;
        let (price, _) = score_round(&r, NOW, 3_600).unwrap();
        assert!((price - 2.5).abs() < 1e-12);

        r.decimals = 18;
        let (price, _) = score_round(&r, NOW, 3_600).unwrap();
        assert!((price - 2.5e-10).abs() < 1e-20);
    }
}
