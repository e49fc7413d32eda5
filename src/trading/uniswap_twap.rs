//! ═══════════════════════════════════════════════════════════════════════════
//! UNISWAP V3 TWAP FEED
//!
//! Derives a time-weighted average price from a pool's cumulative tick
//! observations and scores it against the pool's current spot:
//! - deviation > 10%  → 0.5
//! - deviation > 5%   → 0.7
//! - deviation > 2%   → 0.9
//! - window < 300 s   → additional 0.8x
//!
//! Pool selection enumerates the well-known fee tiers and keeps the pool
//! with the deepest liquidity. Pool math is pure and unit-tested; only the
//! contract reads touch the network.
//! ═══════════════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use ethers::prelude::abigen;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, U256};
use log::{debug, info};
use std::sync::Arc;

use crate::errors::{EngineError, EngineResult};
use crate::rpc::{Erc20, UNISWAP_V3_FEE_TIERS};
use crate::trading::price_oracle::{FeedReading, PriceFeed, PriceSource};

/// Default TWAP observation window
pub const DEFAULT_TWAP_WINDOW_SECS: u32 = 1_800;

/// Windows shorter than this carry an extra 0.8x confidence penalty
const SHORT_WINDOW_SECS: u32 = 300;

abigen!(
    UniswapV3Factory,
    r#"[
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address)
    ]"#
);

abigen!(
    UniswapV3Pool,
    r#"[
        function slot0() external view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint8 feeProtocol, bool unlocked)
        function observe(uint32[] secondsAgos) external view returns (int56[] tickCumulatives, uint160[] secondsPerLiquidityCumulativeX128s)
        function liquidity() external view returns (uint128)
        function token0() external view returns (address)
        function token1() external view returns (address)
    ]"#
);

// ═══════════════════════════════════════════════════════════════════════════
// POOL MATH (pure)
// ═══════════════════════════════════════════════════════════════════════════

fn u256_to_f64(v: U256) -> f64 {
    v.to_string().parse::<f64>().unwrap_or(f64::MAX)
}

/// Spot price of the tracked token in units of the paired token, from
/// `slot0().sqrtPriceX96`: `(sqrtPriceX96 / 2^96)^2` with the decimal
/// adjustment, inverted when the tracked token is `token1`.
pub fn spot_price_from_sqrt(
    sqrt_price_x96: U256,
    dec0: u8,
    dec1: u8,
    token_is_token0: bool,
) -> f64 {
    let sqrt = u256_to_f64(sqrt_price_x96) / 2f64.powi(96);
    let raw = sqrt * sqrt; // token1 raw units per token0 raw unit
    let token0_in_token1 = raw * 10f64.powi(dec0 as i32 - dec1 as i32);
    if token_is_token0 {
        token0_in_token1
    } else {
        1.0 / token0_in_token1
    }
}

/// Average tick over the window from two cumulative-tick observations.
pub fn twap_tick(tick_cum_start: i64, tick_cum_end: i64, window_secs: u32) -> f64 {
    (tick_cum_end - tick_cum_start) as f64 / window_secs as f64
}

/// Price from an (average) tick: `1.0001^tick` with the same decimal and
/// direction adjustments as the spot path.
pub fn price_from_tick(tick: f64, dec0: u8, dec1: u8, token_is_token0: bool) -> f64 {
    let raw = 1.0001f64.powf(tick);
    let token0_in_token1 = raw * 10f64.powi(dec0 as i32 - dec1 as i32);
    if token_is_token0 {
        token0_in_token1
    } else {
        1.0 / token0_in_token1
    }
}

/// Confidence of a TWAP reading given the live pool spot and window length.
pub fn score_twap(twap_price: f64, spot_price: f64, window_secs: u32) -> f64 {
    let mut confidence: f64 = if spot_price > 0.0 {
        let deviation = (twap_price - spot_price).abs() / spot_price;
        if deviation > 0.10 {
            0.5
        } else if deviation > 0.05 {
            0.7
        } else if deviation > 0.02 {
            0.9
        } else {
            1.0
        }
    } else {
        0.5
    };

    if window_secs < SHORT_WINDOW_SECS {
        confidence *= 0.8;
    }

    confidence.clamp(0.0, 1.0)
}

// ═══════════════════════════════════════════════════════════════════════════
// FEED
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
struct PoolBinding {
    pool: Address,
    token_is_token0: bool,
    dec0: u8,
    dec1: u8,
}

pub struct UniswapTwapFeed {
    provider: Arc<Provider<Http>>,
    factory: Address,
    weth: Address,
    window_secs: u32,
    /// Token → discovered deepest pool; factory layout is immutable so the
    /// binding never needs invalidation
    pools: DashMap<Address, PoolBinding>,
}

impl UniswapTwapFeed {
    pub fn new(
        provider: Arc<Provider<Http>>,
        factory: Address,
        weth: Address,
        window_secs: u32,
    ) -> Self {
        Self {
            provider,
            factory,
            weth,
            window_secs,
            pools: DashMap::new(),
        }
    }

    /// Enumerate the known fee tiers and keep the pool with the highest
    /// liquidity; `None` when the token has no WETH pool at all.
    async fn find_best_pool(&self, token: Address) -> EngineResult<Option<Address>> {
        let factory = UniswapV3Factory::new(self.factory, Arc::clone(&self.provider));
        let mut best: Option<(Address, u128)> = None;

        for fee in UNISWAP_V3_FEE_TIERS {
            let pool = factory
                .get_pool(token, self.weth, fee)
                .call()
                .await
                .map_err(|e| EngineError::PriceUnavailable(format!("factory getPool: {}", e)))?;

            if pool == Address::zero() {
                continue;
            }

            let liquidity = UniswapV3Pool::new(pool, Arc::clone(&self.provider))
                .liquidity()
                .call()
                .await
                .map_err(|e| EngineError::PriceUnavailable(format!("pool liquidity: {}", e)))?;

            debug!("Pool candidate fee={} pool={:#x} liquidity={}", fee, pool, liquidity);

            if best.map(|(_, l)| liquidity > l).unwrap_or(liquidity > 0) {
                best = Some((pool, liquidity));
            }
        }

        Ok(best.map(|(pool, _)| pool))
    }

    async fn binding_for(&self, token: Address) -> EngineResult<PoolBinding> {
        if let Some(b) = self.pools.get(&token) {
            return Ok(*b);
        }

        let pool = self.find_best_pool(token).await?.ok_or_else(|| {
            EngineError::PriceUnavailable(format!("no uniswap v3 pool for {:#x}", token))
        })?;

        let contract = UniswapV3Pool::new(pool, Arc::clone(&self.provider));
        let token0 = contract
            .token_0()
            .call()
            .await
            .map_err(|e| EngineError::PriceUnavailable(format!("pool token0: {}", e)))?;

        let token_is_token0 = token0 == token;
        let (t0, t1) = if token_is_token0 {
            (token, self.weth)
        } else {
            (self.weth, token)
        };

        let dec0 = Erc20::new(t0, Arc::clone(&self.provider))
            .decimals()
            .call()
            .await
            .map_err(|e| EngineError::PriceUnavailable(format!("token0 decimals: {}", e)))?;
        let dec1 = Erc20::new(t1, Arc::clone(&self.provider))
            .decimals()
            .call()
            .await
            .map_err(|e| EngineError::PriceUnavailable(format!("token1 decimals: {}", e)))?;

        let binding = PoolBinding {
            pool,
            token_is_token0,
            dec0,
            dec1,
        };
        info!(
            "📊 TWAP pool bound for {:#x}: {:#x} (token is token{})",
            token,
            pool,
            if token_is_token0 { 0 } else { 1 }
        );
        self.pools.insert(token, binding);
        Ok(binding)
    }
}

#[async_trait]
impl PriceFeed for UniswapTwapFeed {
    async fn fetch(&self, token: Address) -> EngineResult<FeedReading> {
        let binding = self.binding_for(token).await?;
        let pool = UniswapV3Pool::new(binding.pool, Arc::clone(&self.provider));

        let slot0 = pool
            .slot_0()
            .call()
            .await
            .map_err(|e| EngineError::PriceUnavailable(format!("pool slot0: {}", e)))?;
        let spot = spot_price_from_sqrt(
            U256::from(slot0.0),
            binding.dec0,
            binding.dec1,
            binding.token_is_token0,
        );

        let (tick_cumulatives, _) = pool
            .observe(vec![self.window_secs, 0])
            .call()
            .await
            .map_err(|e| EngineError::PriceUnavailable(format!("pool observe: {}", e)))?;
        if tick_cumulatives.len() != 2 {
            return Err(EngineError::PriceUnavailable(format!(
                "observe returned {} cumulatives, expected 2",
                tick_cumulatives.len()
            )));
        }

        let avg_tick = twap_tick(tick_cumulatives[0], tick_cumulatives[1], self.window_secs);
        let price = price_from_tick(avg_tick, binding.dec0, binding.dec1, binding.token_is_token0);

        if !price.is_finite() || price <= 0.0 {
            return Err(EngineError::PriceUnavailable(format!(
                "twap produced invalid price {}",
                price
            )));
        }

        let confidence = score_twap(price, spot, self.window_secs);

        debug!(
            "TWAP {:#x}: price={:.10} spot={:.10} confidence={:.2} window={}s",
            token, price, spot, confidence, self.window_secs
        );

        Ok(FeedReading {
            price,
            confidence,
            source: PriceSource::UniswapV3,
            observed_at: Utc::now(),
        })
    }

    fn source(&self) -> PriceSource {
        PriceSource::UniswapV3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spot_price_equal_decimals() {
        // sqrtPriceX96 = 2^96 → raw ratio 1.0
        let sqrt = U256::from(2u8).pow(U256::from(96u8));
        let price = spot_price_from_sqrt(sqrt, 18, 18, true);
        assert!((price - 1.0).abs() < 1e-9);

        // Inverted direction for token1
        let price = spot_price_from_sqrt(sqrt, 18, 18, false);
        assert!((price - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_spot_price_decimal_adjustment() {
        // USDC(6)/WETH(18) style pool: raw ratio 1.0, token0 has 6 decimals
        let sqrt = U256::from(2u8).pow(U256::from(96u8));
        let price = spot_price_from_sqrt(sqrt, 6, 18, true);
        assert!((price - 1e-12).abs() < 1e-21);
    }

    #[test]
    fn test_twap_tick_average() {
        // 1800 ticks accumulated over 1800 s → average tick 1
        assert!((twap_tick(0, 1_800, 1_800) - 1.0).abs() < 1e-12);
        assert!((twap_tick(5_000, 5_000, 1_800)).abs() < 1e-12);
        assert!(twap_tick(1_000, 0, 1_000) < 0.0);
    }

    #[test]
    fn test_price_from_tick_zero_is_unity() {
        let price = price_from_tick(0.0, 18, 18, true);
        assert!((price - 1.0).abs() < 1e-12);

        // One tick ≈ 1 bps
        let price = price_from_tick(1.0, 18, 18, true);
        assert!((price - 1.0001).abs() < 1e-9);
    }

    #[test]
    fn test_twap_confidence_ladder() {
        assert_eq!(score_twap(1.0, 1.0, 1_800), 1.0);
        assert_eq!(score_twap(1.03, 1.0, 1_800), 0.9);
        assert_eq!(score_twap(1.06, 1.0, 1_800), 0.7);
        assert_eq!(score_twap(1.15, 1.0, 1_800), 0.5);
    }

    #[test]
    fn test_short_window_penalty() {
        // Boundary: windows under 300 s carry the 0.8x multiplier
        assert!((score_twap(1.0, 1.0, 299) - 0.8).abs() < 1e-12);
        assert_eq!(score_twap(1.0, 1.0, 300), 1.0);
        assert!((score_twap(1.15, 1.0, 60) - 0.4).abs() < 1e-12);
    }
}
