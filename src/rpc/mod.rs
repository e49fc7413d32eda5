//! ═══════════════════════════════════════════════════════════════════════════
//! EVM CHAIN CLIENT - Reads, Submission, Receipt Polling
//!
//! Thin capability layer over an ethers JSON-RPC provider. The trading core
//! only sees the `ChainClient` trait: balances, gas, transaction submission
//! from a prepared envelope, and bounded receipt waits. Everything
//! chain-shaped (provider construction, ABI bindings, well-known addresses)
//! lives here so the bots stay chain-agnostic.
//! ═══════════════════════════════════════════════════════════════════════════

use anyhow::Result;
use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::prelude::abigen;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, TransactionRequest, TxHash, U256};
use lazy_static::lazy_static;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::errors::{EngineError, EngineResult};

// ═══════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════

/// Receipt polling cadence while waiting for confirmation
const RECEIPT_POLL_INTERVAL_MS: u64 = 2_000;

/// Default bound on a receipt wait (overridable per call)
pub const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 120;

// ═══════════════════════════════════════════════════════════════════════════
// ABI BINDINGS
// ═══════════════════════════════════════════════════════════════════════════

abigen!(
    Erc20,
    r#"[
        function balanceOf(address owner) external view returns (uint256)
        function decimals() external view returns (uint8)
        function symbol() external view returns (string)
        function approve(address spender, uint256 amount) external returns (bool)
        function allowance(address owner, address spender) external view returns (uint256)
    ]"#
);

// ═══════════════════════════════════════════════════════════════════════════
// WELL-KNOWN ADDRESSES
// ═══════════════════════════════════════════════════════════════════════════

/// Static per-chain address book: wrapped native token, Uniswap V3 factory,
/// and the Chainlink ETH/USD aggregator proxy.
#[derive(Debug, Clone)]
pub struct ChainProfile {
    pub name: &'static str,
    pub chain_id: u64,
    pub weth: Address,
    pub uniswap_v3_factory: Address,
    pub chainlink_eth_usd: Address,
}

fn addr(s: &str) -> Address {
    Address::from_str(s).expect("static address table entry")
}

lazy_static! {
    static ref CHAIN_PROFILES: HashMap<&'static str, ChainProfile> = {
        let mut m = HashMap::new();
        m.insert(
            "base",
            ChainProfile {
                name: "base",
                chain_id: 8453,
                weth: addr("0x4200000000000000000000000000000000000006"),
                uniswap_v3_factory: addr("0x33128a8fC17869897dcE68Ed026d694621f6FDfD"),
                chainlink_eth_usd: addr("0x71041dddad3595F9CEd3DcCFBe3D1F4b0a16Bb70"),
            },
        );
        m.insert(
            "ethereum",
            ChainProfile {
                name: "ethereum",
                chain_id: 1,
                weth: addr("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
                uniswap_v3_factory: addr("0x1F98431c8aD98523631AE4a59f267346ea31F984"),
                chainlink_eth_usd: addr("0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419"),
            },
        );
        m
    };
}

pub fn chain_profile(chain: &str) -> Option<&'static ChainProfile> {
    CHAIN_PROFILES.get(chain)
}

/// Uniswap V3 fee tiers enumerated during best-pool selection
pub const UNISWAP_V3_FEE_TIERS: [u32; 4] = [100, 500, 3_000, 10_000];

// ═══════════════════════════════════════════════════════════════════════════
// TRANSACTION TYPES
// ═══════════════════════════════════════════════════════════════════════════

/// Prepared transaction handed to the chain client for signing and
/// submission; built from a 0x quote response.
#[derive(Debug, Clone)]
pub struct TxEnvelope {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas: Option<U256>,
    pub gas_price: Option<U256>,
}

/// Confirmed receipt observation consumed by the position state machine.
#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub tx_hash: String,
    pub success: bool,
    pub gas_used: U256,
    pub effective_gas_price: U256,
    pub block_number: u64,
}

impl TxOutcome {
    pub fn gas_cost(&self) -> U256 {
        self.gas_used * self.effective_gas_price
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CHAIN CLIENT CAPABILITY
// ═══════════════════════════════════════════════════════════════════════════

/// Chain access used by the bot tick. Implemented by [`EvmChainClient`] in
/// production and by in-memory fakes in tests.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn eth_balance(&self, owner: Address) -> EngineResult<U256>;

    async fn token_balance(&self, token: Address, owner: Address) -> EngineResult<U256>;

    async fn gas_price(&self) -> EngineResult<U256>;

    /// Approve `spender` for exactly `amount` of `token`, returning the
    /// approval tx hash. The caller awaits the receipt separately.
    async fn approve(
        &self,
        signer: &LocalWallet,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> EngineResult<String>;

    /// Sign and submit a prepared envelope; returns the tx hash without
    /// waiting for inclusion.
    async fn submit(&self, signer: &LocalWallet, tx: &TxEnvelope) -> EngineResult<String>;

    /// Poll for the receipt of `tx_hash` until `timeout`. `Ok(None)` means
    /// the transaction is still pending when time runs out — the caller
    /// decides whether that is fatal.
    async fn await_receipt(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> EngineResult<Option<TxOutcome>>;
}

// ═══════════════════════════════════════════════════════════════════════════
// PRODUCTION IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

pub struct EvmChainClient {
    provider: Arc<Provider<Http>>,
    chain_id: u64,
}

impl EvmChainClient {
    pub fn new(rpc_url: &str, chain_id: u64) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)?;
        info!("🌐 EVM chain client ready (chain id {})", chain_id);
        Ok(Self {
            provider: Arc::new(provider),
            chain_id,
        })
    }

    pub fn provider(&self) -> Arc<Provider<Http>> {
        Arc::clone(&self.provider)
    }

    fn signing_client(
        &self,
        signer: &LocalWallet,
    ) -> SignerMiddleware<Provider<Http>, LocalWallet> {
        SignerMiddleware::new(
            (*self.provider).clone(),
            signer.clone().with_chain_id(self.chain_id),
        )
    }

    fn parse_hash(tx_hash: &str) -> EngineResult<TxHash> {
        TxHash::from_str(tx_hash)
            .map_err(|e| EngineError::TransactionFailure(format!("bad tx hash {}: {}", tx_hash, e)))
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    async fn eth_balance(&self, owner: Address) -> EngineResult<U256> {
        self.provider
            .get_balance(owner, None)
            .await
            .map_err(|e| EngineError::TransactionFailure(format!("balance read: {}", e)))
    }

    async fn token_balance(&self, token: Address, owner: Address) -> EngineResult<U256> {
        let erc20 = Erc20::new(token, Arc::clone(&self.provider));
        erc20
            .balance_of(owner)
            .call()
            .await
            .map_err(|e| EngineError::TransactionFailure(format!("token balance read: {}", e)))
    }

    async fn gas_price(&self) -> EngineResult<U256> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| EngineError::TransactionFailure(format!("gas price read: {}", e)))
    }

    async fn approve(
        &self,
        signer: &LocalWallet,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> EngineResult<String> {
        let client = Arc::new(self.signing_client(signer));
        let erc20 = Erc20::new(token, client);

        let call = erc20.approve(spender, amount);
        let pending = call
            .send()
            .await
            .map_err(|e| EngineError::TransactionFailure(format!("approve submission: {}", e)))?;

        let hash = format!("{:#x}", pending.tx_hash());
        debug!(
            "Approval submitted: token {:#x} spender {:#x} tx {}",
            token, spender, hash
        );
        Ok(hash)
    }

    async fn submit(&self, signer: &LocalWallet, tx: &TxEnvelope) -> EngineResult<String> {
        let client = self.signing_client(signer);

        let mut request = TransactionRequest::new()
            .from(signer.address())
            .to(tx.to)
            .data(tx.data.clone())
            .value(tx.value);
        if let Some(gas) = tx.gas {
            request = request.gas(gas);
        }
        if let Some(gas_price) = tx.gas_price {
            request = request.gas_price(gas_price);
        }

        let pending = client
            .send_transaction(request, None)
            .await
            .map_err(|e| EngineError::TransactionFailure(format!("submission: {}", e)))?;

        let hash = format!("{:#x}", pending.tx_hash());
        debug!("Transaction submitted: {}", hash);
        Ok(hash)
    }

    async fn await_receipt(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> EngineResult<Option<TxOutcome>> {
        let hash = Self::parse_hash(tx_hash)?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    let success = receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false);
                    let outcome = TxOutcome {
                        tx_hash: tx_hash.to_string(),
                        success,
                        gas_used: receipt.gas_used.unwrap_or_default(),
                        effective_gas_price: receipt.effective_gas_price.unwrap_or_default(),
                        block_number: receipt.block_number.map(|b| b.as_u64()).unwrap_or(0),
                    };
                    return Ok(Some(outcome));
                }
                Ok(None) => {
                    if tokio::time::Instant::now() >= deadline {
                        warn!("⏳ Receipt wait timed out for {}", tx_hash);
                        return Ok(None);
                    }
                    sleep(Duration::from_millis(RECEIPT_POLL_INTERVAL_MS)).await;
                }
                Err(e) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(EngineError::TransactionFailure(format!(
                            "receipt lookup for {}: {}",
                            tx_hash, e
                        )));
                    }
                    warn!("Receipt lookup error for {} (will retry): {}", tx_hash, e);
                    sleep(Duration::from_millis(RECEIPT_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_profiles_present() {
        let base = chain_profile("base").expect("base profile");
        assert_eq!(base.chain_id, 8453);
        assert_ne!(base.weth, Address::zero());
        assert_ne!(base.uniswap_v3_factory, Address::zero());

        let eth = chain_profile("ethereum").expect("ethereum profile");
        assert_eq!(eth.chain_id, 1);

        assert!(chain_profile("solana").is_none());
    }

    #[test]
    fn test_gas_cost_math() {
        let outcome = TxOutcome {
            tx_hash: "0xabc".into(),
            success: true,
            gas_used: U256::from(21_000u64),
            effective_gas_price: U256::from(2_000_000_000u64),
            block_number: 1,
        };
        assert_eq!(outcome.gas_cost(), U256::from(42_000_000_000_000u64));
    }

    #[test]
    fn test_fee_tier_table() {
        assert_eq!(UNISWAP_V3_FEE_TIERS, [100, 500, 3_000, 10_000]);
    }
}
