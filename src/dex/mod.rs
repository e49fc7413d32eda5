//! ═══════════════════════════════════════════════════════════════════════════
//! 0x AGGREGATOR CLIENT
//!
//! The only thing the trading core knows about the DEX aggregator is this
//! request/response contract: ask for a quote, get back a priced
//! transaction envelope or nothing. Routing, liquidity sources, and order
//! splitting are all 0x's problem.
//!
//! A missing route (4xx from the API) is `Ok(None)`; transport failures are
//! `QuoteFailure` errors. Both are local errors at the tick level.
//! ═══════════════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use log::{debug, warn};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{EngineError, EngineResult};
use crate::rpc::TxEnvelope;

/// 0x sentinel for native ETH on the sell/buy side
pub const NATIVE_ETH: &str = "0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE";

/// Default quote timeout
pub const DEFAULT_QUOTE_TIMEOUT_SECS: u64 = 15;

/// Quote request at the core boundary.
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    /// Token to receive; `NATIVE_ETH` for the native coin
    pub buy_token: String,
    /// Token to spend; `NATIVE_ETH` for the native coin
    pub sell_token: String,
    /// Amount of `sell_token` to spend, base units
    pub sell_amount: U256,
    pub taker: Address,
    pub slippage_bps: u32,
}

impl QuoteRequest {
    /// Spend `sell_amount` wei of ETH buying `token`.
    pub fn buy(token: Address, sell_amount: U256, taker: Address, slippage_bps: u32) -> Self {
        Self {
            buy_token: format!("{:#x}", token),
            sell_token: NATIVE_ETH.to_string(),
            sell_amount,
            taker,
            slippage_bps,
        }
    }

    /// Sell `sell_amount` base units of `token` back into ETH.
    pub fn sell(token: Address, sell_amount: U256, taker: Address, slippage_bps: u32) -> Self {
        Self {
            buy_token: NATIVE_ETH.to_string(),
            sell_token: format!("{:#x}", token),
            sell_amount,
            taker,
            slippage_bps,
        }
    }
}

/// 0x quote response, reduced to the fields the core consumes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuote {
    pub buy_token_address: String,
    pub sell_token_address: String,
    #[serde(with = "crate::utils::format::serde_wei")]
    pub buy_amount: U256,
    #[serde(with = "crate::utils::format::serde_wei")]
    pub sell_amount: U256,
    /// Display price quoted by the aggregator (buy per sell unit)
    pub price: String,
    #[serde(default, with = "crate::utils::format::serde_wei_opt")]
    pub gas: Option<U256>,
    #[serde(default, with = "crate::utils::format::serde_wei_opt")]
    pub gas_price: Option<U256>,
    pub to: String,
    pub data: String,
    #[serde(with = "crate::utils::format::serde_wei")]
    pub value: U256,
    #[serde(default)]
    pub allowance_target: Option<String>,
}

impl SwapQuote {
    /// Prepared transaction for the chain client.
    pub fn envelope(&self) -> EngineResult<TxEnvelope> {
        let to = Address::from_str(&self.to)
            .map_err(|e| EngineError::QuoteFailure(format!("quote `to` unparseable: {}", e)))?;
        let data = Bytes::from_str(&self.data)
            .map_err(|e| EngineError::QuoteFailure(format!("quote calldata unparseable: {}", e)))?;
        Ok(TxEnvelope {
            to,
            data,
            value: self.value,
            gas: self.gas,
            gas_price: self.gas_price,
        })
    }

    /// Spender that must be approved before a token sell.
    pub fn allowance_target(&self) -> EngineResult<Option<Address>> {
        match &self.allowance_target {
            None => Ok(None),
            Some(s) if s.is_empty() => Ok(None),
            Some(s) => Address::from_str(s)
                .map(Some)
                .map_err(|e| EngineError::QuoteFailure(format!("allowance target: {}", e))),
        }
    }
}

/// Aggregator capability used by the bot tick.
#[async_trait]
pub trait DexClient: Send + Sync {
    /// `Ok(None)` when the aggregator has no route for this pair/amount.
    async fn quote(&self, request: &QuoteRequest) -> EngineResult<Option<SwapQuote>>;
}

// ═══════════════════════════════════════════════════════════════════════════
// PRODUCTION CLIENT
// ═══════════════════════════════════════════════════════════════════════════

pub struct ZeroExClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl ZeroExClient {
    pub fn new(base_url: String, api_key: Option<String>, timeout_secs: u64) -> Self {
        if url::Url::parse(&base_url).is_err() {
            warn!("0x base url '{}' does not parse; requests will fail", base_url);
        }
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl DexClient for ZeroExClient {
    async fn quote(&self, request: &QuoteRequest) -> EngineResult<Option<SwapQuote>> {
        let url = format!("{}/swap/v1/quote", self.base_url);
        let slippage = request.slippage_bps as f64 / 10_000.0;

        let mut req = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .query(&[
                ("buyToken", request.buy_token.as_str()),
                ("sellToken", request.sell_token.as_str()),
                ("sellAmount", &request.sell_amount.to_string()),
                ("takerAddress", &format!("{:#x}", request.taker)),
                ("slippagePercentage", &slippage.to_string()),
            ]);
        if let Some(key) = &self.api_key {
            req = req.header("0x-api-key", key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| EngineError::QuoteFailure(format!("0x request: {}", e)))?;

        let status = response.status();
        if status.is_client_error() {
            // No route / insufficient liquidity; the tick treats this as a
            // null quote, not a transport failure
            let body = response.text().await.unwrap_or_default();
            warn!("0x returned {} for {}→{}: {}", status, request.sell_token, request.buy_token, body);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(EngineError::QuoteFailure(format!("0x returned {}", status)));
        }

        let quote: SwapQuote = response
            .json()
            .await
            .map_err(|e| EngineError::QuoteFailure(format!("0x response parse: {}", e)))?;

        debug!(
            "0x quote: sell {} {} → buy {} {} (price {})",
            quote.sell_amount, quote.sell_token_address, quote.buy_amount, quote.buy_token_address, quote.price
        );
        Ok(Some(quote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_quote_request_directions() {
        let token = Address::from_low_u64_be(0xabc);
        let taker = Address::from_low_u64_be(0xdef);

        let buy = QuoteRequest::buy(token, U256::from(100u64), taker, 50);
        assert_eq!(buy.sell_token, NATIVE_ETH);
        assert!(buy.buy_token.starts_with("0x"));

        let sell = QuoteRequest::sell(token, U256::from(100u64), taker, 50);
        assert_eq!(sell.buy_token, NATIVE_ETH);
        assert_eq!(sell.sell_token, buy.buy_token);
    }

    #[test]
    fn test_quote_response_parsing() {
        let json = r#"{
            "buyTokenAddress": "0x4200000000000000000000000000000000000006",
            "sellTokenAddress": "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee",
            "buyAmount": "123456789000000000",
            "sellAmount": "1000000000000000000",
            "price": "0.123456789",
            "gas": "250000",
            "gasPrice": "1500000000",
            "to": "0xdef1c0ded9bec7f1a1670819833240f027b25eff",
            "data": "0xd9627aa4000000",
            "value": "1000000000000000000",
            "allowanceTarget": "0xdef1c0ded9bec7f1a1670819833240f027b25eff"
        }"#;

        let quote: SwapQuote = serde_json::from_str(json).unwrap();
        assert_eq!(quote.buy_amount, U256::from(123_456_789_000_000_000u64));
        assert_eq!(quote.gas, Some(U256::from(250_000u64)));

        let envelope = quote.envelope().unwrap();
        assert_eq!(envelope.value, U256::from(1_000_000_000_000_000_000u64));
        assert_eq!(
            format!("{:#x}", envelope.to),
            "0xdef1c0ded9bec7f1a1670819833240f027b25eff"
        );
        assert!(quote.allowance_target().unwrap().is_some());
    }

    #[test]
    fn test_quote_without_optional_fields() {
        let json = r#"{
            "buyTokenAddress": "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee",
            "sellTokenAddress": "0x4200000000000000000000000000000000000006",
            "buyAmount": "1",
            "sellAmount": "2",
            "price": "0.5",
            "to": "0xdef1c0ded9bec7f1a1670819833240f027b25eff",
            "data": "0x",
            "value": "0"
        }"#;

        let quote: SwapQuote = serde_json::from_str(json).unwrap();
        assert_eq!(quote.gas, None);
        assert_eq!(quote.gas_price, None);
        assert!(quote.allowance_target().unwrap().is_none());

        let envelope = quote.envelope().unwrap();
        assert!(envelope.gas.is_none());
        assert!(envelope.value.is_zero());
    }
}
