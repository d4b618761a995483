//! LiveVenue - HTTP implementation of the swap venue.
//!
//! Quotes come from a Jupiter-style aggregator API with failover across the
//! configured endpoints. Submission and confirmation are delegated to an
//! external signing service; balances are read over Solana JSON-RPC.

use crate::trading::config::VenueConfig;
use crate::trading::error::ExecutionError;
use crate::trading::venue::{BalanceOracle, Confirmation, PendingTrade, Quote, QuoteRequest, SwapVenue};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use moka::future::Cache;
use nonempty::NonEmpty;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const SOL_DECIMALS: u8 = 9;

/// Aggregator quote response (the fields the engine needs).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    in_amount: String,
    out_amount: String,
    /// Fraction as a decimal string, "0.0123" = 1.23%
    price_impact_pct: String,
}

#[derive(Debug, Deserialize)]
struct SwapResponse {
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: String,
    #[serde(default)]
    out_amount: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BalanceResult {
    value: u64,
}

pub struct LiveVenue {
    endpoints: NonEmpty<String>,
    http: Client,
    signer_url: String,
    rpc_url: String,
    wallet_address: Option<String>,
    base_mint: String,
    token_decimals: u8,
    poll_interval: Duration,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    balance_cache: Cache<String, f64>,
}

impl LiveVenue {
    pub fn new(config: &VenueConfig, base_mint: impl Into<String>) -> Result<Self> {
        let endpoints = NonEmpty::from_vec(config.quote_endpoints.clone())
            .ok_or_else(|| anyhow!("quote_endpoints cannot be empty"))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        let balance_cache = Cache::builder()
            .max_capacity(16)
            .time_to_live(Duration::from_secs(config.balance_cache_ttl_secs))
            .build();

        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            endpoints,
            http,
            signer_url: config.signer_url.trim_end_matches('/').to_string(),
            rpc_url: config.rpc_url.clone(),
            wallet_address: config.wallet_address.clone(),
            base_mint: base_mint.into(),
            token_decimals: config.token_decimals,
            poll_interval: Duration::from_millis(config.confirm_poll_ms.max(50)),
            rate_limiter,
            balance_cache,
        })
    }

    fn decimals_for(&self, mint: &str) -> u8 {
        if mint == self.base_mint {
            SOL_DECIMALS
        } else {
            self.token_decimals
        }
    }

    fn build_quote_request(&self, endpoint: &str, request: &QuoteRequest) -> Result<reqwest::Request> {
        let amount = to_base_units(request.amount, self.decimals_for(&request.input_mint));
        self.http
            .get(format!("{}/quote", endpoint.trim_end_matches('/')))
            .query(&[
                ("inputMint", request.input_mint.clone()),
                ("outputMint", request.output_mint.clone()),
                ("amount", amount.to_string()),
                ("slippageBps", request.slippage_bps.to_string()),
            ])
            .build()
            .context("Failed to build quote request")
    }

    async fn fetch_quote(&self, endpoint: &str, request: &QuoteRequest) -> Result<Quote> {
        self.rate_limiter.until_ready().await;

        let http_request = self.build_quote_request(endpoint, request)?;
        let response = self
            .http
            .execute(http_request)
            .await
            .context("Quote request failed")?;

        if !response.status().is_success() {
            bail!("Quote endpoint returned {}", response.status());
        }

        let route: serde_json::Value = response.json().await.context("Failed to parse quote")?;
        self.parse_quote(request, route)
    }

    fn parse_quote(&self, request: &QuoteRequest, route: serde_json::Value) -> Result<Quote> {
        let parsed: QuoteResponse =
            serde_json::from_value(route.clone()).context("Unexpected quote payload")?;

        let in_amount: u64 = parsed.in_amount.parse().context("Invalid inAmount")?;
        let out_amount: u64 = parsed.out_amount.parse().context("Invalid outAmount")?;
        let impact_fraction: f64 = parsed.price_impact_pct.parse().context("Invalid priceImpactPct")?;

        Ok(Quote {
            input_mint: request.input_mint.clone(),
            output_mint: request.output_mint.clone(),
            in_amount: from_base_units(in_amount, self.decimals_for(&request.input_mint)),
            out_amount: from_base_units(out_amount, self.decimals_for(&request.output_mint)),
            price_impact_pct: impact_fraction * 100.0,
            slippage_bps: request.slippage_bps,
            route: Some(route),
        })
    }

    async fn post_swap(&self, quote: &Quote) -> Result<String> {
        let route = quote.route.as_ref().ok_or_else(|| anyhow!("Quote carries no route"))?;
        let wallet = self
            .wallet_address
            .as_deref()
            .ok_or_else(|| anyhow!("No wallet address configured"))?;

        let response = self
            .http
            .post(format!("{}/swap", self.signer_url))
            .json(&json!({
                "quoteResponse": route,
                "userPublicKey": wallet,
                "slippageBps": quote.slippage_bps,
            }))
            .send()
            .await
            .context("Signer request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Signer rejected swap ({}): {}", status, body);
        }

        let swap: SwapResponse = response.json().await.context("Failed to parse signer response")?;
        Ok(swap.signature)
    }

    async fn fetch_status(&self, signature: &str) -> Result<StatusResponse> {
        let response = self
            .http
            .get(format!("{}/status/{}", self.signer_url, signature))
            .send()
            .await
            .context("Status request failed")?;

        if !response.status().is_success() {
            bail!("Status endpoint returned {}", response.status());
        }
        response.json().await.context("Failed to parse status response")
    }

    async fn fetch_balance(&self, wallet: &str) -> Result<f64> {
        self.rate_limiter.until_ready().await;

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "getBalance",
                "params": [wallet],
            }))
            .send()
            .await
            .context("getBalance request failed")?;

        let body: RpcResponse<BalanceResult> =
            response.json().await.context("Failed to parse getBalance response")?;
        if let Some(error) = body.error {
            bail!("getBalance error: {}", error);
        }
        let result = body.result.ok_or_else(|| anyhow!("getBalance returned no result"))?;
        Ok(from_base_units(result.value, SOL_DECIMALS))
    }
}

#[async_trait]
impl SwapVenue for LiveVenue {
    fn name(&self) -> &str {
        "live"
    }

    #[instrument(skip(self, request), fields(input = %request.input_mint, output = %request.output_mint))]
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, ExecutionError> {
        let mut last_error = None;
        for endpoint in self.endpoints.iter() {
            match self.fetch_quote(endpoint, request).await {
                Ok(quote) => {
                    debug!(
                        "Quote from {}: {} -> {} (impact {:.3}%)",
                        endpoint, quote.in_amount, quote.out_amount, quote.price_impact_pct
                    );
                    return Ok(quote);
                }
                Err(e) => {
                    warn!("Quote endpoint {} failed: {:#}", endpoint, e);
                    last_error = Some(e);
                }
            }
        }
        Err(ExecutionError::QuoteUnavailable(
            last_error.map(|e| format!("{:#}", e)).unwrap_or_default(),
        ))
    }

    async fn submit(&self, quote: &Quote) -> Result<PendingTrade, ExecutionError> {
        let signature = self
            .post_swap(quote)
            .await
            .map_err(|e| ExecutionError::SubmissionFailed(format!("{:#}", e)))?;

        // Spent funds are no longer spendable; force a fresh read
        self.balance_cache.invalidate_all();

        Ok(PendingTrade {
            signature,
            submitted_at: Utc::now(),
            quote: quote.clone(),
        })
    }

    async fn confirm(&self, pending: &PendingTrade) -> Result<Confirmation, ExecutionError> {
        let decimals = self.decimals_for(&pending.quote.output_mint);
        loop {
            match self.fetch_status(&pending.signature).await {
                Ok(status) => match status.status.as_str() {
                    "confirmed" | "finalized" => {
                        let realized = status
                            .out_amount
                            .and_then(|raw| raw.parse::<u64>().ok())
                            .map(|raw| from_base_units(raw, decimals))
                            .unwrap_or(pending.quote.out_amount);
                        return Ok(Confirmation {
                            signature: pending.signature.clone(),
                            realized_amount: realized,
                        });
                    }
                    "failed" => {
                        return Err(ExecutionError::Venue(
                            status.error.unwrap_or_else(|| "transaction failed".to_string()),
                        ));
                    }
                    other => debug!("Trade {} still {}", pending.signature, other),
                },
                Err(e) => debug!("Status poll for {} failed: {:#}", pending.signature, e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl BalanceOracle for LiveVenue {
    async fn get_balance(&self) -> Result<f64, ExecutionError> {
        let wallet = self
            .wallet_address
            .clone()
            .ok_or_else(|| ExecutionError::Venue("No wallet address configured".to_string()))?;

        if let Some(balance) = self.balance_cache.get(&wallet).await {
            return Ok(balance);
        }

        let balance = self
            .fetch_balance(&wallet)
            .await
            .map_err(|e| ExecutionError::Venue(format!("{:#}", e)))?;
        self.balance_cache.insert(wallet, balance).await;
        Ok(balance)
    }
}

fn to_base_units(amount: f64, decimals: u8) -> u64 {
    (amount * 10f64.powi(decimals as i32)).round().max(0.0) as u64
}

fn from_base_units(raw: u64, decimals: u8) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::config::WSOL_MINT;

    fn venue() -> LiveVenue {
        let config = VenueConfig {
            quote_endpoints: vec!["https://quote.example/v6/".to_string(), "https://backup.example".to_string()],
            wallet_address: Some("Wallet111".to_string()),
            ..VenueConfig::default()
        };
        LiveVenue::new(&config, WSOL_MINT).unwrap()
    }

    fn buy_request() -> QuoteRequest {
        QuoteRequest {
            input_mint: WSOL_MINT.to_string(),
            output_mint: "TokenMint".to_string(),
            amount: 0.25,
            slippage_bps: 75,
        }
    }

    #[test]
    fn test_unit_conversion() {
        assert_eq!(to_base_units(0.25, 9), 250_000_000);
        assert_eq!(to_base_units(1.5, 6), 1_500_000);
        assert_eq!(from_base_units(2_000_000_000, 9), 2.0);
        assert_eq!(to_base_units(-1.0, 6), 0);
    }

    #[test]
    fn test_empty_endpoints_rejected() {
        let config = VenueConfig {
            quote_endpoints: Vec::new(),
            ..VenueConfig::default()
        };
        assert!(LiveVenue::new(&config, WSOL_MINT).is_err());
    }

    #[test]
    fn test_quote_url_in_base_units() {
        let venue = venue();
        let request = venue.build_quote_request(venue.endpoints.first(), &buy_request()).unwrap();
        let url = request.url().as_str();
        assert!(url.starts_with("https://quote.example/v6/quote?"));
        assert!(url.contains("amount=250000000"));
        assert!(url.contains("slippageBps=75"));
        assert!(url.contains("outputMint=TokenMint"));
    }

    #[test]
    fn test_parse_quote_converts_units_and_impact() {
        let venue = venue();
        let route = json!({
            "inputMint": WSOL_MINT,
            "outputMint": "TokenMint",
            "inAmount": "250000000",
            "outAmount": "1234500000",
            "priceImpactPct": "0.0042",
            "routePlan": []
        });
        let quote = venue.parse_quote(&buy_request(), route).unwrap();
        assert_eq!(quote.in_amount, 0.25);
        assert!((quote.out_amount - 1234.5).abs() < 1e-9);
        assert!((quote.price_impact_pct - 0.42).abs() < 1e-9);
        assert_eq!(quote.slippage_bps, 75);
        assert!(quote.route.is_some());
    }

    #[test]
    fn test_parse_quote_rejects_garbage() {
        let venue = venue();
        assert!(venue.parse_quote(&buy_request(), json!({ "error": "no route" })).is_err());
    }

    #[test]
    fn test_status_payload() {
        let status: StatusResponse =
            serde_json::from_value(json!({ "status": "confirmed", "outAmount": "5000" })).unwrap();
        assert_eq!(status.status, "confirmed");
        assert_eq!(status.out_amount.as_deref(), Some("5000"));
        assert!(status.error.is_none());
    }
}
