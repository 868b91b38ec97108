//! Jupiter swap API client (`/swap/v1/quote`, `/swap/v1/swap`)

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{QuoteRequest, SwapAggregator, SwapError, SwapQuote};
use crate::rpc::RetryPolicy;

#[derive(Debug, Deserialize)]
struct SwapResponse {
    #[serde(rename = "swapTransaction")]
    swap_transaction: String,
}

pub struct JupiterClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl JupiterClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration, retry: RetryPolicy) -> Result<Self, SwapError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SwapError::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            retry,
        })
    }

    fn with_key(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, SwapError> {
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(SwapError::RateLimited);
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SwapError::Api {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| SwapError::Decode(e.to_string()))
    }

    async fn fetch_quote(&self, request: &QuoteRequest) -> Result<Value, SwapError> {
        let url = format!("{}/swap/v1/quote", self.base_url);
        let response = self
            .with_key(self.http.get(&url))
            .query(&[
                ("inputMint", request.input_mint.to_string()),
                ("outputMint", request.output_mint.to_string()),
                ("amount", request.amount.to_string()),
                ("slippageBps", request.slippage_bps.to_string()),
            ])
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn fetch_swap(&self, quote: &SwapQuote, user: &Pubkey) -> Result<SwapResponse, SwapError> {
        let url = format!("{}/swap/v1/swap", self.base_url);
        let body = json!({
            "quoteResponse": quote.raw,
            "userPublicKey": user.to_string(),
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
            "prioritizationFeeLamports": "auto",
        });
        let response = self
            .with_key(self.http.post(&url))
            .json(&body)
            .send()
            .await?;
        let value = Self::read_json(response).await?;
        serde_json::from_value(value).map_err(|e| SwapError::Decode(e.to_string()))
    }
}

fn amount_field(raw: &Value, field: &str) -> Result<u64, SwapError> {
    raw.get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| SwapError::Decode(format!("quote is missing {}", field)))
}

/// Parse a quote body, keeping the original JSON for the swap call
pub fn parse_quote(raw: Value) -> Result<SwapQuote, SwapError> {
    if let Some(error) = raw.get("error").and_then(|e| e.as_str()) {
        return Err(SwapError::NoRoute(error.to_string()));
    }

    let mint_field = |field: &str| {
        raw.get(field)
            .and_then(|v| v.as_str())
            .and_then(|s| Pubkey::from_str(s).ok())
            .ok_or_else(|| SwapError::Decode(format!("quote is missing {}", field)))
    };

    Ok(SwapQuote {
        input_mint: mint_field("inputMint")?,
        output_mint: mint_field("outputMint")?,
        in_amount: amount_field(&raw, "inAmount")?,
        out_amount: amount_field(&raw, "outAmount")?,
        other_amount_threshold: amount_field(&raw, "otherAmountThreshold")?,
        price_impact_pct: raw
            .get("priceImpactPct")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok()),
        raw,
    })
}

#[async_trait]
impl SwapAggregator for JupiterClient {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote, SwapError> {
        let raw = self.retry.run("jupiter_quote", || self.fetch_quote(request)).await?;
        let quote = parse_quote(raw)?;
        debug!(
            input = %quote.input_mint,
            output = %quote.output_mint,
            in_amount = quote.in_amount,
            out_amount = quote.out_amount,
            "Jupiter quote"
        );
        Ok(quote)
    }

    async fn swap_transaction(
        &self,
        quote: &SwapQuote,
        user: &Pubkey,
    ) -> Result<VersionedTransaction, SwapError> {
        let response = self
            .retry
            .run("jupiter_swap", || self.fetch_swap(quote, user))
            .await?;

        let bytes = BASE64
            .decode(response.swap_transaction.as_bytes())
            .map_err(|e| SwapError::Decode(format!("swapTransaction base64: {}", e)))?;
        bincode::deserialize::<VersionedTransaction>(&bytes)
            .map_err(|e| SwapError::Decode(format!("swapTransaction bincode: {}", e)))
    }
}
