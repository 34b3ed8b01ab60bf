//! CoinGecko v3 market-data client.
//!
//! # REST endpoints
//!
//! | Figures                       | Method | Path                                     |
//! |-------------------------------|--------|------------------------------------------|
//! | Aggregate cap + 24h change    | GET    | `/global`                                |
//! | Asset cap + 24h change        | GET    | `/coins/markets?vs_currency=..&ids=..`   |
//!
//! Both requests are issued together and share the caller's connection pool.
//! Status interpretation: 2xx is success, 429 is [`SourceError::RateLimited`],
//! anything else is [`SourceError::Unavailable`]. The per-request timeout maps
//! to [`SourceError::Timeout`].

use std::time::Duration;

use async_trait::async_trait;
use dx_core::config::SourceConfig;
use dx_core::error::SourceError;
use dx_core::{MarketSnapshot, time_util};
use reqwest::header::{ACCEPT, HeaderMap, RETRY_AFTER};
use tracing::{debug, instrument};

use crate::SnapshotSource;
use crate::json_util::require_f64;

/// Longest error-body excerpt kept in an error message.
const BODY_EXCERPT_CHARS: usize = 200;

/// Aggregate market figures from `/global`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateFigures {
    pub market_cap: f64,
    pub change_pct_24h: f64,
}

/// Single-asset figures from `/coins/markets`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssetFigures {
    pub market_cap: f64,
    pub change_pct_24h: f64,
}

/// CoinGecko REST client.
#[derive(Clone)]
pub struct CoinGeckoClient {
    /// Shared HTTP client (connection pool reused across cycles).
    http: reqwest::Client,
    /// REST base URL (e.g. `https://api.coingecko.com/api/v3`).
    base_url: String,
    asset_id: String,
    vs_currency: String,
    timeout: Duration,
}

impl CoinGeckoClient {
    /// Create a client on top of an existing `reqwest::Client`.
    pub fn new(http: reqwest::Client, config: &SourceConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            asset_id: config.asset_id.clone(),
            vs_currency: config.vs_currency.to_lowercase(),
            timeout: config.timeout(),
        }
    }

    /// Fetch aggregate market cap and its 24h change.
    #[instrument(skip(self), level = "debug")]
    pub async fn fetch_aggregate(&self) -> Result<AggregateFigures, SourceError> {
        let url = format!("{}/global", self.base_url);
        let body = self.get_json(&url, &[]).await?;
        parse_global(&body, &self.vs_currency)
    }

    /// Fetch the configured asset's market cap and its 24h change.
    #[instrument(skip(self), fields(asset = %self.asset_id), level = "debug")]
    pub async fn fetch_asset(&self) -> Result<AssetFigures, SourceError> {
        let url = format!("{}/coins/markets", self.base_url);
        let query = [("vs_currency", self.vs_currency.as_str()), ("ids", self.asset_id.as_str())];
        let body = self.get_json(&url, &query).await?;
        parse_markets(&body, &self.asset_id)
    }

    /// GET `url` and decode a JSON body, classifying every failure.
    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<serde_json::Value, SourceError> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .header(ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::from_status(status.as_u16(), retry_after, excerpt(&body)));
        }

        let body = resp.bytes().await.map_err(|e| self.classify(e))?;
        serde_json::from_slice(&body)
            .map_err(|e| SourceError::MalformedResponse(format!("invalid JSON from {url}: {e}")))
    }

    fn classify(&self, e: reqwest::Error) -> SourceError {
        if e.is_timeout() {
            SourceError::Timeout(self.timeout)
        } else {
            SourceError::Unavailable {
                status: e.status().map(|s| s.as_u16()),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl SnapshotSource for CoinGeckoClient {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn fetch(&self) -> Result<MarketSnapshot, SourceError> {
        let (aggregate, asset) = tokio::try_join!(self.fetch_aggregate(), self.fetch_asset())?;

        debug!(
            asset_cap = asset.market_cap,
            asset_change = asset.change_pct_24h,
            total_cap = aggregate.market_cap,
            total_change = aggregate.change_pct_24h,
            "coingecko snapshot fetched"
        );

        Ok(MarketSnapshot {
            asset_market_cap: asset.market_cap,
            asset_change_pct: asset.change_pct_24h,
            aggregate_market_cap: aggregate.market_cap,
            aggregate_change_pct: aggregate.change_pct_24h,
            fetched_at_ms: time_util::now_ms(),
        })
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Parse a `/global` body.
///
/// CoinGecko reports the aggregate change only against USD, whatever the
/// quote currency of the cap.
pub fn parse_global(body: &serde_json::Value, vs_currency: &str) -> Result<AggregateFigures, SourceError> {
    Ok(AggregateFigures {
        market_cap: require_f64(body, &format!("/data/total_market_cap/{vs_currency}"))?,
        change_pct_24h: require_f64(body, "/data/market_cap_change_percentage_24h_usd")?,
    })
}

/// Parse a `/coins/markets` body. Only the row whose `id` is `asset_id` counts.
pub fn parse_markets(body: &serde_json::Value, asset_id: &str) -> Result<AssetFigures, SourceError> {
    let rows = body
        .as_array()
        .ok_or_else(|| SourceError::MalformedResponse("coins/markets body is not an array".into()))?;

    let row = rows
        .iter()
        .find(|r| r.get("id").and_then(|v| v.as_str()) == Some(asset_id))
        .ok_or_else(|| SourceError::MalformedResponse(format!("asset `{asset_id}` not in coins/markets response")))?;

    Ok(AssetFigures {
        market_cap: require_f64(row, "/market_cap")?,
        change_pct_24h: require_f64(row, "/market_cap_change_percentage_24h")?,
    })
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}
