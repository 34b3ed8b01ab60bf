//! # dx-feed
//!
//! Market-data fetching for the dominance broadcast engine.
//!
//! A [`SnapshotSource`] produces one [`MarketSnapshot`] per call. The
//! production implementation is [`coingecko::CoinGeckoClient`], which issues
//! the aggregate and per-asset requests concurrently on a shared
//! `reqwest::Client`. Sources never retry: the scheduler's next cycle is the
//! retry.

pub mod coingecko;
pub mod json_util;

use async_trait::async_trait;
use dx_core::MarketSnapshot;
use dx_core::error::SourceError;

pub use coingecko::CoinGeckoClient;

/// Trait implemented by all market-data sources.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Human-readable source name (for logs).
    fn name(&self) -> &str;

    /// Fetch one snapshot of asset and aggregate market figures.
    async fn fetch(&self) -> Result<MarketSnapshot, SourceError>;
}
