//! Market snapshot and derived reading types.
//!
//! A [`MarketSnapshot`] is produced once per fetch cycle and never mutated.
//! A [`Reading`] is derived from it by [`crate::estimator::estimate`].

/// Raw figures for one asset and the aggregate market, as reported by the
/// source for the same trailing window (24h).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketSnapshot {
    /// Asset market capitalization in the quote currency.
    pub asset_market_cap: f64,
    /// Asset market-cap change over the trailing window, in percent.
    pub asset_change_pct: f64,
    /// Total market capitalization in the quote currency.
    pub aggregate_market_cap: f64,
    /// Total market-cap change over the trailing window, in percent.
    pub aggregate_change_pct: f64,
    /// Local receive time (ms since epoch).
    pub fetched_at_ms: u64,
}

/// The asset's share of the aggregate market and its trailing change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Dominance in percent, always within `[0, 100]`.
    pub value: f64,
    /// Change over the trailing window in percentage points.
    pub change: f64,
    /// When the underlying snapshot was fetched (ms since epoch).
    pub observed_at_ms: u64,
}

/// Whether a displayed reading comes from the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Fetched and estimated during the current cycle.
    Fresh,
    /// Re-displayed from an earlier cycle because the current fetch failed.
    Stale,
}

impl Freshness {
    pub fn is_stale(self) -> bool {
        self == Self::Stale
    }
}
