//! Dominance estimator.
//!
//! Turns one [`MarketSnapshot`] into a [`Reading`]:
//!
//! ```text
//! value  = asset / aggregate * 100
//! b      = asset_change_pct / 100
//! t      = aggregate_change_pct / 100
//! prior  = value / ((1 + b) / (1 + t))
//! change = value - prior
//! ```
//!
//! The trailing change is backed out of the two independently reported
//! percentage changes, so a single fetch yields both the present value and its
//! trend. This is a heuristic: it assumes the asset and aggregate changes
//! compose as a plain ratio over the window, and it has not been checked
//! against a true 24h-old snapshot. Treat `change` as an approximation, not an
//! exact 24h delta.

use crate::error::SourceError;
use crate::types::{MarketSnapshot, Reading};

/// Estimate dominance and its trailing change from a snapshot.
///
/// Fails with [`SourceError::MalformedResponse`] when the figures cannot
/// describe a share of the aggregate: a non-positive aggregate, a negative
/// asset cap, an asset cap above the aggregate, or a non-finite input.
pub fn estimate(snapshot: &MarketSnapshot) -> Result<Reading, SourceError> {
    let MarketSnapshot {
        asset_market_cap: asset,
        asset_change_pct,
        aggregate_market_cap: aggregate,
        aggregate_change_pct,
        fetched_at_ms,
    } = *snapshot;

    let inputs = [asset, asset_change_pct, aggregate, aggregate_change_pct];
    if inputs.iter().any(|v| !v.is_finite()) {
        return Err(SourceError::MalformedResponse(format!("non-finite market figures: {inputs:?}")));
    }
    if aggregate <= 0.0 {
        return Err(SourceError::MalformedResponse(format!(
            "aggregate market cap must be positive, got {aggregate}"
        )));
    }
    if asset < 0.0 || asset > aggregate {
        return Err(SourceError::MalformedResponse(format!(
            "asset market cap {asset} outside [0, {aggregate}]"
        )));
    }

    let value = asset / aggregate * 100.0;
    let prior = prior_value(value, asset_change_pct, aggregate_change_pct);

    Ok(Reading {
        value,
        change: value - prior,
        observed_at_ms: fetched_at_ms,
    })
}

/// Dominance at the start of the trailing window.
///
/// Falls back to `value` (no change) when either growth factor is zero, where
/// the ratio is undefined.
fn prior_value(value: f64, asset_change_pct: f64, aggregate_change_pct: f64) -> f64 {
    let asset_growth = 1.0 + asset_change_pct / 100.0;
    let aggregate_growth = 1.0 + aggregate_change_pct / 100.0;

    if aggregate_growth == 0.0 || asset_growth == 0.0 {
        return value;
    }
    value / (asset_growth / aggregate_growth)
}
