//! Rendering of the per-cycle display strings.
//!
//! One [`DisplayPayload`] is rendered per cycle from the cache's current
//! display and written to every target (name field) and once to the
//! process-wide status.

use crate::types::{Freshness, Reading};

/// Maximum nickname length accepted by the platform, in characters.
pub const MAX_NAME_CHARS: usize = 32;

/// Changes smaller than this (in percentage points) render as flat.
const FLAT_EPSILON: f64 = 0.005;

/// Static labels used when rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayLabels {
    /// Nickname prefix, e.g. `"BTC.D"`.
    pub name_prefix: String,
    /// Status text label, e.g. `"BTC Dominance"`.
    pub status_label: String,
}

impl Default for DisplayLabels {
    fn default() -> Self {
        Self {
            name_prefix: "BTC.D".into(),
            status_label: "BTC Dominance".into(),
        }
    }
}

/// Process-wide presence state shown next to the status text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Online,
    Idle,
}

impl Presence {
    /// Wire name used by the gateway presence update.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Idle => "idle",
        }
    }
}

/// Strings written for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayPayload {
    /// Nickname, at most [`MAX_NAME_CHARS`] characters.
    pub name: String,
    /// Status / activity text.
    pub status: String,
    pub presence: Presence,
}

impl DisplayPayload {
    /// Render the payload for the cache's current display.
    ///
    /// `None` renders the "unavailable" variant, never a number.
    pub fn render(current: Option<(&Reading, Freshness)>, labels: &DisplayLabels) -> Self {
        let Some((reading, freshness)) = current else {
            let text = format!("{} unavailable", labels.name_prefix);
            return Self {
                name: truncate_name(&text),
                status: text,
                presence: Presence::Idle,
            };
        };

        let arrow = trend_arrow(reading.change);
        let marker = if freshness.is_stale() { " (stale)" } else { "" };

        let name = format!("{} {:.2}% {arrow}{marker}", labels.name_prefix, reading.value);
        let status = format!(
            "{}: {:.2}% {arrow} {:+.2}pp 24h{marker}",
            labels.status_label, reading.value, reading.change
        );

        Self {
            name: truncate_name(&name),
            status,
            presence: match freshness {
                Freshness::Fresh => Presence::Online,
                Freshness::Stale => Presence::Idle,
            },
        }
    }
}

/// Direction marker for a trailing change.
pub fn trend_arrow(change: f64) -> &'static str {
    if change >= FLAT_EPSILON {
        "▲"
    } else if change <= -FLAT_EPSILON {
        "▼"
    } else {
        "→"
    }
}

/// Cut `name` to at most [`MAX_NAME_CHARS`] characters. Never fails.
pub fn truncate_name(name: &str) -> String {
    name.chars().take(MAX_NAME_CHARS).collect()
}
