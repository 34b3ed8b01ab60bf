//! Configuration for the dominance broadcast engine.
//!
//! Settings come from an optional JSON file and are then overridden by CLI
//! flags / environment variables in the runner. Every field has a production
//! default, so only the credential is strictly required.
//!
//! # Example config
//!
//! ```json
//! {
//!   "interval_secs": 300,
//!   "guild_id": 123456789012345678,
//!   "source": { "asset_id": "bitcoin", "vs_currency": "usd", "timeout_secs": 10 },
//!   "discord": { "name_prefix": "BTC.D", "status_label": "BTC Dominance" }
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::display::DisplayLabels;
use crate::error::DxError;

/// Top-level application config.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Bot token. Usually supplied through `DISCORD_TOKEN` rather than the file.
    #[serde(default)]
    pub token: Option<String>,

    /// Restrict broadcasting to a single guild.
    #[serde(default)]
    pub guild_id: Option<u64>,

    /// Seconds between the end of one cycle and the start of the next.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub discord: DiscordConfig,
}

/// Market-data source settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// REST base URL.
    #[serde(default = "default_source_url")]
    pub base_url: String,

    /// Source-side asset id (e.g. `"bitcoin"`).
    #[serde(default = "default_asset_id")]
    pub asset_id: String,

    /// Quote currency used for both market caps.
    #[serde(default = "default_vs_currency")]
    pub vs_currency: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

/// Chat platform settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    /// REST API base URL (versioned).
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Gateway WebSocket URL.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Nickname prefix.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Status text label.
    #[serde(default = "default_status_label")]
    pub status_label: String,

    /// Upper bound for one target's write, in seconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            token: None,
            guild_id: None,
            interval_secs: default_interval_secs(),
            source: SourceConfig::default(),
            discord: DiscordConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_url(),
            asset_id: default_asset_id(),
            vs_currency: default_vs_currency(),
            timeout_secs: default_source_timeout(),
        }
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            gateway_url: default_gateway_url(),
            name_prefix: default_name_prefix(),
            status_label: default_status_label(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

impl AppConfig {
    /// Check the settings the process cannot start without.
    pub fn validate(&self) -> Result<(), DxError> {
        match self.token.as_deref().map(str::trim) {
            None | Some("") => {
                return Err(DxError::Config(
                    "missing bot token (set DISCORD_TOKEN or --token)".into(),
                ));
            }
            Some(_) => {}
        }
        if self.interval_secs == 0 {
            return Err(DxError::Config("interval_secs must be greater than zero".into()));
        }
        if self.source.timeout_secs == 0 || self.discord.write_timeout_secs == 0 {
            return Err(DxError::Config("timeouts must be greater than zero".into()));
        }
        Ok(())
    }

    /// Validated token. Call after [`validate`](Self::validate).
    pub fn token(&self) -> Result<&str, DxError> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DxError::Config("missing bot token".into()))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn labels(&self) -> DisplayLabels {
        DisplayLabels {
            name_prefix: self.discord.name_prefix.clone(),
            status_label: self.discord.status_label.clone(),
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DiscordConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Defaults (used by serde)
// ---------------------------------------------------------------------------

fn default_interval_secs() -> u64 {
    300
}

fn default_source_url() -> String {
    "https://api.coingecko.com/api/v3".into()
}

fn default_asset_id() -> String {
    "bitcoin".into()
}

fn default_vs_currency() -> String {
    "usd".into()
}

fn default_source_timeout() -> u64 {
    10
}

fn default_api_url() -> String {
    "https://discord.com/api/v10".into()
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".into()
}

fn default_name_prefix() -> String {
    "BTC.D".into()
}

fn default_status_label() -> String {
    "BTC Dominance".into()
}

fn default_write_timeout() -> u64 {
    10
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let cfg: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.interval_secs, 300);
        assert_eq!(cfg.source.asset_id, "bitcoin");
        assert_eq!(cfg.source.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.discord.name_prefix, "BTC.D");
        assert!(cfg.guild_id.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let json = r#"{
            "token": "abc",
            "guild_id": 42,
            "interval_secs": 120,
            "source": { "asset_id": "ethereum" },
            "discord": { "name_prefix": "ETH.D" }
        }"#;
        let cfg: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.guild_id, Some(42));
        assert_eq!(cfg.interval(), Duration::from_secs(120));
        assert_eq!(cfg.source.asset_id, "ethereum");
        assert_eq!(cfg.source.vs_currency, "usd");
        assert_eq!(cfg.labels().name_prefix, "ETH.D");
        assert_eq!(cfg.labels().status_label, "BTC Dominance");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_or_blank_token_is_rejected() {
        let mut cfg = AppConfig::default();
        assert!(matches!(cfg.validate(), Err(DxError::Config(_))));
        cfg.token = Some("   ".into());
        assert!(matches!(cfg.validate(), Err(DxError::Config(_))));
        cfg.token = Some(" secret ".into());
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.token().unwrap(), "secret");
    }

    #[test]
    fn zero_interval_is_rejected() {
        let cfg = AppConfig {
            token: Some("t".into()),
            interval_secs: 0,
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
