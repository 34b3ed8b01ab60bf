//! # dx-runner
//!
//! Entry point for the dominance broadcaster.
//!
//! Loads configuration (JSON file, then environment and CLI overrides),
//! connects to the Discord gateway, and runs the refresh loop until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! DISCORD_TOKEN=... dx-runner --config dx.json --log-level info
//! dx-runner --dry-run --interval 30
//! ```

mod scheduler;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dx_cast::gateway::{GatewayConfig, GatewaySession, GatewayStatus, SessionInfo};
use dx_cast::memory::{MemoryGuild, MemorySurface};
use dx_cast::rest::DiscordRest;
use dx_cast::targets::CHANGE_NICKNAME;
use dx_cast::{BroadcastSurface, DiscordSurface};
use dx_core::config::{AppConfig, load_config};
use dx_core::logging::{LogOptions, init_logging};
use dx_feed::{CoinGeckoClient, SnapshotSource};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::scheduler::{Scheduler, SchedulerConfig};

/// Bot user id used by `--dry-run`.
const DRY_RUN_USER: u64 = 1;

/// BTC dominance broadcaster for Discord.
#[derive(Parser)]
#[command(name = "dx-runner", about = "Broadcast BTC dominance as a Discord nickname and status")]
struct Cli {
    /// Configuration file path (JSON). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bot token.
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Only broadcast to this guild.
    #[arg(long, env = "DX_GUILD_ID")]
    guild_id: Option<u64>,

    /// Seconds between refresh cycles.
    #[arg(long, env = "DX_INTERVAL_SECS")]
    interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,

    /// Emit console logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Fetch and render real readings but write them to an in-memory surface.
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        if let Some(guild_id) = self.guild_id {
            config.guild_id = Some(guild_id);
        }
        if let Some(interval) = self.interval {
            config.interval_secs = interval;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Initialize logging
    init_logging(&LogOptions {
        level: &cli.log_level,
        dir: cli.log_dir.as_deref(),
        file_prefix: "dx-runner",
        json: cli.log_json,
    });

    // 2. Load configuration
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    cli.apply_overrides(&mut config);
    if cli.dry_run && config.token.is_none() {
        config.token = Some("dry-run".into());
    }
    config.validate().context("invalid configuration")?;

    info!(
        config = ?cli.config,
        interval_secs = config.interval_secs,
        guild_id = ?config.guild_id,
        dry_run = cli.dry_run,
        "dx-runner starting"
    );

    // 3. Shared HTTP client and shutdown signal
    let http = reqwest::Client::builder()
        .user_agent(concat!("dx-runner/", env!("CARGO_PKG_VERSION")))
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;
    let source = CoinGeckoClient::new(http.clone(), &config.source);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let sched_config = SchedulerConfig {
        interval: config.interval(),
        write_timeout: config.discord.write_timeout(),
        restrict_to: config.guild_id,
        labels: config.labels(),
    };

    // 4. Run against the chosen surface
    if cli.dry_run {
        let surface = MemorySurface::new(
            DRY_RUN_USER,
            vec![MemoryGuild::new(config.guild_id.unwrap_or(1), "dry-run", CHANGE_NICKNAME)],
        );
        let (_ready_tx, ready_rx) = watch::channel(GatewayStatus::Ready(SessionInfo {
            user_id: DRY_RUN_USER,
            username: "dry-run".into(),
            session_id: String::new(),
            guild_count: 1,
        }));
        return drive(source, surface, sched_config, ready_rx, shutdown_rx).await;
    }

    let token = config.token()?.to_string();
    let mut gateway = GatewaySession::new(GatewayConfig {
        url: config.discord.gateway_url.clone(),
        token: token.clone(),
    });
    gateway.start();

    let rest = DiscordRest::new(http, &config.discord.api_url, &token, config.discord.write_timeout());
    let surface = DiscordSurface::new(rest, gateway.handle());

    let result = drive(source, surface, sched_config, gateway.status(), shutdown_rx).await;

    // 5. Stop the gateway
    gateway.stop().await;
    info!("gateway stopped, goodbye");
    result
}

async fn drive<S, B>(
    source: S,
    surface: B,
    config: SchedulerConfig,
    ready: watch::Receiver<GatewayStatus>,
    shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    S: SnapshotSource,
    B: BroadcastSurface,
{
    let mut scheduler = Scheduler::new(source, surface, config);
    if let Err(e) = scheduler.run(ready, shutdown).await {
        error!(error = %e, "scheduler aborted");
        return Err(e.into());
    }
    info!(
        state = ?scheduler.state(),
        last_value = scheduler.cache().last_good().map(|r| r.value),
        last_error = scheduler.cache().last_error(),
        "scheduler finished"
    );
    Ok(())
}

/// Resolve on Ctrl+C. A listener error never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
