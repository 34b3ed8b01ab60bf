//! Logging initialization using the `tracing` ecosystem.
//!
//! Console output is human-readable by default or one JSON object per line
//! when `json` is set (for log shippers). A daily-rotating plain-text file is
//! added when a log directory is given. `RUST_LOG` overrides the level.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Logging settings collected from the CLI.
#[derive(Debug, Clone)]
pub struct LogOptions<'a> {
    /// Default level if `RUST_LOG` is not set (e.g. `"info"`).
    pub level: &'a str,
    /// Optional directory for daily-rotating log files.
    pub dir: Option<&'a str>,
    /// Log file prefix (e.g. `"dx-runner"`).
    pub file_prefix: &'a str,
    /// Emit console logs as JSON lines.
    pub json: bool,
}

/// Initialize the global tracing subscriber. Call once at program start.
pub fn init_logging(opts: &LogOptions<'_>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(opts.level));

    let pretty_layer = (!opts.json).then(|| fmt::layer().with_target(true).with_ansi(true));
    let json_layer = opts.json.then(|| fmt::layer().json().with_target(true));

    let file_layer = opts.dir.map(|dir| {
        fmt::layer()
            .with_writer(tracing_appender::rolling::daily(dir, opts.file_prefix))
            .with_ansi(false)
            .with_target(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(pretty_layer)
        .with(json_layer)
        .with(file_layer)
        .init();
}
