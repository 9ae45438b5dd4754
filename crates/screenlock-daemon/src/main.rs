//! Screenlock daemon entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use screenlock_daemon::{DaemonConfig, server};

/// Screenlock daemon - arbitrates control of shared sources
#[derive(Parser, Debug)]
#[command(name = "screenlockd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Custom socket path (defaults to `$XDG_RUNTIME_DIR/screenlock.sock`)
    #[arg(long, value_name = "PATH")]
    socket_path: Option<PathBuf>,

    /// Config file to load and watch
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// `RUST_LOG` wins over `--log-level`. The returned guard must live as long
/// as the process so the file writer flushes.
fn setup_logging(
    level: LogLevel,
    log_file: Option<&PathBuf>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let level = level.as_filter();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "screenlock_daemon={level},screenlock_rpc={level},screenlock={level}"
        ))
    });

    let Some(log_file) = log_file else {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true);
        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(filter)
            .init();
        return Ok(None);
    };

    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let file_name = log_file
        .file_name()
        .with_context(|| format!("Invalid log file path: {}", log_file.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(filter)
        .init();

    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _guard = setup_logging(args.log_level, args.log_file.as_ref())?;

    let config_path = match args.config {
        Some(path) => Some(path),
        None => DaemonConfig::default_path(),
    };
    let mut config = match &config_path {
        Some(path) => DaemonConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => DaemonConfig::default(),
    };
    if let Some(socket_path) = args.socket_path {
        config.socket_path = Some(socket_path);
    }

    info!("Starting screenlock daemon...");
    server::run(config, config_path).await?;
    info!("Screenlock daemon stopped");

    Ok(())
}
