use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILE: &str = "algorun.log";

/// Human-readable lines on stderr plus a JSON log file in `log_dir`.
///
/// `RUST_LOG` overrides the level; otherwise `info`, or `debug` with
/// `verbose`. Keep the returned guard alive until exit so buffered file
/// lines are flushed.
pub fn init(verbose: bool, log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create log directory {}", log_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, LOG_FILE));

    let default_level = if verbose {
        "debug,hyper=info,hyper_util=info,reqwest=info,rustls=info"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(fmt::layer().json().with_writer(file_writer))
        .try_init()
        .context("install tracing subscriber")?;

    Ok(guard)
}
