mod app;
mod archive;
mod catchup;
mod cli;
mod control;
mod download;
mod error;
mod fsutil;
mod lock;
mod logging;
mod node_config;
mod orchestrator;
mod process;
mod progress;
mod release;
mod settings;
mod sync;
#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use app::Reporter;
use cli::{Cli, Command};
use orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("read current directory")?;
    let settings = cli.settings(&cwd);
    let _log_guard = logging::init(cli.verbose, &settings.paths.root)?;
    info!(command = ?cli.command, root = %settings.paths.root.display(), "algorun starting");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let (reporter, receivers) = Reporter::channel();
    let renderer = tokio::spawn(progress::render(receivers));

    let orchestrator = Orchestrator::new(settings, reporter, cancel)?;
    let result = dispatch(cli.command, orchestrator).await;

    // dispatch consumed the orchestrator, so all report senders are dropped by now.
    renderer.await.ok();
    result
}

async fn dispatch(command: Command, orchestrator: Orchestrator) -> Result<()> {
    match command {
        Command::Create(args) => {
            let outcome = orchestrator.create(&args.release).await.context("create")?;
            println!(
                "Installed {} {} ({}); node at {} reached round {}",
                outcome.version.channel,
                outcome.version.semver,
                outcome.version.raw_tag,
                outcome.endpoint.address,
                outcome.round,
            );
            match outcome.catchup {
                Ok(label) => println!("Catching up to {}", label),
                Err(e) => {
                    warn!(error = %e, "catchup not started");
                    eprintln!("warning: fast catchup was not started: {}", e);
                    eprintln!("         run `algorun catchup` to retry");
                }
            }
        }
        Command::Update(args) => {
            let version = orchestrator.update(&args.release).await.context("update")?;
            println!(
                "Updated to {} {} ({})",
                version.channel, version.semver, version.raw_tag
            );
        }
        Command::Catchup => {
            let label = orchestrator.catchup().await.context("catchup")?;
            println!("Catching up to {}", label);
        }
        Command::Start => orchestrator.start().await.context("start")?,
        Command::Stop => orchestrator.stop().await.context("stop")?,
        Command::Status => {
            orchestrator.status().await.context("status")?;
        }
        Command::Goal { args } => {
            orchestrator.goal(&args).await.context("goal")?;
        }
    }
    Ok(())
}
