use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::settings::{
    Settings, DEFAULT_ARCHIVE_URL, DEFAULT_CATCHPOINT_URL, DEFAULT_NETWORK, DEFAULT_RELEASES_URL,
    DEFAULT_ROOT,
};

#[derive(Parser, Debug)]
#[command(name = "algorun", version, about = "Algorand node installer and supervisor")]
pub struct Cli {
    /// Installation root holding downloads, staging, binaries and node data
    #[arg(long, global = true, env = "ALGORUN_DIR", default_value = DEFAULT_ROOT, value_name = "PATH")]
    pub base_dir: PathBuf,

    /// Network whose genesis and catchpoints are used
    #[arg(long, global = true, env = "ALGORUN_NETWORK", default_value = DEFAULT_NETWORK)]
    pub network: String,

    /// Seconds to wait for a freshly started node to advance a round
    #[arg(long, global = true, default_value_t = 10, value_name = "SECS")]
    pub sync_timeout: u64,

    /// Abort the whole operation after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    #[arg(long, global = true, env = "ALGORUN_RELEASES_URL", default_value = DEFAULT_RELEASES_URL, hide = true)]
    pub releases_url: String,

    #[arg(long, global = true, env = "ALGORUN_ARCHIVE_URL", default_value = DEFAULT_ARCHIVE_URL, hide = true)]
    pub archive_url: String,

    #[arg(long, global = true, env = "ALGORUN_CATCHPOINT_URL", default_value = DEFAULT_CATCHPOINT_URL, hide = true)]
    pub catchpoint_url: String,

    /// Show debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install a fresh node, replacing any existing data directory
    Create(ReleaseArgs),
    /// Replace the node binaries with the latest release and restart
    Update(ReleaseArgs),
    /// Fast-sync the node to the latest catchpoint
    Catchup,
    /// Start the node and kmd
    Start,
    /// Stop the node and kmd
    Stop,
    /// Show node status
    Status,
    /// Run goal against the installation's data directory
    Goal {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Args, Debug)]
pub struct ReleaseArgs {
    /// Download the release again even if it is cached
    #[arg(long)]
    pub force_download: bool,

    /// Release channel to install
    #[arg(default_value = "stable")]
    pub release: String,
}

impl Cli {
    /// Build the per-invocation settings, resolving the root against `cwd`.
    pub fn settings(&self, cwd: &std::path::Path) -> Settings {
        let root = if self.base_dir.is_absolute() {
            self.base_dir.clone()
        } else {
            cwd.join(&self.base_dir)
        };
        let mut settings = Settings::new(root);
        settings.network = self.network.clone();
        settings.releases_url = self.releases_url.clone();
        settings.archive_url = self.archive_url.clone();
        settings.catchpoint_url = self.catchpoint_url.clone();
        settings.sync_timeout = Duration::from_secs(self.sync_timeout);
        settings.operation_timeout = self.timeout.map(Duration::from_secs);
        settings.force_download = match &self.command {
            Command::Create(args) | Command::Update(args) => args.force_download,
            _ => false,
        };
        settings
    }
}
