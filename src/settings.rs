use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ROOT: &str = "algorun-dir";
pub const DEFAULT_RELEASES_URL: &str = "https://api.github.com/repos/algorand/go-algorand/releases";
pub const DEFAULT_ARCHIVE_URL: &str = "https://algorand-releases.s3.amazonaws.com";
pub const DEFAULT_CATCHPOINT_URL: &str = "https://algorand-catchpoints.s3.us-east-2.amazonaws.com";
pub const DEFAULT_NETWORK: &str = "mainnet";

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// Directory roles of one installation, all rooted at a single base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPaths {
    pub root: PathBuf,
    /// Persistent archive cache.
    pub downloads: PathBuf,
    /// Extraction staging, persistent unless a forced download clears it.
    pub staging: PathBuf,
    pub bin: PathBuf,
    /// Node data directory; recreated by `create`, preserved by `update`.
    pub data: PathBuf,
}

impl InstallPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let base = root.join("base");
        Self {
            downloads: root.join("downloads"),
            staging: root.join("temp"),
            bin: base.join("bin"),
            data: base.join("data"),
            root,
        }
    }

    /// Path of the node control binary inside the bin directory.
    pub fn goal(&self) -> PathBuf {
        self.bin.join("goal")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join("algorun.lock")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [&self.downloads, &self.staging, &self.bin, &self.data] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Per-invocation configuration passed to every component.
#[derive(Debug, Clone)]
pub struct Settings {
    pub paths: InstallPaths,
    pub releases_url: String,
    pub archive_url: String,
    pub catchpoint_url: String,
    pub network: String,
    pub force_download: bool,
    pub sync_timeout: Duration,
    pub poll_interval: Duration,
    pub progress_interval: Duration,
    /// Overall deadline for one operation.
    pub operation_timeout: Option<Duration>,
}

impl Settings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: InstallPaths::new(root),
            releases_url: DEFAULT_RELEASES_URL.into(),
            archive_url: DEFAULT_ARCHIVE_URL.into(),
            catchpoint_url: DEFAULT_CATCHPOINT_URL.into(),
            network: DEFAULT_NETWORK.into(),
            force_download: false,
            sync_timeout: SYNC_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            progress_interval: PROGRESS_INTERVAL,
            operation_timeout: None,
        }
    }

    /// URL serving the latest catchpoint label for the configured network.
    pub fn catchpoint_label_url(&self) -> String {
        format!(
            "{}/channel/{}/latest.catchpoint",
            self.catchpoint_url.trim_end_matches('/'),
            self.network
        )
    }

    /// Genesis descriptor for the configured network inside an extracted release.
    pub fn genesis_in(&self, staging: &Path) -> PathBuf {
        staging.join("genesis").join(&self.network).join("genesis.json")
    }
}

/// Operating system name as used in release tarball names.
pub fn release_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// CPU architecture name as used in release tarball names.
pub fn release_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}
