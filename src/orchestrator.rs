use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app::{Operation, Phase, Pipeline, Reporter};
use crate::archive::{self, SeedMode};
use crate::catchup;
use crate::control::NodeController;
use crate::download;
use crate::error::{InstallError, IoContext};
use crate::lock::InstallLock;
use crate::node_config::{self, KmdEndpoint, NodeEndpoint};
use crate::release::{self, ResolvedVersion};
use crate::settings::Settings;
use crate::sync::{self, AlgodClient};

const USER_AGENT: &str = concat!("algorun/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Result of a successful `create`.
#[derive(Debug)]
pub struct CreateOutcome {
    pub version: ResolvedVersion,
    pub endpoint: NodeEndpoint,
    pub round: u64,
    /// The catchup step is best-effort: its failure lands here instead of
    /// failing the already-running installation.
    pub catchup: Result<String, InstallError>,
}

/// Runs install, update and lifecycle operations against one installation root.
pub struct Orchestrator {
    settings: Settings,
    client: reqwest::Client,
    reporter: Reporter,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        reporter: Reporter,
        cancel: CancellationToken,
    ) -> Result<Self, InstallError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| InstallError::io("build HTTP client", std::io::Error::other(e)))?;
        Ok(Self {
            settings,
            client,
            reporter,
            cancel,
        })
    }

    fn controller(&self) -> NodeController {
        NodeController::new(
            &self.settings.paths,
            self.reporter.output.clone(),
            self.cancel.clone(),
        )
    }

    fn lock(&self) -> Result<InstallLock, InstallError> {
        InstallLock::acquire(&self.settings.paths.lock_file())
    }

    /// Race `fut` against external cancellation and the overall deadline.
    /// Dropping the losing future kills any child it spawned and discards
    /// any temp file it was writing.
    async fn guarded<T>(
        &self,
        fut: impl Future<Output = Result<T, InstallError>>,
    ) -> Result<T, InstallError> {
        let run = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(InstallError::Cancelled),
                res = fut => res,
            }
        };
        match self.settings.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .unwrap_or(Err(InstallError::DeadlineExceeded { limit })),
            None => run.await,
        }
    }

    /// Fresh installation: wipe the data directory, install, start, patch
    /// configs, wait for the node to advance, then trigger catchup.
    pub async fn create(&self, channel: &str) -> Result<CreateOutcome, InstallError> {
        self.guarded(self.run_create(channel)).await
    }

    /// Refresh binaries to the latest release of `channel` and restart,
    /// leaving the data directory's configuration alone.
    pub async fn update(&self, channel: &str) -> Result<ResolvedVersion, InstallError> {
        self.guarded(self.run_update(channel)).await
    }

    pub async fn start(&self) -> Result<(), InstallError> {
        self.guarded(async {
            let _lock = self.lock()?;
            self.controller().start().await
        })
        .await
    }

    pub async fn stop(&self) -> Result<(), InstallError> {
        self.guarded(async {
            let _lock = self.lock()?;
            self.controller().stop().await
        })
        .await
    }

    pub async fn status(&self) -> Result<Vec<String>, InstallError> {
        self.guarded(async { self.controller().status().await }).await
    }

    /// Fast-sync an existing installation to the latest catchpoint.
    pub async fn catchup(&self) -> Result<String, InstallError> {
        self.guarded(async {
            let _lock = self.lock()?;
            catchup::trigger_catchup(
                &self.client,
                &self.settings.catchpoint_label_url(),
                &self.controller(),
            )
            .await
        })
        .await
    }

    /// Pass arbitrary arguments through to the installed control binary.
    pub async fn goal(&self, args: &[String]) -> Result<Vec<String>, InstallError> {
        self.guarded(async { self.controller().goal(args).await }).await
    }

    async fn run_create(&self, channel: &str) -> Result<CreateOutcome, InstallError> {
        let paths = &self.settings.paths;
        let lock = Arc::new(self.lock()?);
        let mut pipeline = Pipeline::new(Operation::Create, self.reporter.phases.clone());

        let version = self.download_release(&mut pipeline, channel, &lock).await?;

        let mut controller = self.controller();
        pipeline.enter(Phase::Stop);
        controller.stop().await?;

        pipeline.enter(Phase::Install);
        if paths.data.exists() {
            std::fs::remove_dir_all(&paths.data)
                .io_context(|| format!("remove {}", paths.data.display()))?;
        }
        paths.ensure_dirs().io_context(|| format!("create {}", paths.root.display()))?;
        archive::install_binaries(&paths.staging, &paths.bin)?;

        pipeline.enter(Phase::Seed);
        let genesis = self.settings.genesis_in(&paths.staging);
        archive::seed_data_dir(&genesis, &paths.staging, &paths.data, SeedMode::Overwrite)?;

        pipeline.enter(Phase::Start);
        controller.start().await?;

        pipeline.enter(Phase::Configure);
        let endpoint = NodeEndpoint::discover(&paths.data)?;
        let kmd = KmdEndpoint::discover(&paths.data)?;
        node_config::patch_configs(&paths.data, &kmd.dir)?;

        pipeline.enter(Phase::Sync);
        let algod = AlgodClient::new(self.client.clone(), &endpoint);
        let round = sync::wait_for_progress(
            &algod,
            self.settings.sync_timeout,
            self.settings.poll_interval,
            &self.cancel,
        )
        .await?;

        pipeline.enter(Phase::Catchup);
        let catchup = match catchup::trigger_catchup(
            &self.client,
            &self.settings.catchpoint_label_url(),
            &controller,
        )
        .await
        {
            Err(InstallError::Cancelled) => return Err(InstallError::Cancelled),
            Err(e) => {
                warn!(error = %e, "catchup failed; the node keeps syncing from genesis");
                Err(e)
            }
            Ok(label) => Ok(label),
        };

        info!(release = %version.raw_tag, round, "node installed and running");
        Ok(CreateOutcome {
            version,
            endpoint,
            round,
            catchup,
        })
    }

    async fn run_update(&self, channel: &str) -> Result<ResolvedVersion, InstallError> {
        let paths = &self.settings.paths;
        let lock = Arc::new(self.lock()?);
        let mut pipeline = Pipeline::new(Operation::Update, self.reporter.phases.clone());

        let version = self.download_release(&mut pipeline, channel, &lock).await?;

        let mut controller = self.controller();
        pipeline.enter(Phase::Stop);
        controller.stop().await?;

        pipeline.enter(Phase::Install);
        paths.ensure_dirs().io_context(|| format!("create {}", paths.root.display()))?;
        archive::install_binaries(&paths.staging, &paths.bin)?;

        pipeline.enter(Phase::Seed);
        let genesis = self.settings.genesis_in(&paths.staging);
        let seeded =
            archive::seed_data_dir(&genesis, &paths.staging, &paths.data, SeedMode::PreserveExisting)?;
        if !seeded.is_empty() {
            info!(files = seeded.len(), "seeded missing data directory files");
        }

        pipeline.enter(Phase::Start);
        controller.start().await?;

        info!(release = %version.raw_tag, "node updated");
        Ok(version)
    }

    /// Resolve, fetch, extract and verify the staged release. Nothing outside
    /// the download cache and staging directory is touched, so a failure here
    /// leaves the live installation as it was.
    ///
    /// The extraction task keeps its own handle on `lock`, so an abandoned
    /// operation still holds the installation until the task has stopped.
    async fn download_release(
        &self,
        pipeline: &mut Pipeline,
        channel: &str,
        lock: &Arc<InstallLock>,
    ) -> Result<ResolvedVersion, InstallError> {
        let paths = &self.settings.paths;

        pipeline.enter(Phase::Resolve);
        let version = release::resolve(&self.client, &self.settings.releases_url, channel).await?;
        info!(tag = %version.raw_tag, channel = %version.channel, version = %version.semver, "resolved release");

        pipeline.enter(Phase::Fetch);
        let url = version.tarball_url(&self.settings.archive_url);
        let tarball = download::fetch(
            &self.client,
            &url,
            &paths.downloads,
            self.settings.force_download,
            self.settings.progress_interval,
            &self.reporter.downloads,
        )
        .await?;

        pipeline.enter(Phase::Extract);
        if self.settings.force_download {
            clear_dir(&paths.staging)?;
        }
        let staging = paths.staging.clone();
        let held = Arc::clone(lock);
        let stop = self.cancel.child_token();
        let _stop_on_drop = stop.clone().drop_guard();
        tokio::task::spawn_blocking(move || {
            let _held = held;
            archive::extract(&tarball, &staging, &stop)
        })
        .await
        .map_err(|e| InstallError::io("extract release", std::io::Error::other(e)))??;

        let genesis = self.settings.genesis_in(&paths.staging);
        archive::verify_staging(&genesis, &paths.staging)?;

        Ok(version)
    }
}

fn clear_dir(dir: &Path) -> Result<(), InstallError> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).io_context(|| format!("remove {}", dir.display()))?;
    }
    std::fs::create_dir_all(dir).io_context(|| format!("create {}", dir.display()))
}
