use std::ffi::OsString;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::InstallError;
use crate::process;
use crate::settings::InstallPaths;

/// Lifecycle of the node/kmd pair as driven by this controller. There is no
/// automatic restart: a crash only shows up as a failing `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Drives the node and key-management daemon through the `goal` control binary.
pub struct NodeController {
    goal: PathBuf,
    data_dir: PathBuf,
    output: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    state: NodeState,
}

impl NodeController {
    pub fn new(
        paths: &InstallPaths,
        output: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            goal: paths.goal(),
            data_dir: paths.data.clone(),
            output,
            cancel,
            state: NodeState::Stopped,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Invoke `goal -d <data dir> <args...>`.
    pub async fn goal<S: Into<OsString> + Clone>(&self, args: &[S]) -> Result<Vec<String>, InstallError> {
        let mut full: Vec<OsString> = Vec::with_capacity(args.len() + 2);
        full.push("-d".into());
        full.push(self.data_dir.clone().into_os_string());
        full.extend(args.iter().cloned().map(Into::into));
        process::run(&self.goal, &full, &self.output, &self.cancel).await
    }

    /// Start the node, then kmd with no idle timeout.
    pub async fn start(&mut self) -> Result<(), InstallError> {
        self.state = NodeState::Starting;
        for args in [&["node", "start"][..], &["kmd", "start", "-t", "0"][..]] {
            if let Err(e) = self.goal(args).await {
                self.state = NodeState::Stopped;
                return Err(e);
            }
        }
        self.state = NodeState::Running;
        info!(data_dir = %self.data_dir.display(), "node and kmd started");
        Ok(())
    }

    /// Stop the node and kmd. Either one already being down (or never having
    /// been installed) is not an error; only cancellation is.
    pub async fn stop(&mut self) -> Result<(), InstallError> {
        if !self.goal.is_file() {
            debug!(goal = %self.goal.display(), "no control binary installed, nothing to stop");
            self.state = NodeState::Stopped;
            return Ok(());
        }

        self.state = NodeState::Stopping;
        for args in [&["node", "stop"][..], &["kmd", "stop"][..]] {
            match self.goal(args).await {
                Ok(_) => {}
                Err(InstallError::Cancelled) => return Err(InstallError::Cancelled),
                Err(e) => warn!(command = %args.join(" "), error = %e, "stop failed, continuing"),
            }
        }
        self.state = NodeState::Stopped;
        Ok(())
    }

    pub async fn status(&self) -> Result<Vec<String>, InstallError> {
        self.goal(&["node", "status"]).await
    }

    /// Ask the node to fast-sync to `label`.
    pub async fn catchup(&self, label: &str) -> Result<Vec<String>, InstallError> {
        self.goal(&["node", "catchup", label]).await
    }
}
