use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures raised by the install/update/bootstrap steps.
///
/// Every step aborts the remaining pipeline on the first error; the only
/// step whose failure is downgraded to a warning is the catchup trigger at
/// the end of `create`.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("no release tag matching channel '{channel}'")]
    NotFound { channel: String },

    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("release archive is missing {}", missing.display())]
    IncompleteArchive { missing: PathBuf },

    #[error("archive entry '{entry}' escapes the staging directory")]
    UnsafeArchiveEntry { entry: String },

    #[error("invalid config file {}: {reason}", path.display())]
    ConfigFormat { path: PathBuf, reason: String },

    #[error("cannot discover port from {}: {reason}", path.display())]
    PortDiscovery { path: PathBuf, reason: String },

    #[error("kmd directory lookup in {}: {reason}", data_dir.display())]
    KmdDirectory { data_dir: PathBuf, reason: String },

    #[error("`{command}` exited with {status}{}", format_output(output))]
    Process {
        command: String,
        status: String,
        output: Vec<String>,
    },

    #[error("node status query failed: {reason}")]
    StatusQuery { reason: String },

    #[error("node did not advance past round {start_round} within {timeout:?}")]
    SyncTimeout { start_round: u64, timeout: Duration },

    #[error("catchpoint fetch from {url} failed: {reason}")]
    CatchpointFetch { url: String, reason: String },

    #[error("installation at {} is locked by another invocation (remove the lock file if stale)", path.display())]
    Locked { path: PathBuf },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation did not finish within {limit:?}")]
    DeadlineExceeded { limit: Duration },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl InstallError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        InstallError::Io {
            context: context.into(),
            source,
        }
    }
}

fn format_output(output: &[String]) -> String {
    if output.is_empty() {
        return String::new();
    }
    let mut s = String::from("\n");
    for line in output {
        s.push_str("  | ");
        s.push_str(line);
        s.push('\n');
    }
    s.trim_end().to_string()
}

/// Attach a context message to `std::io` results.
pub trait IoContext<T> {
    fn io_context<F, C>(self, f: F) -> Result<T, InstallError>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, C>(self, f: F) -> Result<T, InstallError>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| InstallError::io(f(), e))
    }
}
