use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{InstallError, IoContext};

/// Exclusive claim on an installation root, released on drop.
#[derive(Debug)]
pub struct InstallLock {
    path: PathBuf,
}

impl InstallLock {
    /// Fail fast with `Locked` if another invocation already holds `path`.
    pub fn acquire(path: &Path) -> Result<Self, InstallError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .io_context(|| format!("create {}", parent.display()))?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(InstallError::Locked {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(InstallError::io(format!("create {}", path.display()), e)),
        };
        writeln!(file, "{}", std::process::id())
            .io_context(|| format!("write {}", path.display()))?;
        debug!(lock = %path.display(), "acquired install lock");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "failed to release install lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("algorun.lock");

        let first = InstallLock::acquire(&path).unwrap();
        let err = InstallLock::acquire(&path).unwrap_err();
        assert!(matches!(err, InstallError::Locked { .. }));

        drop(first);
        assert!(!path.exists());
        InstallLock::acquire(&path).unwrap();
    }

    #[test]
    fn lock_file_records_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/algorun.lock");
        let _lock = InstallLock::acquire(&path).unwrap();
        let pid: u32 = std::fs::read_to_string(&path).unwrap().trim().parse().unwrap();
        assert_eq!(pid, std::process::id());
    }
}
