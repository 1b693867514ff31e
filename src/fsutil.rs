use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{InstallError, IoContext};

fn temp_beside(path: &Path) -> Result<NamedTempFile, InstallError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    tempfile::Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(".tmp")
        .tempfile_in(dir)
        .io_context(|| format!("create temp file in {}", dir.display()))
}

/// Replace `path` with `contents` via a sibling temp file and a rename, so a
/// crash mid-write leaves either the old or the new file, never a torn one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), InstallError> {
    let mut tmp = temp_beside(path)?;
    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .io_context(|| format!("write {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| InstallError::io(format!("rename into {}", path.display()), e.error))?;
    Ok(())
}

/// Copy `src` over `dest` (keeping permission bits) through a temp file.
///
/// Renaming over a running executable is safe where writing into it is not.
pub fn copy_atomic(src: &Path, dest: &Path) -> Result<(), InstallError> {
    let tmp = temp_beside(dest)?;
    std::fs::copy(src, tmp.path())
        .io_context(|| format!("copy {} to {}", src.display(), dest.display()))?;
    tmp.persist(dest)
        .map_err(|e| InstallError::io(format!("rename into {}", dest.display()), e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_content_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn copy_atomic_keeps_exec_bit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src-goal");
        std::fs::write(&src, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&src, std::fs::Permissions::from_mode(0o755)).unwrap();

        let dest = dir.path().join("goal");
        copy_atomic(&src, &dest).unwrap();
        let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
