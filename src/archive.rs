use std::fs::File;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{InstallError, IoContext};
use crate::fsutil;

/// Executables the node installation needs, by exact file name.
pub const REQUIRED_BINARIES: [&str; 3] = ["goal", "kmd", "algod"];

/// Whether seeding may replace files already present in the data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedMode {
    /// Fresh install: always write the release's seeds.
    Overwrite,
    /// Update: keep whatever the live data directory already holds.
    PreserveExisting,
}

/// True when `path` stays inside the directory it is joined onto.
fn is_contained(path: &Path) -> bool {
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// Unpack a gzip-compressed tarball into `staging`.
///
/// Any entry that would land outside `staging` fails the whole extraction.
/// `cancel` is checked between entries.
pub fn extract(
    archive_path: &Path,
    staging: &Path,
    cancel: &CancellationToken,
) -> Result<(), InstallError> {
    std::fs::create_dir_all(staging)
        .io_context(|| format!("create {}", staging.display()))?;

    let file = File::open(archive_path)
        .io_context(|| format!("open {}", archive_path.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let context = || format!("extract {}", archive_path.display());

    let mut count = 0usize;
    for entry in archive.entries().io_context(context)? {
        if cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }
        let mut entry = entry.io_context(context)?;
        let entry_path = entry.path().io_context(context)?.into_owned();
        if !is_contained(&entry_path) {
            return Err(InstallError::UnsafeArchiveEntry {
                entry: entry_path.display().to_string(),
            });
        }
        if let Some(target) = entry.link_name().io_context(context)? {
            let resolved = entry_path
                .parent()
                .map(|p| p.join(&target))
                .unwrap_or_else(|| target.to_path_buf());
            if !is_contained(&resolved) {
                return Err(InstallError::UnsafeArchiveEntry {
                    entry: format!("{} -> {}", entry_path.display(), target.display()),
                });
            }
        }
        if !entry.unpack_in(staging).io_context(context)? {
            return Err(InstallError::UnsafeArchiveEntry {
                entry: entry_path.display().to_string(),
            });
        }
        count += 1;
    }
    info!(entries = count, staging = %staging.display(), "extracted release archive");
    Ok(())
}

fn binary_sources(staging: &Path) -> Vec<PathBuf> {
    let source_dir = staging.join("bin");
    REQUIRED_BINARIES
        .iter()
        .map(|name| source_dir.join(name))
        .collect()
}

fn seed_sources(genesis: &Path, staging: &Path) -> [PathBuf; 2] {
    [
        genesis.to_path_buf(),
        staging.join("data").join("config.json.example"),
    ]
}

fn require_files<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> Result<(), InstallError> {
    match paths.into_iter().find(|p| !p.is_file()) {
        Some(missing) => Err(InstallError::IncompleteArchive {
            missing: missing.clone(),
        }),
        None => Ok(()),
    }
}

/// Check that `staging` holds every binary and seed file an install needs.
///
/// Run before anything live is stopped or removed.
pub fn verify_staging(genesis: &Path, staging: &Path) -> Result<(), InstallError> {
    require_files(&binary_sources(staging))?;
    require_files(&seed_sources(genesis, staging))
}

/// Copy the required executables from `<staging>/bin` into `bin_dir`.
///
/// All three must be present before anything is copied, so a bad archive
/// never leaves a mix of old and new binaries behind.
pub fn install_binaries(staging: &Path, bin_dir: &Path) -> Result<Vec<PathBuf>, InstallError> {
    let sources = binary_sources(staging);
    require_files(&sources)?;

    std::fs::create_dir_all(bin_dir).io_context(|| format!("create {}", bin_dir.display()))?;
    let mut installed = Vec::with_capacity(sources.len());
    for (name, src) in REQUIRED_BINARIES.iter().zip(&sources) {
        let dest = bin_dir.join(name);
        fsutil::copy_atomic(src, &dest)?;
        debug!(binary = name, dest = %dest.display(), "installed");
        installed.push(dest);
    }
    Ok(installed)
}

/// Copy the genesis descriptor and example node config into `data_dir`.
///
/// Returns the files that were written; in `PreserveExisting` mode files the
/// data directory already holds are skipped.
pub fn seed_data_dir(
    genesis: &Path,
    staging: &Path,
    data_dir: &Path,
    mode: SeedMode,
) -> Result<Vec<PathBuf>, InstallError> {
    let sources = seed_sources(genesis, staging);
    require_files(&sources)?;
    let seeds = sources
        .into_iter()
        .zip([data_dir.join("genesis.json"), data_dir.join("config.json")]);

    std::fs::create_dir_all(data_dir).io_context(|| format!("create {}", data_dir.display()))?;
    let mut written = Vec::new();
    for (src, dest) in seeds {
        if mode == SeedMode::PreserveExisting && dest.exists() {
            debug!(path = %dest.display(), "keeping existing file");
            continue;
        }
        fsutil::copy_atomic(&src, &dest)?;
        written.push(dest);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{write_tarball, TarEntry};

    fn staging_with(bins: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        for b in bins {
            std::fs::write(dir.path().join("bin").join(b), format!("#!{}", b)).unwrap();
        }
        std::fs::create_dir_all(dir.path().join("genesis/mainnet")).unwrap();
        std::fs::write(dir.path().join("genesis/mainnet/genesis.json"), r#"{"network":"mainnet"}"#).unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/config.json.example"), r#"{"Version":33}"#).unwrap();
        dir
    }

    #[test]
    fn containment_rules() {
        assert!(is_contained(Path::new("bin/goal")));
        assert!(is_contained(Path::new("./a/../b")));
        assert!(!is_contained(Path::new("../evil")));
        assert!(!is_contained(Path::new("a/../../evil")));
        assert!(!is_contained(Path::new("/etc/passwd")));
    }

    #[test]
    fn extract_unpacks_tarball() {
        let dir = tempfile::tempdir().unwrap();
        let tarball = dir.path().join("node.tar.gz");
        write_tarball(
            &tarball,
            &[
                TarEntry::file("bin/goal", b"goal", 0o755),
                TarEntry::file("genesis/mainnet/genesis.json", b"{}", 0o644),
            ],
        );

        let staging = dir.path().join("temp");
        extract(&tarball, &staging, &CancellationToken::new()).unwrap();
        assert_eq!(std::fs::read(staging.join("bin/goal")).unwrap(), b"goal");
        assert!(staging.join("genesis/mainnet/genesis.json").is_file());
    }

    #[test]
    fn extract_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let tarball = dir.path().join("evil.tar.gz");
        write_tarball(
            &tarball,
            &[
                TarEntry::file("bin/goal", b"goal", 0o755),
                TarEntry::file("../escaped.txt", b"pwned", 0o644),
            ],
        );

        let staging = dir.path().join("temp");
        let err = extract(&tarball, &staging, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, InstallError::UnsafeArchiveEntry { ref entry } if entry.contains("escaped")));
        assert!(!dir.path().join("escaped.txt").exists());
    }

    #[test]
    fn install_binaries_copies_exactly_three() {
        let staging = staging_with(&["goal", "kmd", "algod"]);
        std::fs::write(staging.path().join("bin/diagcfg"), b"extra").unwrap();
        let bin = tempfile::tempdir().unwrap();

        let installed = install_binaries(staging.path(), bin.path()).unwrap();
        assert_eq!(installed.len(), 3);
        let mut names: Vec<_> = std::fs::read_dir(bin.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["algod", "goal", "kmd"]);
    }

    #[test]
    fn install_binaries_fails_when_one_missing() {
        for missing in REQUIRED_BINARIES {
            let present: Vec<&str> = REQUIRED_BINARIES.iter().copied().filter(|b| *b != missing).collect();
            let staging = staging_with(&present);
            let bin = tempfile::tempdir().unwrap();

            let err = install_binaries(staging.path(), bin.path()).unwrap_err();
            assert!(
                matches!(err, InstallError::IncompleteArchive { missing: ref p } if p.ends_with(missing)),
                "expected IncompleteArchive for {}",
                missing
            );
            assert_eq!(std::fs::read_dir(bin.path()).unwrap().count(), 0);
        }
    }

    #[test]
    fn seed_overwrite_replaces_config() {
        let staging = staging_with(&[]);
        let data = tempfile::tempdir().unwrap();
        std::fs::write(data.path().join("config.json"), "custom").unwrap();

        let genesis = staging.path().join("genesis/mainnet/genesis.json");
        let written = seed_data_dir(&genesis, staging.path(), data.path(), SeedMode::Overwrite).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(std::fs::read_to_string(data.path().join("config.json")).unwrap(), r#"{"Version":33}"#);
    }

    #[test]
    fn seed_preserve_keeps_customized_config() {
        let staging = staging_with(&[]);
        let data = tempfile::tempdir().unwrap();
        std::fs::write(data.path().join("config.json"), "custom").unwrap();

        let genesis = staging.path().join("genesis/mainnet/genesis.json");
        let written =
            seed_data_dir(&genesis, staging.path(), data.path(), SeedMode::PreserveExisting).unwrap();
        assert_eq!(written, vec![data.path().join("genesis.json")]);
        assert_eq!(std::fs::read_to_string(data.path().join("config.json")).unwrap(), "custom");
    }

    #[test]
    fn seed_requires_genesis() {
        let staging = staging_with(&[]);
        let data = tempfile::tempdir().unwrap();
        let genesis = staging.path().join("genesis/testnet/genesis.json");
        let err = seed_data_dir(&genesis, staging.path(), data.path(), SeedMode::Overwrite).unwrap_err();
        assert!(matches!(err, InstallError::IncompleteArchive { .. }));
    }

    #[test]
    fn verify_staging_names_first_missing_file() {
        let staging = staging_with(&["goal"]);
        let genesis = staging.path().join("genesis/mainnet/genesis.json");
        let err = verify_staging(&genesis, staging.path()).unwrap_err();
        assert!(matches!(err, InstallError::IncompleteArchive { missing: ref p } if p.ends_with("bin/kmd")));

        let staging = staging_with(&["goal", "kmd", "algod"]);
        std::fs::remove_file(staging.path().join("data/config.json.example")).unwrap();
        let err = verify_staging(&genesis, staging.path()).unwrap_err();
        assert!(matches!(err, InstallError::IncompleteArchive { missing: ref p } if p.ends_with("config.json.example")));
    }

    #[test]
    fn verify_staging_accepts_complete_release() {
        let staging = staging_with(&["goal", "kmd", "algod"]);
        let genesis = staging.path().join("genesis/mainnet/genesis.json");
        verify_staging(&genesis, staging.path()).unwrap();
    }

    #[test]
    fn cancelled_extract_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let tarball = dir.path().join("node.tar.gz");
        write_tarball(&tarball, &[TarEntry::file("bin/goal", b"goal", 0o755)]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let staging = dir.path().join("temp");
        let err = extract(&tarball, &staging, &cancel).unwrap_err();
        assert!(matches!(err, InstallError::Cancelled));
        assert!(!staging.join("bin/goal").exists());
    }
}
