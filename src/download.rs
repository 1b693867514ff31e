use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{InstallError, IoContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Started { name: String, total: Option<u64> },
    Progress { bytes: u64 },
    Complete { bytes: u64 },
    Cached { path: PathBuf },
}

/// Last path segment of a URL, used as the cached file name.
pub fn file_name_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    path.rsplit('/').next().filter(|name| !name.is_empty())
}

fn checksum_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// A cached copy counts as valid when it exists and, if a checksum sidecar was
/// recorded for it, still matches that checksum.
fn cached_copy_is_valid(path: &Path) -> Result<bool, InstallError> {
    if !path.is_file() {
        return Ok(false);
    }
    let sidecar = checksum_path(path);
    let expected = match std::fs::read_to_string(&sidecar) {
        Ok(s) => s.trim().to_string(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(InstallError::io(format!("read {}", sidecar.display()), e)),
    };
    let actual = sha256_file(path).io_context(|| format!("hash {}", path.display()))?;
    if actual != expected {
        warn!(path = %path.display(), "cached archive checksum mismatch, downloading again");
        return Ok(false);
    }
    Ok(true)
}

/// Emit the transferred byte count on a fixed interval until `done` fires,
/// then once more with the final count.
async fn report_progress(
    transferred: Arc<AtomicU64>,
    every: Duration,
    tx: mpsc::UnboundedSender<DownloadEvent>,
    mut done: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = &mut done => {
                let bytes = transferred.load(Ordering::Relaxed);
                tx.send(DownloadEvent::Progress { bytes }).ok();
                break;
            }
            _ = ticker.tick() => {
                let bytes = transferred.load(Ordering::Relaxed);
                tx.send(DownloadEvent::Progress { bytes }).ok();
            }
        }
    }
}

/// Download `url` into `dest_dir`, returning the local path.
///
/// An existing file of the same name short-circuits the download entirely
/// unless `force` is set. Bytes are streamed into a temp file in `dest_dir`
/// that is renamed into place only once the body is complete, so the final
/// path never holds a partial archive.
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    dest_dir: &Path,
    force: bool,
    progress_interval: Duration,
    tx: &mpsc::UnboundedSender<DownloadEvent>,
) -> Result<PathBuf, InstallError> {
    let download_error = |reason: String| InstallError::Download {
        url: url.to_string(),
        reason,
    };

    let name = file_name_from_url(url)
        .ok_or_else(|| download_error("URL has no file name".into()))?
        .to_string();
    let dest = dest_dir.join(&name);

    if !force && cached_copy_is_valid(&dest)? {
        info!(path = %dest.display(), "using cached download");
        tx.send(DownloadEvent::Cached { path: dest.clone() }).ok();
        return Ok(dest);
    }

    std::fs::create_dir_all(dest_dir)
        .io_context(|| format!("create {}", dest_dir.display()))?;

    info!(%url, "downloading");
    let mut resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| download_error(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(download_error(format!("HTTP {}", resp.status())));
    }

    let total = resp.content_length();
    tx.send(DownloadEvent::Started {
        name: name.clone(),
        total,
    })
    .ok();

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(".part")
        .tempfile_in(dest_dir)
        .io_context(|| format!("create temp file in {}", dest_dir.display()))?;

    let transferred = Arc::new(AtomicU64::new(0));
    let (done_tx, done_rx) = oneshot::channel();
    let ticker = tokio::spawn(report_progress(
        transferred.clone(),
        progress_interval,
        tx.clone(),
        done_rx,
    ));

    let mut hasher = Sha256::new();
    let body = async {
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| download_error(e.to_string()))?
        {
            tmp.write_all(&chunk).io_context(|| "write download")?;
            hasher.update(&chunk);
            transferred.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        }
        Ok::<_, InstallError>(())
    }
    .await;

    done_tx.send(()).ok();
    ticker.await.ok();
    body?;

    let bytes = transferred.load(Ordering::Relaxed);
    if let Some(expected) = total {
        if bytes != expected {
            return Err(download_error(format!(
                "truncated body: got {} of {} bytes",
                bytes, expected
            )));
        }
    }

    tmp.as_file()
        .sync_all()
        .io_context(|| "flush download")?;
    tmp.persist(&dest)
        .map_err(|e| InstallError::io(format!("rename into {}", dest.display()), e.error))?;

    let sidecar = checksum_path(&dest);
    let digest = hex::encode(hasher.finalize());
    std::fs::write(&sidecar, format!("{}\n", digest))
        .io_context(|| format!("write {}", sidecar.display()))?;
    debug!(path = %dest.display(), sha256 = %digest, bytes, "download complete");

    tx.send(DownloadEvent::Complete { bytes }).ok();
    Ok(dest)
}
