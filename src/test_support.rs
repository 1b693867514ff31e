//! Fixtures shared by unit tests: release tarballs and fake control binaries.

use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::{Mutex, MutexGuard};

static SERIAL: Mutex<()> = Mutex::const_new(());

/// Serialize tests that write and then execute scripts. A script written by
/// one test can be briefly inherited as an open fd by a child forked in
/// another, which makes exec fail with ETXTBSY.
pub async fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().await
}

pub struct TarEntry {
    pub path: String,
    pub data: Vec<u8>,
    pub mode: u32,
}

impl TarEntry {
    pub fn file(path: &str, data: &[u8], mode: u32) -> Self {
        Self {
            path: path.to_string(),
            data: data.to_vec(),
            mode,
        }
    }
}

/// Write a `.tar.gz` with the given entries. Names are written raw into the
/// header so tests can build archives the tar builder itself would refuse.
pub fn write_tarball(dest: &Path, entries: &[TarEntry]) {
    let file = std::fs::File::create(dest).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        {
            let name = &mut header.as_gnu_mut().unwrap().name;
            let bytes = entry.path.as_bytes();
            assert!(bytes.len() < name.len(), "tar entry name too long");
            name[..bytes.len()].copy_from_slice(bytes);
        }
        header.set_size(entry.data.len() as u64);
        header.set_mode(entry.mode);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, entry.data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Write an executable script to `path`, closing it before returning.
#[cfg(unix)]
pub fn install_script(path: &Path, contents: &str) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// A stand-in for `goal` that fakes the files a real node writes on start.
///
/// `node start` writes `algod.net` pointing at `algod_address`, `kmd start`
/// creates a `kmd-v0.5` directory with its net file and example config.
/// Every invocation is appended to `<data dir>/../goal.log`.
pub fn fake_goal_script(algod_address: &str) -> String {
    format!(
        r#"#!/bin/sh
DATA="$2"
shift 2
echo "$*" >> "$DATA/../goal.log"
case "$1 $2" in
  "node start")
    printf '%s\n' "{algod_address}" > "$DATA/algod.net"
    printf 'aaaabbbbccccdddd\n' > "$DATA/algod.token"
    echo "Algorand node successfully started!"
    ;;
  "kmd start")
    mkdir -p "$DATA/kmd-v0.5"
    printf '127.0.0.1:7833\n' > "$DATA/kmd-v0.5/kmd.net"
    if [ ! -f "$DATA/kmd-v0.5/kmd_config.json.example" ]; then
      printf '{{"address":"","allowed_origins":[],"session_lifetime_secs":60}}\n' > "$DATA/kmd-v0.5/kmd_config.json.example"
    fi
    echo "Successfully started kmd"
    ;;
  "node stop") echo "The node was successfully stopped." ;;
  "kmd stop") echo "Successfully stopped kmd" ;;
  "node status") echo "Last committed block: 11" ;;
  "node catchup") echo "Started catchup to $3" ;;
  *) echo "unknown command: $*" >&2; exit 1 ;;
esac
"#
    )
}
