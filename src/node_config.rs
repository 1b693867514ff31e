use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::info;

use crate::error::{InstallError, IoContext};
use crate::fsutil;

pub const ALGOD_NET: &str = "algod.net";
pub const ALGOD_TOKEN: &str = "algod.token";
pub const KMD_NET: &str = "kmd.net";
pub const KMD_DIR_PREFIX: &str = "kmd-";
pub const NODE_CONFIG: &str = "config.json";
pub const KMD_CONFIG: &str = "kmd_config.json";
pub const KMD_CONFIG_EXAMPLE: &str = "kmd_config.json.example";

const BIND_ALL: &str = "0.0.0.0";

/// REST endpoint of a running node, read from files the node writes on start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEndpoint {
    pub address: String,
    pub token: String,
}

impl NodeEndpoint {
    /// Only valid after the node has been started at least once.
    pub fn discover(data_dir: &Path) -> Result<Self, InstallError> {
        let net = data_dir.join(ALGOD_NET);
        let address = std::fs::read_to_string(&net)
            .map_err(|e| InstallError::PortDiscovery {
                path: net.clone(),
                reason: e.to_string(),
            })?
            .trim()
            .to_string();
        let token_path = data_dir.join(ALGOD_TOKEN);
        let token = std::fs::read_to_string(&token_path)
            .io_context(|| format!("read {}", token_path.display()))?
            .trim()
            .to_string();
        Ok(Self { address, token })
    }

    /// Base URL for REST calls; wildcard listen hosts are reached via loopback.
    pub fn base_url(&self) -> String {
        let (host, port) = self
            .address
            .rsplit_once(':')
            .unwrap_or((self.address.as_str(), ""));
        let host = match host {
            "" | "0.0.0.0" | "[::]" => "127.0.0.1",
            h => h,
        };
        format!("http://{}:{}", host, port)
    }
}

/// Key-management daemon endpoint, found in the generated `kmd-*` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmdEndpoint {
    pub address: String,
    pub dir: PathBuf,
}

impl KmdEndpoint {
    pub fn discover(data_dir: &Path) -> Result<Self, InstallError> {
        let dir = find_kmd_dir(data_dir)?;
        let net = dir.join(KMD_NET);
        let address = std::fs::read_to_string(&net)
            .map_err(|e| InstallError::PortDiscovery {
                path: net.clone(),
                reason: e.to_string(),
            })?
            .trim()
            .to_string();
        Ok(Self { address, dir })
    }
}

/// Locate the single `kmd-*` directory the daemon created in `data_dir`.
pub fn find_kmd_dir(data_dir: &Path) -> Result<PathBuf, InstallError> {
    let entries = std::fs::read_dir(data_dir)
        .io_context(|| format!("list {}", data_dir.display()))?;

    let mut matches = Vec::new();
    for entry in entries {
        let entry = entry.io_context(|| format!("list {}", data_dir.display()))?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(KMD_DIR_PREFIX) && entry.path().is_dir() {
            matches.push(entry.path());
        }
    }
    matches.sort();

    let lookup_error = |reason: String| InstallError::KmdDirectory {
        data_dir: data_dir.to_path_buf(),
        reason,
    };
    match matches.len() {
        0 => Err(lookup_error(format!("no {}* directory (has kmd been started?)", KMD_DIR_PREFIX))),
        1 => Ok(matches.remove(0)),
        _ => Err(lookup_error(format!(
            "several candidates: {}",
            matches
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Port number at the end of a `host:port` line.
pub fn parse_port(contents: &str) -> Option<u16> {
    let (_, port) = contents.trim().rsplit_once(':')?;
    port.trim().parse().ok()
}

fn read_port(path: &Path) -> Result<u16, InstallError> {
    let contents = std::fs::read_to_string(path).map_err(|e| InstallError::PortDiscovery {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_port(&contents).ok_or_else(|| InstallError::PortDiscovery {
        path: path.to_path_buf(),
        reason: format!("no port in {:?}", contents.trim()),
    })
}

fn load_object(path: &Path) -> Result<Map<String, Value>, InstallError> {
    let raw = std::fs::read_to_string(path).io_context(|| format!("read {}", path.display()))?;
    let format_error = |reason: String| InstallError::ConfigFormat {
        path: path.to_path_buf(),
        reason,
    };
    match serde_json::from_str::<Value>(&raw).map_err(|e| format_error(e.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(format_error(format!("expected a JSON object, found {}", json_kind(&other)))),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn render(path: &Path, map: Map<String, Value>) -> Result<Vec<u8>, InstallError> {
    let mut out = serde_json::to_vec_pretty(&Value::Object(map)).map_err(|e| InstallError::ConfigFormat {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    out.push(b'\n');
    Ok(out)
}

/// Files written by [`patch_configs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchedConfigs {
    pub node_config: PathBuf,
    pub kmd_config: PathBuf,
    pub algod_port: u16,
    pub kmd_port: u16,
}

/// Bind node and kmd listeners to all interfaces on their current ports and
/// open kmd's allowed origins. Keys other than those three pass through.
///
/// Both documents are parsed and rendered before either file is replaced.
pub fn patch_configs(data_dir: &Path, kmd_dir: &Path) -> Result<PatchedConfigs, InstallError> {
    let algod_port = read_port(&data_dir.join(ALGOD_NET))?;
    let kmd_port = read_port(&kmd_dir.join(KMD_NET))?;

    let node_config = data_dir.join(NODE_CONFIG);
    let mut node = load_object(&node_config)?;
    node.insert(
        "EndpointAddress".into(),
        Value::String(format!("{}:{}", BIND_ALL, algod_port)),
    );

    let kmd_config = kmd_dir.join(KMD_CONFIG);
    let kmd_source = if kmd_config.is_file() {
        kmd_config.clone()
    } else {
        kmd_dir.join(KMD_CONFIG_EXAMPLE)
    };
    let mut kmd = load_object(&kmd_source)?;
    kmd.insert(
        "address".into(),
        Value::String(format!("{}:{}", BIND_ALL, kmd_port)),
    );
    kmd.insert(
        "allowed_origins".into(),
        Value::Array(vec![Value::String("*".into())]),
    );

    let node_bytes = render(&node_config, node)?;
    let kmd_bytes = render(&kmd_config, kmd)?;
    fsutil::write_atomic(&node_config, &node_bytes)?;
    fsutil::write_atomic(&kmd_config, &kmd_bytes)?;

    info!(algod_port, kmd_port, "patched node and kmd listen addresses");
    Ok(PatchedConfigs {
        node_config,
        kmd_config,
        algod_port,
        kmd_port,
    })
}
