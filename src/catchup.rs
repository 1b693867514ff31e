use std::time::Duration;

use tracing::info;

use crate::control::NodeController;
use crate::error::InstallError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Fetch the latest catchpoint label (e.g. `4420000#ABCD...`) as plain text.
pub async fn fetch_catchpoint(client: &reqwest::Client, url: &str) -> Result<String, InstallError> {
    let fetch_error = |reason: String| InstallError::CatchpointFetch {
        url: url.to_string(),
        reason,
    };

    let resp = client
        .get(url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .map_err(|e| fetch_error(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(fetch_error(format!("HTTP {}", resp.status())));
    }
    let body = resp.text().await.map_err(|e| fetch_error(e.to_string()))?;

    let label = body.trim();
    if label.is_empty() {
        return Err(fetch_error("empty catchpoint label".into()));
    }
    if label.chars().any(char::is_whitespace) {
        return Err(fetch_error(format!("unexpected catchpoint body {:?}", label)));
    }
    Ok(label.to_string())
}

/// Point the node at the latest catchpoint so it fast-syncs instead of
/// replaying history. Returns the label that was used.
pub async fn trigger_catchup(
    client: &reqwest::Client,
    url: &str,
    controller: &NodeController,
) -> Result<String, InstallError> {
    let label = fetch_catchpoint(client, url).await?;
    info!(%label, "starting catchup");
    controller.catchup(&label).await?;
    Ok(label)
}
