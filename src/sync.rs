use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::InstallError;
use crate::node_config::NodeEndpoint;

const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Anything that can report the node's last committed round.
pub trait StatusSource {
    fn last_round(&self) -> impl Future<Output = Result<u64, InstallError>> + Send;
}

#[derive(Debug, Deserialize)]
struct NodeStatus {
    #[serde(rename = "last-round")]
    last_round: u64,
}

/// Minimal REST client for the node's `/v2/status` call.
pub struct AlgodClient {
    client: reqwest::Client,
    status_url: String,
    token: String,
}

impl AlgodClient {
    pub fn new(client: reqwest::Client, endpoint: &NodeEndpoint) -> Self {
        Self {
            client,
            status_url: format!("{}/v2/status", endpoint.base_url()),
            token: endpoint.token.clone(),
        }
    }
}

impl StatusSource for AlgodClient {
    async fn last_round(&self) -> Result<u64, InstallError> {
        let query_error = |reason: String| InstallError::StatusQuery { reason };
        let resp = self
            .client
            .get(&self.status_url)
            .header("X-Algo-API-Token", &self.token)
            .timeout(STATUS_TIMEOUT)
            .send()
            .await
            .map_err(|e| query_error(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(query_error(format!("HTTP {} from {}", resp.status(), self.status_url)));
        }
        let status: NodeStatus = resp
            .json()
            .await
            .map_err(|e| query_error(format!("invalid status body: {}", e)))?;
        Ok(status.last_round)
    }
}

/// Wait until the node reports a round strictly greater than the one seen at
/// call time.
///
/// Polls every `interval`. Any failed poll ends the wait immediately. The
/// deadline only wins if it expires strictly before a poll has observed
/// progress; an in-flight poll is abandoned when it does.
pub async fn wait_for_progress<S: StatusSource>(
    source: &S,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<u64, InstallError> {
    let started = Instant::now();
    let deadline = tokio::time::sleep_until(started + timeout);
    tokio::pin!(deadline);

    let start_round = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(InstallError::Cancelled),
        _ = &mut deadline => return Err(InstallError::SyncTimeout { start_round: 0, timeout }),
        round = source.last_round() => round?,
    };
    info!(start_round, "waiting for node to advance");

    let mut ticker = tokio::time::interval_at(started + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InstallError::Cancelled),
            _ = &mut deadline => return Err(InstallError::SyncTimeout { start_round, timeout }),
            _ = ticker.tick() => {}
        }

        // A poll that completes at the deadline instant still counts.
        let round = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InstallError::Cancelled),
            round = source.last_round() => round?,
            _ = &mut deadline => return Err(InstallError::SyncTimeout { start_round, timeout }),
        };
        debug!(round, start_round, "polled node status");
        if round > start_round {
            info!(round, elapsed = ?started.elapsed(), "node is advancing");
            return Ok(round);
        }
    }
}
