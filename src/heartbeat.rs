use std::time::Duration;

use anyhow::{Context as _, Result};
use reqwest::Client;
use tracing::{debug, warn};

use crate::sink::RunStatus;

pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn send_heartbeat(client: &Client, url: &str) -> Result<()> {
    client
        .get(url)
        .timeout(HEARTBEAT_TIMEOUT)
        .send()
        .await
        .context("request failed")?
        .error_for_status()
        .context("monitor rejected heartbeat")?;
    Ok(())
}

/// Sends one heartbeat and logs the result. Never retried, never fatal.
pub async fn notify(client: &Client, url: &str) {
    match send_heartbeat(client, url).await {
        Ok(()) => debug!("Sent heartbeat to {url}"),
        Err(err) => warn!("Failed to send heartbeat to {url}: {err:#}"),
    }
}

/// Sends the heartbeat when one is configured and `status` allows it.
/// Returns whether a request was made.
pub async fn notify_after(status: &RunStatus, client: &Client, url: Option<&str>) -> bool {
    let Some(url) = url else {
        return false;
    };
    if !status.sends_heartbeat() {
        debug!("skipping heartbeat: run ended with {status:?}");
        return false;
    }
    notify(client, url).await;
    true
}
