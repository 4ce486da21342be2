//! Readiness probe for the host HTTP server

use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::RunError;
use crate::logging::operations;

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// One bounded GET; any 2xx response counts as ready
pub async fn probe_once(client: &reqwest::Client, url: &str) -> Result<(), String> {
    match client.get(url).send().await {
        Ok(response) if response.status().is_success() => Ok(()),
        Ok(response) => Err(format!("status {}", response.status())),
        Err(e) => Err(e.to_string()),
    }
}

/// Poll `url` with exponential backoff until it answers or `timeout` passes
///
/// `exited` is checked between attempts; returning `Some(reason)` aborts the
/// wait, which is how a launcher that died during startup is reported.
pub async fn wait_until_ready<F>(url: &str, timeout: Duration, mut exited: F) -> Result<(), RunError>
where
    F: FnMut() -> Option<String>,
{
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| RunError::NotReady(format!("failed to build HTTP client: {}", e)))?;

    let started = Instant::now();
    let mut backoff = INITIAL_BACKOFF;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let last_error = match probe_once(&client, url).await {
            Ok(()) => {
                info!(
                    operation = operations::PROBE,
                    status = "ready",
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Host is ready"
                );
                return Ok(());
            }
            Err(e) => e,
        };
        debug!(operation = operations::PROBE, attempts, "Host not ready: {}", last_error);

        if let Some(reason) = exited() {
            return Err(RunError::NotReady(reason));
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(RunError::NotReady(format!(
                "no answer from {} after {:?} ({})",
                url, timeout, last_error
            )));
        }

        tokio::time::sleep(backoff.min(timeout - elapsed)).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
