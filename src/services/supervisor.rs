use std::{fmt::Display, future::Future, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Retry `connect` with exponential backoff until it succeeds.
pub async fn connect_with_backoff<F, Fut, T, E>(label: &str, mut connect: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut delay = INITIAL_DELAY;
    let mut attempt = 1u32;

    loop {
        match connect().await {
            Ok(connection) => {
                info!(label, attempt, "storage connection established");
                return connection;
            }
            Err(err) => {
                warn!(label, attempt, error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = next_delay(delay);
                attempt += 1;
            }
        }
    }
}

/// Poll `check` forever, logging transitions in and out of degraded mode.
pub async fn monitor_health<F, Fut, E>(label: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let mut degraded = false;
    loop {
        sleep(HEALTH_POLL_INTERVAL).await;
        match check().await {
            Ok(()) if degraded => {
                info!(label, "storage healthy again; leaving degraded mode");
                degraded = false;
            }
            Ok(()) => {}
            Err(err) if !degraded => {
                warn!(label, error = %err, "storage health check failed; entering degraded mode");
                degraded = true;
            }
            Err(err) => warn!(label, error = %err, "storage still unavailable"),
        }
    }
}

fn next_delay(delay: Duration) -> Duration {
    (delay * 2).min(MAX_DELAY)
}
