//! Follow the `_changes` feed for a fixed set of documents.

use std::time::Duration;

use async_stream::stream;
use futures::{Stream, StreamExt};
use rand::Rng;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::warn;

use super::{client::CouchClient, models::ChangeRow};

/// Where a feed starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStart {
    /// Replay the latest revision of every watched document first.
    Beginning,
    /// Only report changes made after the first request.
    Now,
}

impl FeedStart {
    fn since(self) -> Value {
        match self {
            FeedStart::Beginning => Value::from(0),
            FeedStart::Now => Value::String("now".into()),
        }
    }
}

/// Endless stream of change rows; transport failures are logged and retried after `retry` plus
/// jitter.
pub fn watch(
    client: CouchClient,
    doc_ids: Vec<String>,
    start: FeedStart,
    retry: Duration,
) -> impl Stream<Item = ChangeRow> + Send + 'static {
    stream! {
        let mut since = start.since();
        loop {
            match client.fetch_changes(&doc_ids, &since).await {
                Ok(response) => {
                    since = response.last_seq;
                    for row in response.results {
                        yield row;
                    }
                }
                Err(err) => {
                    let delay = jittered(retry);
                    warn!(error = %err, delay_ms = delay.as_millis() as u64, "change feed failed; retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Drive a change stream on a background task, handing each row to `handle`.
pub fn spawn_feed<F>(
    client: CouchClient,
    doc_ids: Vec<String>,
    start: FeedStart,
    retry: Duration,
    mut handle: F,
) -> JoinHandle<()>
where
    F: FnMut(ChangeRow) + Send + 'static,
{
    tokio::spawn(async move {
        let mut rows = Box::pin(watch(client, doc_ids, start, retry));
        while let Some(row) = rows.next().await {
            handle(row);
        }
    })
}

fn jittered(base: Duration) -> Duration {
    let spread = (base.as_millis() as u64 / 2).max(1);
    base + Duration::from_millis(rand::rng().random_range(0..=spread))
}
