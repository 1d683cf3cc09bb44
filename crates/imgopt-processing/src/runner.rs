use futures::stream::{self, StreamExt};
use imgopt_db::BatchLease;

use crate::extract::ImageCell;
use crate::traits::ItemProcessor;

/// Result of running every item of a batch.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Items that converted successfully, paired with their new URL.
    pub replacements: Vec<(ImageCell, String)>,
    pub failed: u64,
    /// The batch token fired before every item finished.
    pub cancelled: bool,
}

/// Run `items` through `processor` with the lease's pinned parallelism.
///
/// Each finished item, successful or not, advances the batch progress. A failed
/// item keeps its original URL. Cancellation is checked when an item starts; an
/// item already running is allowed to finish. Items whose progress was refused are
/// left out of the summary, so it always matches what the batch record shows.
pub async fn run_items<P>(processor: &P, lease: &BatchLease, items: Vec<ImageCell>) -> RunSummary
where
    P: ItemProcessor + ?Sized,
{
    let threads = lease.threads().max(1);
    let batch_id = lease.batch_id();
    let token = lease.cancel_token().clone();

    let outcomes: Vec<_> = stream::iter(items)
        .map(|item| {
            let token = token.clone();
            async move {
                if token.is_cancelled() {
                    return None;
                }
                let result = processor.process(batch_id, &item.url).await;
                if let Err(e) = &result {
                    tracing::warn!(
                        batch_id = %batch_id,
                        row = item.row + 1,
                        col = item.col + 1,
                        url = %item.url,
                        error = %e,
                        "Item failed, keeping original URL"
                    );
                }
                if !lease.advance(result.is_err()).await {
                    return None;
                }
                Some((item, result))
            }
        })
        .buffer_unordered(threads)
        .collect()
        .await;

    let mut summary = RunSummary {
        cancelled: token.is_cancelled(),
        ..RunSummary::default()
    };
    for (item, result) in outcomes.into_iter().flatten() {
        match result {
            Ok(new_url) => summary.replacements.push((item, new_url)),
            Err(_) => summary.failed += 1,
        }
    }
    summary
}
