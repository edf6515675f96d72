use std::sync::Arc;

use color_eyre::eyre::eyre;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::{
    page::{PageFetcher, total_items},
    send_or_cancel,
    sentinel::Sentinel,
};
use crate::{errors::Result, source::Page};

/// Collects every page of a listing, sending the raw items in batches (one per page) as they're fetched.
///
/// The first page is fetched upfront to find out the total number of pages, the rest are fetched concurrently by a
/// pool of workers. When the provider doesn't report the total, pages are followed one at a time until the last one.
/// The total number of items is sent once known, and both channels are closed once every worker has finished.
///
/// On the first error the remaining fetches are cancelled and the error is handed over to the sentinel.
#[instrument(skip_all, fields(query = F::QUERY))]
pub async fn collect<F>(
    fetcher: F,
    page_size: u32,
    workers: usize,
    sentinel: Sentinel,
    batches: flume::Sender<Vec<F::Item>>,
    total: flume::Sender<u64>,
) where
    F: PageFetcher,
{
    let token = sentinel.token().child_token();

    // Fetch the first page to discover how many there are
    let Some(first) = fetch(&fetcher, 1, page_size, &token, &sentinel).await else {
        return;
    };

    if first.is_last(1) {
        // Everything fits in a single page, there's no need for workers
        send_total(&total, first.items.len() as u64);
        send_or_cancel(&batches, first.items, &token).await;
        return;
    }
    let Some(total_pages) = first.total_pages else {
        tracing::debug!("Listing has an unknown number of pages");
        follow(&fetcher, first, page_size, &token, &sentinel, &batches, &total).await;
        return;
    };
    tracing::debug!("Listing has {total_pages} pages");
    if !send_or_cancel(&batches, first.items, &token).await {
        return;
    }

    // Queue the remaining pages, the queue is closed once drained as there are no senders left
    let (queue_tx, queue) = flume::unbounded();
    for page in 2..=total_pages {
        // The receiver is alive, so this can't fail
        let _ = queue_tx.send(page);
    }
    drop(queue_tx);

    let fetcher = Arc::new(fetcher);
    let mut set = JoinSet::new();
    for _ in 0..workers.max(1).min(total_pages as usize - 1) {
        let ctx = Worker {
            fetcher: Arc::clone(&fetcher),
            page_size,
            total_pages,
            token: token.clone(),
            sentinel: sentinel.clone(),
            batches: batches.clone(),
            total: total.clone(),
        };
        set.spawn(ctx.run(queue.clone()));
    }
    drop((batches, total));

    // Wait for every worker, the channels are closed once the last one exits
    while let Some(res) = set.join_next().await {
        if let Err(err) = res {
            tracing::error!("Page worker failed: {err}");
            token.cancel();
            sentinel.fail(eyre!("{} worker failed: {err}", F::QUERY).into());
        }
    }
}

/// Follows the pages of a listing with an unknown number of pages, one after the other until the last one
async fn follow<F: PageFetcher>(
    fetcher: &F,
    first: Page<F::Item>,
    page_size: u32,
    token: &CancellationToken,
    sentinel: &Sentinel,
    batches: &flume::Sender<Vec<F::Item>>,
    total: &flume::Sender<u64>,
) {
    let mut count = first.items.len() as u64;
    if !send_or_cancel(batches, first.items, token).await {
        return;
    }
    for page in 2.. {
        let Some(next) = fetch(fetcher, page, page_size, token, sentinel).await else {
            return;
        };
        count += next.items.len() as u64;
        let last = next.is_last(page);
        if last {
            send_total(total, count);
        }
        if !send_or_cancel(batches, next.items, token).await || last {
            return;
        }
    }
}

/// A worker fetching pages from the queue until it's drained or cancelled
struct Worker<F: PageFetcher> {
    fetcher: Arc<F>,
    page_size: u32,
    total_pages: u32,
    token: CancellationToken,
    sentinel: Sentinel,
    batches: flume::Sender<Vec<F::Item>>,
    total: flume::Sender<u64>,
}

impl<F: PageFetcher> Worker<F> {
    async fn run(self, queue: flume::Receiver<u32>) {
        // Never start a new fetch once cancelled
        while !self.token.is_cancelled()
            && let Ok(page) = queue.try_recv()
        {
            let Some(Page { items, .. }) = fetch(&*self.fetcher, page, self.page_size, &self.token, &self.sentinel).await
            else {
                return;
            };
            if page == self.total_pages {
                send_total(&self.total, total_items(items.len(), self.total_pages, self.page_size));
            }
            if !send_or_cancel(&self.batches, items, &self.token).await {
                return;
            }
        }
    }
}

/// Fetches a single page, returning [None] when cancelled or failed.
///
/// On failure, the collector scope is cancelled and the error is reported to the sentinel.
async fn fetch<F: PageFetcher>(
    fetcher: &F,
    page: u32,
    page_size: u32,
    token: &CancellationToken,
    sentinel: &Sentinel,
) -> Option<Page<F::Item>> {
    let res: Result<_> = tokio::select! {
        biased;
        _ = token.cancelled() => return None,
        res = fetcher.fetch_page(page, page_size) => res,
    };
    match res {
        Ok(page_items) => {
            tracing::trace!("Fetched page {page} with {} items", page_items.items.len());
            Some(page_items)
        }
        Err(err) => {
            tracing::debug!("Page {page} failed: {err}");
            token.cancel();
            sentinel.fail(err.in_query(F::QUERY));
            None
        }
    }
}

/// Sends the total number of items, which happens exactly once per listing
fn send_total(total: &flume::Sender<u64>, count: u64) {
    tracing::debug!("Listing has {count} items");
    if total.try_send(count).is_err() {
        tracing::trace!("Total items not sent, no one is listening");
    }
}
