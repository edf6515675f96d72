//! Concurrent retrieval of the history of a project.
//!
//! Every entity type (tags, issues and merge requests) runs its own pipeline: a [collector] fetching pages with a
//! pool of workers, followed by a pool of [transformers](transform) mapping the raw items into the model. The three
//! pipelines are joined by the [aggregator](aggregate) while a [sentinel] turns the first failure (or the deadline
//! expiry) into a single cancellation of the whole harvest.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use chrono::Utc;
use regex::Regex;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::instrument;

use crate::{
    errors::{Result, UserFacingError},
    model::{Issue, MergeRequest, Tag},
    source::Source,
};

mod aggregate;
mod collector;
mod page;
mod progress;
mod sentinel;
mod transform;

use self::{
    page::{ChangePages, IssuePages, TagPages},
    progress::EntityProgress,
    sentinel::Sentinel,
    transform::{IssueTransformer, MergeRequestTransformer, TagTransformer, Transformer},
};

/// Number of items requested per page, for each entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSizes {
    pub tags: u32,
    pub issues: u32,
    pub merge_requests: u32,
}

/// Options driving a harvest
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub page_sizes: PageSizes,
    /// Number of concurrent workers for each stage of each pipeline
    pub workers: usize,
    /// Maximum time the whole harvest can take
    pub deadline: Duration,
    /// Issues and merge requests with any of these labels are discarded
    pub exclude_labels: BTreeSet<String>,
    /// If set, tags not matching are discarded
    pub tag_filter: Option<Regex>,
    /// Name of the synthetic release collecting the activity after the latest tag
    pub new_release: Option<String>,
    /// Whether to display the progress on the terminal
    pub show_progress: bool,
}

/// Every entity retrieved from a project, in no particular order
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct History {
    pub tags: Vec<Tag>,
    pub issues: Vec<Issue>,
    pub merge_requests: Vec<MergeRequest>,
}

/// Retrieves the tags, closed issues and merged changes of the project.
///
/// Returns either the full history or the first error found, no partial results are ever returned. Every spawned
/// task has finished by the time this function returns.
#[instrument(skip_all, fields(project = source.project()))]
pub async fn harvest<S>(source: Arc<S>, options: &HarvestOptions, token: CancellationToken) -> Result<History>
where
    S: Source + Send + 'static,
{
    let tracker = TaskTracker::new();
    let (sentinel, errors) = Sentinel::new(&token);
    let workers = options.workers.max(1);
    let deadline = tokio::time::Instant::now() + options.deadline;

    // The deadline is owned by the sentinel, so it's cancelled along with everything else
    tracker.spawn(sentinel.clone().watch_deadline(options.deadline));

    let exclude_labels = Arc::new(options.exclude_labels.clone());
    let (tags, tags_progress) = spawn_pipeline(
        &tracker,
        &sentinel,
        "Tags",
        TagPages::new(Arc::clone(&source)),
        options.page_sizes.tags,
        TagTransformer::new(Arc::clone(&source), options.tag_filter.clone()),
        workers,
    );
    let (issues, issues_progress) = spawn_pipeline(
        &tracker,
        &sentinel,
        "Issues",
        IssuePages::new(Arc::clone(&source)),
        options.page_sizes.issues,
        IssueTransformer::new(Arc::clone(&exclude_labels)),
        workers,
    );
    let (merge_requests, merge_requests_progress) = spawn_pipeline(
        &tracker,
        &sentinel,
        "Merge requests",
        ChangePages::new(Arc::clone(&source)),
        options.page_sizes.merge_requests,
        MergeRequestTransformer::new(exclude_labels),
        workers,
    );

    let reporter = tracker.spawn(progress::report(
        sentinel.token().clone(),
        options.show_progress,
        [tags_progress, issues_progress, merge_requests_progress],
    ));

    let res = aggregate::aggregate(sentinel.token(), errors, tags, issues, merge_requests).await;
    if res.is_ok() {
        // Every pipeline is done, let the progress bars complete before cancelling
        if let Err(err) = reporter.await {
            tracing::error!("Progress reporter failed: {err}");
        }
    }

    // Stop any remaining task (like the deadline watchdog) and wait for all of them
    sentinel.token().cancel();
    tracker.close();
    tracker.wait().await;

    let res = match (res, &options.new_release) {
        (Ok(history), Some(name)) => {
            match tokio::time::timeout_at(deadline, with_new_release(&*source, history, name, &token)).await {
                Ok(res) => res,
                Err(_) => {
                    tracing::warn!("Deadline of {:?} exceeded", options.deadline);
                    Err(UserFacingError::DeadlineExceeded(options.deadline).into())
                }
            }
        }
        (res, _) => res,
    };
    match &res {
        Ok(history) => tracing::info!(
            "Retrieved {} tags, {} issues and {} merge requests",
            history.tags.len(),
            history.issues.len(),
            history.merge_requests.len()
        ),
        Err(err) => tracing::warn!("Couldn't retrieve the project history: {err}"),
    }
    res
}

/// Appends a synthetic tag dated now, collecting the activity after the latest tag
async fn with_new_release<S: Source>(
    source: &S,
    mut history: History,
    name: &str,
    token: &CancellationToken,
) -> Result<History> {
    let url = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(UserFacingError::Cancelled.into()),
        res = source.resolve_tag_url(name) => res.map_err(|err| err.in_query("ResolveTagURL"))?,
    };
    tracing::debug!("Adding new release {name}");
    history.tags.push(Tag::unreleased(name, url, Utc::now()));
    Ok(history)
}

/// Spawns the collector and transformers of a single entity type, returning the receiving end of the records
fn spawn_pipeline<F, T>(
    tracker: &TaskTracker,
    sentinel: &Sentinel,
    label: &'static str,
    fetcher: F,
    page_size: u32,
    transformer: T,
    workers: usize,
) -> (flume::Receiver<T::Output>, EntityProgress)
where
    F: page::PageFetcher,
    T: Transformer<Input = F::Item>,
{
    let (batches_tx, batches_rx) = flume::bounded(1);
    let (total_tx, total_rx) = flume::bounded(1);
    let (ticks_tx, ticks_rx) = flume::bounded(1);
    let (output_tx, output_rx) = flume::bounded(1);

    tracker.spawn(collector::collect(
        fetcher,
        page_size,
        workers,
        sentinel.clone(),
        batches_tx,
        total_tx,
    ));
    tracker.spawn(transform::transform(
        transformer,
        workers,
        sentinel.clone(),
        batches_rx,
        ticks_tx,
        output_tx,
    ));

    (output_rx, EntityProgress::new(label, ticks_rx, total_rx))
}

/// Sends the value unless the token is cancelled first, returning whether the value was sent
async fn send_or_cancel<T>(tx: &flume::Sender<T>, value: T, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        res = tx.send_async(value) => res.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::source::memory::{Listing, MemorySource, change, issue, tag};

    fn options(page_size: u32) -> HarvestOptions {
        HarvestOptions {
            page_sizes: PageSizes {
                tags: page_size,
                issues: page_size,
                merge_requests: page_size,
            },
            workers: 4,
            deadline: Duration::from_secs(10),
            exclude_labels: BTreeSet::new(),
            tag_filter: None,
            new_release: None,
            show_progress: false,
        }
    }

    #[tokio::test]
    async fn test_harvest_full_history() {
        let source = Arc::new(MemorySource {
            tags: vec![tag("v1", 100), tag("v2", 300)],
            issues: (1..=25).map(|n| issue(n, n as i64 * 10)).collect(),
            changes: (1..=7).map(|n| change(n, n as i64 * 40)).collect(),
            ..Default::default()
        });

        let history = harvest(Arc::clone(&source), &options(3), CancellationToken::new())
            .await
            .unwrap();

        let mut issue_ids = history.issues.iter().map(|i| i.id).collect::<Vec<_>>();
        issue_ids.sort();
        assert_eq!(issue_ids, (1..=25).collect::<Vec<_>>());
        assert_eq!(history.merge_requests.len(), 7);
        assert_eq!(history.tags.len(), 2);
        assert_eq!(source.calls(Listing::Issues).len(), 9);
        assert_eq!(source.calls(Listing::Changes).len(), 3);
        assert_eq!(source.calls(Listing::Tags).len(), 1);
    }

    #[tokio::test]
    async fn test_harvest_fails_with_annotated_error() {
        let source = Arc::new(
            MemorySource {
                tags: vec![tag("v1", 100)],
                issues: (1..=50).map(|n| issue(n, n as i64)).collect(),
                ..Default::default()
            }
            .failing(Listing::Issues, 3),
        );

        let err = harvest(source, &options(5), CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err.user_facing(),
            Some(&UserFacingError::QueryFailed {
                query: "ListClosedIssuesPage",
                reason: Box::new(UserFacingError::ApiRequestFailed(String::from("page 3 is broken")))
            })
        );
    }

    #[tokio::test]
    async fn test_harvest_pre_cancelled() {
        let source = Arc::new(MemorySource {
            issues: (1..=50).map(|n| issue(n, n as i64)).collect(),
            ..Default::default()
        });
        let token = CancellationToken::new();
        token.cancel();

        let start = Instant::now();
        let err = harvest(Arc::clone(&source), &options(5), token).await.unwrap_err();

        assert_eq!(err.user_facing(), Some(&UserFacingError::Cancelled));
        assert_eq!(source.total_calls(), 0);
        assert!(start.elapsed() < Duration::from_secs(1));
        // Only the test holds the source, so every task has been dropped
        assert_eq!(Arc::strong_count(&source), 1);
    }

    #[tokio::test]
    async fn test_harvest_deadline_exceeded() {
        let source = Arc::new(
            MemorySource {
                issues: (1..=10).map(|n| issue(n, n as i64)).collect(),
                ..Default::default()
            }
            .page_delayed(Listing::Issues, 2, Duration::from_secs(30)),
        );
        let mut options = options(5);
        options.deadline = Duration::from_millis(100);

        let start = Instant::now();
        let err = harvest(Arc::clone(&source), &options, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err.user_facing(),
            Some(&UserFacingError::DeadlineExceeded(Duration::from_millis(100)))
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(Arc::strong_count(&source), 1);
    }

    #[tokio::test]
    async fn test_harvest_deadline_while_resolving_tag_urls() {
        let source = Arc::new(MemorySource {
            tags: vec![tag("v1.0.0", 100), tag("v1.1.0", 200)],
            url_delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let mut options = options(5);
        options.deadline = Duration::from_millis(100);

        let start = Instant::now();
        let err = harvest(Arc::clone(&source), &options, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err.user_facing(),
            Some(&UserFacingError::DeadlineExceeded(Duration::from_millis(100)))
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(Arc::strong_count(&source), 1);
    }

    #[tokio::test]
    async fn test_harvest_deadline_while_resolving_new_release() {
        let source = Arc::new(MemorySource {
            url_delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let mut options = options(5);
        options.deadline = Duration::from_millis(100);
        options.new_release = Some(String::from("v1.0.0"));

        let start = Instant::now();
        let err = harvest(Arc::clone(&source), &options, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err.user_facing(),
            Some(&UserFacingError::DeadlineExceeded(Duration::from_millis(100)))
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(source.url_calls(), 1);
    }

    #[tokio::test]
    async fn test_harvest_listing_without_total() {
        let source = Arc::new(MemorySource {
            issues: (1..=50).map(|n| issue(n, n as i64)).collect(),
            open_ended: true,
            ..Default::default()
        });

        let history = harvest(Arc::clone(&source), &options(10), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(history.issues.len(), 50);
        assert_eq!(source.calls(Listing::Issues), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_harvest_new_release() {
        let source = Arc::new(MemorySource {
            tags: vec![tag("v1.0.0", 100)],
            ..Default::default()
        });
        let mut options = options(10);
        options.new_release = Some(String::from("v1.1.0"));

        let history = harvest(Arc::clone(&source), &options, CancellationToken::new())
            .await
            .unwrap();

        let new_release = history.tags.iter().find(|t| t.name == "v1.1.0").unwrap();
        assert_eq!(new_release.commit, None);
        assert_eq!(new_release.url, "https://example.com/owner/project/tree/v1.1.0");
        assert!(new_release.date > history.tags[0].date);
        assert_eq!(source.url_calls(), 2);
    }

    #[tokio::test]
    async fn test_harvest_filters_entities() {
        let mut pull = issue(3, 30);
        pull.is_pull_request = true;
        let mut labeled = issue(4, 40);
        labeled.labels = vec![String::from("duplicate")];
        let mut unmerged = change(2, 0);
        unmerged.merged_at = None;
        let source = Arc::new(MemorySource {
            tags: vec![tag("v1.0.0", 100), tag("nightly", 150)],
            issues: vec![issue(1, 10), issue(2, 20), pull, labeled],
            changes: vec![change(1, 10), unmerged],
            ..Default::default()
        });
        let mut options = options(2);
        options.exclude_labels = BTreeSet::from([String::from("duplicate")]);
        options.tag_filter = Some(Regex::new(r"^v\d").unwrap());

        let history = harvest(source, &options, CancellationToken::new()).await.unwrap();

        let mut issue_ids = history.issues.iter().map(|i| i.id).collect::<Vec<_>>();
        issue_ids.sort();
        assert_eq!(issue_ids, vec![1, 2]);
        assert_eq!(history.merge_requests.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1]);
        assert_eq!(history.tags.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(), vec!["v1.0.0"]);
    }
}
