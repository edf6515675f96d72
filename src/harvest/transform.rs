use std::{collections::BTreeSet, sync::Arc};

use color_eyre::eyre::eyre;
use regex::Regex;
use tokio::task::JoinSet;
use tracing::instrument;

use super::{send_or_cancel, sentinel::Sentinel};
use crate::{
    errors::Result,
    model::{Issue, MergeRequest, Tag},
    source::{RemoteChange, RemoteIssue, RemoteTag, Source},
};

/// Maps raw items listed by a source into the model, discarding the ones not relevant for the changelog
pub trait Transformer: Clone + Send + Sync + 'static {
    /// The raw item listed by the source
    type Input: Send + 'static;
    /// The model record
    type Output: Send + 'static;

    /// Name of the query performed while transforming, if any, used to annotate its errors
    const QUERY: &'static str;

    /// Transforms a single raw item, returning [None] if it must be discarded
    fn transform(&self, raw: Self::Input) -> impl Future<Output = Result<Option<Self::Output>>> + Send;
}

/// Transforms every raw batch received using a pool of workers, sending the records to the output channel.
///
/// A progress tick is sent for every raw item examined, even for the discarded ones. The output channel is closed
/// once every worker has exited.
#[instrument(skip_all, fields(query = T::QUERY))]
pub async fn transform<T>(
    transformer: T,
    workers: usize,
    sentinel: Sentinel,
    batches: flume::Receiver<Vec<T::Input>>,
    ticks: flume::Sender<()>,
    output: flume::Sender<T::Output>,
) where
    T: Transformer,
{
    let mut set = JoinSet::new();
    for _ in 0..workers.max(1) {
        let transformer = transformer.clone();
        let sentinel = sentinel.clone();
        let batches = batches.clone();
        let ticks = ticks.clone();
        let output = output.clone();
        set.spawn(async move {
            let token = sentinel.token();
            loop {
                let batch = tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    batch = batches.recv_async() => match batch {
                        Ok(batch) => batch,
                        // The collector is done
                        Err(_) => return,
                    },
                };
                for raw in batch {
                    if token.is_cancelled() {
                        return;
                    }
                    // Progress is only displayed, so a closed channel is ignored
                    send_or_cancel(&ticks, (), token).await;
                    let res = tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        res = transformer.transform(raw) => res,
                    };
                    match res {
                        Ok(Some(record)) => {
                            if !send_or_cancel(&output, record, token).await {
                                return;
                            }
                        }
                        Ok(None) => (),
                        Err(err) => {
                            sentinel.fail(err.in_query(T::QUERY));
                            return;
                        }
                    }
                }
            }
        });
    }
    drop((batches, ticks, output));

    while let Some(res) = set.join_next().await {
        if let Err(err) = res {
            tracing::error!("Transform worker failed: {err}");
            sentinel.fail(eyre!("{} worker failed: {err}", T::QUERY).into());
        }
    }
}

/// Filters tags by name and resolves their url
pub struct TagTransformer<S> {
    source: Arc<S>,
    filter: Option<Regex>,
}

impl<S> TagTransformer<S> {
    pub fn new(source: Arc<S>, filter: Option<Regex>) -> Self {
        Self { source, filter }
    }
}

impl<S> Clone for TagTransformer<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            filter: self.filter.clone(),
        }
    }
}

impl<S: Source + Send + 'static> Transformer for TagTransformer<S> {
    type Input = RemoteTag;
    type Output = Tag;

    const QUERY: &'static str = "ResolveTagURL";

    async fn transform(&self, raw: RemoteTag) -> Result<Option<Tag>> {
        if let Some(filter) = &self.filter
            && !filter.is_match(&raw.name)
        {
            tracing::trace!("Skipping tag {} not matching the filter", raw.name);
            return Ok(None);
        }
        let url = self.source.resolve_tag_url(&raw.name).await?;
        Ok(Some(Tag {
            name: raw.name,
            commit: Some(raw.commit),
            date: raw.date,
            url,
        }))
    }
}

/// Discards pull requests, issues without a closing date and excluded ones
#[derive(Clone)]
pub struct IssueTransformer {
    exclude_labels: Arc<BTreeSet<String>>,
}

impl IssueTransformer {
    pub fn new(exclude_labels: Arc<BTreeSet<String>>) -> Self {
        Self { exclude_labels }
    }
}

impl Transformer for IssueTransformer {
    type Input = RemoteIssue;
    type Output = Issue;

    const QUERY: &'static str = "ListClosedIssuesPage";

    async fn transform(&self, raw: RemoteIssue) -> Result<Option<Issue>> {
        if raw.is_pull_request {
            return Ok(None);
        }
        let Some(closed_date) = raw.closed_at else {
            tracing::warn!("Skipping issue #{} without a closing date", raw.number);
            return Ok(None);
        };
        if is_excluded(&raw.labels, &self.exclude_labels) {
            tracing::trace!("Skipping excluded issue #{}", raw.number);
            return Ok(None);
        }
        Ok(Some(Issue {
            id: raw.number,
            name: raw.title,
            closed_date,
            url: raw.url,
            labels: raw.labels.into_iter().collect(),
        }))
    }
}

/// Discards unmerged and excluded change requests
#[derive(Clone)]
pub struct MergeRequestTransformer {
    exclude_labels: Arc<BTreeSet<String>>,
}

impl MergeRequestTransformer {
    pub fn new(exclude_labels: Arc<BTreeSet<String>>) -> Self {
        Self { exclude_labels }
    }
}

impl Transformer for MergeRequestTransformer {
    type Input = RemoteChange;
    type Output = MergeRequest;

    const QUERY: &'static str = "ListMergedChangesPage";

    async fn transform(&self, raw: RemoteChange) -> Result<Option<MergeRequest>> {
        let Some(merged_date) = raw.merged_at else {
            tracing::debug!("Skipping unmerged change #{}", raw.number);
            return Ok(None);
        };
        if is_excluded(&raw.labels, &self.exclude_labels) {
            tracing::trace!("Skipping excluded change #{}", raw.number);
            return Ok(None);
        }
        Ok(Some(MergeRequest {
            id: raw.number,
            name: raw.title,
            url: raw.url,
            author: raw.author,
            author_url: raw.author_url,
            merged_date,
            labels: raw.labels.into_iter().collect(),
        }))
    }
}

fn is_excluded(labels: &[String], exclude_labels: &BTreeSet<String>) -> bool {
    labels.iter().any(|l| exclude_labels.contains(l))
}
