use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::History;
use crate::{
    errors::{AppError, Result, UserFacingError},
    model::{Issue, MergeRequest, Tag},
};

/// Drains the records of every pipeline into a [History].
///
/// Returns as soon as an error is received or the token is cancelled, discarding anything collected so far.
/// Succeeds only once every record channel is closed without errors.
pub async fn aggregate(
    token: &CancellationToken,
    mut errors: mpsc::Receiver<AppError>,
    tags: flume::Receiver<Tag>,
    issues: flume::Receiver<Issue>,
    merge_requests: flume::Receiver<MergeRequest>,
) -> Result<History> {
    let mut history = History::default();
    let (mut tags_done, mut issues_done, mut merge_requests_done) = (false, false, false);

    while !(tags_done && issues_done && merge_requests_done) {
        tokio::select! {
            biased;
            Some(err) = errors.recv() => return Err(err),
            _ = token.cancelled() => {
                // The error, if any, is recorded before cancelling
                return Err(errors.try_recv().unwrap_or_else(|_| UserFacingError::Cancelled.into()));
            }
            tag = tags.recv_async(), if !tags_done => match tag {
                Ok(tag) => history.tags.push(tag),
                Err(_) => tags_done = true,
            },
            issue = issues.recv_async(), if !issues_done => match issue {
                Ok(issue) => history.issues.push(issue),
                Err(_) => issues_done = true,
            },
            merge_request = merge_requests.recv_async(), if !merge_requests_done => match merge_request {
                Ok(merge_request) => history.merge_requests.push(merge_request),
                Err(_) => merge_requests_done = true,
            },
        }
    }

    Ok(history)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::source::memory::at;

    fn tag(name: &str) -> Tag {
        Tag::unreleased(name, format!("https://example.com/{name}"), at(0))
    }

    fn issue(id: u64) -> Issue {
        Issue {
            id,
            name: format!("Issue {id}"),
            closed_date: at(id as i64),
            url: format!("https://example.com/issues/{id}"),
            labels: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn test_aggregates_until_every_channel_closes() {
        let token = CancellationToken::new();
        let (_errors_tx, errors) = mpsc::channel(1);
        let (tags_tx, tags) = flume::bounded(1);
        let (issues_tx, issues) = flume::bounded(1);
        let (merge_requests_tx, merge_requests) = flume::bounded::<MergeRequest>(1);

        tokio::spawn(async move {
            tags_tx.send_async(tag("v1")).await.unwrap();
            drop(tags_tx);
            drop(merge_requests_tx);
            for id in 1..=3 {
                issues_tx.send_async(issue(id)).await.unwrap();
            }
        });

        let history = aggregate(&token, errors, tags, issues, merge_requests).await.unwrap();

        assert_eq!(history.tags, vec![tag("v1")]);
        assert_eq!(history.issues, vec![issue(1), issue(2), issue(3)]);
        assert!(history.merge_requests.is_empty());
    }

    #[tokio::test]
    async fn test_returns_error_discarding_partial_results() {
        let token = CancellationToken::new();
        let (errors_tx, errors) = mpsc::channel(1);
        let (tags_tx, tags) = flume::unbounded();
        let (_issues_tx, issues) = flume::bounded::<Issue>(1);
        let (_merge_requests_tx, merge_requests) = flume::bounded::<MergeRequest>(1);

        tags_tx.send(tag("v1")).unwrap();
        errors_tx.try_send(UserFacingError::ApiUnauthorized.into()).unwrap();

        let err = aggregate(&token, errors, tags, issues, merge_requests).await.unwrap_err();

        assert_eq!(err.user_facing(), Some(&UserFacingError::ApiUnauthorized));
    }

    #[tokio::test]
    async fn test_cancelled_without_error() {
        let token = CancellationToken::new();
        let (_errors_tx, errors) = mpsc::channel(1);
        let (_tags_tx, tags) = flume::bounded::<Tag>(1);
        let (_issues_tx, issues) = flume::bounded::<Issue>(1);
        let (_merge_requests_tx, merge_requests) = flume::bounded::<MergeRequest>(1);
        token.cancel();

        let err = aggregate(&token, errors, tags, issues, merge_requests).await.unwrap_err();

        assert_eq!(err.user_facing(), Some(&UserFacingError::Cancelled));
    }
}
