//! Partitions the history of a project into releases

use std::{cmp::Reverse, iter};

use chrono::{DateTime, Utc};

use crate::{
    harvest::History,
    model::{RELEASE_DATE_FORMAT, Release},
};

/// Builds the releases of a project, newest first.
///
/// Each tag owns the issues and merge requests dated within `(previous tag date, tag date]`, the oldest tag owning
/// everything since the epoch. Anything newer than the latest tag is left out of every release.
pub fn build_releases(history: History) -> Vec<Release> {
    let History {
        mut tags,
        mut issues,
        mut merge_requests,
    } = history;

    // Sort everything descending by date, ties are broken by name or id so the result doesn't depend on the order
    // the entities were retrieved
    tags.sort_by(|a, b| (b.date, &b.name).cmp(&(a.date, &a.name)));
    issues.sort_by_key(|i| Reverse((i.closed_date, i.id)));
    merge_requests.sort_by_key(|m| Reverse((m.merged_date, m.id)));

    let lower_bounds = tags
        .iter()
        .skip(1)
        .map(|t| t.date)
        .chain(iter::once(DateTime::<Utc>::UNIX_EPOCH))
        .collect::<Vec<_>>();

    let mut issues = issues.into_iter().peekable();
    let mut merge_requests = merge_requests.into_iter().peekable();
    let mut releases = Vec::with_capacity(tags.len());
    for (tag, lower) in tags.into_iter().zip(lower_bounds) {
        let upper = tag.date;
        let tag_issues = take_window(&mut issues, |i| i.closed_date, lower, upper);
        let tag_merge_requests = take_window(&mut merge_requests, |m| m.merged_date, lower, upper);
        releases.push(Release {
            formatted_date: tag.date.format(RELEASE_DATE_FORMAT).to_string(),
            name: tag.name,
            url: tag.url,
            issues: tag_issues,
            merge_requests: tag_merge_requests,
        });
    }

    let (dropped_issues, dropped_merge_requests) = (issues.count(), merge_requests.count());
    if dropped_issues > 0 || dropped_merge_requests > 0 {
        tracing::debug!(
            "{dropped_issues} issues and {dropped_merge_requests} merge requests are older than any release"
        );
    }

    releases
}

/// Takes the items dated within `(lower, upper]` from an iterator sorted descending by date, skipping newer ones
fn take_window<T, I>(
    items: &mut iter::Peekable<I>,
    date: impl Fn(&T) -> DateTime<Utc>,
    lower: DateTime<Utc>,
    upper: DateTime<Utc>,
) -> Vec<T>
where
    I: Iterator<Item = T>,
{
    while let Some(skipped) = items.next_if(|i| date(i) > upper) {
        tracing::trace!("Skipping item dated {} after the release", date(&skipped));
    }
    iter::from_fn(|| items.next_if(|i| date(i) > lower)).collect()
}
