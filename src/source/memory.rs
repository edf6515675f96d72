//! In-memory [Source] used to drive the pipeline on tests

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};

use super::{Page, RemoteChange, RemoteIssue, RemoteTag, Source};
use crate::errors::{Result, UserFacingError};

/// The listings exposed by a [Source]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Listing {
    Tags,
    Issues,
    Changes,
}

/// A [Source] serving pre-loaded items, with configurable failures and latency
#[derive(Default)]
pub(crate) struct MemorySource {
    pub tags: Vec<RemoteTag>,
    pub issues: Vec<RemoteIssue>,
    pub changes: Vec<RemoteChange>,
    /// Whether the project exists
    pub missing: bool,
    /// Pages failing when requested
    pub failing_pages: BTreeSet<(Listing, u32)>,
    /// Delay applied to every page request
    pub delay: Option<Duration>,
    /// Delay applied only to the given pages, overriding the general one
    pub page_delays: BTreeMap<(Listing, u32), Duration>,
    /// Whether pages don't report the total number of pages, only if there's a next one
    pub open_ended: bool,
    /// Delay applied to every tag url resolution
    pub url_delay: Option<Duration>,
    /// Urls of the tags with a published release
    pub release_urls: BTreeMap<String, String>,
    /// Pages requested so far, per listing
    pub page_requests: Mutex<BTreeMap<Listing, Vec<u32>>>,
    /// Number of tag urls resolved so far
    pub url_requests: AtomicUsize,
}

impl MemorySource {
    /// Makes the given page of a listing fail
    pub fn failing(mut self, listing: Listing, page: u32) -> Self {
        self.failing_pages.insert((listing, page));
        self
    }

    /// Delays every page request
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delays a single page request
    pub fn page_delayed(mut self, listing: Listing, page: u32, delay: Duration) -> Self {
        self.page_delays.insert((listing, page), delay);
        self
    }

    /// Pages requested for the given listing, in request order
    pub fn calls(&self, listing: Listing) -> Vec<u32> {
        self.page_requests
            .lock()
            .map(|calls| calls.get(&listing).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Total number of page requests, across every listing
    pub fn total_calls(&self) -> usize {
        self.page_requests
            .lock()
            .map(|calls| calls.values().map(Vec::len).sum())
            .unwrap_or_default()
    }

    /// Number of tag urls resolved
    pub fn url_calls(&self) -> usize {
        self.url_requests.load(Ordering::SeqCst)
    }

    async fn serve<T: Clone>(&self, listing: Listing, items: &[T], page: u32, page_size: u32) -> Result<Page<T>> {
        if let Ok(mut calls) = self.page_requests.lock() {
            calls.entry(listing).or_default().push(page);
        }
        if let Some(delay) = self.page_delays.get(&(listing, page)).copied().or(self.delay) {
            tokio::time::sleep(delay).await;
        }
        if self.failing_pages.contains(&(listing, page)) {
            return Err(UserFacingError::ApiRequestFailed(format!("page {page} is broken")).into());
        }
        let page_size = page_size.max(1) as usize;
        let total_pages = items.len().div_ceil(page_size).max(1) as u32;
        let has_next = page < total_pages;
        let items = items
            .iter()
            .skip((page.max(1) as usize - 1) * page_size)
            .take(page_size)
            .cloned()
            .collect();
        if self.open_ended {
            Ok(Page::open(items, has_next))
        } else {
            Ok(Page::new(items, total_pages))
        }
    }
}

impl Source for MemorySource {
    fn project(&self) -> &str {
        "owner/project"
    }

    async fn list_tags_page(&self, page: u32, page_size: u32) -> Result<Page<RemoteTag>> {
        self.serve(Listing::Tags, &self.tags, page, page_size).await
    }

    async fn list_closed_issues_page(&self, page: u32, page_size: u32) -> Result<Page<RemoteIssue>> {
        self.serve(Listing::Issues, &self.issues, page, page_size).await
    }

    async fn list_merged_changes_page(&self, page: u32, page_size: u32) -> Result<Page<RemoteChange>> {
        self.serve(Listing::Changes, &self.changes, page, page_size).await
    }

    async fn project_exists(&self) -> Result<bool> {
        Ok(!self.missing)
    }

    async fn resolve_tag_url(&self, tag_name: &str) -> Result<String> {
        self.url_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.url_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .release_urls
            .get(tag_name)
            .cloned()
            .unwrap_or_else(|| format!("https://example.com/owner/project/tree/{tag_name}")))
    }
}

/// Builds a date from a unix timestamp, in seconds
pub(crate) fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

pub(crate) fn tag(name: &str, secs: i64) -> RemoteTag {
    RemoteTag {
        name: name.to_owned(),
        commit: format!("sha-{name}"),
        date: at(secs),
    }
}

pub(crate) fn issue(number: u64, closed_at: i64) -> RemoteIssue {
    RemoteIssue {
        number,
        title: format!("Issue {number}"),
        url: format!("https://example.com/owner/project/issues/{number}"),
        closed_at: Some(at(closed_at)),
        labels: Vec::new(),
        is_pull_request: false,
    }
}

pub(crate) fn change(number: u64, merged_at: i64) -> RemoteChange {
    RemoteChange {
        number,
        title: format!("Change {number}"),
        url: format!("https://example.com/owner/project/pull/{number}"),
        author: String::from("octocat"),
        author_url: String::from("https://example.com/octocat"),
        merged_at: Some(at(merged_at)),
        labels: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_serves_pages() {
        let source = MemorySource {
            issues: (1..=5).map(|n| issue(n, n as i64)).collect(),
            ..Default::default()
        };

        let first = source.list_closed_issues_page(1, 2).await.unwrap();
        let last = source.list_closed_issues_page(3, 2).await.unwrap();

        assert_eq!(first.total_pages, Some(3));
        assert_eq!(first.items.iter().map(|i| i.number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(last.items.iter().map(|i| i.number).collect::<Vec<_>>(), vec![5]);
        assert_eq!(source.calls(Listing::Issues), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_empty_listing_has_one_page() {
        let source = MemorySource::default();
        let page = source.list_tags_page(1, 100).await.unwrap();
        assert_eq!(page, Page::new(Vec::new(), 1));
    }

    #[tokio::test]
    async fn test_open_ended_pages() {
        let source = MemorySource {
            issues: (1..=5).map(|n| issue(n, n as i64)).collect(),
            open_ended: true,
            ..Default::default()
        };

        let second = source.list_closed_issues_page(2, 2).await.unwrap();
        let last = source.list_closed_issues_page(3, 2).await.unwrap();

        assert_eq!(second.total_pages, None);
        assert!(!second.is_last(2));
        assert!(last.is_last(3));
    }

    #[tokio::test]
    async fn test_failing_page() {
        let source = MemorySource::default().failing(Listing::Changes, 1);
        assert!(source.list_merged_changes_page(1, 10).await.is_err());
        assert_eq!(source.total_calls(), 1);
    }
}
