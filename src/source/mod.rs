//! Hosting providers the project history is retrieved from.
//!
//! The harvesting pipeline only talks to the [Source] trait, every provider-specific detail (urls, pagination
//! headers, payload shapes) lives in the provider modules.

use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::errors::Result;

mod github;
mod gitlab;
mod http;
#[cfg(test)]
pub(crate) mod memory;

pub use github::GithubSource;
pub use gitlab::GitlabSource;

/// A single page of a paginated listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Total number of pages of the listing, being `1` when everything fits on the first page.
    ///
    /// Unknown when the provider doesn't report it, then only `has_next` tells whether the listing goes on.
    pub total_pages: Option<u32>,
    /// Whether more pages follow this one, only meaningful when the total is unknown
    pub has_next: bool,
}

impl<T> Page<T> {
    /// Creates a new page of a listing with a known number of pages
    pub fn new(items: Vec<T>, total_pages: u32) -> Self {
        Self {
            items,
            total_pages: Some(total_pages.max(1)),
            has_next: false,
        }
    }

    /// Creates a new page of a listing with an unknown number of pages
    pub fn open(items: Vec<T>, has_next: bool) -> Self {
        Self {
            items,
            total_pages: None,
            has_next,
        }
    }

    /// Whether there are no more pages after the given one
    pub fn is_last(&self, page: u32) -> bool {
        match self.total_pages {
            Some(total_pages) => page >= total_pages,
            None => !self.has_next,
        }
    }

    /// Maps the items of the page, keeping its pagination details
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total_pages: self.total_pages,
            has_next: self.has_next,
        }
    }
}

/// A tag as listed by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTag {
    pub name: String,
    pub commit: String,
    /// Date of the tagged commit
    pub date: DateTime<Utc>,
}

/// An issue as listed by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIssue {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub closed_at: Option<DateTime<Utc>>,
    pub labels: Vec<String>,
    /// Some providers list pull requests along with the issues
    pub is_pull_request: bool,
}

/// A change request as listed by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub author: String,
    pub author_url: String,
    /// Missing for closed but unmerged changes, and for some merged ones on providers with inconsistent data
    pub merged_at: Option<DateTime<Utc>>,
    pub labels: Vec<String>,
}

/// A remote project-hosting provider exposing the history of a single project
#[trait_variant::make(Send)]
pub trait Source: Sync {
    /// Human readable identifier of the project on the provider
    fn project(&self) -> &str;

    /// Lists a page of the project tags
    async fn list_tags_page(&self, page: u32, page_size: u32) -> Result<Page<RemoteTag>>;

    /// Lists a page of the closed issues of the project
    async fn list_closed_issues_page(&self, page: u32, page_size: u32) -> Result<Page<RemoteIssue>>;

    /// Lists a page of the merged (or closed, depending on the provider) change requests of the project
    async fn list_merged_changes_page(&self, page: u32, page_size: u32) -> Result<Page<RemoteChange>>;

    /// Checks whether the project exists and it's visible
    async fn project_exists(&self) -> Result<bool>;

    /// Resolves the url of a tag, being the release page if published or the tag page otherwise
    async fn resolve_tag_url(&self, tag_name: &str) -> Result<String>;
}

/// Characters escaped when a value is used as a single url path segment
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Percent-encodes a value to be used as a single url path segment
pub(crate) fn encode_path_segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}

/// Splits a repository path like `owner/name` (or `group/subgroup/name`) into its trimmed segments
pub(crate) fn split_repository(repository: &str) -> Option<Vec<&str>> {
    let repository = repository.trim().trim_matches('/');
    let repository = repository.strip_suffix(".git").unwrap_or(repository);
    let segments = repository.split('/').map(str::trim).collect::<Vec<_>>();
    if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
        None
    } else {
        Some(segments)
    }
}
