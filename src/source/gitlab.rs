use chrono::{DateTime, Utc};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue},
};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::instrument;

use super::{Page, RemoteChange, RemoteIssue, RemoteTag, Source, encode_path_segment, http, split_repository};
use crate::{
    config::GitlabConfig,
    errors::{Result, UserFacingError},
};

const PROVIDER: &str = "GitLab";

/// A [Source] backed by the GitLab REST API (v4)
#[derive(Clone)]
pub struct GitlabSource {
    client: Client,
    api_url: String,
    web_url: String,
    /// Project path, like `group/subgroup/name`
    path: String,
    /// Url-encoded project path, used as the project id
    id: String,
}

impl GitlabSource {
    /// Creates a new source for the given project path, authenticating requests with the token if any
    pub fn new(config: &GitlabConfig, repository: &str, token: Option<String>) -> Result<Self> {
        let Some(segments) = split_repository(repository) else {
            return Err(UserFacingError::InvalidRepository(repository.to_owned()).into());
        };
        let path = segments.join("/");

        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&token)
                .map_err(|_| UserFacingError::ApiRequestFailed(String::from("the GitLab token is not valid")))?;
            value.set_sensitive(true);
            headers.append("PRIVATE-TOKEN", value);
        } else {
            tracing::warn!("No GitLab token provided, requests will be anonymous");
        }

        Ok(Self {
            client: http::build_client(headers)?,
            api_url: config.url.trim_end_matches('/').to_owned(),
            web_url: config.web_url.trim_end_matches('/').to_owned(),
            id: encode_path_segment(&path),
            path,
        })
    }

    fn project_url(&self, path: &str) -> String {
        format!("{}/projects/{}{path}", self.api_url, self.id)
    }

    /// Fetches a page of a listing, returning the parsed items along with the total number of pages
    async fn list_page<T>(&self, path: &str, query: &[(&str, &str)], page: u32, page_size: u32) -> Result<Page<T>>
    where
        T: DeserializeOwned,
    {
        let req = self
            .client
            .get(self.project_url(path))
            .query(query)
            .query(&[("per_page", page_size), ("page", page)]);
        let res = http::send(PROVIDER, req).await?;
        let headers = PaginationHeaders::from_headers(res.headers());
        let items: Vec<T> = http::parse_items(PROVIDER, res).await?;
        tracing::debug!("Fetched page {page} of {path} with {} items ({headers:?})", items.len());
        Ok(headers.into_page(items, page_size))
    }
}

impl Source for GitlabSource {
    fn project(&self) -> &str {
        &self.path
    }

    #[instrument(skip(self))]
    async fn list_tags_page(&self, page: u32, page_size: u32) -> Result<Page<RemoteTag>> {
        let page = self
            .list_page::<GitlabTag>("/repository/tags", &[], page, page_size)
            .await?;
        Ok(page.map(RemoteTag::from))
    }

    #[instrument(skip(self))]
    async fn list_closed_issues_page(&self, page: u32, page_size: u32) -> Result<Page<RemoteIssue>> {
        let query = [("state", "closed"), ("order_by", "created_at"), ("sort", "asc")];
        let page = self.list_page::<GitlabIssue>("/issues", &query, page, page_size).await?;
        Ok(page.map(RemoteIssue::from))
    }

    #[instrument(skip(self))]
    async fn list_merged_changes_page(&self, page: u32, page_size: u32) -> Result<Page<RemoteChange>> {
        let query = [("state", "merged"), ("order_by", "created_at"), ("sort", "asc")];
        let page = self
            .list_page::<GitlabMergeRequest>("/merge_requests", &query, page, page_size)
            .await?;
        Ok(page.map(RemoteChange::from))
    }

    #[instrument(skip(self))]
    async fn project_exists(&self) -> Result<bool> {
        let req = self.client.get(self.project_url(""));
        Ok(http::send_optional(PROVIDER, req).await?.is_some())
    }

    #[instrument(skip(self))]
    async fn resolve_tag_url(&self, tag_name: &str) -> Result<String> {
        let encoded = encode_path_segment(tag_name);
        let req = self.client.get(self.project_url(&format!("/releases/{encoded}")));
        match http::send_optional(PROVIDER, req).await? {
            Some(res) => {
                let release: GitlabRelease = http::parse_json(PROVIDER, res).await?;
                Ok(release.links.self_url)
            }
            None => Ok(format!("{}/{}/-/tags/{encoded}", self.web_url, self.path)),
        }
    }
}

/// Pagination details returned by GitLab on the response headers
#[derive(Debug, Default, PartialEq, Eq)]
struct PaginationHeaders {
    total_pages: Option<u32>,
    total: Option<u64>,
    next_page: Option<u32>,
}

impl PaginationHeaders {
    fn from_headers(headers: &HeaderMap) -> Self {
        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };
        Self {
            total_pages: parse("x-total-pages").and_then(|v| v.parse().ok()),
            total: parse("x-total").and_then(|v| v.parse().ok()),
            next_page: parse("x-next-page").and_then(|v| v.parse().ok()),
        }
    }

    /// Builds the page with the given items.
    ///
    /// GitLab omits the totals for listings with more than 10,000 items, in that case we can only know whether there
    /// are more pages after the current one.
    fn into_page<T>(self, items: Vec<T>, page_size: u32) -> Page<T> {
        match (self.total_pages, self.total) {
            (Some(total_pages), _) => Page::new(items, total_pages),
            (None, Some(total)) => Page::new(
                items,
                u32::try_from(total.div_ceil(u64::from(page_size.max(1)))).unwrap_or(u32::MAX),
            ),
            (None, None) => {
                tracing::debug!("GitLab didn't report the total number of pages");
                Page::open(items, self.next_page.is_some())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitlabTag {
    name: String,
    commit: GitlabCommit,
}

#[derive(Debug, Deserialize)]
struct GitlabCommit {
    id: String,
    committed_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GitlabUser {
    username: String,
    web_url: String,
}

#[derive(Debug, Deserialize)]
struct GitlabIssue {
    iid: u64,
    title: String,
    web_url: String,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GitlabMergeRequest {
    iid: u64,
    title: String,
    web_url: String,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
    author: GitlabUser,
    #[serde(default)]
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GitlabRelease {
    #[serde(rename = "_links")]
    links: GitlabReleaseLinks,
}

#[derive(Debug, Deserialize)]
struct GitlabReleaseLinks {
    #[serde(rename = "self")]
    self_url: String,
}

impl From<GitlabTag> for RemoteTag {
    fn from(tag: GitlabTag) -> Self {
        RemoteTag {
            name: tag.name,
            commit: tag.commit.id,
            date: tag.commit.committed_date,
        }
    }
}

impl From<GitlabIssue> for RemoteIssue {
    fn from(issue: GitlabIssue) -> Self {
        RemoteIssue {
            number: issue.iid,
            title: issue.title,
            url: issue.web_url,
            closed_at: issue.closed_at,
            labels: issue.labels,
            is_pull_request: false,
        }
    }
}

impl From<GitlabMergeRequest> for RemoteChange {
    fn from(mr: GitlabMergeRequest) -> Self {
        RemoteChange {
            number: mr.iid,
            title: mr.title,
            url: mr.web_url,
            author: mr.author.username,
            author_url: mr.author.web_url,
            merged_at: mr.merged_at,
            labels: mr.labels,
        }
    }
}
