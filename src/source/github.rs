use chrono::{DateTime, Utc};
use futures_util::{StreamExt, TryStreamExt, stream};
use reqwest::{
    Client, Url,
    header::{self, HeaderMap, HeaderValue},
};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::instrument;

use super::{Page, RemoteChange, RemoteIssue, RemoteTag, Source, encode_path_segment, http, split_repository};
use crate::{
    config::GithubConfig,
    errors::{AppError, Result, UserFacingError},
};

const PROVIDER: &str = "GitHub";
/// Number of concurrent commit lookups when resolving the dates of a page of tags
const TAG_DATE_CONCURRENCY: usize = 5;

/// A [Source] backed by the GitHub REST API
#[derive(Clone)]
pub struct GithubSource {
    client: Client,
    api_url: String,
    web_url: String,
    owner: String,
    repo: String,
    project: String,
}

impl GithubSource {
    /// Creates a new source for the given `owner/name` repository, authenticating requests with the token if any
    pub fn new(config: &GithubConfig, repository: &str, token: Option<String>) -> Result<Self> {
        let Some([owner, repo]) = split_repository(repository).and_then(|s| <[&str; 2]>::try_from(s).ok()) else {
            return Err(UserFacingError::InvalidRepository(repository.to_owned()).into());
        };

        let mut headers = HeaderMap::new();
        headers.append(header::ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.append("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| UserFacingError::ApiRequestFailed(String::from("the GitHub token is not valid")))?;
            value.set_sensitive(true);
            headers.append(header::AUTHORIZATION, value);
        } else {
            tracing::warn!("No GitHub token provided, requests will be anonymous");
        }

        Ok(Self {
            client: http::build_client(headers)?,
            api_url: config.url.trim_end_matches('/').to_owned(),
            web_url: config.web_url.trim_end_matches('/').to_owned(),
            owner: owner.to_owned(),
            repo: repo.to_owned(),
            project: format!("{owner}/{repo}"),
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}{path}", self.api_url, self.owner, self.repo)
    }

    /// Fetches a page of a listing, returning the parsed items along with the total number of pages
    async fn list_page<T>(&self, path: &str, query: &[(&str, &str)], page: u32, page_size: u32) -> Result<Page<T>>
    where
        T: DeserializeOwned,
    {
        let req = self
            .client
            .get(self.repo_url(path))
            .query(query)
            .query(&[("per_page", page_size), ("page", page)]);
        let res = http::send(PROVIDER, req).await?;
        let link = res
            .headers()
            .get(header::LINK)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let items: Vec<T> = http::parse_items(PROVIDER, res).await?;
        let total_pages = total_pages_from_link(link.as_deref(), page);
        tracing::debug!("Fetched page {page}/{total_pages} of {path} with {} items", items.len());
        Ok(Page::new(items, total_pages))
    }

    /// Retrieves the date of the given commit
    async fn commit_date(&self, sha: &str) -> Result<DateTime<Utc>> {
        let req = self.client.get(self.repo_url(&format!("/commits/{sha}")));
        let res = http::send(PROVIDER, req).await?;
        let commit: GithubCommit = http::parse_json(PROVIDER, res).await?;
        Ok(commit.commit.committer.date)
    }
}

impl Source for GithubSource {
    fn project(&self) -> &str {
        &self.project
    }

    #[instrument(skip(self))]
    async fn list_tags_page(&self, page: u32, page_size: u32) -> Result<Page<RemoteTag>> {
        let Page {
            items,
            total_pages,
            has_next,
        } = self.list_page::<GithubTag>("/tags", &[], page, page_size).await?;
        // Tags listing doesn't include any date, so it must be retrieved from the tagged commit
        let items: Vec<RemoteTag> = stream::iter(items)
            .map(|tag| async move {
                let date = self.commit_date(&tag.commit.sha).await?;
                Ok::<_, AppError>(RemoteTag {
                    name: tag.name,
                    commit: tag.commit.sha,
                    date,
                })
            })
            .buffered(TAG_DATE_CONCURRENCY)
            .try_collect()
            .await?;
        Ok(Page {
            items,
            total_pages,
            has_next,
        })
    }

    #[instrument(skip(self))]
    async fn list_closed_issues_page(&self, page: u32, page_size: u32) -> Result<Page<RemoteIssue>> {
        let query = [("state", "closed"), ("sort", "created"), ("direction", "asc")];
        let page = self.list_page::<GithubIssue>("/issues", &query, page, page_size).await?;
        Ok(page.map(RemoteIssue::from))
    }

    #[instrument(skip(self))]
    async fn list_merged_changes_page(&self, page: u32, page_size: u32) -> Result<Page<RemoteChange>> {
        // There's no filter for merged pull requests, unmerged ones are returned with a null merge date
        let query = [("state", "closed"), ("sort", "created"), ("direction", "asc")];
        let page = self.list_page::<GithubPull>("/pulls", &query, page, page_size).await?;
        Ok(page.map(RemoteChange::from))
    }

    #[instrument(skip(self))]
    async fn project_exists(&self) -> Result<bool> {
        let req = self.client.get(self.repo_url(""));
        Ok(http::send_optional(PROVIDER, req).await?.is_some())
    }

    #[instrument(skip(self))]
    async fn resolve_tag_url(&self, tag_name: &str) -> Result<String> {
        let encoded = encode_path_segment(tag_name);
        let req = self.client.get(self.repo_url(&format!("/releases/tags/{encoded}")));
        match http::send_optional(PROVIDER, req).await? {
            Some(res) => {
                let release: GithubRelease = http::parse_json(PROVIDER, res).await?;
                Ok(release.html_url)
            }
            None => Ok(format!("{}/{}/{}/tree/{encoded}", self.web_url, self.owner, self.repo)),
        }
    }
}

/// Extracts the total number of pages from the `Link` header.
///
/// The header only includes the `last` relation when there are more pages after the current one, so its absence
/// means the current page is the last one.
fn total_pages_from_link(link: Option<&str>, current_page: u32) -> u32 {
    link.into_iter()
        .flat_map(|l| l.split(','))
        .filter_map(|entry| {
            let (target, params) = entry.split_once(';')?;
            let is_last = params
                .split(';')
                .any(|p| p.trim().trim_start_matches("rel=").trim_matches('"') == "last");
            if !is_last {
                return None;
            }
            let url = Url::parse(target.trim().trim_start_matches('<').trim_end_matches('>')).ok()?;
            url.query_pairs()
                .find(|(k, _)| k == "page")
                .and_then(|(_, v)| v.parse::<u32>().ok())
        })
        .next()
        .unwrap_or(current_page)
        .max(current_page)
}

#[derive(Debug, Deserialize)]
struct GithubTag {
    name: String,
    commit: GithubTagCommit,
}

#[derive(Debug, Deserialize)]
struct GithubTagCommit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GithubCommit {
    commit: GithubCommitDetail,
}

#[derive(Debug, Deserialize)]
struct GithubCommitDetail {
    committer: GithubCommitSignature,
}

#[derive(Debug, Deserialize)]
struct GithubCommitSignature {
    date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GithubLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct GithubIssue {
    number: u64,
    title: String,
    html_url: String,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    labels: Vec<GithubLabel>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GithubPull {
    number: u64,
    title: String,
    html_url: String,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    user: Option<GithubUser>,
    #[serde(default)]
    labels: Vec<GithubLabel>,
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    html_url: String,
}

impl From<GithubIssue> for RemoteIssue {
    fn from(issue: GithubIssue) -> Self {
        RemoteIssue {
            number: issue.number,
            title: issue.title,
            url: issue.html_url,
            closed_at: issue.closed_at,
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            is_pull_request: issue.pull_request.is_some(),
        }
    }
}

impl From<GithubPull> for RemoteChange {
    fn from(pull: GithubPull) -> Self {
        // Deleted accounts are returned without user
        let (author, author_url) = pull
            .user
            .map(|u| (u.login, u.html_url))
            .unwrap_or_else(|| (String::from("ghost"), String::from("https://github.com/ghost")));
        RemoteChange {
            number: pull.number,
            title: pull.title,
            url: pull.html_url,
            author,
            author_url,
            merged_at: pull.merged_at,
            labels: pull.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}
