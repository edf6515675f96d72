use std::time::Duration;

use color_eyre::eyre::Context;
use reqwest::{Client, ClientBuilder, RequestBuilder, Response, StatusCode, header::HeaderMap};
use serde::de::DeserializeOwned;

use crate::errors::{Result, UserFacingError};

/// Builds the http client shared by every request of a provider
pub(super) fn build_client(default_headers: HeaderMap) -> Result<Client> {
    Ok(ClientBuilder::new()
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(30))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .default_headers(default_headers)
        .build()
        .wrap_err("Couldn't build http client")?)
}

/// Sends the request, failing on any non-successful response
pub(super) async fn send(provider: &str, req: RequestBuilder) -> Result<Response> {
    match send_optional(provider, req).await? {
        Some(res) => Ok(res),
        None => Err(UserFacingError::ApiRequestFailed(String::from("received 404 Not Found response")).into()),
    }
}

/// Sends the request, returning [None] when the resource doesn't exist and failing on any other non-successful
/// response
pub(super) async fn send_optional(provider: &str, req: RequestBuilder) -> Result<Option<Response>> {
    let (client, req) = req.build_split();
    let req = req.wrap_err("Couldn't build api request")?;

    tracing::trace!("Calling {provider} API: {}", req.url());
    let res = client.execute(req).await.map_err(|err| {
        if err.is_timeout() {
            tracing::error!("Request timeout: {err:?}");
            UserFacingError::ApiRequestFailed(String::from("request timed out"))
        } else if err.is_connect() {
            tracing::error!("Couldn't connect to the API: {err:?}");
            UserFacingError::ApiRequestFailed(format!("error connecting to {provider}"))
        } else {
            tracing::error!("Couldn't perform the request: {err:?}");
            UserFacingError::ApiRequestFailed(err.to_string())
        }
    })?;

    let status = res.status();
    if status.is_success() {
        return Ok(Some(res));
    }
    if status == StatusCode::NOT_FOUND {
        tracing::debug!("Got response [404] Not Found");
        return Ok(None);
    }

    let status_str = status.as_str();
    let rate_limit_exhausted = res
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");
    let body = res.text().await.unwrap_or_default();
    if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && rate_limit_exhausted) {
        tracing::warn!("Got response [{status_str}] rate limited");
        tracing::debug!("{body}");
        Err(UserFacingError::ApiRateLimited.into())
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        tracing::warn!(
            "Got response [{status_str}] {}",
            status.canonical_reason().unwrap_or_default()
        );
        tracing::debug!("{body}");
        Err(UserFacingError::ApiUnauthorized.into())
    } else {
        tracing::error!("Got response [{status_str}]:\n{body}");
        let message = upstream_message(&body).unwrap_or_else(|| match status.canonical_reason() {
            Some(reason) => format!("received {status_str} {reason} response"),
            None => format!("received {status_str} response"),
        });
        Err(UserFacingError::ApiRequestFailed(message).into())
    }
}

/// Parses a successful json response
pub(super) async fn parse_json<T: DeserializeOwned>(provider: &str, res: Response) -> Result<T> {
    let body = res
        .text()
        .await
        .map_err(|err| UserFacingError::ApiRequestFailed(format!("couldn't read {provider} response: {err}")))?;
    Ok(serde_json::from_str(&body).wrap_err_with(|| format!("Couldn't parse {provider} response"))?)
}

/// Parses a successful json response holding a list of items.
///
/// Items not matching the expected shape are skipped, so a single malformed item doesn't fail the whole page.
pub(super) async fn parse_items<T: DeserializeOwned>(provider: &str, res: Response) -> Result<Vec<T>> {
    let values: Vec<serde_json::Value> = parse_json(provider, res).await?;
    Ok(values.into_iter().filter_map(parse_item).collect())
}

fn parse_item<T: DeserializeOwned>(value: serde_json::Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(item) => Some(item),
        Err(err) => {
            tracing::warn!("Skipping malformed item: {err}");
            None
        }
    }
}

/// Extracts the `message` field both GitHub and GitLab include on their error payloads
fn upstream_message(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(|s| s.to_string()))
}
