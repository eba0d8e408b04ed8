use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{SearchConfig, USER_AGENT};
use crate::fetch::rewrite_blob_url;

const TEXT_MATCH_ACCEPT: &str = "application/vnd.github.text-match+json";
const RAW_ACCEPT: &str = "application/vnd.github.raw";
const API_VERSION: &str = "2022-11-28";

/// One hit returned by the code search API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResultItem {
    pub repository_full_name: String,
    pub file_path: String,
    pub canonical_url: String,
    pub raw_content_url: String,
}

impl SearchResultItem {
    /// Key used to recognise a file across runs: `owner/name/path`.
    pub fn unique_key(&self) -> String {
        format!("{}/{}", self.repository_full_name, self.file_path)
    }
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ItemPayload {
    path: String,
    #[serde(default)]
    url: String,
    html_url: String,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    full_name: String,
}

/// What a single search request produced, before any retry policy applies.
#[derive(Debug)]
pub enum SearchResponse {
    /// `received` counts every entry the server sent, including ones that
    /// could not be parsed and were dropped from `items`.
    Items {
        items: Vec<SearchResultItem>,
        received: usize,
    },
    RateLimited(HeaderMap),
    Rejected { message: String },
    Failed { status: StatusCode },
}

/// Thin wrapper around the GitHub REST endpoints the pipeline talks to.
#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    api_timeout: Duration,
    token: String,
    api_base: String,
    raw_base: String,
}

impl GitHubClient {
    /// API calls get `request_timeout` as a total deadline. Downloads only
    /// get connect and per-read timeouts, so a large file that keeps
    /// streaming is never cut off.
    pub fn new(config: &SearchConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.request_timeout)
            .read_timeout(config.request_timeout)
            .build()?;

        Ok(GitHubClient {
            http,
            api_timeout: config.request_timeout,
            token: config.token.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            raw_base: config.raw_base.trim_end_matches('/').to_string(),
        })
    }

    /// Request one page of code search results.
    pub async fn search_code(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Result<SearchResponse, reqwest::Error> {
        let url = format!("{}/search/code", self.api_base);
        debug!("Requesting {} page {}", url, page);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("q", query.to_string()),
                ("per_page", per_page.to_string()),
                ("page", page.to_string()),
            ])
            .header("Accept", TEXT_MATCH_ACCEPT)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("X-GitHub-Api-Version", API_VERSION)
            .timeout(self.api_timeout)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body["message"]
                .as_str()
                .unwrap_or("Validation Failed")
                .to_string();
            return Ok(SearchResponse::Rejected { message });
        }

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            if is_rate_limited(&headers, &body) {
                return Ok(SearchResponse::RateLimited(headers));
            }
            return Ok(SearchResponse::Failed { status });
        }

        if !status.is_success() {
            return Ok(SearchResponse::Failed { status });
        }

        let payload: SearchPayload = response.json().await?;
        let received = payload.items.len();
        let items = payload
            .items
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<ItemPayload>(value) {
                Ok(item) => Some(self.to_result_item(item)),
                Err(e) => {
                    warn!("Skipping malformed search item on page {}: {}", page, e);
                    None
                }
            })
            .collect();
        Ok(SearchResponse::Items { items, received })
    }

    /// Fetch the `/rate_limit` document.
    pub async fn rate_limit(&self) -> Result<Value, reqwest::Error> {
        let url = format!("{}/rate_limit", self.api_base);
        self.http
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", self.token))
            .header("X-GitHub-Api-Version", API_VERSION)
            .timeout(self.api_timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Start a raw content download; the caller streams the body.
    pub async fn get_raw(&self, url: &str) -> Result<Response, reqwest::Error> {
        self.http
            .get(url)
            .header("Accept", RAW_ACCEPT)
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
    }

    fn to_result_item(&self, item: ItemPayload) -> SearchResultItem {
        let raw_content_url =
            rewrite_blob_url(&item.html_url, &self.raw_base).unwrap_or_else(|| item.url.clone());
        SearchResultItem {
            repository_full_name: item.repository.full_name,
            file_path: item.path,
            canonical_url: item.html_url,
            raw_content_url,
        }
    }
}

/// GitHub answers both quota exhaustion and secondary limits with 403 or 429.
/// Plain permission failures share the status, so look for the rate limit
/// markers before treating it as one.
pub fn is_rate_limited(headers: &HeaderMap, body: &str) -> bool {
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);

    exhausted
        || headers.contains_key("retry-after")
        || body.to_ascii_lowercase().contains("rate limit")
}
