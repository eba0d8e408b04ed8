#![allow(dead_code)]

use chrono::Utc;
use github_dork_search_lib::SearchConfig;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const DORK: &str = "filename:.env DB_PASSWORD";

/// Mock server that already answers `/rate_limit` with plenty of quota.
pub async fn mock_github() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": {
                "search": {
                    "limit": 30,
                    "remaining": 30,
                    "reset": Utc::now().timestamp() + 60
                }
            }
        })))
        .mount(&server)
        .await;
    server
}

pub fn test_config(server: &MockServer, output_dir: &Path) -> SearchConfig {
    let mut config = SearchConfig::new("test-token", DORK);
    config.api_base = server.uri();
    config.raw_base = server.uri();
    config.output_dir = output_dir.to_path_buf();
    config.page_delay = Duration::ZERO;
    config.retry_backoff = Duration::from_millis(10);
    config.quota_safety_margin = Duration::ZERO;
    config.request_timeout = Duration::from_secs(5);
    config
}

pub fn item_json(repo: &str, file_path: &str) -> Value {
    json!({
        "name": file_path.rsplit('/').next().unwrap_or(file_path),
        "path": file_path,
        "sha": "0123456789abcdef",
        "url": format!("https://api.github.com/repos/{}/contents/{}?ref=main", repo, file_path),
        "html_url": format!("https://github.com/{}/blob/main/{}", repo, file_path),
        "repository": { "full_name": repo }
    })
}

pub fn search_page(items: Vec<Value>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "total_count": items.len(),
        "incomplete_results": false,
        "items": items
    }))
}

/// Page numbers of every search request the server saw, in order.
pub async fn requested_pages(server: &MockServer) -> Vec<u32> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/search/code")
        .filter_map(|r| {
            r.url
                .query_pairs()
                .find(|(k, _)| k == "page")
                .and_then(|(_, v)| v.parse().ok())
        })
        .collect()
}

pub async fn requested_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect()
}

/// Data rows of a report, header excluded.
pub fn report_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}
