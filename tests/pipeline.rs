mod common;

use common::*;
use github_dork_search_lib::{
    FetchError, FileFetcher, GitHubClient, GitHubSearcher, Outcome, SearchConfig, SearchError,
    SearchProgress, REPORT_FILE_NAME,
};
use serde_json::Value;
use std::fs;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const ENV_FILE: &str = "APP_NAME=demo\nDB_HOST=db\nDB_PASSWORD=hunter2\nDB_PORT=5432\n";

async fn mount_search(server: &MockServer, items: Vec<serde_json::Value>) {
    Mock::given(method("GET"))
        .and(path("/search/code"))
        .respond_with(search_page(items))
        .mount(server)
        .await;
}

async fn webhook_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/hook")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

/// Serves a raw file and cancels the run as the download starts.
struct CancelOnDownload(CancellationToken);

impl Respond for CancelOnDownload {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.0.cancel();
        ResponseTemplate::new(200)
            .set_body_string(ENV_FILE)
            .set_delay(Duration::from_millis(200))
    }
}

async fn mount_raw(server: &MockServer, raw_path: &str, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path(raw_path))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn new_item_is_recorded_and_known_item_is_skipped() {
    let server = mock_github().await;
    mount_search(
        &server,
        vec![item_json("octo/old", ".env"), item_json("octo/new", "config/.env")],
    )
    .await;
    mount_raw(&server, "/octo/new/main/config/.env", 200, ENV_FILE).await;

    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join(REPORT_FILE_NAME);
    let previous = "repo,file_path,line_number,match_line,context_excerpt,github_url\n\
                    octo/old,.env,7,DB_PASSWORD=x,DB_PASSWORD=x,\
                    https://github.com/octo/old/blob/main/.env\n";
    fs::write(&report, previous).unwrap();

    let mut config = test_config(&server, dir.path());
    config.resume = true;
    let searcher = GitHubSearcher::new(config, SearchProgress::hidden(10)).unwrap();
    let summary = searcher.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.outcome, Outcome::ExhaustedResults);
    assert_eq!(summary.pages, 1);
    assert_eq!(summary.items, 2);
    assert_eq!(summary.recorded, 1);
    assert_eq!(summary.duplicates, 1);

    let rows = report_rows(&report);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], "octo/old");
    assert_eq!(rows[0][2], "7");
    assert_eq!(
        rows[1],
        vec![
            "octo/new",
            "config/.env",
            "3",
            "DB_PASSWORD=hunter2",
            "APP_NAME=demo\nDB_HOST=db\nDB_PASSWORD=hunter2\nDB_PORT=5432",
            "https://github.com/octo/new/blob/main/config/.env",
        ]
    );

    let saved = dir.path().join("github.com/octo/new/config/.env");
    assert_eq!(fs::read_to_string(saved).unwrap(), ENV_FILE);
    assert!(!requested_paths(&server)
        .await
        .contains(&"/octo/old/main/.env".to_string()));
}

#[tokio::test]
async fn file_without_a_match_is_recorded_with_line_zero() {
    let server = mock_github().await;
    mount_search(&server, vec![item_json("octo/plain", "README.md")]).await;
    mount_raw(&server, "/octo/plain/main/README.md", 200, "# Title\nnothing to see\n").await;

    let dir = tempfile::tempdir().unwrap();
    let searcher =
        GitHubSearcher::new(test_config(&server, dir.path()), SearchProgress::hidden(10)).unwrap();
    let summary = searcher.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.recorded, 1);

    let rows = report_rows(&dir.path().join(REPORT_FILE_NAME));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][2], "0");
    assert_eq!(rows[0][3], "");
    assert_eq!(rows[0][4], "");
}

#[tokio::test]
async fn failed_download_is_skipped_without_a_row() {
    let server = mock_github().await;
    mount_search(
        &server,
        vec![item_json("octo/gone", ".env"), item_json("octo/ok", ".env")],
    )
    .await;
    mount_raw(&server, "/octo/gone/main/.env", 404, "Not Found").await;
    mount_raw(&server, "/octo/ok/main/.env", 200, ENV_FILE).await;

    let dir = tempfile::tempdir().unwrap();
    let searcher =
        GitHubSearcher::new(test_config(&server, dir.path()), SearchProgress::hidden(10)).unwrap();
    let summary = searcher.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.recorded, 1);
    assert_eq!(summary.fetch_failures, 1);
    let rows = report_rows(&dir.path().join(REPORT_FILE_NAME));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], "octo/ok");

    let gone = dir.path().join("github.com/octo/gone/.env");
    assert!(!gone.exists());
    assert!(!dir.path().join("github.com/octo/gone/.env.part").exists());
}

#[tokio::test]
async fn second_run_with_resume_adds_nothing() {
    let server = mock_github().await;
    mount_search(&server, vec![item_json("octo/a", ".env")]).await;
    mount_raw(&server, "/octo/a/main/.env", 200, ENV_FILE).await;
    let dir = tempfile::tempdir().unwrap();

    for _ in 0..2 {
        let mut config = test_config(&server, dir.path());
        config.resume = true;
        let searcher = GitHubSearcher::new(config, SearchProgress::hidden(10)).unwrap();
        searcher.run(&CancellationToken::new()).await.unwrap();
    }

    assert_eq!(report_rows(&dir.path().join(REPORT_FILE_NAME)).len(), 1);
}

#[tokio::test]
async fn duplicate_items_within_a_page_are_fetched_once() {
    let server = mock_github().await;
    mount_search(
        &server,
        vec![item_json("octo/a", ".env"), item_json("octo/a", ".env")],
    )
    .await;
    mount_raw(&server, "/octo/a/main/.env", 200, ENV_FILE).await;
    let dir = tempfile::tempdir().unwrap();

    let searcher =
        GitHubSearcher::new(test_config(&server, dir.path()), SearchProgress::hidden(10)).unwrap();
    let summary = searcher.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.recorded, 1);
    assert_eq!(summary.duplicates, 1);
    let downloads = requested_paths(&server)
        .await
        .into_iter()
        .filter(|p| p == "/octo/a/main/.env")
        .count();
    assert_eq!(downloads, 1);
}

#[tokio::test]
async fn rejected_query_fails_the_run() {
    let server = mock_github().await;
    Mock::given(method("GET"))
        .and(path("/search/code"))
        .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
            "message": "Validation Failed"
        })))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let searcher =
        GitHubSearcher::new(test_config(&server, dir.path()), SearchProgress::hidden(10)).unwrap();
    let err = searcher.run(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SearchError::InvalidQuery { .. }));
    assert!(report_rows(&dir.path().join(REPORT_FILE_NAME)).is_empty());
}

#[tokio::test]
async fn bad_user_pattern_fails_before_any_request() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server, dir.path());
    config.extra_patterns = vec!["valid".into(), "(unclosed".into()];

    let err = match GitHubSearcher::new(config, SearchProgress::hidden(10)) {
        Ok(_) => panic!("expected an invalid pattern error"),
        Err(e) => e,
    };
    assert!(matches!(err, SearchError::InvalidPattern { ref line, .. } if line == "(unclosed"));
    assert!(requested_paths(&server).await.is_empty());
}

#[tokio::test]
async fn fetcher_streams_large_bodies_and_leaves_no_partial_file() {
    let server = MockServer::start().await;
    let body: String = (0..20_000).map(|i| format!("row {}\n", i)).collect();
    mount_raw(&server, "/big.txt", 200, &body).await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, dir.path());
    let fetcher = FileFetcher::new(GitHubClient::new(&config).unwrap());
    let destination = dir.path().join("nested/dir/big.txt");

    fetcher
        .fetch(&format!("{}/big.txt", server.uri()), &destination)
        .await
        .unwrap();

    assert_eq!(fs::read_to_string(&destination).unwrap(), body);
    assert!(!dir.path().join("nested/dir/big.txt.part").exists());
}

#[tokio::test]
async fn fetcher_reports_status_and_timeout() {
    let server = MockServer::start().await;
    mount_raw(&server, "/missing.txt", 404, "nope").await;
    Mock::given(method("GET"))
        .and(path("/slow.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server, dir.path());
    config.request_timeout = Duration::from_millis(200);
    let fetcher = FileFetcher::new(GitHubClient::new(&config).unwrap());

    let missing = dir.path().join("missing.txt");
    let err = fetcher
        .fetch(&format!("{}/missing.txt", server.uri()), &missing)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 404, .. }));
    assert!(!missing.exists());

    let slow = dir.path().join("slow.txt");
    let err = fetcher
        .fetch(&format!("{}/slow.txt", server.uri()), &slow)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Timeout { .. }));
    assert!(!slow.exists());
}

#[tokio::test]
async fn webhook_gets_each_finding_and_the_run_summary() {
    let server = mock_github().await;
    mount_search(&server, vec![item_json("octo/a", ".env")]).await;
    mount_raw(&server, "/octo/a/main/.env", 200, ENV_FILE).await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server, dir.path());
    config.webhooks = vec![format!("{}/hook", server.uri())];
    let searcher = GitHubSearcher::new(config, SearchProgress::hidden(10)).unwrap();
    let summary = searcher.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.recorded, 1);

    let bodies = webhook_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    let finding = bodies[0]["text"].as_str().unwrap();
    assert!(finding.starts_with("octo/a/.env line 3: DB_PASSWORD=hunter2"));
    assert!(finding.ends_with("https://github.com/octo/a/blob/main/.env"));
    let done = bodies[1]["text"].as_str().unwrap();
    assert!(done.contains("finished"));
    assert!(done.contains("1 new findings"));
}

#[tokio::test]
async fn broken_or_stalled_webhooks_do_not_affect_the_run() {
    let server = mock_github().await;
    mount_search(&server, vec![item_json("octo/a", ".env")]).await;
    mount_raw(&server, "/octo/a/main/.env", 200, ENV_FILE).await;
    Mock::given(method("POST"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/stalled"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3600)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server, dir.path());
    config.webhooks = vec![
        format!("{}/broken", server.uri()),
        format!("{}/stalled", server.uri()),
    ];
    config.notify_timeout = Duration::from_millis(200);
    let searcher = GitHubSearcher::new(config, SearchProgress::hidden(10)).unwrap();

    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        searcher.run(&CancellationToken::new()),
    )
    .await
    .expect("run must not wait on a stalled webhook")
    .unwrap();

    assert_eq!(summary.recorded, 1);
    assert_eq!(report_rows(&dir.path().join(REPORT_FILE_NAME)).len(), 1);
}

#[tokio::test]
async fn downloads_within_a_page_respect_the_concurrency_limit() {
    let server = mock_github().await;
    let items = (0..6)
        .map(|i| item_json(&format!("octo/r{}", i), ".env"))
        .collect();
    mount_search(&server, items).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/octo/r\d/main/\.env$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(ENV_FILE)
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server, dir.path());
    config.concurrency = 2;
    let searcher = GitHubSearcher::new(config, SearchProgress::hidden(10)).unwrap();

    let started = Instant::now();
    let summary = searcher.run(&CancellationToken::new()).await.unwrap();

    // Six 300ms downloads, two at a time.
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert_eq!(summary.recorded, 6);
}

#[tokio::test]
async fn cancelled_before_start_requests_nothing() {
    let server = mock_github().await;
    mount_search(&server, vec![item_json("octo/a", ".env")]).await;
    let dir = tempfile::tempdir().unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let searcher =
        GitHubSearcher::new(test_config(&server, dir.path()), SearchProgress::hidden(10)).unwrap();
    let summary = searcher.run(&cancel).await.unwrap();

    assert_eq!(summary.outcome, Outcome::Aborted { next_page: 1 });
    assert_eq!(summary.pages, 0);
    assert!(requested_pages(&server).await.is_empty());
}

#[tokio::test]
async fn cancellation_finishes_the_page_in_flight_then_stops() {
    let server = mock_github().await;
    let cancel = CancellationToken::new();
    for page in 1..=2u32 {
        let items = (0..2)
            .map(|i| item_json(&format!("octo/p{}", page), &format!("f{}.env", i)))
            .collect();
        Mock::given(method("GET"))
            .and(path("/search/code"))
            .and(query_param("page", page.to_string()))
            .respond_with(search_page(items))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path_regex(r"^/octo/p1/main/"))
        .respond_with(CancelOnDownload(cancel.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server, dir.path());
    config.per_page = 2;
    let searcher = GitHubSearcher::new(config, SearchProgress::hidden(10)).unwrap();
    let summary = searcher.run(&cancel).await.unwrap();

    assert_eq!(summary.outcome, Outcome::Aborted { next_page: 2 });
    assert_eq!(summary.pages, 1);
    assert_eq!(summary.recorded, 2);
    assert!(summary.to_string().starts_with("interrupted before page 2"));
    assert_eq!(requested_pages(&server).await, vec![1]);
    assert_eq!(report_rows(&dir.path().join(REPORT_FILE_NAME)).len(), 2);
}

#[tokio::test]
async fn slow_but_steady_download_outlives_the_request_timeout() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4096];
        let _ = socket.read(&mut request).await.unwrap();
        let head = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
        socket.write_all(head.as_bytes()).await.unwrap();
        for _ in 0..15 {
            socket.write_all(b"6\r\nline!\n\r\n").await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        socket.write_all(b"0\r\n\r\n").await.unwrap();
    });

    let dir = tempfile::tempdir().unwrap();
    let mut config = SearchConfig::new("test-token", DORK);
    config.request_timeout = Duration::from_millis(500);
    let fetcher = FileFetcher::new(GitHubClient::new(&config).unwrap());
    let destination = dir.path().join("steady.txt");

    fetcher
        .fetch(&format!("http://{}/steady.txt", addr), &destination)
        .await
        .unwrap();
    assert_eq!(fs::read_to_string(&destination).unwrap(), "line!\n".repeat(15));
}
