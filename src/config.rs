use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, warn};

use crate::error::SearchError;
use crate::Args;

pub const GITHUB_API_BASE: &str = "https://api.github.com";
pub const GITHUB_RAW_BASE: &str = "https://raw.githubusercontent.com";
pub const USER_AGENT: &str = "github-dork-search/0.1";
pub const REPORT_FILE_NAME: &str = "findings.csv";

/// The code search API never returns more than this many results per query.
pub const SEARCH_RESULT_CAP: u32 = 1000;

/// Last page number the search API serves at `per_page` results per page.
pub fn max_reachable_pages(per_page: u32) -> u32 {
    SEARCH_RESULT_CAP.div_ceil(per_page.max(1))
}

/// Everything a run needs, resolved from the command line and environment.
///
/// The endpoint and timing fields carry production defaults; tests point them
/// at a mock server and shrink the delays.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub token: String,
    pub query: String,
    pub output_dir: PathBuf,
    pub resume: bool,
    pub extra_patterns: Vec<String>,
    pub webhooks: Vec<String>,
    pub max_pages: u32,
    pub per_page: u32,
    pub concurrency: usize,
    pub context_radius: usize,
    pub api_base: String,
    pub raw_base: String,
    pub request_timeout: Duration,
    pub notify_timeout: Duration,
    pub page_delay: Duration,
    pub retry_backoff: Duration,
    pub max_retries: u32,
    pub quota_safety_margin: Duration,
}

impl SearchConfig {
    /// A config with default tunables for `query`.
    pub fn new(token: impl Into<String>, query: impl Into<String>) -> Self {
        SearchConfig {
            token: token.into(),
            query: query.into(),
            output_dir: PathBuf::from("output"),
            resume: false,
            extra_patterns: Vec::new(),
            webhooks: Vec::new(),
            max_pages: 10,
            per_page: 100,
            concurrency: 5,
            context_radius: 3,
            api_base: GITHUB_API_BASE.to_string(),
            raw_base: GITHUB_RAW_BASE.to_string(),
            request_timeout: Duration::from_secs(60),
            notify_timeout: Duration::from_secs(10),
            page_delay: Duration::from_secs(1),
            retry_backoff: Duration::from_secs(2),
            max_retries: 3,
            quota_safety_margin: Duration::from_secs(3),
        }
    }

    /// Build the config from parsed arguments, reading the token from the
    /// environment when it was not given and loading the pattern file.
    pub fn from_args(args: &Args) -> Result<Self, SearchError> {
        let token = match &args.token {
            Some(t) if !t.trim().is_empty() => t.clone(),
            _ => match env::var("GITHUB_TOKEN") {
                Ok(token) if !token.trim().is_empty() => token,
                _ => {
                    error!("GitHub token not provided or found in environment");
                    return Err(SearchError::MissingToken);
                }
            },
        };

        let extra_patterns = match &args.patterns {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|source| SearchError::PatternFile {
                    path: path.clone(),
                    source,
                })?
                .lines()
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        };

        let mut config = SearchConfig::new(token, args.dork.clone());
        config.output_dir = args.output_dir.clone();
        config.resume = args.resume;
        config.extra_patterns = extra_patterns;
        config.webhooks = args.webhooks.clone();
        let reachable = max_reachable_pages(config.per_page);
        if args.max_pages > reachable {
            warn!(
                "--max-pages {} is past the last page GitHub serves, using {}",
                args.max_pages, reachable
            );
        }
        config.max_pages = args.max_pages.clamp(1, reachable);
        config.concurrency = args.concurrency.max(1);
        config.context_radius = args.context_lines;
        Ok(config)
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(REPORT_FILE_NAME)
    }
}
