//! # GitHub Dork Search
//!
//! Runs a GitHub code search query ("dork"), streams every matching file to
//! disk and records the first line that matches the query terms or a known
//! credential shape in a resumable CSV report, all while staying inside the
//! search API's rate limit.
//!
//! ## Main Components
//!
//! - [`GitHubSearcher`]: drives a run end to end
//! - [`SearchPaginator`]: walks result pages, waiting out rate limits
//! - [`QuotaGovernor`]: reads the search quota and computes waits
//! - [`PatternSet`], [`first_match`], [`context_window`]: local matching
//! - [`FileFetcher`]: streamed, rename-on-success downloads
//! - [`ResultStore`]: durable, de-duplicated report
//! - [`Args`] / [`SearchConfig`]: command line and resolved settings
//!
//! ## Example
//!
//! ```no_run
//! use github_dork_search_lib::{GitHubSearcher, SearchConfig, SearchProgress};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = SearchConfig::new("ghp_...", "filename:.env DB_PASSWORD");
//!     let progress = SearchProgress::new(config.max_pages);
//!     let searcher = GitHubSearcher::new(config, progress)?;
//!
//!     let summary = searcher.run(&CancellationToken::new()).await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod error;
mod extract;
mod fetch;
mod github;
mod github_searcher;
mod notify;
mod paginator;
mod patterns;
mod progress;
mod quota;
mod store;

pub use crate::args::Args;
pub use crate::config::{max_reachable_pages, SearchConfig, REPORT_FILE_NAME, SEARCH_RESULT_CAP};
pub use crate::error::{FetchError, SearchError};
pub use crate::extract::{
    context_window, first_match, scan_file, Extract, DEFAULT_CONTEXT_RADIUS, MAX_EXCERPT_CHARS,
    MAX_LINE_BYTES, MAX_LINE_CHARS,
};
pub use crate::fetch::{html_to_raw, local_path, rewrite_blob_url, FileFetcher};
pub use crate::github::{is_rate_limited, GitHubClient, SearchResponse, SearchResultItem};
pub use crate::github_searcher::{GitHubSearcher, RunSummary};
pub use crate::notify::Notifier;
pub use crate::paginator::{Outcome, PageStep, SearchPaginator};
pub use crate::patterns::{search_tokens, PatternSet, BUILTIN_PATTERNS};
pub use crate::progress::SearchProgress;
pub use crate::quota::{QuotaGovernor, QuotaState};
pub use crate::store::{load as load_seen_keys, Finding, ResultStore, REPORT_HEADER};
