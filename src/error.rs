use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop a search run.
///
/// Rate limiting never shows up here: the paginator waits it out and retries
/// the same page. Per-file problems are reported through [`FetchError`] and
/// only ever skip the affected item.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("GitHub token not provided (use --token or set GITHUB_TOKEN)")]
    MissingToken,

    #[error("GitHub rejected the query '{query}': {message}")]
    InvalidQuery { query: String, message: String },

    #[error("search request for page {page} failed with HTTP {status}")]
    SearchRequestFailed { status: u16, page: u32 },

    #[error("network error while searching page {page}: {source}")]
    Network {
        page: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid pattern '{line}': {source}")]
    InvalidPattern {
        line: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to read pattern file {path}: {source}")]
    PatternFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("report error at {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Why a single file could not be downloaded.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP {status} while downloading {url}")]
    Status { status: u16, url: String },

    #[error("timed out downloading {url}")]
    Timeout { url: String },

    #[error("network error downloading {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    pub(crate) fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if is_timeout(&source) {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                source,
            }
        }
    }
}

/// Read timeouts can surface as an I/O `TimedOut` deep in the source chain
/// rather than as a reqwest timeout.
fn is_timeout(err: &reqwest::Error) -> bool {
    if err.is_timeout() {
        return true;
    }
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        source = e.source();
    }
    false
}
