use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::SearchError;
use crate::github::SearchResultItem;

pub const REPORT_HEADER: [&str; 6] = [
    "repo",
    "file_path",
    "line_number",
    "match_line",
    "context_excerpt",
    "github_url",
];

/// One row of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub repo: String,
    pub file_path: String,
    pub line_number: u64,
    pub match_line: String,
    pub context_excerpt: String,
    #[serde(rename = "github_url")]
    pub source_url: String,
}

impl Finding {
    /// Build a finding for `item`. A zero line number always carries empty
    /// text, whatever was passed in.
    pub fn new(
        item: &SearchResultItem,
        line_number: u64,
        match_line: String,
        excerpt: String,
    ) -> Self {
        let (match_line, context_excerpt) = if line_number == 0 {
            (String::new(), String::new())
        } else {
            (match_line, excerpt)
        };
        Finding {
            repo: item.repository_full_name.clone(),
            file_path: item.file_path.clone(),
            line_number,
            match_line,
            context_excerpt,
            source_url: item.canonical_url.clone(),
        }
    }

    pub fn unique_key(&self) -> String {
        format!("{}/{}", self.repo, self.file_path)
    }
}

struct StoreInner {
    writer: csv::Writer<File>,
    seen: HashSet<String>,
}

/// Append-only CSV report plus the set of keys already in it.
///
/// The seen-set check and the row write happen under one lock, so concurrent
/// workers can neither tear a row nor record the same key twice.
pub struct ResultStore {
    path: PathBuf,
    inner: Mutex<StoreInner>,
}

impl ResultStore {
    /// Open (or create) the report at `path`. With `resume`, keys already in
    /// the report are loaded and will be skipped.
    pub fn open(path: &Path, resume: bool) -> Result<Self, SearchError> {
        let io_err = |source| SearchError::Io {
            path: path.to_path_buf(),
            source,
        };
        let report_err = |source| SearchError::Report {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let seen = if resume { load(path) } else { HashSet::new() };
        if resume {
            info!("Resuming with {} known findings from {}", seen.len(), path.display());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;
        let is_empty = file.metadata().map_err(io_err)?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_empty {
            writer.write_record(REPORT_HEADER).map_err(report_err)?;
            writer.flush().map_err(io_err)?;
        }

        Ok(ResultStore {
            path: path.to_path_buf(),
            inner: Mutex::new(StoreInner { writer, seen }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().seen.contains(key)
    }

    pub fn seen_len(&self) -> usize {
        self.lock().seen.len()
    }

    /// Write `finding` and make it durable before returning. Returns
    /// `Ok(false)` without writing when its key was already recorded.
    pub fn append(&self, finding: &Finding) -> Result<bool, SearchError> {
        let key = finding.unique_key();
        let mut inner = self.lock();
        if inner.seen.contains(&key) {
            debug!("Skipping duplicate finding {}", key);
            return Ok(false);
        }

        inner.writer.serialize(finding).map_err(|source| SearchError::Report {
            path: self.path.clone(),
            source,
        })?;
        inner
            .writer
            .flush()
            .and_then(|_| inner.writer.get_ref().sync_data())
            .map_err(|source| SearchError::Io {
                path: self.path.clone(),
                source,
            })?;

        inner.seen.insert(key);
        Ok(true)
    }

    /// [`ResultStore::append`] on the blocking pool, so the flush and fsync
    /// never stall a runtime worker thread.
    pub async fn record(self: &Arc<Self>, finding: Finding) -> Result<bool, SearchError> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.append(&finding))
            .await
            .map_err(|e| SearchError::Io {
                path: self.path.clone(),
                source: std::io::Error::other(e),
            })?
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Read the unique keys of an existing report.
///
/// Best effort: a missing or header-only file gives an empty set, and rows
/// that cannot be parsed are skipped. Columns are found by header name so
/// older layouts still resume.
pub fn load(path: &Path) -> HashSet<String> {
    let mut seen = HashSet::new();

    let mut reader = match csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_path(path)
    {
        Ok(reader) => reader,
        Err(e) => {
            if path.exists() {
                warn!("Could not open report {}: {}", path.display(), e);
            }
            return seen;
        }
    };

    let (repo_idx, path_idx) = match reader.headers() {
        Ok(headers) => (
            headers.iter().position(|h| h.trim() == "repo").unwrap_or(0),
            headers.iter().position(|h| h.trim() == "file_path").unwrap_or(1),
        ),
        Err(_) => (0, 1),
    };

    for (idx, record) in reader.records().enumerate() {
        match record {
            Ok(record) => match (record.get(repo_idx), record.get(path_idx)) {
                (Some(repo), Some(file_path)) if !repo.is_empty() && !file_path.is_empty() => {
                    seen.insert(format!("{}/{}", repo, file_path));
                }
                _ => debug!("Skipping incomplete report row {}", idx + 2),
            },
            Err(e) if e.is_io_error() => {
                warn!("Stopped reading {}: {}", path.display(), e);
                break;
            }
            Err(e) => debug!("Skipping malformed report row {}: {}", idx + 2, e),
        }
    }

    seen
}
