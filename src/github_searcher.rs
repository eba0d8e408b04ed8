use futures::future::join_all;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::extract::scan_file;
use crate::fetch::{local_path, FileFetcher};
use crate::github::{GitHubClient, SearchResultItem};
use crate::notify::Notifier;
use crate::paginator::{Outcome, PageStep, SearchPaginator};
use crate::patterns::PatternSet;
use crate::progress::SearchProgress;
use crate::quota::QuotaGovernor;
use crate::store::{Finding, ResultStore};

/// Totals for one run, printed when it ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub outcome: Outcome,
    pub pages: u32,
    pub items: usize,
    pub recorded: usize,
    pub duplicates: usize,
    pub fetch_failures: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stop = match self.outcome {
            Outcome::ExhaustedResults => "all results processed".to_string(),
            Outcome::PageLimit => "page limit reached".to_string(),
            Outcome::Aborted { next_page } => format!("interrupted before page {}", next_page),
        };
        write!(
            f,
            "{}: {} pages, {} results, {} new findings, {} already known, {} downloads failed",
            stop, self.pages, self.items, self.recorded, self.duplicates, self.fetch_failures
        )
    }
}

#[derive(Debug, Default)]
struct PageStats {
    recorded: usize,
    duplicates: usize,
    fetch_failures: usize,
}

enum ItemOutcome {
    Recorded(Finding),
    Duplicate,
    FetchFailed,
    StoreFailed(SearchError),
}

/// Everything one fetch + extract + record unit needs; cheap to clone into
/// a spawned task.
#[derive(Clone)]
struct ItemWorker {
    fetcher: FileFetcher,
    store: Arc<ResultStore>,
    patterns: Arc<PatternSet>,
    notifier: Notifier,
    output_dir: Arc<PathBuf>,
    context_radius: usize,
}

impl ItemWorker {
    async fn process(&self, item: SearchResultItem) -> ItemOutcome {
        let key = item.unique_key();
        let destination = local_path(&self.output_dir, &item);

        if let Err(e) = self.fetcher.fetch(&item.raw_content_url, &destination).await {
            warn!("Skipping {}: {}", key, e);
            return ItemOutcome::FetchFailed;
        }

        let extract = match scan_file(&destination, &self.patterns, self.context_radius).await {
            Ok(extract) => extract,
            Err(e) => {
                warn!("Skipping {}: cannot read {}: {}", key, destination.display(), e);
                return ItemOutcome::FetchFailed;
            }
        };

        let finding = Finding::new(&item, extract.line_number, extract.line, extract.excerpt);
        match self.store.record(finding.clone()).await {
            Ok(true) => {
                debug!("Recorded {} (line {})", key, finding.line_number);
                ItemOutcome::Recorded(finding)
            }
            Ok(false) => ItemOutcome::Duplicate,
            Err(e) => ItemOutcome::StoreFailed(e),
        }
    }
}

/// Drives one dork through search, download, extraction and the report.
///
/// Pages are processed strictly one after another; inside a page up to
/// `concurrency` files are handled at once and all of them finish before the
/// next page is requested.
pub struct GitHubSearcher {
    config: SearchConfig,
    client: GitHubClient,
    worker: ItemWorker,
    progress: SearchProgress,
}

impl GitHubSearcher {
    /// Build the searcher: compiles patterns (failing fast on a bad one),
    /// prepares the output directory and opens the report.
    pub fn new(config: SearchConfig, progress: SearchProgress) -> Result<Self, SearchError> {
        let patterns = PatternSet::build(&config.query, &config.extra_patterns)?;

        std::fs::create_dir_all(&config.output_dir).map_err(|source| SearchError::Io {
            path: config.output_dir.clone(),
            source,
        })?;
        let store = ResultStore::open(&config.report_path(), config.resume)?;

        let client = GitHubClient::new(&config)?;
        let notifier = Notifier::new(config.webhooks.clone(), config.notify_timeout)?;

        info!("Saving files under {}", config.output_dir.display());

        let worker = ItemWorker {
            fetcher: FileFetcher::new(client.clone()),
            store: Arc::new(store),
            patterns: Arc::new(patterns),
            notifier,
            output_dir: Arc::new(config.output_dir.clone()),
            context_radius: config.context_radius,
        };

        Ok(GitHubSearcher {
            config,
            client,
            worker,
            progress,
        })
    }

    pub fn store(&self) -> &ResultStore {
        &self.worker.store
    }

    /// Run the search until results run out, the page limit is hit, `cancel`
    /// fires, or a query-level error occurs.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary, SearchError> {
        let governor = QuotaGovernor::new(
            self.client.clone(),
            self.config.quota_safety_margin,
            self.progress.clone(),
        );
        let mut paginator = SearchPaginator::new(self.client.clone(), governor, &self.config);

        let mut summary = RunSummary {
            outcome: Outcome::ExhaustedResults,
            pages: 0,
            items: 0,
            recorded: 0,
            duplicates: 0,
            fetch_failures: 0,
        };

        loop {
            self.progress.page_started(paginator.current_page());

            let step = match paginator.next_page(cancel).await {
                Ok(step) => step,
                Err(e) => {
                    error!("Search stopped at page {}: {}", paginator.current_page(), e);
                    self.progress.finish(format!("✗ {}", e));
                    return Err(e);
                }
            };

            match step {
                PageStep::Page { number, items } => {
                    let count = items.len();
                    let stats = match self.process_page(items).await {
                        Ok(stats) => stats,
                        Err(e) => {
                            self.progress.finish(format!("✗ {}", e));
                            return Err(e);
                        }
                    };

                    summary.pages += 1;
                    summary.items += count;
                    summary.recorded += stats.recorded;
                    summary.duplicates += stats.duplicates;
                    summary.fetch_failures += stats.fetch_failures;

                    info!(
                        "Page {}: {} results, {} new findings",
                        number, count, stats.recorded
                    );
                    self.progress.page_finished(number, count, stats.recorded);
                }
                PageStep::Finished(outcome) => {
                    summary.outcome = outcome;
                    break;
                }
            }
        }

        self.progress.finish(format!("✓ {}", summary));
        self.worker
            .notifier
            .message(&format!("Dork '{}' finished. {}", self.config.query, summary))
            .await;
        Ok(summary)
    }

    async fn process_page(&self, items: Vec<SearchResultItem>) -> Result<PageStats, SearchError> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut stats = PageStats::default();
        let mut page_keys = HashSet::new();
        let mut tasks = Vec::new();

        for item in items {
            let key = item.unique_key();
            if self.worker.store.contains(&key) || !page_keys.insert(key) {
                stats.duplicates += 1;
                continue;
            }

            // Blocks while every permit is taken.
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let worker = self.worker.clone();
            tasks.push(tokio::spawn(async move {
                let outcome = worker.process(item).await;
                // Webhook delivery does not hold up the next download.
                drop(permit);
                if let ItemOutcome::Recorded(finding) = &outcome {
                    worker.notifier.finding(finding).await;
                }
                outcome
            }));
        }

        let mut store_error = None;
        for result in join_all(tasks).await {
            match result {
                Ok(ItemOutcome::Recorded(_)) => stats.recorded += 1,
                Ok(ItemOutcome::Duplicate) => stats.duplicates += 1,
                Ok(ItemOutcome::FetchFailed) => stats.fetch_failures += 1,
                Ok(ItemOutcome::StoreFailed(e)) => {
                    error!("Failed to write finding: {}", e);
                    if store_error.is_none() {
                        store_error = Some(e);
                    }
                }
                Err(e) => {
                    error!("Item task panicked: {}", e);
                    stats.fetch_failures += 1;
                }
            }
        }

        match store_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}
