use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{max_reachable_pages, SearchConfig};
use crate::error::SearchError;
use crate::github::{GitHubClient, SearchResponse, SearchResultItem};
use crate::quota::QuotaGovernor;

/// How a paginated search ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// An empty or short page came back.
    ExhaustedResults,
    /// `max_pages` pages were handed out.
    PageLimit,
    /// Cancellation was observed before `next_page` was requested.
    Aborted { next_page: u32 },
}

#[derive(Debug)]
pub enum PageStep {
    Page {
        number: u32,
        items: Vec<SearchResultItem>,
    },
    Finished(Outcome),
}

/// Walks the search result pages one at a time.
///
/// A rate-limited page is waited out and requested again; the page number
/// only advances after a page was handed to the caller. Once finished, every
/// later call returns the same outcome without touching the network.
pub struct SearchPaginator {
    client: GitHubClient,
    governor: QuotaGovernor,
    query: String,
    per_page: u32,
    max_pages: u32,
    page_delay: Duration,
    retry_backoff: Duration,
    max_retries: u32,
    next: u32,
    requested: bool,
    finished: Option<Outcome>,
}

impl SearchPaginator {
    /// `max_pages` is lowered to the last page the search API will serve
    /// for `per_page`; asking past it is answered with a 422.
    pub fn new(client: GitHubClient, governor: QuotaGovernor, config: &SearchConfig) -> Self {
        let per_page = config.per_page.max(1);
        let reachable = max_reachable_pages(per_page);
        if config.max_pages > reachable {
            warn!(
                "Lowering page limit from {} to {} ({} results per page)",
                config.max_pages, reachable, per_page
            );
        }

        SearchPaginator {
            client,
            governor,
            query: config.query.clone(),
            per_page,
            max_pages: config.max_pages.min(reachable),
            page_delay: config.page_delay,
            retry_backoff: config.retry_backoff,
            max_retries: config.max_retries,
            next: 1,
            requested: false,
            finished: None,
        }
    }

    /// Highest page number this paginator will request.
    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// The page the next call will request.
    pub fn current_page(&self) -> u32 {
        self.next
    }

    pub async fn next_page(&mut self, cancel: &CancellationToken) -> Result<PageStep, SearchError> {
        if let Some(outcome) = self.finished {
            return Ok(PageStep::Finished(outcome));
        }
        if self.next > self.max_pages {
            info!("Max page limit reached (limit: {})", self.max_pages);
            return Ok(self.finish(Outcome::PageLimit));
        }

        let page = self.next;
        if self.requested && !self.page_delay.is_zero() {
            sleep_or_cancel(self.page_delay, cancel).await;
        }

        let mut transient_failures = 0;
        loop {
            if cancel.is_cancelled() {
                info!("Cancelled before page {}", page);
                return Ok(self.finish(Outcome::Aborted { next_page: page }));
            }

            let state = self.governor.current_state().await;
            self.governor.wait_if_exhausted(&state, cancel).await;
            if cancel.is_cancelled() {
                continue;
            }

            self.requested = true;
            let response = self.client.search_code(&self.query, page, self.per_page).await;

            match response {
                Ok(SearchResponse::Items { items, received }) => {
                    if received == 0 {
                        debug!("No more results at page {}", page);
                        return Ok(self.finish(Outcome::ExhaustedResults));
                    }
                    if received < self.per_page as usize {
                        debug!("Short page {} ({} items), last page", page, received);
                        self.finished = Some(Outcome::ExhaustedResults);
                    } else {
                        self.next += 1;
                    }
                    return Ok(PageStep::Page {
                        number: page,
                        items,
                    });
                }
                Ok(SearchResponse::RateLimited(headers)) => {
                    let wait = self.governor.on_rate_limit_response(&headers, cancel).await;
                    info!("Retrying page {} after {}s rate limit wait", page, wait.as_secs());
                }
                Ok(SearchResponse::Rejected { message }) => {
                    return Err(SearchError::InvalidQuery {
                        query: self.query.clone(),
                        message,
                    });
                }
                Ok(SearchResponse::Failed { status })
                    if status.is_server_error() && transient_failures < self.max_retries =>
                {
                    transient_failures += 1;
                    self.backoff(page, transient_failures, &status.to_string(), cancel).await;
                }
                Ok(SearchResponse::Failed { status }) => {
                    return Err(SearchError::SearchRequestFailed {
                        status: status.as_u16(),
                        page,
                    });
                }
                Err(e) if transient_failures < self.max_retries => {
                    transient_failures += 1;
                    self.backoff(page, transient_failures, &e.to_string(), cancel).await;
                }
                Err(source) => return Err(SearchError::Network { page, source }),
            }
        }
    }

    async fn backoff(&self, page: u32, attempt: u32, reason: &str, cancel: &CancellationToken) {
        let wait = self.retry_backoff * 2u32.saturating_pow(attempt - 1);
        warn!(
            "Page {} failed ({}), retry {}/{} in {:?}",
            page, reason, attempt, self.max_retries, wait
        );
        sleep_or_cancel(wait, cancel).await;
    }

    fn finish(&mut self, outcome: Outcome) -> PageStep {
        self.finished = Some(outcome);
        PageStep::Finished(outcome)
    }
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}
