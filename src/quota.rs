use chrono::Utc;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::github::GitHubClient;
use crate::progress::SearchProgress;

/// Wait used when the quota endpoint cannot be read at all.
const UNKNOWN_QUOTA_WAIT_SECS: i64 = 60;

/// Wait used after a rate-limit response that carries no timing headers.
pub const FALLBACK_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// Remaining search allowance and when it resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaState {
    pub remaining: u64,
    pub reset_at: i64,
    pub limit: Option<u64>,
}

impl QuotaState {
    /// The state assumed when nothing is known: empty until a minute from now.
    pub fn conservative(now: i64) -> Self {
        QuotaState {
            remaining: 0,
            reset_at: now + UNKNOWN_QUOTA_WAIT_SECS,
            limit: None,
        }
    }

    /// Read `resources.search` out of a `/rate_limit` document.
    pub fn from_rate_limit_json(json: &Value) -> Option<Self> {
        let search = &json["resources"]["search"];
        Some(QuotaState {
            remaining: search["remaining"].as_u64()?,
            reset_at: search["reset"].as_i64()?,
            limit: search["limit"].as_u64(),
        })
    }
}

/// Decides when the search endpoint may be called again.
///
/// Nothing here returns an error: an unreadable quota turns into the most
/// conservative wait instead.
pub struct QuotaGovernor {
    client: GitHubClient,
    safety_margin: Duration,
    progress: SearchProgress,
}

impl QuotaGovernor {
    pub fn new(client: GitHubClient, safety_margin: Duration, progress: SearchProgress) -> Self {
        QuotaGovernor {
            client,
            safety_margin,
            progress,
        }
    }

    /// Query the limits endpoint for the search resource.
    pub async fn current_state(&self) -> QuotaState {
        let now = Utc::now().timestamp();
        let state = match self.client.rate_limit().await {
            Ok(json) => QuotaState::from_rate_limit_json(&json).unwrap_or_else(|| {
                warn!("Rate limit response had no search resource, assuming exhausted");
                QuotaState::conservative(now)
            }),
            Err(e) => {
                warn!("Failed to read rate limit: {}", e);
                QuotaState::conservative(now)
            }
        };
        debug!(
            "Search quota: {} remaining, resets at {}",
            state.remaining, state.reset_at
        );
        self.progress.quota(&state);
        state
    }

    /// How long to block for `state`; zero while requests remain.
    pub fn exhausted_wait(&self, state: &QuotaState, now: i64) -> Duration {
        if state.remaining > 0 {
            return Duration::ZERO;
        }
        let until_reset = Duration::from_secs((state.reset_at - now).max(0) as u64);
        until_reset + self.safety_margin
    }

    /// Block until the quota resets when nothing remains.
    pub async fn wait_if_exhausted(&self, state: &QuotaState, cancel: &CancellationToken) {
        let wait = self.exhausted_wait(state, Utc::now().timestamp());
        if wait.is_zero() {
            return;
        }
        warn!(
            "Search quota exhausted. Waiting {} seconds...",
            wait.as_secs()
        );
        self.progress.countdown(wait, cancel).await;
    }

    /// Wait derived from a 403/429 response: `Retry-After` first, then the
    /// reset timestamp, then a fixed fallback.
    pub fn rate_limit_wait(&self, headers: &HeaderMap, now: i64) -> Duration {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok())
        };

        if let Some(retry_after) = header("retry-after") {
            return Duration::from_secs(retry_after.max(0) as u64);
        }
        if let Some(reset) = header("x-ratelimit-reset") {
            return Duration::from_secs((reset - now).max(0) as u64) + self.safety_margin;
        }
        FALLBACK_RATE_LIMIT_WAIT
    }

    /// Sleep out a rate-limit response and return the wait that was applied.
    pub async fn on_rate_limit_response(
        &self,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Duration {
        let wait = self.rate_limit_wait(headers, Utc::now().timestamp());
        warn!("Rate limit reached. Waiting {} seconds...", wait.as_secs());
        self.progress.countdown(wait, cancel).await;
        wait
    }
}
