use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::quota::QuotaState;

/// Page progress plus a quota bar underneath it.
///
/// Progress is reported per page, never per file.
#[derive(Clone)]
pub struct SearchProgress {
    _multi: MultiProgress,
    pages: ProgressBar,
    quota: ProgressBar,
}

impl SearchProgress {
    pub fn new(max_pages: u32) -> Self {
        Self::with_target(max_pages, ProgressDrawTarget::stderr())
    }

    /// Progress that draws nothing, for tests and non-interactive runs.
    pub fn hidden(max_pages: u32) -> Self {
        Self::with_target(max_pages, ProgressDrawTarget::hidden())
    }

    fn with_target(max_pages: u32, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let pages = multi.add(ProgressBar::new(max_pages.into()));
        pages.set_style(
            ProgressStyle::default_bar()
                .template(
                    "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}/{len:3} pages {wide_msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pages.set_message("starting");

        let quota = multi.add(ProgressBar::new(100));
        quota.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.red/yellow} {pos:>3}/{len:3} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        quota.set_message("Rate limit status: OK");
        quota.set_position(100);

        SearchProgress {
            _multi: multi,
            pages,
            quota,
        }
    }

    pub fn page_started(&self, page: u32) {
        self.pages.set_message(format!("searching page {}", page));
    }

    pub fn page_finished(&self, page: u32, items: usize, recorded: usize) {
        self.pages.inc(1);
        self.pages.set_message(format!(
            "page {}: {} results, {} new findings",
            page, items, recorded
        ));
    }

    /// Show the latest quota numbers as a percentage of the limit.
    pub fn quota(&self, state: &QuotaState) {
        match state.limit {
            Some(limit) if limit > 0 => {
                self.quota
                    .set_position((state.remaining.min(limit) * 100) / limit);
                self.quota
                    .set_message(format!("Rate limit: {}/{}", state.remaining, limit));
            }
            _ => {
                self.quota
                    .set_message(format!("Rate limit remaining: {}", state.remaining));
            }
        }
    }

    /// Sleep for `duration` while animating a cooldown on the quota bar.
    /// Returns early when `cancel` fires.
    pub async fn countdown(&self, duration: Duration, cancel: &CancellationToken) {
        if duration.is_zero() {
            return;
        }

        let original_msg = self.pages.message();
        let start = Instant::now();
        let end = start + duration;

        while Instant::now() < end {
            let remaining = end.saturating_duration_since(Instant::now());
            let percentage =
                ((duration - remaining).as_millis() * 100) / duration.as_millis().max(1);
            self.quota.set_position(percentage as u64);
            self.quota.set_message(format!(
                "Rate limit cooldown: {}s remaining",
                remaining.as_secs()
            ));
            self.pages
                .set_message(format!("Rate limited - waiting {}s", remaining.as_secs()));

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(remaining.min(Duration::from_millis(500))) => {}
            }
        }

        self.quota.set_position(100);
        self.quota.set_message("Rate limit status: Ready");
        self.pages.set_message(original_msg);
    }

    pub fn finish(&self, message: String) {
        self.quota.finish_and_clear();
        self.pages.finish_with_message(message);
    }
}
