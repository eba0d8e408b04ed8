use futures::future::join_all;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::USER_AGENT;
use crate::store::Finding;

/// Posts short JSON messages to configured webhooks.
///
/// Delivery is fire-and-report: failures are logged and never reach the
/// pipeline. Every post is bounded by the timeout given to [`Notifier::new`].
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    webhooks: Vec<String>,
}

impl Notifier {
    pub fn new(webhooks: Vec<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Notifier { client, webhooks })
    }

    pub fn is_enabled(&self) -> bool {
        !self.webhooks.is_empty()
    }

    pub async fn finding(&self, finding: &Finding) {
        if !self.is_enabled() {
            return;
        }
        let text = if finding.line_number > 0 {
            format!(
                "{}/{} line {}: {}\n{}",
                finding.repo,
                finding.file_path,
                finding.line_number,
                finding.match_line,
                finding.source_url
            )
        } else {
            format!("{}/{}\n{}", finding.repo, finding.file_path, finding.source_url)
        };
        self.send(&text).await;
    }

    pub async fn message(&self, text: &str) {
        if self.is_enabled() {
            self.send(text).await;
        }
    }

    async fn send(&self, text: &str) {
        let body = json!({ "text": text });
        let body = &body;
        join_all(self.webhooks.iter().map(|url| async move {
            match self.client.post(url).json(body).send().await {
                Ok(resp) if resp.status().is_success() => debug!("Notified {}", url),
                Ok(resp) => warn!("Webhook {} answered HTTP {}", url, resp.status()),
                Err(e) if e.is_timeout() => warn!("Webhook {} timed out", url),
                Err(e) => warn!("Webhook {} failed: {}", url, e),
            }
        }))
        .await;
    }
}
