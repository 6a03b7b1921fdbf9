//! Notification publishers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;
use url::Url;

use snag::capabilities::Notifier;
use snag_protocol::Posting;

use super::{check_status, http_client, transport_error};

/// Posts one JSON posting per notification to an operator webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            client: http_client().context("webhook client")?,
            url: Url::parse(url).context("invalid webhook url")?,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn publish(&self, posting: &Posting) -> snag::Result<()> {
        let response = self
            .client
            .post(self.url.clone())
            .json(posting)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await.map(|_| ())
    }
}

/// Fallback when no webhook is configured: discoveries land in the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, posting: &Posting) -> snag::Result<()> {
        info!(
            target = "snag.notify",
            posting_id = %posting.id,
            title = %posting.title,
            location = posting.location.as_deref().unwrap_or("-"),
            "new item discovered"
        );
        Ok(())
    }
}
