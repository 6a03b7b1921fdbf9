//! Client for the mailbox-polling one-time-code service.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use snag::capabilities::OneTimeCodeSource;
use snag::error::SnagError;

use super::{check_status, http_client, transport_error};

pub struct HttpMailbox {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpMailbox {
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            client: http_client().context("mailbox client")?,
            endpoint: Url::parse(endpoint).context("invalid mailbox endpoint")?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodeBody {
    #[serde(default)]
    code: Option<String>,
}

#[async_trait]
impl OneTimeCodeSource for HttpMailbox {
    async fn retrieve(&self, window: Duration) -> snag::Result<Option<String>> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("windowSecs", &window.as_secs().to_string());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;
        let body: CodeBody = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SnagError::Permanent(format!("malformed mailbox response: {e}")))?;

        Ok(body.code)
    }
}
